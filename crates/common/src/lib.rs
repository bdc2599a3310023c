// MODULE DECLARATIONS
// These files exist internally but we decide what to expose below.
mod document;
mod value;

// PUBLIC API EXPORTS
// Users of this crate (the storage engine and the client) access these directly.
pub use document::{
    Document, FIELD_CREATED_AT, FIELD_ID, FIELD_IS_DELETED, FIELD_PROJECT, FIELD_UPDATED_AT,
};
pub use value::{IndexKey, KeyComponent, Value};
