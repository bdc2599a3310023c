// MODULE DECLARATIONS
// These files exist internally but we decide what to expose below.
mod error;
mod layout;
mod page;
mod pager;

// PUBLIC API EXPORTS
// Users of this crate (the journal and the collection) access these directly.
pub use error::{StorageError, StorageResult};
pub use layout::{IndexBuckets, LAYOUT_VERSION, Layout};
pub use page::{MAX_PAYLOAD, PAGE_HEADER_SIZE, PAGE_MAGIC, PAGE_SIZE, PAGE_VERSION, PageIndex};
pub use pager::{PageStore, PageStoreStats};
