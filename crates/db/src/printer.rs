use std::collections::BTreeSet;

use comfy_table::{Cell, Table};

use common::{Document, FIELD_CREATED_AT, FIELD_ID, FIELD_PROJECT, Value};
use storage::PageStoreStats;

const MAX_DISPLAY_ROWS: usize = 100;
// Well-known fields lead the table; everything else follows alphabetically.
const LEADING_FIELDS: [&str; 3] = [FIELD_ID, FIELD_PROJECT, FIELD_CREATED_AT];

pub fn format_documents(documents: &[Document]) -> String {
    if documents.is_empty() {
        return "(0 records)".to_string();
    }

    let mut other_fields = BTreeSet::new();
    for document in documents {
        for name in document.field_names() {
            if !LEADING_FIELDS.contains(&name.as_str()) {
                other_fields.insert(name.clone());
            }
        }
    }
    let mut columns: Vec<String> = LEADING_FIELDS.iter().map(|name| name.to_string()).collect();
    columns.extend(other_fields);

    let mut table = Table::new();
    table.set_header(columns.iter().map(|name| Cell::new(name.clone())));
    for document in documents.iter().take(MAX_DISPLAY_ROWS) {
        table.add_row(
            columns
                .iter()
                .map(|name| Cell::new(format_field(document.get(name)))),
        );
    }

    let total = documents.len();
    let mut output = table.to_string();
    output.push('\n');
    output.push_str(&format!("({} records)", total));
    let hidden = total.saturating_sub(MAX_DISPLAY_ROWS);
    if hidden > 0 {
        output.push('\n');
        output.push_str(&format!("... ({} records hidden)", hidden));
    }
    output
}

pub fn format_document(document: &Document) -> String {
    serde_json::to_string_pretty(&document.to_json())
        .unwrap_or_else(|_| "<unprintable document>".to_string())
}

pub fn format_stats(stats: &PageStoreStats) -> String {
    format!(
        "pages: {} total, {} orphaned, {} bytes on disk",
        stats.total_pages, stats.orphaned_pages, stats.file_bytes
    )
}

fn format_field(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(value) => value.to_string(),
    }
}

pub fn print_documents(documents: &[Document]) {
    println!("{}", format_documents(documents));
}
