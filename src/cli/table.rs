//! Table builder wrapper around comfy-table for consistent list display.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// Create a standard list table with the given headers.
///
/// Uses the NOTHING preset (no borders) for a clean CLI aesthetic.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table with a count line, or a placeholder when empty.
pub fn render_list(entity_name: &str, table: Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name} found.");
    }
    let plural = if total == 1 { entity_name.to_string() } else { format!("{entity_name}s") };
    format!("{total} {plural}:\n{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_renders_placeholder() {
        let table = list_table(&["id", "status"]);
        assert_eq!(render_list("rule", table, 0), "No rules found.");
    }

    #[test]
    fn count_line_pluralises() {
        let table = list_table(&["id"]);
        assert!(render_list("rule", table, 2).starts_with("2 rules:"));
    }
}
