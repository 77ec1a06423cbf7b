use crate::model::{Dataset, LoadStrategy};

/// Tables to clear before loading `dataset`, in deletion order.
///
/// Tables marked by an empty row come first, in first-seen order. REFRESH
/// stops there. INSERT appends every other table in reverse order of its
/// last occurrence, so child tables listed after their parents are cleared
/// first. Each table appears at most once.
pub fn tables_to_delete(dataset: &Dataset, strategy: LoadStrategy) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();

    for (table, row) in dataset.iter() {
        if row.is_empty() && !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }

    if strategy == LoadStrategy::Refresh {
        return tables;
    }

    let entries: Vec<(&str, _)> = dataset.iter().collect();
    for (table, _) in entries.iter().rev() {
        if !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }

    tables
}
