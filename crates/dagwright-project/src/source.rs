//! Source catalog
//!
//! Static declaration of the raw tables models may read with `source()`.

use crate::template::SourceRef;
use dagwright_core::{SourceColumn, SourceConfig};
use std::collections::BTreeMap;

/// A declared raw table
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    /// Namespace used in `source('<namespace>', ...)`
    pub namespace: String,
    /// Physical schema in the store
    pub schema: String,
    pub name: String,
    pub columns: Vec<SourceColumn>,
    /// Natural key; rows conflicting on it are skipped by the loaders
    pub unique_key: Vec<String>,
}

impl SourceTable {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    tables: BTreeMap<(String, String), SourceTable>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(sources: &[SourceConfig]) -> Self {
        let mut catalog = Self::new();
        for source in sources {
            for table in &source.tables {
                catalog.declare(SourceTable {
                    namespace: source.name.clone(),
                    schema: source.physical_schema().to_string(),
                    name: table.name.clone(),
                    columns: table.columns.clone(),
                    unique_key: table.unique_key.clone(),
                });
            }
        }
        catalog
    }

    /// Add or replace a table declaration
    pub fn declare(&mut self, table: SourceTable) {
        self.tables
            .insert((table.namespace.clone(), table.name.clone()), table);
    }

    pub fn contains(&self, source: &SourceRef) -> bool {
        self.table(source).is_some()
    }

    pub fn table(&self, source: &SourceRef) -> Option<&SourceTable> {
        self.tables
            .get(&(source.namespace.clone(), source.table.clone()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &SourceTable> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagwright_core::{LogicalType, SourceTableConfig};

    #[test]
    fn catalog_from_config() {
        let sources = vec![SourceConfig {
            name: "external".to_string(),
            schema: Some("ext".to_string()),
            tables: vec![SourceTableConfig {
                name: "yolo_detections".to_string(),
                columns: vec![SourceColumn::new("filename", LogicalType::Text)],
                unique_key: vec!["filename".to_string()],
            }],
        }];

        let catalog = SourceCatalog::from_config(&sources);
        let source = SourceRef::new("external", "yolo_detections");

        assert!(catalog.contains(&source));
        assert!(!catalog.contains(&SourceRef::new("raw", "yolo_detections")));

        let table = catalog.table(&source).unwrap();
        assert_eq!(table.schema, "ext");
        assert_eq!(table.column_names(), vec!["filename"]);
    }
}
