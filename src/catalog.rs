use std::collections::HashMap;

use anyhow::{bail, Result};

/// Table metadata: logical name and backing heap file.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub table_name: String,
    pub file_path: String,
}

/// Index metadata: the table and search attribute it covers, and the file
/// holding the tree.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub index_name: String,
    pub table_name: String,
    pub file_path: String,
    pub key_name: String,
}

/// Maps logical table and index names to their on-disk files.
#[derive(Debug, Default)]
pub struct DatabaseCatalog {
    tables: HashMap<String, TableInfo>,
    indexes: HashMap<String, IndexInfo>,
}

impl DatabaseCatalog {
    pub fn new() -> Self {
        DatabaseCatalog::default()
    }

    pub fn add_table(&mut self, table: TableInfo) {
        self.tables.insert(table.table_name.clone(), table);
    }

    pub fn get_table(&self, table_name: &str) -> Result<&TableInfo> {
        match self.tables.get(table_name) {
            Some(t) => Ok(t),
            None => bail!("table not found in catalog: {}", table_name),
        }
    }

    pub fn add_index(&mut self, index: IndexInfo) {
        self.indexes.insert(index.index_name.clone(), index);
    }

    pub fn get_index(&self, index_name: &str) -> Result<&IndexInfo> {
        match self.indexes.get(index_name) {
            Some(i) => Ok(i),
            None => bail!("index not found in catalog: {}", index_name),
        }
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    pub fn index_exists(&self, index_name: &str) -> bool {
        self.indexes.contains_key(index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let mut catalog = DatabaseCatalog::new();
        catalog.add_table(TableInfo {
            table_name: "Movie".to_string(),
            file_path: "movie.bin".to_string(),
        });

        assert!(catalog.table_exists("Movie"));
        assert_eq!(catalog.get_table("Movie").unwrap().file_path, "movie.bin");
        assert!(catalog.get_table("Person").is_err());
    }

    #[test]
    fn test_index_lookup() {
        let mut catalog = DatabaseCatalog::new();
        catalog.add_index(IndexInfo {
            index_name: "title_index.bin".to_string(),
            table_name: "Movie".to_string(),
            file_path: "title_index.bin".to_string(),
            key_name: "title".to_string(),
        });

        assert!(catalog.index_exists("title_index.bin"));
        let info = catalog.get_index("title_index.bin").unwrap();
        assert_eq!(info.key_name, "title");
        assert!(!catalog.index_exists("movieId_index.bin"));
    }
}
