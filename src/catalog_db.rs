use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{error::Result, extract::DocumentKind};

const MATERIALS: TableDefinition<&str, &str> =
    TableDefinition::new("materials");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// An ingested document as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub material_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub filepath: String,
    pub chunk_count: usize,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Material catalog and persisted settings.
pub struct CatalogDb {
    db: Database,
}

impl CatalogDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        txn.open_table(MATERIALS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Materials --

    pub fn add_material(&self, material: &Material) -> Result<()> {
        let json = serde_json::to_string(material)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MATERIALS)?;
            table.insert(material.material_id.as_str(), json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_material(&self, material_id: &str) -> Result<Option<Material>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MATERIALS)?;
        match table.get(material_id)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// All materials, oldest first.
    pub fn list_materials(&self) -> Result<Vec<Material>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MATERIALS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_str::<Material>(v.value())?);
        }
        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(result)
    }

    pub fn material_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MATERIALS)?;
        Ok(table.iter()?.count() as u64)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for CatalogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDb").finish_non_exhaustive()
    }
}
