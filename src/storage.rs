//! Snapshot export and import
//!
//! Facts leave and enter a store as ordered maps of property name to
//! history. The binary form is a bincode-encoded, versioned list of such
//! maps; it carries values only, never fact identities.

use crate::error::{FactbaseError, Result};
use crate::fact::Fact;
use crate::factbase::FactStore;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

const FORMAT_VERSION: u32 = 1;

/// Property name to history, in first-write order
pub type FactMap = Vec<(String, Vec<Value>)>;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    facts: Vec<FactMap>,
}

impl FactStore {
    /// Every fact as a name to history map
    pub fn to_maps(&self) -> Vec<FactMap> {
        self.snapshot()
            .iter()
            .map(|f| f.snapshot().iter().cloned().collect())
            .collect()
    }

    /// Replace the whole content of the store. Every map is validated
    /// before anything is replaced.
    pub fn replace_with_maps(&self, maps: Vec<FactMap>) -> Result<()> {
        let mut facts = Vec::with_capacity(maps.len());
        for map in maps {
            let fact = Fact::from_cell(self.new_cell());
            for (name, values) in map {
                fact.set_all(&name, values)?;
            }
            facts.push(fact);
        }
        debug!(facts = facts.len(), "Store content replaced");
        self.replace_all(facts);
        Ok(())
    }

    pub fn export(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            version: FORMAT_VERSION,
            facts: self.to_maps(),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    pub fn import(&self, bytes: &[u8]) -> Result<()> {
        let snapshot: Snapshot = bincode::deserialize(bytes)?;
        if snapshot.version != FORMAT_VERSION {
            return Err(FactbaseError::Serialization(Box::new(
                bincode::ErrorKind::Custom(format!(
                    "unsupported snapshot version {} (expected {})",
                    snapshot.version, FORMAT_VERSION
                )),
            )));
        }
        self.replace_with_maps(snapshot.facts)
    }

    /// New store with default configuration holding an exported snapshot
    pub fn from_bytes(bytes: &[u8]) -> Result<FactStore> {
        let store = FactStore::new();
        store.import(bytes)?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factbase::Factbase;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_export_import() {
        let fb = FactStore::new();
        let f = fb.insert().unwrap();
        f.set("foo", 42).unwrap();
        f.set("foo", "hello").unwrap();
        f.set("t", Utc.with_ymd_and_hms(2024, 5, 25, 19, 43, 48).unwrap())
            .unwrap();
        fb.insert().unwrap().set("bar", 3.14).unwrap();

        let bytes = fb.export().unwrap();
        let copy = FactStore::from_bytes(&bytes).unwrap();
        assert_eq!(copy.size(), 2);
        assert_eq!(copy.to_maps(), fb.to_maps());
        assert_eq!(
            copy.query("(eq foo 'hello')").unwrap().to_vec().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_import_replaces_content() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("old", 1).unwrap();
        let other = FactStore::new();
        other.insert().unwrap().set("new", 1).unwrap();
        fb.import(&other.export().unwrap()).unwrap();
        assert_eq!(fb.size(), 1);
        assert!(fb.facts()[0].history("old").is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let fb = FactStore::new();
        assert!(fb.import(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_invalid_map_leaves_store_untouched() {
        let fb = FactStore::new();
        fb.insert().unwrap().set("foo", 1).unwrap();
        let maps = vec![vec![("to_s".to_string(), vec![Value::Int(1)])]];
        assert!(fb.replace_with_maps(maps).is_err());
        assert_eq!(fb.size(), 1);
    }
}
