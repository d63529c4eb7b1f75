//! Body catalog storage.
//!
//! A catalog is a key-value store of [`Body`] records keyed by body name.
//! The persistent implementation is an embedded sled database holding
//! JSON-encoded records, so it survives restarts and can be shared between
//! orchestrator runs.

use crate::body::Body;
use crate::error::{OrchestratorError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

/// Read/write access to the body catalog.
///
/// Implementations must be thread-safe.
pub trait BodyCatalog: Send + Sync {
    /// Inserts or replaces a body under its name.
    fn insert(&self, body: &Body) -> Result<()>;

    /// Looks a body up by name.
    fn get(&self, name: &str) -> Result<Option<Body>>;

    /// All bodies, ordered by name.
    fn bodies(&self) -> Result<Vec<Body>>;

    /// Number of stored bodies.
    fn len(&self) -> Result<usize> {
        Ok(self.bodies()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// ============================================================================
// SLED CATALOG
// ============================================================================

/// Sled-based persistent body catalog.
pub struct SledBodyCatalog {
    db: sled::Db,
}

impl SledBodyCatalog {
    /// Open a persistent catalog at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            OrchestratorError::Catalog(format!(
                "Failed to open sled DB at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { db })
    }

    /// Create a temporary catalog, deleted on drop
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| OrchestratorError::Catalog(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Inserts every body of a JSON array, returning how many were stored.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let bodies: Vec<Body> = serde_json::from_str(json)?;
        for body in &bodies {
            self.insert(body)?;
        }
        Ok(bodies.len())
    }
}

impl BodyCatalog for SledBodyCatalog {
    fn insert(&self, body: &Body) -> Result<()> {
        let value = serde_json::to_vec(body)
            .map_err(|e| OrchestratorError::Catalog(format!("Encode failed: {}", e)))?;
        self.db
            .insert(body.name.as_bytes(), value)
            .map_err(|e| OrchestratorError::Catalog(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| OrchestratorError::Catalog(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Body>> {
        match self.db.get(name.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| OrchestratorError::Catalog(format!("Corrupt record '{}': {}", name, e))),
            None => Ok(None),
        }
    }

    fn bodies(&self) -> Result<Vec<Body>> {
        let mut bodies = Vec::new();
        for result in self.db.iter() {
            let (key, value) = result
                .map_err(|e| OrchestratorError::Catalog(format!("Iteration failed: {}", e)))?;
            let body: Body = serde_json::from_slice(&value).map_err(|e| {
                OrchestratorError::Catalog(format!(
                    "Corrupt record '{}': {}",
                    String::from_utf8_lossy(&key),
                    e
                ))
            })?;
            bodies.push(body);
        }
        Ok(bodies)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.db.len())
    }
}

// ============================================================================
// IN-MEMORY CATALOG
// ============================================================================

/// Volatile catalog for tests and ad-hoc runs.
#[derive(Default)]
pub struct MemoryCatalog {
    bodies: RwLock<BTreeMap<String, Body>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from a list of bodies.
    pub fn from_bodies(bodies: impl IntoIterator<Item = Body>) -> Self {
        let map = bodies.into_iter().map(|b| (b.name.clone(), b)).collect();
        Self {
            bodies: RwLock::new(map),
        }
    }
}

impl BodyCatalog for MemoryCatalog {
    fn insert(&self, body: &Body) -> Result<()> {
        self.bodies
            .write()
            .map_err(|_| OrchestratorError::Catalog("catalog lock poisoned".to_string()))?
            .insert(body.name.clone(), body.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Body>> {
        Ok(self
            .bodies
            .read()
            .map_err(|_| OrchestratorError::Catalog("catalog lock poisoned".to_string()))?
            .get(name)
            .cloned())
    }

    fn bodies(&self) -> Result<Vec<Body>> {
        Ok(self
            .bodies
            .read()
            .map_err(|_| OrchestratorError::Catalog("catalog lock poisoned".to_string()))?
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn body(name: &str, mass: f64) -> Body {
        Body {
            name: name.to_string(),
            mass,
            radius: 1.0,
            smoothing_length: 0.1,
            temperature: 2000.0,
            file: PathBuf::from(format!("{}.h5part", name)),
            composition: [("granite".to_string(), 0.7), ("iron".to_string(), 0.3)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_sled_catalog_roundtrip() {
        let catalog = SledBodyCatalog::open_temporary().unwrap();
        catalog.insert(&body("b", 2.0)).unwrap();
        catalog.insert(&body("a", 1.0)).unwrap();

        assert_eq!(catalog.len().unwrap(), 2);
        assert_eq!(catalog.get("a").unwrap(), Some(body("a", 1.0)));
        assert_eq!(catalog.get("zzz").unwrap(), None);

        let names: Vec<String> = catalog.bodies().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_sled_catalog_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bodies.db");
        {
            let catalog = SledBodyCatalog::open(&path).unwrap();
            catalog.insert(&body("earth", 5.97e27)).unwrap();
        }
        let catalog = SledBodyCatalog::open(&path).unwrap();
        assert_eq!(catalog.get("earth").unwrap().map(|b| b.mass), Some(5.97e27));
    }

    #[test]
    fn test_sled_catalog_import_json() {
        let catalog = SledBodyCatalog::open_temporary().unwrap();
        let json = serde_json::to_string(&vec![body("x", 1.0), body("y", 2.0)]).unwrap();

        assert_eq!(catalog.import_json(&json).unwrap(), 2);
        assert!(catalog.import_json("not json").is_err());
        assert_eq!(catalog.len().unwrap(), 2);
    }

    #[test]
    fn test_memory_catalog_replaces_by_name() {
        let catalog = MemoryCatalog::from_bodies(vec![body("a", 1.0)]);
        catalog.insert(&body("a", 3.0)).unwrap();

        assert_eq!(catalog.len().unwrap(), 1);
        assert_eq!(catalog.get("a").unwrap().map(|b| b.mass), Some(3.0));
        assert!(!catalog.is_empty().unwrap());
    }
}
