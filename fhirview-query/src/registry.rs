//! Filesystem registry for view definitions.
//!
//! Definitions live as JSON documents in a directory, addressed by name.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::viewdef::ViewDefinition;

/// A directory of view definitions addressed by name.
#[derive(Debug, Clone)]
pub struct ViewDefinitionRegistry {
    dir: PathBuf,
}

impl ViewDefinitionRegistry {
    /// Open (creating if needed) a registry at the given directory.
    pub fn open(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::fatal(format!("cannot create registry dir: {e}")))?;
        Ok(Self { dir })
    }

    /// The registry directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a view definition by name.
    pub fn load(&self, name: &str) -> EngineResult<ViewDefinition> {
        let path = self.path_for(name)?;
        let data = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::not_found(format!("view definition '{name}'"))
            } else {
                EngineError::fatal(format!("cannot read view definition '{name}': {e}"))
            }
        })?;

        let def: ViewDefinition = serde_json::from_str(&data).map_err(|e| {
            EngineError::invalid_input(format!("malformed view definition '{name}': {e}"))
        })?;
        def.validate()?;

        debug!(name, "loaded view definition");
        Ok(def)
    }

    /// Save a view definition; `name` overrides the definition's own name.
    pub fn save(&self, def: &ViewDefinition, name: Option<&str>) -> EngineResult<()> {
        let name = name.unwrap_or(&def.name);
        def.validate()?;
        let path = self.path_for(name)?;

        let json = serde_json::to_string_pretty(def)
            .map_err(|e| EngineError::fatal(format!("cannot serialize view definition: {e}")))?;
        fs::write(&path, json)
            .map_err(|e| EngineError::fatal(format!("cannot write view definition '{name}': {e}")))?;

        info!(name, "saved view definition");
        Ok(())
    }

    /// Delete a view definition by name.
    pub fn delete(&self, name: &str) -> EngineResult<()> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::not_found(format!("view definition '{name}'"))
            } else {
                EngineError::fatal(format!("cannot delete view definition '{name}': {e}"))
            }
        })?;
        info!(name, "deleted view definition");
        Ok(())
    }

    /// Load every definition in the registry, sorted by name.
    ///
    /// Malformed files are skipped with a warning rather than failing the
    /// whole listing.
    pub fn load_all(&self) -> EngineResult<Vec<ViewDefinition>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| EngineError::fatal(format!("cannot list registry dir: {e}")))?;

        let mut defs = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| EngineError::fatal(format!("cannot list registry dir: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(stem) {
                Ok(def) => defs.push(def),
                Err(e) => tracing::warn!(name = stem, error = %e, "skipping unreadable view definition"),
            }
        }

        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    fn path_for(&self, name: &str) -> EngineResult<PathBuf> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EngineError::invalid_input(format!(
                "invalid view definition name '{name}'"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ViewDefinition {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "getResourceKey()"}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        registry.save(&sample("patient_simple"), None).unwrap();
        let loaded = registry.load("patient_simple").unwrap();
        assert_eq!(loaded.name, "patient_simple");
        assert_eq!(loaded.resource, "Patient");
    }

    #[test]
    fn test_save_under_override_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        registry.save(&sample("original"), Some("renamed")).unwrap();
        assert!(registry.load("renamed").is_ok());
        assert!(registry.load("original").is_err());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        let err = registry.load("absent").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        registry.save(&sample("doomed"), None).unwrap();
        registry.delete("doomed").unwrap();
        assert!(registry.load("doomed").is_err());
        assert!(matches!(
            registry.delete("doomed").unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        registry.save(&sample("zeta"), None).unwrap();
        registry.save(&sample("alpha"), None).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = registry.load_all().unwrap();
        let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ViewDefinitionRegistry::open(dir.path()).unwrap();

        assert!(registry.load("../evil").is_err());
        assert!(registry.load("").is_err());
        assert!(registry.save(&sample("ok"), Some("a/b")).is_err());
    }
}
