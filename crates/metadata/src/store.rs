use std::path::PathBuf;

use tracing::debug;

use crate::document::ConfigDocument;
use crate::error::ConfigError;

/// Read-only source of the configuration document.
///
/// Fetched once at init; watching the store for changes is the store's own
/// business.
pub trait ConfigStore: Send + Sync {
    fn fetch(&self) -> Result<ConfigDocument, ConfigError>;
}

/// Reads the config document from a JSON file
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn fetch(&self) -> Result<ConfigDocument, ConfigError> {
        debug!(path = %self.path.display(), "Fetching config document");
        let content = std::fs::read_to_string(&self.path)?;
        Ok(ConfigDocument::from_json(&content)?)
    }
}

/// Serves a document held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    document: ConfigDocument,
}

impl StaticConfigStore {
    pub fn new(document: ConfigDocument) -> Self {
        Self { document }
    }
}

impl ConfigStore for StaticConfigStore {
    fn fetch(&self) -> Result<ConfigDocument, ConfigError> {
        Ok(self.document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_store_fetch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"config": {{"pub1": {{}}}}, "interfaces": {{"Publishers": []}}}}"#
        )
        .unwrap();

        let store = FileConfigStore::new(file.path());
        let doc = store.fetch().unwrap();
        assert!(doc.config.contains_key("pub1"));
    }

    #[test]
    fn test_file_store_missing_file() {
        let store = FileConfigStore::new("/nonexistent/msgbus/config.json");
        assert!(matches!(store.fetch(), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_file_store_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{not json").unwrap();

        let store = FileConfigStore::new(file.path());
        assert!(matches!(store.fetch(), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_static_store_returns_document() {
        let mut doc = ConfigDocument::default();
        doc.config.insert("pub1".to_string(), Default::default());

        let store = StaticConfigStore::new(doc.clone());
        assert_eq!(store.fetch().unwrap(), doc);
    }
}
