use crate::ontology::{Ontology, QualifiedName};
use crate::session::{SessionOptions, DEFAULT_BUSY_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelgraphConfig {
    /// Connection string used when the command line gives none
    pub database: Option<String>,
    /// Ontology document (TOML) that stored classes are checked against
    pub ontology: Option<PathBuf>,
    /// Class of the root entity, e.g. `CITY.CITY_WRAPPER`
    pub root_class: Option<String>,
    pub busy_timeout_ms: Option<u64>,
}

impl RelgraphConfig {
    pub fn session_options(&self) -> anyhow::Result<SessionOptions> {
        let mut options = SessionOptions::default();
        if let Some(root_class) = &self.root_class {
            options.root_class = QualifiedName::parse(root_class)?;
        }
        options.busy_timeout = Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS));
        Ok(options)
    }

    pub fn load_ontology(&self) -> anyhow::Result<Option<Ontology>> {
        let Some(path) = &self.ontology else {
            return Ok(None);
        };
        let ontology = Ontology::from_path(path)
            .map_err(|e| anyhow::anyhow!("cannot load ontology {}: {}", path.display(), e))?;
        Ok(Some(ontology))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("relgraph.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<RelgraphConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: RelgraphConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("relgraph.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_session_options_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relgraph.toml");
        std::fs::write(
            &path,
            "database = \"sqlite:///city.db\"\nroot_class = \"CITY.CITY_WRAPPER\"\nbusy_timeout_ms = 250\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.database.as_deref(), Some("sqlite:///city.db"));
        let options = config.session_options().unwrap();
        assert_eq!(options.root_class.to_string(), "CITY.CITY_WRAPPER");
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_load_ontology() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("city.toml");
        std::fs::write(&path, crate::testing::CITY_ONTOLOGY).unwrap();

        let config = RelgraphConfig {
            ontology: Some(path),
            ..RelgraphConfig::default()
        };
        let onto = config.load_ontology().unwrap().unwrap();
        assert!(onto.class(&crate::testing::qn("CITY.CITIZEN")).is_some());
        assert!(RelgraphConfig::default().load_ontology().unwrap().is_none());

        let missing = RelgraphConfig {
            ontology: Some(dir.path().join("nope.toml")),
            ..RelgraphConfig::default()
        };
        assert!(missing.load_ontology().is_err());
    }

    #[test]
    fn test_defaults() {
        let options = RelgraphConfig::default().session_options().unwrap();
        assert_eq!(options, SessionOptions::default());
    }
}
