use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// repository configuration stored in config.toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// content store location
    #[serde(default)]
    pub store: StoreConfig,
    /// label registry location
    #[serde(default)]
    pub labels: LabelsConfig,
    /// commit defaults
    #[serde(default)]
    pub commit: CommitConfig,
}

/// where asset bytes live; may be shared between repositories
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// relative paths resolve against the repository root
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelsConfig {
    pub file: PathBuf,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("labels.yaml"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    pub author: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            author: "dvs".to_string(),
        }
    }
}

impl Config {
    /// config with the content store at an explicit location
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig { path: path.into() },
            ..Default::default()
        }
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// content store root, resolved against the repository root
    pub fn store_path(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.store.path)
    }

    /// label file, resolved against the repository root
    pub fn labels_path(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.labels.file)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = Config::with_store("/srv/media");
        config.commit.author = "annotator".to_string();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.path, PathBuf::from("assets"));
        assert_eq!(config.labels.file, PathBuf::from("labels.yaml"));
        assert_eq!(config.commit.author, "dvs");
    }

    #[test]
    fn test_path_resolution() {
        let root = Path::new("/repos/u1/r1");
        let config = Config::default();
        assert_eq!(config.store_path(root), PathBuf::from("/repos/u1/r1/assets"));

        let shared = Config::with_store("/shared/assets");
        assert_eq!(shared.store_path(root), PathBuf::from("/shared/assets"));
        assert_eq!(
            shared.labels_path(root),
            PathBuf::from("/repos/u1/r1/labels.yaml")
        );
    }
}
