use crate::auth::DEFAULT_STATE_KEY;
use crate::state::{MemoryState, SqliteState, StateStore};
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where authentication state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Process-local; nothing survives a restart. For tests and embedding
    /// only, the CLI refuses it.
    Memory,
    /// SQLite database at `db_path`.
    #[default]
    Sqlite,
}

/// Authentication state configuration (`authstate.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AuthConfig {
    /// State key the auth document is stored under.
    pub state_key: String,
    /// Persistence backend.
    pub backend: StateBackend,
    /// SQLite database path. Defaults to the platform data directory.
    pub db_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            state_key: DEFAULT_STATE_KEY.to_string(),
            backend: StateBackend::default(),
            db_path: None,
        }
    }
}

impl AuthConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.state_key.trim().is_empty() {
            anyhow::bail!("state_key cannot be empty");
        }
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists,
    /// else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Effective SQLite path: configured, or under the platform data dir.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.db_path {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("state.db"))
            .context("Cannot determine data directory; set db_path")
    }

    /// Fail unless the backend keeps state between processes.
    pub fn ensure_persistent(&self) -> Result<()> {
        if self.backend == StateBackend::Memory {
            anyhow::bail!("memory backend does not persist between runs; use sqlite");
        }
        Ok(())
    }

    /// Build the configured state backend.
    pub fn open_state(&self) -> Result<Arc<dyn StateStore>> {
        match self.backend {
            StateBackend::Memory => Ok(Arc::new(MemoryState::new())),
            StateBackend::Sqlite => {
                let path = self.resolved_db_path()?;
                tracing::debug!(path = %path.display(), "Opening auth state database");
                Ok(Arc::new(SqliteState::open(&path)?))
            }
        }
    }

    /// JSON Schema for the config file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(AuthConfig)).unwrap_or_default()
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "authstate")
}

/// `authstate.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("authstate.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AuthConfig::from_toml("").unwrap();
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.state_key, "auth");
        assert_eq!(config.backend, StateBackend::Sqlite);
    }

    #[test]
    fn parses_all_fields() {
        let config = AuthConfig::from_toml(
            r#"
            state_key = "auth-test"
            backend = "memory"
            db_path = "/tmp/auth.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.state_key, "auth-test");
        assert_eq!(config.backend, StateBackend::Memory);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/auth.db")));
    }

    #[test]
    fn rejects_empty_state_key() {
        let err = AuthConfig::from_toml(r#"state_key = " ""#).unwrap_err();
        assert!(err.to_string().contains("state_key"));
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(AuthConfig::from_toml(r#"backend = "redis""#).is_err());
    }

    #[test]
    fn load_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("authstate.toml");
        std::fs::write(&path, "backend = \"memory\"\n").unwrap();

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.backend, StateBackend::Memory);

        let missing = AuthConfig::load(&tmp.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config"));
    }

    #[test]
    fn open_sqlite_state_at_configured_path() {
        let tmp = TempDir::new().unwrap();
        let config = AuthConfig {
            db_path: Some(tmp.path().join("state.db")),
            ..AuthConfig::default()
        };

        let state = config.open_state().unwrap();
        state.set_raw("auth", "{}").unwrap();
        assert!(tmp.path().join("state.db").exists());
    }

    #[test]
    fn only_sqlite_is_persistent() {
        assert!(AuthConfig::default().ensure_persistent().is_ok());

        let memory = AuthConfig::from_toml(r#"backend = "memory""#).unwrap();
        let err = memory.ensure_persistent().unwrap_err();
        assert!(err.to_string().contains("memory backend"));
    }

    #[test]
    fn schema_lists_fields() {
        let schema = AuthConfig::json_schema();
        let properties = &schema["properties"];
        assert!(properties.get("state_key").is_some());
        assert!(properties.get("backend").is_some());
        assert!(properties.get("db_path").is_some());
    }
}
