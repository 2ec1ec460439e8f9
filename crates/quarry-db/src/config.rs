//! Database connection configuration.
//!
//! [`DatabaseConfig`] carries the parameters an application needs to build
//! its execution adapter, plus the backend selection the engine needs to
//! pick a [`Dialect`]. It deserializes from TOML so deployments can keep
//! connection settings in configuration files.

use crate::dialect::{Dialect, DialectName};
use quarry_core::{QuarryError, QuarryResult};
use std::collections::HashMap;

/// Configuration for connecting to a database.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseConfig {
    /// The backend to target.
    pub backend: DialectName,
    /// The database name or file path.
    pub name: String,
    /// Host for network backends.
    #[serde(default)]
    pub host: Option<String>,
    /// Port for network backends.
    #[serde(default)]
    pub port: Option<u16>,
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Free-form driver options.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> QuarryResult<Self> {
        toml::from_str(text)
            .map_err(|e| QuarryError::Configuration(format!("invalid database config: {e}")))
    }

    /// Creates a configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self {
            backend: DialectName::Sqlite,
            name: ":memory:".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            name: path.into(),
            ..Self::sqlite_memory()
        }
    }

    /// Creates a configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: DialectName::Postgres,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a MySQL database.
    pub fn mysql(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: DialectName::Mysql,
            ..Self::postgres(name, host, port, user, password)
        }
    }

    /// Builds the dialect for the configured backend.
    pub fn dialect(&self) -> Dialect {
        match self.backend {
            DialectName::Postgres => Dialect::postgres(),
            DialectName::Sqlite => Dialect::sqlite(),
            DialectName::Mysql => Dialect::mysql(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let config = DatabaseConfig::from_toml(
            r#"
            backend = "postgres"
            name = "app"
            host = "localhost"
            port = 5432
            user = "app"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, DialectName::Postgres);
        assert_eq!(config.name, "app");
        assert_eq!(config.port, Some(5432));
    }

    #[test]
    fn test_from_toml_defaults() {
        let config = DatabaseConfig::from_toml(
            r#"
            backend = "sqlite"
            name = ":memory:"
            "#,
        )
        .unwrap();
        assert!(config.host.is_none());
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_from_toml_invalid_backend() {
        let err = DatabaseConfig::from_toml(
            r#"
            backend = "oracle"
            name = "x"
            "#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_constructors() {
        let config = DatabaseConfig::sqlite_memory();
        assert_eq!(config.name, ":memory:");

        let config = DatabaseConfig::postgres("app", "db.internal", 5432, "svc", "pw");
        assert_eq!(config.host.as_deref(), Some("db.internal"));

        let config = DatabaseConfig::mysql("app", "db.internal", 3306, "svc", "pw");
        assert_eq!(config.backend, DialectName::Mysql);
    }

    #[test]
    fn test_dialect_selection() {
        use crate::dialect::Feature;
        let config = DatabaseConfig::sqlite_memory();
        assert!(!config.dialect().has_feature(Feature::SELECT_EXISTS));
        let config = DatabaseConfig::postgres("a", "h", 5432, "u", "p");
        assert!(config.dialect().has_feature(Feature::SELECT_EXISTS));
    }
}
