use std::env::VarError;

use sqlx::postgres::PgConnectOptions;

use crate::{error::ConfigError, secret::SecretDocument};

pub const DEFAULT_SECRET_ENV: &str = "BACKENDMONOCLUSTER_SECRET";

/// Resolved connection parameters for the target database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl ConnectionConfig {
    /// Local development database (docker compose service `db`).
    pub fn local() -> Self {
        Self {
            host: "db".to_string(),
            port: 54323,
            database: "civil".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }

    /// Connection URL without the password, safe to log.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Non-secret connection parameters, completed by a password from a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTemplate {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
}

impl ConnectionTemplate {
    pub fn with_password(&self, password: String) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password,
        }
    }
}

impl Default for ConnectionTemplate {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "civil_main".to_string(),
            username: "postgres".to_string(),
        }
    }
}

/// Where connection parameters come from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Fixed parameters, returned as-is.
    Literal(ConnectionConfig),

    /// Password taken from the JSON document in environment variable `env_var`.
    Secret {
        env_var: String,
        template: ConnectionTemplate,
    },
}

impl ConfigSource {
    pub fn secret(env_var: impl Into<String>, template: ConnectionTemplate) -> Self {
        Self::Secret {
            env_var: env_var.into(),
            template,
        }
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<ConnectionConfig, ConfigError> {
        self.resolve_with(|name| std::env::var(name))
    }

    /// Resolve using `lookup` in place of `std::env::var`.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ConnectionConfig, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        match self {
            ConfigSource::Literal(cfg) => Ok(cfg.clone()),
            ConfigSource::Secret { env_var, template } => {
                let raw = match lookup(env_var.as_str()) {
                    Ok(raw) => raw,
                    Err(VarError::NotPresent) => {
                        return Err(ConfigError::MissingEnvironmentVariable {
                            name: env_var.clone(),
                        })
                    }
                    Err(VarError::NotUnicode(_)) => {
                        return Err(ConfigError::MalformedSecret {
                            name: env_var.clone(),
                            reason: "value is not valid unicode".to_string(),
                        })
                    }
                };

                let password = SecretDocument::parse(env_var, &raw)?.into_password();
                Ok(template.with_password(password))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn env_with(value: &'static str) -> impl Fn(&str) -> Result<String, VarError> {
        move |name: &str| {
            if name == "APP_SECRET" {
                Ok(value.to_string())
            } else {
                Err(VarError::NotPresent)
            }
        }
    }

    fn secret_source() -> ConfigSource {
        ConfigSource::secret("APP_SECRET", ConnectionTemplate::default())
    }

    #[test]
    fn literal_resolution_is_stable() {
        let source = ConfigSource::Literal(ConnectionConfig::local());
        let first = source.resolve().unwrap();
        let second = source.resolve().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, ConnectionConfig::local());
    }

    #[test]
    fn secret_password_is_combined_with_template() {
        let cfg = secret_source()
            .resolve_with(env_with(r#"{"password":"secretpw"}"#))
            .unwrap();
        assert_eq!(cfg.password, "secretpw");
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 5432);
        assert_eq!(cfg.database, "civil_main");
        assert_eq!(cfg.username, "postgres");
    }

    #[test]
    fn password_round_trips_for_varied_values() {
        for password in ["", "p", "with space", "ünïcødé", "{\"nested\":1}", "'; DROP TABLE x; --"] {
            let doc = serde_json::json!({ "password": password, "other": true }).to_string();
            let cfg = secret_source()
                .resolve_with(|_| Ok(doc.clone()))
                .unwrap();
            assert_eq!(cfg.password, password);
        }
    }

    #[test]
    fn unset_variable_fails_before_parsing() {
        let err = secret_source()
            .resolve_with(|_| Err(VarError::NotPresent))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvironmentVariable { ref name } if name == "APP_SECRET"
        ));
    }

    #[test]
    fn non_unicode_variable_is_malformed() {
        let err = secret_source()
            .resolve_with(|_| Err(VarError::NotUnicode(OsString::from("x"))))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedSecret { .. }));
    }

    #[test]
    fn not_json_is_malformed() {
        let err = secret_source()
            .resolve_with(env_with("not json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedSecret { .. }));
    }

    #[test]
    fn missing_password_is_missing_field() {
        let err = secret_source()
            .resolve_with(env_with(r#"{"user":"postgres"}"#))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "password", .. }));
    }

    #[test]
    fn debug_and_url_never_show_password() {
        let mut cfg = ConnectionConfig::local();
        cfg.password = "hunter2".to_string();
        assert!(!format!("{cfg:?}").contains("hunter2"));
        assert_eq!(cfg.redacted_url(), "postgres://postgres@db:54323/civil");
    }
}
