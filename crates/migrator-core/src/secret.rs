use serde_json::Value;

use crate::error::ConfigError;

pub const PASSWORD_FIELD: &str = "password";

/// JSON secret document handed to the process through an environment variable.
///
/// Only `password` is read; every other field is ignored. Non-object documents are treated as
/// having no `password` field.
pub struct SecretDocument {
    password: String,
}

impl SecretDocument {
    /// Parse the raw value of the environment variable `name`.
    pub fn parse(name: &str, raw: &str) -> Result<Self, ConfigError> {
        let root: Value =
            serde_json::from_str(raw).map_err(|err| ConfigError::MalformedSecret {
                name: name.to_string(),
                reason: err.to_string(),
            })?;

        let Some(password) = root.get(PASSWORD_FIELD) else {
            return Err(ConfigError::MissingField {
                name: name.to_string(),
                field: PASSWORD_FIELD,
            });
        };

        let Some(password) = password.as_str() else {
            return Err(ConfigError::MalformedSecret {
                name: name.to_string(),
                reason: format!("`{PASSWORD_FIELD}` is not a string"),
            });
        };

        Ok(Self {
            password: password.to_string(),
        })
    }

    pub fn into_password(self) -> String {
        self.password
    }
}

impl std::fmt::Debug for SecretDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDocument")
            .field("password", &"<redacted>")
            .finish()
    }
}
