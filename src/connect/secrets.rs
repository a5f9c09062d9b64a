use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 秘密值的來源，預設為行程環境變數
pub trait KeyValueSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn describe(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentSource;

impl KeyValueSource for EnvironmentSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn describe(&self) -> &'static str {
        "environment"
    }
}

/// Explicit key/value pairs, for notebooks and tests that should not touch the environment.
#[derive(Clone, Default)]
pub struct StaticSource {
    values: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl KeyValueSource for StaticSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn describe(&self) -> &'static str {
        "static"
    }
}

impl fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("StaticSource").field("keys", &keys).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretEntry {
    name: String,
    variable: String,
    required: bool,
}

/// Maps logical credential names to the variables that hold them.
#[derive(Clone)]
pub struct SecretsResolver {
    entries: Vec<SecretEntry>,
    source: Arc<dyn KeyValueSource>,
}

impl SecretsResolver {
    pub fn new() -> Self {
        Self::with_source(Arc::new(EnvironmentSource))
    }

    pub fn with_source(source: Arc<dyn KeyValueSource>) -> Self {
        Self {
            entries: Vec::new(),
            source,
        }
    }

    pub fn require(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.push(name.into(), variable.into(), true);
        self
    }

    pub fn optional(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.push(name.into(), variable.into(), false);
        self
    }

    fn push(&mut self, name: String, variable: String, required: bool) {
        self.entries.retain(|e| e.name != name);
        self.entries.push(SecretEntry {
            name,
            variable,
            required,
        });
    }

    /// AWS 靜態金鑰，`session_token_var` 有值時 session token 為必要
    pub fn aws(
        access_key_id_var: &str,
        secret_access_key_var: &str,
        session_token_var: Option<&str>,
    ) -> Self {
        let resolver = Self::new()
            .require("aws_access_key_id", access_key_id_var)
            .require("aws_secret_access_key", secret_access_key_var);
        match session_token_var {
            Some(var) => resolver.require("aws_session_token", var),
            None => resolver.optional("aws_session_token", "AWS_SESSION_TOKEN"),
        }
    }

    pub fn aws_default() -> Self {
        Self::aws("AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", None)
    }

    pub fn cassandra(username_var: &str, password_var: &str) -> Self {
        Self::new()
            .require("username", username_var)
            .require("password", password_var)
    }

    pub fn cassandra_default() -> Self {
        Self::cassandra("CASSANDRA_USERNAME", "CASSANDRA_PASSWORD")
    }

    pub fn google_sheets(access_token_var: &str) -> Self {
        Self::new().require("access_token", access_token_var)
    }

    pub fn google_sheets_default() -> Self {
        Self::google_sheets("GOOGLE_SHEETS_ACCESS_TOKEN")
    }

    /// Variable names in declaration order, required ones only.
    pub fn required_variables(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.required)
            .map(|e| e.variable.as_str())
            .collect()
    }

    fn lookup(&self, variable: &str) -> Option<String> {
        self.source.get(variable).filter(|v| !v.is_empty())
    }

    /// 只檢查必要變數是否存在，不讀取其值
    pub fn check_present(&self) -> Result<()> {
        for entry in self.entries.iter().filter(|e| e.required) {
            if self.lookup(&entry.variable).is_none() {
                return Err(EtlError::MissingSecretError {
                    variable: entry.variable.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self) -> Result<ResolvedSecrets> {
        let mut values = HashMap::new();
        for entry in &self.entries {
            match self.lookup(&entry.variable) {
                Some(value) => {
                    tracing::debug!(
                        "Resolved secret '{}' from {} variable {}",
                        entry.name,
                        self.source.describe(),
                        entry.variable
                    );
                    values.insert(entry.name.clone(), value);
                }
                None if entry.required => {
                    return Err(EtlError::MissingSecretError {
                        variable: entry.variable.clone(),
                    });
                }
                None => {
                    tracing::debug!("Optional secret '{}' not set", entry.name);
                }
            }
        }
        Ok(ResolvedSecrets { values })
    }
}

impl Default for SecretsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsResolver")
            .field("entries", &self.entries)
            .field("source", &self.source.describe())
            .finish()
    }
}

/// Resolved credential values. Debug output lists names only.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    values: HashMap<String, String>,
}

impl ResolvedSecrets {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("ResolvedSecrets")
            .field("names", &names)
            .finish_non_exhaustive()
    }
}
