use crate::connect::secrets::{EnvironmentSource, KeyValueSource, SecretsResolver};
use crate::utils::error::{EtlError, Result};

/// How a connection authenticates. Exactly one path is in effect.
#[derive(Debug, Clone, Default)]
pub enum AuthPath {
    /// Named profile from the vendor's local credential store.
    Profile(String),
    Secrets(SecretsResolver),
    /// Whatever the vendor client discovers on its own (instance role, default chain).
    #[default]
    Ambient,
}

impl AuthPath {
    pub fn describe(&self) -> &'static str {
        match self {
            AuthPath::Profile(_) => "profile",
            AuthPath::Secrets(_) => "secrets",
            AuthPath::Ambient => "ambient",
        }
    }
}

/// 連線設定：建立後不可變
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    endpoints: Vec<String>,
    port: Option<u16>,
    region: Option<String>,
    auth: AuthPath,
}

impl ConnectionSettings {
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }

    /// 從環境變數建立，例如 prefix = "SHEETS" 時讀取 SHEETS_ENDPOINTS、SHEETS_PORT ...
    pub fn from_env(prefix: &str, secrets: Option<SecretsResolver>) -> Result<Self> {
        Self::from_source(prefix, &EnvironmentSource, secrets)
    }

    pub fn from_source(
        prefix: &str,
        source: &dyn KeyValueSource,
        secrets: Option<SecretsResolver>,
    ) -> Result<Self> {
        let var = |suffix: &str| source.get(&format!("{}_{}", prefix, suffix));
        let mut builder = Self::builder();

        if let Some(endpoints) = var("ENDPOINTS") {
            builder = builder.endpoints(
                endpoints
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from),
            );
        }

        if let Some(port) = var("PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| EtlError::InvalidConfigValueError {
                    field: format!("{}_PORT", prefix),
                    value: port.clone(),
                    reason: e.to_string(),
                })?;
            builder = builder.port(port);
        }

        if let Some(region) = var("REGION") {
            builder = builder.region(region);
        }

        if let Some(profile) = var("PROFILE").filter(|p| !p.trim().is_empty()) {
            builder = builder.profile(profile);
        }

        if let Some(secrets) = secrets {
            builder = builder.secrets(secrets);
        }

        builder.build()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn primary_endpoint(&self) -> Option<&str> {
        self.endpoints.first().map(String::as_str)
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn auth(&self) -> &AuthPath {
        &self.auth
    }
}

#[derive(Debug, Default)]
pub struct ConnectionSettingsBuilder {
    endpoints: Vec<String>,
    port: Option<u16>,
    region: Option<String>,
    profile: Option<String>,
    secrets: Option<SecretsResolver>,
}

impl ConnectionSettingsBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn endpoints<I: IntoIterator<Item = String>>(mut self, endpoints: I) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn secrets(mut self, secrets: SecretsResolver) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn build(self) -> Result<ConnectionSettings> {
        let auth = match (self.profile, self.secrets) {
            (Some(profile), None) => AuthPath::Profile(profile),
            (None, Some(secrets)) => AuthPath::Secrets(secrets),
            (None, None) => AuthPath::Ambient,
            (Some(_), Some(_)) => {
                return Err(EtlError::ConfigError {
                    message: "A connection can use a profile or secrets, not both".to_string(),
                })
            }
        };

        if self.port == Some(0) {
            return Err(EtlError::InvalidConfigValueError {
                field: "port".to_string(),
                value: "0".to_string(),
                reason: "Port must be between 1 and 65535".to_string(),
            });
        }

        Ok(ConnectionSettings {
            endpoints: self.endpoints,
            port: self.port,
            region: self.region,
            auth,
        })
    }
}
