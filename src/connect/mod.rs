//! Connection managers for external services.
//!
//! A [`ConnectionManager`] owns one [`ConnectionSettings`] value and a vendor specific
//! [`ClientFactory`]. The client is built on first use and cached; callers only see the
//! [`ManagedConnection`] capability, never the vendor's configuration types.

#[cfg(feature = "aws")]
pub mod aws;
pub mod secrets;
pub mod sheets;

use crate::config::connection::{AuthPath, ConnectionSettings};
use crate::connect::secrets::ResolvedSecrets;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Credentials handed to a factory at connect time.
#[derive(Debug, Clone)]
pub enum Credentials {
    Profile(String),
    Static(ResolvedSecrets),
    Ambient,
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: Send + Sync;

    fn service_name(&self) -> &str;

    async fn build(
        &self,
        settings: &ConnectionSettings,
        credentials: Credentials,
    ) -> Result<Self::Client>;
}

#[async_trait]
pub trait ManagedConnection: Send + Sync {
    type Client: Send + Sync;

    async fn get_client(&self) -> Result<Arc<Self::Client>>;

    /// Drops the cached client. The next `get_client` reconnects.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

pub struct ConnectionManager<F: ClientFactory> {
    settings: ConnectionSettings,
    factory: F,
    client: OnceCell<Arc<F::Client>>,
}

impl<F: ClientFactory> ConnectionManager<F> {
    /// 建立時先檢查必要的秘密變數，缺少時立即失敗
    pub fn new(settings: ConnectionSettings, factory: F) -> Result<Self> {
        if let AuthPath::Secrets(resolver) = settings.auth() {
            resolver.check_present()?;
        }

        tracing::debug!(
            "Connection manager for {} using {} auth",
            factory.service_name(),
            settings.auth().describe()
        );

        Ok(Self {
            settings,
            factory,
            client: OnceCell::new(),
        })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn credentials(&self) -> Result<Credentials> {
        match self.settings.auth() {
            AuthPath::Profile(profile) => Ok(Credentials::Profile(profile.clone())),
            AuthPath::Secrets(resolver) => Ok(Credentials::Static(resolver.resolve()?)),
            AuthPath::Ambient => Ok(Credentials::Ambient),
        }
    }

    async fn connect(&self) -> Result<Arc<F::Client>> {
        let service = self.factory.service_name().to_string();
        tracing::info!("Connecting to {}", service);

        let credentials = self.credentials()?;
        let client = self.factory.build(&self.settings, credentials).await?;

        tracing::info!("✅ Connected to {}", service);
        Ok(Arc::new(client))
    }
}

#[async_trait]
impl<F: ClientFactory> ManagedConnection for ConnectionManager<F> {
    type Client = F::Client;

    async fn get_client(&self) -> Result<Arc<F::Client>> {
        let client = self.client.get_or_try_init(|| self.connect()).await?;
        Ok(Arc::clone(client))
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::info!("Closed connection to {}", self.factory.service_name());
        }
    }

    fn is_connected(&self) -> bool {
        self.client.initialized()
    }
}
