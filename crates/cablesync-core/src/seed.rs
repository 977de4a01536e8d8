// ── Initial device list ──
//
// After every handshake the engine can pull the full device list so the
// cache is warm before the first delta arrives.

use cablesync_api::DeviceApi;
use futures_util::future::BoxFuture;
use secrecy::SecretString;

use crate::config::SeedConfig;
use crate::error::CoreError;
use crate::model::DeviceStatus;

pub type SeedFuture = BoxFuture<'static, Result<Vec<DeviceStatus>, CoreError>>;

/// Something that can list every device the server knows about.
pub trait DeviceSource: Send + Sync + 'static {
    fn fetch(&self, token: &SecretString) -> SeedFuture;
}

/// [`DeviceSource`] backed by `GET {api_url}/devices`.
#[derive(Debug, Clone)]
pub struct RestSeed {
    config: SeedConfig,
}

impl RestSeed {
    pub fn new(config: SeedConfig) -> Self {
        Self { config }
    }
}

impl DeviceSource for RestSeed {
    fn fetch(&self, token: &SecretString) -> SeedFuture {
        let api = DeviceApi::new(self.config.api_url.clone(), token, &self.config.transport);
        Box::pin(async move {
            let devices = api?.list_devices().await?;
            tracing::debug!(count = devices.len(), "fetched device seed");
            Ok(devices)
        })
    }
}
