// REST client for the device collaborator API.
//
// Only the read side is consumed here: `GET /devices` seeds the cache
// before the first socket delta arrives. CRUD lives elsewhere.

use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::DeviceStatus;
use crate::transport::TransportConfig;

/// Response envelope: `{ "success": bool, "data": T }`.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the device REST API.
#[derive(Debug, Clone)]
pub struct DeviceApi {
    http: reqwest::Client,
    base_url: Url,
}

impl DeviceApi {
    /// Build a client that authenticates every request with `token`.
    pub fn new(base_url: Url, token: &SecretString, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_authorized_client(token)?;
        Ok(Self::from_reqwest(base_url, http))
    }

    /// Wrap an existing `reqwest::Client` (used by tests and custom stacks).
    pub fn from_reqwest(base_url: Url, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List every device the server knows about.
    ///
    /// `GET {base}/devices`
    pub async fn list_devices(&self) -> Result<Vec<DeviceStatus>, Error> {
        let url = self.base_url.join("devices")?;
        debug!(%url, "listing devices");
        self.get(url).await
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized {
                status: status.as_u16(),
            });
        }

        let body = response.error_for_status()?.text().await?;
        unwrap_envelope(&body)
    }
}

/// Decode the `{ success, data }` envelope, surfacing `success: false`
/// as [`Error::Api`].
fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    let envelope: ApiEnvelope<T> =
        serde_json::from_str(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })?;

    if !envelope.success {
        return Err(Error::Api {
            message: envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| "request was not successful".into()),
        });
    }

    envelope.data.ok_or_else(|| Error::Deserialization {
        message: "successful response is missing `data`".into(),
        body: body.to_owned(),
    })
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
