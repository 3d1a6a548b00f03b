//! `reqwest`-backed session gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{SessionGateway, SessionType};
use crate::error::GatewayError;
use crate::storage::ApiConfig;

const START_PATH: &str = "session/start";
const END_PATH: &str = "session/end";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionBody {
    session_type: u8,
    topic_id: Option<i64>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionBody {
    id: i64,
    duration_seconds: u64,
}

/// Talks to `POST {base}/session/start` and `PUT {base}/session/end`.
#[derive(Debug, Clone)]
pub struct HttpSessionGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSessionGateway {
    /// Create a gateway for `base_url`. A missing trailing slash is added so
    /// endpoint paths join below the base instead of replacing its last
    /// segment.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self, GatewayError> {
        Self::new(&api.base_url, Duration::from_secs(api.timeout_secs))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.base_url.join(path)?)
    }
}

/// Turn a non-2xx response into `GatewayError::Status`, keeping the body
/// for the error message.
async fn check_status(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

impl SessionGateway for HttpSessionGateway {
    async fn start(
        &self,
        session_type: SessionType,
        topic_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<i64, GatewayError> {
        let url = self.endpoint(START_PATH)?;
        let body = StartSessionBody {
            session_type: session_type.code(),
            topic_id,
            notes,
        };
        tracing::debug!(%url, ?body, "opening remote session");

        let response = self.client.post(url).json(&body).send().await?;
        let response = check_status(response, START_PATH).await?;
        let parsed: StartSessionResponse =
            response.json().await.map_err(|e| GatewayError::Decode {
                endpoint: START_PATH.to_string(),
                message: e.to_string(),
            })?;
        Ok(parsed.session_id)
    }

    async fn end(&self, remote_session_id: i64, duration_seconds: u64) -> Result<(), GatewayError> {
        let url = self.endpoint(END_PATH)?;
        let body = EndSessionBody {
            id: remote_session_id,
            duration_seconds,
        };
        tracing::debug!(%url, ?body, "closing remote session");

        let response = self.client.put(url).json(&body).send().await?;
        check_status(response, END_PATH).await?;
        Ok(())
    }
}
