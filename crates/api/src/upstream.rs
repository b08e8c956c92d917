//! HTTP clients for the realtime provider.
//!
//! [`HttpPresenceOracle`] answers ground-truth presence queries and
//! [`HttpTransport`] delivers messages, both against `UPSTREAM_URL` using
//! [`reqwest`]. Timeouts are applied by the engine, not here.

use std::collections::HashSet;

use async_trait::async_trait;
use herald_core::decision::OutboundMessage;
use herald_core::types::Timetoken;
use herald_engine::{MessageTransport, PresenceOracle, TransportError, UpstreamError};
use serde::Deserialize;

/// Join `segments` onto `base_url`, percent-encoding each one.
///
/// Channel and recipient ids are opaque, so a `/`, `?` or `#` inside one
/// must stay inside its own path segment.
fn endpoint(base_url: &str, segments: &[&str]) -> Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(base_url).map_err(|e| format!("invalid upstream URL: {e}"))?;
    url.path_segments_mut()
        .map_err(|()| format!("upstream URL cannot take a path: {base_url}"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Response of `GET /v1/presence/{channel}`.
#[derive(Debug, Deserialize)]
struct HereNowResponse {
    occupants: Vec<String>,
}

/// Response of `POST /v1/publish/{channel}/{recipient}`.
#[derive(Debug, Deserialize)]
struct PublishResponse {
    timetoken: Timetoken,
}

// ---------------------------------------------------------------------------
// HttpPresenceOracle
// ---------------------------------------------------------------------------

pub struct HttpPresenceOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPresenceOracle {
    /// Create an oracle reusing an existing [`reqwest::Client`]
    /// (connection pooling is shared with the transport).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PresenceOracle for HttpPresenceOracle {
    async fn here_now(&self, channel: &str) -> Result<HashSet<String>, UpstreamError> {
        let url = endpoint(&self.base_url, &["v1", "presence", channel])
            .map_err(UpstreamError::Request)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body: HereNowResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(body.occupants.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        message: &OutboundMessage,
    ) -> Result<Timetoken, TransportError> {
        let url = endpoint(&self.base_url, &["v1", "publish", channel, recipient])
            .map_err(TransportError::Unreachable)?;
        let response = self
            .client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Rejected(format!("{}: {body}", status.as_u16())));
        }

        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Rejected(format!("malformed publish response: {e}")))?;
        Ok(body.timetoken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_each_segment() {
        let url = endpoint("http://upstream.test", &["v1", "presence", "chat/room?x=1#frag"]).unwrap();
        assert_eq!(url.path(), "/v1/presence/chat%2Froom%3Fx=1%23frag");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let url = endpoint("http://upstream.test/realtime/", &["v1", "presence", "lobby"]).unwrap();
        assert_eq!(url.as_str(), "http://upstream.test/realtime/v1/presence/lobby");
    }

    #[test]
    fn endpoint_rejects_unusable_base() {
        assert!(endpoint("not a url", &["v1"]).is_err());
        assert!(endpoint("mailto:ops@upstream.test", &["v1"]).is_err());
    }
}
