//! HTTP client for the engine's signaling routes
//!
//! - `POST /stream/receiver/{suuid}`: form fields `suuid` and `data`
//!   (base64 SDP offer); the body of the response is the base64 SDP answer.
//! - `GET /stream/codec/{suuid}`: JSON array of `{ "Type": "video" | "audio" }`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamgate_core::Config;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("signaling endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("empty answer")]
    EmptyAnswer,

    #[error("answer is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("answer is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One media kind the engine expects for a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    #[serde(rename = "Type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
struct OfferForm<'a> {
    suuid: &'a str,
    data: String,
}

#[derive(Debug, Clone)]
pub struct SignalingClient {
    base_url: Url,
    http: reqwest::Client,
}

impl SignalingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SignalingError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SignalingError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SignalingError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    pub fn from_config(config: &Config) -> Result<Self, SignalingError> {
        Self::new(
            &config.signaling_base_url(),
            Duration::from_secs(config.client.request_timeout_seconds),
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/stream/{route}/{suuid}` with the stream id percent-encoded
    fn route_url(&self, route: &str, suuid: &str) -> Result<Url, SignalingError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SignalingError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["stream", route, suuid]);
        Ok(url)
    }

    /// Send an SDP offer and return the decoded SDP answer
    ///
    /// Non-2xx statuses, empty bodies and undecodable bodies are all
    /// failures; the caller must not touch the remote description then.
    pub async fn exchange_offer(&self, suuid: &str, offer_sdp: &str) -> Result<String, SignalingError> {
        let url = self.route_url("receiver", suuid)?;
        let form = OfferForm {
            suuid,
            data: STANDARD.encode(offer_sdp),
        };

        debug!(url = %url, offer_len = offer_sdp.len(), "Posting SDP offer");
        let response = self.http.post(url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::Status(status));
        }

        let body = response.text().await?;
        let encoded = body.trim();
        if encoded.is_empty() {
            return Err(SignalingError::EmptyAnswer);
        }

        let answer = String::from_utf8(STANDARD.decode(encoded)?)?;
        if answer.trim().is_empty() {
            return Err(SignalingError::EmptyAnswer);
        }
        Ok(answer)
    }

    /// Media kinds the engine expects for `suuid`
    pub async fn codecs(&self, suuid: &str) -> Result<Vec<CodecInfo>, SignalingError> {
        let url = self.route_url("codec", suuid)?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::Status(status));
        }

        Ok(response.json().await?)
    }
}
