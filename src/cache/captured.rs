//! The stored snapshot of a response.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::CacheError;
use crate::http::{Headers, ResponseWriter, StatusCode, WriteError};
use crate::store::{CacheStore, Expiration};

/// All values recorded for one header name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValues {
    pub name: String,
    pub values: Vec<String>,
}

/// Status, headers and body of a response, as persisted in the store.
///
/// Encoded as JSON with the body in base64:
///
/// ```json
/// {"status":200,"headers":[{"name":"Content-Type","values":["text/plain"]}],"body":"cG9uZw=="}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    status: StatusCode,
    headers: Vec<HeaderValues>,
    #[serde(with = "base64_body")]
    body: Bytes,
}

impl CapturedResponse {
    /// Snapshots the given response state, grouping headers by name.
    pub fn capture(status: StatusCode, headers: &Headers, body: Bytes) -> Self {
        let headers = headers
            .grouped()
            .into_iter()
            .map(|(name, values)| HeaderValues { name, values })
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[HeaderValues] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Writes this response to `writer`: status, then every header value
    /// (unless `with_headers` is false), then the body.
    pub async fn replay(
        &self,
        writer: &mut dyn ResponseWriter,
        with_headers: bool,
    ) -> Result<(), WriteError> {
        writer.write_header(self.status);
        if with_headers {
            let target = writer.headers_mut();
            for header in &self.headers {
                for value in &header.values {
                    target.insert(header.name.as_str(), value.as_str());
                }
            }
        }
        writer.write(&self.body).await?;
        Ok(())
    }
}

/// Reads and decodes the capture stored at `key`.
pub(crate) async fn load(
    store: &dyn CacheStore,
    key: &str,
) -> Result<CapturedResponse, CacheError> {
    let raw = store.get(key).await?;
    Ok(CapturedResponse::decode(&raw)?)
}

/// Encodes and stores `captured` at `key`.
pub(crate) async fn save(
    store: &dyn CacheStore,
    key: &str,
    captured: &CapturedResponse,
    expires: Expiration,
) -> Result<(), CacheError> {
    let raw = captured.encode()?;
    store.set(key, raw, expires).await?;
    Ok(())
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
