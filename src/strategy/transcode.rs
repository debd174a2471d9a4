//! Server-side transcode: the server reads the DICOM object, renders the
//! first slice to PNG and returns it base64-encoded inside a JSON envelope.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::StrategyError;

/// Endpoint path under the configured server base URL
pub const SLICES_ENDPOINT: &str = "/api/dicom/slices";

/// Envelope returned by the slice extraction endpoint
#[derive(Debug, Deserialize)]
pub struct TranscodeResponse {
    /// Whether extraction worked
    pub success: bool,
    /// DICOM header fields
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Extracted slices
    #[serde(default)]
    pub slices: Vec<TranscodedSlice>,
    /// Machine-oriented error
    #[serde(default)]
    pub error: Option<String>,
    /// Human-oriented explanation
    #[serde(default)]
    pub message: Option<String>,
}

/// One rendered slice
#[derive(Debug, Deserialize)]
pub struct TranscodedSlice {
    /// Index of the slice within the source object
    pub slice_number: u32,
    /// Base64 image bytes
    pub image_data: String,
    /// Image format name (e.g. `PNG`)
    #[serde(default)]
    pub format: Option<String>,
}

/// Build the request URL for `source_url`.
pub fn slices_url(base: &str, source_url: &str) -> String {
    format!(
        "{}{SLICES_ENDPOINT}?url={}&format=PNG&max_slices=1",
        base.trim_end_matches('/'),
        urlencoding::encode(source_url)
    )
}

impl TranscodeResponse {
    /// Parse the JSON envelope
    pub fn parse(body: &[u8]) -> Result<Self, StrategyError> {
        serde_json::from_slice(body).map_err(|e| StrategyError::Decode {
            message: format!("invalid transcode response: {e}"),
        })
    }

    /// Decoded bytes of the first slice.
    ///
    /// A `success: false` envelope means the server could fetch but not
    /// render the object, which is a decode failure rather than a network one.
    pub fn first_slice(&self) -> Result<Vec<u8>, StrategyError> {
        if !self.success {
            let reason = self
                .error
                .as_deref()
                .or(self.message.as_deref())
                .unwrap_or("server could not process the object");
            return Err(StrategyError::Decode {
                message: reason.to_string(),
            });
        }

        let slice = self
            .slices
            .iter()
            .min_by_key(|s| s.slice_number)
            .ok_or_else(|| StrategyError::Decode {
                message: "object has no pixel data".to_string(),
            })?;

        STANDARD
            .decode(slice.image_data.as_bytes())
            .map_err(|e| StrategyError::Decode {
                message: format!("invalid slice encoding: {e}"),
            })
    }

    /// Header fields flattened to strings, without patient identifiers
    pub fn header_fields(&self) -> BTreeMap<String, String> {
        self.metadata
            .iter()
            .filter(|(key, _)| !key.starts_with("patient_"))
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Slice count reported by the server
    pub fn total_slices(&self) -> Option<u32> {
        self.metadata
            .get("total_slices")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }
}
