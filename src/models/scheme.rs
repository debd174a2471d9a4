//! Identifier scheme tags

use serde::{Deserialize, Serialize};

/// How an image identifier's URL should be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// WADO-URI: a single DICOM instance behind a query-string URL
    #[default]
    Wadouri,
    /// WADO-RS: a DICOMweb instance or frame resource
    Dicomweb,
    /// Plain web image (PNG, JPEG, ...)
    Web,
}

impl Scheme {
    /// Get all supported schemes
    pub const fn all() -> &'static [Self] {
        &[Self::Wadouri, Self::Dicomweb, Self::Web]
    }

    /// Tag used as the identifier prefix
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Wadouri => "wadouri",
            Self::Dicomweb => "dicomweb",
            Self::Web => "web",
        }
    }

    /// Whether the resource behind this scheme is a DICOM object
    pub const fn is_dicom(&self) -> bool {
        matches!(self, Self::Wadouri | Self::Dicomweb)
    }

    /// Parse from a tag
    pub fn from_tag(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wadouri" | "dicom" => Some(Self::Wadouri),
            "dicomweb" | "wadors" => Some(Self::Dicomweb),
            "web" | "image" => Some(Self::Web),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}
