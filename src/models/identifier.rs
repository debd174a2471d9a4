//! Opaque image identifiers

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::Scheme;

/// Rejected identifier input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid image identifier {input:?}: {reason}")]
pub struct InvalidIdentifier {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: &'static str,
}

/// Key for one retrievable image: a scheme tag plus a normalized URL.
///
/// Equal resources produce byte-identical identifiers, so this is the only key
/// used by the cache, the circuit breaker and the in-flight map. Cloning is
/// cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageIdentifier {
    key: Arc<str>,
    scheme: Scheme,
}

impl ImageIdentifier {
    /// Parse `"<tag>:<url>"` or a bare `http(s)` URL (tagged as [`Scheme::Web`]).
    pub fn parse(input: &str) -> Result<Self, InvalidIdentifier> {
        let invalid = |reason| InvalidIdentifier {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }

        let (scheme, url) = match trimmed.split_once(':') {
            Some((prefix, rest)) if !rest.starts_with("//") => {
                let scheme = Scheme::from_tag(prefix).ok_or_else(|| invalid("unknown scheme tag"))?;
                (scheme, rest)
            }
            _ => (Scheme::Web, trimmed),
        };

        let url = normalize_url(url).ok_or_else(|| invalid("not an http(s) URL"))?;
        Ok(Self::from_parts(scheme, &url))
    }

    /// Build from an already-normalized URL.
    pub fn from_parts(scheme: Scheme, url: &str) -> Self {
        Self {
            key: format!("{}:{}", scheme.tag(), url).into(),
            scheme,
        }
    }

    /// Full identifier string
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Scheme tag
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// URL without the scheme tag
    pub fn url(&self) -> &str {
        &self.key[self.scheme.tag().len() + 1..]
    }
}

/// Lowercase protocol and host, drop the fragment and any trailing slash.
fn normalize_url(raw: &str) -> Option<String> {
    let (proto, rest) = raw.trim().split_once("://")?;
    let proto = proto.to_ascii_lowercase();
    if proto != "http" && proto != "https" {
        return None;
    }

    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    if authority.is_empty() {
        return None;
    }

    let tail = if tail.contains('?') {
        tail
    } else {
        tail.trim_end_matches('/')
    };

    Some(format!("{proto}://{}{tail}", authority.to_ascii_lowercase()))
}

impl std::fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl std::str::FromStr for ImageIdentifier {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for ImageIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
