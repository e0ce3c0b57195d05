//! Origin canonicalization.
//!
//! Two URLs that reach the same origin must produce the same key, whatever
//! the input spelling: host case, an explicit default port, or a missing
//! scheme on admin input all fold away.

use serde::Serialize;
use url::Url;

/// A canonical `scheme://host[:port]` string; the unit of access control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OriginKey(String);

impl OriginKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for OriginKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OriginKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Reduce a parsed URL to its canonical origin key.
pub fn canonical_origin(url: &Url) -> OriginKey {
    let scheme = url.scheme().to_ascii_lowercase();

    let mut host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host.contains(':') && !host.starts_with('[') {
        host = format!("[{host}]");
    }

    let port = match url.port() {
        Some(p) if Some(p) != default_port(&scheme) => format!(":{p}"),
        _ => String::new(),
    };

    OriginKey(format!("{scheme}://{host}{port}"))
}

/// Canonicalize free-form admin input such as `Example.com:443` or
/// `http://10.0.0.2:8096/web`. Inputs without a scheme are taken as https.
pub fn normalize_origin(input: &str) -> Option<OriginKey> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).ok()?;
    url.host_str().filter(|h| !h.is_empty())?;
    Some(canonical_origin(&url))
}
