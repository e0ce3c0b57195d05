//! Ingress path → upstream URL.
//!
//! Ingress paths look like `/{user}/https:/example.com:8096/Items`. Path
//! normalization collapses the `//` after the scheme, and some clients drop
//! the colon as well, so both shapes are repaired before parsing.

use url::Url;

use crate::error::ProxyError;

/// Split an ingress path into the user segment and the remaining target path.
///
/// Returns `None` unless there are at least two non-empty segments.
pub fn split_ingress(path: &str) -> Option<(String, String)> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let user = segments.next()?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return None;
    }
    Some((user.to_string(), format!("/{}", rest.join("/"))))
}

/// Repair `http:/host` and `http/host` (and the https forms) into
/// `http://host`. Anything else is returned unchanged.
fn repair_scheme_prefix(p: &str) -> String {
    for scheme in ["https", "http"] {
        let Some(after) = p.strip_prefix(scheme) else {
            continue;
        };
        let after_sep = after.strip_prefix(":/").or_else(|| after.strip_prefix('/'));
        if let Some(host_part) = after_sep {
            if !host_part.starts_with('/') {
                return format!("{scheme}://{host_part}");
            }
        }
    }
    p.to_string()
}

/// Build the upstream URL for a target path and the original query string.
///
/// Any query embedded in the path is replaced by `query`.
pub fn parse_upstream_url(rest_path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
    let stripped = rest_path.strip_prefix('/').unwrap_or(rest_path);
    let mut candidate = repair_scheme_prefix(stripped);
    if !candidate.starts_with("http://") && !candidate.starts_with("https://") {
        candidate = format!("https://{candidate}");
    }

    let mut url =
        Url::parse(&candidate).map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::InvalidTarget("missing host".to_string()));
    }

    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}
