//! Upstream redirect resolution.
//!
//! The relay resolves at most one redirect hop itself. A redirect into a
//! direct-download host goes back to the client with an absolute
//! `Location`; anything else is followed server side, but only when the
//! new origin passes the same gate as the original target.

use std::future::Future;

use axum::http::{HeaderValue, StatusCode};
use url::Url;

use crate::routing::{canonical_origin, OriginKey};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Not a 3xx, or no `Location`.
    NotRedirect,
    /// Hand the absolute `location` to the client unchanged.
    DirectPassthrough { location: Url },
    /// Re-issue the request to `target` and relay that response.
    Follow { target: Url, origin: OriginKey },
    /// The redirect leaves the allow-list.
    Denied { origin: OriginKey },
    /// `Location` could not be resolved to an http(s) URL; relay the
    /// upstream response as it is.
    RawForward,
}

impl RedirectOutcome {
    /// Label for the redirect counter.
    pub fn label(&self) -> &'static str {
        match self {
            RedirectOutcome::NotRedirect => "none",
            RedirectOutcome::DirectPassthrough { .. } => "direct",
            RedirectOutcome::Follow { .. } => "follow",
            RedirectOutcome::Denied { .. } => "denied",
            RedirectOutcome::RawForward => "raw",
        }
    }
}

/// True when `host` ends with any of `domains`, compared case-insensitively.
pub fn matches_direct_domain(host: &str, domains: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| !d.is_empty() && host.ends_with(&d))
}

/// Decide what to do with an upstream response to a request for `current`.
///
/// `permit` is only consulted for a redirect that is neither direct nor
/// malformed, so a store failure there surfaces as an error instead of a
/// decision.
pub async fn resolve_redirect<F, Fut>(
    current: &Url,
    status: StatusCode,
    location: Option<&HeaderValue>,
    direct_domains: &[String],
    permit: F,
) -> Result<RedirectOutcome, StoreError>
where
    F: FnOnce(OriginKey) -> Fut,
    Fut: Future<Output = Result<bool, StoreError>>,
{
    if !status.is_redirection() {
        return Ok(RedirectOutcome::NotRedirect);
    }
    let Some(location) = location else {
        return Ok(RedirectOutcome::NotRedirect);
    };

    let Some(resolved) = location
        .to_str()
        .ok()
        .and_then(|loc| current.join(loc.trim()).ok())
    else {
        return Ok(RedirectOutcome::RawForward);
    };
    if !matches!(resolved.scheme(), "http" | "https") {
        return Ok(RedirectOutcome::RawForward);
    }
    let Some(host) = resolved.host_str().filter(|h| !h.is_empty()) else {
        return Ok(RedirectOutcome::RawForward);
    };

    if matches_direct_domain(host, direct_domains) {
        return Ok(RedirectOutcome::DirectPassthrough { location: resolved });
    }

    let origin = canonical_origin(&resolved);
    if permit(origin.clone()).await? {
        Ok(RedirectOutcome::Follow {
            target: resolved,
            origin,
        })
    } else {
        Ok(RedirectOutcome::Denied { origin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> Url {
        Url::parse("https://media.example:8096/Videos/1/stream").unwrap()
    }

    fn domains() -> Vec<String> {
        vec!["115.com".to_string(), "aliyundrive.net".to_string()]
    }

    async fn resolve(
        status: u16,
        location: Option<&'static str>,
        allowed: bool,
    ) -> RedirectOutcome {
        let header = location.map(HeaderValue::from_static);
        resolve_redirect(
            &current(),
            StatusCode::from_u16(status).unwrap(),
            header.as_ref(),
            &domains(),
            |_| async move { Ok::<_, StoreError>(allowed) },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_non_redirects() {
        assert_eq!(resolve(200, Some("https://x.example/"), true).await, RedirectOutcome::NotRedirect);
        assert_eq!(resolve(302, None, true).await, RedirectOutcome::NotRedirect);
        assert_eq!(resolve(404, None, true).await, RedirectOutcome::NotRedirect);
    }

    #[tokio::test]
    async fn test_direct_domain_passes_through() {
        match resolve(302, Some("https://cdn.115.com/file?t=1"), false).await {
            RedirectOutcome::DirectPassthrough { location } => {
                assert_eq!(location.as_str(), "https://cdn.115.com/file?t=1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_direct_domain_match_ignores_case() {
        assert!(matches!(
            resolve(302, Some("https://CDN.115.COM/f"), false).await,
            RedirectOutcome::DirectPassthrough { .. }
        ));
    }

    #[tokio::test]
    async fn test_relative_location_resolves_against_current() {
        match resolve(301, Some("/Videos/2/stream"), true).await {
            RedirectOutcome::Follow { target, origin } => {
                assert_eq!(target.as_str(), "https://media.example:8096/Videos/2/stream");
                assert_eq!(origin.as_str(), "https://media.example:8096");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_denied_redirect() {
        match resolve(302, Some("https://evil.example/x"), false).await {
            RedirectOutcome::Denied { origin } => assert_eq!(origin.as_str(), "https://evil.example"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unusable_location_is_raw_forward() {
        assert_eq!(resolve(302, Some("ftp://files.example/a"), true).await, RedirectOutcome::RawForward);
        assert_eq!(resolve(302, Some("http://"), true).await, RedirectOutcome::RawForward);

        let bad = HeaderValue::from_bytes(b"https://\xffbad").unwrap();
        let outcome = resolve_redirect(
            &current(),
            StatusCode::FOUND,
            Some(&bad),
            &domains(),
            |_| async { Ok::<_, StoreError>(true) },
        )
        .await
        .unwrap();
        assert_eq!(outcome, RedirectOutcome::RawForward);
    }

    #[tokio::test]
    async fn test_gate_is_not_consulted_for_direct_domains() {
        let header = HeaderValue::from_static("https://cdn.115.com/f");
        let outcome = resolve_redirect(&current(), StatusCode::FOUND, Some(&header), &domains(), |_| async {
            Err::<bool, _>(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(matches!(outcome, Ok(RedirectOutcome::DirectPassthrough { .. })));
    }

    #[tokio::test]
    async fn test_gate_failure_propagates() {
        let header = HeaderValue::from_static("https://other.example/f");
        let outcome = resolve_redirect(&current(), StatusCode::FOUND, Some(&header), &domains(), |_| async {
            Err::<bool, _>(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(outcome.is_err());
    }
}
