//! Target URL resolution.
//!
//! The inbound route captures everything after the mount point. That capture
//! is either an absolute URL (`https://example.com/a?x=1`) or a path that a
//! previously proxied page linked to relatively (`images/pic.png`). Relative
//! captures are resolved against the absolute URL embedded in the referer,
//! which is expected to look like `<proxy-origin>/<absolute-original-url>`.

use super::error::ResolveError;
use std::borrow::Cow;
use url::Url;

/// How the target URL was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The capture was already an absolute URL.
    Absolute,
    /// The capture was relative and scheme/host came from the referer.
    RefererRelative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: Url,
    pub kind: TargetKind,
}

/// Percent-decode `raw`, falling back to the raw value when it does not decode
/// to valid UTF-8.
fn decode_or_raw(raw: &str) -> Cow<'_, str> {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Resolve the upstream target from a wildcard capture and the inbound
/// `Referer` header.
pub fn resolve_target_url(
    capture: &str,
    referer: Option<&str>,
) -> Result<ResolvedTarget, ResolveError> {
    let request_url = decode_or_raw(capture);

    match Url::parse(&request_url) {
        Ok(url) if !url.scheme().is_empty() => {
            return Ok(ResolvedTarget {
                url,
                kind: TargetKind::Absolute,
            });
        }
        Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => {}
        Err(e) => {
            return Err(ResolveError::InvalidCapture {
                input: request_url.into_owned(),
                reason: e.to_string(),
            });
        }
    }

    let referer = referer.unwrap_or_default();
    let referer_url = Url::parse(referer).map_err(|e| ResolveError::InvalidReferer {
        input: request_url.to_string(),
        reason: e.to_string(),
    })?;
    if referer_url.host_str().map_or(true, str::is_empty) {
        return Err(ResolveError::InvalidReferer {
            input: request_url.into_owned(),
            reason: format!("referer '{referer}' has no host"),
        });
    }

    // The referer path carries the absolute URL of the page that linked here.
    let referer_path = decode_or_raw(referer_url.path());
    let embedded = referer_path
        .strip_prefix('/')
        .unwrap_or(referer_path.as_ref());
    let real_url = match Url::parse(embedded) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Err(ResolveError::Unresolvable {
                input: request_url.into_owned(),
            });
        }
        Err(e) => {
            return Err(ResolveError::InvalidEmbeddedUrl {
                referer_path: referer_path.into_owned(),
                reason: e.to_string(),
            });
        }
    };

    let host = match real_url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => {
            return Err(ResolveError::Unresolvable {
                input: request_url.into_owned(),
            })
        }
    };
    let authority = match real_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let (path, query) = match request_url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request_url.as_ref(), None),
    };
    // Fragments never reach the server, drop anything that slipped through.
    let path = path.split('#').next().unwrap_or_default();
    let query = query.map(|q| q.split('#').next().unwrap_or_default());

    let mut url = Url::parse(&format!("{}://{}", real_url.scheme(), authority)).map_err(|e| {
        ResolveError::InvalidEmbeddedUrl {
            referer_path: referer_path.to_string(),
            reason: e.to_string(),
        }
    })?;
    if path.starts_with('/') {
        url.set_path(path);
    } else {
        url.set_path(&format!("/{path}"));
    }
    url.set_query(query.filter(|q| !q.is_empty()));

    Ok(ResolvedTarget {
        url,
        kind: TargetKind::RefererRelative,
    })
}
