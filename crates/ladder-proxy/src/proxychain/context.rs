use bytes::Bytes;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONNECTION, HOST, PROXY_AUTHORIZATION,
    REFERER, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use hyper::http::request::Parts;
use hyper::{Method, StatusCode, Uri};

/// The inbound request bound to a [`ProxyChain`](super::ProxyChain) for one
/// exchange.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Everything after the mount point, including the query string.
    pub capture: String,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let capture = capture_after_mount(&uri, "/").unwrap_or_default();
        Self {
            method,
            uri,
            headers,
            body,
            capture,
        }
    }

    /// Build a context from an inbound request, capturing the path and query
    /// that follow `mount`. Returns `None` when the request is not under `mount`.
    pub fn from_parts(parts: &Parts, body: Bytes, mount: &str) -> Option<Self> {
        let capture = capture_after_mount(&parts.uri, mount)?;
        Some(Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body,
            capture,
        })
    }

    /// Override the wildcard capture.
    pub fn with_capture(mut self, capture: impl Into<String>) -> Self {
        self.capture = capture.into();
        self
    }

    pub fn referer(&self) -> Option<&str> {
        self.headers.get(REFERER).and_then(|v| v.to_str().ok())
    }
}

/// Extract the wildcard capture that follows `mount` in `uri`.
pub fn capture_after_mount(uri: &Uri, mount: &str) -> Option<String> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    path_and_query
        .strip_prefix(mount)
        .map(|capture| capture.to_string())
}

/// Inbound headers that never reach the upstream. Connection-scoped headers
/// describe the client hop only; `host` and `accept-encoding` are left for
/// the client to fill in.
static DROPPED_REQUEST_HEADERS: [HeaderName; 9] = [
    HOST,
    ACCEPT_ENCODING,
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// The request that will be sent upstream. Built from the bound context when
/// an exchange starts; request modifiers mutate it before dispatch.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Copy method, headers and body from the inbound request.
    ///
    /// `host` is dropped so the client derives it from the target URL, and
    /// `accept-encoding` is dropped so upstream bodies arrive unencoded and
    /// body modifiers can work on them.
    pub fn from_context(ctx: &RequestContext) -> Self {
        let mut headers = HeaderMap::with_capacity(ctx.headers.len());
        for (name, value) in ctx.headers.iter() {
            if DROPPED_REQUEST_HEADERS.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        Self {
            method: ctx.method.clone(),
            headers,
            body: ctx.body.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }
}

/// Status and headers of the upstream response. The body is kept separately
/// on the chain so response modifiers can replace it.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// A fully buffered upstream response as returned by a dispatcher.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_after_root_mount() {
        let uri: Uri = "/https://example.com/a?x=1".parse().unwrap();
        assert_eq!(
            capture_after_mount(&uri, "/").as_deref(),
            Some("https://example.com/a?x=1")
        );
    }

    #[test]
    fn test_capture_after_nested_mount() {
        let uri: Uri = "/proxy/https://example.com/a".parse().unwrap();
        assert_eq!(
            capture_after_mount(&uri, "/proxy/").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(capture_after_mount(&uri, "/other/"), None);
    }

    #[test]
    fn test_referer_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://proxyhost/https://example.com/page"),
        );
        let ctx = RequestContext::new(
            Method::GET,
            "/images/pic.png".parse().unwrap(),
            headers,
            Bytes::new(),
        );
        assert_eq!(ctx.capture, "images/pic.png");
        assert_eq!(
            ctx.referer(),
            Some("https://proxyhost/https://example.com/page")
        );
    }

    #[test]
    fn test_upstream_request_drops_host_and_accept_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("proxyhost"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("cookie", HeaderValue::from_static("a=1"));
        let ctx = RequestContext::new(
            Method::POST,
            "/https://example.com/".parse().unwrap(),
            headers,
            Bytes::from_static(b"payload"),
        );

        let req = UpstreamRequest::from_context(&ctx);
        assert_eq!(req.method, Method::POST);
        assert!(req.header("host").is_none());
        assert!(req.header("accept-encoding").is_none());
        assert!(req.header("connection").is_none());
        assert_eq!(req.header("cookie").unwrap(), "a=1");
        assert_eq!(req.body, Bytes::from_static(b"payload"));
    }
}
