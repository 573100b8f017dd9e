//! Responses handed back to the inbound caller.

use super::context::UpstreamResponse;
use super::error::AbortError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Headers that describe the upstream connection or the framing of the
/// original body. Neither survives buffering and modification.
static STRIPPED_RESPONSE_HEADERS: [HeaderName; 9] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
    HeaderName::from_static("content-length"),
];

static TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

/// The 500 response sent when an exchange aborts.
pub fn error_response(err: &AbortError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, TEXT_PLAIN.clone());
    response
}

/// The response for a completed exchange: upstream status, modified headers,
/// modified body.
pub fn upstream_response(meta: UpstreamResponse, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = meta.status;
    *response.headers_mut() = strip_framing_headers(meta.headers);
    response
}

fn strip_framing_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in STRIPPED_RESPONSE_HEADERS.iter() {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxychain::error::{DispatchError, ProxyChainError};
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_response_is_500_with_message() {
        let err = AbortError {
            url: "http://127.0.0.1:1/".to_string(),
            cause: ProxyChainError::Dispatch(DispatchError::Transport("refused".to_string())),
        };
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            body,
            Bytes::from("ProxyChain error for 'http://127.0.0.1:1/': upstream request failed: refused")
        );
    }

    #[test]
    fn test_upstream_response_strips_framing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("999"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers.insert("set-cookie", HeaderValue::from_static("a=1"));

        let response = upstream_response(
            UpstreamResponse {
                status: StatusCode::NOT_FOUND,
                headers,
            },
            Bytes::from_static(b"short"),
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("content-length").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers().get("content-type").unwrap(), "text/html");
        assert_eq!(response.headers().get("set-cookie").unwrap(), "a=1");
    }
}
