//! Inbound request handling.
//!
//! Buffers the inbound body, binds the request to a pooled chain and lets the
//! chain produce the response.

use crate::config::ListenConfig;
use crate::proxychain::{ProxyChainPool, RequestContext, ResponseMode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

pub(crate) struct RequestHandlerContext<'a> {
    pub pool: &'a ProxyChainPool,
    pub listen: &'a ListenConfig,
}

/// Which chain entry point serves a path.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Proxy { mode: ResponseMode, mount: &'a str },
    NotFound,
}

/// Whether `rest` (the path after the api mount) names an absolute http(s)
/// target, possibly percent-encoded.
fn is_absolute_target(rest: &str) -> bool {
    let decoded = urlencoding::decode(rest).unwrap_or(std::borrow::Cow::Borrowed(rest));
    Url::parse(&decoded).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// `<mount>api/<absolute-url>` is served structured. Anything else under the
/// mount, including a page's own relative `api/...` paths, is proxied raw
/// with the full capture.
fn route<'a>(path: &str, mount: &'a str, api_mount: &'a str) -> Route<'a> {
    let api_target = path
        .strip_prefix(api_mount)
        .is_some_and(is_absolute_target);
    if api_target {
        Route::Proxy {
            mode: ResponseMode::Structured,
            mount: api_mount,
        }
    } else if path.starts_with(mount) {
        Route::Proxy {
            mode: ResponseMode::Raw,
            mount,
        }
    } else {
        Route::NotFound
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub(crate) async fn handle_request<B>(
    ctx: &RequestHandlerContext<'_>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let start = Instant::now();
    let api_mount = ctx.listen.api_mount();
    let (parts, body) = req.into_parts();
    debug!("Received request: {} {}", parts.method, parts.uri);

    let (mode, mount) = match route(parts.uri.path(), &ctx.listen.mount, &api_mount) {
        Route::Proxy { mode, mount } => (mode, mount),
        Route::NotFound => return Ok(plain_response(StatusCode::NOT_FOUND, "not found")),
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body for {}: {}", parts.uri, e);
            return Ok(plain_response(
                StatusCode::BAD_REQUEST,
                "failed to read request body",
            ));
        }
    };

    let Some(request_ctx) = RequestContext::from_parts(&parts, body, mount) else {
        return Ok(plain_response(StatusCode::NOT_FOUND, "not found"));
    };

    let mut chain = ctx.pool.acquire();
    chain.set_context(request_ctx);
    let response = match mode {
        ResponseMode::Raw => chain.execute().await,
        ResponseMode::Structured => chain.execute_structured().await,
    };

    debug!(
        "{} {} -> {} in {:.1}ms",
        parts.method,
        parts.uri,
        response.status(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingUpstream;
    use hyper::header::HeaderMap;
    use std::sync::Arc;

    #[test]
    fn test_route_api_before_raw() {
        assert_eq!(
            route("/api/https://example.com/", "/", "/api/"),
            Route::Proxy {
                mode: ResponseMode::Structured,
                mount: "/api/"
            }
        );
        assert_eq!(
            route("/https://example.com/", "/", "/api/"),
            Route::Proxy {
                mode: ResponseMode::Raw,
                mount: "/"
            }
        );
    }

    #[test]
    fn test_route_relative_api_path_stays_raw() {
        assert_eq!(
            route("/api/data.json", "/", "/api/"),
            Route::Proxy {
                mode: ResponseMode::Raw,
                mount: "/"
            }
        );
        assert_eq!(
            route("/api/https%3A%2F%2Fexample.com%2F", "/", "/api/"),
            Route::Proxy {
                mode: ResponseMode::Structured,
                mount: "/api/"
            }
        );
    }

    #[test]
    fn test_route_outside_mount() {
        assert_eq!(
            route("/other/x", "/proxy/", "/proxy/api/"),
            Route::NotFound
        );
    }

    async fn send(
        upstream: Arc<RecordingUpstream>,
        listen: &ListenConfig,
        path: &str,
    ) -> Response<Full<Bytes>> {
        send_with_referer(upstream, listen, path, None).await
    }

    async fn send_with_referer(
        upstream: Arc<RecordingUpstream>,
        listen: &ListenConfig,
        path: &str,
        referer: Option<&str>,
    ) -> Response<Full<Bytes>> {
        let pool = ProxyChainPool::new(upstream, 4);
        let ctx = RequestHandlerContext {
            pool: &pool,
            listen,
        };
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("host", "proxyhost");
        if let Some(referer) = referer {
            builder = builder.header("referer", referer);
        }
        let req = builder
            .body(Full::new(Bytes::from_static(b"form=1")))
            .unwrap();
        handle_request(&ctx, req).await.unwrap()
    }

    #[tokio::test]
    async fn test_proxied_request_reaches_upstream() {
        let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), "hello"));
        let listen = ListenConfig::default();
        let response = send(upstream.clone(), &listen, "/https://example.com/a?b=1").await;
        assert_eq!(response.status(), StatusCode::OK);

        let (url, sent) = upstream.seen.lock().pop().unwrap();
        assert_eq!(url.as_str(), "https://example.com/a?b=1");
        assert_eq!(sent.method, hyper::Method::POST);
        assert_eq!(sent.body, Bytes::from_static(b"form=1"));
        assert!(sent.header("host").is_none());
    }

    #[tokio::test]
    async fn test_api_route_strips_api_mount() {
        let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), "{}"));
        let listen = ListenConfig::default();
        let response = send(upstream.clone(), &listen, "/api/https://example.com/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let (url, _) = upstream.seen.lock().pop().unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_relative_api_asset_keeps_its_path() {
        let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), "{}"));
        let listen = ListenConfig::default();
        let response = send_with_referer(
            upstream.clone(),
            &listen,
            "/api/data.json",
            Some("https://proxyhost/https://example.com/page"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let (url, _) = upstream.seen.lock().pop().unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/data.json");
    }

    #[tokio::test]
    async fn test_nested_mount() {
        let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), ""));
        let listen = ListenConfig {
            mount: "/proxy/".to_string(),
            ..ListenConfig::default()
        };
        let response = send(upstream.clone(), &listen, "/elsewhere").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(upstream.clone(), &listen, "/proxy/https://example.com/x").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            upstream.seen.lock().pop().unwrap().0.as_str(),
            "https://example.com/x"
        );
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_500() {
        let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), ""));
        let listen = ListenConfig::default();
        let response = send(upstream.clone(), &listen, "/favicon.ico").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(upstream.seen.lock().is_empty());
    }
}
