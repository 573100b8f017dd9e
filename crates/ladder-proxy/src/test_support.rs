//! Shared helpers for unit tests that drive modifiers through a real chain.

use crate::proxychain::{
    BufferedResponse, DispatchError, Dispatcher, ProxyChain, RequestContext, RequestModifier,
    ResponseModifier, UpstreamRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Method, Response, StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;
use url::Url;

/// Answers every request with a canned response and remembers what it got.
pub struct RecordingUpstream {
    pub seen: Mutex<Vec<(Url, UpstreamRequest)>>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordingUpstream {
    pub fn new(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            headers,
            body: body.into(),
        }
    }
}

#[async_trait]
impl Dispatcher for RecordingUpstream {
    async fn dispatch(
        &self,
        url: &Url,
        request: UpstreamRequest,
    ) -> Result<BufferedResponse, DispatchError> {
        self.seen.lock().push((url.clone(), request));
        Ok(BufferedResponse {
            status: StatusCode::OK,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

pub fn context(path: &str, headers: HeaderMap) -> RequestContext {
    RequestContext::new(Method::GET, path.parse().unwrap(), headers, Bytes::new())
}

/// Run `modifiers` for `ctx` and return what the upstream received.
pub async fn outbound(
    ctx: RequestContext,
    modifiers: Vec<RequestModifier>,
) -> (Url, UpstreamRequest) {
    let upstream = Arc::new(RecordingUpstream::new(HeaderMap::new(), ""));
    let mut chain = ProxyChain::new(upstream.clone());
    chain.set_request_modifiers(modifiers).set_context(ctx);
    let response = chain.execute().await;
    assert_eq!(response.status(), StatusCode::OK, "exchange aborted");
    let seen = upstream.seen.lock().pop();
    seen.unwrap()
}

/// Run `modifiers` over a canned upstream response.
pub async fn inbound(
    headers: HeaderMap,
    body: &'static str,
    modifiers: Vec<ResponseModifier>,
) -> Response<Full<Bytes>> {
    let upstream = Arc::new(RecordingUpstream::new(headers, body));
    let mut chain = ProxyChain::new(upstream);
    chain
        .set_response_modifiers(modifiers)
        .set_context(context("/https://example.com/article", HeaderMap::new()));
    chain.execute().await
}

pub async fn body_string(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
