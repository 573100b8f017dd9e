//! Upstream dispatch.
//!
//! The dispatcher sends the prepared request and buffers the whole response
//! body before returning. There is no retry and no streaming.

use super::context::{BufferedResponse, UpstreamRequest};
use super::error::DispatchError;
use crate::config::ClientConfig;
use crate::tls::insecure_client_config;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Sends a prepared request upstream and returns the buffered response.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        url: &Url,
        request: UpstreamRequest,
    ) -> Result<BufferedResponse, DispatchError>;
}

/// Type alias for the pooled HTTP/1.1 client.
pub type HttpClient =
    Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// The default [`Dispatcher`]: a pooled hyper client with a fixed timeout
/// covering connect, send, and full body download.
pub struct UpstreamClient {
    client: HttpClient,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &ClientConfig) -> Result<Self, anyhow::Error> {
        let mut http_connector = HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let tls = if config.tls_skip_verify {
            warn!("TLS certificate verification DISABLED for upstream requests (development/testing only)");
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(insecure_client_config())
        } else {
            match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
                Ok(builder) => builder,
                Err(e) => {
                    warn!("No native root certificates available, HTTPS upstreams will fail verification: {}", e);
                    hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(
                        rustls::ClientConfig::builder()
                            .with_root_certificates(rustls::RootCertStore::empty())
                            .with_no_client_auth(),
                    )
                }
            }
        };
        let https_connector = tls.https_or_http().enable_http1().wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        info!(
            "Upstream client configured (HTTP/1.1): timeout={}s, max_idle={}, idle_timeout={}s",
            config.timeout_secs, config.max_idle_per_host, config.pool_idle_timeout_secs
        );

        Ok(Self {
            client,
            timeout: config.timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Render an error together with its sources.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[async_trait]
impl Dispatcher for UpstreamClient {
    async fn dispatch(
        &self,
        url: &Url,
        request: UpstreamRequest,
    ) -> Result<BufferedResponse, DispatchError> {
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| DispatchError::InvalidRequest(format!("{e}")))?;

        let mut upstream_req = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(BoxBody::new(
                Full::new(request.body).map_err(|never: Infallible| match never {}),
            ))
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
        *upstream_req.headers_mut() = request.headers;

        let round_trip = async {
            let response = self
                .client
                .request(upstream_req)
                .await
                .map_err(|e| DispatchError::Transport(error_chain(&e)))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| DispatchError::Body(error_chain(&e)))?
                .to_bytes();
            Ok(BufferedResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}
