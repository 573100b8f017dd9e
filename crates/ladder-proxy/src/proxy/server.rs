//! ProxyServer struct and main run loop.

use super::handler::{handle_request, RequestHandlerContext};
use super::network::create_reusable_listener;
use crate::config::Config;
use crate::proxychain::{Dispatcher, ProxyChainPool, UpstreamClient};
use crate::ruleset::RuleSet;
use crate::tls::create_tls_acceptor;
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

pub struct ProxyServer {
    config: Arc<Config>,
    pool: ProxyChainPool,
}

impl ProxyServer {
    /// Build a server that sends upstream requests through a pooled hyper
    /// client configured from `config.client`.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let client = UpstreamClient::new(&config.client)?;
        Self::with_dispatcher(config, Arc::new(client))
    }

    /// Build a server around an existing dispatcher.
    pub fn with_dispatcher(
        config: Config,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, anyhow::Error> {
        let ruleset = RuleSet::compile(&config.rules).context("Failed to compile rules")?;
        info!("Loaded {} domain rules", ruleset.len());

        let pool = ProxyChainPool::new(dispatcher, config.pool.max_idle)
            .with_ruleset(Arc::new(ruleset))
            .with_verbose(config.verbose);

        Ok(Self {
            config: Arc::new(config),
            pool,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        let listen = &self.config.listen;
        format!("{}:{}", listen.address, listen.port)
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", listen.address))
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let addr = self.listen_addr()?;
        let listener = create_reusable_listener(addr)
            .with_context(|| format!("Failed to bind {addr}"))?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let tls_acceptor = match &self.config.listen.tls {
            Some(tls) => Some(create_tls_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };
        let scheme = if tls_acceptor.is_some() { "https" } else { "http" };

        info!("Listening on {}://{}", scheme, listener.local_addr()?);
        info!("Proxy mounted at {}", self.config.listen.mount);

        let server = Arc::new(self);
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                server.serve_connection(stream, remote_addr, tls_acceptor).await;
            });
        }
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        remote_addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
    ) {
        let service = {
            let server = Arc::clone(&self);
            service_fn(move |req| {
                let server = Arc::clone(&server);
                async move {
                    let ctx = RequestHandlerContext {
                        pool: &server.pool,
                        listen: &server.config.listen,
                    };
                    handle_request(&ctx, req).await
                }
            })
        };

        let result = match tls_acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                }
                Err(err) => {
                    error!("TLS handshake failed from {}: {}", remote_addr, err);
                    return;
                }
            },
            None => {
                http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
            }
        };

        if let Err(err) = result {
            error!("Error serving connection from {}: {}", remote_addr, err);
        }
    }
}
