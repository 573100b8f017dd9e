//! The exchange orchestrator.
//!
//! A [`ProxyChain`] forwards one inbound request at a time to its upstream,
//! applying request modifiers before dispatch and response modifiers after the
//! upstream body has been buffered:
//!
//! ```text
//! client             ladder                       upstream
//!   | GET /https://site/a |                            |
//!   |-------------------->| resolve url                |
//!   |                     | request modifiers          |
//!   |                     |--------------------------->|
//!   |                     |<---------------------------|
//!   |                     | buffer body                |
//!   |                     | response modifiers         |
//!   |<--------------------| reset                      |
//! ```
//!
//! Chains are reusable. Per-exchange state is cleared after every exchange,
//! while modifier lists, the client and the rule selector persist. A chain
//! must not run two exchanges at once; use one chain per in-flight request,
//! typically through [`ProxyChainPool`](super::ProxyChainPool).

use super::context::{RequestContext, UpstreamRequest, UpstreamResponse};
use super::dispatch::Dispatcher;
use super::error::{AbortError, ModifierError, ProxyChainError};
use super::modifier::{
    ModifierQueue, RequestModifier, ResponseModifier, RuleSelector, SelectedModifiers,
};
use super::resolver::{resolve_target_url, TargetKind};
use super::response::{error_response, upstream_response};
use crate::metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use url::Url;

/// Logs at info level in verbose mode and at debug level otherwise.
macro_rules! trace_step {
    ($chain:expr, $($arg:tt)+) => {
        if $chain.verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Where a chain is in its exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Resolving,
    Ready,
    Aborted,
    RequestModifying,
    Dispatching,
    ResponseModifying,
    Complete,
}

/// How the buffered body is handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Raw,
    Structured,
}

impl ResponseMode {
    fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Raw => "raw",
            ResponseMode::Structured => "structured",
        }
    }
}

pub struct ProxyChain {
    ctx: Option<RequestContext>,
    url: Option<Url>,
    client: Arc<dyn Dispatcher>,
    request: Option<UpstreamRequest>,
    response: Option<UpstreamResponse>,
    body: Bytes,
    request_modifiers: ModifierQueue<RequestModifier>,
    response_modifiers: ModifierQueue<ResponseModifier>,
    ruleset: Option<Arc<dyn RuleSelector>>,
    verbose: bool,
    abort_error: Option<AbortError>,
    state: ExchangeState,
}

impl ProxyChain {
    pub fn new(client: Arc<dyn Dispatcher>) -> Self {
        Self {
            ctx: None,
            url: None,
            client,
            request: None,
            response: None,
            body: Bytes::new(),
            request_modifiers: ModifierQueue::new(),
            response_modifiers: ModifierQueue::new(),
            ruleset: None,
            verbose: false,
            abort_error: None,
            state: ExchangeState::Idle,
        }
    }

    // ===== Pipeline configuration =====

    /// Replace the request modifiers. They run when the exchange executes.
    pub fn set_request_modifiers(&mut self, modifiers: Vec<RequestModifier>) -> &mut Self {
        self.request_modifiers.set(modifiers);
        self
    }

    /// Append request modifiers. Called while an exchange is in flight, the
    /// new modifiers belong to that exchange only: appended from a running
    /// request modifier they execute later in the same pass.
    pub fn add_request_modifiers(
        &mut self,
        modifiers: impl IntoIterator<Item = RequestModifier>,
    ) -> &mut Self {
        let in_exchange = self.in_exchange();
        self.request_modifiers.append(modifiers, in_exchange);
        self
    }

    /// Replace the response modifiers. They run once the body is buffered.
    pub fn set_response_modifiers(&mut self, modifiers: Vec<ResponseModifier>) -> &mut Self {
        self.response_modifiers.set(modifiers);
        self
    }

    /// Append response modifiers, with the same in-flight semantics as
    /// [`add_request_modifiers`](Self::add_request_modifiers). Appended from a
    /// request modifier they run after the scheduled response modifiers.
    pub fn add_response_modifiers(
        &mut self,
        modifiers: impl IntoIterator<Item = ResponseModifier>,
    ) -> &mut Self {
        let in_exchange = self.in_exchange();
        self.response_modifiers.append(modifiers, in_exchange);
        self
    }

    /// Attach a rule selector. It is consulted once per exchange with the
    /// resolved URL and its modifiers run after the configured ones.
    pub fn add_ruleset(&mut self, ruleset: Arc<dyn RuleSelector>) -> &mut Self {
        self.ruleset = Some(ruleset);
        self
    }

    /// Swap the upstream client. Meant for setup, not for a running exchange.
    pub fn set_client(&mut self, client: Arc<dyn Dispatcher>) -> &mut Self {
        self.client = client;
        self
    }

    /// Log every modification step at info level.
    pub fn set_verbose(&mut self) -> &mut Self {
        self.verbose = true;
        self
    }

    /// Bind the inbound request for the next exchange and resolve its target
    /// URL. A resolution failure is kept and reported by the next execute.
    pub fn set_context(&mut self, ctx: RequestContext) -> &mut Self {
        if self.state != ExchangeState::Idle {
            debug!(state = ?self.state, "Rebinding context, discarding previous exchange state");
            self.reset();
        }

        self.state = ExchangeState::Resolving;
        let resolved = resolve_target_url(&ctx.capture, ctx.referer());
        self.ctx = Some(ctx);

        match resolved {
            Ok(target) => {
                if target.kind == TargetKind::RefererRelative {
                    trace_step!(
                        self,
                        "modified relative URL: '{}' -> '{}'",
                        self.ctx.as_ref().map(|c| c.capture.as_str()).unwrap_or_default(),
                        target.url
                    );
                }
                self.url = Some(target.url);
                self.state = ExchangeState::Ready;
            }
            Err(e) => {
                let err = self.abort(e.into());
                self.abort_error = Some(err);
            }
        }
        self
    }

    // ===== Exchange state, for modifiers =====

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.ctx.as_ref()
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn url_mut(&mut self) -> Result<&mut Url, ModifierError> {
        self.url.as_mut().ok_or(ModifierError::MissingState("target url"))
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    /// The outbound request, present while request modifiers run.
    pub fn request(&self) -> Option<&UpstreamRequest> {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Result<&mut UpstreamRequest, ModifierError> {
        self.request
            .as_mut()
            .ok_or(ModifierError::MissingState("outbound request"))
    }

    /// Upstream status and headers, present while response modifiers run.
    pub fn response(&self) -> Option<&UpstreamResponse> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Result<&mut UpstreamResponse, ModifierError> {
        self.response
            .as_mut()
            .ok_or(ModifierError::MissingState("upstream response"))
    }

    /// The buffered upstream body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    // ===== Execution =====

    /// Run the exchange and return the buffered body verbatim, or a 500
    /// response describing the failure. The chain is reset either way.
    pub async fn execute(&mut self) -> Response<Full<Bytes>> {
        self.respond(ResponseMode::Raw).await
    }

    /// Run the exchange for an API caller. The body goes out exactly as
    /// [`execute`](Self::execute) sends it; structured bodies come from
    /// response modifiers such as `outline`.
    pub async fn execute_structured(&mut self) -> Response<Full<Bytes>> {
        self.respond(ResponseMode::Structured).await
    }

    async fn respond(&mut self, mode: ResponseMode) -> Response<Full<Bytes>> {
        let response = match self.run_exchange().await {
            Ok(()) => {
                metrics::record_exchange(mode.as_str(), "complete");
                let meta = self.response.take();
                let body = std::mem::take(&mut self.body);
                match meta {
                    Some(meta) => upstream_response(meta, body),
                    None => Response::new(Full::new(body)),
                }
            }
            Err(err) => {
                metrics::record_exchange(mode.as_str(), "aborted");
                error_response(&err)
            }
        };
        self.reset();
        response
    }

    /// Run the exchange without producing a response. On success the
    /// modified response stays on the chain until [`reset`](Self::reset).
    pub(crate) async fn run_exchange(&mut self) -> Result<(), AbortError> {
        if self.state == ExchangeState::Aborted {
            let cached = self.abort_error.take();
            debug_assert!(cached.is_some(), "aborted chain without a cached error");
            if let Some(err) = cached {
                debug!("Re-reporting failure from context binding: {}", err);
                return Err(err);
            }
        }
        let request = match self.ctx.as_ref().map(UpstreamRequest::from_context) {
            Some(request) => request,
            None => return Err(self.abort(ProxyChainError::ContextNotSet)),
        };
        if !self.has_absolute_url() {
            return Err(self.abort(ProxyChainError::MissingScheme));
        }

        let selected = match (&self.ruleset, &self.url) {
            (Some(ruleset), Some(url)) => ruleset.select(url),
            _ => SelectedModifiers::default(),
        };
        if !selected.is_empty() {
            trace_step!(
                self,
                "Rule set selected {} request and {} response modifiers",
                selected.request.len(),
                selected.response.len()
            );
        }

        // Request modifiers
        self.request = Some(request);
        self.state = ExchangeState::RequestModifying;
        self.request_modifiers.begin(selected.request);
        let mut step = 0;
        while let Some(modifier) = self.request_modifiers.next_modifier() {
            step += 1;
            trace_step!(self, "Running request modifier #{}", step);
            if let Err(e) = modifier(self) {
                metrics::record_modifiers("request", self.request_modifiers.finish());
                return Err(self.abort(ProxyChainError::RequestModifier(e)));
            }
        }
        let executed = self.request_modifiers.finish();
        metrics::record_modifiers("request", executed);
        trace_step!(self, "Applied {} request modifiers", executed);

        let (url, request) = match (self.url.clone(), self.request.take()) {
            (Some(url), Some(request)) if !url.scheme().is_empty() => (url, request),
            _ => return Err(self.abort(ProxyChainError::MissingScheme)),
        };

        // Dispatch
        self.state = ExchangeState::Dispatching;
        let method = request.method.clone();
        let client = Arc::clone(&self.client);
        let start = Instant::now();
        trace_step!(self, "Sending {} {}", method, url);
        let upstream = match client.dispatch(&url, request).await {
            Ok(upstream) => upstream,
            Err(e) => return Err(self.abort(e.into())),
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_upstream_duration(method.as_str(), upstream.status.as_u16(), duration_ms);
        trace_step!(
            self,
            "Upstream answered {} for {} ({} bytes, {:.1}ms)",
            upstream.status,
            url,
            upstream.body.len(),
            duration_ms
        );

        self.response = Some(UpstreamResponse {
            status: upstream.status,
            headers: upstream.headers,
        });
        self.body = upstream.body;

        // Response modifiers
        self.state = ExchangeState::ResponseModifying;
        self.response_modifiers.begin(selected.response);
        let mut step = 0;
        while let Some(modifier) = self.response_modifiers.next_modifier() {
            step += 1;
            trace_step!(self, "Running response modifier #{}", step);
            if let Err(e) = modifier(self) {
                metrics::record_modifiers("response", self.response_modifiers.finish());
                return Err(self.abort(ProxyChainError::ResponseModifier(e)));
            }
        }
        let executed = self.response_modifiers.finish();
        metrics::record_modifiers("response", executed);
        trace_step!(self, "Applied {} response modifiers", executed);

        self.state = ExchangeState::Complete;
        Ok(())
    }

    fn in_exchange(&self) -> bool {
        matches!(
            self.state,
            ExchangeState::RequestModifying
                | ExchangeState::Dispatching
                | ExchangeState::ResponseModifying
        )
    }

    fn has_absolute_url(&self) -> bool {
        self.url.as_ref().is_some_and(|url| !url.scheme().is_empty())
    }

    /// Mark the exchange as failed and enrich `cause` with the URL being
    /// proxied. Anything already buffered is discarded.
    fn abort(&mut self, cause: ProxyChainError) -> AbortError {
        let url = match (&self.url, &self.ctx) {
            (Some(url), _) => url.to_string(),
            (None, Some(ctx)) => ctx.capture.clone(),
            (None, None) => String::new(),
        };
        let err = AbortError { url, cause };
        error!(kind = err.kind(), "{}", err);
        metrics::record_abort(err.kind());

        self.request = None;
        self.response = None;
        self.body = Bytes::new();
        self.state = ExchangeState::Aborted;
        err
    }

    /// Clear all per-exchange state so the chain can serve another request.
    pub(crate) fn reset(&mut self) {
        self.ctx = None;
        self.url = None;
        self.request = None;
        self.response = None;
        self.body = Bytes::new();
        self.abort_error = None;
        self.request_modifiers.finish();
        self.response_modifiers.finish();
        self.state = ExchangeState::Idle;
    }

    pub(crate) fn configured_modifier_counts(&self) -> (usize, usize) {
        (
            self.request_modifiers.configured_len(),
            self.response_modifiers.configured_len(),
        )
    }
}
