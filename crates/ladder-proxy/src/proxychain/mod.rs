//! The proxy exchange pipeline.
//!
//! # Module Structure
//!
//! - `chain` - ProxyChain, the per-exchange state machine
//! - `resolver` - target URL resolution from the wildcard capture and referer
//! - `modifier` - modifier contract, rule selection, and the run queue
//! - `dispatch` - upstream client with full body buffering
//! - `context` - inbound request, outbound request and upstream response types
//! - `response` - responses handed back to the inbound caller
//! - `pool` - reuse of chains across requests
//! - `error` - failure kinds and the enriched abort error

mod chain;
mod context;
mod dispatch;
mod error;
mod modifier;
mod pool;
mod resolver;
mod response;


pub use chain::{ExchangeState, ProxyChain, ResponseMode};
pub use context::{
    capture_after_mount, BufferedResponse, RequestContext, UpstreamRequest, UpstreamResponse,
};
pub use dispatch::{Dispatcher, HttpClient, UpstreamClient};
pub use error::{AbortError, DispatchError, ModifierError, ProxyChainError, ResolveError};
pub use modifier::{
    request_modifier, response_modifier, RequestModifier, ResponseModifier, RuleSelector,
    SelectedModifiers,
};
pub use pool::{PooledChain, ProxyChainPool};
pub use resolver::{resolve_target_url, ResolvedTarget, TargetKind};
pub use response::error_response;
