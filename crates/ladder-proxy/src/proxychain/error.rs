//! Error types for the proxy exchange.
//!
//! Every failure inside an exchange is terminal. The kinds below are the
//! causes; [`AbortError`] pairs a cause with the URL the exchange was working
//! on and renders the message sent back to the caller.

use std::time::Duration;

/// The target URL could not be determined from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("error parsing request URL '{input}': {reason}")]
    InvalidCapture { input: String, reason: String },
    #[error("error parsing referer URL from req: '{input}': {reason}")]
    InvalidReferer { input: String, reason: String },
    #[error("error parsing real URL from referer '{referer_path}': {reason}")]
    InvalidEmbeddedUrl {
        referer_path: String,
        reason: String,
    },
    #[error("failed to extract url from relative path: '{input}'")]
    Unresolvable { input: String },
}

/// Failure reported by a request or response modifier.
#[derive(Debug, thiserror::Error)]
pub enum ModifierError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid header '{name}': {reason}")]
    Header { name: String, reason: String },
    #[error("no {0} available at this stage of the exchange")]
    MissingState(&'static str),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

impl ModifierError {
    pub fn custom(message: impl Into<String>) -> Self {
        ModifierError::Custom(message.into())
    }

    pub(crate) fn header(name: &str, reason: impl ToString) -> Self {
        ModifierError::Header {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure while sending the request upstream or reading its response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
    #[error("failed to read upstream response body: {0}")]
    Body(String),
}

/// All the ways an exchange can fail.
#[derive(Debug, thiserror::Error)]
pub enum ProxyChainError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),
    #[error("request modifier failed: {0}")]
    RequestModifier(#[source] ModifierError),
    #[error("response modifier failed: {0}")]
    ResponseModifier(#[source] ModifierError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("request ctx not set. Use ProxyChain::set_context()")]
    ContextNotSet,
    #[error("request url not set or invalid. Check request modifiers for issues")]
    MissingScheme,
}

impl ProxyChainError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyChainError::Resolution(_) | ProxyChainError::MissingScheme => "resolution",
            ProxyChainError::RequestModifier(_) | ProxyChainError::ResponseModifier(_) => {
                "modifier"
            }
            ProxyChainError::Dispatch(_) => "dispatch",
            ProxyChainError::ContextNotSet => "precondition",
        }
    }
}

/// A terminal exchange failure, enriched with the URL being proxied.
#[derive(Debug, thiserror::Error)]
#[error("ProxyChain error for '{url}': {cause}")]
pub struct AbortError {
    pub url: String,
    #[source]
    pub cause: ProxyChainError,
}

impl AbortError {
    pub fn kind(&self) -> &'static str {
        self.cause.kind()
    }
}
