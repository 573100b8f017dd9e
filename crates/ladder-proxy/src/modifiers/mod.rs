//! Built-in request and response modifiers.
//!
//! Each constructor returns a modifier ready to be handed to
//! [`ProxyChain`](crate::proxychain::ProxyChain) or produced by a rule set.
//! Header arguments are validated when the modifier runs; rule sets validate
//! them earlier, when the configuration is compiled.

mod outline;
mod request;
mod response;

pub use outline::{outline, ContentItem, OutlineDocument, OutlineError, OutlineMetadata};
pub use request::{
    block_outgoing_cookies, block_outgoing_cookies_except, delete_request_header, hide_origin,
    hide_referrer, masquerade_as_bing_bot, masquerade_as_google_bot, modify_domain_with_regex,
    modify_path_with_regex, modify_query_params, request_archive_is, request_google_cache,
    request_wayback_machine, set_request_header, spoof_origin, spoof_referrer, spoof_user_agent,
    spoof_x_forwarded_for,
};
pub use response::{bypass_cors, bypass_csp, delete_response_header, modify_response_header};

use crate::proxychain::ModifierError;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};

pub(crate) fn header_name(name: &str) -> Result<HeaderName, ModifierError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ModifierError::header(name, e))
}

pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue, ModifierError> {
    HeaderValue::from_str(value).map_err(|e| ModifierError::header(name, e))
}

/// Replace every value of `name` with `value`.
pub(crate) fn set_header(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
) -> Result<(), ModifierError> {
    let header = header_name(name)?;
    let value = header_value(name, value)?;
    headers.insert(header, value);
    Ok(())
}

/// Like [`set_header`], but an empty value removes the header.
pub(crate) fn set_or_remove_header(
    headers: &mut HeaderMap,
    name: &str,
    value: &str,
) -> Result<(), ModifierError> {
    if value.is_empty() {
        headers.remove(header_name(name)?);
        return Ok(());
    }
    set_header(headers, name, value)
}
