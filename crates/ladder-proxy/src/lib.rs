//! Ladder: a programmable HTTP reverse proxy.
//!
//! Inbound requests carry their target in the path (`/https://example.com/a`).
//! Each one is handled by a [`proxychain::ProxyChain`] that resolves the
//! target, runs request modifiers, fetches and buffers the upstream response,
//! runs response modifiers, and hands the result back.

pub mod config;
pub mod metrics;
pub mod modifiers;
pub mod proxy;
pub mod proxychain;
pub mod ruleset;
pub mod tls;

#[cfg(test)]
mod test_support;
