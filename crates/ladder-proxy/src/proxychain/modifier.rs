//! Modifier contract and the queue that runs them.

use super::chain::ProxyChain;
use super::error::ModifierError;
use std::collections::VecDeque;
use std::sync::Arc;
use url::Url;

/// Mutates the target URL, the outbound request or the client of an exchange
/// before it is dispatched.
pub type RequestModifier =
    Arc<dyn Fn(&mut ProxyChain) -> Result<(), ModifierError> + Send + Sync>;

/// Mutates the upstream response headers or the buffered body after the
/// response has been read.
pub type ResponseModifier =
    Arc<dyn Fn(&mut ProxyChain) -> Result<(), ModifierError> + Send + Sync>;

/// Wrap a closure as a [`RequestModifier`].
pub fn request_modifier<F>(f: F) -> RequestModifier
where
    F: Fn(&mut ProxyChain) -> Result<(), ModifierError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`ResponseModifier`].
pub fn response_modifier<F>(f: F) -> ResponseModifier
where
    F: Fn(&mut ProxyChain) -> Result<(), ModifierError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Modifiers chosen for one target URL.
#[derive(Clone, Default)]
pub struct SelectedModifiers {
    pub request: Vec<RequestModifier>,
    pub response: Vec<ResponseModifier>,
}

impl SelectedModifiers {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }
}

/// Maps a resolved target URL to the modifiers that apply to it.
pub trait RuleSelector: Send + Sync {
    fn select(&self, url: &Url) -> SelectedModifiers;
}

/// Ordered modifiers for one phase of the exchange.
///
/// `configured` is pipeline configuration and survives resets. `pending`
/// belongs to the current exchange: modifiers appended while an exchange is
/// in flight land at its back, so they execute after everything already
/// scheduled for this phase. Appends made before the phase starts are held
/// and run after the scheduled ones once it begins. `finish` drops them.
pub(crate) struct ModifierQueue<M> {
    configured: Vec<M>,
    pending: VecDeque<M>,
    running: bool,
    executed: usize,
}

impl<M: Clone> ModifierQueue<M> {
    pub(crate) fn new() -> Self {
        Self {
            configured: Vec::new(),
            pending: VecDeque::new(),
            running: false,
            executed: 0,
        }
    }

    pub(crate) fn set(&mut self, modifiers: Vec<M>) {
        self.configured = modifiers;
    }

    /// Append to the configuration, or to the current exchange only when
    /// `in_exchange` is set.
    pub(crate) fn append(&mut self, modifiers: impl IntoIterator<Item = M>, in_exchange: bool) {
        if in_exchange {
            self.pending.extend(modifiers);
        } else {
            self.configured.extend(modifiers);
        }
    }

    /// Schedule the configured modifiers, then `extra`, then anything the
    /// exchange appended before this phase started.
    pub(crate) fn begin(&mut self, extra: impl IntoIterator<Item = M>) {
        let held = std::mem::take(&mut self.pending);
        self.pending.extend(self.configured.iter().cloned());
        self.pending.extend(extra);
        self.pending.extend(held);
        self.running = true;
        self.executed = 0;
    }

    pub(crate) fn next_modifier(&mut self) -> Option<M> {
        let next = self.pending.pop_front();
        if next.is_some() {
            self.executed += 1;
        }
        next
    }

    /// Drop whatever is still pending and leave the running state.
    pub(crate) fn finish(&mut self) -> usize {
        self.pending.clear();
        self.running = false;
        std::mem::take(&mut self.executed)
    }

    pub(crate) fn configured_len(&self) -> usize {
        self.configured.len()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }
}
