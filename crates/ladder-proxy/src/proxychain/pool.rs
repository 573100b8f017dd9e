//! Reuse of [`ProxyChain`] instances across requests.
//!
//! A chain handed out by [`ProxyChainPool::acquire`] is reset when its guard
//! drops, whether the exchange finished, failed, or the request future was
//! cancelled half way. Chains therefore never carry per-exchange state back
//! into the pool.

use super::chain::{ExchangeState, ProxyChain};
use super::dispatch::Dispatcher;
use super::modifier::RuleSelector;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct ProxyChainPool {
    idle: Mutex<Vec<ProxyChain>>,
    client: Arc<dyn Dispatcher>,
    ruleset: Option<Arc<dyn RuleSelector>>,
    verbose: bool,
    max_idle: usize,
    created: AtomicUsize,
}

impl ProxyChainPool {
    pub fn new(client: Arc<dyn Dispatcher>, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            client,
            ruleset: None,
            verbose: false,
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Chains built by this pool start with `ruleset` attached.
    pub fn with_ruleset(mut self, ruleset: Arc<dyn RuleSelector>) -> Self {
        self.ruleset = Some(ruleset);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Take an idle chain, or build a new one when none is available.
    pub fn acquire(&self) -> PooledChain<'_> {
        let chain = self.idle.lock().pop().unwrap_or_else(|| self.build());
        PooledChain {
            chain: Some(chain),
            pool: self,
        }
    }

    fn build(&self) -> ProxyChain {
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Creating proxy chain #{}", total);

        let mut chain = ProxyChain::new(Arc::clone(&self.client));
        if let Some(ruleset) = &self.ruleset {
            chain.add_ruleset(Arc::clone(ruleset));
        }
        if self.verbose {
            chain.set_verbose();
        }
        chain
    }

    fn release(&self, mut chain: ProxyChain) {
        if chain.state() != ExchangeState::Idle {
            chain.reset();
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(chain);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of chains built over the lifetime of the pool.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// A chain borrowed from a [`ProxyChainPool`]; returned on drop.
pub struct PooledChain<'a> {
    chain: Option<ProxyChain>,
    pool: &'a ProxyChainPool,
}

impl Deref for PooledChain<'_> {
    type Target = ProxyChain;

    fn deref(&self) -> &ProxyChain {
        // Only `drop` takes the chain out.
        self.chain.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledChain<'_> {
    fn deref_mut(&mut self) -> &mut ProxyChain {
        self.chain.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledChain<'_> {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.take() {
            self.pool.release(chain);
        }
    }
}
