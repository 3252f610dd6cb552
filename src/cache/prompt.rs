//! Thread-safe prefix-matching prompt cache.
//!
//! [`PromptCache`] stores expensive-to-recompute model state (typically a
//! KV cache) keyed by namespace and token sequence, and serves the best
//! stored state for a new sequence. An exact match wins, then the longest
//! stored proper prefix, then a longer stored sequence trimmed down to
//! the shared prefix through caller-supplied [`TrimHooks`]. Alongside the
//! state, every fetch reports which query tokens remain to be processed.
//!
//! # Architecture
//!
//! One token trie per namespace (see [`trie`](super::trie)), plus a
//! single recency order across all namespaces. A coarse mutex guards
//! both; every operation holds it for its full duration, so operations
//! are linearizable and trim hooks run under the lock.
//!
//! # Ownership of cached state
//!
//! Exact and prefix hits are extraction, not borrowing. A uniquely held
//! entry is moved out of the cache entirely; the caller is expected to
//! re-insert the state (usually advanced by further tokens) once done
//! with it. Re-inserting a sequence that is already stored bumps a
//! reference count instead of storing twice, and fetching a shared
//! entry decrements the count and returns a clone. A trimmed hit is the
//! exception: the stored entry is left untouched and the caller gets a
//! trimmed clone. Capacity eviction ignores reference counts: holders
//! of extracted state keep working unaffected when their entry is
//! evicted.

use std::collections::VecDeque;
use std::fmt;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{MuninnError, Result};
use crate::telemetry;

use super::Token;
use super::trie::{Extracted, InsertOutcome, SearchOutcome, TrieNode};

/// Configuration for [`PromptCache`].
///
/// ```rust
/// # use muninn::CacheConfig;
/// let config = CacheConfig::new().max_entries(500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of distinct cached sequences, counted across all
    /// namespaces. Default: 10, or `MUNINN_MAX_ENTRIES` when set.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: std::env::var("MUNINN_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

impl CacheConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of distinct cached sequences.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }
}

/// Hooks for reusing state stored under a longer token sequence.
///
/// `can_trim` reports whether a given value supports trimming at all;
/// `trim` removes the state for the last `n` tokens in place. Hooks run
/// while the cache lock is held, so they should be quick and must not
/// call back into the cache. `trim` is only ever applied to a private
/// copy, never to the stored value itself.
pub struct TrimHooks<V> {
    can_trim: Box<dyn Fn(&V) -> bool + Send + Sync>,
    trim: Box<dyn Fn(&mut V, usize) + Send + Sync>,
}

impl<V> TrimHooks<V> {
    /// Create the hook pair.
    pub fn new(
        can_trim: impl Fn(&V) -> bool + Send + Sync + 'static,
        trim: impl Fn(&mut V, usize) + Send + Sync + 'static,
    ) -> Self {
        Self {
            can_trim: Box::new(can_trim),
            trim: Box::new(trim),
        }
    }
}

impl<V> fmt::Debug for TrimHooks<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrimHooks").finish_non_exhaustive()
    }
}

/// Trie roots and recency order, guarded together by one mutex.
#[derive(Debug)]
struct CacheInner<V> {
    namespaces: AHashMap<String, TrieNode<V>>,
    /// One record per distinct stored sequence, least recent at the
    /// front. Length equals the number of stored sequences.
    lru: VecDeque<(String, Vec<Token>)>,
}

// A derived impl would put a `V: Default` bound on this.
impl<V> Default for CacheInner<V> {
    fn default() -> Self {
        Self {
            namespaces: AHashMap::new(),
            lru: VecDeque::new(),
        }
    }
}

impl<V: Clone> CacheInner<V> {
    /// Extract the value stored at `(namespace, tokens)`, removing the
    /// entry and its recency record when the last reference goes.
    fn extract(&mut self, namespace: &str, tokens: &[Token]) -> Option<V> {
        let root = self.namespaces.get_mut(namespace)?;
        match root.extract(tokens)? {
            Extracted::Shared(value) => Some(value),
            Extracted::Owned(value) => {
                if root.is_empty() {
                    self.namespaces.remove(namespace);
                }
                self.remove_record(namespace, tokens);
                Some(value)
            }
        }
    }

    fn insert(&mut self, namespace: &str, tokens: &[Token], value: V) -> InsertOutcome {
        let root = self
            .namespaces
            .entry(namespace.to_owned())
            .or_insert_with(TrieNode::new);
        let outcome = root.insert(tokens, value);
        match outcome {
            InsertOutcome::Created => {
                self.lru.push_back((namespace.to_owned(), tokens.to_vec()));
            }
            InsertOutcome::Refreshed => {
                self.remove_record(namespace, tokens);
                self.lru.push_back((namespace.to_owned(), tokens.to_vec()));
            }
        }
        outcome
    }

    /// Drop the recency record for a sequence that is known to be stored.
    fn remove_record(&mut self, namespace: &str, tokens: &[Token]) {
        let index = self
            .lru
            .iter()
            .position(|(n, k)| n == namespace && k == tokens)
            .expect("stored sequence has no recency record");
        self.lru.remove(index);
    }
}

/// Thread-safe prefix-matching prompt cache.
///
/// Values are opaque; `V: Clone` is needed to hand out copies of shared
/// entries. All methods take `&self`, so the cache is shared across
/// threads behind an `Arc` without further locking.
///
/// ```rust
/// use muninn::{CacheConfig, PromptCache};
///
/// let cache = PromptCache::new(&CacheConfig::new().max_entries(64))?;
/// cache.insert("llama-3-8b", &[101, 7592, 2088], vec![0.5_f32; 8]);
///
/// // A longer query reuses the stored prefix state.
/// let (state, remaining) = cache.fetch("llama-3-8b", &[101, 7592, 2088, 999]);
/// assert!(state.is_some());
/// assert_eq!(remaining, vec![999]);
/// # Ok::<(), muninn::MuninnError>(())
/// ```
pub struct PromptCache<V> {
    max_entries: usize,
    hooks: Option<TrimHooks<V>>,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> PromptCache<V> {
    /// Create a cache without trim hooks. Longer stored sequences are
    /// never reused for shorter queries.
    ///
    /// Rejects a zero entry cap with [`MuninnError::Configuration`].
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a cache that can also serve a query from a longer stored
    /// sequence by trimming a copy of its state down to the shared
    /// prefix.
    ///
    /// Rejects a zero entry cap with [`MuninnError::Configuration`].
    ///
    /// ```rust
    /// use muninn::{CacheConfig, PromptCache, TrimHooks};
    ///
    /// // State here is just the token list it was computed from.
    /// let hooks = TrimHooks::new(
    ///     |_state: &Vec<u32>| true,
    ///     |state: &mut Vec<u32>, n| {
    ///         let keep = state.len().saturating_sub(n);
    ///         state.truncate(keep);
    ///     },
    /// );
    /// let cache = PromptCache::with_trim_hooks(&CacheConfig::new().max_entries(64), hooks)?;
    /// cache.insert("m", &[1, 2, 3, 4, 5], vec![1, 2, 3, 4, 5]);
    ///
    /// // The query diverges after [1, 2]: a copy of the stored state is
    /// // trimmed to the shared prefix and the caller re-runs from there.
    /// let (state, remaining) = cache.fetch("m", &[1, 2, 9]);
    /// assert_eq!(state.unwrap(), vec![1, 2]);
    /// assert_eq!(remaining, vec![9]);
    ///
    /// // The stored entry itself is untouched.
    /// assert_eq!(cache.len(), 1);
    /// # Ok::<(), muninn::MuninnError>(())
    /// ```
    pub fn with_trim_hooks(config: &CacheConfig, hooks: TrimHooks<V>) -> Result<Self> {
        Self::build(config, Some(hooks))
    }

    fn build(config: &CacheConfig, hooks: Option<TrimHooks<V>>) -> Result<Self> {
        if config.max_entries == 0 {
            return Err(MuninnError::Configuration(
                "max_entries must be at least 1".to_owned(),
            ));
        }
        Ok(Self {
            max_entries: config.max_entries,
            hooks,
            inner: Mutex::new(CacheInner::default()),
        })
    }

    /// Fetch the best stored state for `tokens`.
    ///
    /// Returns the state to resume from, if any, together with the query
    /// tokens the caller still has to process: none after an exact hit,
    /// the unmatched tail after a prefix hit, at least the final query
    /// token after a trimmed hit, and the full query on a miss.
    ///
    /// An exact or prefix hit on a uniquely held entry removes it from
    /// the cache (see module docs); re-insert the state once done with
    /// it. A trimmed hit clones and leaves the stored entry in place.
    /// Fetching never refreshes recency.
    pub fn fetch(&self, namespace: &str, tokens: &[Token]) -> (Option<V>, Vec<Token>) {
        let mut inner = self.inner.lock();
        let outcome = match inner.namespaces.get(namespace) {
            Some(root) => root.search(tokens, self.hooks.is_some()),
            None => SearchOutcome::Miss,
        };

        match outcome {
            SearchOutcome::Exact => {
                let value = inner
                    .extract(namespace, tokens)
                    .expect("exact match vanished under the lock");
                metrics::counter!(telemetry::FETCH_HITS_TOTAL, "kind" => "exact").increment(1);
                trace!(namespace, tokens = tokens.len(), "exact hit");
                (Some(value), Vec::new())
            }
            SearchOutcome::Shorter { len } => {
                let value = inner
                    .extract(namespace, &tokens[..len])
                    .expect("prefix match vanished under the lock");
                metrics::counter!(telemetry::FETCH_HITS_TOTAL, "kind" => "prefix").increment(1);
                trace!(namespace, tokens = tokens.len(), prefix = len, "prefix hit");
                (Some(value), tokens[len..].to_vec())
            }
            SearchOutcome::Longer { stored, matched } => {
                let hooks = self
                    .hooks
                    .as_ref()
                    .expect("continuation search ran without trim hooks");
                let slot = inner
                    .namespaces
                    .get(namespace)
                    .and_then(|root| root.slot(&stored))
                    .expect("trim candidate vanished under the lock");
                if !(hooks.can_trim)(&slot.value) {
                    metrics::counter!(telemetry::FETCH_MISSES_TOTAL).increment(1);
                    trace!(namespace, tokens = tokens.len(), "miss, state not trimmable");
                    return (None, tokens.to_vec());
                }

                // The stored entry stays as it is; only a copy is
                // trimmed and handed out. Never retain the full query:
                // the caller must be left at least one token to run.
                let retained = (tokens.len() - 1).min(matched);
                let num_to_trim = stored.len() - retained;
                let mut value = slot.value.clone();
                (hooks.trim)(&mut value, num_to_trim);
                metrics::counter!(telemetry::FETCH_HITS_TOTAL, "kind" => "trimmed").increment(1);
                trace!(
                    namespace,
                    tokens = tokens.len(),
                    retained,
                    num_to_trim,
                    "trimmed hit"
                );
                (Some(value), tokens[retained..].to_vec())
            }
            SearchOutcome::Miss => {
                metrics::counter!(telemetry::FETCH_MISSES_TOTAL).increment(1);
                trace!(namespace, tokens = tokens.len(), "miss");
                (None, tokens.to_vec())
            }
        }
    }

    /// Store `value` for `tokens`, or bump the reference count when the
    /// sequence is already stored (the offered value is dropped and the
    /// original kept).
    ///
    /// Either way the sequence moves to the most recent end of the
    /// eviction order. When the cache grows past its entry cap, least
    /// recently used sequences are evicted whatever their reference
    /// counts.
    pub fn insert(&self, namespace: &str, tokens: &[Token], value: V) {
        let mut inner = self.inner.lock();
        match inner.insert(namespace, tokens, value) {
            InsertOutcome::Created => {
                metrics::counter!(telemetry::INSERTS_TOTAL, "outcome" => "created").increment(1);
                trace!(namespace, tokens = tokens.len(), "stored new sequence");
            }
            InsertOutcome::Refreshed => {
                metrics::counter!(telemetry::INSERTS_TOTAL, "outcome" => "refreshed").increment(1);
                trace!(namespace, tokens = tokens.len(), "refreshed stored sequence");
            }
        }

        while inner.lru.len() > self.max_entries {
            let (ns, key) = inner
                .lru
                .pop_front()
                .expect("recency order empty while over capacity");
            let root = inner
                .namespaces
                .get_mut(&ns)
                .expect("evicted namespace has no trie");
            root.take(&key).expect("evicted sequence has no slot");
            if root.is_empty() {
                inner.namespaces.remove(&ns);
            }
            metrics::counter!(telemetry::EVICTIONS_TOTAL).increment(1);
            debug!(namespace = %ns, tokens = key.len(), "evicted least recently used sequence");
        }
    }

    /// Drop everything, all namespaces included.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let removed = inner.lru.len();
        inner.namespaces.clear();
        inner.lru.clear();
        debug!(removed, "cleared prompt cache");
    }

    /// Drop one namespace and everything stored under it. Returns how
    /// many distinct sequences were removed.
    pub fn remove_namespace(&self, namespace: &str) -> usize {
        let mut inner = self.inner.lock();
        if inner.namespaces.remove(namespace).is_none() {
            return 0;
        }
        let before = inner.lru.len();
        inner.lru.retain(|(n, _)| n != namespace);
        let removed = before - inner.lru.len();
        debug!(namespace, removed, "removed namespace");
        removed
    }

    /// Number of distinct stored sequences across all namespaces.
    /// Reference counts do not affect this.
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured entry cap.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_overrides_default() {
        let config = CacheConfig::new().max_entries(3);
        assert_eq!(config.max_entries, 3);
    }

    #[test]
    fn config_env_fallback() {
        // Sequential on purpose: other tests must not read the default
        // while the variable is set.
        assert_eq!(CacheConfig::default().max_entries, 10);

        unsafe { std::env::set_var("MUNINN_MAX_ENTRIES", "32") };
        assert_eq!(CacheConfig::default().max_entries, 32);

        unsafe { std::env::set_var("MUNINN_MAX_ENTRIES", "not a number") };
        assert_eq!(CacheConfig::default().max_entries, 10);

        unsafe { std::env::remove_var("MUNINN_MAX_ENTRIES") };
        assert_eq!(CacheConfig::default().max_entries, 10);
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = CacheConfig::new().max_entries(0);
        let result = PromptCache::<String>::new(&config);
        assert!(matches!(result, Err(MuninnError::Configuration(_))));
    }

    #[test]
    fn trim_hooks_debug_is_opaque() {
        let hooks = TrimHooks::<Vec<u32>>::new(|_| true, |_, _| {});
        assert_eq!(format!("{hooks:?}"), "TrimHooks { .. }");
    }
}
