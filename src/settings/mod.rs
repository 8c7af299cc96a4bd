//! # Hierarchical Settings Repository
//!
//! Maps wildcard address patterns to per-address values and resolves a
//! concrete address to the merged value of every pattern matching it, in
//! specificity order. A broker holds one repository per payload type
//! (address settings, security rules, ...) and queries it on every route
//! decision, so resolution is cached aggressively:
//!
//! - reads probe a concurrent cache WITHOUT taking any lock;
//! - on a miss the read lock is taken, the value recomputed, and the result
//!   inserted into the cache while still holding the read lock;
//! - every mutation takes the write lock and clears the WHOLE cache before
//!   touching the match set, so a racing reader that computed against the
//!   old match set can never re-insert a stale entry after the mutation
//!   becomes visible.
//!
//! Matches registered as immutable can be overwritten but never removed;
//! removal of one is a logged no-op.

mod address;
mod matching;

pub use address::{AddressFullPolicy, AddressSettings};
pub use matching::{
    compare_specificity, InvalidPattern, Match, ANY_WORDS_WILDCARD, SINGLE_WORD_WILDCARD,
};

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, error};

/// A value that can absorb settings from a less specific match.
///
/// `merge` pulls anything `self` leaves unset from `other`. The repository
/// folds matches from most to least specific with the most specific value as
/// the accumulator, so explicitly-set fields of a more specific pattern
/// always win over broader ones.
pub trait Mergeable {
    fn merge(&mut self, other: &Self);
}

/// Observer fired after any repository mutation that may change query
/// results. A panicking listener is logged and does not affect the mutation
/// or the other listeners.
///
/// `on_change` runs while the repository's write lock is held; listeners
/// must not query the repository from inside it.
pub trait HierarchicalRepositoryChangeListener: Send + Sync {
    fn on_change(&self);
}

struct MatchEntry<T> {
    pattern: Match,
    value: T,
}

struct RepositoryState<T> {
    matches: HashMap<String, MatchEntry<T>>,
    immutables: HashSet<String>,
    default_value: Option<T>,
    listeners: Vec<Arc<dyn HierarchicalRepositoryChangeListener>>,
}

/// Wildcard pattern repository with a coherent lock-free read cache.
pub struct HierarchicalRepository<T> {
    state: RwLock<RepositoryState<T>>,
    /// Resolved values, probed before the lock. Maintained under the read
    /// lock for inserts and cleared under the write lock before mutations.
    cache: DashMap<String, T>,
    merge_fn: Option<fn(&mut T, &T)>,
}

impl<T: Clone + Send + Sync + 'static> HierarchicalRepository<T> {
    /// A repository whose resolution returns the single most specific
    /// matching value, ignoring broader matches.
    pub fn new() -> Self {
        Self::with_merge_fn(None)
    }

    fn with_merge_fn(merge_fn: Option<fn(&mut T, &T)>) -> Self {
        HierarchicalRepository {
            state: RwLock::new(RepositoryState {
                matches: HashMap::new(),
                immutables: HashSet::new(),
                default_value: None,
                listeners: Vec::new(),
            }),
            cache: DashMap::new(),
            merge_fn,
        }
    }

    /// Register or overwrite `pattern`.
    pub fn add_match(&self, pattern: &str, value: T) -> Result<(), InvalidPattern> {
        self.add(pattern, value, false)
    }

    /// Register or overwrite `pattern` and mark it non-removable. Immutable
    /// matches come from the main broker configuration; removing them at
    /// runtime could break shutdown, so `remove_match` refuses.
    pub fn add_match_immutable(&self, pattern: &str, value: T) -> Result<(), InvalidPattern> {
        self.add(pattern, value, true)
    }

    fn add(&self, pattern: &str, value: T, immutable: bool) -> Result<(), InvalidPattern> {
        let compiled = Match::compile(pattern)?;
        let mut state = self.state.write();
        self.cache.clear();
        if immutable {
            state.immutables.insert(pattern.to_string());
        }
        state.matches.insert(
            pattern.to_string(),
            MatchEntry {
                pattern: compiled,
                value,
            },
        );
        Self::notify(&state.listeners);
        Ok(())
    }

    /// Remove `pattern`. Removing an immutable pattern is a logged no-op,
    /// not an error.
    pub fn remove_match(&self, pattern: &str) {
        let mut state = self.state.write();
        if state.immutables.contains(pattern) {
            debug!("Cannot remove immutable match '{}'", pattern);
            return;
        }
        self.cache.clear();
        state.matches.remove(pattern);
        Self::notify(&state.listeners);
    }

    /// Resolve `key` to the merged value of all matching patterns, falling
    /// back to the default. Pure read.
    pub fn get_match(&self, key: &str) -> Option<T> {
        if let Some(hit) = self.cache.get(key) {
            return Some(hit.clone());
        }

        let state = self.state.read();
        let mut matched: Vec<&MatchEntry<T>> = state
            .matches
            .values()
            .filter(|entry| entry.pattern.matches(key))
            .collect();
        matched.sort_by(|a, b| compare_specificity(&a.pattern, &b.pattern));

        let value = self
            .merge(&matched)
            .or_else(|| state.default_value.clone());
        if let Some(resolved) = &value {
            // Inserted under the read lock: a concurrent writer cannot clear
            // the cache between our computation and this insert.
            self.cache.insert(key.to_string(), resolved.clone());
        }
        value
    }

    /// Fold the specificity-ordered matches (most specific first) into one
    /// value. Without a merge function the most specific value stands alone.
    fn merge(&self, ordered: &[&MatchEntry<T>]) -> Option<T> {
        let (first, rest) = ordered.split_first()?;
        let mut accumulator = first.value.clone();
        if let Some(merge_fn) = self.merge_fn {
            for entry in rest {
                merge_fn(&mut accumulator, &entry.value);
            }
        }
        Some(accumulator)
    }

    /// Set the fallback returned when no pattern matches.
    pub fn set_default(&self, value: T) {
        let mut state = self.state.write();
        self.cache.clear();
        state.default_value = Some(value);
    }

    pub fn register_listener(&self, listener: Arc<dyn HierarchicalRepositoryChangeListener>) {
        self.state.write().listeners.push(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn HierarchicalRepositoryChangeListener>) {
        self.state
            .write()
            .listeners
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    /// Drop all patterns, listeners, and cached results. Patterns already
    /// marked immutable keep that mark if re-added later.
    pub fn clear(&self) {
        let mut state = self.state.write();
        self.cache.clear();
        state.listeners.clear();
        state.matches.clear();
    }

    pub fn clear_listeners(&self) {
        self.state.write().listeners.clear();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cached resolutions, observable for tests.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    fn notify(listeners: &[Arc<dyn HierarchicalRepositoryChangeListener>]) {
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_change())).is_err() {
                error!("Settings repository change listener panicked");
            }
        }
    }
}

impl<T: Clone + Mergeable + Send + Sync + 'static> HierarchicalRepository<T> {
    /// A repository that merges every matching value, most specific first,
    /// using [`Mergeable::merge`].
    pub fn merging() -> Self {
        Self::with_merge_fn(Some(T::merge as fn(&mut T, &T)))
    }
}

impl<T: Clone + Send + Sync + 'static> Default for HierarchicalRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Layers(Vec<&'static str>);

    impl Mergeable for Layers {
        fn merge(&mut self, other: &Self) {
            self.0.extend(other.0.iter().copied());
        }
    }

    struct CountingListener(AtomicUsize);

    impl HierarchicalRepositoryChangeListener for CountingListener {
        fn on_change(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_exact_match_returns_value() {
        let repo = HierarchicalRepository::new();
        repo.add_match("queues.orders", 7u32).unwrap();
        assert_eq!(repo.get_match("queues.orders"), Some(7));
        assert_eq!(repo.get_match("queues.other"), None);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let repo = HierarchicalRepository::new();
        let err = repo.add_match("queues..orders", 1u32).unwrap_err();
        assert_eq!(err, InvalidPattern("queues..orders".to_string()));
        assert_eq!(repo.get_match("queues.orders"), None);
    }

    #[test]
    fn test_most_specific_wins_without_merging() {
        let repo = HierarchicalRepository::new();
        repo.add_match("#", "multi").unwrap();
        repo.add_match("*.bar", "single").unwrap();
        repo.add_match("foo.bar", "exact").unwrap();
        assert_eq!(repo.get_match("foo.bar"), Some("exact"));
        assert_eq!(repo.get_match("baz.bar"), Some("single"));
        assert_eq!(repo.get_match("baz.qux"), Some("multi"));
    }

    #[test]
    fn test_merging_folds_most_specific_first() {
        let repo = HierarchicalRepository::merging();
        repo.add_match("#", Layers(vec!["multi"])).unwrap();
        repo.add_match("*.bar", Layers(vec!["single"])).unwrap();
        repo.add_match("foo.bar", Layers(vec!["exact"])).unwrap();

        // The accumulator is the exact match; broader matches are merged in
        // by decreasing specificity.
        assert_eq!(
            repo.get_match("foo.bar"),
            Some(Layers(vec!["exact", "single", "multi"]))
        );
    }

    #[test]
    fn test_default_used_when_nothing_matches() {
        let repo = HierarchicalRepository::new();
        repo.set_default(42u32);
        repo.add_match("queues.#", 1).unwrap();
        assert_eq!(repo.get_match("topics.news"), Some(42));
        assert_eq!(repo.get_match("queues.orders"), Some(1));
    }

    #[test]
    fn test_remove_match() {
        let repo = HierarchicalRepository::new();
        repo.add_match("queues.*", 1u32).unwrap();
        repo.add_match("queues.orders", 2).unwrap();
        assert_eq!(repo.get_match("queues.orders"), Some(2));

        repo.remove_match("queues.orders");
        assert_eq!(repo.get_match("queues.orders"), Some(1));
    }

    #[test]
    fn test_immutable_match_survives_removal_but_not_overwrite() {
        let repo = HierarchicalRepository::new();
        repo.add_match_immutable("queues.orders", 1u32).unwrap();

        repo.remove_match("queues.orders");
        assert_eq!(repo.get_match("queues.orders"), Some(1));

        repo.add_match("queues.orders", 2).unwrap();
        assert_eq!(repo.get_match("queues.orders"), Some(2));

        // Still immutable after the overwrite.
        repo.remove_match("queues.orders");
        assert_eq!(repo.get_match("queues.orders"), Some(2));
    }

    #[test]
    fn test_repeated_get_hits_cache() {
        let repo = HierarchicalRepository::new();
        repo.add_match("queues.#", 9u32).unwrap();
        assert_eq!(repo.cache_size(), 0);

        assert_eq!(repo.get_match("queues.a"), Some(9));
        assert_eq!(repo.cache_size(), 1);
        assert_eq!(repo.get_match("queues.a"), Some(9));
        assert_eq!(repo.cache_size(), 1);

        assert_eq!(repo.get_match("queues.b"), Some(9));
        assert_eq!(repo.cache_size(), 2);
    }

    #[test]
    fn test_mutations_clear_cache() {
        let repo = HierarchicalRepository::new();
        repo.add_match("queues.#", 1u32).unwrap();
        assert_eq!(repo.get_match("queues.a"), Some(1));
        assert_eq!(repo.cache_size(), 1);

        repo.add_match("queues.a", 2).unwrap();
        assert_eq!(repo.cache_size(), 0);
        assert_eq!(repo.get_match("queues.a"), Some(2));

        repo.set_default(0);
        assert_eq!(repo.cache_size(), 0);
    }

    #[test]
    fn test_listeners_fire_on_mutation() {
        let repo = HierarchicalRepository::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        repo.register_listener(listener.clone());

        repo.add_match("a.b", 1u32).unwrap();
        repo.remove_match("a.b");
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);

        let as_dyn: Arc<dyn HierarchicalRepositoryChangeListener> = listener.clone();
        repo.unregister_listener(&as_dyn);
        repo.add_match("a.b", 2).unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        struct PanickingListener;
        impl HierarchicalRepositoryChangeListener for PanickingListener {
            fn on_change(&self) {
                panic!("listener failure");
            }
        }

        let repo = HierarchicalRepository::new();
        let counter = Arc::new(CountingListener(AtomicUsize::new(0)));
        repo.register_listener(Arc::new(PanickingListener));
        repo.register_listener(counter.clone());

        repo.add_match("a.b", 1u32).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(repo.get_match("a.b"), Some(1));
    }

    #[test]
    fn test_clear_drops_patterns_listeners_and_cache() {
        let repo = HierarchicalRepository::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        repo.register_listener(listener.clone());
        repo.add_match("a.#", 1u32).unwrap();
        let fired = listener.0.load(Ordering::SeqCst);
        assert_eq!(repo.get_match("a.b"), Some(1));

        repo.clear();
        assert_eq!(repo.get_match("a.b"), None);
        assert_eq!(repo.cache_size(), 0);

        repo.add_match("a.#", 2).unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), fired);
    }
}
