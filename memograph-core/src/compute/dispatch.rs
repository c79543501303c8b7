//! Process Dispatch
//!
//! [`ProcessCache`] routes each hash and compute request to the cache its
//! node's policy asks for:
//!
//! | Policy         | Hash                      | Compute                     |
//! |----------------|---------------------------|-----------------------------|
//! | `Uncached`     | call the node             | call the node               |
//! | `Serial`       | per-thread serial cache   | rejected                    |
//! | `Parallel`     | shared parallel cache     | shared parallel cache       |
//! | `TaskParallel` | shared task-parallel cache| shared task-parallel cache, |
//! |                |                           | run as task-spawning        |
//!
//! # Per-Thread Hash Caches
//!
//! Serial hash caches live in thread-local storage, one per thread, and
//! belong to the last `ProcessCache` the thread served. Serving a different
//! process cache empties it and adopts that cache's budget.
//! [`ProcessCache::clear`] cannot reach other threads' caches directly. It
//! bumps the process cache's epoch instead, and each thread clears its own
//! cache the next time it serves that process cache and sees the epoch has
//! moved.

use std::cell::{Cell, OnceCell};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::context::Context;
use super::policy::CachePolicy;
use super::process::{ComputeNode, OutputId, ProcessKey};
use crate::cache::{CacheBuilder, LruCache, Parallel, Policy, Serial, TaskParallel};
use crate::config::ProcessCacheConfig;
use crate::error::{CacheError, DispatchError};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(0);

type SerialHashCache = LruCache<ProcessKey, u64, usize, Serial>;

/// The process cache a thread's serial hashes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    id: u64,
    epoch: u64,
}

struct SerialHashes {
    owner: Cell<Option<Owner>>,
    cache: OnceCell<SerialHashCache>,
}

impl SerialHashes {
    fn cache(&self, owner: Owner, max_cost: usize) -> &SerialHashCache {
        let cache = self
            .cache
            .get_or_init(|| SerialHashCache::with_max_cost(max_cost));

        let previous = self.owner.replace(Some(owner));
        if previous != Some(owner) {
            if previous.is_some() {
                cache.clear();
            }
            if cache.max_cost() != max_cost {
                cache.set_max_cost(max_cost);
            }
        }
        cache
    }
}

thread_local! {
    static SERIAL_HASHES: SerialHashes = const {
        SerialHashes {
            owner: Cell::new(None),
            cache: OnceCell::new(),
        }
    };
}

/// The caches behind hash and compute requests.
pub struct ProcessCache<V: Clone> {
    hashes: LruCache<ProcessKey, u64, usize, Parallel>,
    task_hashes: LruCache<ProcessKey, u64, usize, TaskParallel>,
    values: LruCache<ProcessKey, V, usize, Parallel>,
    task_values: LruCache<ProcessKey, V, usize, TaskParallel>,
    serial_hash_max_cost: usize,
    id: u64,
    /// Bumped by `clear`; threads clear their serial hashes when it moves.
    epoch: AtomicU64,
}

impl<V: Clone> ProcessCache<V> {
    pub fn new(config: &ProcessCacheConfig) -> Result<Self, CacheError> {
        debug!(?config, "creating process cache");
        Ok(Self {
            hashes: shared_cache(config, config.hash_cache_max_cost)?,
            task_hashes: shared_cache(config, config.hash_cache_max_cost)?,
            values: shared_cache(config, config.value_cache_max_cost)?,
            task_values: shared_cache(config, config.value_cache_max_cost)?,
            serial_hash_max_cost: config.serial_hash_cache_max_cost,
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            epoch: AtomicU64::new(0),
        })
    }

    /// The hash of `output` in `context`, cached per the node's hash policy.
    pub fn hash<N>(&self, node: &N, output: OutputId, context: &Context) -> u64
    where
        N: ComputeNode + ?Sized,
    {
        let compute = |key: &ProcessKey| Ok::<_, Infallible>((node.hash(key.output, &key.context), 1));
        let key = ProcessKey::new(output, context.clone());

        let result = match node.hash_cache_policy(output) {
            CachePolicy::Uncached => return node.hash(output, context),
            CachePolicy::Serial => SERIAL_HASHES.with(|local| {
                let owner = Owner {
                    id: self.id,
                    epoch: self.epoch.load(Ordering::Acquire),
                };
                local
                    .cache(owner, self.serial_hash_max_cost)
                    .get_with(&key, false, compute)
            }),
            CachePolicy::Parallel => self.hashes.get_with(&key, false, compute),
            CachePolicy::TaskParallel => self.task_hashes.get_with(&key, true, compute),
        };
        result.unwrap_or_else(|never| match never {})
    }

    /// The value of `output` in `context`, cached per the node's compute
    /// policy. Errors from the node are returned unchanged.
    pub fn value<N>(&self, node: &N, output: OutputId, context: &Context) -> Result<V, N::Error>
    where
        N: ComputeNode<Value = V> + ?Sized,
    {
        let compute = |key: &ProcessKey| node.compute(key.output, &key.context);

        match node.compute_cache_policy(output) {
            CachePolicy::Uncached => node.compute(output, context).map(|(value, _)| value),
            CachePolicy::Serial => Err(DispatchError::SerialValueCompute { output }.into()),
            CachePolicy::Parallel => {
                self.values
                    .get_with(&ProcessKey::new(output, context.clone()), false, compute)
            }
            CachePolicy::TaskParallel => {
                self.task_values
                    .get_with(&ProcessKey::new(output, context.clone()), true, compute)
            }
        }
    }

    /// Empty every cache, including every thread's serial hash cache.
    pub fn clear(&self) {
        debug!("clearing process caches");
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.hashes.clear();
        self.task_hashes.clear();
        self.values.clear();
        self.task_values.clear();
    }

    /// Set the budget of each shared value cache.
    pub fn set_value_cache_max_cost(&self, max_cost: usize) {
        self.values.set_max_cost(max_cost);
        self.task_values.set_max_cost(max_cost);
    }

    pub fn value_cache_max_cost(&self) -> usize {
        self.values.max_cost()
    }

    /// Set the budget of each shared hash cache.
    pub fn set_hash_cache_max_cost(&self, max_cost: usize) {
        self.hashes.set_max_cost(max_cost);
        self.task_hashes.set_max_cost(max_cost);
    }

    /// Total cost held by the shared value caches.
    pub fn value_cache_cost(&self) -> usize {
        self.values.current_cost() + self.task_values.current_cost()
    }

    /// Number of hashes held by the shared hash caches.
    pub fn hash_cache_cost(&self) -> usize {
        self.hashes.current_cost() + self.task_hashes.current_cost()
    }
}

fn shared_cache<V, P>(
    config: &ProcessCacheConfig,
    max_cost: usize,
) -> Result<LruCache<ProcessKey, V, usize, P>, CacheError>
where
    V: Clone,
    P: Policy,
{
    let mut builder = CacheBuilder::new(max_cost);
    if let Some(bins) = config.bins {
        builder = builder.bins(bins);
    }
    builder.build::<P>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    enum NodeError {
        Dispatch(DispatchError),
        Failed,
    }

    impl From<DispatchError> for NodeError {
        fn from(error: DispatchError) -> Self {
            Self::Dispatch(error)
        }
    }

    /// Doubles the frame, counting how often it is asked to.
    struct Doubler {
        policy: CachePolicy,
        hashes: AtomicUsize,
        computes: AtomicUsize,
    }

    impl Doubler {
        fn new(policy: CachePolicy) -> Self {
            Self {
                policy,
                hashes: AtomicUsize::new(0),
                computes: AtomicUsize::new(0),
            }
        }
    }

    impl ComputeNode for Doubler {
        type Value = f64;
        type Error = NodeError;

        fn hash_cache_policy(&self, _output: OutputId) -> CachePolicy {
            self.policy
        }

        fn compute_cache_policy(&self, _output: OutputId) -> CachePolicy {
            self.policy
        }

        fn hash(&self, output: OutputId, context: &Context) -> u64 {
            self.hashes.fetch_add(1, Ordering::SeqCst);
            output.raw() ^ context.hash_value()
        }

        fn compute(&self, _output: OutputId, context: &Context) -> Result<(f64, usize), NodeError> {
            self.computes.fetch_add(1, Ordering::SeqCst);
            if context.frame() < 0.0 {
                return Err(NodeError::Failed);
            }
            Ok((context.frame() * 2.0, 1))
        }
    }

    fn process_cache() -> ProcessCache<f64> {
        ProcessCache::new(&ProcessCacheConfig::default()).unwrap()
    }

    #[test]
    fn uncached_policy_always_calls_the_node() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::Uncached);
        let output = OutputId::new();
        let context = Context::new().with_frame(3.0);

        assert_eq!(cache.value(&node, output, &context), Ok(6.0));
        assert_eq!(cache.value(&node, output, &context), Ok(6.0));
        assert_eq!(node.computes.load(Ordering::SeqCst), 2);

        cache.hash(&node, output, &context);
        cache.hash(&node, output, &context);
        assert_eq!(node.hashes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cached_policies_compute_once_per_context() {
        for policy in [CachePolicy::Parallel, CachePolicy::TaskParallel] {
            let cache = process_cache();
            let node = Doubler::new(policy);
            let output = OutputId::new();
            let one = Context::new().with_frame(1.0);
            let two = Context::new().with_frame(2.0);

            assert_eq!(cache.value(&node, output, &one), Ok(2.0));
            assert_eq!(cache.value(&node, output, &one), Ok(2.0));
            assert_eq!(cache.value(&node, output, &two), Ok(4.0));
            assert_eq!(node.computes.load(Ordering::SeqCst), 2);
            assert_eq!(cache.value_cache_cost(), 2);

            let first = cache.hash(&node, output, &one);
            assert_eq!(cache.hash(&node, output, &one), first);
            assert_eq!(node.hashes.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn serial_hashes_are_cached_per_thread() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::Serial);
        let output = OutputId::new();
        let context = Context::new();

        let first = cache.hash(&node, output, &context);
        assert_eq!(cache.hash(&node, output, &context), first);
        assert_eq!(node.hashes.load(Ordering::SeqCst), 1);

        std::thread::scope(|scope| {
            scope.spawn(|| cache.hash(&node, output, &context));
        });
        assert_eq!(node.hashes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn serial_hashes_belong_to_the_last_cache_served() {
        let small = ProcessCache::<f64>::new(&ProcessCacheConfig {
            serial_hash_cache_max_cost: 5,
            ..ProcessCacheConfig::default()
        })
        .unwrap();
        let large = ProcessCache::<f64>::new(&ProcessCacheConfig {
            serial_hash_cache_max_cost: 50,
            ..ProcessCacheConfig::default()
        })
        .unwrap();
        let node = Doubler::new(CachePolicy::Serial);
        let output = OutputId::new();
        let context = Context::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..10 {
                    small.hash(&node, output, &context);
                    large.hash(&node, output, &context);
                }
                SERIAL_HASHES.with(|local| {
                    assert_eq!(local.owner.get().map(|owner| owner.id), Some(large.id));
                    assert_eq!(local.cache.get().map(|cache| cache.max_cost()), Some(50));
                });

                large.hash(&node, output, &context);
            });
        });

        // Every switch between caches starts afresh; repeats on one cache hit.
        assert_eq!(node.hashes.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn serial_value_requests_are_rejected() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::Serial);
        let output = OutputId::new();

        let result = cache.value(&node, output, &Context::new());
        assert_eq!(
            result,
            Err(NodeError::Dispatch(DispatchError::SerialValueCompute { output }))
        );
        assert_eq!(node.computes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn node_errors_pass_through_uncached() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::TaskParallel);
        let output = OutputId::new();
        let context = Context::new().with_frame(-1.0);

        assert_eq!(cache.value(&node, output, &context), Err(NodeError::Failed));
        assert_eq!(cache.value(&node, output, &context), Err(NodeError::Failed));
        assert_eq!(node.computes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.value_cache_cost(), 0);
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::Serial);
        let output = OutputId::new();
        let context = Context::new();

        cache.hash(&node, output, &context);
        cache.clear();
        cache.hash(&node, output, &context);
        assert_eq!(node.hashes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn value_cache_budget_is_forwarded() {
        let cache = process_cache();
        let node = Doubler::new(CachePolicy::Parallel);
        let output = OutputId::new();
        for frame in 0..10 {
            cache.value(&node, output, &Context::new().with_frame(frame as f64)).unwrap();
        }

        cache.set_value_cache_max_cost(3);
        assert_eq!(cache.value_cache_max_cost(), 3);
        assert!(cache.value_cache_cost() <= 3);
    }
}
