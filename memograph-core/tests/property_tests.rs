use std::convert::Infallible;

use proptest::prelude::*;
use memograph_core::cache::{LruCache, Parallel, Policy, Serial, TaskParallel};

const KEYS: u32 = 32;

#[derive(Debug, Clone)]
enum Op {
    Set(u32, u32),
    Get(u32, u32),
    Erase(u32),
    SetMaxCost(u32),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..KEYS, 0u32..40).prop_map(|(key, cost)| Op::Set(key, cost)),
        4 => (0..KEYS, 0u32..40).prop_map(|(key, cost)| Op::Get(key, cost)),
        1 => (0..KEYS).prop_map(Op::Erase),
        1 => (10u32..200).prop_map(Op::SetMaxCost),
        1 => Just(Op::Clear),
    ]
}

/// Runs `ops` against a cache whose values equal their costs, checking
/// after each step that the cost is within budget and equals the sum of
/// what is actually cached.
fn check_cost_accounting<P: Policy>(ops: &[Op]) -> Result<(), TestCaseError> {
    let cache: LruCache<u32, u32, u32, P> = LruCache::with_max_cost(100);

    for op in ops {
        match *op {
            Op::Set(key, cost) => {
                let cached = cache.set(&key, cost, cost);
                prop_assert_eq!(cached, cost <= cache.max_cost());
            }
            Op::Get(key, cost) => {
                let value = cache.get_with(&key, false, |_| Ok::<_, Infallible>((cost, cost)));
                prop_assert!(value.is_ok());
            }
            Op::Erase(key) => {
                cache.erase(&key);
                prop_assert!(!cache.cached(&key));
            }
            Op::SetMaxCost(max_cost) => cache.set_max_cost(max_cost),
            Op::Clear => {
                cache.clear();
                prop_assert_eq!(cache.current_cost(), 0);
            }
        }

        prop_assert!(cache.current_cost() <= cache.max_cost());

        let cached_total: u32 = (0..KEYS).filter_map(|key| cache.get_if_cached(&key)).sum();
        prop_assert_eq!(cached_total, cache.current_cost());
    }
    Ok(())
}

proptest! {
    #[test]
    fn serial_cost_accounting(ops in prop::collection::vec(op(), 1..200)) {
        check_cost_accounting::<Serial>(&ops)?;
    }

    #[test]
    fn parallel_cost_accounting(ops in prop::collection::vec(op(), 1..200)) {
        check_cost_accounting::<Parallel>(&ops)?;
    }

    #[test]
    fn task_parallel_cost_accounting(ops in prop::collection::vec(op(), 1..200)) {
        check_cost_accounting::<TaskParallel>(&ops)?;
    }

    #[test]
    fn get_returns_the_stored_value(key in 0..KEYS, value in 0u32..50) {
        let cache: LruCache<u32, u32, u32, Parallel> = LruCache::with_max_cost(100);
        prop_assert!(cache.set(&key, value, 1));
        let fetched = cache.get_with(&key, false, |_| Ok::<_, Infallible>((value + 1, 1)));
        prop_assert_eq!(fetched, Ok(value));
    }
}
