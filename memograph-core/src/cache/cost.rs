//! Cost Accounting
//!
//! Every cached value carries a cost, and a cache's current cost is the sum
//! of the costs of its cached entries. Costs are unsigned integers so the
//! running total can live in a matching atomic.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// An unsigned integer usable as a cache cost.
pub trait Cost: Copy + Ord + Default + fmt::Debug + Send + Sync + 'static {
    /// The atomic type holding running totals of this cost.
    type Atomic: fmt::Debug + Send + Sync;

    fn new_atomic(value: Self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic) -> Self;
    fn store(atomic: &Self::Atomic, value: Self);
    fn fetch_add(atomic: &Self::Atomic, value: Self);
    fn fetch_sub(atomic: &Self::Atomic, value: Self);

    fn is_zero(self) -> bool {
        self == Self::default()
    }
}

macro_rules! impl_cost {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl Cost for $ty {
                type Atomic = $atomic;

                fn new_atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                fn load(atomic: &Self::Atomic) -> Self {
                    atomic.load(Ordering::Acquire)
                }

                fn store(atomic: &Self::Atomic, value: Self) {
                    atomic.store(value, Ordering::Release);
                }

                fn fetch_add(atomic: &Self::Atomic, value: Self) {
                    atomic.fetch_add(value, Ordering::AcqRel);
                }

                fn fetch_sub(atomic: &Self::Atomic, value: Self) {
                    let previous = atomic.fetch_sub(value, Ordering::AcqRel);
                    debug_assert!(previous >= value, "cache cost underflow");
                }
            }
        )*
    };
}

impl_cost!(
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_track_additions_and_removals() {
        let total = usize::new_atomic(0);
        usize::fetch_add(&total, 10);
        usize::fetch_add(&total, 5);
        usize::fetch_sub(&total, 3);
        assert_eq!(usize::load(&total), 12);

        usize::store(&total, 1);
        assert_eq!(usize::load(&total), 1);
    }

    #[test]
    fn zero_detection() {
        assert!(0u8.is_zero());
        assert!(!7u64.is_zero());
    }
}
