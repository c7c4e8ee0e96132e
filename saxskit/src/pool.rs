//! The process-wide worker pool.
//!
//! Built lazily on first use from the configured thread count; all parallel
//! work is structured as submit-batch-then-join inside [`install`].

use crate::settings::Settings;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;

fn pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = Settings::global().threads;
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("saxskit-worker-{i}"))
            .build()
            .expect("failed to build the worker pool")
    })
}

/// Runs `op` inside the process-wide pool. Panics in worker tasks are
/// captured by rayon and resurface here after all workers have joined.
pub fn install<R: Send>(op: impl FnOnce() -> R + Send) -> R {
    pool().install(op)
}

/// Number of threads in the process-wide pool.
#[must_use]
pub fn current_num_threads() -> usize {
    pool().current_num_threads()
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    #[test]
    fn install_joins_all_workers() {
        let sum: u64 = super::install(|| (0..1000u64).into_par_iter().sum());
        assert_eq!(sum, 499_500);
        assert!(super::current_num_threads() >= 1);
    }
}
