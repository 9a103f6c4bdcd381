/// Concurrency management for TraceSift.
/// Configures the rayon pool used for parallel trace-pair comparison.

use anyhow::Result;
use tracing::info;

/// Initialize the global rayon thread pool.
///
/// `workers = 0` sizes the pool to all but one core so the importing thread
/// and the instrumented process keep some capacity.
pub fn init_thread_pool(workers: usize) -> Result<()> {
    let cores = num_cpus::get();
    let workers = if workers == 0 {
        std::cmp::max(1, cores - 1)
    } else {
        workers
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()?;

    info!(workers, cores, "initialized comparison thread pool");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_thread_pool_tolerates_reinit() {
        // The global pool may already be initialized by another test; a
        // second init returning Err is acceptable.
        let first = init_thread_pool(2);
        assert!(first.is_ok() || first.is_err());
    }
}
