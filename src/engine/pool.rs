// src/engine/pool.rs
//
// Worker pool management for background load/save tasks.
//
// One global pool is shared by every executor that does not ask for its own.
// Load and save are dominated by codec work, so the pool stays small:
// - STAGED_IMAGE_WORKERS overrides the size when set to a positive integer
// - otherwise available_parallelism(), capped at DEFAULT_MAX_WORKERS
//
// The pool is initialized lazily on first use; changing the variable
// afterwards has no effect.

use crate::error::{Result, StagedImageError};
use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::debug;

pub const WORKERS_ENV: &str = "STAGED_IMAGE_WORKERS";

/// Upper bound on the default worker count
const DEFAULT_MAX_WORKERS: usize = 4;

/// Minimum number of workers
const MIN_WORKERS: usize = 1;

pub const DEFAULT_THREAD_NAME: &str = "staged-image";

static GLOBAL_THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();

pub fn get_pool() -> Result<&'static ThreadPool> {
    if let Some(pool) = GLOBAL_THREAD_POOL.get() {
        return Ok(pool);
    }
    let pool = build_pool(default_worker_count(), DEFAULT_THREAD_NAME)?;
    // A racing initializer may win; its pool is used and ours is dropped.
    Ok(GLOBAL_THREAD_POOL.get_or_init(|| pool))
}

/// Build a dedicated pool with `workers` threads named `{name}-{i}`.
pub fn build_pool(workers: usize, name: &str) -> Result<ThreadPool> {
    let workers = workers.max(MIN_WORKERS);
    debug!(workers, name, "building worker pool");
    let name = name.to_string();
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .map_err(|e| StagedImageError::executor(format!("failed to build worker pool: {e}")))
}

pub fn default_worker_count() -> usize {
    env_worker_count().unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKERS)
            .min(DEFAULT_MAX_WORKERS)
    })
}

fn env_worker_count() -> Option<usize> {
    std::env::var(WORKERS_ENV)
        .ok()
        .and_then(|raw| parse_worker_count(&raw))
}

fn parse_worker_count(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|&n| n >= MIN_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_zero_and_garbage() {
        assert_eq!(parse_worker_count("3"), Some(3));
        assert_eq!(parse_worker_count(" 8 "), Some(8));
        assert_eq!(parse_worker_count("0"), None);
        assert_eq!(parse_worker_count("many"), None);
    }

    #[test]
    fn default_count_is_bounded() {
        let n = default_worker_count();
        assert!(n >= MIN_WORKERS);
    }

    #[test]
    fn dedicated_pool_has_requested_size() {
        let pool = build_pool(2, DEFAULT_THREAD_NAME).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        let pool = build_pool(0, DEFAULT_THREAD_NAME).unwrap();
        assert_eq!(pool.current_num_threads(), 1);
    }

    #[test]
    fn dedicated_pool_threads_use_prefix() {
        let pool = build_pool(1, "decode-worker").unwrap();
        let name = pool.install(|| std::thread::current().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("decode-worker-0"));
    }

    #[test]
    fn global_pool_is_shared() {
        let a = get_pool().unwrap() as *const ThreadPool;
        let b = get_pool().unwrap() as *const ThreadPool;
        assert_eq!(a, b);
    }
}
