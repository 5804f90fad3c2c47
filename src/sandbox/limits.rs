//! Resource limiting for sandboxed runs.

use wasmtime::{ResourceLimiter, Store};

/// Limiter enforcing memory and table size caps on a single run.
pub struct GuestLimiter {
    /// Maximum memory in bytes.
    max_memory: u64,
    /// Current memory allocation.
    current_memory: u64,
    /// Maximum table elements.
    max_table_elements: u64,
    /// Whether a limit has been exceeded.
    limit_exceeded: bool,
}

impl GuestLimiter {
    /// Create a new limiter with the specified memory cap.
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            current_memory: 0,
            max_table_elements: 10_000,
            limit_exceeded: false,
        }
    }

    /// Check if any limit has been exceeded.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Get the current memory usage.
    pub fn current_memory(&self) -> u64 {
        self.current_memory
    }

    /// Get the configured maximum memory.
    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }
}

impl ResourceLimiter for GuestLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired_bytes = desired as u64;

        if desired_bytes > self.max_memory {
            self.limit_exceeded = true;
            return Ok(false);
        }

        self.current_memory = desired_bytes;
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_table_elements {
            self.limit_exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Per-run store data: the limiter plus the run's WASI context.
///
/// A fresh `RunStore` is created for every execution request; nothing in
/// it survives into the next run.
pub struct RunStore {
    /// The resource limiter.
    pub limiter: GuestLimiter,
    /// WASI Preview 1 context for the run.
    pub wasi: wasmtime_wasi::preview1::WasiP1Ctx,
}

impl RunStore {
    /// Create store data with the given memory limit and WASI context.
    pub fn new(max_memory: u64, wasi: wasmtime_wasi::preview1::WasiP1Ctx) -> Self {
        Self {
            limiter: GuestLimiter::new(max_memory),
            wasi,
        }
    }
}

/// Extension trait for Store to configure resource limiting.
pub trait StoreLimiterExt {
    /// Configure the store with resource limiting enabled.
    fn configure_limiter(&mut self);
}

impl StoreLimiterExt for Store<RunStore> {
    fn configure_limiter(&mut self) {
        self.limiter(|data| &mut data.limiter);
    }
}
