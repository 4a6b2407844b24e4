//! Worker pool and the shared-array view used for lock-free accumulation.

use crate::error::{DpdError, Result};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::marker::PhantomData;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Bounded worker pool, created on first use and released by
/// [`WorkerPool::shutdown`] or on drop.
pub struct WorkerPool {
    tasks: usize,
    pool: OnceCell<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(tasks: usize) -> Result<Self> {
        if tasks == 0 {
            return Err(DpdError::config("task count must be at least 1"));
        }
        Ok(Self {
            tasks,
            pool: OnceCell::new(),
        })
    }

    pub fn tasks(&self) -> usize {
        self.tasks
    }

    pub fn is_parallel(&self) -> bool {
        self.tasks > 1
    }

    /// Runs `f` inside the pool so that rayon iterators in it use at most
    /// `tasks` threads. With a single task `f` runs on the calling thread.
    pub fn install<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        if !self.is_parallel() {
            return Ok(f());
        }
        let pool = self.pool.get_or_try_init(|| {
            log::debug!("starting worker pool with {} threads", self.tasks);
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.tasks)
                .thread_name(|i| format!("dpd-worker-{}", i))
                .build()
                .map_err(|e| DpdError::computation("worker pool", e.to_string()))
        })?;
        Ok(pool.install(f))
    }

    pub fn is_running(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Joins and drops the worker threads. Safe to call more than once; the
    /// pool restarts lazily if used again.
    pub fn shutdown(&mut self) {
        if self.pool.take().is_some() {
            log::debug!("worker pool shut down");
        }
    }
}

/// Splits `len` items into at most `tasks` contiguous ranges of at least
/// `min_per_task` items each (a single range when `len` is small).
pub fn split_ranges(len: usize, tasks: usize, min_per_task: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let min_per_task = min_per_task.max(1);
    let parts = tasks.max(1).min(len.div_ceil(min_per_task)).max(1);
    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for p in 0..parts {
        let size = base + usize::from(p < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Runs one batch of work, turning a panic in any task into
/// [`DpdError::Computation`] and logging every failure once.
pub fn guarded<T>(context: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(DpdError::computation(context, panic_message(payload.as_ref()))),
    };
    if let Err(e) = &result {
        log::error!("{} failed: {}", context, e);
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker task panicked: {}", s)
    } else {
        "worker task panicked".to_string()
    }
}

/// Mutable array shared across worker tasks without locks.
///
/// The pair engine only hands this to tasks whose write sets are disjoint:
/// cells inside one safe chunk never share a neighbor, bonds inside one bond
/// chunk never share a particle, and cached pairs are replayed per the chunk
/// they were recorded in.
pub struct SharedSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for SharedSlice<'_, T> {}
unsafe impl<T: Send> Sync for SharedSlice<'_, T> {}

impl<'a, T: Copy> SharedSlice<'a, T> {
    /// # Safety
    /// While the view is shared between threads, no two threads may touch the
    /// same index when at least one of them writes it.
    pub unsafe fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> T {
        assert!(i < self.len, "index {} out of bounds ({})", i, self.len);
        // SAFETY: bounds checked; exclusivity per index is the constructor's contract.
        unsafe { *self.ptr.add(i) }
    }

    #[inline(always)]
    pub fn set(&self, i: usize, value: T) {
        assert!(i < self.len, "index {} out of bounds ({})", i, self.len);
        // SAFETY: as in `get`.
        unsafe { *self.ptr.add(i) = value }
    }

    #[inline(always)]
    pub fn update(&self, i: usize, f: impl FnOnce(&mut T)) {
        assert!(i < self.len, "index {} out of bounds ({})", i, self.len);
        // SAFETY: as in `get`.
        unsafe { f(&mut *self.ptr.add(i)) }
    }
}
