//! Batch planning, provider alternation, and request pacing.
//!
//! Symbols are processed in fixed-size batches, strictly in sequence. The
//! scheduler owns two pieces of run-scoped mutable state: which provider side
//! the next fetch uses, and the rolling rate window. Pacing runs before each
//! dispatch; once a window's batch budget is spent, the scheduler blocks
//! until the window has fully elapsed and then starts a new one. Time is
//! injected through [`Clock`] so pacing is testable without real sleeps.

use std::time::{Duration, Instant};

use crate::provider::ProviderKind;

/// One ordered group of symbols dispatched against a single provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolBatch {
    pub index: usize,
    pub symbols: Vec<String>,
}

impl SymbolBatch {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Boundary symbols, for log messages.
    pub fn label(&self) -> String {
        match (self.symbols.first(), self.symbols.last()) {
            (Some(first), Some(last)) if first != last => format!("{first} to {last}"),
            (Some(only), _) => only.clone(),
            _ => String::from("<empty>"),
        }
    }
}

/// Partition a symbol list into batches of at most `batch_size`, in order.
pub fn plan_batches(symbols: &[String], batch_size: usize) -> Vec<SymbolBatch> {
    symbols
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| SymbolBatch {
            index,
            symbols: chunk.to_vec(),
        })
        .collect()
}

/// Time source for pacing. Production uses [`SystemClock`]; tests drive a
/// manual clock forward.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Rate budget: at most `batch_limit` dispatches per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub batch_limit: u32,
    pub window: Duration,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            batch_limit: 6,
            window: Duration::from_secs(62),
        }
    }
}

/// Mutable scheduling state threaded through the batch loop.
#[derive(Debug)]
pub struct SchedulerState {
    next_provider: ProviderKind,
    window_start: Instant,
    batches_since_reset: u32,
    budget: RateBudget,
}

impl SchedulerState {
    pub fn new(first_provider: ProviderKind, budget: RateBudget, clock: &dyn Clock) -> Self {
        Self {
            next_provider: first_provider,
            window_start: clock.now(),
            batches_since_reset: 0,
            budget,
        }
    }

    /// The side the next fetch should use.
    pub fn current_provider(&self) -> ProviderKind {
        self.next_provider
    }

    /// Hand the next batch to the other side. Called only after a successful
    /// fetch; a failed fetch retries the same side on the following batch.
    pub fn flip_provider(&mut self) {
        self.next_provider = self.next_provider.other();
    }

    /// Block until the rate window allows another dispatch.
    ///
    /// Runs before every batch. Once the window's budget is spent, waits out
    /// the remainder of the window (if any) and starts a fresh one. Returns
    /// the slept duration for progress output.
    pub fn pace(&mut self, clock: &dyn Clock) -> Option<Duration> {
        if self.batches_since_reset < self.budget.batch_limit {
            return None;
        }

        let elapsed = clock.now().duration_since(self.window_start);
        let slept = if elapsed < self.budget.window {
            let wait = self.budget.window - elapsed;
            clock.sleep(wait);
            Some(wait)
        } else {
            None
        };

        self.window_start = clock.now();
        self.batches_since_reset = 0;
        slept
    }

    /// Count a dispatch against the current window.
    pub fn record_dispatch(&mut self) {
        self.batches_since_reset += 1;
    }

    /// Dispatches counted against the current window so far.
    pub fn batches_in_window(&self) -> u32 {
        self.batches_since_reset
    }
}
