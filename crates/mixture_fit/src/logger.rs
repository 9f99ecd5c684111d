//! Observability sinks invoked once per E/M iteration.

use std::sync::{Arc, Mutex, PoisonError};

pub trait FitLogger: Send {
    fn log(&mut self, level: usize, iteration: usize, loss: f64);
}

/// Emits a `tracing` debug event per iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl FitLogger for TracingLogger {
    fn log(&mut self, level: usize, iteration: usize, loss: f64) {
        tracing::debug!(level, iteration, loss, "em iteration");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl FitLogger for NullLogger {
    fn log(&mut self, _level: usize, _iteration: usize, _loss: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEntry {
    pub level: usize,
    pub iteration: usize,
    pub loss: f64,
}

/// Records every call. Clones share the same buffer, so a caller can hand one
/// clone to the fitter and read the history from another.
#[derive(Debug, Default, Clone)]
pub struct LossHistory {
    entries: Arc<Mutex<Vec<LossEntry>>>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LossEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn for_level(&self, level: usize) -> Vec<LossEntry> {
        self.entries().into_iter().filter(|e| e.level == level).collect()
    }
}

impl FitLogger for LossHistory {
    fn log(&mut self, level: usize, iteration: usize, loss: f64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LossEntry { level, iteration, loss });
    }
}
