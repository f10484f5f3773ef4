//! Run-scoped log accumulation.
//!
//! Stages return their own log slice; the orchestrator concatenates them in
//! processing order. Entries are never reordered, and reports render them
//! verbatim.

use serde::{Deserialize, Serialize};

/// Ordered info and warning lines collected across one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub infos: Vec<String>,
    pub warnings: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.infos.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Append another log's entries after this one's, preserving order.
    pub fn absorb(&mut self, other: RunLog) {
        self.infos.extend(other.infos);
        self.warnings.extend(other.warnings);
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty() && self.warnings.is_empty()
    }
}
