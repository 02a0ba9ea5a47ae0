//! Run-scoped correction budget.

use serde::{Deserialize, Serialize};

/// Counts corrections applied during one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionBudget {
    limit: usize,
    used: usize,
}

impl CorrectionBudget {
    /// Create a budget allowing `limit` corrections.
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Take one unit. Returns false (and takes nothing) when exhausted.
    pub fn consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }

    /// Units left.
    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    /// Units taken so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total allowance.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Check whether nothing is left.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}
