// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-backend token accounting for one orchestration batch.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::types::BackendKind;
use crate::types::TokenUsage;

/// Snapshot of the accumulated usage per backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub process: TokenUsage,
    pub api: TokenUsage,
}

impl UsageTotals {
    pub fn for_backend(&self, backend: BackendKind) -> TokenUsage {
        match backend {
            BackendKind::ProcessBackend => self.process,
            BackendKind::ApiBackend => self.api,
        }
    }

    pub fn combined(&self) -> TokenUsage {
        let mut total = self.process;
        total.add(self.api);
        total
    }
}

/// Monotonic counters, owned by an orchestrator and reset once per batch.
#[derive(Debug, Default)]
pub struct TokenAccumulator {
    totals: Mutex<UsageTotals>,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter. Only the start of a batch calls this.
    pub fn reset(&self) {
        *self.lock() = UsageTotals::default();
    }

    /// Add one finished run's usage.
    pub fn record(&self, backend: BackendKind, usage: TokenUsage) {
        let mut totals = self.lock();
        match backend {
            BackendKind::ProcessBackend => totals.process.add(usage),
            BackendKind::ApiBackend => totals.api.add(usage),
        }
    }

    pub fn snapshot(&self) -> UsageTotals {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, UsageTotals> {
        // Counters stay valid even if a holder panicked.
        self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_per_backend() {
        let acc = TokenAccumulator::new();
        acc.record(BackendKind::ProcessBackend, TokenUsage::new(10, 5));
        acc.record(BackendKind::ApiBackend, TokenUsage::new(100, 50));
        acc.record(BackendKind::ApiBackend, TokenUsage::new(1, 1));

        let totals = acc.snapshot();
        assert_eq!(totals.process, TokenUsage::new(10, 5));
        assert_eq!(totals.api, TokenUsage::new(101, 51));
        assert_eq!(totals.combined().total(), 167);
        assert_eq!(totals.for_backend(BackendKind::ApiBackend).output_tokens, 51);
    }

    #[test]
    fn test_reset() {
        let acc = TokenAccumulator::new();
        acc.record(BackendKind::ProcessBackend, TokenUsage::new(10, 5));
        acc.reset();
        assert_eq!(acc.snapshot(), UsageTotals::default());
    }
}
