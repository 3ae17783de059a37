use crate::error::SyncError;

/// Compares the view service's progress against the ledger and consensus.
///
/// Heights are fed in by whoever learns them; the coordinator reports the
/// view service's `highest_processed_block_count` after every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncChecker {
    view_block_count: u64,
    ledger_block_count: u64,
    consensus_block_count: u64,
    max_allowed_block_delta: u64,
}

impl SyncChecker {
    pub fn new(max_allowed_block_delta: u64) -> Self {
        Self {
            view_block_count: 0,
            ledger_block_count: 0,
            consensus_block_count: 0,
            max_allowed_block_delta,
        }
    }

    pub fn view_block_count(&self) -> u64 {
        self.view_block_count
    }

    pub fn ledger_block_count(&self) -> u64 {
        self.ledger_block_count
    }

    pub fn consensus_block_count(&self) -> u64 {
        self.consensus_block_count
    }

    pub fn set_view_block_count(&mut self, count: u64) {
        self.view_block_count = count;
    }

    pub fn set_ledger_block_count(&mut self, count: u64) {
        self.ledger_block_count = count;
    }

    pub fn set_consensus_block_count(&mut self, count: u64) {
        self.consensus_block_count = count;
    }

    /// Highest block both the view service and the ledger have reached.
    pub fn current_block_count(&self) -> u64 {
        self.ledger_block_count.min(self.view_block_count)
    }

    pub fn in_sync(&self) -> Result<(), SyncError> {
        let (view, ledger) = (self.view_block_count, self.ledger_block_count);
        if view.abs_diff(ledger) > self.max_allowed_block_delta {
            return Err(SyncError::ViewLedgerOutOfSync { view, ledger });
        }

        // Consensus running behind is fine; only a lead matters.
        let current = self.current_block_count();
        let consensus = self.consensus_block_count;
        if consensus > current && consensus - current > self.max_allowed_block_delta {
            return Err(SyncError::ConsensusOutOfSync { consensus, current });
        }

        Ok(())
    }
}

impl Default for SyncChecker {
    fn default() -> Self {
        Self::new(10)
    }
}
