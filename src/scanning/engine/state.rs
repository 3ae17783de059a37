use std::ops::Range;

use serde::Serialize;

use crate::config::{QueryScalingConfig, ScanConfig};
use crate::scanning::domain::epoch_set::{EpochSet, SearchAttempt};
use crate::scanning::engine::scaler::QueryScaler;
use crate::scanning::engine::types::ScanPhase;

/// Scan state for one account. Lives across scans.
#[derive(Debug, Default)]
pub struct ScanState {
    pub(crate) epochs: EpochSet,

    /// Block ranges the view service could not index; the caller has to scan
    /// them some other way.
    pub(crate) unscanned_missed_ranges: Vec<Range<u64>>,

    /// Where the next request resumes the service's event log.
    pub(crate) next_event_cursor: i64,
}

/// Point-in-time snapshot of a [`ScanState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub known_safe_block_count: u64,
    pub announced_block_count: u64,
    pub epoch_count: usize,
    pub active_epoch_count: usize,
    pub unscanned_missed_ranges: Vec<Range<u64>>,
    pub next_event_cursor: i64,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epochs(&self) -> &EpochSet {
        &self.epochs
    }

    pub fn unscanned_missed_ranges(&self) -> &[Range<u64>] {
        &self.unscanned_missed_ranges
    }

    pub fn next_event_cursor(&self) -> i64 {
        self.next_event_cursor
    }

    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            known_safe_block_count: self.epochs.global_known_safe_block_count(),
            announced_block_count: self.epochs.global_announced_block_count(),
            epoch_count: self.epochs.len(),
            active_epoch_count: self.epochs.active_count(),
            unscanned_missed_ranges: self.unscanned_missed_ranges.clone(),
            next_event_cursor: self.next_event_cursor,
        }
    }

    /// Drops ranges the caller has scanned by other means.
    ///
    /// Only exact matches are removed. Ranges are stored already clipped, so
    /// callers should pass back what [`unscanned_missed_ranges`] returned.
    ///
    /// [`unscanned_missed_ranges`]: ScanState::unscanned_missed_ranges
    pub fn mark_ranges_scanned(&mut self, ranges: &[Range<u64>]) {
        let before = self.unscanned_missed_ranges.len();
        self.unscanned_missed_ranges
            .retain(|pending| !ranges.contains(pending));
        log::debug!(
            "[STATE] {} missed ranges marked scanned, {} left",
            before - self.unscanned_missed_ranges.len(),
            self.unscanned_missed_ranges.len()
        );
    }

    pub(crate) fn advance_event_cursor(&mut self, next: i64) {
        if next > self.next_event_cursor {
            self.next_event_cursor = next;
        }
    }
}

/// Bookkeeping for one scan: phase, budget and convergence target.
#[derive(Debug)]
pub(crate) struct RoundState {
    pub phase: ScanPhase,
    pub scaling: QueryScalingConfig,
    pub scaler: QueryScaler,
    pub min_outputs_per_epoch: usize,

    /// `None` until the first response arrives, then pinned for the scan.
    pub target_block_count: Option<u64>,

    /// The attempt the in-flight request was built from.
    pub pending_attempt: Option<SearchAttempt>,

    pub rounds: u64,
    pub outputs_found: usize,
}

impl RoundState {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            phase: ScanPhase::Idle,
            scaling: config.query_scaling.clone(),
            scaler: QueryScaler::new(&config.query_scaling),
            min_outputs_per_epoch: config.min_outputs_per_epoch,
            target_block_count: None,
            pending_attempt: None,
            rounds: 0,
            outputs_found: 0,
        }
    }

    /// Back to a fresh scan, keeping the configuration.
    pub fn reset(&mut self) {
        self.phase = ScanPhase::Idle;
        self.reset_scaler();
        self.target_block_count = None;
        self.pending_attempt = None;
        self.rounds = 0;
        self.outputs_found = 0;
    }

    pub fn reset_scaler(&mut self) {
        self.scaler = QueryScaler::new(&self.scaling);
    }
}
