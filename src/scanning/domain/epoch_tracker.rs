// Per-epoch keystream + coverage tracker

use std::collections::HashMap;

use crate::error::ScanError;
use crate::scanning::domain::keystream::Keystream;
use crate::scanning::types::{EpochId, ResultCode, SearchKey, SearchResult};

/// Search keys planned for one epoch in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSearchAttempt {
    pub search_keys: Vec<SearchKey>,
    /// Block index the service may start searching from for this epoch.
    pub cursor_block_index: u64,
}

/// Tracks search progress for a single epoch.
///
/// Owns the epoch's keystream. Search keys handed out by [`plan_attempt`]
/// are only previews; the keystream advances when a result for the *next*
/// expected key comes back `Found`.
///
/// [`plan_attempt`]: EpochTracker::plan_attempt
#[derive(Debug)]
pub struct EpochTracker {
    epoch_id: EpochId,
    keystream: Box<dyn Keystream>,
    start_block_index: u64,

    /// Number of blocks for which every output of this epoch's keystream is
    /// known to have been found.
    ///
    /// Starts at `start_block_index`: the first block the epoch covers is
    /// also the count of blocks that came before it. Raised to the server's
    /// processed horizon whenever a search misses.
    known_safe_block_count: u64,

    /// The service stopped ingesting into this epoch.
    decommissioned: bool,

    /// Cleared once the epoch is decommissioned and a miss has been seen
    /// since, i.e. every output it will ever have is known.
    active: bool,
}

/// Effect of one round's results on a tracker, computed without mutating it.
pub(crate) struct EpochOutcome {
    found: Vec<SearchResult>,
    keystream: Box<dyn Keystream>,
    known_safe_block_count: u64,
    deactivate: bool,
}

impl EpochOutcome {
    pub(crate) fn found(&self) -> &[SearchResult] {
        &self.found
    }
}

impl EpochTracker {
    pub fn new(epoch_id: EpochId, keystream: Box<dyn Keystream>, start_block_index: u64) -> Self {
        Self {
            epoch_id,
            keystream,
            start_block_index,
            known_safe_block_count: start_block_index,
            decommissioned: false,
            active: true,
        }
    }

    pub fn epoch_id(&self) -> EpochId {
        self.epoch_id
    }

    pub fn start_block_index(&self) -> u64 {
        self.start_block_index
    }

    pub fn known_safe_block_count(&self) -> u64 {
        self.known_safe_block_count
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of keystream outputs confirmed as found.
    pub fn outputs_consumed(&self) -> u64 {
        self.keystream.index()
    }

    pub(crate) fn mark_decommissioned(&mut self) {
        self.decommissioned = true;
    }

    /// Previews the next `num_outputs` search keys.
    ///
    /// Calling this repeatedly without consuming results returns the same keys.
    pub fn plan_attempt(&self, num_outputs: usize) -> EpochSearchAttempt {
        EpochSearchAttempt {
            search_keys: self.keystream.outputs(num_outputs),
            cursor_block_index: self.known_safe_block_count,
        }
    }

    /// Consumes search results in keystream order.
    ///
    /// Returns the `Found` results for consecutive keystream outputs, stopping
    /// at the first output that is missing from `results_by_token` or came
    /// back `NotFound`. On error the tracker is left untouched.
    pub fn consume_results(
        &mut self,
        results_by_token: &HashMap<SearchKey, SearchResult>,
        server_highest_processed_block_count: u64,
    ) -> Result<Vec<SearchResult>, ScanError> {
        let outcome =
            self.evaluate_results(results_by_token, server_highest_processed_block_count)?;
        Ok(self.apply(outcome))
    }

    pub(crate) fn evaluate_results(
        &self,
        results_by_token: &HashMap<SearchKey, SearchResult>,
        server_highest_processed_block_count: u64,
    ) -> Result<EpochOutcome, ScanError> {
        let mut keystream = self.keystream.clone_box();
        let mut found = Vec::new();
        let mut known_safe_block_count = self.known_safe_block_count;
        let mut deactivate = false;

        loop {
            let output = keystream.peek();

            let Some(result) = results_by_token.get(&output) else {
                // Either everything searched for was found, or this output
                // wasn't part of the attempt. Nothing more to learn here.
                log::trace!(
                    "[TRACKER] epoch {}: next output {} not in results",
                    self.epoch_id,
                    output
                );
                break;
            };

            match result.result_code {
                ResultCode::Found => {
                    found.push(result.clone());
                    keystream.advance();
                }
                ResultCode::NotFound => {
                    // The service processed `server_highest_processed_block_count`
                    // blocks before answering, so a miss means this epoch has
                    // nothing more for us below that count.
                    if server_highest_processed_block_count > known_safe_block_count {
                        known_safe_block_count = server_highest_processed_block_count;
                    }
                    if self.decommissioned {
                        deactivate = true;
                    }
                    break;
                }
                ResultCode::RateLimited => {
                    log::warn!("[TRACKER] epoch {}: search rate limited", self.epoch_id);
                    return Err(ScanError::ServerRateLimited(format!(
                        "search result for epoch {} was rate limited",
                        self.epoch_id
                    )));
                }
                code => {
                    log::error!(
                        "[TRACKER] epoch {}: unexpected result code {:?}",
                        self.epoch_id,
                        code
                    );
                    return Err(ScanError::InvalidServerResponse(format!(
                        "unexpected result code {:?} for epoch {}",
                        code, self.epoch_id
                    )));
                }
            }
        }

        Ok(EpochOutcome {
            found,
            keystream,
            known_safe_block_count,
            deactivate,
        })
    }

    pub(crate) fn apply(&mut self, outcome: EpochOutcome) -> Vec<SearchResult> {
        let EpochOutcome {
            found,
            keystream,
            known_safe_block_count,
            deactivate,
        } = outcome;

        if known_safe_block_count > self.known_safe_block_count {
            log::debug!(
                "[TRACKER] epoch {}: known safe block count {} -> {}",
                self.epoch_id,
                self.known_safe_block_count,
                known_safe_block_count
            );
            self.known_safe_block_count = known_safe_block_count;
        }
        if deactivate && self.active {
            log::info!(
                "[TRACKER] epoch {} decommissioned and exhausted, no longer searched",
                self.epoch_id
            );
            self.active = false;
        }
        self.keystream = keystream;

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanning::domain::crypto::ScanCrypto;
    use crate::scanning::types::EpochKey;
    use crate::scanning::view::sim::SimAccount;
    use bytes::Bytes;

    fn tracker(start: u64) -> EpochTracker {
        let account = SimAccount::from_seed(7);
        let key = EpochKey {
            pubkey: Bytes::from(vec![1u8; 32]),
            version: 1,
        };
        EpochTracker::new(3, account.derive_keystream(&key).unwrap(), start)
    }

    fn result(token: &SearchKey, code: ResultCode) -> (SearchKey, SearchResult) {
        (
            token.clone(),
            SearchResult {
                token: token.clone(),
                ciphertext: Bytes::from_static(b"ct"),
                result_code: code,
            },
        )
    }

    #[test]
    fn planning_does_not_advance() {
        let t = tracker(0);
        let a = t.plan_attempt(5);
        let b = t.plan_attempt(5);

        assert_eq!(a, b);
        assert_eq!(a.search_keys.len(), 5);
        assert_eq!(t.outputs_consumed(), 0);
    }

    #[test]
    fn known_safe_starts_at_start_block() {
        let t = tracker(40);
        assert_eq!(t.known_safe_block_count(), 40);
        assert_eq!(t.plan_attempt(1).cursor_block_index, 40);
    }

    #[test]
    fn hits_then_miss() {
        let mut t = tracker(0);
        let keys = t.plan_attempt(3).search_keys;
        let results: HashMap<_, _> = [
            result(&keys[0], ResultCode::Found),
            result(&keys[1], ResultCode::Found),
            result(&keys[2], ResultCode::NotFound),
        ]
        .into_iter()
        .collect();

        let found = t.consume_results(&results, 50).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(t.outputs_consumed(), 2);
        assert_eq!(t.known_safe_block_count(), 50);
        // The missed key is next in line.
        assert_eq!(t.plan_attempt(1).search_keys[0], keys[2]);
    }

    #[test]
    fn never_skips_past_a_miss() {
        let mut t = tracker(0);
        let keys = t.plan_attempt(3).search_keys;
        let results: HashMap<_, _> = [
            result(&keys[0], ResultCode::NotFound),
            result(&keys[1], ResultCode::Found),
            result(&keys[2], ResultCode::Found),
        ]
        .into_iter()
        .collect();

        let found = t.consume_results(&results, 10).unwrap();

        assert!(found.is_empty());
        assert_eq!(t.outputs_consumed(), 0);
        assert_eq!(t.plan_attempt(1).search_keys[0], keys[0]);
    }

    #[test]
    fn lower_server_horizon_never_lowers_known_safe() {
        let mut t = tracker(80);
        let keys = t.plan_attempt(1).search_keys;
        let results: HashMap<_, _> = [result(&keys[0], ResultCode::NotFound)].into_iter().collect();

        t.consume_results(&results, 20).unwrap();
        assert_eq!(t.known_safe_block_count(), 80);
    }

    #[test]
    fn rate_limit_leaves_tracker_untouched() {
        let mut t = tracker(0);
        let keys = t.plan_attempt(2).search_keys;
        let results: HashMap<_, _> = [
            result(&keys[0], ResultCode::Found),
            result(&keys[1], ResultCode::RateLimited),
        ]
        .into_iter()
        .collect();

        let err = t.consume_results(&results, 30).unwrap_err();

        assert!(matches!(err, ScanError::ServerRateLimited(_)));
        assert_eq!(t.outputs_consumed(), 0);
        assert_eq!(t.known_safe_block_count(), 0);
    }

    #[test]
    fn bad_codes_are_invalid_responses() {
        for code in [
            ResultCode::BadSearchKey,
            ResultCode::InternalError,
            ResultCode::Unused,
            ResultCode::Unrecognized(9),
        ] {
            let mut t = tracker(0);
            let keys = t.plan_attempt(1).search_keys;
            let results: HashMap<_, _> = [result(&keys[0], code)].into_iter().collect();

            let err = t.consume_results(&results, 30).unwrap_err();
            assert!(matches!(err, ScanError::InvalidServerResponse(_)), "{code:?}");
        }
    }

    #[test]
    fn decommissioned_epoch_goes_inactive_on_miss() {
        let mut t = tracker(0);
        t.mark_decommissioned();
        assert!(t.is_active());

        let keys = t.plan_attempt(2).search_keys;
        let hit: HashMap<_, _> = [result(&keys[0], ResultCode::Found)].into_iter().collect();
        t.consume_results(&hit, 10).unwrap();
        assert!(t.is_active(), "a hit alone must not deactivate");

        let miss: HashMap<_, _> = [result(&keys[1], ResultCode::NotFound)].into_iter().collect();
        t.consume_results(&miss, 10).unwrap();
        assert!(!t.is_active());
    }
}
