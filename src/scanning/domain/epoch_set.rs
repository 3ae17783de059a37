use std::collections::{BTreeMap, HashMap};

use crate::error::{CryptoError, ScanError};
use crate::scanning::domain::crypto::ScanCrypto;
use crate::scanning::domain::epoch_tracker::{EpochOutcome, EpochSearchAttempt, EpochTracker};
use crate::scanning::types::{
    DecommissionedEpoch, EpochAnnouncement, EpochId, QueryResponse, SearchKey, SearchResult,
};

/// One round's search plan across epochs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchAttempt {
    epochs: BTreeMap<EpochId, EpochSearchAttempt>,
}

impl SearchAttempt {
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epoch_count(&self) -> usize {
        self.epochs.len()
    }

    pub fn get(&self, epoch_id: EpochId) -> Option<&EpochSearchAttempt> {
        self.epochs.get(&epoch_id)
    }

    pub fn epochs(&self) -> impl Iterator<Item = (EpochId, &EpochSearchAttempt)> {
        self.epochs.iter().map(|(id, a)| (*id, a))
    }

    /// All planned search keys, in epoch order.
    pub fn search_keys(&self) -> Vec<SearchKey> {
        self.epochs
            .values()
            .flat_map(|a| a.search_keys.iter().cloned())
            .collect()
    }

    pub fn search_key_count(&self) -> usize {
        self.epochs.values().map(|a| a.search_keys.len()).sum()
    }

    /// Lowest cursor across the planned epochs, or 0 when nothing is planned.
    pub fn cursor_block_index(&self) -> u64 {
        self.epochs
            .values()
            .map(|a| a.cursor_block_index)
            .min()
            .unwrap_or(0)
    }
}

/// Result of looking up the tracker an attempt was planned against.
enum TrackerLookup<'a> {
    Live(&'a EpochTracker),
    /// The attempt names an epoch the set no longer tracks.
    Stale(EpochId),
}

/// Per-epoch outcomes of a round, computed but not yet committed.
pub(crate) struct StagedResults {
    outcomes: Vec<(EpochId, EpochOutcome)>,
}

impl StagedResults {
    pub(crate) fn found(&self) -> impl Iterator<Item = &SearchResult> {
        self.outcomes.iter().flat_map(|(_, o)| o.found().iter())
    }
}

/// All epoch trackers for one account.
#[derive(Debug, Default)]
pub struct EpochSet {
    trackers: BTreeMap<EpochId, EpochTracker>,

    /// Highest processed block count seen alongside any epoch announcement.
    global_announced_block_count: u64,
}

impl EpochSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn tracker(&self, epoch_id: EpochId) -> Option<&EpochTracker> {
        self.trackers.get(&epoch_id)
    }

    pub fn trackers(&self) -> impl Iterator<Item = &EpochTracker> {
        self.trackers.values()
    }

    pub fn active_count(&self) -> usize {
        self.trackers.values().filter(|t| t.is_active()).count()
    }

    pub fn global_announced_block_count(&self) -> u64 {
        self.global_announced_block_count
    }

    /// Number of blocks below which every owned output has been found.
    ///
    /// Inactive epochs are left out: they are decommissioned and a miss has
    /// confirmed they hold nothing more, so they cover every later block.
    pub fn global_known_safe_block_count(&self) -> u64 {
        self.trackers
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.known_safe_block_count())
            .fold(self.global_announced_block_count, u64::min)
    }

    pub fn earliest_start_block_index(&self) -> Option<u64> {
        self.trackers.values().map(|t| t.start_block_index()).min()
    }

    /// Starts tracking newly announced epochs.
    ///
    /// All keystreams are derived before any tracker is inserted, so a bad
    /// announcement leaves the set unchanged.
    pub fn ingest_announcements(
        &mut self,
        crypto: &dyn ScanCrypto,
        announcements: &[EpochAnnouncement],
        server_highest_processed_block_count: u64,
    ) -> Result<(), ScanError> {
        let mut fresh = BTreeMap::new();
        for announcement in announcements {
            if self.trackers.contains_key(&announcement.epoch_id)
                || fresh.contains_key(&announcement.epoch_id)
            {
                log::debug!(
                    "[EPOCHS] epoch {} already tracked, ignoring announcement",
                    announcement.epoch_id
                );
                continue;
            }

            let keystream = crypto
                .derive_keystream(&announcement.epoch_key)
                .map_err(|e| {
                    log::error!(
                        "[EPOCHS] failed to derive keystream for epoch {}: {}",
                        announcement.epoch_id,
                        e
                    );
                    epoch_key_error(announcement.epoch_id, e)
                })?;

            fresh.insert(
                announcement.epoch_id,
                EpochTracker::new(
                    announcement.epoch_id,
                    keystream,
                    announcement.start_block_index,
                ),
            );
        }

        for (epoch_id, tracker) in fresh {
            log::info!(
                "[EPOCHS] tracking epoch {} from block {}",
                epoch_id,
                tracker.start_block_index()
            );
            self.trackers.insert(epoch_id, tracker);
        }

        if server_highest_processed_block_count > self.global_announced_block_count {
            self.global_announced_block_count = server_highest_processed_block_count;
        }
        Ok(())
    }

    pub fn ingest_decommissions(&mut self, decommissions: &[DecommissionedEpoch]) {
        for decommission in decommissions {
            match self.trackers.get_mut(&decommission.epoch_id) {
                Some(tracker) => {
                    if !tracker.is_decommissioned() {
                        log::info!(
                            "[EPOCHS] epoch {} decommissioned at block {}",
                            decommission.epoch_id,
                            decommission.last_ingested_block_index
                        );
                    }
                    tracker.mark_decommissioned();
                }
                None => {
                    log::error!(
                        "[EPOCHS] decommission for unknown epoch {}, ignoring",
                        decommission.epoch_id
                    );
                }
            }
        }
    }

    /// Whether any epoch still needs searching to reach `target_block_count`.
    pub fn has_eligible(&self, target_block_count: Option<u64>) -> bool {
        self.trackers
            .values()
            .any(|t| is_eligible(t, target_block_count))
    }

    /// Picks epochs to search this round and splits `total_budget` search keys
    /// between them.
    ///
    /// An epoch is eligible while it's active and hasn't reached
    /// `target_block_count` (every active epoch is eligible without a target).
    /// Each selected epoch gets at least `min_outputs_per_epoch` keys, which
    /// bounds how many epochs fit in the budget.
    pub fn plan_attempt(
        &self,
        target_block_count: Option<u64>,
        total_budget: usize,
        min_outputs_per_epoch: usize,
    ) -> SearchAttempt {
        let max_epochs = if min_outputs_per_epoch > 0 && min_outputs_per_epoch <= total_budget {
            total_budget / min_outputs_per_epoch
        } else {
            total_budget
        };

        let selected: Vec<&EpochTracker> = self
            .trackers
            .values()
            .filter(|t| is_eligible(t, target_block_count))
            .take(max_epochs)
            .collect();

        if selected.is_empty() {
            log::debug!(
                "[EPOCHS] no epochs to search (target {:?}, budget {})",
                target_block_count,
                total_budget
            );
            return SearchAttempt::default();
        }

        let per_epoch = total_budget / selected.len();
        let remainder = total_budget % selected.len();

        let epochs = selected
            .into_iter()
            .enumerate()
            .map(|(i, tracker)| {
                let count = per_epoch + usize::from(i < remainder);
                (tracker.epoch_id(), tracker.plan_attempt(count))
            })
            .collect::<BTreeMap<_, _>>();

        log::debug!(
            "[EPOCHS] planned {} keys across {} epochs",
            total_budget,
            epochs.len()
        );

        SearchAttempt { epochs }
    }

    /// Applies one round's response.
    ///
    /// Announcements and decommissions are ingested first. Search results are
    /// then evaluated for every planned epoch; if any epoch fails, no tracker
    /// advances.
    pub fn integrate(
        &mut self,
        crypto: &dyn ScanCrypto,
        attempt: &SearchAttempt,
        response: &QueryResponse,
    ) -> Result<Vec<SearchResult>, ScanError> {
        self.ingest_announcements(
            crypto,
            &response.new_epoch_announcements,
            response.highest_processed_block_count,
        )?;
        self.ingest_decommissions(&response.decommissioned_epochs);

        let staged = self.stage_results(attempt, response)?;
        Ok(self.commit(staged))
    }

    pub(crate) fn stage_results(
        &self,
        attempt: &SearchAttempt,
        response: &QueryResponse,
    ) -> Result<StagedResults, ScanError> {
        let mut results_by_token: HashMap<&SearchKey, &SearchResult> = HashMap::new();
        for result in &response.search_results {
            results_by_token.entry(&result.token).or_insert(result);
        }

        let mut outcomes = Vec::with_capacity(attempt.epoch_count());
        for (epoch_id, planned) in attempt.epochs() {
            let tracker = match self.lookup(epoch_id) {
                TrackerLookup::Live(tracker) => tracker,
                TrackerLookup::Stale(epoch_id) => {
                    log::warn!(
                        "[EPOCHS] attempt planned for epoch {} which is no longer tracked, skipping",
                        epoch_id
                    );
                    continue;
                }
            };

            let mut planned_results = HashMap::with_capacity(planned.search_keys.len());
            for key in &planned.search_keys {
                match results_by_token.get(key) {
                    Some(result) => {
                        planned_results.insert(key.clone(), (*result).clone());
                    }
                    None => log::warn!(
                        "[EPOCHS] epoch {}: searched key missing from response",
                        epoch_id
                    ),
                }
            }

            let outcome = tracker
                .evaluate_results(&planned_results, response.highest_processed_block_count)?;
            outcomes.push((epoch_id, outcome));
        }

        Ok(StagedResults { outcomes })
    }

    pub(crate) fn commit(&mut self, staged: StagedResults) -> Vec<SearchResult> {
        let mut found = Vec::new();
        for (epoch_id, outcome) in staged.outcomes {
            if let Some(tracker) = self.trackers.get_mut(&epoch_id) {
                found.extend(tracker.apply(outcome));
            }
        }
        found
    }

    fn lookup(&self, epoch_id: EpochId) -> TrackerLookup<'_> {
        match self.trackers.get(&epoch_id) {
            Some(tracker) => TrackerLookup::Live(tracker),
            None => TrackerLookup::Stale(epoch_id),
        }
    }

    #[cfg(test)]
    pub(crate) fn remove_tracker(&mut self, epoch_id: EpochId) -> Option<EpochTracker> {
        self.trackers.remove(&epoch_id)
    }
}

fn is_eligible(tracker: &EpochTracker, target_block_count: Option<u64>) -> bool {
    tracker.is_active()
        && target_block_count.map_or(true, |target| tracker.known_safe_block_count() < target)
}

fn epoch_key_error(epoch_id: EpochId, err: CryptoError) -> ScanError {
    match err {
        CryptoError::UnsupportedVersion(msg) => {
            ScanError::OutdatedClient(format!("epoch {}: {}", epoch_id, msg))
        }
        CryptoError::InvalidKey(msg) | CryptoError::InvalidInput(msg) => {
            ScanError::InvalidServerResponse(format!("epoch {} key: {}", epoch_id, msg))
        }
    }
}
