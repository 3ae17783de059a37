use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::ScanError;
use crate::scanning::domain::crypto::ScanCrypto;
use crate::scanning::types::{
    BlockRange, DecommissionedEpoch, EpochAnnouncement, EpochId, EpochKey, OwnedOutput,
    QueryRequest, QueryResponse, ResultCode, SearchKey, SearchResult,
};
use crate::scanning::view::api::ViewService;
use crate::scanning::view::sim::account::{SimAccount, SIM_KEY_VERSION};

#[derive(Debug)]
struct SimEpoch {
    key: EpochKey,
    start_block_index: u64,
    decommissioned: bool,
}

#[derive(Debug)]
struct SimOutput {
    block_index: u64,
    ciphertext: Bytes,
}

/// Entries in the service's event log. Event ids start at 1.
#[derive(Debug, Clone)]
enum SimEvent {
    NewEpoch(EpochId),
    Decommission(DecommissionedEpoch),
    MissedBlocks(BlockRange),
}

#[derive(Debug, Default)]
struct SimLedger {
    epochs: BTreeMap<EpochId, SimEpoch>,
    outputs: HashMap<SearchKey, SimOutput>,
    events: Vec<SimEvent>,

    /// Next keystream index per (account, epoch), keyed by that stream's
    /// first search key.
    next_output_index: HashMap<SearchKey, u64>,
    next_global_index: u64,

    highest_processed_block_count: u64,
    rate_limited: bool,
    fail_next: Option<ScanError>,
    requests: Vec<QueryRequest>,
}

/// In-memory view service.
///
/// Outputs become visible once `highest_processed_block_count` is past their
/// block, like a real service that has only ingested part of the ledger.
#[derive(Debug, Default)]
pub struct SimViewService {
    ledger: Mutex<SimLedger>,
}

impl SimViewService {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, SimLedger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a new epoch and announces it through the event log.
    pub fn add_epoch(&self, epoch_id: EpochId, start_block_index: u64) -> EpochKey {
        let key = EpochKey {
            pubkey: Bytes::copy_from_slice(
                &Sha256::new()
                    .chain_update(b"sim-epoch")
                    .chain_update(epoch_id.to_le_bytes())
                    .finalize(),
            ),
            version: SIM_KEY_VERSION,
        };

        let mut ledger = self.ledger();
        ledger.epochs.insert(
            epoch_id,
            SimEpoch {
                key: key.clone(),
                start_block_index,
                decommissioned: false,
            },
        );
        ledger.events.push(SimEvent::NewEpoch(epoch_id));
        log::debug!("[SIM] epoch {} opened at block {}", epoch_id, start_block_index);
        key
    }

    /// Announces an epoch with an arbitrary key, e.g. one the client can't use.
    pub fn add_epoch_with_key(&self, epoch_id: EpochId, key: EpochKey, start_block_index: u64) {
        let mut ledger = self.ledger();
        ledger.epochs.insert(
            epoch_id,
            SimEpoch {
                key,
                start_block_index,
                decommissioned: false,
            },
        );
        ledger.events.push(SimEvent::NewEpoch(epoch_id));
    }

    /// Ingests an output for `account` into `epoch_id` at `block_index`.
    pub fn add_owned_output(
        &self,
        account: &SimAccount,
        epoch_id: EpochId,
        block_index: u64,
        value: u64,
    ) -> Result<OwnedOutput> {
        let mut ledger = self.ledger();
        let Some(epoch) = ledger.epochs.get(&epoch_id) else {
            bail!("unknown epoch {}", epoch_id);
        };
        if epoch.decommissioned {
            bail!("epoch {} is decommissioned", epoch_id);
        }
        if block_index < epoch.start_block_index {
            bail!(
                "block {} is before epoch {} starts at {}",
                block_index,
                epoch_id,
                epoch.start_block_index
            );
        }
        let key = epoch.key.clone();

        let stream_id = account.search_key(&key, 0);
        let index = *ledger.next_output_index.get(&stream_id).unwrap_or(&0);
        let global_index = ledger.next_global_index;

        let record = account.make_record(block_index, global_index, value);
        let output = account
            .owned_output(&record)
            .ok_or_else(|| anyhow::anyhow!("record not owned by its own account"))?;

        ledger.outputs.insert(
            account.search_key(&key, index),
            SimOutput {
                block_index,
                ciphertext: account.seal(&record),
            },
        );
        ledger.next_output_index.insert(stream_id, index + 1);
        ledger.next_global_index += 1;

        Ok(output)
    }

    /// Stores raw ciphertext under `token`.
    pub fn insert_ciphertext(&self, token: SearchKey, block_index: u64, ciphertext: Bytes) {
        self.ledger().outputs.insert(
            token,
            SimOutput {
                block_index,
                ciphertext,
            },
        );
    }

    pub fn decommission(&self, epoch_id: EpochId) {
        let mut ledger = self.ledger();
        let last_ingested_block_index = ledger.highest_processed_block_count.saturating_sub(1);
        if let Some(epoch) = ledger.epochs.get_mut(&epoch_id) {
            epoch.decommissioned = true;
        }
        ledger.events.push(SimEvent::Decommission(DecommissionedEpoch {
            epoch_id,
            last_ingested_block_index,
        }));
        log::debug!("[SIM] epoch {} decommissioned", epoch_id);
    }

    pub fn add_missed_range(&self, range: Range<u64>) {
        self.ledger()
            .events
            .push(SimEvent::MissedBlocks(BlockRange::from(range)));
    }

    pub fn advance_blocks(&self, count: u64) {
        let mut ledger = self.ledger();
        ledger.highest_processed_block_count += count;
        log::trace!(
            "[SIM] processed block count {}",
            ledger.highest_processed_block_count
        );
    }

    pub fn highest_processed_block_count(&self) -> u64 {
        self.ledger().highest_processed_block_count
    }

    /// While set, every search result comes back `RateLimited`.
    pub fn set_rate_limited(&self, rate_limited: bool) {
        self.ledger().rate_limited = rate_limited;
    }

    /// The next query fails with `err` without being answered.
    pub fn fail_next_query(&self, err: ScanError) {
        self.ledger().fail_next = Some(err);
    }

    /// Every request received so far, including failed ones.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.ledger().requests.clone()
    }

    fn answer(ledger: &SimLedger, request: &QueryRequest) -> QueryResponse {
        let mut response = QueryResponse {
            highest_processed_block_count: ledger.highest_processed_block_count,
            next_event_cursor: ledger.events.len() as i64,
            ..Default::default()
        };

        let first_unseen = usize::try_from(request.event_cursor.max(0)).unwrap_or(usize::MAX);
        for event in ledger.events.iter().skip(first_unseen) {
            match event {
                SimEvent::NewEpoch(epoch_id) => {
                    if let Some(epoch) = ledger.epochs.get(epoch_id) {
                        response.new_epoch_announcements.push(EpochAnnouncement {
                            epoch_id: *epoch_id,
                            epoch_key: epoch.key.clone(),
                            start_block_index: epoch.start_block_index,
                        });
                    }
                }
                SimEvent::Decommission(decommission) => {
                    response.decommissioned_epochs.push(decommission.clone());
                }
                SimEvent::MissedBlocks(range) => response.missed_block_ranges.push(*range),
            }
        }

        response.search_results = request
            .search_tokens
            .iter()
            .map(|token| {
                let hit = ledger
                    .outputs
                    .get(token)
                    .filter(|o| o.block_index < ledger.highest_processed_block_count);
                let (result_code, ciphertext) = match hit {
                    _ if ledger.rate_limited => (ResultCode::RateLimited, Bytes::new()),
                    Some(output) => (ResultCode::Found, output.ciphertext.clone()),
                    None => (ResultCode::NotFound, Bytes::new()),
                };
                SearchResult {
                    token: token.clone(),
                    ciphertext,
                    result_code,
                }
            })
            .collect();

        response
    }
}

#[async_trait]
impl ViewService for SimViewService {
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ScanError> {
        let mut ledger = self.ledger();
        ledger.requests.push(request.clone());

        if let Some(err) = ledger.fail_next.take() {
            log::debug!("[SIM] failing query: {}", err);
            return Err(err);
        }

        let response = Self::answer(&ledger, &request);
        log::debug!("[SIM] answered {} tokens: {}", request.search_tokens.len(), response.summary());
        Ok(response)
    }
}
