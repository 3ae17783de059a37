//! Value types shared by the engine and the view service seam.

use std::fmt;
use std::ops::Range;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Server-assigned identifier of an ingest epoch.
pub type EpochId = i64;

/// One keystream output, used as an oblivious lookup key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchKey(Bytes);

impl SearchKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SearchKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl fmt::Debug for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchKey({})", hex::encode(&self.0))
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Public key announced by the view service for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochKey {
    pub pubkey: Bytes,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochAnnouncement {
    pub epoch_id: EpochId,
    pub epoch_key: EpochKey,
    pub start_block_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecommissionedEpoch {
    pub epoch_id: EpochId,
    pub last_ingested_block_index: u64,
}

/// Outcome of searching for a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Found,
    NotFound,
    BadSearchKey,
    InternalError,
    RateLimited,
    Unused,
    Unrecognized(u32),
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ResultCode::Unused,
            1 => ResultCode::Found,
            2 => ResultCode::NotFound,
            3 => ResultCode::BadSearchKey,
            4 => ResultCode::InternalError,
            5 => ResultCode::RateLimited,
            other => ResultCode::Unrecognized(other),
        }
    }
}

impl From<ResultCode> for u32 {
    fn from(code: ResultCode) -> Self {
        match code {
            ResultCode::Unused => 0,
            ResultCode::Found => 1,
            ResultCode::NotFound => 2,
            ResultCode::BadSearchKey => 3,
            ResultCode::InternalError => 4,
            ResultCode::RateLimited => 5,
            ResultCode::Unrecognized(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub token: SearchKey,
    pub ciphertext: Bytes,
    pub result_code: ResultCode,
}

/// Half-open block index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn to_range(self) -> Range<u64> {
        self.start..self.end
    }
}

impl From<Range<u64>> for BlockRange {
    fn from(range: Range<u64>) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

/// One round's request to the view service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub cursor_block_index: u64,
    pub event_cursor: i64,
    pub search_tokens: Vec<SearchKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryResponse {
    pub new_epoch_announcements: Vec<EpochAnnouncement>,
    pub decommissioned_epochs: Vec<DecommissionedEpoch>,
    pub search_results: Vec<SearchResult>,
    pub missed_block_ranges: Vec<BlockRange>,
    pub highest_processed_block_count: u64,
    pub next_event_cursor: i64,
}

impl QueryResponse {
    /// Counts-only view of the response, safe to log at `info`.
    pub fn summary(&self) -> ResponseSummary<'_> {
        ResponseSummary(self)
    }
}

pub struct ResponseSummary<'a>(&'a QueryResponse);

impl fmt::Display for ResponseSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        let hits = r
            .search_results
            .iter()
            .filter(|res| res.result_code == ResultCode::Found)
            .count();
        write!(
            f,
            "announcements={} decommissions={} results={} hits={} missed_ranges={} \
             highest_processed_block_count={} next_event_cursor={}",
            r.new_epoch_announcements.len(),
            r.decommissioned_epochs.len(),
            r.search_results.len(),
            hits,
            r.missed_block_ranges.len(),
            r.highest_processed_block_count,
            r.next_event_cursor,
        )
    }
}

/// A decrypted search hit, before ownership has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutRecord {
    pub block_index: u64,
    pub global_index: u64,
    pub public_key: Bytes,
    pub target_key: Bytes,
    pub masked_value: u64,
}

/// An output confirmed to belong to the scanning account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub block_index: u64,
    pub global_index: u64,
    pub public_key: Bytes,
    pub value: u64,
}
