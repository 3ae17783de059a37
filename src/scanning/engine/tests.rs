#![cfg(test)]
use bytes::Bytes;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::scanning::engine::{EngineCommand, EngineEvent, ScanEngine, ScanPhase, ScanState};
use crate::scanning::types::{
    BlockRange, DecommissionedEpoch, EpochAnnouncement, EpochKey, QueryRequest, QueryResponse,
    ResultCode, SearchKey, SearchResult,
};
use crate::scanning::view::sim::SimAccount;

// =========================================================================
// Helpers
// =========================================================================

fn announcement(epoch_id: i64, start: u64) -> EpochAnnouncement {
    EpochAnnouncement {
        epoch_id,
        epoch_key: EpochKey {
            pubkey: Bytes::from(vec![epoch_id as u8; 32]),
            version: 1,
        },
        start_block_index: start,
    }
}

/// State that already tracks the given epochs.
fn seeded_state(account: &SimAccount, epochs: &[(i64, u64)], announced: u64) -> ScanState {
    let mut state = ScanState::new();
    let announcements: Vec<_> = epochs.iter().map(|(id, s)| announcement(*id, *s)).collect();
    state
        .epochs
        .ingest_announcements(account, &announcements, announced)
        .unwrap();
    state
}

struct Harness {
    engine: ScanEngine,
    state: ScanState,
    account: SimAccount,
}

impl Harness {
    fn new(epochs: &[(i64, u64)], announced: u64) -> Self {
        let account = SimAccount::from_seed(11);
        let state = seeded_state(&account, epochs, announced);
        Self {
            engine: ScanEngine::new(&ScanConfig::default()),
            state,
            account,
        }
    }

    fn send(&mut self, event: EngineEvent) -> Vec<EngineCommand> {
        self.engine.handle_event(event, &mut self.state, &self.account)
    }

    /// Starts (or continues) a round and returns the request to answer.
    fn dispatch(&mut self, cmds: Vec<EngineCommand>) -> QueryRequest {
        let request = cmds
            .into_iter()
            .find_map(|c| match c {
                EngineCommand::SubmitQuery(r) => Some(r),
                _ => None,
            })
            .expect("engine did not submit a query");
        assert!(self.send(EngineEvent::QueryDispatched).is_empty());
        request
    }

    /// Answers every token in `request`; `code_for(i)` picks the result.
    fn respond(
        &mut self,
        request: &QueryRequest,
        highest: u64,
        code_for: impl Fn(usize, &SearchKey) -> ResultCode,
    ) -> Vec<EngineCommand> {
        let search_results = request
            .search_tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let result_code = code_for(i, token);
                let ciphertext = if result_code == ResultCode::Found {
                    let record = self.account.make_record(i as u64, i as u64, 100);
                    self.account.seal(&record)
                } else {
                    Bytes::new()
                };
                SearchResult {
                    token: token.clone(),
                    ciphertext,
                    result_code,
                }
            })
            .collect();

        self.send(EngineEvent::ResponseReceived(QueryResponse {
            search_results,
            highest_processed_block_count: highest,
            ..Default::default()
        }))
    }
}

fn delivered(cmds: &[EngineCommand]) -> usize {
    cmds.iter()
        .map(|c| match c {
            EngineCommand::DeliverOutputs(o) => o.len(),
            _ => 0,
        })
        .sum()
}

fn has_complete(cmds: &[EngineCommand]) -> bool {
    cmds.iter().any(|c| matches!(c, EngineCommand::Complete))
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn first_round_searches_every_active_epoch() {
    let mut h = Harness::new(&[(1, 0), (2, 0), (3, 0)], 0);

    let cmds = h.send(EngineEvent::Started);
    assert_eq!(h.engine.phase(), ScanPhase::RequestBuilt);
    let request = h.dispatch(cmds);

    assert_eq!(request.search_tokens.len(), 10);
    assert_eq!(request.cursor_block_index, 0);
    assert_eq!(h.engine.phase(), ScanPhase::AwaitingResponse);
}

#[test]
fn all_misses_converge_in_one_round() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.respond(&request, 100, |_, _| ResultCode::NotFound);

    assert!(has_complete(&cmds));
    assert_eq!(delivered(&cmds), 0);
    assert_eq!(h.engine.phase(), ScanPhase::Done);
    assert_eq!(h.state.status().known_safe_block_count, 100);
}

#[test]
fn hit_then_miss_delivers_one_output() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.respond(&request, 50, |i, _| {
        if i == 0 {
            ResultCode::Found
        } else {
            ResultCode::NotFound
        }
    });

    assert_eq!(delivered(&cmds), 1);
    assert!(has_complete(&cmds));
    assert_eq!(h.engine.outputs_found(), 1);
    assert_eq!(h.state.epochs().tracker(1).unwrap().outputs_consumed(), 1);
}

#[test]
fn two_hits_then_miss_deliver_both_outputs() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.respond(&request, 50, |i, _| {
        if i < 2 {
            ResultCode::Found
        } else {
            ResultCode::NotFound
        }
    });

    assert_eq!(delivered(&cmds), 2);
    assert!(has_complete(&cmds));
    assert_eq!(h.engine.outputs_found(), 2);
    assert_eq!(h.state.epochs().tracker(1).unwrap().outputs_consumed(), 2);
    assert_eq!(h.state.status().known_safe_block_count, 50);
}

#[test]
fn all_hits_keep_scanning_with_a_bigger_budget() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.respond(&request, 50, |_, _| ResultCode::Found);

    assert_eq!(delivered(&cmds), 10);
    assert!(!has_complete(&cmds));
    let next = h.dispatch(cmds);
    assert_eq!(next.search_tokens.len(), 15);
    // The scan converges on the first response's height.
    assert_eq!(h.engine.target_block_count(), Some(50));
}

#[test]
fn target_is_not_lowered_by_a_lagging_server() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);
    let cmds = h.respond(&request, 50, |_, _| ResultCode::Found);
    let request = h.dispatch(cmds);

    // A replica behind the first one answers.
    let cmds = h.respond(&request, 30, |_, _| ResultCode::NotFound);

    assert!(!has_complete(&cmds));
    assert_eq!(h.engine.target_block_count(), Some(50));
    assert_eq!(h.state.epochs().tracker(1).unwrap().known_safe_block_count(), 30);

    let request = h.dispatch(cmds);
    let cmds = h.respond(&request, 55, |_, _| ResultCode::NotFound);
    assert!(has_complete(&cmds));
}

#[test]
fn empty_round_resets_the_scaler() {
    let mut h = Harness::new(&[], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);
    assert!(request.search_tokens.is_empty());

    let cmds = h.send(EngineEvent::ResponseReceived(QueryResponse {
        new_epoch_announcements: vec![announcement(4, 0)],
        highest_processed_block_count: 20,
        next_event_cursor: 1,
        ..Default::default()
    }));

    assert!(!has_complete(&cmds), "new epoch still needs searching");
    let request = h.dispatch(cmds);
    assert_eq!(request.search_tokens.len(), 10);
    assert_eq!(request.event_cursor, 1);
}

#[test]
fn empty_server_finishes_immediately() {
    let mut h = Harness::new(&[], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.send(EngineEvent::ResponseReceived(QueryResponse::default()));

    assert!(request.search_tokens.is_empty());
    assert!(has_complete(&cmds));
    assert_eq!(h.engine.rounds(), 1);
}

#[test]
fn rate_limited_round_fails_and_keeps_coverage() {
    let mut h = Harness::new(&[(1, 0), (2, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.respond(&request, 80, |i, _| {
        if i == 0 {
            ResultCode::NotFound
        } else {
            ResultCode::RateLimited
        }
    });

    assert!(matches!(
        cmds.as_slice(),
        [EngineCommand::Abort(ScanError::ServerRateLimited(_))]
    ));
    assert_eq!(h.engine.phase(), ScanPhase::Failed);
    // Epoch 1 missed cleanly, but the round as a whole was rejected.
    assert_eq!(h.state.epochs().tracker(1).unwrap().known_safe_block_count(), 0);
}

#[test]
fn missed_ranges_and_event_cursor_follow_the_response() {
    let mut h = Harness::new(&[(1, 10)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    h.send(EngineEvent::ResponseReceived(QueryResponse {
        search_results: request
            .search_tokens
            .iter()
            .map(|t| SearchResult {
                token: t.clone(),
                ciphertext: Bytes::new(),
                result_code: ResultCode::NotFound,
            })
            .collect(),
        missed_block_ranges: vec![
            BlockRange { start: 0, end: 4 },
            BlockRange { start: 6, end: 12 },
        ],
        highest_processed_block_count: 40,
        next_event_cursor: 9,
        ..Default::default()
    }));

    assert_eq!(h.state.unscanned_missed_ranges(), &[10..12]);
    assert_eq!(h.state.next_event_cursor(), 9);
}

#[test]
fn decommission_of_unknown_epoch_does_not_stop_the_scan() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    let request = h.dispatch(cmds);

    let cmds = h.send(EngineEvent::ResponseReceived(QueryResponse {
        search_results: request
            .search_tokens
            .iter()
            .map(|t| SearchResult {
                token: t.clone(),
                ciphertext: Bytes::new(),
                result_code: ResultCode::NotFound,
            })
            .collect(),
        decommissioned_epochs: vec![DecommissionedEpoch {
            epoch_id: 42,
            last_ingested_block_index: 7,
        }],
        highest_processed_block_count: 30,
        ..Default::default()
    }));

    assert!(has_complete(&cmds));
    assert_eq!(h.state.epochs().len(), 1);
    assert!(h.state.epochs().tracker(1).unwrap().is_active());
    assert_eq!(h.state.status().known_safe_block_count, 30);
}

#[test]
fn query_failure_aborts() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    h.dispatch(cmds);

    let cmds = h.send(EngineEvent::QueryFailed(ScanError::ConnectionFailure("eof".into())));

    assert!(matches!(
        cmds.as_slice(),
        [EngineCommand::Abort(ScanError::ConnectionFailure(_))]
    ));
    assert_eq!(h.engine.phase(), ScanPhase::Failed);
}

#[test]
fn response_without_request_is_rejected() {
    let mut h = Harness::new(&[(1, 0)], 0);

    let cmds = h.send(EngineEvent::ResponseReceived(QueryResponse::default()));

    assert!(matches!(
        cmds.as_slice(),
        [EngineCommand::Abort(ScanError::InvalidState(_))]
    ));
}

#[test]
fn engine_can_be_restarted_after_failure() {
    let mut h = Harness::new(&[(1, 0)], 0);
    let cmds = h.send(EngineEvent::Started);
    h.dispatch(cmds);
    h.send(EngineEvent::QueryFailed(ScanError::ConnectionFailure("eof".into())));

    let cmds = h.send(EngineEvent::Started);

    let request = h.dispatch(cmds);

    assert_eq!(request.search_tokens.len(), 10);
    assert_eq!(h.engine.rounds(), 0);
}
