use std::ops::Range;

use crate::error::{CryptoError, ScanError};
use crate::scanning::domain::crypto::ScanCrypto;
use crate::scanning::domain::epoch_set::SearchAttempt;
use crate::scanning::engine::state::{RoundState, ScanState};
use crate::scanning::engine::types::{EngineCommand, ScanPhase};
use crate::scanning::types::{BlockRange, OwnedOutput, QueryRequest, QueryResponse, SearchResult};

pub(super) fn on_started(round: &mut RoundState, state: &ScanState) -> Vec<EngineCommand> {
    if round.phase.in_round() {
        return fail(
            round,
            ScanError::InvalidState(format!("scan already running ({:?})", round.phase)),
        );
    }

    round.reset();
    log::info!(
        "[ENGINE] starting scan: {} epochs tracked, known safe block count {}",
        state.epochs.len(),
        state.epochs.global_known_safe_block_count()
    );

    vec![plan_round(round, state)]
}

pub(super) fn on_query_dispatched(round: &mut RoundState) -> Vec<EngineCommand> {
    if round.phase != ScanPhase::RequestBuilt {
        return fail(
            round,
            ScanError::InvalidState(format!("no request to dispatch ({:?})", round.phase)),
        );
    }
    round.phase = ScanPhase::AwaitingResponse;
    Vec::new()
}

pub(super) fn on_query_failed(round: &mut RoundState, err: ScanError) -> Vec<EngineCommand> {
    log::warn!("[ENGINE] round {} query failed: {}", round.rounds + 1, err);
    fail(round, err)
}

pub(super) fn on_response(
    round: &mut RoundState,
    state: &mut ScanState,
    crypto: &dyn ScanCrypto,
    response: QueryResponse,
) -> Vec<EngineCommand> {
    if round.phase != ScanPhase::AwaitingResponse {
        return fail(
            round,
            ScanError::InvalidState(format!("unexpected response ({:?})", round.phase)),
        );
    }
    let Some(attempt) = round.pending_attempt.take() else {
        return fail(
            round,
            ScanError::InvalidState("response without a pending attempt".to_string()),
        );
    };

    round.phase = ScanPhase::Integrating;
    log::info!("[ENGINE] round {} response: {}", round.rounds + 1, response.summary());

    let outputs = match process_query_response(state, crypto, &attempt, &response) {
        Ok(outputs) => outputs,
        Err(err) => {
            log::error!("[ENGINE] round {} failed to integrate: {}", round.rounds + 1, err);
            return fail(round, err);
        }
    };
    round.rounds += 1;

    // Pinned on the first response. The ledger keeps growing, so the scan has
    // to stop at some fixed horizon.
    let target = *round
        .target_block_count
        .get_or_insert(response.highest_processed_block_count);

    let mut cmds = Vec::new();
    if !outputs.is_empty() {
        round.outputs_found += outputs.len();
        cmds.push(EngineCommand::DeliverOutputs(outputs));
    }

    let known_safe = state.epochs.global_known_safe_block_count();
    if known_safe >= target || !state.epochs.has_eligible(Some(target)) {
        if known_safe < target {
            log::warn!(
                "[ENGINE] no epoch can reach target {}, stopping at {}",
                target,
                known_safe
            );
        }
        log::info!(
            "[ENGINE] scan done after {} rounds: known safe block count {} (target {})",
            round.rounds,
            known_safe,
            target
        );
        round.phase = ScanPhase::Done;
        cmds.push(EngineCommand::Complete);
        return cmds;
    }

    // Nothing was searched, so growing the budget would only produce an
    // oversized first batch for the epochs that just appeared.
    if attempt.is_empty() {
        round.reset_scaler();
    }
    round.phase = ScanPhase::Idle;
    cmds.push(plan_round(round, state));
    cmds
}

fn plan_round(round: &mut RoundState, state: &ScanState) -> EngineCommand {
    let budget = round.scaler.next_budget();
    let min_outputs = round.min_outputs_per_epoch.min(budget);
    let attempt = state
        .epochs
        .plan_attempt(round.target_block_count, budget, min_outputs);
    let request = build_request(&attempt, state);

    log::debug!(
        "[ENGINE] round {}: budget {}, {} keys over {} epochs, cursor {}",
        round.rounds + 1,
        budget,
        request.search_tokens.len(),
        attempt.epoch_count(),
        request.cursor_block_index
    );

    round.pending_attempt = Some(attempt);
    round.phase = ScanPhase::RequestBuilt;
    EngineCommand::SubmitQuery(request)
}

pub(super) fn build_request(attempt: &SearchAttempt, state: &ScanState) -> QueryRequest {
    QueryRequest {
        cursor_block_index: attempt.cursor_block_index(),
        event_cursor: state.next_event_cursor,
        search_tokens: attempt.search_keys(),
    }
}

/// Integrates a response into `state`.
///
/// Search hits are decrypted and checked for ownership before any tracker
/// advances, so a failure here leaves every keystream where it was and the
/// round can be retried. Announcements and decommissions are applied first
/// and are idempotent on replay.
pub(super) fn process_query_response(
    state: &mut ScanState,
    crypto: &dyn ScanCrypto,
    attempt: &SearchAttempt,
    response: &QueryResponse,
) -> Result<Vec<OwnedOutput>, ScanError> {
    state.epochs.ingest_announcements(
        crypto,
        &response.new_epoch_announcements,
        response.highest_processed_block_count,
    )?;
    state.epochs.ingest_decommissions(&response.decommissioned_epochs);

    let staged = state.epochs.stage_results(attempt, response)?;
    let outputs = decrypt_owned(crypto, staged.found())?;
    state.epochs.commit(staged);

    state.advance_event_cursor(response.next_event_cursor);
    record_missed_ranges(state, &response.missed_block_ranges);

    Ok(outputs)
}

/// Queues missed ranges for the caller to scan.
///
/// Ranges are clipped to the earliest tracked epoch: nothing before it can
/// hold outputs this account is searching for.
pub(super) fn record_missed_ranges(state: &mut ScanState, ranges: &[BlockRange]) {
    let earliest = state.epochs.earliest_start_block_index();

    for range in ranges {
        let Some(clipped) = clip_range(range.to_range(), earliest) else {
            log::debug!("[ENGINE] dropping missed range {:?} before first epoch", range);
            continue;
        };
        if !state.unscanned_missed_ranges.contains(&clipped) {
            log::info!("[ENGINE] missed block range {:?}", clipped);
            state.unscanned_missed_ranges.push(clipped);
        }
    }
}

fn clip_range(range: Range<u64>, earliest: Option<u64>) -> Option<Range<u64>> {
    let range = match earliest {
        Some(earliest) if range.start < earliest => earliest..range.end,
        _ => range,
    };
    (!range.is_empty()).then_some(range)
}

pub(super) fn decrypt_owned<'a>(
    crypto: &dyn ScanCrypto,
    results: impl IntoIterator<Item = &'a SearchResult>,
) -> Result<Vec<OwnedOutput>, ScanError> {
    let mut outputs = Vec::new();
    for result in results {
        let record = crypto.decrypt(&result.ciphertext).map_err(decrypt_error)?;
        match crypto.owned_output(&record) {
            Some(output) => outputs.push(output),
            None => log::warn!(
                "[ENGINE] search hit at block {} does not belong to this account, skipping",
                record.block_index
            ),
        }
    }
    Ok(outputs)
}

fn decrypt_error(err: CryptoError) -> ScanError {
    match err {
        CryptoError::UnsupportedVersion(msg) => ScanError::OutdatedClient(msg),
        CryptoError::InvalidInput(msg) | CryptoError::InvalidKey(msg) => {
            ScanError::InvalidServerResponse(format!("undecryptable search result: {}", msg))
        }
    }
}

fn fail(round: &mut RoundState, err: ScanError) -> Vec<EngineCommand> {
    round.phase = ScanPhase::Failed;
    round.pending_attempt = None;
    vec![EngineCommand::Abort(err)]
}
