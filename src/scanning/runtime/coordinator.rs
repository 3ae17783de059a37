use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::scanning::domain::crypto::ScanCrypto;
use crate::scanning::engine::{
    EngineCommand, EngineEvent, ScanEngine, ScanState, ScanStatus, SyncChecker,
};
use crate::scanning::types::{OwnedOutput, QueryRequest};
use crate::scanning::view::api::ViewService;

/// Outcome of a finished [`ScanCoordinator::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub rounds: u64,
    pub outputs_found: usize,
    pub known_safe_block_count: u64,
    pub target_block_count: Option<u64>,
    /// Known-safe coverage reached the target. False when the scan was
    /// stopped between rounds.
    pub completed: bool,
}

/// What the round loop does after feeding the engine one event.
enum Step {
    Submit(QueryRequest),
    Wait,
    Finished,
    Failed(ScanError),
}

/// Runs scans for one account against a view service.
///
/// This is the imperative shell around [`ScanEngine`]: it feeds the engine
/// events, performs the I/O the engine asks for and hands confirmed outputs
/// to the caller. The account's [`ScanState`] sits behind an `RwLock` so
/// status can be read while a round is in flight; the write lock is taken
/// only while the engine handles an event, never across an `.await`.
pub struct ScanCoordinator<S, C> {
    service: S,
    crypto: C,
    state: Arc<RwLock<ScanState>>,
    sync_checker: Arc<RwLock<SyncChecker>>,
    config: ScanConfig,

    /// Checked before every request. Stays set until cleared.
    stop: Arc<AtomicBool>,

    /// Start time for logging relative timestamps.
    t0: Instant,
}

impl<S, C> ScanCoordinator<S, C>
where
    S: ViewService,
    C: ScanCrypto,
{
    pub fn new(service: S, crypto: C, config: ScanConfig) -> Self {
        let sync_checker = SyncChecker::new(config.max_allowed_block_delta);
        Self {
            service,
            crypto,
            state: Arc::new(RwLock::new(ScanState::new())),
            sync_checker: Arc::new(RwLock::new(sync_checker)),
            config,
            stop: Arc::new(AtomicBool::new(false)),
            t0: Instant::now(),
        }
    }

    /// Resumes from existing state instead of a fresh one.
    pub fn with_state(mut self, state: Arc<RwLock<ScanState>>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> Arc<RwLock<ScanState>> {
        Arc::clone(&self.state)
    }

    pub fn status(&self) -> Result<ScanStatus, ScanError> {
        let state = self.state.read().map_err(|_| ScanError::StatePoisoned)?;
        Ok(state.status())
    }

    pub fn sync_checker(&self) -> Arc<RwLock<SyncChecker>> {
        Arc::clone(&self.sync_checker)
    }

    /// Setting the returned flag stops any scan before its next request.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn mark_ranges_scanned(&self, ranges: &[Range<u64>]) -> Result<(), ScanError> {
        let mut state = self.state.write().map_err(|_| ScanError::StatePoisoned)?;
        state.mark_ranges_scanned(ranges);
        Ok(())
    }

    /// Scans until every tracked epoch has caught up with the view service's
    /// processed block count as of the first response.
    ///
    /// `on_partial` receives each round's newly confirmed outputs (never an
    /// empty batch). It runs while the state's write lock is held, so it must
    /// not call back into this coordinator or read the shared state.
    ///
    /// On error, batches already delivered remain valid; a later scan picks
    /// up from the state they were committed in.
    pub async fn start_scan<F>(&self, mut on_partial: F) -> Result<ScanSummary, ScanError>
    where
        F: FnMut(Vec<OwnedOutput>) + Send,
    {
        self.info("starting scan");
        let mut engine = ScanEngine::new(&self.config);

        let mut step = self.process_engine(&mut engine, EngineEvent::Started, &mut on_partial)?;
        loop {
            let request = match step {
                Step::Submit(request) => request,
                Step::Finished => {
                    self.info(&format!("scan finished after {} rounds", engine.rounds()));
                    return self.summary(&engine, false);
                }
                Step::Failed(err) => {
                    log::warn!("[COORDINATOR] {:>8}us: scan failed: {}", self.t(), err);
                    return Err(err);
                }
                Step::Wait => {
                    return Err(ScanError::InvalidState(
                        "engine stalled without a request".to_string(),
                    ));
                }
            };

            if self.stop.load(Ordering::SeqCst) {
                self.info(&format!("stop requested, halting after {} rounds", engine.rounds()));
                return self.summary(&engine, true);
            }

            self.process_engine(&mut engine, EngineEvent::QueryDispatched, &mut on_partial)?;
            self.debug(&format!(
                "round {}: querying {} tokens from block {}",
                engine.rounds() + 1,
                request.search_tokens.len(),
                request.cursor_block_index
            ));

            let event = match self.service.query(request).await {
                Ok(response) => {
                    self.sync_checker
                        .write()
                        .map_err(|_| ScanError::StatePoisoned)?
                        .set_view_block_count(response.highest_processed_block_count);
                    EngineEvent::ResponseReceived(response)
                }
                Err(err) => EngineEvent::QueryFailed(err),
            };

            step = self.process_engine(&mut engine, event, &mut on_partial)?;
        }
    }

    /// Feeds one event into the engine and executes the resulting commands.
    fn process_engine<F>(
        &self,
        engine: &mut ScanEngine,
        event: EngineEvent,
        on_partial: &mut F,
    ) -> Result<Step, ScanError>
    where
        F: FnMut(Vec<OwnedOutput>),
    {
        let mut state = self.state.write().map_err(|_| ScanError::StatePoisoned)?;
        let cmds = engine.handle_event(event, &mut state, &self.crypto);

        let mut step = Step::Wait;
        for cmd in cmds {
            match cmd {
                EngineCommand::SubmitQuery(request) => {
                    self.trace(&format!(
                        "cmd: SubmitQuery({} tokens)",
                        request.search_tokens.len()
                    ));
                    step = Step::Submit(request);
                }
                EngineCommand::DeliverOutputs(outputs) => {
                    self.debug(&format!("cmd: DeliverOutputs({} outputs)", outputs.len()));
                    on_partial(outputs);
                }
                EngineCommand::Complete => {
                    self.trace("cmd: Complete");
                    step = Step::Finished;
                }
                EngineCommand::Abort(err) => {
                    self.trace(&format!("cmd: Abort({})", err));
                    step = Step::Failed(err);
                }
            }
        }
        Ok(step)
    }

    fn summary(&self, engine: &ScanEngine, stopped: bool) -> Result<ScanSummary, ScanError> {
        let state = self.state.read().map_err(|_| ScanError::StatePoisoned)?;
        let known_safe_block_count = state.epochs().global_known_safe_block_count();
        let target_block_count = engine.target_block_count();
        let completed = !stopped
            && target_block_count.is_some_and(|target| known_safe_block_count >= target);
        if !stopped && !completed {
            log::warn!(
                "[COORDINATOR] {:>8}us: scan ended at known safe block count {} short of target {:?}",
                self.t(),
                known_safe_block_count,
                target_block_count
            );
        }
        Ok(ScanSummary {
            rounds: engine.rounds(),
            outputs_found: engine.outputs_found(),
            known_safe_block_count,
            target_block_count,
            completed,
        })
    }

    fn t(&self) -> u128 {
        self.t0.elapsed().as_micros()
    }

    fn info(&self, msg: &str) {
        log::info!("[COORDINATOR] {:>8}us: {}", self.t(), msg);
    }

    fn debug(&self, msg: &str) {
        log::debug!("[COORDINATOR] {:>8}us: {}", self.t(), msg);
    }

    fn trace(&self, msg: &str) {
        log::trace!("[COORDINATOR] {:>8}us: {}", self.t(), msg);
    }
}
