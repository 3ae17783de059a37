//! Scan round decision engine.
//!
//! A pure state machine over the round loop:
//! - **Input**: `EngineEvent` (what the driver observed).
//! - **Output**: `Vec<EngineCommand>` (what the driver must do next).
//!
//! The engine never touches the network and never awaits. It mutates the
//! account's [`ScanState`] only while handling `ResponseReceived`, and only
//! after the whole round has been validated.

mod logic;
pub mod scaler;
pub mod state;
pub mod sync_check;
pub mod types;

#[cfg(test)]
mod tests;

pub use scaler::QueryScaler;
pub use state::{ScanState, ScanStatus};
pub use sync_check::SyncChecker;
pub use types::{EngineCommand, EngineEvent, ScanPhase};

use crate::config::ScanConfig;
use crate::scanning::domain::crypto::ScanCrypto;

use state::RoundState;

/// Drives one scan at a time over a borrowed [`ScanState`].
#[derive(Debug)]
pub struct ScanEngine {
    round: RoundState,
}

impl ScanEngine {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            round: RoundState::new(config),
        }
    }

    /// Consumes an event and returns the commands the driver must execute,
    /// in order.
    pub fn handle_event(
        &mut self,
        event: EngineEvent,
        state: &mut ScanState,
        crypto: &dyn ScanCrypto,
    ) -> Vec<EngineCommand> {
        match event {
            EngineEvent::Started => logic::on_started(&mut self.round, state),
            EngineEvent::QueryDispatched => logic::on_query_dispatched(&mut self.round),
            EngineEvent::ResponseReceived(response) => {
                logic::on_response(&mut self.round, state, crypto, response)
            }
            EngineEvent::QueryFailed(err) => logic::on_query_failed(&mut self.round, err),
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.round.phase
    }

    /// Rounds integrated in the current scan.
    pub fn rounds(&self) -> u64 {
        self.round.rounds
    }

    pub fn outputs_found(&self) -> usize {
        self.round.outputs_found
    }

    /// The block count this scan converges on, once known.
    pub fn target_block_count(&self) -> Option<u64> {
        self.round.target_block_count
    }
}
