use crate::error::ScanError;
use crate::scanning::types::{OwnedOutput, QueryRequest, QueryResponse};

/// Where the engine is within the round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Between rounds, or before the first one.
    Idle,
    /// A request was built and handed to the driver.
    RequestBuilt,
    /// The driver has sent the request.
    AwaitingResponse,
    Integrating,
    Done,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Done | ScanPhase::Failed)
    }

    pub fn in_round(self) -> bool {
        matches!(
            self,
            ScanPhase::RequestBuilt | ScanPhase::AwaitingResponse | ScanPhase::Integrating
        )
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Begin a new scan.
    Started,
    /// The driver sent the last `SubmitQuery` request.
    QueryDispatched,
    ResponseReceived(QueryResponse),
    /// The view service could not answer.
    QueryFailed(ScanError),
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    SubmitQuery(QueryRequest),
    /// Outputs confirmed this round. Never empty.
    DeliverOutputs(Vec<OwnedOutput>),
    Complete,
    Abort(ScanError),
}
