use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::scanning::types::{QueryRequest, QueryResponse};

/// The oblivious view service, as seen by the scanner.
///
/// One call is one round trip. Implementations own transport, attestation
/// and retries; a failed call is reported as a [`ScanError`], usually
/// `ConnectionFailure`.
#[async_trait]
pub trait ViewService: Send + Sync {
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ScanError>;
}

#[async_trait]
impl<S: ViewService + ?Sized> ViewService for Arc<S> {
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ScanError> {
        (**self).query(request).await
    }
}
