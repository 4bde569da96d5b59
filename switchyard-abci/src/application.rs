// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! This module exports the traits implemented by every versioned application.

use crate::error::AppResult;
use crate::resources::AppResources;
use crate::types::*;

/// The call surface a consensus engine drives on a state machine.
///
/// Block-processing calls (`init_chain`, `begin_block`, `deliver_tx`,
/// `end_block`, `commit`) arrive sequentially from the consensus engine.
/// `info`, `query` and `check_tx` may arrive concurrently from other threads.
#[cfg_attr(any(test, feature = "test-exports"), mockall::automock)]
pub trait Application: Send + Sync {
    /// Information about the application state
    fn info(&self, req: RequestInfo) -> AppResult<ResponseInfo>;

    /// Arbitrary read-only query
    fn query(&self, req: RequestQuery) -> AppResult<ResponseQuery>;

    /// Transaction admission check
    fn check_tx(&self, req: RequestCheckTx) -> AppResult<ResponseCheckTx>;

    /// Initialize the chain from genesis
    fn init_chain(&self, req: RequestInitChain) -> AppResult<ResponseInitChain>;

    /// Build a block proposal out of mempool transactions
    fn prepare_proposal(&self, req: RequestPrepareProposal)
        -> AppResult<ResponsePrepareProposal>;

    /// Accept or reject a block proposal
    fn process_proposal(&self, req: RequestProcessProposal)
        -> AppResult<ResponseProcessProposal>;

    /// Start executing a decided block
    fn begin_block(&self, req: RequestBeginBlock) -> AppResult<ResponseBeginBlock>;

    /// Execute a transaction of the current block
    fn deliver_tx(&self, req: RequestDeliverTx) -> AppResult<ResponseDeliverTx>;

    /// Finish executing the current block
    fn end_block(&self, req: RequestEndBlock) -> AppResult<ResponseEndBlock>;

    /// Persist the state resulting from the current block
    fn commit(&self) -> AppResult<ResponseCommit>;

    /// List local snapshots
    fn list_snapshots(&self) -> AppResult<ResponseListSnapshots>;

    /// Decide on a snapshot offered during state sync
    fn offer_snapshot(&self, req: RequestOfferSnapshot) -> AppResult<ResponseOfferSnapshot>;

    /// Read a local snapshot chunk
    fn load_snapshot_chunk(
        &self,
        req: RequestLoadSnapshotChunk,
    ) -> AppResult<ResponseLoadSnapshotChunk>;

    /// Apply a chunk received during state sync
    fn apply_snapshot_chunk(
        &self,
        req: RequestApplySnapshotChunk,
    ) -> AppResult<ResponseApplySnapshotChunk>;
}

/// Builds the application of one version out of the shared resources.
///
/// Called while the multiplexer holds exclusive access to its active slot:
/// implementations must not perform unbounded I/O.
pub trait AppFactory: Send + Sync {
    /// Create a new application instance
    fn create(&self, resources: &AppResources) -> AppResult<Box<dyn Application>>;
}

impl<F> AppFactory for F
where
    F: Fn(&AppResources) -> AppResult<Box<dyn Application>> + Send + Sync,
{
    fn create(&self, resources: &AppResources) -> AppResult<Box<dyn Application>> {
        self(resources)
    }
}
