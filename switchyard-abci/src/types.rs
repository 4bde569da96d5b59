// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Requests and responses exchanged between the consensus engine and an application.

/// Version of the application (state machine) logic, agreed by every node
pub type AppVersion = u64;

/// Version part of the consensus parameters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionParams {
    /// application version
    pub app: AppVersion,
}

/// Block part of the consensus parameters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockParams {
    /// maximum block size in bytes
    pub max_bytes: i64,
    /// maximum gas per block, -1 for unlimited
    pub max_gas: i64,
}

/// Chain-wide consensus parameters. Every field is optional: in an update,
/// an absent field means "unchanged".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsensusParams {
    /// block parameters
    pub block: Option<BlockParams>,
    /// version parameters
    pub version: Option<VersionParams>,
}

impl ConsensusParams {
    /// Consensus params carrying only an application version
    pub fn with_app_version(app: AppVersion) -> Self {
        ConsensusParams {
            block: None,
            version: Some(VersionParams { app }),
        }
    }

    /// Application version, if set
    pub fn app_version(&self) -> Option<AppVersion> {
        self.version.as_ref().map(|v| v.app)
    }
}

/// Validator set change
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorUpdate {
    /// public key bytes
    pub pub_key: Vec<u8>,
    /// voting power, 0 removes the validator
    pub power: i64,
}

/// Event emitted while processing a block or a transaction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// event type
    pub kind: String,
    /// key/value attributes
    pub attributes: Vec<(String, String)>,
}

/// Block header as seen by the application
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// chain identifier
    pub chain_id: String,
    /// block height
    pub height: i64,
    /// block time, unix seconds
    pub time: u64,
    /// application version the block was produced with
    pub app_version: AppVersion,
}

/// Info request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// consensus engine software version
    pub version: String,
    /// block protocol version
    pub block_version: u64,
    /// p2p protocol version
    pub p2p_version: u64,
}

/// Info response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    /// free-form application data
    pub data: String,
    /// application software version
    pub version: String,
    /// application logic version
    pub app_version: AppVersion,
    /// height of the last committed block
    pub last_block_height: i64,
    /// app hash of the last committed block
    pub last_block_app_hash: Vec<u8>,
}

/// Read-only query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestQuery {
    /// raw query data
    pub data: Vec<u8>,
    /// query path
    pub path: String,
    /// height to query at, 0 for latest
    pub height: i64,
    /// whether a proof is requested
    pub prove: bool,
}

/// Query response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseQuery {
    /// 0 on success
    pub code: u32,
    /// free-form log
    pub log: String,
    /// queried key
    pub key: Vec<u8>,
    /// queried value
    pub value: Vec<u8>,
    /// height the query was answered at
    pub height: i64,
}

/// Kind of transaction admission check
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckTxKind {
    /// first time the transaction is seen
    #[default]
    New,
    /// re-check after a block was committed
    Recheck,
}

/// Transaction admission check
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestCheckTx {
    /// raw transaction
    pub tx: Vec<u8>,
    /// check kind
    pub kind: CheckTxKind,
}

/// Transaction admission check response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseCheckTx {
    /// 0 if the transaction is admitted
    pub code: u32,
    /// result data
    pub data: Vec<u8>,
    /// free-form log
    pub log: String,
    /// gas requested
    pub gas_wanted: i64,
    /// gas used
    pub gas_used: i64,
}

/// Genesis initialization
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInitChain {
    /// genesis time, unix seconds
    pub time: u64,
    /// chain identifier
    pub chain_id: String,
    /// genesis consensus parameters, carrying the initial application version
    pub consensus_params: Option<ConsensusParams>,
    /// initial validator set
    pub validators: Vec<ValidatorUpdate>,
    /// serialized genesis application state
    pub app_state_bytes: Vec<u8>,
    /// height of the first block
    pub initial_height: i64,
}

impl RequestInitChain {
    /// Application version found in the genesis consensus parameters
    pub fn app_version(&self) -> Option<AppVersion> {
        self.consensus_params
            .as_ref()
            .and_then(ConsensusParams::app_version)
    }
}

/// Genesis initialization response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseInitChain {
    /// consensus parameters overridden by the application
    pub consensus_params: Option<ConsensusParams>,
    /// validator set overridden by the application
    pub validators: Vec<ValidatorUpdate>,
    /// initial app hash
    pub app_hash: Vec<u8>,
}

/// Proposal preparation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestPrepareProposal {
    /// maximum size of the returned transactions, in bytes
    pub max_tx_bytes: i64,
    /// candidate transactions from the mempool
    pub txs: Vec<Vec<u8>>,
    /// height of the proposed block
    pub height: i64,
    /// time of the proposed block, unix seconds
    pub time: u64,
}

/// Proposal preparation response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponsePrepareProposal {
    /// transactions to include in the proposal
    pub txs: Vec<Vec<u8>>,
}

/// Proposal verification
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestProcessProposal {
    /// proposed transactions
    pub txs: Vec<Vec<u8>>,
    /// proposed block hash
    pub hash: Vec<u8>,
    /// height of the proposed block
    pub height: i64,
    /// time of the proposed block, unix seconds
    pub time: u64,
}

/// Proposal verdict
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProposalStatus {
    /// unknown status, treated as a rejection by the consensus engine
    #[default]
    Unknown,
    /// proposal accepted
    Accept,
    /// proposal rejected
    Reject,
}

/// Proposal verification response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseProcessProposal {
    /// verdict
    pub status: ProposalStatus,
}

/// Start of block execution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestBeginBlock {
    /// block hash
    pub hash: Vec<u8>,
    /// block header
    pub header: Header,
}

/// Start of block execution response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseBeginBlock {
    /// emitted events
    pub events: Vec<Event>,
}

/// Transaction execution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestDeliverTx {
    /// raw transaction
    pub tx: Vec<u8>,
}

/// Transaction execution response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseDeliverTx {
    /// 0 on success
    pub code: u32,
    /// result data
    pub data: Vec<u8>,
    /// free-form log
    pub log: String,
    /// gas requested
    pub gas_wanted: i64,
    /// gas used
    pub gas_used: i64,
    /// emitted events
    pub events: Vec<Event>,
}

/// End of block execution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestEndBlock {
    /// block height
    pub height: i64,
}

/// End of block execution response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseEndBlock {
    /// validator set changes
    pub validator_updates: Vec<ValidatorUpdate>,
    /// consensus parameter changes; a version inside signals a scheduled upgrade
    pub consensus_param_updates: Option<ConsensusParams>,
    /// emitted events
    pub events: Vec<Event>,
}

impl ResponseEndBlock {
    /// Application version requested by this block, if any
    pub fn app_version(&self) -> Option<AppVersion> {
        self.consensus_param_updates
            .as_ref()
            .and_then(ConsensusParams::app_version)
    }
}

/// Commit response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseCommit {
    /// app hash after the commit
    pub data: Vec<u8>,
    /// blocks below this height may be pruned
    pub retain_height: i64,
}

/// State-sync snapshot descriptor
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// snapshot height
    pub height: u64,
    /// application-specific format
    pub format: u32,
    /// number of chunks
    pub chunks: u32,
    /// snapshot hash
    pub hash: Vec<u8>,
    /// application-specific metadata
    pub metadata: Vec<u8>,
}

/// Snapshot listing response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseListSnapshots {
    /// available snapshots
    pub snapshots: Vec<Snapshot>,
}

/// Snapshot offered by a peer during state sync
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOfferSnapshot {
    /// offered snapshot
    pub snapshot: Option<Snapshot>,
    /// light-client verified app hash for the snapshot height
    pub app_hash: Vec<u8>,
    /// application version at the snapshot height
    pub app_version: AppVersion,
}

/// Verdict on an offered snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OfferSnapshotResult {
    /// unknown result, aborts state sync
    #[default]
    Unknown,
    /// snapshot accepted, start applying chunks
    Accept,
    /// abort state sync
    Abort,
    /// reject this snapshot, try others
    Reject,
    /// reject all snapshots of this format
    RejectFormat,
    /// reject all snapshots from this sender
    RejectSender,
}

/// Offered snapshot response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseOfferSnapshot {
    /// verdict
    pub result: OfferSnapshotResult,
}

/// Request for a local snapshot chunk
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestLoadSnapshotChunk {
    /// snapshot height
    pub height: u64,
    /// snapshot format
    pub format: u32,
    /// chunk index
    pub chunk: u32,
}

/// Local snapshot chunk
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseLoadSnapshotChunk {
    /// chunk bytes
    pub chunk: Vec<u8>,
}

/// Chunk received from a peer during state sync
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestApplySnapshotChunk {
    /// chunk index
    pub index: u32,
    /// chunk bytes
    pub chunk: Vec<u8>,
    /// peer that sent the chunk
    pub sender: String,
}

/// Verdict on an applied chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplySnapshotChunkResult {
    /// unknown result, aborts state sync
    #[default]
    Unknown,
    /// chunk applied
    Accept,
    /// abort state sync
    Abort,
    /// retry this chunk
    Retry,
    /// retry the whole snapshot
    RetrySnapshot,
    /// reject this snapshot
    RejectSnapshot,
}

/// Applied chunk response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseApplySnapshotChunk {
    /// verdict
    pub result: ApplySnapshotChunkResult,
    /// chunks to fetch again
    pub refetch_chunks: Vec<u32>,
    /// peers to ban
    pub reject_senders: Vec<String>,
}
