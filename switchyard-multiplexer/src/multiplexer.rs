// Copyright (c) 2022 MASSA LABS <info@massa.net>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_abci::*;
use switchyard_logging::switchyard_trace;
use switchyard_versioning::VersionRegistry;
use tracing::{error, info};

use crate::config::MultiplexerConfig;
use crate::error::{MultiplexerError, MultiplexerResult, UpgradeError};

/// The application currently receiving calls
struct ActiveApp {
    version: AppVersion,
    app: Box<dyn Application>,
}

/// Forwards every call to the application of the active version and switches
/// that application when consensus-replicated data carries a new version.
///
/// Calls hold a read guard on the active slot for their whole duration, a switch
/// holds the write guard: no call ever reaches a half-replaced application.
pub struct Multiplexer {
    registry: Arc<VersionRegistry>,
    resources: AppResources,
    config: MultiplexerConfig,
    active: RwLock<Option<ActiveApp>>,
    halted: AtomicBool,
}

impl Multiplexer {
    /// Uninitialized multiplexer: the first version is activated by
    /// `init_chain`, `restore` or `offer_snapshot`
    pub fn new(
        registry: Arc<VersionRegistry>,
        resources: AppResources,
        config: MultiplexerConfig,
    ) -> Self {
        Multiplexer {
            registry,
            resources,
            config,
            active: RwLock::new(None),
            halted: AtomicBool::new(false),
        }
    }

    /// Version of the active application, if any
    pub fn active_version(&self) -> Option<AppVersion> {
        self.active.read().as_ref().map(|active| active.version)
    }

    /// Whether a fatal error stopped the multiplexer
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Activate the version persisted by a previous run of the node
    pub fn restore(&self, version: AppVersion) -> MultiplexerResult<()> {
        self.ensure_running()?;
        self.activate(version, None)
            .map(|_| ())
            .map_err(|err| self.fatal(err))
    }

    /// Switch to `target`, which must be registered, in-process and higher
    /// than the active version. On error the active application is unchanged.
    pub fn upgrade(&self, target: AppVersion) -> Result<(), UpgradeError> {
        self.switch(target, None)
    }

    /// Forwarded
    pub fn info(&self, req: RequestInfo) -> MultiplexerResult<ResponseInfo> {
        self.with_app(|app| app.info(req))
    }

    /// Forwarded, may run concurrently with block execution
    pub fn query(&self, req: RequestQuery) -> MultiplexerResult<ResponseQuery> {
        self.with_app(|app| app.query(req))
    }

    /// Forwarded
    pub fn check_tx(&self, req: RequestCheckTx) -> MultiplexerResult<ResponseCheckTx> {
        self.with_app(|app| app.check_tx(req))
    }

    /// Activate the genesis version and initialize its application
    pub fn init_chain(&self, req: RequestInitChain) -> MultiplexerResult<ResponseInitChain> {
        self.ensure_running()?;
        let version = req
            .app_version()
            .or(self.config.default_app_version)
            .ok_or(UpgradeError::MissingGenesisVersion)
            .and_then(|version| self.activate(version, Some(req.initial_height)))
            .map_err(|err| self.fatal(err))?;
        info!("chain {} initialized with version {}", req.chain_id, version);
        self.with_app(|app| app.init_chain(req))
    }

    /// Forwarded
    pub fn prepare_proposal(
        &self,
        req: RequestPrepareProposal,
    ) -> MultiplexerResult<ResponsePrepareProposal> {
        self.with_app(|app| app.prepare_proposal(req))
    }

    /// Forwarded
    pub fn process_proposal(
        &self,
        req: RequestProcessProposal,
    ) -> MultiplexerResult<ResponseProcessProposal> {
        self.with_app(|app| app.process_proposal(req))
    }

    /// Forwarded unless a halt condition is met
    pub fn begin_block(&self, req: RequestBeginBlock) -> MultiplexerResult<ResponseBeginBlock> {
        self.ensure_running()?;
        self.check_halt_conditions(&req.header)?;
        self.with_app(|app| app.begin_block(req))
    }

    /// Forwarded
    pub fn deliver_tx(&self, req: RequestDeliverTx) -> MultiplexerResult<ResponseDeliverTx> {
        self.with_app(|app| app.deliver_tx(req))
    }

    /// Forwarded, then the version found in the consensus parameter updates is
    /// activated before returning
    pub fn end_block(&self, req: RequestEndBlock) -> MultiplexerResult<ResponseEndBlock> {
        let height = req.height;
        let res = self.with_app(|app| app.end_block(req))?;
        if let Some(next) = res.app_version() {
            if self.active_version() != Some(next) {
                self.switch(next, Some(height)).map_err(|err| self.fatal(err))?;
            }
        }
        Ok(res)
    }

    /// Forwarded
    pub fn commit(&self) -> MultiplexerResult<ResponseCommit> {
        self.with_app(|app| app.commit())
    }

    /// Forwarded
    pub fn list_snapshots(&self) -> MultiplexerResult<ResponseListSnapshots> {
        self.with_app(|app| app.list_snapshots())
    }

    /// Activates the version the snapshot was taken with, then forwards
    pub fn offer_snapshot(
        &self,
        req: RequestOfferSnapshot,
    ) -> MultiplexerResult<ResponseOfferSnapshot> {
        self.ensure_running()?;
        let target = req.app_version;
        let height = req
            .snapshot
            .as_ref()
            .and_then(|snapshot| i64::try_from(snapshot.height).ok());
        match self.active_version() {
            None => self.activate(target, height).map(|_| ()),
            Some(current) if current != target => self.switch(target, height),
            Some(_) => Ok(()),
        }
        .map_err(|err| self.fatal(err))?;
        self.with_app(|app| app.offer_snapshot(req))
    }

    /// Forwarded
    pub fn load_snapshot_chunk(
        &self,
        req: RequestLoadSnapshotChunk,
    ) -> MultiplexerResult<ResponseLoadSnapshotChunk> {
        self.with_app(|app| app.load_snapshot_chunk(req))
    }

    /// Forwarded
    pub fn apply_snapshot_chunk(
        &self,
        req: RequestApplySnapshotChunk,
    ) -> MultiplexerResult<ResponseApplySnapshotChunk> {
        self.with_app(|app| app.apply_snapshot_chunk(req))
    }

    /// Run `call` on the active application under a read guard
    fn with_app<T>(
        &self,
        call: impl FnOnce(&dyn Application) -> AppResult<T>,
    ) -> MultiplexerResult<T> {
        self.ensure_running()?;
        let active = self.active.read();
        let active = active.as_ref().ok_or(MultiplexerError::NotInitialized)?;
        Ok(call(active.app.as_ref())?)
    }

    fn ensure_running(&self) -> MultiplexerResult<()> {
        if self.is_halted() {
            return Err(MultiplexerError::Halted);
        }
        Ok(())
    }

    /// Latch the halted state and wrap the error
    fn fatal(&self, err: UpgradeError) -> MultiplexerError {
        error!("fatal version switch error, halting: {}", err);
        self.halted.store(true, Ordering::SeqCst);
        MultiplexerError::Fatal(err)
    }

    fn check_halt_conditions(&self, header: &Header) -> MultiplexerResult<()> {
        let halt_height = self.config.halt_height;
        if halt_height > 0 && u64::try_from(header.height).map_or(false, |h| h >= halt_height) {
            return Err(MultiplexerError::HaltRequested(format!(
                "halt height {} reached at height {}",
                halt_height, header.height
            )));
        }
        let halt_time = self.config.halt_time;
        if halt_time > 0 && header.time >= halt_time {
            return Err(MultiplexerError::HaltRequested(format!(
                "halt time {} reached by block time {}",
                halt_time, header.time
            )));
        }
        Ok(())
    }

    /// Build the application of `version` with the shared resources
    fn build(&self, version: AppVersion) -> Result<Box<dyn Application>, UpgradeError> {
        self.registry
            .factory(version)?
            .create(&self.resources)
            .map_err(|source| UpgradeError::Activation { version, source })
    }

    /// Install the first application
    fn activate(
        &self,
        version: AppVersion,
        height: Option<i64>,
    ) -> Result<AppVersion, UpgradeError> {
        let mut active = self.active.write();
        if let Some(current) = active.as_ref() {
            return Err(UpgradeError::AlreadyInitialized(current.version));
        }
        let app = self.build(version)?;
        *active = Some(ActiveApp { version, app });
        info!("activated application version {}", version);
        switchyard_trace!("multiplexer.activate", { "version": version, "height": height });
        Ok(version)
    }

    /// Replace the active application by the one of `target`
    fn switch(&self, target: AppVersion, height: Option<i64>) -> Result<(), UpgradeError> {
        let mut active = self.active.write();
        let current = active
            .as_ref()
            .map(|active| active.version)
            .ok_or(UpgradeError::NotActive)?;
        if target <= current {
            return Err(UpgradeError::NotMonotonic { current, target });
        }
        let app = self.build(target)?;
        // the previous application is dropped here, still under the write guard
        *active = Some(ActiveApp {
            version: target,
            app,
        });
        info!("switched application from version {} to version {}", current, target);
        switchyard_trace!("multiplexer.switch", { "from": current, "to": target, "height": height });
        Ok(())
    }
}

/// The multiplexer is itself an application: a host drives it through the same
/// surface as any single version. Errors are mapped with `From<MultiplexerError>`,
/// see [`AppError::is_fatal`].
impl Application for Multiplexer {
    fn info(&self, req: RequestInfo) -> AppResult<ResponseInfo> {
        Ok(Multiplexer::info(self, req)?)
    }

    fn query(&self, req: RequestQuery) -> AppResult<ResponseQuery> {
        Ok(Multiplexer::query(self, req)?)
    }

    fn check_tx(&self, req: RequestCheckTx) -> AppResult<ResponseCheckTx> {
        Ok(Multiplexer::check_tx(self, req)?)
    }

    fn init_chain(&self, req: RequestInitChain) -> AppResult<ResponseInitChain> {
        Ok(Multiplexer::init_chain(self, req)?)
    }

    fn prepare_proposal(&self, req: RequestPrepareProposal) -> AppResult<ResponsePrepareProposal> {
        Ok(Multiplexer::prepare_proposal(self, req)?)
    }

    fn process_proposal(&self, req: RequestProcessProposal) -> AppResult<ResponseProcessProposal> {
        Ok(Multiplexer::process_proposal(self, req)?)
    }

    fn begin_block(&self, req: RequestBeginBlock) -> AppResult<ResponseBeginBlock> {
        Ok(Multiplexer::begin_block(self, req)?)
    }

    fn deliver_tx(&self, req: RequestDeliverTx) -> AppResult<ResponseDeliverTx> {
        Ok(Multiplexer::deliver_tx(self, req)?)
    }

    fn end_block(&self, req: RequestEndBlock) -> AppResult<ResponseEndBlock> {
        Ok(Multiplexer::end_block(self, req)?)
    }

    fn commit(&self) -> AppResult<ResponseCommit> {
        Ok(Multiplexer::commit(self)?)
    }

    fn list_snapshots(&self) -> AppResult<ResponseListSnapshots> {
        Ok(Multiplexer::list_snapshots(self)?)
    }

    fn offer_snapshot(&self, req: RequestOfferSnapshot) -> AppResult<ResponseOfferSnapshot> {
        Ok(Multiplexer::offer_snapshot(self, req)?)
    }

    fn load_snapshot_chunk(
        &self,
        req: RequestLoadSnapshotChunk,
    ) -> AppResult<ResponseLoadSnapshotChunk> {
        Ok(Multiplexer::load_snapshot_chunk(self, req)?)
    }

    fn apply_snapshot_chunk(
        &self,
        req: RequestApplySnapshotChunk,
    ) -> AppResult<ResponseApplySnapshotChunk> {
        Ok(Multiplexer::apply_snapshot_chunk(self, req)?)
    }
}
