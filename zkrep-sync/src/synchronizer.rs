//! The synchronizer: a single in-order writer over the ledger event log plus
//! concurrent snapshot reads of the resulting projection.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use halo2curves_axiom::bn256::Fr;
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use zkrep_common::{fr_to_hex, AttesterId, CircuitKind, Prover, Settings, ZkProof};
use zkrep_epoch_state::{
    DataVector, EpochClock, EpochPhase, EpochTreePreimage, IncrementalMerkleTree, OrderedTree,
    StateError,
};

use crate::{
    config::SyncConfig,
    db::{EventOutcome, ProjectionDb},
    error::SyncError,
    event::{EventId, EventKind, LedgerEvent},
    handlers::{self, Plan, PlanContext},
    projection::Projection,
    source::EventSource,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// A consistency violation stopped ingestion until the next resync.
    Halted,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub cursor: Option<EventId>,
    pub synced_block: Option<u64>,
    pub run_state: RunState,
    pub applied: u64,
    pub rejected: u64,
    pub last_error: Option<String>,
}

/// Result of one fetch/apply step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollReport {
    pub processed: usize,
    pub synced_block: Option<u64>,
    /// The synced block reached the source head.
    pub caught_up: bool,
}

struct Inner {
    config: SyncConfig,
    source: Arc<dyn EventSource>,
    db: ProjectionDb,
    projection: RwLock<Projection>,
    /// Serialises every mutation of the projection.
    writer: Mutex<()>,
    status_tx: watch::Sender<SyncStatus>,
    shutdown_tx: watch::Sender<bool>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share the same projection and writer.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, source: Arc<dyn EventSource>) -> Result<Self, SyncError> {
        config.validate()?;
        let db = match &config.db_path {
            Some(path) => ProjectionDb::open(path, &config.settings)?,
            None => ProjectionDb::in_memory(&config.settings)?,
        };
        let projection = db.load_projection(&config.settings)?;
        let status = SyncStatus {
            cursor: projection.cursor,
            synced_block: projection.synced_block,
            ..SyncStatus::default()
        };
        let (status_tx, _) = watch::channel(status);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source,
                db,
                projection: RwLock::new(projection),
                writer: Mutex::new(()),
                status_tx,
                shutdown_tx,
                task: StdMutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.config.settings
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    fn set_run_state(&self, state: RunState) {
        self.inner.status_tx.send_modify(|s| {
            if s.run_state != RunState::Stopped {
                s.run_state = state;
            }
        });
    }

    fn task_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .map(|task| task.as_ref().map_or(false, |h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Spawn the background ingestion loop. Calling it twice is a no-op.
    pub fn start(&self) -> Result<(), SyncError> {
        if self.is_shutdown() {
            return Err(SyncError::Stopped);
        }
        let mut task = self
            .inner
            .task
            .lock()
            .map_err(|_| SyncError::Inconsistent("task mutex poisoned".into()))?;
        if task.as_ref().map_or(false, |h| !h.is_finished()) {
            return Ok(());
        }
        if self.status().run_state != RunState::Halted {
            self.set_run_state(RunState::Running);
        }
        let this = self.clone();
        *task = Some(tokio::spawn(async move { this.run().await }));
        info!("synchronizer started");
        Ok(())
    }

    async fn run(self) {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let retry = self.inner.config.retry.clone();
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let mut resync_after = false;
            let delay = match self.poll_once().await {
                Ok(report) => {
                    attempt = 0;
                    if !report.caught_up {
                        Duration::ZERO
                    } else if self.inner.config.follow {
                        self.inner.config.poll_interval()
                    } else {
                        info!("caught up with source head at block {:?}", report.synced_block);
                        self.set_run_state(RunState::Idle);
                        break;
                    }
                }
                Err(SyncError::Stopped) => break,
                Err(err) if err.is_transient() => {
                    let delay = retry.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!("sync step failed ({}), retrying in {:?}", err, delay);
                    delay
                }
                Err(err) if err.is_fatal() || matches!(err, SyncError::Halted(_)) => {
                    if self.inner.config.auto_resync {
                        let delay = retry.backoff(attempt);
                        attempt = attempt.saturating_add(1);
                        warn!("resyncing in {:?}", delay);
                        resync_after = true;
                        delay
                    } else {
                        self.inner.config.poll_interval()
                    }
                }
                Err(err) => {
                    warn!("sync step failed: {}", err);
                    self.inner.config.poll_interval()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            if resync_after {
                if let Err(e) = self.resync().await {
                    error!("resync failed: {}", e);
                }
            }
        }
        debug!("ingestion loop exited");
    }

    /// Fetch and apply the next span of blocks.
    pub async fn poll_once(&self) -> Result<PollReport, SyncError> {
        let _writer = self.inner.writer.lock().await;
        if self.is_shutdown() {
            return Err(SyncError::Stopped);
        }
        let status = self.status();
        if status.run_state == RunState::Halted {
            return Err(SyncError::Halted(status.last_error.unwrap_or_default()));
        }

        match self.ingest().await {
            Ok(report) => {
                self.inner.status_tx.send_modify(|s| s.last_error = None);
                Ok(report)
            }
            Err(err) => {
                if err.is_fatal() {
                    error!("halting ingestion: {}", err);
                    self.inner.status_tx.send_modify(|s| {
                        if s.run_state != RunState::Stopped {
                            s.run_state = RunState::Halted;
                        }
                        s.last_error = Some(err.to_string());
                    });
                } else if !matches!(err, SyncError::Stopped) {
                    self.inner
                        .status_tx
                        .send_modify(|s| s.last_error = Some(err.to_string()));
                }
                Err(err)
            }
        }
    }

    async fn ingest(&self) -> Result<PollReport, SyncError> {
        let config = &self.inner.config;
        let head = self.inner.source.head().await?;
        let synced = self.inner.projection.read().await.synced_block;
        if let Some(synced) = synced {
            if head.block_number < synced {
                return Err(SyncError::CursorGap {
                    head: head.block_number,
                    synced,
                });
            }
        }

        let from = synced.map_or(config.start_block, |b| b + 1);
        if from > head.block_number {
            return Ok(PollReport {
                processed: 0,
                synced_block: synced,
                caught_up: true,
            });
        }
        let to = head
            .block_number
            .min(from.saturating_add(config.max_block_span - 1));

        let events = self.inner.source.events(from, to).await?;
        debug!("fetched {} events in blocks {}..={}", events.len(), from, to);

        let mut previous: Option<(EventId, [u8; 32])> = None;
        let mut processed = 0;
        for event in &events {
            if self.is_shutdown() {
                return Err(SyncError::Stopped);
            }
            let id = event.id();
            if id.block_number < from || id.block_number > to {
                return Err(SyncError::OutOfOrderEvent {
                    block_number: id.block_number,
                    log_index: id.log_index,
                    detail: format!("outside requested blocks {from}..={to}"),
                });
            }
            let digest = event.digest();
            if let Some((prev_id, prev_digest)) = previous {
                if id == prev_id && digest == prev_digest {
                    debug!("dropping duplicate delivery of {}", id);
                    continue;
                }
                if id <= prev_id {
                    return Err(SyncError::OutOfOrderEvent {
                        block_number: id.block_number,
                        log_index: id.log_index,
                        detail: format!("delivered after {prev_id}"),
                    });
                }
            }
            previous = Some((id, digest));
            if self.ingest_event(event, digest).await? {
                processed += 1;
            }
        }

        self.inner.db.set_synced_block(to)?;
        self.inner.projection.write().await.synced_block = Some(to);
        self.inner.status_tx.send_modify(|s| s.synced_block = Some(to));
        Ok(PollReport {
            processed,
            synced_block: Some(to),
            caught_up: to == head.block_number,
        })
    }

    /// Apply a single event. Returns `false` for a skipped redelivery.
    async fn ingest_event(&self, event: &LedgerEvent, digest: [u8; 32]) -> Result<bool, SyncError> {
        let id = event.id();
        let cursor = self.inner.projection.read().await.cursor;
        if let Some(cursor) = cursor {
            if id <= cursor {
                return match self.inner.db.event_digest(id)? {
                    Some(stored) if stored == digest => {
                        debug!("skipping already applied event {}", id);
                        Ok(false)
                    }
                    Some(_) => Err(SyncError::OutOfOrderEvent {
                        block_number: id.block_number,
                        log_index: id.log_index,
                        detail: "redelivered with different content".into(),
                    }),
                    None => Err(SyncError::OutOfOrderEvent {
                        block_number: id.block_number,
                        log_index: id.log_index,
                        detail: format!("arrived behind cursor {cursor}"),
                    }),
                };
            }
        }

        let config = &self.inner.config;
        if !config.tracks(&event.attester_id) {
            self.inner.db.commit_event(event, &EventOutcome::Ignored, &[])?;
            self.inner
                .projection
                .write()
                .await
                .apply(id, event.block_timestamp, &[])?;
            self.inner.status_tx.send_modify(|s| s.cursor = Some(id));
            return Ok(true);
        }

        let mut ctx = PlanContext::new(&config.settings, &config.sealer_policy);
        let known = self
            .inner
            .projection
            .read()
            .await
            .attester(&event.attester_id)
            .is_some();
        if !known && !matches!(event.kind, EventKind::AttesterSignedUp { .. }) {
            ctx.discovered_clock = self.inner.source.attester_clock(&event.attester_id).await?;
        }
        if let EventKind::EpochSealed { epoch, .. } = &event.kind {
            ctx.local_epoch_root = Some(
                self.build_ordered_tree(&event.attester_id, *epoch)
                    .await
                    .map(|tree| tree.root())
                    .map_err(|e| match e {
                        SyncError::State(state) => state,
                        other => StateError::Invalid(other.to_string()),
                    }),
            );
        }

        let plan = {
            let projection = self.inner.projection.read().await;
            handlers::plan(&projection, &ctx, event)?
        };
        let (outcome, changes) = match plan {
            Plan::Apply(changes) => (EventOutcome::Applied, changes),
            Plan::Reject(rejection) => {
                warn!(
                    "rejected {} event {}: {} ({})",
                    event.kind.name(),
                    id,
                    rejection.code.as_str(),
                    rejection.detail
                );
                (EventOutcome::Rejected(rejection), Vec::new())
            }
        };

        self.inner.db.commit_event(event, &outcome, &changes)?;
        self.inner
            .projection
            .write()
            .await
            .apply(id, event.block_timestamp, &changes)?;
        self.inner.status_tx.send_modify(|s| {
            s.cursor = Some(id);
            match outcome {
                EventOutcome::Rejected(_) => s.rejected += 1,
                _ => s.applied += 1,
            }
        });
        debug!("applied {} event {}", event.kind.name(), id);
        Ok(true)
    }

    /// Wait until the synced block reaches the source head observed now.
    ///
    /// Stays pending while ingestion is halted; fails once the synchronizer
    /// is stopped.
    pub async fn wait_for_sync(&self) -> Result<(), SyncError> {
        let mut rx = self.inner.status_tx.subscribe();
        if rx.borrow().run_state == RunState::Stopped {
            return Err(SyncError::Stopped);
        }
        let target = self.inner.source.head().await?.block_number;
        if target < self.inner.config.start_block {
            return Ok(());
        }
        loop {
            {
                let status = rx.borrow_and_update();
                if status.run_state == RunState::Stopped {
                    return Err(SyncError::Stopped);
                }
                if status.synced_block.map_or(false, |b| b >= target) {
                    return Ok(());
                }
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::Stopped);
            }
        }
    }

    /// Wait for a started loop with `follow = false` to catch up and go idle.
    ///
    /// Checks the current state before waiting, so a loop that finished
    /// before the call resolves immediately. Fails once stopped.
    pub async fn wait_until_idle(&self) -> Result<SyncStatus, SyncError> {
        let mut rx = self.inner.status_tx.subscribe();
        loop {
            {
                let status = rx.borrow_and_update();
                match status.run_state {
                    RunState::Idle => return Ok(status.clone()),
                    RunState::Stopped => return Err(SyncError::Stopped),
                    RunState::Running | RunState::Halted => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::Stopped);
            }
        }
    }

    /// Stop the ingestion loop and release pending waiters.
    pub async fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner
            .status_tx
            .send_modify(|s| s.run_state = RunState::Stopped);
        let handle = self.inner.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("ingestion task ended abnormally: {}", e);
            }
        }
        info!("synchronizer stopped");
    }

    /// Rebuild the projection from the last persisted cursor and clear a halt.
    pub async fn resync(&self) -> Result<(), SyncError> {
        let _writer = self.inner.writer.lock().await;
        if self.is_shutdown() {
            return Err(SyncError::Stopped);
        }
        let projection = self.inner.db.load_projection(&self.inner.config.settings)?;
        let cursor = projection.cursor;
        let synced_block = projection.synced_block;
        *self.inner.projection.write().await = projection;
        let running = self.task_running();
        self.inner.status_tx.send_modify(|s| {
            s.cursor = cursor;
            s.synced_block = synced_block;
            s.last_error = None;
            if s.run_state != RunState::Stopped {
                s.run_state = if running { RunState::Running } else { RunState::Idle };
            }
        });
        info!("resynced projection at cursor {:?}", cursor);
        Ok(())
    }

    pub fn event_outcome(&self, block_number: u64, log_index: u64) -> Result<Option<EventOutcome>, SyncError> {
        self.inner.db.event_outcome(EventId {
            block_number,
            log_index,
        })
    }

    async fn now(&self) -> Result<u64, SyncError> {
        Ok(self.inner.source.head().await?.timestamp)
    }

    async fn clock_of(&self, attester_id: &AttesterId) -> Result<EpochClock, SyncError> {
        let known = self
            .inner
            .projection
            .read()
            .await
            .attester(attester_id)
            .map(|state| *state.clock());
        match known {
            Some(clock) => Ok(clock),
            None => self
                .inner
                .source
                .attester_clock(attester_id)
                .await?
                .ok_or_else(|| SyncError::UnknownAttester(attester_id.to_string())),
        }
    }

    /// Current epoch of an attester at the source head's timestamp.
    pub async fn load_current_epoch(&self, attester_id: &AttesterId) -> Result<u64, SyncError> {
        let clock = self.clock_of(attester_id).await?;
        Ok(clock.epoch_at(self.now().await?))
    }

    /// Seconds left in the attester's current epoch.
    pub async fn calc_epoch_remaining_time(&self, attester_id: &AttesterId) -> Result<u64, SyncError> {
        let clock = self.clock_of(attester_id).await?;
        Ok(clock.remaining(self.now().await?))
    }

    pub async fn attesters(&self) -> Vec<(AttesterId, EpochClock)> {
        self.inner
            .projection
            .read()
            .await
            .attesters()
            .map(|(id, state)| (id.clone(), *state.clock()))
            .collect()
    }

    pub async fn epoch_phase(&self, attester_id: &AttesterId, epoch: u64) -> Result<EpochPhase, SyncError> {
        let now = self.now().await?;
        let projection = self.inner.projection.read().await;
        let state = projection
            .attester(attester_id)
            .ok_or_else(|| SyncError::UnknownAttester(attester_id.to_string()))?;
        Ok(state.lifecycle.phase(epoch, now))
    }

    pub async fn sealed_root(&self, attester_id: &AttesterId, epoch: u64) -> Option<Fr> {
        self.inner
            .projection
            .read()
            .await
            .attester(attester_id)
            .and_then(|state| state.lifecycle.sealed_root(epoch))
    }

    pub async fn nullifier_exists(&self, nullifier: &Fr) -> bool {
        self.inner.projection.read().await.nullifiers().contains(nullifier)
    }

    /// Snapshot of the epoch's state tree.
    pub async fn gen_state_tree(&self, attester_id: &AttesterId, epoch: u64) -> Result<IncrementalMerkleTree, SyncError> {
        let projection = self.inner.projection.read().await;
        let state = projection
            .attester(attester_id)
            .ok_or_else(|| SyncError::UnknownAttester(attester_id.to_string()))?;
        Ok(state
            .state_tree(epoch)
            .cloned()
            .unwrap_or_else(|| IncrementalMerkleTree::new(self.inner.config.settings.state_tree_depth)))
    }

    pub async fn state_tree_leaves(&self, attester_id: &AttesterId, epoch: u64) -> Result<Vec<Fr>, SyncError> {
        Ok(self.gen_state_tree(attester_id, epoch).await?.leaves().to_vec())
    }

    /// Whether `root` was the epoch's state-tree root after some event.
    pub async fn state_tree_root_exists(&self, attester_id: &AttesterId, root: &Fr, epoch: u64) -> bool {
        self.inner
            .projection
            .read()
            .await
            .attester(attester_id)
            .map_or(false, |state| state.state_root_exists(epoch, root))
    }

    /// Whether `root` is the sealed epoch-tree root of `epoch`.
    pub async fn epoch_tree_root_exists(&self, attester_id: &AttesterId, root: &Fr, epoch: u64) -> bool {
        self.sealed_root(attester_id, epoch).await == Some(*root)
    }

    /// Aggregated preimages of the epoch in first-seen order.
    pub async fn gen_epoch_tree_preimages(
        &self,
        attester_id: &AttesterId,
        epoch: u64,
    ) -> Result<Vec<EpochTreePreimage>, SyncError> {
        let projection = self.inner.projection.read().await;
        let state = projection
            .attester(attester_id)
            .ok_or_else(|| SyncError::UnknownAttester(attester_id.to_string()))?;
        Ok(state
            .epoch_data(epoch)
            .map(|agg| agg.preimages())
            .unwrap_or_default())
    }

    /// Aggregate data of an epoch key; all zeros when it received nothing.
    pub async fn get_data_by_epoch_key(
        &self,
        attester_id: &AttesterId,
        epoch_key: &Fr,
        epoch: u64,
    ) -> Result<DataVector, SyncError> {
        let projection = self.inner.projection.read().await;
        let state = projection
            .attester(attester_id)
            .ok_or_else(|| SyncError::UnknownAttester(attester_id.to_string()))?;
        Ok(state
            .epoch_data(epoch)
            .and_then(|agg| agg.get(epoch_key))
            .cloned()
            .unwrap_or_else(|| DataVector::new(self.inner.config.settings.field_count)))
    }

    /// Build the ordered epoch tree off the async executor.
    pub async fn build_ordered_tree(&self, attester_id: &AttesterId, epoch: u64) -> Result<OrderedTree, SyncError> {
        let preimages = self.gen_epoch_tree_preimages(attester_id, epoch).await?;
        let settings = self.inner.config.settings.clone();
        let tree = tokio::task::spawn_blocking(move || OrderedTree::from_preimages(&preimages, &settings))
            .await
            .map_err(|e| SyncError::Inconsistent(format!("ordered tree task failed: {e}")))??;
        Ok(tree)
    }

    /// Produce the ordered-tree proof that seals an ended epoch.
    pub async fn prove_epoch_seal(
        &self,
        prover: &dyn Prover,
        attester_id: &AttesterId,
        epoch: u64,
    ) -> Result<ZkProof, SyncError> {
        match self.epoch_phase(attester_id, epoch).await? {
            EpochPhase::Ended => {}
            EpochPhase::Sealed => {
                return Err(StateError::EpochMismatch(format!("epoch {epoch} is already sealed")).into())
            }
            EpochPhase::Active => {
                return Err(StateError::EpochMismatch(format!("epoch {epoch} is still active")).into())
            }
        }
        let tree = self.build_ordered_tree(attester_id, epoch).await?;
        let proof = prover
            .gen_proof(CircuitKind::BuildOrderedTree, tree.circuit_inputs())
            .await?;
        let parsed = ZkProof::parse(CircuitKind::BuildOrderedTree, proof, self.settings())?;
        match &parsed {
            ZkProof::BuildOrderedTree(p, _) if p.root == tree.root() && p.checksum == tree.checksum() => {
                info!(
                    "proved seal of attester {} epoch {} with root {}",
                    attester_id,
                    epoch,
                    fr_to_hex(&p.root)
                );
                Ok(parsed)
            }
            _ => Err(SyncError::InvalidProof(
                "prover output does not match the local ordered tree".into(),
            )),
        }
    }

    /// Check a proof against the projection, then with the prover.
    ///
    /// Transitions out of an ended but unsealed epoch fail with
    /// `UnsealedEpochReference`; reused nullifiers fail with
    /// `DuplicateNullifier`. Stale roots and foreign chain ids yield `false`.
    pub async fn verify_proof(&self, prover: &dyn Prover, proof: &ZkProof) -> Result<bool, SyncError> {
        let chain_id = self.settings().chain_id;
        let proof_chain = match proof {
            ZkProof::Signup(p, _) => Some(p.control.chain_id),
            ZkProof::EpochKey(p, _) => Some(p.control.chain_id),
            ZkProof::EpochKeyLite(p, _) => Some(p.control.chain_id),
            ZkProof::Reputation(p, _) => Some(p.control.chain_id),
            ZkProof::UserStateTransition(p, _) => Some(p.control.chain_id),
            ZkProof::BuildOrderedTree(..) => None,
        };
        if proof_chain.map_or(false, |c| c != chain_id) {
            debug!("{} proof bound to another chain", proof.kind());
            return Ok(false);
        }

        match proof {
            ZkProof::EpochKey(p, _) => {
                let attester = &p.control.attester_id;
                if !self
                    .state_tree_root_exists(attester, &p.state_tree_root, p.control.epoch)
                    .await
                {
                    return Ok(false);
                }
            }
            ZkProof::Reputation(p, _) => {
                let attester = &p.control.attester_id;
                if !self
                    .state_tree_root_exists(attester, &p.state_tree_root, p.control.epoch)
                    .await
                {
                    return Ok(false);
                }
            }
            ZkProof::UserStateTransition(p, _) => {
                let now = self.now().await?;
                let projection = self.inner.projection.read().await;
                let attester = &p.control.attester_id;
                let state = projection
                    .attester(attester)
                    .ok_or_else(|| SyncError::UnknownAttester(attester.to_string()))?;
                let sealed = state.lifecycle.require_sealed(p.from_epoch, now)?;
                if sealed != p.from_epoch_tree_root
                    || !state.state_root_exists(p.from_epoch, &p.from_state_tree_root)
                {
                    return Ok(false);
                }
                projection.nullifiers().check_all(&p.epoch_key_nullifiers)?;
            }
            _ => {}
        }

        let inner = proof.proof();
        Ok(prover
            .verify_proof(proof.kind(), &inner.public_signals, &inner.raw_proof)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryEventSource;
    use halo2curves_axiom::ff::Field;

    fn attester() -> AttesterId {
        AttesterId::from(100u64)
    }

    fn settings() -> Settings {
        Settings {
            state_tree_depth: 4,
            epoch_tree_depth: 4,
            ..Settings::default()
        }
    }

    async fn synchronizer(source: &MemoryEventSource) -> Synchronizer {
        let config = SyncConfig {
            settings: settings(),
            poll_interval_ms: 10,
            ..SyncConfig::default()
        };
        Synchronizer::new(config, Arc::new(source.clone())).unwrap()
    }

    #[tokio::test]
    async fn poll_applies_events_and_advances() {
        let source = MemoryEventSource::new();
        source
            .extend([
                LedgerEvent::new(1, 0, 0, attester(), EventKind::AttesterSignedUp { epoch_length: 100 }),
                LedgerEvent::new(2, 0, 10, attester(), EventKind::StateTreeLeaf {
                    epoch: 0,
                    index: 0,
                    leaf: Fr::from(3u64),
                }),
            ])
            .await;
        let sync = synchronizer(&source).await;
        let report = sync.poll_once().await.unwrap();
        assert_eq!(report.processed, 2);
        assert!(report.caught_up);
        assert_eq!(sync.status().applied, 2);
        assert_eq!(sync.load_current_epoch(&attester()).await.unwrap(), 0);
        assert_eq!(sync.calc_epoch_remaining_time(&attester()).await.unwrap(), 90);
        assert_eq!(sync.state_tree_leaves(&attester(), 0).await.unwrap(), vec![Fr::from(3u64)]);
        assert_eq!(sync.event_outcome(2, 0).unwrap(), Some(EventOutcome::Applied));
    }

    #[tokio::test]
    async fn untracked_attesters_are_ignored() {
        let source = MemoryEventSource::new();
        source
            .push(LedgerEvent::new(1, 0, 0, AttesterId::from(5u64), EventKind::AttesterSignedUp {
                epoch_length: 100,
            }))
            .await;
        let config = SyncConfig {
            settings: settings(),
            attesters: vec![attester()],
            ..SyncConfig::default()
        };
        let sync = Synchronizer::new(config, Arc::new(source.clone())).unwrap();
        sync.poll_once().await.unwrap();
        assert_eq!(sync.event_outcome(1, 0).unwrap(), Some(EventOutcome::Ignored));
        assert!(sync.attesters().await.is_empty());
    }

    #[tokio::test]
    async fn clock_comes_from_source_for_unsynced_attester() {
        let source = MemoryEventSource::new();
        source
            .set_attester_clock(attester(), EpochClock::new(0, 50).unwrap())
            .await;
        source
            .set_head(crate::event::ChainHead {
                block_number: 3,
                timestamp: 120,
            })
            .await;
        let sync = synchronizer(&source).await;
        assert_eq!(sync.load_current_epoch(&attester()).await.unwrap(), 2);
        assert!(matches!(
            sync.load_current_epoch(&AttesterId::from(1u64)).await,
            Err(SyncError::UnknownAttester(_))
        ));
        assert!(!sync.nullifier_exists(&Fr::ONE).await);
    }
}
