use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::lock::{Mutex, MutexGuard};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::editing::{Document, TextHost};
use crate::error::{Result, SyncError};
use crate::model::{BlockId, RemoteRecord};
use crate::remote::{self, Position, RemoteError, RemoteService};
use crate::sync::plan::{CreateOp, DeleteOp, Plan, TypeChangeOp, UpdateOp};
use crate::sync::report::{FailedItem, OperationKind, SyncReport};
use crate::sync::session::SyncSession;

/// Shared access to a session plus the guarantee that only one sync runs at a time.
///
/// The session lock is taken for every local step and released before each
/// remote call, so the host can keep editing while a run is in flight.
pub struct SyncHandle<H: TextHost = Document> {
    session: Arc<Mutex<SyncSession<H>>>,
    gate: Arc<Mutex<()>>,
}

impl<H: TextHost> Clone for SyncHandle<H> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<H: TextHost + Send> SyncHandle<H> {
    pub fn new(session: SyncSession<H>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SyncSession<H>> {
        self.session.lock().await
    }

    pub async fn preview(&self) -> Plan {
        self.session.lock().await.preview()
    }

    /// Run a sync, waiting for any run already in progress to finish first.
    ///
    /// `confirm` is asked before anything is sent when the plan deletes
    /// blocks or leaves lines unmatched.
    pub async fn sync<R, F>(&self, remote: &R, confirm: F) -> Result<SyncReport>
    where
        R: RemoteService + ?Sized,
        F: FnOnce(&Plan) -> bool,
    {
        let _gate = self.gate.lock().await;
        self.run(remote, confirm).await
    }

    /// Like [`SyncHandle::sync`] but fails with [`SyncError::Busy`] instead of waiting.
    pub async fn try_sync<R, F>(&self, remote: &R, confirm: F) -> Result<SyncReport>
    where
        R: RemoteService + ?Sized,
        F: FnOnce(&Plan) -> bool,
    {
        let Some(_gate) = self.gate.try_lock() else {
            return Err(SyncError::Busy);
        };
        self.run(remote, confirm).await
    }

    async fn run<R, F>(&self, remote: &R, confirm: F) -> Result<SyncReport>
    where
        R: RemoteService + ?Sized,
        F: FnOnce(&Plan) -> bool,
    {
        let mut session = self.session.lock().await;
        session.cancel_debounce();
        session.refresh();
        session.prune_missing_local();
        let plan = session.preview();
        let mut report = SyncReport {
            unmatched: plan.unmatched.len(),
            ..SyncReport::default()
        };
        if !plan.has_changes() {
            debug!("nothing to sync for {}", session.page_id());
            return Ok(report);
        }
        if plan.needs_confirmation && !confirm(&plan) {
            info!("sync of {} declined: {}", session.page_id(), plan.summary());
            report.declined = true;
            return Ok(report);
        }
        info!("syncing {}: {}", session.page_id(), plan.summary());

        let mut run = Run {
            page_id: session.page_id().to_string(),
            max_in_flight: session.options().max_in_flight.max(1),
            max_attempts: session.options().max_attempts.max(1),
            generation: session.generation(),
            ids: IdTable::default(),
            failed: HashSet::new(),
            report,
        };
        let Plan {
            updates,
            type_changes,
            deletes,
            creates,
            ..
        } = plan;
        let mut creates = run.materialize(&mut session, creates);
        drop(session);

        self.updates_and_deletes(remote, &mut run, updates, deletes).await;
        for op in type_changes {
            let requeued = self.type_change(remote, &mut run, op).await;
            creates.extend(requeued);
        }
        self.creates(remote, &mut run, creates).await;

        let mut session = self.session.lock().await;
        session.renumber();
        run.report.document_changed = session.generation() != run.generation;
        info!("sync of {} finished: {}", run.page_id, run.report);
        Ok(run.report)
    }

    async fn updates_and_deletes<R: RemoteService + ?Sized>(
        &self,
        remote: &R,
        run: &mut Run,
        updates: Vec<UpdateOp>,
        deletes: Vec<DeleteOp>,
    ) {
        let max_attempts = run.max_attempts;
        let mut calls: Vec<BoxFuture<'_, Outcome>> = Vec::new();
        for op in updates {
            calls.push(
                async move {
                    let result = match op.block_id.remote() {
                        Some(id) => {
                            attempt(max_attempts, || remote.update_block(id, op.record.clone()))
                                .await
                        }
                        None => Err(RemoteError::NotFound(op.block_id.to_string())),
                    };
                    Outcome::Updated(op, result)
                }
                .boxed(),
            );
        }
        for op in deletes {
            calls.push(
                async move {
                    let result = match op.block_id.remote() {
                        Some(id) => attempt(max_attempts, || remote.delete_block(id)).await,
                        None => Ok(()),
                    };
                    Outcome::Deleted(op, result)
                }
                .boxed(),
            );
        }

        let mut outcomes = stream::iter(calls).buffered(run.max_in_flight);
        while let Some(outcome) = outcomes.next().await {
            let mut session = self.session.lock().await;
            match outcome {
                Outcome::Updated(op, Ok(record)) => {
                    if session.acknowledge(&op.block_id, &op.kind, &op.content, record) {
                        run.report.updated += 1;
                    }
                }
                Outcome::Updated(op, Err(err)) => {
                    warn!("update of {} failed: {err}", op.block_id);
                    run.fail(FailedItem::remote(op.block_id, OperationKind::Update, &err));
                }
                // Already gone remotely is what we wanted.
                Outcome::Deleted(op, Ok(()) | Err(RemoteError::NotFound(_))) => {
                    let removed = session.forget_subtree(&op.block_id);
                    debug!("deleted {} ({removed} blocks dropped locally)", op.block_id);
                    run.report.deleted += 1;
                }
                Outcome::Deleted(op, Err(err)) => {
                    warn!("delete of {} failed: {err}", op.block_id);
                    run.fail(FailedItem::remote(op.block_id, OperationKind::Delete, &err));
                }
            }
        }
    }

    /// Delete the old block, then append the new type where it stood.
    ///
    /// Returns the creates that restore the block's former children.
    async fn type_change<R: RemoteService + ?Sized>(
        &self,
        remote: &R,
        run: &mut Run,
        op: TypeChangeOp,
    ) -> Vec<CreateOp> {
        let Some(old) = op.block_id.remote().map(str::to_string) else {
            return Vec::new();
        };
        let position = self.session.lock().await.position_of(&op.block_id);
        let Some((parent, after)) = position else {
            debug!("skipping type change of {}: block no longer placed", op.block_id);
            return Vec::new();
        };

        if let Err(err) = attempt(run.max_attempts, || remote.delete_block(&old)).await
            && !matches!(err, RemoteError::NotFound(_))
        {
            warn!("type change of {} failed on delete: {err}", op.block_id);
            run.fail(FailedItem::remote(op.block_id, OperationKind::TypeChange, &err));
            return Vec::new();
        }
        let detached = self.session.lock().await.detach_for_type_change(&op.block_id);
        let Some((temp, requeued)) = detached else {
            warn!("type change of {}: block vanished after delete", op.block_id);
            return Vec::new();
        };

        let mut record = op.record.clone();
        record.id = None;
        record.has_children = false;
        let result = attempt(run.max_attempts, || {
            let position = Position::following(after.as_deref());
            remote.append_children(&parent, position, vec![record.clone()])
        })
        .await;

        let created = match result {
            Ok(records) => records
                .into_iter()
                .find_map(|r| Some((r.id.clone()?, r)))
                .ok_or_else(|| {
                    FailedItem::local(
                        op.block_id.clone(),
                        OperationKind::TypeChange,
                        "remote service returned no id for the new block",
                    )
                }),
            Err(err) => Err(FailedItem::remote(
                op.block_id.clone(),
                OperationKind::TypeChange,
                &err,
            )),
        };

        let mut session = self.session.lock().await;
        match created {
            Ok((real, record)) => {
                session.finish_create(&temp, &real, &op.kind, &op.content, record);
                run.ids.insert(op.block_id.clone(), &real);
                run.ids.insert(temp, &real);
                run.report.type_changed += 1;
                debug!("{old} is now {real} ({})", op.new_type);
                session.pending_creates(&requeued)
            }
            Err(item) => {
                warn!("type change of {} failed on create: {}", op.block_id, item.error);
                run.failed.insert(op.block_id.clone());
                run.failed.insert(temp);
                run.fail(item);
                // The children stay local placeholders for the next run.
                for child in requeued {
                    run.fail(FailedItem::dependency(child, &op.block_id));
                }
                Vec::new()
            }
        }
    }

    /// Append creates in waves; a batch is sent once its target has a real id.
    async fn creates<R: RemoteService + ?Sized>(
        &self,
        remote: &R,
        run: &mut Run,
        mut pending: Vec<CreateOp>,
    ) {
        {
            let session = self.session.lock().await;
            let order: HashMap<BlockId, usize> = session
                .tree()
                .walk()
                .into_iter()
                .enumerate()
                .map(|(i, id)| (id, i))
                .collect();
            pending.sort_by_key(|op| order.get(&op.temp_id).copied().unwrap_or(usize::MAX));
        }

        while !pending.is_empty() {
            let mut batches: Vec<Batch> = Vec::new();
            let mut waiting = Vec::new();
            for op in pending {
                let failed_dep = op.dependencies().find(|d| run.failed.contains(*d)).cloned();
                if let Some(dep) = failed_dep {
                    run.failed.insert(op.temp_id.clone());
                    run.fail(FailedItem::dependency(op.temp_id, &dep));
                    continue;
                }
                let Some(parent) = run.ids.parent_of(&op, &run.page_id) else {
                    waiting.push(op);
                    continue;
                };
                if let Some(batch) = batches.iter_mut().find(|b| b.accepts(&op, &parent)) {
                    batch.ops.push(op);
                    continue;
                }
                let after = match &op.after_block_id {
                    Some(after) => match run.ids.resolve(after) {
                        Some(after) => Some(after),
                        None => {
                            waiting.push(op);
                            continue;
                        }
                    },
                    None => None,
                };
                batches.push(Batch {
                    parent,
                    after,
                    ops: vec![op],
                });
            }

            if batches.is_empty() {
                for op in waiting {
                    let dep = op.dependencies().next().cloned().unwrap_or_else(|| op.temp_id.clone());
                    run.fail(FailedItem::dependency(op.temp_id, &dep));
                }
                break;
            }
            debug!("sending {} create batches", batches.len());

            let max_attempts = run.max_attempts;
            let calls = batches.into_iter().map(|batch| async move {
                let records: Vec<RemoteRecord> = batch
                    .ops
                    .iter()
                    .map(|op| {
                        let mut record = op.record.clone();
                        record.id = None;
                        record.has_children = false;
                        record
                    })
                    .collect();
                let result = attempt(max_attempts, || {
                    remote.append_children(
                        &batch.parent,
                        Position::following(batch.after.as_deref()),
                        records.clone(),
                    )
                })
                .await;
                (batch, result)
            });
            let mut results = stream::iter(calls).buffered(run.max_in_flight);
            while let Some((batch, result)) = results.next().await {
                let mut session = self.session.lock().await;
                run.apply_batch(&mut session, batch, result);
            }
            pending = waiting;
        }
    }
}

/// State of one sync run outside the session lock
struct Run {
    page_id: String,
    max_in_flight: usize,
    max_attempts: usize,
    generation: u64,
    ids: IdTable,
    /// Local ids that did not make it to the remote service this run
    failed: HashSet<BlockId>,
    report: SyncReport,
}

impl Run {
    fn fail(&mut self, item: FailedItem) {
        self.report.failed.push(item);
    }

    /// Put newly detected regions into the tree so results have somewhere to land.
    fn materialize<H: TextHost>(
        &mut self,
        session: &mut SyncSession<H>,
        creates: Vec<CreateOp>,
    ) -> Vec<CreateOp> {
        let mut kept = Vec::with_capacity(creates.len());
        for op in creates {
            let failed_dep = op.dependencies().find(|d| self.failed.contains(*d)).cloned();
            if let Some(dep) = failed_dep {
                self.failed.insert(op.temp_id.clone());
                self.fail(FailedItem::dependency(op.temp_id, &dep));
                continue;
            }
            if let Err(err) = session.materialize(&op) {
                warn!("could not place new block {}: {err}", op.temp_id);
                self.failed.insert(op.temp_id.clone());
                self.fail(FailedItem::local(op.temp_id, OperationKind::Create, err));
                continue;
            }
            kept.push(op);
        }
        kept
    }

    fn apply_batch<H: TextHost>(
        &mut self,
        session: &mut SyncSession<H>,
        batch: Batch,
        result: remote::Result<Vec<RemoteRecord>>,
    ) {
        let created = match result {
            Ok(created) if created.len() == batch.ops.len() => created,
            Ok(created) => {
                let error = format!(
                    "remote service returned {} records for {} creates",
                    created.len(),
                    batch.ops.len()
                );
                for op in batch.ops {
                    self.failed.insert(op.temp_id.clone());
                    self.fail(FailedItem::local(op.temp_id, OperationKind::Create, &error));
                }
                return;
            }
            Err(err) => {
                warn!("append under {} failed: {err}", batch.parent);
                for op in batch.ops {
                    self.failed.insert(op.temp_id.clone());
                    self.fail(FailedItem::remote(op.temp_id, OperationKind::Create, &err));
                }
                return;
            }
        };
        for (op, record) in batch.ops.into_iter().zip(created) {
            let Some(real) = record.id.clone() else {
                self.failed.insert(op.temp_id.clone());
                self.fail(FailedItem::local(
                    op.temp_id,
                    OperationKind::Create,
                    "remote service returned no id",
                ));
                continue;
            };
            if session.finish_create(&op.temp_id, &real, &op.kind, &op.content, record) {
                self.report.created += 1;
            }
            self.ids.insert(op.temp_id, &real);
        }
    }
}

enum Outcome {
    Updated(UpdateOp, remote::Result<RemoteRecord>),
    Deleted(DeleteOp, remote::Result<()>),
}

/// Creates sent in one append call
struct Batch {
    parent: String,
    after: Option<String>,
    ops: Vec<CreateOp>,
}

impl Batch {
    /// `op` lands directly after this batch's last record
    fn accepts(&self, op: &CreateOp, parent: &str) -> bool {
        if self.parent != parent {
            return false;
        }
        match &op.after_block_id {
            Some(after) => self.ops.last().is_some_and(|last| &last.temp_id == after),
            None => self.after.is_none(),
        }
    }
}

/// Real ids learned during a run, for temporary and replaced ids
#[derive(Default)]
struct IdTable(HashMap<BlockId, String>);

impl IdTable {
    fn insert(&mut self, id: BlockId, real: &str) {
        self.0.insert(id, real.to_string());
    }

    fn resolve(&self, id: &BlockId) -> Option<String> {
        self.0
            .get(id)
            .cloned()
            .or_else(|| id.remote().map(str::to_string))
    }

    fn parent_of(&self, op: &CreateOp, page_id: &str) -> Option<String> {
        match &op.parent_block_id {
            Some(parent) => self.resolve(parent),
            None => Some(page_id.to_string()),
        }
    }
}

/// Call until success or a permanent error, at most `max_attempts` times.
/// Retries are immediate.
async fn attempt<T, F, Fut>(max_attempts: usize, mut call: F) -> remote::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = remote::Result<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match call().await {
            Err(err) if err.is_retryable() && tries < max_attempts => {
                debug!("retrying after {err} (attempt {tries} of {max_attempts})");
            }
            result => return result,
        }
    }
}
