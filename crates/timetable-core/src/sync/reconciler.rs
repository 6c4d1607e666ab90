//! Reconciler: applies downloaded operations in dependency order with
//! last-writer-wins per entity.
//!
//! Messages are grouped by entity type and the groups are walked in
//! [`EntityType::DEPENDENCY_ORDER`], so a parent lands before anything that
//! references it regardless of download order. Within a group only the newest
//! message per `crdtKey` is applied; older ones are marked processed once the
//! winner has been settled. A winner that cannot be applied hands over to the
//! next newest message of its key, and never stops the rest of the batch.

use std::collections::{BTreeMap, HashMap};

use crate::db::ApplyOutcome;
use crate::models::{EntityType, SyncMessage};
use crate::services::SyncDatabase;

use super::error::SyncError;

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    /// Already covered by an equal or newer applied operation
    pub stale: usize,
    /// Lost to a newer message for the same key in this batch
    pub superseded: usize,
    /// Parent missing locally; left for a later cycle
    pub deferred: usize,
    /// Could not be decoded or stored
    pub failed: usize,
}

impl ReconcileReport {
    pub const fn total(&self) -> usize {
        self.applied + self.stale + self.superseded + self.deferred + self.failed
    }
}

pub struct Reconciler {
    db: SyncDatabase,
}

impl Reconciler {
    pub const fn new(db: SyncDatabase) -> Self {
        Self { db }
    }

    pub async fn reconcile(&self, messages: Vec<SyncMessage>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut groups = group_by_type(messages);

        for entity_type in EntityType::DEPENDENCY_ORDER {
            let Some(group) = groups.remove(&entity_type) else {
                continue;
            };
            for candidates in per_key(group) {
                self.settle(candidates, &mut report).await;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                applied = report.applied,
                stale = report.stale,
                superseded = report.superseded,
                deferred = report.deferred,
                failed = report.failed,
                "Reconciled remote messages"
            );
        }
        report
    }

    /// Settle the messages of one key, given oldest first.
    async fn settle(&self, mut candidates: Vec<SyncMessage>, report: &mut ReconcileReport) {
        while let Some(winner) = candidates.pop() {
            match self.db.apply_remote(&winner).await {
                Ok(ApplyOutcome::Applied) => report.applied += 1,
                Ok(ApplyOutcome::Stale) => report.stale += 1,
                Ok(ApplyOutcome::MissingParent {
                    entity_type,
                    crdt_key,
                }) => {
                    let error = SyncError::FkDependency {
                        entity_type: winner.entity_type,
                        crdt_key: winner.crdt_key.clone(),
                        parent_type: entity_type,
                        parent_key: crdt_key,
                    };
                    tracing::warn!(id = %winner.id, "Deferring message: {error}");
                    report.deferred += 1 + candidates.len();
                    return;
                }
                Err(error) => {
                    // Stays unapplied; the next newest message gets its turn
                    tracing::error!(
                        id = %winner.id,
                        entity_type = %winner.entity_type,
                        crdt_key = %winner.crdt_key,
                        "Failed to apply message: {error}"
                    );
                    report.failed += 1;
                    continue;
                }
            }

            self.supersede(candidates, report).await;
            return;
        }
    }

    async fn supersede(&self, losers: Vec<SyncMessage>, report: &mut ReconcileReport) {
        if losers.is_empty() {
            return;
        }
        let ids: Vec<String> = losers.into_iter().map(|message| message.id).collect();
        match self.db.mark_processed(&ids).await {
            Ok(_) => report.superseded += ids.len(),
            Err(error) => {
                tracing::error!(count = ids.len(), "Failed to settle superseded messages: {error}");
                report.failed += ids.len();
            }
        }
    }
}

fn group_by_type(messages: Vec<SyncMessage>) -> HashMap<EntityType, Vec<SyncMessage>> {
    let mut groups: HashMap<EntityType, Vec<SyncMessage>> = HashMap::new();
    for message in messages {
        groups.entry(message.entity_type).or_default().push(message);
    }
    groups
}

/// Messages grouped by `crdtKey`, each group sorted oldest first.
fn per_key(group: Vec<SyncMessage>) -> Vec<Vec<SyncMessage>> {
    let mut by_key: BTreeMap<String, Vec<SyncMessage>> = BTreeMap::new();
    for message in group {
        by_key.entry(message.crdt_key.clone()).or_default().push(message);
    }

    by_key
        .into_values()
        .map(|mut messages| {
            // Same rank the version register uses, so both pick the same winner
            messages.sort_by(|a, b| a.version_rank().cmp(&b.version_rank()));
            messages
        })
        .collect()
}
