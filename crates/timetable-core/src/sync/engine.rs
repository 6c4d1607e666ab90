//! Sync engine: local change recording and the full sync cycle.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::DEFAULT_UPLOAD_BATCH_SIZE;
use crate::error::{Error, Result};
use crate::models::{EntitySnapshot, EntityType, OperationType, SyncMessage};
use crate::services::SyncDatabase;

use super::device::DeviceRegistry;
use super::downloader::Downloader;
use super::error::{SyncError, SyncResult};
use super::hlc::{HlcTimestamp, HybridLogicalClock, SystemClock, WallClock};
use super::reconciler::{ReconcileReport, Reconciler};
use super::transport::SyncTransport;
use super::uploader::Uploader;

const DEFAULT_RETENTION_DAYS: u32 = 7;
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// What one sync cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncCycleReport {
    pub user_id: i64,
    /// Messages acknowledged by the relay
    pub uploaded: usize,
    /// Messages left FAILED by this cycle
    pub upload_failed: usize,
    /// Newly stored remote messages
    pub downloaded: usize,
    pub reconcile: ReconcileReport,
    /// Rows removed by cleanup
    pub cleaned: u64,
    /// Per-type steps that failed and were skipped
    pub step_errors: Vec<String>,
}

/// Owns the clock and the sync components for one local database.
pub struct SyncEngine<T> {
    db: SyncDatabase,
    device_id: String,
    clock: HybridLogicalClock,
    wall: Arc<dyn WallClock>,
    uploader: Uploader<T>,
    downloader: Downloader<T>,
    reconciler: Reconciler,
    registry: DeviceRegistry<T>,
    retention_days: u32,
    upload_batch_size: usize,
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Build an engine using the system clock.
    pub async fn open(db: SyncDatabase, transport: Arc<T>) -> Result<Self> {
        Self::open_with_clock(db, transport, Arc::new(SystemClock)).await
    }

    /// Build an engine with an explicit wall clock.
    ///
    /// The HLC is seeded with the durable device id and resumed past the
    /// newest timestamp this device has written.
    pub async fn open_with_clock(
        db: SyncDatabase,
        transport: Arc<T>,
        wall: Arc<dyn WallClock>,
    ) -> Result<Self> {
        let device_id = db.device_id().await?;
        let clock = HybridLogicalClock::with_wall_clock(device_id.clone(), wall.clone());
        if let Some(latest) = db.latest_timestamp_for_node(&device_id).await? {
            clock.merge(&latest);
        }

        Ok(Self {
            uploader: Uploader::new(db.clone(), transport.clone(), device_id.clone()),
            downloader: Downloader::new(transport.clone()),
            reconciler: Reconciler::new(db.clone()),
            registry: DeviceRegistry::new(transport, device_id.clone()),
            db,
            device_id,
            clock,
            wall,
            retention_days: DEFAULT_RETENTION_DAYS,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
        })
    }

    /// Keep delivered messages for `days` before cleanup removes them.
    #[must_use]
    pub const fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Send at most `size` messages per upload request.
    #[must_use]
    pub fn with_upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = size.max(1);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub const fn db(&self) -> &SyncDatabase {
        &self.db
    }

    /// Latest clock reading of this device.
    pub fn clock_snapshot(&self) -> HlcTimestamp {
        self.clock.snapshot()
    }

    /// Apply a local mutation and queue it for upload.
    ///
    /// The change is timestamped, written to the entity store, recorded in
    /// the version register and appended to the outbox in one transaction.
    pub async fn record_change(
        &self,
        operation_type: OperationType,
        snapshot: EntitySnapshot,
    ) -> Result<SyncMessage> {
        let entity_type = snapshot.entity_type();
        if !entity_type.is_supported() {
            return Err(Error::InvalidInput(format!(
                "{entity_type} changes are not synchronized"
            )));
        }
        let user_id = self
            .db
            .current_user_id()
            .await?
            .ok_or_else(|| Error::InvalidInput("no signed-in user".to_string()))?;

        let message = SyncMessage::new_local(
            snapshot.crdt_key(),
            entity_type,
            operation_type,
            self.clock.generate(),
            snapshot.to_payload()?,
            user_id,
        );
        self.db.record_local(&message, &snapshot).await?;
        tracing::debug!(
            entity_type = %entity_type,
            crdt_key = %message.crdt_key,
            hlc = %message.hlc_timestamp,
            "Recorded local change"
        );
        Ok(message)
    }

    /// Run upload, download, reconciliation and cleanup once.
    ///
    /// Only a missing session or a failed device registration abort the
    /// cycle; later steps are best effort per entity type.
    pub async fn run_full_sync_cycle(&self) -> SyncResult<SyncCycleReport> {
        let user_id = self
            .db
            .current_user_id()
            .await?
            .ok_or_else(|| SyncError::Session("sign in before syncing".to_string()))?;

        if !self.registry.register_device(user_id).await {
            return Err(SyncError::DeviceRegistration(format!(
                "device {} could not be registered for user {user_id}",
                self.device_id
            )));
        }

        let mut report = SyncCycleReport {
            user_id,
            ..SyncCycleReport::default()
        };

        for entity_type in EntityType::SUPPORTED {
            if let Err(error) = self.upload_type(user_id, entity_type, &mut report).await {
                tracing::warn!(entity_type = %entity_type, "Upload step failed: {error}");
                report.step_errors.push(format!("upload {entity_type}: {error}"));
            }
        }

        for entity_type in EntityType::SUPPORTED {
            if let Err(error) = self.download_type(entity_type, &mut report).await {
                tracing::warn!(entity_type = %entity_type, "Download step failed: {error}");
                report.step_errors.push(format!("download {entity_type}: {error}"));
            }
        }

        match self.db.query_unapplied(&self.device_id).await {
            Ok(messages) => report.reconcile = self.reconciler.reconcile(messages).await,
            Err(error) => {
                tracing::error!("Could not load messages to reconcile: {error}");
                report.step_errors.push(format!("reconcile: {error}"));
            }
        }

        let cutoff = self.wall.now_millis() - i64::from(self.retention_days) * MILLIS_PER_DAY;
        match self.db.cleanup(cutoff).await {
            Ok(cleaned) => report.cleaned = cleaned,
            Err(error) => {
                tracing::warn!("Cleanup failed: {error}");
                report.step_errors.push(format!("cleanup: {error}"));
            }
        }

        tracing::info!(
            user_id,
            uploaded = report.uploaded,
            upload_failed = report.upload_failed,
            downloaded = report.downloaded,
            applied = report.reconcile.applied,
            cleaned = report.cleaned,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Run a cycle on its own task so it completes even if the caller goes away.
    pub fn spawn_full_sync_cycle(self: &Arc<Self>) -> JoinHandle<SyncResult<SyncCycleReport>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_full_sync_cycle().await })
    }

    async fn upload_type(
        &self,
        user_id: i64,
        entity_type: EntityType,
        report: &mut SyncCycleReport,
    ) -> SyncResult<()> {
        let pending = self.db.query_pending_for(user_id, entity_type).await?;
        // A rejected chunk does not hold back the ones after it
        for chunk in pending.chunks(self.upload_batch_size) {
            let synced = self.uploader.upload_batch(chunk, entity_type).await?;
            report.uploaded += synced.len();
            report.upload_failed += chunk.len() - synced.len();
        }
        Ok(())
    }

    async fn download_type(
        &self,
        entity_type: EntityType,
        report: &mut SyncCycleReport,
    ) -> SyncResult<()> {
        let since = self.db.watermark(entity_type).await?;
        let batch = self
            .downloader
            .download_since(entity_type, &self.device_id, since)
            .await?;

        for message in &batch.messages {
            self.clock.merge(&message.hlc_timestamp);
            if self.db.insert_remote(message).await? {
                report.downloaded += 1;
            }
        }
        // Without relay sequence numbers every download is a full one; ids dedup it
        if let Some(cursor) = batch.cursor {
            self.db.advance_watermark(entity_type, cursor).await?;
        }
        Ok(())
    }
}
