//! The sync orchestrator
//!
//! `perform_sync` drives the whole state machine: entry guards, then
//! connecting → analyzing → comparing → uploading/downloading →
//! finalizing → complete. Guard failures return before anything is
//! touched; per-entity failures during transfer are captured and the run
//! finishes best-effort. Only a manifest write failure fails the whole run
//! after transfers have happened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use moodsync_core::{
    AuthProvider, Connectivity, DeviceIdentity, EntityKind, ItemSyncMeta, KvStore, LocalStore,
    RemoteStore, SyncManifest, SyncRecord,
};

use crate::clock::{Clock, SystemClock};
use crate::conflict::{
    classify_conflicts, ConflictHandler, ConflictResolver, Resolution, SyncConflict,
};
use crate::diff::{self, LocalChanges, LocalItem, RemoteChanges};
use crate::error::{Result, SyncError, SyncIssue};
use crate::progress::{ProgressReporter, SyncPhase};
use crate::report::{ChangeCheck, EntityCounts, SyncDirection, SyncResult};
use crate::settings::{SettingsStore, SettingsUpdate, SyncSettings};

/// Minimum time between sync attempts unless `force` is set.
pub const DEFAULT_MIN_SYNC_INTERVAL_SECS: i64 = 30;

/// Options for one `perform_sync` call.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Bypass the rate-limit guard.
    pub force: bool,
    /// Receives phase and count updates during the run.
    pub progress: Option<ProgressReporter>,
    /// Invoked with the pending conflicts when the strategy is `ask`.
    pub on_conflict: Option<ConflictHandler>,
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("force", &self.force)
            .field("progress", &self.progress.is_some())
            .field("on_conflict", &self.on_conflict.is_some())
            .finish()
    }
}

/// The multi-device sync engine.
///
/// One instance per process; the concurrency guard is an instance field,
/// checked-and-set atomically before the first suspension point. Multiple
/// independent execution contexts (tabs, processes) are not covered.
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    device: Arc<dyn DeviceIdentity>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    settings: SettingsStore,
    min_sync_interval: Duration,
    in_progress: AtomicBool,
    last_attempt: tokio::sync::Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        device: Arc<dyn DeviceIdentity>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            local,
            remote,
            auth,
            device,
            connectivity: Arc::new(moodsync_core::FixedConnectivity(true)),
            clock: Arc::new(SystemClock),
            settings: SettingsStore::new(kv),
            min_sync_interval: Duration::seconds(DEFAULT_MIN_SYNC_INTERVAL_SECS),
            in_progress: AtomicBool::new(false),
            last_attempt: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Whether a run currently holds the exclusive lock.
    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub async fn sync_settings(&self) -> Result<SyncSettings> {
        self.settings.initialize(self.device.as_ref()).await
    }

    pub async fn save_sync_settings(&self, update: SettingsUpdate) -> Result<SyncSettings> {
        self.settings.update(self.device.as_ref(), update).await
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.settings.last_sync_at().await
    }

    /// Enable sync against the given provider. Verifies the session first;
    /// any token rejection is a connection failure.
    pub async fn connect(&self, provider: &str) -> Result<SyncSettings> {
        if !self.auth.is_signed_in() {
            return Err(SyncError::auth("not signed in"));
        }
        self.auth
            .access_token()
            .await
            .map_err(|err| SyncError::auth(err.to_string()))?;
        let settings = self
            .settings
            .update(
                self.device.as_ref(),
                SettingsUpdate {
                    enabled: Some(true),
                    provider: Some(Some(provider.to_string())),
                    ..Default::default()
                },
            )
            .await?;
        info!(provider, "sync connected");
        Ok(settings)
    }

    pub async fn disconnect(&self) -> Result<SyncSettings> {
        let settings = self
            .settings
            .update(
                self.device.as_ref(),
                SettingsUpdate {
                    enabled: Some(false),
                    provider: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        info!("sync disconnected");
        Ok(settings)
    }

    /// Run a full sync. Guard rejections and fatal failures come back as a
    /// failed [`SyncResult`]; per-entity failures are recorded in
    /// `errors` while the run completes best-effort.
    pub async fn perform_sync(&self, options: SyncOptions) -> SyncResult {
        let now = self.clock.now();

        // check-and-set before the first await so two concurrent calls
        // cannot both pass the guard
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("rejected sync attempt, already in progress");
            return SyncResult::failure(SyncIssue::from_error(&SyncError::AlreadyInProgress), now);
        }

        let result = match self.run_guarded(options, now).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "sync failed");
                SyncResult::failure(SyncIssue::from_error(&err), now)
            }
        };

        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_guarded(&self, options: SyncOptions, now: DateTime<Utc>) -> Result<SyncResult> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }

        if !options.force {
            if let Some(wait_secs) = self.seconds_until_allowed(now).await? {
                return Err(SyncError::RateLimited { wait_secs });
            }
        }

        let settings = self.sync_settings().await?;
        if !settings.enabled || settings.provider.is_none() {
            return Err(SyncError::NotConnected(
                "sync is disabled or no provider is configured".to_string(),
            ));
        }
        if !self.auth.is_signed_in() {
            return Err(SyncError::NotConnected("not signed in".to_string()));
        }

        *self.last_attempt.lock().await = Some(now);

        self.run_phases(options, settings, now).await
    }

    async fn seconds_until_allowed(&self, now: DateTime<Utc>) -> Result<Option<i64>> {
        let in_memory = *self.last_attempt.lock().await;
        let persisted = self.settings.last_sync_at().await?;
        let last = match (in_memory, persisted) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Ok(last.and_then(|last| {
            let next_allowed = last + self.min_sync_interval;
            (now < next_allowed).then(|| (next_allowed - now).num_seconds().max(1))
        }))
    }

    async fn run_phases(
        &self,
        options: SyncOptions,
        settings: SyncSettings,
        now: DateTime<Utc>,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        let progress = options.progress.clone();
        let report = |phase: SyncPhase| {
            if let Some(reporter) = &progress {
                reporter.phase(phase);
            }
        };

        // connecting: verify or refresh the remote session
        report(SyncPhase::Connecting);
        self.auth
            .access_token()
            .await
            .map_err(|err| SyncError::auth(err.to_string()))?;

        let remote_manifest = self
            .remote
            .manifest()
            .await
            .map_err(|err| SyncError::network(err.to_string()))?
            .unwrap_or_else(SyncManifest::empty);
        let baseline = self.settings.baseline().await?;

        // analyzing: classify both sides against the baseline
        report(SyncPhase::Analyzing);
        let local_records = self.load_local_records().await?;
        let device_id = settings.device_id.clone();
        let local_changes =
            diff::detect_local_changes(&local_records, &baseline, &device_id, now);
        let remote_changes =
            diff::detect_remote_changes(&remote_manifest, &baseline, &device_id);
        debug!(
            local_added = local_changes.added.len(),
            local_updated = local_changes.updated.len(),
            local_deleted = local_changes.deleted.len(),
            remote_added = remote_changes.added.len(),
            remote_updated = remote_changes.updated.len(),
            remote_deleted = remote_changes.deleted.len(),
            "analyzed changes"
        );

        // comparing: find both-sided changes and resolve them
        report(SyncPhase::Comparing);
        let conflicts = classify_conflicts(&local_changes, &remote_changes);
        let resolver = ConflictResolver::new(settings.conflict_strategy);
        let resolved = resolver
            .resolve(conflicts, options.on_conflict.as_ref())
            .await?;

        let plan = Plan::build(local_changes, remote_changes, &resolved, &remote_manifest);

        let mut run = RunState {
            manifest: remote_manifest.clone(),
            issues: Vec::new(),
            breakdown: HashMap::new(),
            pushed: 0,
            pulled: 0,
            retry_keys: plan.skipped.clone(),
        };

        self.upload_phase(&plan, &baseline, &remote_manifest, &mut run, &progress)
            .await;
        self.download_phase(&plan, &mut run, &progress).await;

        // finalizing: the complete next manifest replaces the old one
        report(SyncPhase::Finalizing);
        run.manifest
            .stamp(&settings.device_id, &settings.device_name, self.clock.now());
        self.remote
            .save_manifest(&run.manifest)
            .await
            .map_err(|err| SyncError::network(format!("manifest write failed: {err}")))?;

        // cache the baseline, reverting entries for items deferred to the
        // next run so they are re-detected (and re-conflict) then
        let mut baseline_cache = run.manifest.clone();
        for (kind, id) in &run.retry_keys {
            match baseline.get(*kind, id) {
                Some(meta) => baseline_cache.upsert(*kind, meta.clone()),
                None => {
                    baseline_cache.remove(*kind, id);
                }
            }
        }
        self.settings.save_baseline(&baseline_cache).await?;
        self.settings.set_last_sync_at(now).await?;

        report(SyncPhase::Complete);
        let result = SyncResult {
            success: true,
            direction: SyncDirection::from_counts(run.pushed, run.pulled),
            timestamp: now,
            duration_ms: started.elapsed().as_millis() as u64,
            breakdown: run
                .breakdown
                .into_iter()
                .collect(),
            skipped_conflicts: plan.skipped.len(),
            errors: run.issues,
        };
        info!("{}", result.summary());
        Ok(result)
    }

    async fn upload_phase(
        &self,
        plan: &Plan,
        baseline: &SyncManifest,
        remote_manifest: &SyncManifest,
        run: &mut RunState,
        progress: &Option<ProgressReporter>,
    ) {
        let total = plan.uploads.len() + plan.push_deletions.len();
        if let Some(reporter) = progress {
            reporter.items(SyncPhase::Uploading, 0, total);
        }

        for (index, item) in plan.uploads.iter().enumerate() {
            let kind = item.record.kind;
            let id = item.record.id.clone();
            match self.remote.store(&item.record).await {
                Ok(_) => {
                    let prior_version = remote_manifest
                        .get(kind, &id)
                        .or_else(|| baseline.get(kind, &id))
                        .map_or(0, |meta| meta.version);
                    run.manifest.upsert(
                        kind,
                        ItemSyncMeta {
                            id: id.clone(),
                            hash: item.hash.clone(),
                            updated_at: item.record.updated_at,
                            version: prior_version + 1,
                        },
                    );
                    // an upload supersedes any tombstone for the same id
                    run.manifest.clear_tombstone(kind, &id);
                    let counts = run.breakdown.entry(kind).or_default();
                    if remote_manifest.get(kind, &id).is_some() {
                        counts.updated += 1;
                    } else {
                        counts.added += 1;
                    }
                    run.pushed += 1;
                }
                Err(err) => {
                    let error = SyncError::network(err.to_string());
                    warn!(kind = %kind, id = %id, error = %error, "upload failed");
                    run.issues.push(SyncIssue::for_entity(&error, kind, id.as_str()));
                    // excluded from the new manifest, retried next run
                    run.retry_keys.insert((kind, id));
                }
            }
            if let Some(reporter) = progress {
                reporter.items(SyncPhase::Uploading, index + 1, total);
            }
        }

        for (offset, tombstone) in plan.push_deletions.iter().enumerate() {
            let kind = tombstone.kind;
            let id = tombstone.id.clone();
            match self.remote.remove(kind, &id).await {
                Ok(()) => {
                    run.manifest.remove(kind, &id);
                    run.manifest.push_tombstone(tombstone.clone());
                    run.breakdown.entry(kind).or_default().deleted += 1;
                    run.pushed += 1;
                }
                Err(err) => {
                    let error = SyncError::network(err.to_string());
                    warn!(kind = %kind, id = %id, error = %error, "remote delete failed");
                    run.issues.push(SyncIssue::for_entity(&error, kind, id.as_str()));
                    run.retry_keys.insert((kind, id));
                }
            }
            if let Some(reporter) = progress {
                reporter.items(SyncPhase::Uploading, plan.uploads.len() + offset + 1, total);
            }
        }
    }

    async fn download_phase(
        &self,
        plan: &Plan,
        run: &mut RunState,
        progress: &Option<ProgressReporter>,
    ) {
        let total = plan.downloads.len() + plan.pull_deletions.len();
        if let Some(reporter) = progress {
            reporter.items(SyncPhase::Downloading, 0, total);
        }

        for (index, (kind, id)) in plan.downloads.iter().enumerate() {
            let was_present = match self.local.get(*kind, id).await {
                Ok(existing) => existing.is_some(),
                Err(_) => false,
            };
            match self.fetch_and_apply(*kind, id).await {
                Ok(()) => {
                    let counts = run.breakdown.entry(*kind).or_default();
                    if was_present {
                        counts.updated += 1;
                    } else {
                        counts.added += 1;
                    }
                    run.pulled += 1;
                }
                Err(err) => {
                    warn!(kind = %kind, id = %id, error = %err, "download failed");
                    run.issues.push(SyncIssue::for_entity(&err, *kind, id.as_str()));
                    run.retry_keys.insert((*kind, id.clone()));
                }
            }
            if let Some(reporter) = progress {
                reporter.items(SyncPhase::Downloading, index + 1, total);
            }
        }

        let requested = plan.pull_deletions.clone();
        let applied =
            crate::deletion::apply_remote_deletions(self.local.as_ref(), requested.clone(), &mut run.issues)
                .await;
        for (kind, _) in &applied {
            run.breakdown.entry(*kind).or_default().deleted += 1;
        }
        run.pulled += applied.len();
        if applied.len() < requested.len() {
            let done: HashSet<&(EntityKind, String)> = applied.iter().collect();
            for key in requested {
                if !done.contains(&key) {
                    run.retry_keys.insert(key);
                }
            }
        }
        if let Some(reporter) = progress {
            reporter.items(SyncPhase::Downloading, total, total);
        }
    }

    async fn fetch_and_apply(&self, kind: EntityKind, id: &str) -> Result<()> {
        let record = self
            .remote
            .fetch(kind, id)
            .await
            .map_err(|err| SyncError::network(err.to_string()))?
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "manifest lists {kind} '{id}' but the remote has no content for it"
                ))
            })?;
        if record.kind != kind || record.id != id {
            return Err(SyncError::validation(format!(
                "remote content for {kind} '{id}' identifies itself as {} '{}'",
                record.kind, record.id
            )));
        }
        self.local.put(record).await?;
        Ok(())
    }

    /// Dry-run classification: what would a sync do right now? Mutates
    /// nothing on either side.
    pub async fn check_for_changes(&self) -> Result<ChangeCheck> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let settings = self.sync_settings().await?;
        if !settings.enabled || settings.provider.is_none() {
            return Err(SyncError::NotConnected(
                "sync is disabled or no provider is configured".to_string(),
            ));
        }

        let remote_manifest = self
            .remote
            .manifest()
            .await
            .map_err(|err| SyncError::network(err.to_string()))?
            .unwrap_or_else(SyncManifest::empty);
        let baseline = self.settings.baseline().await?;
        let local_records = self.load_local_records().await?;

        let now = self.clock.now();
        let local = diff::detect_local_changes(&local_records, &baseline, &settings.device_id, now);
        let remote = diff::detect_remote_changes(&remote_manifest, &baseline, &settings.device_id);

        let direction = SyncDirection::from_counts(
            local.added.len() + local.updated.len() + local.deleted.len(),
            remote.added.len() + remote.updated.len() + remote.deleted.len(),
        );
        Ok(ChangeCheck {
            has_changes: direction != SyncDirection::None,
            direction: (direction != SyncDirection::None).then_some(direction),
        })
    }

    async fn load_local_records(&self) -> Result<HashMap<EntityKind, Vec<SyncRecord>>> {
        let mut records = HashMap::new();
        for kind in EntityKind::ALL {
            records.insert(kind, self.local.list(kind).await?);
        }
        Ok(records)
    }
}

/// What the run will actually transfer, after conflict resolution.
struct Plan {
    uploads: Vec<LocalItem>,
    downloads: Vec<(EntityKind, String)>,
    /// Local deletions pushed to the remote store and manifest.
    push_deletions: Vec<moodsync_core::DeletionTombstone>,
    /// Remote deletions applied to the local store.
    pull_deletions: Vec<(EntityKind, String)>,
    /// Conflicts deferred by a skip resolution.
    skipped: HashSet<(EntityKind, String)>,
}

impl Plan {
    fn build(
        local: LocalChanges,
        remote: RemoteChanges,
        resolved: &[SyncConflict],
        remote_manifest: &SyncManifest,
    ) -> Self {
        let conflicted: HashSet<(EntityKind, String)> = resolved
            .iter()
            .map(|conflict| (conflict.kind, conflict.id.clone()))
            .collect();

        let mut plan = Self {
            uploads: Vec::new(),
            downloads: Vec::new(),
            push_deletions: Vec::new(),
            pull_deletions: Vec::new(),
            skipped: HashSet::new(),
        };

        let mut local_items: HashMap<(EntityKind, String), LocalItem> = HashMap::new();
        for item in local.added.into_iter().chain(local.updated) {
            let key = (item.record.kind, item.record.id.clone());
            if conflicted.contains(&key) {
                local_items.insert(key, item);
            } else {
                plan.uploads.push(item);
            }
        }

        let mut local_tombstones: HashMap<(EntityKind, String), moodsync_core::DeletionTombstone> =
            HashMap::new();
        for tombstone in local.deleted {
            let key = (tombstone.kind, tombstone.id.clone());
            if conflicted.contains(&key) {
                local_tombstones.insert(key, tombstone);
            } else {
                plan.push_deletions.push(tombstone);
            }
        }

        for item in remote.added.into_iter().chain(remote.updated) {
            let key = (item.kind, item.id.clone());
            if !conflicted.contains(&key) {
                plan.downloads.push((item.kind, item.id));
            }
        }

        for deletion in remote.deleted {
            let key = (deletion.kind, deletion.id.clone());
            if !conflicted.contains(&key) {
                plan.pull_deletions.push((deletion.kind, deletion.id));
            }
        }

        for conflict in resolved {
            let key = (conflict.kind, conflict.id.clone());
            match conflict.resolution {
                Some(Resolution::Local) => {
                    if conflict.local.deleted {
                        if let Some(tombstone) = local_tombstones.remove(&key) {
                            plan.push_deletions.push(tombstone);
                        }
                    } else if let Some(item) = local_items.remove(&key) {
                        plan.uploads.push(item);
                    }
                }
                Some(Resolution::Remote) => {
                    if conflict.remote.deleted {
                        plan.pull_deletions.push(key);
                    } else if remote_manifest.get(conflict.kind, &conflict.id).is_some() {
                        plan.downloads.push(key);
                    }
                }
                Some(Resolution::Skip) | None => {
                    plan.skipped.insert(key);
                }
            }
        }

        plan
    }
}

/// Mutable accumulation across the transfer phases.
struct RunState {
    manifest: SyncManifest,
    issues: Vec<SyncIssue>,
    breakdown: HashMap<EntityKind, EntityCounts>,
    pushed: usize,
    pulled: usize,
    /// Keys whose baseline entries are reverted so the next run re-detects
    /// them: skipped conflicts plus per-entity failures.
    retry_keys: HashSet<(EntityKind, String)>,
}
