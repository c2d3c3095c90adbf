use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;
use validator::Validate;

use crate::config::ScannerConfig;
use crate::models::{
    ColumnRef, DriverKind, PagedResult, SampleData, ScanJob, ScanJobStatus, ScanListFilter,
    ScanRequest, ScanStatus, ScanStatusEvent,
};
use crate::services::detection::ColumnData;
use crate::services::notification::ProgressReporter;
use crate::services::{
    CancelFlag, ConnectionRegistry, DetectionPipeline, NotificationSink, QuasiIdentifierAnalyzer,
    Sampler, ScanStore, SourceAdapter, create_adapter, report_assembler,
};
use crate::utils::{ApiError, ApiResult};

/// Client-supplied request ids are deduplicated inside this window
const DEDUP_WINDOW_MINUTES: i64 = 5;

/// Owns the scan-job state machine and the worker pool.
///
/// Every accepted job runs on its own worker task through the fixed stage
/// sequence (metadata, sampling, detection, report); each transition is
/// persisted before the new stage starts and emitted to the notification
/// sink afterwards. Cancellation CAS-flips the stored status and raises
/// the job's cooperative flag.
#[derive(Clone)]
pub struct ScanOrchestrator {
    store: Arc<ScanStore>,
    registry: Arc<ConnectionRegistry>,
    sampler: Arc<Sampler>,
    pipeline: Arc<DetectionPipeline>,
    analyzer: Arc<QuasiIdentifierAnalyzer>,
    sink: Arc<NotificationSink>,
    config: ScannerConfig,
    workers: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    cancel_flags: Arc<DashMap<Uuid, CancelFlag>>,
    /// Serializes (status CAS + event emit) pairs per job so observers see
    /// states in monotonic order even across the cancel path
    transition_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    recent_requests: Arc<DashMap<String, (Uuid, DateTime<Utc>)>>,
    adapter_override: Option<Arc<dyn SourceAdapter>>,
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ScanStore>,
        registry: Arc<ConnectionRegistry>,
        sampler: Arc<Sampler>,
        pipeline: Arc<DetectionPipeline>,
        analyzer: Arc<QuasiIdentifierAnalyzer>,
        sink: Arc<NotificationSink>,
        config: ScannerConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            store,
            registry,
            sampler,
            pipeline,
            analyzer,
            sink,
            config,
            workers,
            queued: Arc::new(AtomicUsize::new(0)),
            cancel_flags: Arc::new(DashMap::new()),
            transition_locks: Arc::new(DashMap::new()),
            recent_requests: Arc::new(DashMap::new()),
            adapter_override: None,
        }
    }

    fn transition_lock(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        self.transition_locks.entry(job_id).or_default().clone()
    }

    /// Replace the dialect adapter; used by tests to scan fake sources
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapter_override = Some(adapter);
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScanStatusEvent> {
        self.sink.subscribe()
    }

    /// Validate and enqueue a scan. Returns the job id immediately;
    /// execution happens asynchronously on a worker.
    pub async fn submit(&self, request: ScanRequest) -> ApiResult<Uuid> {
        request
            .validate()
            .map_err(|e| ApiError::validation_error(format!("Invalid scan request: {}", e)))?;
        request
            .sampling_config
            .validate()
            .map_err(ApiError::validation_error)?;
        request
            .detection_config
            .validate()
            .map_err(ApiError::validation_error)?;
        request
            .quasi_identifier_config
            .validate()
            .map_err(ApiError::validation_error)?;

        // Unknown connection ids are a caller mistake, not a missing record
        self.registry.lookup(request.connection_id).await.map_err(|e| match e {
            ApiError::NotFound(msg) => ApiError::validation_error(msg),
            other => other,
        })?;

        if let Some(request_id) = &request.request_id {
            self.sweep_dedup_window();
            if let Some(entry) = self.recent_requests.get(request_id) {
                let (job_id, seen_at) = *entry;
                if Utc::now() - seen_at < ChronoDuration::minutes(DEDUP_WINDOW_MINUTES) {
                    tracing::info!(
                        "Duplicate submission '{}' within dedup window, returning job {}",
                        request_id,
                        job_id
                    );
                    return Ok(job_id);
                }
            }
        }

        if self.queued.load(Ordering::Relaxed) >= self.config.max_queued {
            return Err(ApiError::resource_exhausted(format!(
                "Scan queue is full ({} jobs waiting)",
                self.config.max_queued
            )));
        }

        let job = ScanJob::new(&request);
        self.store.insert_job(&job).await?;

        if let Some(request_id) = request.request_id {
            self.recent_requests.insert(request_id, (job.id, Utc::now()));
        }

        let flag = CancelFlag::new();
        self.cancel_flags.insert(job.id, flag.clone());
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(ScanStatusEvent::transition(&job));

        tracing::info!(
            "Scan {} submitted for connection {} ({} queued)",
            job.id,
            job.connection_id,
            self.queued.load(Ordering::Relaxed)
        );

        let job_id = job.id;
        let this = self.clone();
        tokio::spawn(async move {
            this.drive_job(job, flag).await;
        });

        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> ApiResult<ScanJobStatus> {
        let job = self.store.get_job(job_id).await?;
        Ok(ScanJobStatus::from(&job))
    }

    pub async fn list(
        &self,
        filter: &ScanListFilter,
        page: u32,
        size: u32,
    ) -> ApiResult<PagedResult<ScanJobStatus>> {
        self.store.list_jobs(filter, page, size).await
    }

    /// Cancel a non-terminal job. The stored status flips to CANCELLED
    /// immediately; in-flight work notices at its next checkpoint. A
    /// watchdog force-fails workers that overrun the deadline.
    pub async fn cancel(&self, job_id: Uuid) -> ApiResult<()> {
        let lock = self.transition_lock(job_id);
        {
            let _guard = lock.lock().await;

            let won = self.store.cancel_if_active(job_id).await?;
            if !won {
                return Err(ApiError::already_terminal(format!(
                    "Scan job {} already reached a terminal state",
                    job_id
                )));
            }

            if let Some(flag) = self.cancel_flags.get(&job_id) {
                flag.cancel();
            }

            if let Ok(job) = self.store.get_job(job_id).await {
                self.sink.emit(ScanStatusEvent::transition(&job));
            }
        }

        tracing::info!("Scan {} cancelled", job_id);

        let this = self.clone();
        let deadline = self.config.cancellation_deadline();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if this.cancel_flags.contains_key(&job_id) {
                tracing::warn!(
                    "Scan {} still running {:?} after cancel, forcing FAILED",
                    job_id,
                    deadline
                );
                let lock = this.transition_lock(job_id);
                let _guard = lock.lock().await;
                match this
                    .store
                    .force_fail_overdue(job_id, "cancellation exceeded deadline")
                    .await
                {
                    Ok(true) => {
                        if let Ok(job) = this.store.get_job(job_id).await {
                            this.sink.emit(ScanStatusEvent::transition(&job));
                        }
                    },
                    Ok(false) => {},
                    Err(e) => tracing::error!("Cancellation watchdog failed for {}: {}", job_id, e),
                }
            }
        });

        Ok(())
    }

    /// The stored compliance report for a COMPLETED job, byte-for-byte
    pub async fn report(&self, job_id: Uuid) -> ApiResult<String> {
        let job = self.store.get_job(job_id).await?;
        if job.status != ScanStatus::Completed {
            return Err(ApiError::not_completed(format!(
                "Scan job {} is {}, report available only for COMPLETED scans",
                job_id, job.status
            )));
        }

        self.store
            .get_report_json(job_id)
            .await?
            .ok_or_else(|| {
                ApiError::persistence_error(format!("Report missing for completed scan {}", job_id))
            })
    }

    /// Jobs waiting for a worker (monitoring)
    pub fn queued_jobs(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    fn adapter_for(&self, driver: DriverKind) -> Arc<dyn SourceAdapter> {
        match &self.adapter_override {
            Some(adapter) => Arc::clone(adapter),
            None => create_adapter(driver),
        }
    }

    fn sweep_dedup_window(&self) {
        let cutoff = Utc::now() - ChronoDuration::minutes(DEDUP_WINDOW_MINUTES);
        self.recent_requests.retain(|_, (_, seen_at)| *seen_at > cutoff);
    }

    /// Worker entry: waits for a pool slot, runs the job, settles the
    /// terminal state. Panics inside the job task are converted to FAILED.
    async fn drive_job(self, job: ScanJob, flag: CancelFlag) {
        let job_id = job.id;

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.queued.fetch_sub(1, Ordering::Relaxed);
                self.cancel_flags.remove(&job_id);
                return;
            },
        };
        self.queued.fetch_sub(1, Ordering::Relaxed);

        let runner = self.clone();
        let run_flag = flag.clone();
        let outcome =
            tokio::spawn(async move { runner.run_job(job, run_flag).await }).await;

        match outcome {
            Ok(Ok(())) => {},
            Ok(Err(ApiError::Cancelled)) => {
                tracing::info!("Scan {} stopped at a cancellation checkpoint", job_id);
            },
            Ok(Err(e)) => self.settle_failure(job_id, e.to_string()).await,
            Err(join_error) => {
                self.settle_failure(job_id, format!("scan worker panicked: {}", join_error)).await;
            },
        }

        self.cancel_flags.remove(&job_id);
        self.transition_locks.remove(&job_id);
        drop(permit);
    }

    /// Execute the stage sequence for one job
    async fn run_job(&self, mut job: ScanJob, flag: CancelFlag) -> ApiResult<()> {
        let job_id = job.id;

        self.advance(&mut job, ScanStatus::ExtractingMetadata).await?;

        let handle = Arc::new(self.registry.borrow(job.connection_id).await?);
        let adapter = self.adapter_for(handle.descriptor().driver);

        flag.check()?;
        let schema = adapter
            .extract_schema(&handle, job.target_tables.as_deref())
            .await?;

        let mut column_infos: Vec<(ColumnRef, crate::models::ColumnInfo)> = Vec::new();
        for table in &schema.tables {
            for column in &table.columns {
                column_infos.push((
                    ColumnRef::new(schema.schema.clone(), table.name.clone(), column.name.clone()),
                    column.clone(),
                ));
            }
        }
        let column_refs: Vec<ColumnRef> =
            column_infos.iter().map(|(r, _)| r.clone()).collect();

        job.total_columns = column_refs.len() as u64;
        self.store.set_total_columns(job_id, job.total_columns).await?;

        self.advance(&mut job, ScanStatus::Sampling).await?;

        let seed = seed_from(job_id);
        let sampling_progress = ProgressReporter::new(
            Arc::clone(&self.sink),
            job_id,
            ScanStatus::Sampling,
            "sampling",
        );
        let mut samples = self
            .sampler
            .sample(
                Arc::clone(&adapter),
                Arc::clone(&handle),
                &column_refs,
                &job.sampling_config,
                seed,
                &flag,
                |done, total| sampling_progress.record(done, total),
            )
            .await?;

        self.advance(&mut job, ScanStatus::DetectingPii).await?;

        let column_data: Vec<ColumnData> = column_infos
            .into_iter()
            .map(|(column, info)| {
                let sample = samples
                    .remove(&column)
                    .unwrap_or_else(|| SampleData::failed(column.clone(), "sample missing"));
                ColumnData { column, info, sample }
            })
            .collect();

        let detection_progress = ProgressReporter::new(
            Arc::clone(&self.sink),
            job_id,
            ScanStatus::DetectingPii,
            "detecting",
        );
        let mut results = self
            .pipeline
            .detect(
                column_data.clone(),
                &job.detection_config,
                job.sampling_config.max_concurrent_queries,
                &flag,
                |done, total| detection_progress.record(done, total),
            )
            .await?;

        flag.check()?;

        let groups = self.analyzer.analyze(
            &column_data,
            &mut results,
            job.sampling_config.sample_size,
            &job.quasi_identifier_config,
        );

        job.columns_scanned = results.len() as u64;
        job.pii_columns_found = results.iter().filter(|r| r.has_pii).count() as u64;
        self.store
            .set_final_counters(job_id, job.columns_scanned, job.pii_columns_found)
            .await?;

        self.advance(&mut job, ScanStatus::GeneratingReport).await?;

        job.completed_at = Some(Utc::now());
        let report =
            report_assembler::assemble(&job, handle.descriptor(), &schema, results, groups);
        let report_json = serde_json::to_string(&report)?;

        self.store
            .persist_results(
                &job,
                &schema,
                &report.detection_results,
                &report.quasi_identifier_groups,
                &report_json,
            )
            .await
            .map_err(|e| ApiError::persistence_error(e.to_string()))?;

        self.advance(&mut job, ScanStatus::Completed).await?;

        tracing::info!(
            "Scan {} completed: {}/{} columns carry PII, {} quasi-identifier group(s)",
            job_id,
            job.pii_columns_found,
            job.columns_scanned,
            report.quasi_identifier_groups.len()
        );
        Ok(())
    }

    /// Persist the transition (write-ahead), then emit the status event.
    /// A lost CAS means a concurrent cancel or force-fail owns the job now.
    async fn advance(&self, job: &mut ScanJob, to: ScanStatus) -> ApiResult<()> {
        if !job.status.can_transition_to(to) {
            return Err(ApiError::internal_error(format!(
                "Illegal transition {} -> {} for scan {}",
                job.status, to, job.id
            )));
        }

        let lock = self.transition_lock(job.id);
        let _guard = lock.lock().await;

        let won = self.store.transition(job.id, job.status, to).await?;
        if !won {
            tracing::debug!("Scan {} lost transition to {}, observed cancellation", job.id, to);
            return Err(ApiError::Cancelled);
        }

        if job.status == ScanStatus::Pending {
            job.started_at = Some(Utc::now());
        }
        job.status = to;
        if to.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }

        self.sink.emit(ScanStatusEvent::transition(job));
        Ok(())
    }

    /// Record FAILED (unless a cancel already settled the job) and emit
    /// the final event. Partial results are never persisted.
    async fn settle_failure(&self, job_id: Uuid, message: String) {
        tracing::error!("Scan {} failed: {}", job_id, message);

        let lock = self.transition_lock(job_id);
        let _guard = lock.lock().await;

        match self.store.mark_failed(job_id, &message).await {
            Ok(true) => {
                if let Ok(job) = self.store.get_job(job_id).await {
                    self.sink.emit(ScanStatusEvent::transition(&job));
                }
            },
            Ok(false) => {
                tracing::debug!("Scan {} already terminal, failure not recorded", job_id);
            },
            Err(e) => {
                tracing::error!("Could not record failure for scan {}: {}", job_id, e);
            },
        }
    }
}

/// Stable per-job seed so RANDOM sampling is reproducible for a job
fn seed_from(job_id: Uuid) -> u32 {
    let bytes = job_id.as_bytes();
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(buf)
        })
        .fold(0u32, |acc, word| acc ^ word)
}
