use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    ClusteringAlgorithm, ColumnRef, DetectionMethod, DetectionResult, PagedResult, PiiCandidate,
    PiiType, QuasiIdentifierGroup, SampleStatus, ScanJob, ScanJobStatus, ScanListFilter,
    ScanStatus, SchemaInfo,
};
use crate::utils::{ApiError, ApiResult};

/// Control-store persistence for scan jobs and their results.
///
/// Status transitions are single-row updates with a compare-and-swap on
/// the current status; a scan's final results (detection results,
/// candidates, quasi-identifier groups, schema snapshot, report) land in
/// one transaction, so a COMPLETED job always has a readable report and a
/// FAILED job never has one.
#[derive(Clone)]
pub struct ScanStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct ScanJobRow {
    id: String,
    connection_id: String,
    status: String,
    target_tables: Option<String>,
    sampling_config: String,
    detection_config: String,
    quasi_identifier_config: String,
    total_columns: i64,
    columns_scanned: i64,
    pii_columns_found: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScanJobRow> for ScanJob {
    type Error = ApiError;

    fn try_from(row: ScanJobRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| ApiError::persistence_error(format!("Corrupt {} column", what));

        Ok(ScanJob {
            id: Uuid::parse_str(&row.id).map_err(|_| corrupt("scan_jobs.id"))?,
            connection_id: Uuid::parse_str(&row.connection_id)
                .map_err(|_| corrupt("scan_jobs.connection_id"))?,
            status: ScanStatus::parse(&row.status).ok_or_else(|| corrupt("scan_jobs.status"))?,
            target_tables: row
                .target_tables
                .map(|t| serde_json::from_str(&t))
                .transpose()
                .map_err(|_| corrupt("scan_jobs.target_tables"))?,
            sampling_config: serde_json::from_str(&row.sampling_config)
                .map_err(|_| corrupt("scan_jobs.sampling_config"))?,
            detection_config: serde_json::from_str(&row.detection_config)
                .map_err(|_| corrupt("scan_jobs.detection_config"))?,
            quasi_identifier_config: serde_json::from_str(&row.quasi_identifier_config)
                .map_err(|_| corrupt("scan_jobs.quasi_identifier_config"))?,
            total_columns: row.total_columns.max(0) as u64,
            columns_scanned: row.columns_scanned.max(0) as u64,
            pii_columns_found: row.pii_columns_found.max(0) as u64,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

const ACTIVE_STATUSES: &str =
    "'PENDING', 'EXTRACTING_METADATA', 'SAMPLING', 'DETECTING_PII', 'GENERATING_REPORT'";

impl ScanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_job(&self, job: &ScanJob) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO scan_jobs (id, connection_id, status, target_tables, sampling_config,
             detection_config, quasi_identifier_config, total_columns, columns_scanned,
             pii_columns_found, error_message, created_at, started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.connection_id.to_string())
        .bind(job.status.as_str())
        .bind(
            job.target_tables
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&job.sampling_config)?)
        .bind(serde_json::to_string(&job.detection_config)?)
        .bind(serde_json::to_string(&job.quasi_identifier_config)?)
        .bind(job.total_columns as i64)
        .bind(job.columns_scanned as i64)
        .bind(job.pii_columns_found as i64)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> ApiResult<ScanJob> {
        let row: Option<ScanJobRow> = sqlx::query_as("SELECT * FROM scan_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScanJob::try_from)
            .transpose()?
            .ok_or_else(|| ApiError::scan_not_found(id))
    }

    /// Compare-and-swap status transition. Returns false when the stored
    /// status no longer matches `from` (e.g. a concurrent cancel won).
    pub async fn transition(
        &self,
        id: Uuid,
        from: ScanStatus,
        to: ScanStatus,
    ) -> ApiResult<bool> {
        let now = Utc::now();
        let started_at = (from == ScanStatus::Pending).then_some(now);
        let completed_at = to.is_terminal().then_some(now);

        let result = sqlx::query(
            "UPDATE scan_jobs SET status = ?,
             started_at = COALESCE(started_at, ?),
             completed_at = COALESCE(?, completed_at)
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Atomically cancel a still-active job. Ok(true) when this call won
    /// the transition, Ok(false) when the job was already terminal.
    pub async fn cancel_if_active(&self, id: Uuid) -> ApiResult<bool> {
        // Existence first, so NotFound beats AlreadyTerminal
        let _ = self.get_job(id).await?;

        let result = sqlx::query(&format!(
            "UPDATE scan_jobs SET status = 'CANCELLED', completed_at = ?
             WHERE id = ? AND status IN ({})",
            ACTIVE_STATUSES
        ))
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Force a stuck job to FAILED regardless of its active state.
    /// Used by the cancellation watchdog.
    pub async fn force_fail_if_active(&self, id: Uuid, message: &str) -> ApiResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE scan_jobs SET status = 'FAILED', error_message = ?, completed_at = ?
             WHERE id = ? AND status IN ({})",
            ACTIVE_STATUSES
        ))
        .bind(message)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failure outcome. Loses to an already-terminal status.
    pub async fn mark_failed(&self, id: Uuid, message: &str) -> ApiResult<bool> {
        self.force_fail_if_active(id, message).await
    }

    /// Last-resort transition for a cancelled job whose worker overran the
    /// cancellation deadline. COMPLETED and FAILED are never overwritten.
    pub async fn force_fail_overdue(&self, id: Uuid, message: &str) -> ApiResult<bool> {
        let result = sqlx::query(
            "UPDATE scan_jobs SET status = 'FAILED', error_message = ?,
             completed_at = COALESCE(completed_at, ?)
             WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_total_columns(&self, id: Uuid, total: u64) -> ApiResult<()> {
        sqlx::query("UPDATE scan_jobs SET total_columns = ? WHERE id = ?")
            .bind(total as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_final_counters(
        &self,
        id: Uuid,
        columns_scanned: u64,
        pii_columns_found: u64,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE scan_jobs SET columns_scanned = ?, pii_columns_found = ? WHERE id = ?",
        )
        .bind(columns_scanned as i64)
        .bind(pii_columns_found as i64)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_jobs(
        &self,
        filter: &ScanListFilter,
        page: u32,
        size: u32,
    ) -> ApiResult<PagedResult<ScanJobStatus>> {
        let size = size.clamp(1, 500);
        let offset = page as i64 * size as i64;

        let mut where_clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            where_clauses.push("status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(connection_id) = filter.connection_id {
            where_clauses.push("connection_id = ?");
            binds.push(connection_id.to_string());
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM scan_jobs{}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in binds.clone() {
            count_query = count_query.bind(bind);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "SELECT * FROM scan_jobs{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_sql
        );
        let mut list_query = sqlx::query_as::<_, ScanJobRow>(&list_sql);
        for bind in binds {
            list_query = list_query.bind(bind);
        }
        let rows = list_query.bind(size as i64).bind(offset).fetch_all(&self.pool).await?;

        let items = rows
            .into_iter()
            .map(|row| ScanJob::try_from(row).map(|job| ScanJobStatus::from(&job)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PagedResult { items, page, size, total: total.max(0) as u64 })
    }

    /// Jobs created inside a time window, newest first (dashboard reads)
    pub async fn jobs_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ApiResult<Vec<ScanJob>> {
        let rows: Vec<ScanJobRow> = sqlx::query_as(
            "SELECT * FROM scan_jobs WHERE created_at >= ? AND created_at <= ?
             ORDER BY created_at DESC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScanJob::try_from).collect()
    }

    pub async fn jobs_by_status(&self, status: ScanStatus) -> ApiResult<Vec<ScanJob>> {
        let rows: Vec<ScanJobRow> =
            sqlx::query_as("SELECT * FROM scan_jobs WHERE status = ? ORDER BY created_at DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ScanJob::try_from).collect()
    }

    /// Persist the full outcome of a completed scan in one transaction:
    /// schema snapshot, detection results with their candidates,
    /// quasi-identifier groups, and the serialized compliance report.
    pub async fn persist_results(
        &self,
        job: &ScanJob,
        schema: &SchemaInfo,
        results: &[DetectionResult],
        groups: &[QuasiIdentifierGroup],
        report_json: &str,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;
        let scan_id = job.id.to_string();

        let snapshot = sqlx::query(
            "INSERT INTO schema_snapshots (scan_id, catalog_name, schema_name) VALUES (?, ?, ?)",
        )
        .bind(&scan_id)
        .bind(&schema.catalog)
        .bind(&schema.schema)
        .execute(&mut *tx)
        .await?;
        let snapshot_id = snapshot.last_insert_rowid();

        for table in &schema.tables {
            let table_row = sqlx::query(
                "INSERT INTO table_snapshots (schema_snapshot_id, name, kind, comment)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(&table.name)
            .bind(table.kind.as_str())
            .bind(&table.comment)
            .execute(&mut *tx)
            .await?;
            let table_id = table_row.last_insert_rowid();

            for (ordinal, column) in table.columns.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO column_snapshots (table_snapshot_id, name, data_type, size,
                     nullable, primary_key, foreign_key, comment, ordinal)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(table_id)
                .bind(&column.name)
                .bind(&column.data_type)
                .bind(column.size)
                .bind(column.nullable)
                .bind(column.primary_key)
                .bind(column.foreign_key)
                .bind(&column.comment)
                .bind(ordinal as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        for result in results {
            let result_row = sqlx::query(
                "INSERT INTO detection_results (scan_id, schema_name, table_name, column_name,
                 winning_type, confidence, has_pii, is_quasi_identifier,
                 quasi_identifier_risk_score, clustering_method, correlated_columns,
                 sample_status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&scan_id)
            .bind(&result.column.schema)
            .bind(&result.column.table)
            .bind(&result.column.column)
            .bind(result.winning_type.as_str())
            .bind(result.confidence)
            .bind(result.has_pii)
            .bind(result.is_quasi_identifier)
            .bind(result.quasi_identifier_risk_score)
            .bind(result.clustering_method.map(|m| m.as_str()))
            .bind(serde_json::to_string(&result.correlated_columns)?)
            .bind(result.sample_status.as_str())
            .execute(&mut *tx)
            .await?;
            let result_id = result_row.last_insert_rowid();

            for candidate in &result.candidates {
                sqlx::query(
                    "INSERT INTO pii_candidates (detection_result_id, pii_type, confidence,
                     detection_method, evidence)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(result_id)
                .bind(candidate.pii_type.as_str())
                .bind(candidate.confidence)
                .bind(candidate.method.as_str())
                .bind(&candidate.evidence)
                .execute(&mut *tx)
                .await?;
            }
        }

        for group in groups {
            sqlx::query(
                "INSERT INTO quasi_identifier_groups (scan_id, columns, risk_score,
                 clustering_method)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&scan_id)
            .bind(serde_json::to_string(&group.columns)?)
            .bind(group.risk_score)
            .bind(group.clustering_method.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO compliance_reports (scan_id, report_json, generated_at) VALUES (?, ?, ?)",
        )
        .bind(&scan_id)
        .bind(report_json)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Persisted results for scan {}: {} detection results, {} groups",
            job.id,
            results.len(),
            groups.len()
        );
        Ok(())
    }

    /// The stored report serialization, byte-for-byte as written
    pub async fn get_report_json(&self, scan_id: Uuid) -> ApiResult<Option<String>> {
        let report: Option<String> =
            sqlx::query_scalar("SELECT report_json FROM compliance_reports WHERE scan_id = ?")
                .bind(scan_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(report)
    }

    pub async fn get_detection_results(&self, scan_id: Uuid) -> ApiResult<Vec<DetectionResult>> {
        let rows = sqlx::query(
            "SELECT id, schema_name, table_name, column_name, winning_type, confidence,
             has_pii, is_quasi_identifier, quasi_identifier_risk_score, clustering_method,
             correlated_columns, sample_status
             FROM detection_results WHERE scan_id = ?
             ORDER BY table_name, column_name",
        )
        .bind(scan_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let result_id: i64 = row.try_get("id")?;
            let mut result = detection_result_from_row(&row)?;
            result.candidates = self.candidates_for(result_id, &result.column).await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn candidates_for(
        &self,
        detection_result_id: i64,
        column: &ColumnRef,
    ) -> ApiResult<Vec<PiiCandidate>> {
        let rows = sqlx::query(
            "SELECT pii_type, confidence, detection_method, evidence
             FROM pii_candidates WHERE detection_result_id = ? ORDER BY id",
        )
        .bind(detection_result_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PiiCandidate {
                    column: column.clone(),
                    pii_type: PiiType::parse(row.try_get::<String, _>("pii_type")?.as_str()),
                    confidence: row.try_get("confidence")?,
                    method: DetectionMethod::parse(
                        row.try_get::<String, _>("detection_method")?.as_str(),
                    ),
                    evidence: row.try_get("evidence")?,
                })
            })
            .collect()
    }
}

fn detection_result_from_row(row: &SqliteRow) -> ApiResult<DetectionResult> {
    let column = ColumnRef::new(
        row.try_get::<String, _>("schema_name")?,
        row.try_get::<String, _>("table_name")?,
        row.try_get::<String, _>("column_name")?,
    );

    let correlated: Vec<ColumnRef> =
        serde_json::from_str(row.try_get::<String, _>("correlated_columns")?.as_str())
            .unwrap_or_default();

    Ok(DetectionResult {
        column,
        candidates: Vec::new(),
        winning_type: PiiType::parse(row.try_get::<String, _>("winning_type")?.as_str()),
        confidence: row.try_get("confidence")?,
        has_pii: row.try_get("has_pii")?,
        is_quasi_identifier: row.try_get("is_quasi_identifier")?,
        quasi_identifier_risk_score: row.try_get("quasi_identifier_risk_score")?,
        clustering_method: row
            .try_get::<Option<String>, _>("clustering_method")?
            .map(|m| ClusteringAlgorithm::parse(&m)),
        correlated_columns: correlated,
        sample_status: SampleStatus::parse(row.try_get::<String, _>("sample_status")?.as_str()),
    })
}
