//! Compliance-report assembly: a pure roll-up of a finished scan's
//! detection results and quasi-identifier groups. No I/O happens here and
//! every field is derived from the inputs, so the same scan always
//! assembles the same report.

use crate::models::{
    ComplianceReport, ConnectionDescriptor, DatabaseInfo, DetectionResult, QuasiIdentifierGroup,
    SampleStatus, ScanJob, ScanSummary, SchemaInfo,
};

pub fn assemble(
    job: &ScanJob,
    descriptor: &ConnectionDescriptor,
    schema: &SchemaInfo,
    results: Vec<DetectionResult>,
    groups: Vec<QuasiIdentifierGroup>,
) -> ComplianceReport {
    let summary = ScanSummary {
        total_tables: schema.tables.len() as u64,
        total_columns: schema.column_count() as u64,
        columns_scanned: results.len() as u64,
        pii_columns_found: results.iter().filter(|r| r.has_pii).count() as u64,
        quasi_identifier_groups: groups.len() as u64,
        failed_columns: results
            .iter()
            .filter(|r| r.sample_status == SampleStatus::Failed)
            .count() as u64,
    };

    let duration_ms = match (job.started_at, job.completed_at) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    };

    ComplianceReport {
        scan_id: job.id,
        database: DatabaseInfo::from(descriptor),
        summary,
        detection_results: results,
        quasi_identifier_groups: groups,
        sampling_config: job.sampling_config.clone(),
        detection_config: job.detection_config.clone(),
        quasi_identifier_config: job.quasi_identifier_config.clone(),
        started_at: job.started_at,
        completed_at: job.completed_at,
        duration_ms,
    }
}
