use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::{ColumnRef, SampleData, SampleStatus, SamplingConfig};
use crate::services::source_adapter::SourceAdapter;
use crate::services::{CancelFlag, ConnectionHandle};
use crate::utils::{ApiError, ApiResult};

/// Bounded-parallelism column sampler.
///
/// At most `max_concurrent_queries` sampling queries run at once per job;
/// a new column is admitted only when a permit frees up, which is also the
/// cooperative cancellation checkpoint. A failed column degrades to a
/// FAILED sample instead of aborting the batch, so the returned map always
/// holds an entry for every requested column.
pub struct Sampler {
    query_timeout: Duration,
}

impl Sampler {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    pub async fn sample(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        handle: Arc<ConnectionHandle>,
        columns: &[ColumnRef],
        config: &SamplingConfig,
        seed: u32,
        cancel: &CancelFlag,
        mut on_column_done: impl FnMut(usize, usize),
    ) -> ApiResult<HashMap<ColumnRef, SampleData>> {
        let total = columns.len();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries));
        let mut join_set: JoinSet<(ColumnRef, SampleData)> = JoinSet::new();
        let mut samples: HashMap<ColumnRef, SampleData> = HashMap::with_capacity(total);

        // Hard ceiling per column: twice the configured query timeout
        let column_timeout = self.query_timeout * 2;

        let mut done = 0usize;
        for column in columns {
            cancel.check()?;

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ApiError::internal_error("Sampler semaphore closed"))?;

            // Drain finished tasks eagerly so progress reporting keeps up
            while let Some(joined) = join_set.try_join_next() {
                if let Ok((col, sample)) = joined {
                    samples.insert(col, sample);
                }
                done += 1;
                on_column_done(done, total);
            }

            let adapter = Arc::clone(&adapter);
            let handle = Arc::clone(&handle);
            let config = config.clone();
            let column = column.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let sample = sample_one_column(
                    adapter.as_ref(),
                    &handle,
                    &column,
                    &config,
                    seed,
                    column_timeout,
                )
                .await;
                (column, sample)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok((col, sample)) = joined {
                samples.insert(col, sample);
            }
            done += 1;
            on_column_done(done, total);
        }

        cancel.check()?;

        // A panicked task never reported back; its column still gets an entry
        for column in columns {
            if !samples.contains_key(column) {
                tracing::warn!("Sampling task for {} vanished, recording failure", column);
                samples.insert(
                    column.clone(),
                    SampleData::failed(column.clone(), "sampling task aborted"),
                );
            }
        }

        let failed = samples.values().filter(|s| s.is_failed()).count();
        tracing::info!(
            "Sampled {} columns ({} failed) with {} parallel queries",
            total,
            failed,
            config.max_concurrent_queries
        );

        Ok(samples)
    }
}

async fn sample_one_column(
    adapter: &dyn SourceAdapter,
    handle: &ConnectionHandle,
    column: &ColumnRef,
    config: &SamplingConfig,
    seed: u32,
    column_timeout: Duration,
) -> SampleData {
    let fetched =
        tokio::time::timeout(column_timeout, adapter.fetch_values(handle, column, config, seed))
            .await;

    match fetched {
        Err(_) => {
            tracing::warn!("Sampling {} exceeded {:?}, cancelled", column, column_timeout);
            SampleData::failed(
                column.clone(),
                format!("Sampling timed out after {:?}", column_timeout),
            )
        },
        Ok(Err(e)) => {
            tracing::warn!("Sampling {} failed: {}", column, e);
            SampleData::failed(column.clone(), e.to_string())
        },
        Ok(Ok(values)) => {
            let null_count = values.iter().filter(|v| v.is_none()).count();
            let total_rows = values.len();
            let entropy = config
                .entropy_calculation
                .then(|| shannon_entropy(values.iter().filter_map(|v| v.as_deref())));

            SampleData {
                column: column.clone(),
                values,
                null_count,
                total_rows,
                entropy,
                status: SampleStatus::Ok,
                error_message: None,
            }
        },
    }
}

/// Shannon entropy (base 2) over the frequency distribution of the given
/// values, rounded to 4 decimal places. Empty and single-valued inputs
/// yield 0 by definition.
pub fn shannon_entropy<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut n = 0usize;
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
        n += 1;
    }

    if n == 0 || counts.len() <= 1 {
        return 0.0;
    }

    let n = n as f64;
    let entropy: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum();

    (entropy * 10_000.0).round() / 10_000.0
}
