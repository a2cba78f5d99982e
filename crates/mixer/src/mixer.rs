//! Mixing pass over forecast ticks

use std::collections::BTreeMap;

use storage::{forecast, mixed, observations, CommandExecutor, StorageError};
use tracing::{debug, info, warn};
use weather_data::{ForecastTick, MetricKey, MixedRecord, Observation, TickId};

use crate::config::MixerConfig;
use crate::reducer::Reducer;
use crate::Result;

/// Outcome of a mixing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixReport {
    /// Ticks mixed and marked processed
    pub mixed: Vec<TickId>,
    /// Ticks left unprocessed for the next pass
    pub failed: Vec<TickId>,
    /// Mixed records written
    pub records: usize,
}

/// Blend the observations of one tick into one record per timestamp.
///
/// Values are reduced in (timestamp, metric, source) order whatever order
/// they come in, so the same observations always give identical records.
/// Missing values do not contribute; timestamps with nothing to blend
/// produce no record.
pub fn mix_observations(
    tick: &ForecastTick,
    observations: &[Observation],
    use_counters: bool,
) -> Vec<MixedRecord> {
    let mut ordered: Vec<&Observation> = observations.iter().collect();
    ordered.sort_by_key(|o| (o.timestamp, o.metric, o.source_id));

    let mut buckets: BTreeMap<i64, BTreeMap<MetricKey, Reducer>> = BTreeMap::new();
    for observation in ordered {
        let Some(value) = observation.value else {
            continue;
        };
        buckets
            .entry(observation.timestamp)
            .or_default()
            .entry(observation.metric)
            .or_insert_with(|| Reducer::new(observation.metric.kind()))
            .push(value);
    }

    buckets
        .into_iter()
        .map(|(timestamp, reducers)| {
            let mut record = MixedRecord::new(tick, timestamp);
            for (metric, reducer) in reducers {
                if let Some(mut mixed) = reducer.finish() {
                    if !use_counters {
                        mixed.contributors = None;
                    }
                    record.values.insert(metric, mixed);
                }
            }
            record
        })
        .filter(|record| !record.is_empty())
        .collect()
}

/// Runs mixing units on the storage executor
#[derive(Clone)]
pub struct Mixer {
    executor: CommandExecutor,
    config: MixerConfig,
}

impl Mixer {
    pub fn new(executor: CommandExecutor, config: MixerConfig) -> Self {
        Self { executor, config }
    }

    /// Mix one tick and mark it processed.
    ///
    /// Each source contributes the rows of its newest tick up to this one,
    /// so a source that stays quiet keeps its last report in the blend.
    /// Reading, writing the records and flagging the tick happen in one
    /// unit. Mixing an already processed tick recomputes its records from
    /// the observations stored now.
    pub async fn mix_tick(&self, tick: ForecastTick) -> Result<Vec<MixedRecord>> {
        let use_counters = self.config.use_counters;
        let records = self
            .executor
            .execute("mixer.mix_tick", move |stores| {
                Box::pin(async move {
                    let observations = observations::records_for_mix(stores, tick.id).await?;
                    let records = mix_observations(&tick, &observations, use_counters);
                    mixed::replace_for_tick(stores, &tick, &records).await?;
                    forecast::mark_processed(stores, &[tick.id]).await?;
                    debug!(
                        "Mixed {} observations of tick {} into {} records",
                        observations.len(),
                        tick.id,
                        records.len()
                    );
                    Ok(records)
                })
            })
            .await?;
        Ok(records)
    }

    /// Mix every unprocessed tick, oldest first.
    ///
    /// A tick that fails stays unprocessed and the pass moves on. Only a
    /// stopped executor ends the pass early.
    pub async fn run_pending(&self) -> Result<MixReport> {
        let pending = self
            .executor
            .execute("mixer.pending", |stores| Box::pin(forecast::unprocessed(stores)))
            .await?;

        let mut report = MixReport::default();
        for tick in pending {
            match self.mix_tick(tick).await {
                Ok(records) => {
                    report.records += records.len();
                    report.mixed.push(tick.id);
                }
                Err(crate::MixerError::Storage(StorageError::ExecutorStopped)) => {
                    return Err(StorageError::ExecutorStopped.into());
                }
                Err(e) => {
                    warn!(error = %e, "Mixing tick {} failed, will retry", tick.id);
                    report.failed.push(tick.id);
                }
            }
        }

        if !report.mixed.is_empty() || !report.failed.is_empty() {
            info!(
                "Mixing pass done: {} ticks mixed, {} failed, {} records",
                report.mixed.len(),
                report.failed.len(),
                report.records
            );
        }
        Ok(report)
    }

    /// Reopen every tick that has observations and mix them all again
    pub async fn remix_all(&self) -> Result<MixReport> {
        self.executor
            .execute("mixer.reopen", |stores| {
                Box::pin(forecast::mark_all_not_processed(stores))
            })
            .await?;
        self.run_pending().await
    }
}
