//! Collect, mix and read back across the real stores

use std::sync::Arc;

use data_validator::LimitValidator;
use mixer::{Mixer, MixerConfig};
use storage::{
    CommandExecutor, DatabaseManager, ForecastRegistry, MixedRecordStore, ObservationStore,
    UserMetricRegistry,
};
use tempfile::TempDir;
use weather_data::{Metric, Sample, WeatherData};

struct Harness {
    _dir: TempDir,
    executor: CommandExecutor,
    forecast: ForecastRegistry,
    observations: ObservationStore,
    mixed: MixedRecordStore,
    mixer: Mixer,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let executor = CommandExecutor::spawn(64);
    DatabaseManager::new(executor.clone())
        .initialize(dir.path())
        .await
        .unwrap();

    let user_metrics = UserMetricRegistry::new(executor.clone());
    user_metrics.build_cache().await.unwrap();

    Harness {
        forecast: ForecastRegistry::new(executor.clone()),
        observations: ObservationStore::new(
            executor.clone(),
            Arc::new(LimitValidator::default()),
            user_metrics,
        ),
        mixed: MixedRecordStore::new(executor.clone()),
        mixer: Mixer::new(executor.clone(), MixerConfig::default()),
        executor,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_two_sources_blend_into_one_record() {
    let h = harness().await;
    let tick = h.forecast.add_record(Some(1_700_000_000)).await.unwrap();
    let ts = 1_700_006_400;

    h.observations
        .add_records(
            tick,
            1,
            vec![
                Sample::new(ts, Metric::MinTemp, Some(-18.0)),
                Sample::new(ts, Metric::Rain, Some(5.0)),
            ],
        )
        .await
        .unwrap();
    h.observations
        .add_records(
            tick,
            2,
            vec![
                Sample::new(ts, Metric::MinTemp, Some(-20.0)),
                Sample::new(ts, Metric::Rain, Some(9.0)),
                // Implausible, stored as missing and left out of the blend
                Sample::new(ts, Metric::Temperature, Some(75.0)),
            ],
        )
        .await
        .unwrap();

    let report = h.mixer.run_pending().await.unwrap();
    assert_eq!(report.mixed, vec![tick]);
    assert!(report.failed.is_empty());

    let latest = h.mixed.latest().await.unwrap();
    assert_eq!(latest.len(), 1);
    let record = &latest[0];
    assert_eq!(record.forecast_tick_id, tick);
    assert_eq!(record.forecast_timestamp, 1_700_000_000);
    assert_eq!(record.get(Metric::MinTemp), Some(-20.0));
    assert_eq!(record.contributors(Metric::MinTemp), Some(2));
    assert_eq!(record.get(Metric::Rain), Some(7.0));
    assert_eq!(record.get(Metric::Temperature), None);

    assert!(h.forecast.get_unprocessed_records().await.unwrap().is_empty());
    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_quiet_source_stays_in_latest_blend() {
    let h = harness().await;
    let ts = 86_400;

    let first = h.forecast.add_record(Some(0)).await.unwrap();
    for (source, value) in [(1, -18.0), (2, -20.0)] {
        h.observations
            .add_records(first, source, vec![Sample::new(ts, Metric::MinTemp, Some(value))])
            .await
            .unwrap();
    }
    h.mixer.run_pending().await.unwrap();

    // Only source 1 reports again; its row moves to the new tick
    let second = h.forecast.add_record(Some(3_600)).await.unwrap();
    h.observations
        .add_records(second, 1, vec![Sample::new(ts, Metric::MinTemp, Some(-18.0))])
        .await
        .unwrap();
    let report = h.mixer.run_pending().await.unwrap();
    assert_eq!(report.mixed, vec![second]);

    let latest = h.mixed.latest().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].forecast_tick_id, second);
    assert_eq!(latest[0].get(Metric::MinTemp), Some(-20.0));
    assert_eq!(latest[0].contributors(Metric::MinTemp), Some(2));
    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_remixing_is_bit_identical() {
    let h = harness().await;
    let tick = h.forecast.add_record(Some(0)).await.unwrap();

    for source in 1..=4 {
        let mut data = WeatherData::new(86_400);
        data.set_value(Metric::Et0, 3.1 + source as f64 * 0.37);
        data.set_value(Metric::MaxTemp, 25.0 + source as f64);
        data.set_user_value("soilMoisture", 0.2 * source as f64);
        h.observations
            .add_weather_data(tick, source, &[data])
            .await
            .unwrap();
    }

    h.mixer.run_pending().await.unwrap();
    let first = h.mixed.records_for_tick(tick).await.unwrap();

    let report = h.mixer.remix_all().await.unwrap();
    assert_eq!(report.mixed, vec![tick]);
    let second = h.mixed.records_for_tick(tick).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    for (key, value) in &first[0].values {
        assert_eq!(
            value.value.to_bits(),
            second[0].values[key].value.to_bits(),
            "{} differs",
            key
        );
    }
    assert_eq!(first[0].get(Metric::MaxTemp), Some(29.0));
    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_late_observations_are_picked_up_on_remix() {
    let h = harness().await;
    let tick = h.forecast.add_record(Some(0)).await.unwrap();

    h.observations
        .add_records(tick, 1, vec![Sample::new(0, Metric::Qpf, Some(2.0))])
        .await
        .unwrap();
    h.mixer.run_pending().await.unwrap();

    // A second source reports after the tick was mixed
    h.observations
        .add_records(tick, 2, vec![Sample::new(0, Metric::Qpf, Some(4.0))])
        .await
        .unwrap();
    assert!(h.mixer.run_pending().await.unwrap().mixed.is_empty());

    h.mixer.remix_all().await.unwrap();
    let records = h.mixed.records_for_tick(tick).await.unwrap();
    assert_eq!(records[0].get(Metric::Qpf), Some(3.0));
    assert_eq!(records[0].contributors(Metric::Qpf), Some(2));
    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_tick_without_observations_is_marked_processed() {
    let h = harness().await;
    let empty = h.forecast.add_record(Some(0)).await.unwrap();

    let report = h.mixer.run_pending().await.unwrap();
    assert_eq!(report.mixed, vec![empty]);
    assert_eq!(report.records, 0);
    assert!(h.mixed.records_for_tick(empty).await.unwrap().is_empty());
    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sources_are_serialized() {
    let h = harness().await;
    let tick = h.forecast.add_record(None).await.unwrap();

    let writers: Vec<_> = (1..=8)
        .map(|source| {
            let store = h.observations.clone();
            tokio::spawn(async move {
                for hour in 0..24 {
                    store
                        .add_records(
                            tick,
                            source,
                            vec![Sample::new(hour * 3_600, Metric::Wind, Some(source as f64))],
                        )
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(h.observations.count().await.unwrap(), 8 * 24);
    let records = h.mixer.mix_tick(h.forecast.get_record(tick).await.unwrap().unwrap()).await.unwrap();
    assert_eq!(records.len(), 24);
    assert!(records.iter().all(|r| r.get(Metric::Wind) == Some(4.5)));
    h.executor.shutdown().await;
}
