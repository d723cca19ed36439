//! End-to-end tests for the collection pipeline: sensors, write queue,
//! SQLite store and CSV rollover wired together the way the agent runs them.

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use crossbeam_channel::unbounded;
use sleep_monitor_agent::collector::{Collector, CollectorConfig, SensorCache, SensorReading};
use sleep_monitor_agent::core::{
    CollectionCycle, CycleConfig, Exporter, Record, RolloverReport, Status, WriteQueue, CSV_HEADER,
};
use sleep_monitor_agent::status::FileStatusStore;
use sleep_monitor_agent::storage::{FailureLog, SqliteStore, StoreOptions, TIMESTAMP_FORMAT};
use sleep_monitor_agent::transparency::create_shared_log;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn open_store(dir: &Path) -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::open(
            &dir.join("sleep_data.db"),
            FailureLog::new(dir.join("insertion_failures.txt")),
            StoreOptions::default(),
        )
        .expect("Failed to open store"),
    )
}

fn csv_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

fn record(brightness: f32) -> Record {
    Record {
        brightness,
        proximity: 5.0,
        acc_x: 0.0,
        acc_y: 0.0,
        acc_z: 9.81,
        gyro_x: 0.0,
        gyro_y: 0.0,
        gyro_z: 0.0,
        status: Status::Awake,
    }
}

#[test]
fn test_full_day_rolls_over_to_one_csv() {
    let dir = tempfile::tempdir().unwrap();
    let exports = dir.path().join("SleepData");
    let store = open_store(dir.path());

    let ticks = Arc::new(AtomicU64::new(0));
    let status = {
        let ticks = Arc::clone(&ticks);
        move || {
            if ticks.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Status::Awake
            } else {
                Status::Sleeping
            }
        }
    };

    let (sensors, rx) = unbounded();
    let log = create_shared_log();
    let mut cycle = CollectionCycle::new(
        SensorCache::new(rx),
        Box::new(status),
        Arc::clone(&store),
        Exporter::new(&exports, Tz::UTC),
        Arc::clone(&log),
        CycleConfig::default(),
    )
    .unwrap();

    let mut rollovers = Vec::new();
    for i in 0..1440 {
        sensors.send(SensorReading::light(i as f32)).unwrap();
        let report = cycle.tick();
        if let Some(rollover) = report.rollover {
            rollovers.push((i, rollover));
        }
    }

    assert_eq!(rollovers.len(), 1);
    let (at, rollover) = rollovers.remove(0);
    assert_eq!(at, 1439);
    let export = match rollover {
        RolloverReport::Completed(export) => export,
        other => panic!("unexpected rollover: {other:?}"),
    };
    assert_eq!(export.rows, 1440);
    assert_eq!(store.count().unwrap(), 0);

    let files = csv_files(&exports);
    assert_eq!(files, vec![export.path.clone()]);
    let name = export.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("sleep_data_") && name.ends_with(".csv"), "{name}");

    let content = std::fs::read_to_string(&export.path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1441);
    assert_eq!(lines[0], CSV_HEADER);

    let mut previous: Option<NaiveDateTime> = None;
    for (i, line) in lines[1..].iter().enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[0], (i + 1).to_string());
        assert_eq!(fields[2], i.to_string());
        let expected = if i % 2 == 0 { "awake" } else { "sleeping" };
        assert_eq!(fields[10], expected);

        let ts = NaiveDateTime::parse_from_str(fields[1], TIMESTAMP_FORMAT).unwrap();
        if let Some(prev) = previous {
            assert!(ts > prev, "timestamps must strictly increase: {prev} then {ts}");
        }
        previous = Some(ts);
    }

    assert!(store.failure_log().entries().unwrap().is_empty());

    let stats = log.stats();
    assert_eq!(stats.ticks, 1440);
    assert_eq!(stats.records_inserted, 1440);
    assert_eq!(stats.records_lost, 0);
    assert_eq!(stats.exports_completed, 1);
    assert_eq!(stats.rows_exported, 1440);

    // Collection carries on into the next day.
    let report = cycle.tick();
    assert_eq!(report.row_count, Some(1));
    assert_eq!(store.read_all().unwrap()[0].split(',').next(), Some("1"));
    cycle.shutdown();
}

#[test]
fn test_concurrent_producers_keep_their_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let queue = WriteQueue::new(Arc::clone(&store), create_shared_log()).unwrap();

    thread::scope(|scope| {
        for producer in 0..4u32 {
            let queue = &queue;
            scope.spawn(move || {
                for i in 0..50u32 {
                    queue.enqueue(record((producer * 1000 + i) as f32)).unwrap();
                }
            });
        }
    });
    queue.flush(Duration::from_secs(30)).unwrap();

    let rows = store.rows().unwrap();
    assert_eq!(rows.len(), 200);

    let mut last_seen = [None::<u32>; 4];
    for row in &rows {
        let value = row.record.brightness as u32;
        let (producer, i) = ((value / 1000) as usize, value % 1000);
        if let Some(prev) = last_seen[producer] {
            assert!(i > prev, "producer {producer} reordered: {prev} then {i}");
        }
        last_seen[producer] = Some(i);
    }
    assert!(last_seen.iter().all(|seen| *seen == Some(49)));

    for pair in rows.windows(2) {
        assert!(pair[1].id > pair[0].id);
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
    queue.shutdown();
}

#[test]
fn test_status_flag_is_read_every_tick() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let status_store = FileStatusStore::new(dir.path().join("status.json"));

    let (_sensors, rx) = unbounded();
    let mut cycle = CollectionCycle::new(
        SensorCache::new(rx),
        Box::new(status_store.clone()),
        Arc::clone(&store),
        Exporter::new(dir.path().join("exports"), Tz::UTC),
        create_shared_log(),
        CycleConfig::default(),
    )
    .unwrap();

    assert_eq!(cycle.tick().status, Status::Awake);
    status_store.set_status(Status::Sleeping).unwrap();
    assert_eq!(cycle.tick().status, Status::Sleeping);
    status_store.set_status(Status::Awake).unwrap();
    assert_eq!(cycle.tick().status, Status::Awake);

    let statuses: Vec<Status> = store
        .rows()
        .unwrap()
        .into_iter()
        .map(|row| row.record.status)
        .collect();
    assert_eq!(statuses, vec![Status::Awake, Status::Sleeping, Status::Awake]);
    cycle.shutdown();
}

#[test]
fn test_unavailable_channels_stay_at_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    let mut collector = Collector::new(CollectorConfig {
        capture_light: true,
        capture_proximity: false,
        capture_accelerometer: false,
        capture_gyroscope: false,
        sample_interval: Duration::from_millis(10),
    });
    collector.start().unwrap();

    let mut cycle = CollectionCycle::new(
        SensorCache::new(collector.receiver().clone()),
        Box::new(|| Status::Sleeping),
        Arc::clone(&store),
        Exporter::new(dir.path().join("exports"), Tz::UTC),
        create_shared_log(),
        CycleConfig::default(),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    let report = cycle.tick();
    collector.stop();

    assert!(report.record.brightness > 0.0);
    assert_eq!(report.record.proximity, 0.0);
    assert_eq!(
        [report.record.acc_x, report.record.acc_y, report.record.acc_z],
        [0.0; 3]
    );
    assert_eq!(
        [report.record.gyro_x, report.record.gyro_y, report.record.gyro_z],
        [0.0; 3]
    );
    assert_eq!(store.count().unwrap(), 1);
    cycle.shutdown();
}

#[test]
fn test_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(dir.path());
        let queue = WriteQueue::new(Arc::clone(&store), create_shared_log()).unwrap();
        for i in 0..3 {
            queue.enqueue(record(i as f32)).unwrap();
        }
        queue.shutdown();
    }

    let store = open_store(dir.path());
    assert_eq!(store.count().unwrap(), 3);
    store.insert(&record(3.0));
    let ids: Vec<i64> = store.rows().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}
