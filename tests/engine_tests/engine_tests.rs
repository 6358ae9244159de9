//! Tests for Engine
//!
//! These tests verify:
//! - Basic upsert/get/remove operations
//! - Flush to segments, automatic and explicit
//! - Merged reads across the MemTable and many segments
//! - Full compaction
//! - Reopen, crash leftovers, and corruption detection
//! - Concurrent access patterns

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::thread;

use lodekv::{Config, Engine, LodeError};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_temp_engine() -> (TempDir, Engine) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .flush_threshold(1024 * 1024) // 1 MB
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn open_at(temp_dir: &TempDir, flush_threshold: i64) -> Engine {
    init_tracing();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .flush_threshold(flush_threshold)
        .build();
    Engine::open(config).unwrap()
}

fn get(engine: &Engine, key: &[u8]) -> Option<Vec<u8>> {
    engine.get(key).unwrap().map(|v| v.to_vec())
}

fn collect_range(engine: &Engine, from: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    engine
        .range(from)
        .unwrap()
        .map(|item| {
            let (k, v) = item.unwrap();
            (k.to_vec(), v.to_vec())
        })
        .collect()
}

/// Segment files currently in the data directory
fn segment_files(temp_dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("sstable_") && name.ends_with(".dat"))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let config = Config::builder().data_dir(&data_dir).build();
    let engine = Engine::open(config).unwrap();

    assert!(data_dir.is_dir());
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(engine.next_generation(), 1);
}

#[test]
fn test_engine_upsert_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"hello", b"world").unwrap();

    assert_eq!(get(&engine, b"hello"), Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"a", b"1").unwrap();
    engine.upsert(b"c", b"3").unwrap();

    assert_eq!(get(&engine, b"b"), None);
    assert_eq!(get(&engine, b"d"), None);
}

#[test]
fn test_engine_last_write_wins_without_flush() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"key", b"value1").unwrap();
    engine.upsert(b"key", b"value2").unwrap();

    assert_eq!(get(&engine, b"key"), Some(b"value2".to_vec()));
    assert_eq!(engine.memtable_entry_count(), 1);
}

#[test]
fn test_engine_remove() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"key", b"value").unwrap();
    engine.remove(b"key").unwrap();

    assert_eq!(get(&engine, b"key"), None);
}

#[test]
fn test_engine_remove_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.remove(b"nonexistent").unwrap();
    assert_eq!(get(&engine, b"nonexistent"), None);
    assert!(collect_range(&engine, b"").is_empty());
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_engine_round_trip_through_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_at(&temp_dir, 1024 * 1024);
        engine.upsert(b"key", b"value").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.sstable_count(), 1);
        assert_eq!(engine.memtable_size(), 0);
    }

    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.next_generation(), 2);
    assert_eq!(get(&engine, b"key"), Some(b"value".to_vec()));
}

#[test]
fn test_engine_tombstone_shadows_across_flush() {
    let (temp_dir, engine) = setup_temp_engine();

    engine.upsert(b"key", b"v1").unwrap();
    engine.flush().unwrap();
    engine.remove(b"key").unwrap();
    assert_eq!(get(&engine, b"key"), None);

    engine.flush().unwrap();
    assert_eq!(engine.sstable_count(), 2);
    assert_eq!(get(&engine, b"key"), None);

    // Still shadowed after a restart
    drop(engine);
    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(get(&engine, b"key"), None);
}

#[test]
fn test_engine_auto_flush_on_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let threshold = 200;
    let engine = open_at(&temp_dir, threshold);

    // key (5) + value (20) + overhead (16) = 41 bytes per entry;
    // the fifth entry crosses 200
    for i in 0..4 {
        let key = format!("key{:02}", i);
        let value = format!("value_twenty_bytes{:02}", i);
        engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
        assert_eq!(engine.sstable_count(), 0);
    }
    assert!(engine.memtable_size() < threshold as usize);

    engine.upsert(b"key04", b"value_twenty_bytes04").unwrap();

    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(segment_files(&temp_dir), vec!["sstable_000001.dat"]);
    assert!(engine.memtable_size() < threshold as usize);
    assert_eq!(engine.memtable_entry_count(), 0);

    for i in 0..5 {
        let key = format!("key{:02}", i);
        assert_eq!(
            get(&engine, key.as_bytes()),
            Some(format!("value_twenty_bytes{:02}", i).into_bytes())
        );
    }
}

#[test]
fn test_engine_remove_counts_toward_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_at(&temp_dir, 64);

    for i in 0..10 {
        engine.remove(format!("gone{:02}", i).as_bytes()).unwrap();
    }

    assert!(engine.sstable_count() >= 1);
    assert!(collect_range(&engine, b"").is_empty());
}

#[test]
fn test_engine_zero_threshold_flushes_every_write() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_at(&temp_dir, 0);

    engine.upsert(b"a", b"1").unwrap();
    engine.upsert(b"b", b"2").unwrap();
    engine.remove(b"a").unwrap();

    assert_eq!(engine.sstable_count(), 3);
    assert_eq!(collect_range(&engine, b""), vec![(b"b".to_vec(), b"2".to_vec())]);
}

#[test]
fn test_engine_flush_empty_memtable() {
    let (temp_dir, engine) = setup_temp_engine();

    // Flushing empty memtable should be a no-op
    engine.flush().unwrap();

    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(engine.next_generation(), 1);
    assert!(segment_files(&temp_dir).is_empty());
}

// =============================================================================
// Merge / Range Tests
// =============================================================================

#[test]
fn test_engine_merge_under_scatter() {
    let (temp_dir, engine) = setup_temp_engine();
    let mut expected: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();

    // Five flush cycles, each touching an overlapping subset of keys
    for round in 0..5u32 {
        for k in 0..20u32 {
            if (k + round) % 3 == 0 {
                continue;
            }
            let key = format!("k{:02}", k).into_bytes();
            if (k * 7 + round) % 4 == 0 {
                engine.remove(&key).unwrap();
                expected.insert(key, None);
            } else {
                let value = format!("v{}_{}", k, round).into_bytes();
                engine.upsert(&key, &value).unwrap();
                expected.insert(key, Some(value));
            }
        }
        if round < 4 {
            engine.flush().unwrap();
        }
    }
    assert_eq!(engine.sstable_count(), 4);
    assert!(engine.memtable_entry_count() > 0);

    for (key, value) in &expected {
        assert_eq!(&get(&engine, key), value, "key {:?}", String::from_utf8_lossy(key));
    }

    let live: Vec<(Vec<u8>, Vec<u8>)> = expected
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
        .collect();
    assert_eq!(collect_range(&engine, b""), live);

    // Same answers from disk alone
    engine.close().unwrap();
    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(engine.sstable_count(), 5);
    assert_eq!(collect_range(&engine, b""), live);
}

#[test]
fn test_engine_get_across_disjoint_segments() {
    let (_temp, engine) = setup_temp_engine();

    for key in [&b"a"[..], &b"b"[..], &b"c"[..]] {
        engine.upsert(key, b"low").unwrap();
    }
    engine.flush().unwrap();
    for key in [&b"x"[..], &b"y"[..], &b"z"[..]] {
        engine.upsert(key, b"high").unwrap();
    }
    engine.flush().unwrap();
    // Spans both earlier segments' ranges
    engine.remove(b"b").unwrap();
    engine.upsert(b"y", b"newer").unwrap();
    engine.flush().unwrap();

    assert_eq!(get(&engine, b"a"), Some(b"low".to_vec()));
    assert_eq!(get(&engine, b"b"), None);
    assert_eq!(get(&engine, b"m"), None);
    assert_eq!(get(&engine, b"y"), Some(b"newer".to_vec()));
    assert_eq!(get(&engine, b"z"), Some(b"high".to_vec()));
    assert_eq!(get(&engine, b"zz"), None);
}

#[test]
fn test_engine_range_no_duplicates_across_sources() {
    let (_temp, engine) = setup_temp_engine();

    // "dup" lives in three segments and the memtable
    for round in 0..3 {
        engine.upsert(b"dup", format!("seg{}", round).as_bytes()).unwrap();
        engine.upsert(format!("a{}", round).as_bytes(), b"x").unwrap();
        engine.upsert(format!("z{}", round).as_bytes(), b"y").unwrap();
        engine.flush().unwrap();
    }
    engine.upsert(b"dup", b"mem").unwrap();

    let results = collect_range(&engine, b"");
    let keys: Vec<&[u8]> = results.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(
        keys,
        vec![&b"a0"[..], &b"a1"[..], &b"a2"[..], &b"dup"[..], &b"z0"[..], &b"z1"[..], &b"z2"[..]]
    );
    assert!(results.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(get(&engine, b"dup"), Some(b"mem".to_vec()));
}

#[test]
fn test_engine_range_from_key() {
    let (_temp, engine) = setup_temp_engine();

    for key in [&b"apple"[..], &b"banana"[..], &b"cherry"[..], &b"date"[..]] {
        engine.upsert(key, b"fruit").unwrap();
    }
    engine.flush().unwrap();
    engine.upsert(b"blueberry", b"fruit").unwrap();

    let keys: Vec<Vec<u8>> = collect_range(&engine, b"b").into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![b"banana".to_vec(), b"blueberry".to_vec(), b"cherry".to_vec(), b"date".to_vec()]
    );

    assert!(collect_range(&engine, b"zzz").is_empty());
    assert_eq!(collect_range(&engine, b"cherry")[0].0, b"cherry".to_vec());
}

#[test]
fn test_engine_range_is_stable_across_later_writes() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.upsert(b"b", b"2").unwrap();

    let range = engine.range(b"").unwrap();

    // The flush swaps in a new memtable; the range keeps the old one
    engine.flush().unwrap();
    engine.compact().unwrap();

    let results: Vec<(Vec<u8>, Vec<u8>)> = range
        .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).unwrap())
        .collect();
    assert_eq!(
        results,
        vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
    );
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_engine_compaction_transparency() {
    let (temp_dir, engine) = setup_temp_engine();

    for round in 0..4 {
        for k in 0..30 {
            let key = format!("key{:03}", k);
            if k % (round + 2) == 0 {
                engine.remove(key.as_bytes()).unwrap();
            } else {
                engine
                    .upsert(key.as_bytes(), format!("r{}", round).as_bytes())
                    .unwrap();
            }
        }
        engine.flush().unwrap();
    }
    engine.upsert(b"key007", b"pending").unwrap();
    assert_eq!(segment_files(&temp_dir).len(), 4);

    let sample_keys: Vec<String> = (0..32).map(|k| format!("key{:03}", k)).collect();
    let before: Vec<Option<Vec<u8>>> = sample_keys.iter().map(|k| get(&engine, k.as_bytes())).collect();
    let range_before = collect_range(&engine, b"");

    let report = engine.compact().unwrap().expect("compaction should run");

    assert_eq!(report.segments_merged, 4);
    assert_eq!(report.generation, 5);
    assert_eq!(report.records_written, range_before.len() as u64);
    assert!(report.cleanup_failures.is_empty());

    let after: Vec<Option<Vec<u8>>> = sample_keys.iter().map(|k| get(&engine, k.as_bytes())).collect();
    assert_eq!(before, after);
    assert_eq!(collect_range(&engine, b""), range_before);

    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(segment_files(&temp_dir), vec!["sstable_000005.dat"]);

    // And from disk
    drop(engine);
    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(collect_range(&engine, b""), range_before);
    assert_eq!(engine.next_generation(), 6);
}

#[test]
fn test_engine_compaction_drops_tombstones() {
    let (temp_dir, engine) = setup_temp_engine();

    engine.upsert(b"a", b"1").unwrap();
    engine.upsert(b"b", b"2").unwrap();
    engine.flush().unwrap();
    engine.remove(b"a").unwrap();
    engine.remove(b"b").unwrap();

    let report = engine.compact().unwrap().unwrap();

    assert_eq!(report.records_written, 0);
    assert_eq!(segment_files(&temp_dir).len(), 1);
    assert!(collect_range(&engine, b"").is_empty());

    // An empty segment reopens cleanly
    drop(engine);
    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(get(&engine, b"a"), None);
}

#[test]
fn test_engine_compaction_reports_cleanup_failure() {
    let (temp_dir, engine) = setup_temp_engine();

    engine.upsert(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.upsert(b"b", b"2").unwrap();
    engine.flush().unwrap();
    engine.upsert(b"c", b"3").unwrap();

    let gone = engine.segment_paths()[0].clone();
    fs::remove_file(&gone).unwrap();

    let report = engine.compact().unwrap().unwrap();

    assert_eq!(report.cleanup_failures.len(), 1);
    assert_eq!(report.cleanup_failures[0].0, gone);
    assert_eq!(report.records_written, 3);
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(get(&engine, b"a"), Some(b"1".to_vec()));
    assert_eq!(get(&engine, b"c"), Some(b"3".to_vec()));

    drop(engine);
    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(collect_range(&engine, b"").len(), 3);
}

#[test]
fn test_engine_compaction_on_empty_engine_is_noop() {
    let (temp_dir, engine) = setup_temp_engine();

    assert!(engine.compact().unwrap().is_none());
    assert!(segment_files(&temp_dir).is_empty());
    assert_eq!(engine.next_generation(), 1);
}

#[test]
fn test_engine_writes_after_compaction_win() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"key", b"old").unwrap();
    engine.flush().unwrap();
    engine.compact().unwrap();
    engine.upsert(b"key", b"new").unwrap();
    assert_eq!(get(&engine, b"key"), Some(b"new".to_vec()));

    engine.flush().unwrap();
    assert_eq!(get(&engine, b"key"), Some(b"new".to_vec()));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_engine_close_flushes_data() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_at(&temp_dir, 1024 * 1024);
        engine.upsert(b"key", b"value").unwrap();
        engine.close().unwrap();
    }

    let engine = open_at(&temp_dir, 1024 * 1024);
    assert_eq!(get(&engine, b"key"), Some(b"value".to_vec()));
    assert_eq!(engine.sstable_count(), 1);
}

#[test]
fn test_engine_close_with_empty_memtable_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();

    let engine = open_at(&temp_dir, 1024 * 1024);
    engine.close().unwrap();

    assert!(segment_files(&temp_dir).is_empty());
}

#[test]
fn test_engine_newer_writes_win_after_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_at(&temp_dir, 1024 * 1024);
        for i in 0..50 {
            engine.upsert(format!("k{}", i).as_bytes(), b"old").unwrap();
        }
        engine.close().unwrap();
    }

    // A fresh memtable must override segment data written before restart
    let engine = open_at(&temp_dir, 1024 * 1024);
    engine.upsert(b"k7", b"new").unwrap();
    engine.remove(b"k8").unwrap();

    assert_eq!(get(&engine, b"k7"), Some(b"new".to_vec()));
    assert_eq!(get(&engine, b"k8"), None);
    assert_eq!(get(&engine, b"k9"), Some(b"old".to_vec()));
}

#[test]
fn test_engine_ignores_interrupted_temp_file() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_at(&temp_dir, 1024 * 1024);
        engine.upsert(b"durable", b"yes").unwrap();
        engine.close().unwrap();
    }

    // A crash between write and rename leaves a temp file behind
    let temp_file = temp_dir.path().join("sstable_000002.tmp");
    fs::write(&temp_file, b"half-written segment").unwrap();

    let engine = open_at(&temp_dir, 1024 * 1024);

    assert!(!temp_file.exists());
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.next_generation(), 2);
    assert_eq!(
        collect_range(&engine, b""),
        vec![(b"durable".to_vec(), b"yes".to_vec())]
    );
}

#[test]
fn test_engine_ignores_unrelated_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();
    fs::write(temp_dir.path().join("sstable_abc.dat"), b"junk").unwrap();
    fs::create_dir(temp_dir.path().join("sstable_000009.dat")).unwrap();

    let engine = open_at(&temp_dir, 1024 * 1024);

    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(engine.next_generation(), 1);
}

#[test]
fn test_engine_open_fails_on_corrupt_segment() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = open_at(&temp_dir, 1024 * 1024);
        engine.upsert(b"key", b"value").unwrap();
        engine.close().unwrap();
    }

    let path = temp_dir.path().join("sstable_000001.dat");
    let mut bytes = fs::read(&path).unwrap();
    bytes[6] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let config = Config::builder().data_dir(temp_dir.path()).build();
    let result = Engine::open(config);
    assert!(matches!(result, Err(LodeError::Corruption { .. })));
}

#[test]
fn test_engine_open_fails_on_truncated_segment() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("sstable_000001.dat"), b"short").unwrap();

    let config = Config::builder().data_dir(temp_dir.path()).build();
    let result = Engine::open(config);
    assert!(matches!(result, Err(LodeError::Corruption { .. })));
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_engine_rejects_negative_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("never_created");

    let result = Engine::open_path(&data_dir, -1);

    assert!(matches!(result, Err(LodeError::Config(_))));
    assert!(!data_dir.exists());
}

#[test]
fn test_engine_accessors() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_at(&temp_dir, 4096);

    assert_eq!(engine.data_dir(), temp_dir.path());
    assert_eq!(engine.memtable_size(), 0);
    assert_eq!(engine.memtable_entry_count(), 0);
    assert_eq!(engine.config().flush_threshold, 4096);

    engine.upsert(b"abc", b"defg").unwrap();
    assert_eq!(engine.memtable_size(), 3 + 4 + lodekv::memtable::ENTRY_OVERHEAD);

    engine.flush().unwrap();
    assert_eq!(
        engine.segment_paths(),
        vec![temp_dir.path().join("sstable_000001.dat")]
    );
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_writes() {
    let temp_dir = TempDir::new().unwrap();
    // Small threshold so writers block on flushes
    let engine = Arc::new(open_at(&temp_dir, 2048));

    let mut handles = vec![];
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let key = format!("thread{}_key{:03}", t, i);
                let value = format!("thread{}_value{}", t, i);
                engine.upsert(key.as_bytes(), value.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(engine.sstable_count() > 1);
    for t in 0..4 {
        for i in 0..100 {
            let key = format!("thread{}_key{:03}", t, i);
            let expected = format!("thread{}_value{}", t, i);
            assert_eq!(get(&engine, key.as_bytes()), Some(expected.into_bytes()));
        }
    }
    assert_eq!(collect_range(&engine, b"").len(), 400);
}

#[test]
fn test_engine_readers_during_flush_and_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_at(&temp_dir, 1024));

    // Fixed keys readers must always see
    for i in 0..50 {
        engine
            .upsert(format!("fixed{:02}", i).as_bytes(), b"stable")
            .unwrap();
    }

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for round in 0..20 {
                for i in 0..20 {
                    engine
                        .upsert(format!("churn{:02}", i).as_bytes(), format!("{}", round).as_bytes())
                        .unwrap();
                }
                if round % 5 == 4 {
                    engine.compact().unwrap();
                }
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..3 {
        let engine = Arc::clone(&engine);
        readers.push(thread::spawn(move || {
            for _ in 0..30 {
                let results = collect_range(&engine, b"fixed");
                let fixed: Vec<_> = results
                    .iter()
                    .filter(|(k, _)| k.starts_with(b"fixed"))
                    .collect();
                assert_eq!(fixed.len(), 50);
                assert!(fixed.iter().all(|(_, v)| v == b"stable"));
                assert!(results.windows(2).all(|w| w[0].0 < w[1].0));
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for i in 0..20 {
        assert_eq!(
            get(&engine, format!("churn{:02}", i).as_bytes()),
            Some(b"19".to_vec())
        );
    }
}

#[test]
fn test_engine_readers_never_see_torn_state() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_at(&temp_dir, 1024 * 1024));

    // Round r: k = r, flush, delete k, marker = r, flush.
    // No state ever holds k = r together with marker >= r.
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for round in 1..=150u64 {
                engine.upsert(b"k", round.to_string().as_bytes()).unwrap();
                engine.flush().unwrap();
                engine.remove(b"k").unwrap();
                engine.upsert(b"marker", round.to_string().as_bytes()).unwrap();
                engine.flush().unwrap();
                if round % 25 == 0 {
                    engine.compact().unwrap();
                }
            }
        })
    };

    let parse = |v: &[u8]| std::str::from_utf8(v).unwrap().parse::<u64>().unwrap();

    let mut readers = vec![];
    for _ in 0..3 {
        let engine = Arc::clone(&engine);
        readers.push(thread::spawn(move || {
            for _ in 0..300 {
                let view: BTreeMap<Vec<u8>, Vec<u8>> = collect_range(&engine, b"").into_iter().collect();
                if let (Some(k), Some(marker)) = (view.get(&b"k"[..]), view.get(&b"marker"[..])) {
                    let (k, marker) = (parse(k), parse(marker));
                    assert!(marker < k, "k = {} visible alongside marker = {}", k, marker);
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(get(&engine, b"k"), None);
    assert_eq!(get(&engine, b"marker"), Some(b"150".to_vec()));
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn test_engine_empty_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"", b"empty_key_value").unwrap();
    engine.upsert(b"a", b"1").unwrap();
    assert_eq!(get(&engine, b""), Some(b"empty_key_value".to_vec()));

    engine.flush().unwrap();
    assert_eq!(get(&engine, b""), Some(b"empty_key_value".to_vec()));
}

#[test]
fn test_engine_empty_value_is_not_a_tombstone() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(b"key", b"").unwrap();
    assert_eq!(get(&engine, b"key"), Some(Vec::new()));

    engine.flush().unwrap();
    assert_eq!(get(&engine, b"key"), Some(Vec::new()));
}

#[test]
fn test_engine_large_value() {
    let (_temp, engine) = setup_temp_engine();

    let large_value = vec![0xAB; 100_000]; // 100 KB
    engine.upsert(b"large_key", &large_value).unwrap();
    engine.flush().unwrap();

    assert_eq!(get(&engine, b"large_key"), Some(large_value));
}

#[test]
fn test_engine_binary_keys_order_unsigned() {
    let (_temp, engine) = setup_temp_engine();

    engine.upsert(&[0xFF, 0x00], b"high").unwrap();
    engine.flush().unwrap();
    engine.upsert(&[0x00, 0xFF], b"low").unwrap();
    engine.upsert(&[0x7F], b"mid").unwrap();

    let keys: Vec<Vec<u8>> = collect_range(&engine, b"").into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![vec![0x00, 0xFF], vec![0x7F], vec![0xFF, 0x00]]);
}
