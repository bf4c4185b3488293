//! End-to-end tests for the B+ tree index: build from a relation, range
//! scans with every bound combination, node splits up to root growth,
//! reopen verification, and scan state-machine errors.
//!
//! Split and root-growth boundaries run against an index created with
//! small node capacities (4 keys per node) so a handful of inserts
//! exercises the same machinery a million-key index would.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use tern_common::config::{IndexConfig, StorageConfig};
use tern_common::types::{AttrType, Operator, RecordId};
use tern_common::TernError;
use tern_storage::{BTreeIndex, BufferManager, KeyValue, RelationFile};

/// Records are 16 bytes; the integer key lives at offset 4, the double key
/// at offset 8.
const RECORD_SIZE: usize = 16;
const INT_OFFSET: u32 = 4;
const DOUBLE_OFFSET: u32 = 8;
const STRING_OFFSET: u32 = 2;

fn test_manager(frames: usize) -> Arc<BufferManager> {
    Arc::new(BufferManager::new(&StorageConfig {
        buffer_pool_frames: frames,
        fsync_enabled: false,
    }))
}

fn small_caps() -> IndexConfig {
    IndexConfig {
        leaf_capacity: Some(4),
        inner_capacity: Some(4),
        ..IndexConfig::default()
    }
}

fn small_caps_persistent() -> IndexConfig {
    IndexConfig {
        delete_on_teardown: false,
        ..small_caps()
    }
}

fn int_record(key: i32) -> Vec<u8> {
    let mut record = vec![0u8; RECORD_SIZE];
    record[4..8].copy_from_slice(&key.to_le_bytes());
    record
}

/// Builds an integer relation and returns, per key, the RIDs assigned in
/// append order.
fn int_relation(
    bufmgr: &Arc<BufferManager>,
    dir: &TempDir,
    name: &str,
    keys: &[i32],
) -> (RelationFile, BTreeMap<i32, Vec<RecordId>>) {
    let rel = RelationFile::create(bufmgr, dir.path().join(name), RECORD_SIZE).unwrap();
    let mut rids: BTreeMap<i32, Vec<RecordId>> = BTreeMap::new();
    for &key in keys {
        let rid = rel.append(&int_record(key)).unwrap();
        rids.entry(key).or_default().push(rid);
    }
    for per_key in rids.values_mut() {
        per_key.sort();
    }
    (rel, rids)
}

/// The RIDs a scan over `range` must yield: keys ascending, RIDs ascending
/// within equal keys.
fn expected_rids(
    rids: &BTreeMap<i32, Vec<RecordId>>,
    range: impl std::ops::RangeBounds<i32>,
) -> Vec<RecordId> {
    rids.range(range).flat_map(|(_, r)| r.iter().copied()).collect()
}

fn drain_scan(index: &mut BTreeIndex) -> Vec<RecordId> {
    let mut out = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => out.push(rid),
            Err(TernError::IndexScanCompleted) => return out,
            Err(e) => panic!("scan_next failed: {}", e),
        }
    }
}

#[test]
fn test_build_then_scan_closed_range() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r1.rel", &(1..=10).collect::<Vec<_>>());

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(3),
            Operator::GTE,
            &KeyValue::Int(7),
            Operator::LTE,
        )
        .unwrap();

    let expected = expected_rids(&rids, 3..=7);
    assert_eq!(expected.len(), 5);
    for rid in &expected {
        assert_eq!(index.scan_next().unwrap(), *rid);
    }
    assert!(matches!(
        index.scan_next(),
        Err(TernError::IndexScanCompleted)
    ));
    index.end_scan().unwrap();
}

#[test]
fn test_reverse_order_build_scans_ascending() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let keys: Vec<i32> = (1..=10).rev().collect();
    let (rel, rids) = int_relation(&bufmgr, &dir, "r2.rel", &keys);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(0),
            Operator::GT,
            &KeyValue::Int(11),
            Operator::LT,
        )
        .unwrap();

    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 1..=10));
}

#[test]
fn test_root_split_after_fifth_insert() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r3.rel", &[1, 2, 3, 4, 5]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    // The upgrade-in-place keeps the original root page.
    assert_eq!(index.root_page_no(), 2);

    index
        .start_scan(
            &KeyValue::Int(1),
            Operator::GTE,
            &KeyValue::Int(5),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 1..=5));
}

#[test]
fn test_cascade_to_new_root() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let keys: Vec<i32> = (1..=60).collect();
    let (rel, rids) = int_relation(&bufmgr, &dir, "r4.rel", &keys);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    // Sixty ascending keys at capacity 4 split the level-1 root, so the
    // root moved off its creation page.
    assert_ne!(index.root_page_no(), 2);

    index
        .start_scan(
            &KeyValue::Int(0),
            Operator::GT,
            &KeyValue::Int(61),
            Operator::LT,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, ..));
}

#[test]
fn test_open_lower_bound() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r5.rel", &[10, 20, 30, 40]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(20),
            Operator::GT,
            &KeyValue::Int(40),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 30..=40));
}

#[test]
fn test_bad_scan_range_rejected() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r6.rel", &[1, 2, 3]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    let result = index.start_scan(
        &KeyValue::Int(5),
        Operator::GTE,
        &KeyValue::Int(3),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::BadScanrange)));

    // Scan state is unchanged: scan_next still reports no scan.
    assert!(matches!(
        index.scan_next(),
        Err(TernError::ScanNotInitialized)
    ));
}

#[test]
fn test_bad_opcodes_rejected() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r7.rel", &[1, 2, 3]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    // Bounds with the operators pointing the wrong way.
    let result = index.start_scan(
        &KeyValue::Int(5),
        Operator::LT,
        &KeyValue::Int(10),
        Operator::GT,
    );
    assert!(matches!(result, Err(TernError::BadOpcodes)));

    let result = index.start_scan(
        &KeyValue::Int(5),
        Operator::EQ,
        &KeyValue::Int(10),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::BadOpcodes)));
}

#[test]
fn test_no_such_key_above_and_below_range() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r8.rel", &(1..=10).collect::<Vec<_>>());

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    // Lower bound above every key.
    let result = index.start_scan(
        &KeyValue::Int(100),
        Operator::GTE,
        &KeyValue::Int(200),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::NoSuchKeyFound)));

    // Upper bound below every key.
    let result = index.start_scan(
        &KeyValue::Int(-5),
        Operator::GTE,
        &KeyValue::Int(-1),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::NoSuchKeyFound)));
}

#[test]
fn test_scan_over_empty_relation() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r9.rel", &[]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    let result = index.start_scan(
        &KeyValue::Int(0),
        Operator::GTE,
        &KeyValue::Int(10),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::NoSuchKeyFound)));
}

#[test]
fn test_scan_state_machine_errors() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r10.rel", &[1, 2, 3]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    assert!(matches!(
        index.scan_next(),
        Err(TernError::ScanNotInitialized)
    ));
    assert!(matches!(
        index.end_scan(),
        Err(TernError::ScanNotInitialized)
    ));

    index
        .start_scan(
            &KeyValue::Int(1),
            Operator::GTE,
            &KeyValue::Int(3),
            Operator::LTE,
        )
        .unwrap();
    index.end_scan().unwrap();
    assert!(matches!(
        index.end_scan(),
        Err(TernError::ScanNotInitialized)
    ));
}

#[test]
fn test_restarting_scan_ends_previous() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r11.rel", &(1..=10).collect::<Vec<_>>());

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(1),
            Operator::GTE,
            &KeyValue::Int(10),
            Operator::LTE,
        )
        .unwrap();
    index.scan_next().unwrap();

    // A second start_scan implicitly ends the first.
    index
        .start_scan(
            &KeyValue::Int(5),
            Operator::GTE,
            &KeyValue::Int(10),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 5..=10));
}

#[test]
fn test_reopen_with_wrong_metadata() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r12.rel", &(1..=10).collect::<Vec<_>>());

    {
        let _index = BTreeIndex::open_with(
            &bufmgr,
            &rel,
            INT_OFFSET,
            AttrType::Integer,
            small_caps_persistent(),
        )
        .unwrap();
    }

    // Same relation and offset, different key variant.
    let result = BTreeIndex::open_with(
        &bufmgr,
        &rel,
        INT_OFFSET,
        AttrType::Double,
        small_caps_persistent(),
    );
    assert!(matches!(result, Err(TernError::BadIndexInfo(_))));

    // Same variant, different capacity override.
    let result = BTreeIndex::open_with(
        &bufmgr,
        &rel,
        INT_OFFSET,
        AttrType::Integer,
        IndexConfig {
            delete_on_teardown: false,
            leaf_capacity: Some(8),
            inner_capacity: Some(4),
        },
    );
    assert!(matches!(result, Err(TernError::BadIndexInfo(_))));
}

#[test]
fn test_reopen_round_trip() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let keys: Vec<i32> = (1..=50).collect();
    let (rel, rids) = int_relation(&bufmgr, &dir, "r13.rel", &keys);

    let (root_before, index_path) = {
        let index = BTreeIndex::open_with(
            &bufmgr,
            &rel,
            INT_OFFSET,
            AttrType::Integer,
            small_caps_persistent(),
        )
        .unwrap();
        (index.root_page_no(), index.index_path().to_path_buf())
    };
    assert!(index_path.exists());

    let mut index = BTreeIndex::open_with(
        &bufmgr,
        &rel,
        INT_OFFSET,
        AttrType::Integer,
        small_caps_persistent(),
    )
    .unwrap();

    assert_eq!(index.root_page_no(), root_before);

    index
        .start_scan(
            &KeyValue::Int(10),
            Operator::GTE,
            &KeyValue::Int(20),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 10..=20));
}

#[test]
fn test_index_file_deleted_on_teardown_by_default() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r14.rel", &[1, 2, 3]);

    let index_path = {
        let index =
            BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps())
                .unwrap();
        let path = index.index_path().to_path_buf();
        assert!(path.exists());
        path
    };
    assert!(!index_path.exists());
}

#[test]
fn test_duplicate_keys_yield_rids_ascending() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let keys = [7, 7, 3, 7, 3, 7, 9, 7, 7, 7, 3, 7];
    let (rel, rids) = int_relation(&bufmgr, &dir, "r15.rel", &keys);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(7),
            Operator::GTE,
            &KeyValue::Int(7),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), rids[&7]);
}

#[test]
fn test_random_order_build_scans_sorted() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(256);

    let mut keys: Vec<i32> = (1..=500).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB17E5);
    keys.shuffle(&mut rng);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r16.rel", &keys);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(0),
            Operator::GT,
            &KeyValue::Int(501),
            Operator::LT,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, ..));

    index
        .start_scan(
            &KeyValue::Int(123),
            Operator::GT,
            &KeyValue::Int(321),
            Operator::LT,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 124..=320));
}

#[test]
fn test_build_under_buffer_pool_pressure() {
    let dir = tempdir().unwrap();
    // A pool far smaller than the tree forces eviction and write-back
    // throughout the build.
    let bufmgr = test_manager(8);

    let keys: Vec<i32> = (1..=300).collect();
    let (rel, rids) = int_relation(&bufmgr, &dir, "r17.rel", &keys);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    index
        .start_scan(
            &KeyValue::Int(0),
            Operator::GT,
            &KeyValue::Int(301),
            Operator::LT,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, ..));
}

#[test]
fn test_default_capacity_index() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let keys: Vec<i32> = (1..=1000).collect();
    let (rel, rids) = int_relation(&bufmgr, &dir, "r18.rel", &keys);

    // Page-derived capacities: a thousand integer keys fit the very first
    // leaf, so this exercises the default on-disk geometry.
    let mut index = BTreeIndex::open(&bufmgr, &rel, INT_OFFSET, AttrType::Integer).unwrap();

    index
        .start_scan(
            &KeyValue::Int(250),
            Operator::GTE,
            &KeyValue::Int(750),
            Operator::LTE,
        )
        .unwrap();
    assert_eq!(drain_scan(&mut index), expected_rids(&rids, 250..=750));
}

#[test]
fn test_double_key_index() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let rel = RelationFile::create(&bufmgr, dir.path().join("d.rel"), RECORD_SIZE).unwrap();

    let mut rids = Vec::new();
    for i in (1..=20).rev() {
        let mut record = vec![0u8; RECORD_SIZE];
        let key = i as f64 * 0.5;
        record[8..16].copy_from_slice(&key.to_le_bytes());
        rids.push((key, rel.append(&record).unwrap()));
    }
    rids.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, DOUBLE_OFFSET, AttrType::Double, small_caps())
            .unwrap();

    index
        .start_scan(
            &KeyValue::Double(2.0),
            Operator::GTE,
            &KeyValue::Double(5.0),
            Operator::LT,
        )
        .unwrap();

    let expected: Vec<RecordId> = rids
        .iter()
        .filter(|(k, _)| *k >= 2.0 && *k < 5.0)
        .map(|(_, rid)| *rid)
        .collect();
    assert_eq!(drain_scan(&mut index), expected);
}

#[test]
fn test_string_key_index() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let rel = RelationFile::create(&bufmgr, dir.path().join("s.rel"), RECORD_SIZE).unwrap();

    let words = [
        "walnut", "apple", "mango", "banana", "quince", "cherry", "kiwi", "pear", "fig", "plum",
    ];
    let mut rids = Vec::new();
    for word in words {
        let mut record = vec![0u8; RECORD_SIZE];
        let key = tern_storage::FixedStr::from_str_padded(word);
        record[2..12].copy_from_slice(&key.0);
        rids.push((key, rel.append(&record).unwrap()));
    }
    rids.sort_by(|a, b| a.0.cmp(&b.0));

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, STRING_OFFSET, AttrType::String, small_caps())
            .unwrap();

    index
        .start_scan(
            &KeyValue::from("banana"),
            Operator::GTE,
            &KeyValue::from("pear"),
            Operator::LTE,
        )
        .unwrap();

    let low = tern_storage::FixedStr::from_str_padded("banana");
    let high = tern_storage::FixedStr::from_str_padded("pear");
    let expected: Vec<RecordId> = rids
        .iter()
        .filter(|(k, _)| *k >= low && *k <= high)
        .map(|(_, rid)| *rid)
        .collect();
    assert_eq!(expected.len(), 6); // banana cherry fig kiwi mango pear
    assert_eq!(drain_scan(&mut index), expected);
}

#[test]
fn test_key_type_mismatch_surfaces() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, _) = int_relation(&bufmgr, &dir, "r19.rel", &[1, 2, 3]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    let result = index.insert(&KeyValue::Double(1.0), RecordId::new(1, 0));
    assert!(matches!(result, Err(TernError::KeyTypeMismatch { .. })));

    let result = index.start_scan(
        &KeyValue::from("a"),
        Operator::GTE,
        &KeyValue::from("z"),
        Operator::LTE,
    );
    assert!(matches!(result, Err(TernError::KeyTypeMismatch { .. })));
}

#[test]
fn test_incremental_insert_after_build() {
    let dir = tempdir().unwrap();
    let bufmgr = test_manager(64);
    let (rel, rids) = int_relation(&bufmgr, &dir, "r20.rel", &[10, 30, 50]);

    let mut index =
        BTreeIndex::open_with(&bufmgr, &rel, INT_OFFSET, AttrType::Integer, small_caps()).unwrap();

    // New entries land between existing ones.
    let new_rid = RecordId::new(99, 0);
    index.insert(&KeyValue::Int(20), new_rid).unwrap();

    index
        .start_scan(
            &KeyValue::Int(10),
            Operator::GTE,
            &KeyValue::Int(30),
            Operator::LTE,
        )
        .unwrap();

    let mut expected = expected_rids(&rids, 10..=30);
    expected.insert(1, new_rid);
    assert_eq!(drain_scan(&mut index), expected);
}
