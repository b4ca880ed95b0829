// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Iterator integration tests: corruption tolerance, mixed buckets, range
//! and filter behavior, async streaming, resource pooling, redistribution.

use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::TempDir;
use tokio_stream::StreamExt;

use dls::config::Config;
use dls::error::{DlsError, Result};
use dls::node::{DlsNode, Record};
use dls::redistribute::PeerSink;
use dls::storage::layout;
use dls::storage::iterator::Step;

const TS_V1: u64 = 0x5727_545c; // slot 0x252f80
const TS_LEGACY: u64 = 0x5727_5806; // slot 0x252f81

fn tmp_dir() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn config_with(dir: &Path, storage: &str) -> Config {
    let text = format!(
        "[node]\ndata_dir = '{}'\n\n[storage]\n{}",
        dir.join("data").display(),
        storage
    );
    let cfg: Config = toml::from_str(&text).expect("test config");
    cfg.validate().expect("valid test config");
    cfg
}

fn node_config(dir: &Path) -> Config {
    config_with(dir, "")
}

fn key(ts: u64, seq: u32) -> u64 {
    ts << 32 | seq as u64
}

fn legacy_record(buf: &mut Vec<u8>, key: u64, value: &[u8]) {
    buf.write_u64::<LittleEndian>(key).expect("vec write");
    buf.write_u64::<LittleEndian>(value.len() as u64).expect("vec write");
    buf.extend_from_slice(value);
}

fn v1_record(buf: &mut Vec<u8>, key: u64, value: &[u8]) {
    let len = value.len() as u64;
    buf.write_u64::<LittleEndian>(key).expect("vec write");
    buf.write_u64::<LittleEndian>(len).expect("vec write");
    buf.write_u64::<LittleEndian>(key ^ len).expect("vec write");
    buf.extend_from_slice(value);
}

fn seed_bucket(data_dir: &Path, channel: &str, slot: u64, bytes: &[u8]) -> PathBuf {
    let path = layout::bucket_path(&data_dir.join(channel), slot);
    std::fs::create_dir_all(path.parent().expect("bucket parent")).expect("create group dir");
    std::fs::write(&path, bytes).expect("seed bucket");
    path
}

fn collect_all(node: &DlsNode, channel: &str) -> Vec<Record> {
    node.get_all(channel)
        .expect("open iterator")
        .expect("channel exists")
        .collect_blocking()
        .expect("iterate channel")
}

/// The eight v1 records of the parity scenarios, with header offsets.
fn parity_bucket() -> (Vec<u8>, Vec<usize>, Vec<u64>) {
    let timestamps = vec![
        0x5727_545cu64, 0x5727_5461, 0x5727_5464, 0x5727_546a,
        0x5727_546d, 0x5727_5471, 0x5727_5474, 0x5727_5475,
    ];
    let mut buf = Vec::new();
    let mut offsets = Vec::new();
    for (i, ts) in timestamps.iter().enumerate() {
        offsets.push(buf.len());
        v1_record(&mut buf, key(*ts, i as u32), format!("value-{i}").as_bytes());
    }
    (buf, offsets, timestamps)
}

// ───────────────────────── corruption & tails ──────────────────────────────

#[test]
fn test_corrupt_fifth_header_yields_first_four() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let (mut buf, offsets, timestamps) = parity_bucket();
    // Break the parity word of the fifth record's header.
    buf[offsets[4] + 16] ^= 0xff;
    seed_bucket(&cfg.node.data_dir, "parity-broken", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "parity-broken");
    assert_eq!(records.len(), 4, "iteration stops at the corrupt header");
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.key, key(timestamps[i], i as u32));
    }
}

#[test]
fn test_truncated_tail_records() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    // One whole record, then a header whose value never made it to disk.
    let mut buf = Vec::new();
    v1_record(&mut buf, key(TS_V1, 1), b"whole");
    let before_partial = buf.len();
    v1_record(&mut buf, key(TS_V1 + 1, 2), &vec![0xEE; 100]);
    buf.truncate(before_partial + 24 + 10);
    seed_bucket(&cfg.node.data_dir, "tail", layout::bucket_slot(TS_V1), &buf);

    // A second bucket proves iteration continues past the tail.
    let mut next = Vec::new();
    v1_record(&mut next, key(TS_V1 + 600, 3), b"later");
    seed_bucket(&cfg.node.data_dir, "tail", layout::bucket_slot(TS_V1) + 1, &next);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "tail");
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0].value[..], b"whole");
    assert_eq!(&records[1].value[..], b"later");
}

#[test]
fn test_partial_header_at_eof() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let mut buf = Vec::new();
    v1_record(&mut buf, key(TS_V1, 1), b"only");
    buf.extend_from_slice(&[0x01; 10]); // ten stray bytes, not even a header
    seed_bucket(&cfg.node.data_dir, "stray", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "stray");
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].value[..], b"only");
}

// ───────────────────────── bucket mixing ───────────────────────────────────

#[test]
fn test_mixed_framing_buckets() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let mut legacy = Vec::new();
    for i in 0..4u32 {
        legacy_record(&mut legacy, key(TS_V1 + i as u64, i), format!("old-{i}").as_bytes());
    }
    seed_bucket(&cfg.node.data_dir, "mixed", layout::bucket_slot(TS_V1), &legacy);

    let mut v1 = Vec::new();
    for i in 0..8u32 {
        v1_record(&mut v1, key(TS_LEGACY + i as u64, 100 + i), format!("new-{i}").as_bytes());
    }
    seed_bucket(&cfg.node.data_dir, "mixed", layout::bucket_slot(TS_LEGACY), &v1);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "mixed");
    assert_eq!(records.len(), 12, "both framings contribute");

    // Bucket order: the legacy window precedes the v1 window.
    for (i, record) in records.iter().enumerate() {
        let ts = record.key >> 32;
        if i < 4 {
            assert!(layout::bucket_slot(ts) == layout::bucket_slot(TS_V1));
        } else {
            assert!(layout::bucket_slot(ts) == layout::bucket_slot(TS_LEGACY));
        }
    }
}

#[test]
fn test_empty_buckets_interleaved() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    // Seven bucket files; the ones at offsets 0, 2 and 4 are zero bytes,
    // the other four hold two records each.
    let base = layout::bucket_slot(TS_V1);
    let mut expected = 0u32;
    for i in 0..7u64 {
        let slot = base + i;
        if matches!(i, 0 | 2 | 4) {
            seed_bucket(&cfg.node.data_dir, "empty-bucket", slot, b"");
        } else {
            let mut buf = Vec::new();
            for j in 0..2u32 {
                let ts = layout::slot_start(slot) + j as u64;
                v1_record(&mut buf, key(ts, expected), format!("r{expected}").as_bytes());
                expected += 1;
            }
            seed_bucket(&cfg.node.data_dir, "empty-bucket", slot, &buf);
        }
    }
    assert_eq!(expected, 8);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "empty-bucket");
    assert_eq!(records.len(), 8, "zero-byte buckets are skipped without error");
}

#[test]
fn test_gz_artifacts_not_read() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let mut buf = Vec::new();
    v1_record(&mut buf, key(TS_V1, 1), b"live");
    let path = seed_bucket(&cfg.node.data_dir, "rotated", layout::bucket_slot(TS_V1), &buf);
    std::fs::write(path.with_file_name("f7f.gz"), b"\x1f\x8bgarbage").expect("gz seed");

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "rotated");
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].value[..], b"live");
}

#[test]
fn test_out_of_window_key_skipped() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let slot = layout::bucket_slot(TS_V1);
    let mut buf = Vec::new();
    v1_record(&mut buf, key(TS_V1, 1), b"in-window");
    // A record whose timestamp belongs to the next window, misfiled here.
    v1_record(&mut buf, key(layout::slot_start(slot) + 700, 2), b"misfiled");
    v1_record(&mut buf, key(TS_V1 + 2, 3), b"also-in-window");
    seed_bucket(&cfg.node.data_dir, "misfiled", slot, &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "misfiled");
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0].value[..], b"in-window");
    assert_eq!(&records[1].value[..], b"also-in-window");
}

// ───────────────────────── ranges & filters ────────────────────────────────

#[test]
fn test_range_bounds_inclusive() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());
    let node = DlsNode::open(&cfg).expect("open node");

    let base = layout::slot_start(layout::bucket_slot(TS_V1));
    for i in 0..4u64 {
        node.put("ranged", key(base + i * 600, i as u32), format!("r{i}").as_bytes())
            .expect("put");
    }

    let records = node
        .get_range("ranged", base + 600, base + 1200)
        .expect("open iterator")
        .expect("channel exists")
        .collect_blocking()
        .expect("iterate");
    assert_eq!(records.len(), 2, "both bounds inclusive");
    for record in &records {
        let ts = record.key >> 32;
        assert!(ts >= base + 600 && ts <= base + 1200);
    }

    let err = node.get_range("ranged", 10, 5).expect_err("inverted range");
    assert!(matches!(err, DlsError::BadRequest(_)));
}

#[test]
fn test_range_filter_regex() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());
    let node = DlsNode::open(&cfg).expect("open node");

    for (i, value) in ["alpha-1", "beta-2", "alpha-3"].iter().enumerate() {
        node.put("filtered", key(TS_V1 + i as u64, i as u32), value.as_bytes())
            .expect("put");
    }

    let records = node
        .get_range_filter("filtered", 0, u32::MAX as u64, "^alpha")
        .expect("open iterator")
        .expect("channel exists")
        .collect_blocking()
        .expect("iterate");
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(record.value.starts_with(b"alpha"));
    }

    let err = node
        .get_range_filter("filtered", 0, u32::MAX as u64, "(unclosed")
        .expect_err("invalid pattern");
    assert!(matches!(err, DlsError::BadRequest(_)));
}

// ───────────────────────── consistency & pooling ───────────────────────────

#[test]
fn test_read_own_writes() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());
    let node = DlsNode::open(&cfg).expect("open node");

    for i in 0..3u32 {
        node.put("fresh", key(TS_V1, i), format!("w{i}").as_bytes()).expect("put");
    }
    // No explicit flush: opening the iterator must observe the writes.
    let records = collect_all(&node, "fresh");
    assert_eq!(records.len(), 3);
}

#[test]
fn test_repeated_iteration_is_identical() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let (buf, _, _) = parity_bucket();
    seed_bucket(&cfg.node.data_dir, "stable", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let first = collect_all(&node, "stable");
    // The second pass reuses the released iterator from the pool.
    let second = collect_all(&node, "stable");
    assert_eq!(first.len(), 8);
    assert_eq!(first, second);
}

#[test]
fn test_unbuffered_reads() {
    let dir = tmp_dir();
    let cfg = config_with(dir.path(), "read_buffer_kb = 0\n");

    let (buf, _, _) = parity_bucket();
    seed_bucket(&cfg.node.data_dir, "unbuffered", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let records = collect_all(&node, "unbuffered");
    assert_eq!(records.len(), 8);
}

#[test]
fn test_iterator_bound_and_release() {
    let dir = tmp_dir();
    let cfg = config_with(dir.path(), "max_iterators = 1\n");
    let node = DlsNode::open(&cfg).expect("open node");
    node.put("bounded", key(TS_V1, 1), b"x").expect("put");

    let held = node.get_all("bounded").expect("open").expect("exists");
    let err = node.get_all("bounded").expect_err("pool bound reached");
    assert!(matches!(err, DlsError::ResourceExhausted(_)));

    drop(held);
    let mut retry = node.get_all("bounded").expect("open").expect("exists");
    assert_eq!(retry.collect_blocking().expect("iterate").len(), 1);
}

#[test]
fn test_dropping_waiting_iterator_is_inert() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let (buf, _, _) = parity_bucket();
    seed_bucket(&cfg.node.data_dir, "dropped", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let mut iter = node.get_all("dropped").expect("open").expect("exists");
    // The first step submits the probe read and reports Wait.
    match iter.next_step().expect("step") {
        Step::Wait => {}
        other => panic!("expected Wait, got {other:?}"),
    }
    // Drop with the read still in flight; the background completion has
    // nowhere to go and must be discarded silently.
    drop(iter);

    let records = collect_all(&node, "dropped");
    assert_eq!(records.len(), 8);
}

// ───────────────────────── async stream ────────────────────────────────────

#[tokio::test]
async fn test_async_stream_yields_all() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());

    let (buf, _, timestamps) = parity_bucket();
    seed_bucket(&cfg.node.data_dir, "streamed", layout::bucket_slot(TS_V1), &buf);

    let node = DlsNode::open(&cfg).expect("open node");
    let iter = node.get_all("streamed").expect("open").expect("exists");

    let stream = iter.into_stream();
    tokio::pin!(stream);
    let mut records = Vec::new();
    while let Some(record) = stream.next().await {
        records.push(record.expect("stream item"));
    }
    assert_eq!(records.len(), 8);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.key, key(timestamps[i], i as u32));
    }
}

// ───────────────────────── redistribution ──────────────────────────────────

#[derive(Default)]
struct VecSink {
    records: Vec<(String, u64, Vec<u8>)>,
}

impl PeerSink for VecSink {
    fn send(&mut self, channel: &str, key: u64, value: &[u8]) -> Result<()> {
        self.records.push((channel.to_string(), key, value.to_vec()));
        Ok(())
    }
}

#[test]
fn test_redistribute_full_fraction_hands_off_everything() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());
    let node = DlsNode::open(&cfg).expect("open node");

    for i in 0..6u32 {
        node.put("chan-a", key(TS_V1 + i as u64, i), format!("a{i}").as_bytes()).expect("put");
    }
    for i in 0..4u32 {
        node.put("chan-b", key(TS_LEGACY + i as u64, i), format!("b{i}").as_bytes()).expect("put");
    }

    let mut peer_a = VecSink::default();
    let mut peer_b = VecSink::default();
    let mut peers: [&mut dyn PeerSink; 2] = [&mut peer_a, &mut peer_b];
    let stats = node.redistribute(&mut peers, 1.0).expect("redistribute");

    assert_eq!(stats.channels, 2);
    assert_eq!(stats.records, 10, "fraction 1.0 selects every record");
    assert_eq!(peer_a.records.len() + peer_b.records.len(), 10);
}

#[test]
fn test_redistribute_is_deterministic() {
    let dir = tmp_dir();
    let cfg = node_config(dir.path());
    let node = DlsNode::open(&cfg).expect("open node");

    for i in 0..32u32 {
        node.put("chan", key(TS_V1 + (i % 5) as u64, i), format!("v{i}").as_bytes())
            .expect("put");
    }

    let run = |node: &DlsNode| -> Vec<u64> {
        let mut sink = VecSink::default();
        let mut peers: [&mut dyn PeerSink; 1] = [&mut sink];
        node.redistribute(&mut peers, 0.5).expect("redistribute");
        sink.records.iter().map(|(_, k, _)| *k).collect()
    };
    let first = run(&node);
    let second = run(&node);
    assert_eq!(first, second, "same keys selected on every pass");
    assert!(!first.is_empty() && first.len() < 32);
}

#[test]
fn test_redistribute_validates_arguments() {
    let dir = tmp_dir();
    let node = DlsNode::open(&node_config(dir.path())).expect("open node");

    let mut sink = VecSink::default();
    for fraction in [0.0, -0.5, 1.5] {
        let mut peers: [&mut dyn PeerSink; 1] = [&mut sink];
        let err = node.redistribute(&mut peers, fraction).expect_err("bad fraction");
        assert!(matches!(err, DlsError::BadRequest(_)));
    }

    let mut none: [&mut dyn PeerSink; 0] = [];
    let err = node.redistribute(&mut none, 0.5).expect_err("no peers");
    assert!(matches!(err, DlsError::BadRequest(_)));
}
