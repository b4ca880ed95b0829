// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Filesystem layout — maps (channel, timestamp) to bucket paths and
//! enumerates buckets in a time range.
//!
//! A channel directory holds one subdirectory per slot group and one plain
//! file per bucket:
//!
//! ```text
//! {data_dir}/{channel}/{slot >> 12, 8 hex digits}/{slot & 0xfff, 3 hex digits}
//! ```
//!
//! where `slot = timestamp / BUCKET_SECONDS`. Fixed-width lowercase hex
//! makes lexicographic order equal numeric order. Names that do not parse
//! (notably the `.gz` artifacts left by the external rotation job) are
//! skipped; empty group directories are legal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Time window covered by one bucket, in seconds.
pub const BUCKET_SECONDS: u64 = 600;

const GROUP_NAME_LEN: usize = 8;
const BUCKET_NAME_LEN: usize = 3;

/// Timestamp carried in a record key's top 32 bits.
pub fn key_timestamp(key: u64) -> u64 {
    key >> 32
}

/// Bucket slot covering `ts`. Total and monotone in the timestamp.
pub fn bucket_slot(ts: u64) -> u64 {
    ts / BUCKET_SECONDS
}

/// First timestamp inside `slot`'s window.
pub fn slot_start(slot: u64) -> u64 {
    slot * BUCKET_SECONDS
}

/// True when `ts` falls inside `slot`'s window.
pub fn slot_covers(slot: u64, ts: u64) -> bool {
    bucket_slot(ts) == slot
}

/// Path of the bucket file for `slot` under `channel_dir`.
pub fn bucket_path(channel_dir: &Path, slot: u64) -> PathBuf {
    channel_dir
        .join(format!("{:08x}", slot >> 12))
        .join(format!("{:03x}", slot & 0xfff))
}

/// Lexicographically least bucket whose window intersects `[t_lo, t_hi]`,
/// or `None` when the channel has no bucket in range.
pub fn first_bucket_in_range(
    channel_dir: &Path,
    t_lo: u64,
    t_hi: u64,
) -> io::Result<Option<(PathBuf, u64)>> {
    least_bucket_between(channel_dir, bucket_slot(t_lo), bucket_slot(t_hi))
}

/// Next bucket after `current_slot` whose start is still within `t_hi`.
pub fn next_bucket(
    channel_dir: &Path,
    current_slot: u64,
    t_hi: u64,
) -> io::Result<Option<(PathBuf, u64)>> {
    let lo = match current_slot.checked_add(1) {
        Some(lo) => lo,
        None => return Ok(None),
    };
    least_bucket_between(channel_dir, lo, bucket_slot(t_hi))
}

/// Scan the channel directory for the least on-disk slot in
/// `[lo_slot, hi_slot]`. Fresh scan on every call; the directory may gain
/// and lose entries between calls.
fn least_bucket_between(
    channel_dir: &Path,
    lo_slot: u64,
    hi_slot: u64,
) -> io::Result<Option<(PathBuf, u64)>> {
    if lo_slot > hi_slot {
        return Ok(None);
    }

    let mut groups = match sorted_hex_entries(channel_dir, GROUP_NAME_LEN) {
        Ok(g) => g,
        // A channel that never saw a write has no directory yet.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    groups.retain(|&(group, _)| group >= lo_slot >> 12 && group <= hi_slot >> 12);

    for (group, group_path) in groups {
        let buckets = match sorted_hex_entries(&group_path, BUCKET_NAME_LEN) {
            Ok(b) => b,
            // The rotation job may remove a group under our feet.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for (low_bits, path) in buckets {
            let slot = group << 12 | low_bits;
            if slot >= lo_slot && slot <= hi_slot {
                return Ok(Some((path, slot)));
            }
        }
    }
    Ok(None)
}

/// Entries of `dir` whose names are exactly `width` hex digits, ascending.
fn sorted_hex_entries(dir: &Path, width: usize) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(value) = parse_hex_name(name, width) {
            entries.push((value, entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}

fn parse_hex_name(name: &str, width: usize) -> Option<u64> {
    if name.len() != width || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}
