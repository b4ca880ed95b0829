// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Storage subsystem — bucket layout + framing + engines + iterators.

pub mod bucket_file;
pub mod engine;
pub mod framing;
pub mod iterator;
pub mod layout;
pub mod pool;
pub mod registry;
