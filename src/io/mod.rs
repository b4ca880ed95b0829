// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Asynchronous disk I/O — worker pool, read futures, request wakers.

pub mod executor;
pub mod future;
pub mod waker;
