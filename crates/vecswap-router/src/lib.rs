//! vecswap-router — decides which index version serves each query.
//!
//! The routing table is an immutable value behind an `ArcSwap`: the query
//! path loads it without locking, the swap controller replaces it whole.
//! A query key hashes to one of 100 buckets; buckets below the target's
//! percentage go to the target, the rest to the active version. Raising
//! the percentage therefore only ever moves keys onto the target.

pub mod router;

pub use router::{RouterError, RouterResult, RoutingTable, TrafficRouter, bucket_of};
