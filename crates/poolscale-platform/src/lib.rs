//! poolscale-platform — the orchestration platform as seen by the autoscaler.
//!
//! The [`Platform`] trait is the seam between the control loop and whatever
//! actually manages machines: pools, machine records, tags, catalogs,
//! provisioning schemes, identity pools and asynchronous VM tasks.
//!
//! [`LocalPlatform`] is an embedded implementation backed by
//! [redb](https://docs.rs/redb). It performs no real power operations; it
//! keeps the platform's bookkeeping in redb tables so the control loop can be
//! run, resumed and inspected locally. It supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Identity accounts use composite keys (`{identity_pool_id}/{name}`) so a
//! pool's accounts can be found by prefix scan.

pub mod error;
pub mod fixture;
pub mod platform;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{PlatformError, PlatformResult};
pub use fixture::PlatformFixture;
pub use platform::Platform;
pub use store::LocalPlatform;
pub use types::*;
