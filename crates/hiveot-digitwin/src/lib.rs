// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HiveOT Digital Twins
//!
//! State of every Thing known to the hub: the TD its agent published, the
//! derived digital-twin TD and the latest property, event and action values.
//!
//! # Features
//!
//! - **Bucket storage** -- SQLite or in-memory key-value buckets
//! - **Write-behind cache** -- authoritative in-memory cache with a dirty set
//! - **Monotonic values** -- values older than the cached one are dropped
//! - **Directory** -- `dtw:digitwin:ThingDirectory` read/update/remove actions
//!
//! # Architecture
//!
//! ```text
//! Directory
//! +-- DigitwinStore
//!     +-- cache    (dThingID -> DigitwinThing)
//!     +-- dirty    (dThingIDs changed since the last save)
//!     +-- dyn Bucket
//!         +-- SqliteBucket (buckets table)
//!         +-- MemoryBucket
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hiveot_digitwin::{DigitwinStore, SqliteBucket, DIGITWIN_BUCKET};
//!
//! let bucket = Arc::new(SqliteBucket::open("hiveot/digitwin.db", DIGITWIN_BUCKET)?);
//! let store = DigitwinStore::open(bucket)?;
//! store.update_td("agent1", td, &NoForms)?;
//! store.save_changes()?;
//! ```

pub mod bucket;
pub mod derive;
pub mod directory;
pub mod error;
pub mod store;

pub use bucket::{Bucket, MemoryBucket, SqliteBucket};
pub use derive::derive_digitwin_td;
pub use directory::{directory_td, Directory, DirectoryReply};
pub use error::{Result, StoreError};
pub use store::{DigitwinStore, DigitwinThing, DIGITWIN_BUCKET};
