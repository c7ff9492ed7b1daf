// SPDX-License-Identifier: AGPL-3.0-or-later

//! Production of point-in-time snapshot archives.
mod builder;
mod errors;

pub use builder::{SnapshotBuilder, SnapshotInfo, SnapshotRequest, STAT_TABLES};
pub use errors::SnapshotError;
