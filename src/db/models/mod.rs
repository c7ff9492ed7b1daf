// SPDX-License-Identifier: AGPL-3.0-or-later

//! Row structs as stored in the database.
mod activity;
mod change;

pub use activity::ActivityRow;
pub use change::{ChangeGroupRow, DailyChangeRow};
