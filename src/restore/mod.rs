// SPDX-License-Identifier: AGPL-3.0-or-later

//! Replacement of live state with a chosen archive's contents.
mod engine;
mod errors;

pub use engine::{RestoreEngine, RestoreOptions, RestoreOutcome, StepResult, Validation};
pub use errors::RestoreError;
