// SPDX-License-Identifier: AGPL-3.0-or-later

/// `SqlStore` errors.
#[derive(thiserror::Error, Debug)]
pub enum SqlStoreError {
    /// Error returned from the database driver while running a query.
    #[error("Error occured during query: {0}")]
    TransactionFailed(String),
}
