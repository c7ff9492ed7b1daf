// SPDX-License-Identifier: AGPL-3.0-or-later

use sqlx::FromRow;

/// Representation of a row from the `actividad_sistema` table as read back by
/// the backup core.
///
/// Only the columns this crate consumes are mapped; the wider application
/// owns the remaining ones.
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct ActivityRow {
    /// Instant the activity was recorded.
    pub fecha_actividad: String,

    /// Serialized JSON detail payload.
    pub detalles: Option<String>,
}
