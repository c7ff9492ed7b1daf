// SPDX-License-Identifier: AGPL-3.0-or-later

//! Helpers for tests: a disposable node context on a temporary directory
//! with a seeded application database, plus archive fixtures.
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::query;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::archive::ArchiveStore;
use crate::config::{Configuration, DATABASE_FILE_NAME};
use crate::context::Context;
use crate::db::{connection_pool, create_database, run_pending_migrations, Pool, SqlStore};
use crate::restore::RestoreEngine;
use crate::snapshot::SnapshotBuilder;

/// A fully wired context on top of a temporary directory. The directory is
/// removed when the value drops.
pub(crate) struct TestNode {
    pub context: Context,
    pub tmp: TempDir,
}

/// Configuration pointing every path below `root`.
pub(crate) fn test_configuration(root: &Path) -> Configuration {
    Configuration {
        database_url: format!("sqlite:{}", root.join(DATABASE_FILE_NAME).display()),
        database_max_connections: 5,
        backup_dir: root.join("backups"),
        uploads_dir: root.join("uploads"),
        ..Configuration::default()
    }
}

/// Creates the database (with migrations applied) and returns a pool onto
/// it.
pub(crate) async fn initialize_db(url: &str) -> Pool {
    create_database(url).await.unwrap();
    let pool = connection_pool(url, 5).await.unwrap();
    run_pending_migrations(&pool).await.unwrap();

    pool
}

/// Builds a test node with seeded business tables and one uploaded file.
pub(crate) async fn test_node() -> TestNode {
    let _ = env_logger::builder().is_test(true).try_init();

    let tmp = TempDir::new().unwrap();
    let config = test_configuration(tmp.path());

    let pool = initialize_db(&config.database_url).await;
    seed_business_tables(&pool).await;

    let store = SqlStore::new(pool);
    let archive = ArchiveStore::create(&config.backup_dir).unwrap();

    fs::create_dir_all(config.uploads_dir.join("contracts")).unwrap();
    fs::write(config.uploads_dir.join("contracts/c1.pdf"), b"pdf bytes").unwrap();

    TestNode {
        context: Context::new(config, store, archive),
        tmp,
    }
}

/// Snapshot builder bound to the node's context.
pub(crate) fn snapshot_builder(node: &TestNode) -> SnapshotBuilder {
    SnapshotBuilder::new(
        node.context.store.clone(),
        node.context.archive.clone(),
        node.context.config.uploads_dir.clone(),
    )
}

/// Restore engine bound to the node's context.
pub(crate) fn restore_engine(node: &TestNode) -> RestoreEngine {
    RestoreEngine::new(
        node.context.store.clone(),
        node.context.archive.clone(),
        &node.context.config,
    )
}

/// Settles any write-ahead log into the database file by cycling the pool,
/// so file bytes are stable for comparisons.
pub(crate) async fn checkpoint(node: &TestNode) {
    node.context.store.close().await;
    let pool = connection_pool(
        &node.context.config.database_url,
        node.context.config.database_max_connections,
    )
    .await
    .unwrap();
    node.context.store.replace_pool(pool).await;
}

/// The business tables the wider application owns, with a couple of rows.
async fn seed_business_tables(pool: &Pool) {
    query(
        "
        CREATE TABLE usuarios (id INTEGER PRIMARY KEY AUTOINCREMENT, nombre TEXT NOT NULL);
        CREATE TABLE clientes (id INTEGER PRIMARY KEY AUTOINCREMENT, nombre TEXT NOT NULL);
        CREATE TABLE contratos (id INTEGER PRIMARY KEY AUTOINCREMENT, numero TEXT NOT NULL);
        CREATE TABLE suplementos (id INTEGER PRIMARY KEY AUTOINCREMENT, contrato_id INTEGER);
        CREATE TABLE personas_responsables (id INTEGER PRIMARY KEY AUTOINCREMENT, nombre TEXT);
        CREATE TABLE documentos_contratos (id INTEGER PRIMARY KEY AUTOINCREMENT, contrato_id INTEGER);
        CREATE TABLE notificaciones (id INTEGER PRIMARY KEY AUTOINCREMENT, mensaje TEXT);

        INSERT INTO usuarios (nombre) VALUES ('admin'), ('auditor');
        INSERT INTO contratos (numero) VALUES ('C-0001'), ('C-0002'), ('C-0003');
        ",
    )
    .execute(pool)
    .await
    .unwrap();
}

/// Writes a zip container with the given entries and returns its path.
pub(crate) fn write_bare_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{}.zip", name));

    let file = File::create(&path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (entry_name, content) in entries.iter() {
        writer
            .start_file(*entry_name, FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();

    path
}

/// Writes a well-formed archive fixture: fake database bytes, one uploaded
/// file and a parseable metadata descriptor.
pub(crate) fn write_archive_fixture(dir: &Path, name: &str) -> PathBuf {
    let metadata = serde_json::json!({
        "backup_type": "manual",
        "timestamp": "20230801_120000",
        "created_at": "2023-08-01T12:00:00",
        "reason": "fixture",
        "version": "0.5.0",
        "database_stats": { "usuarios": 2, "contratos": 3 },
    })
    .to_string();

    write_bare_zip(
        dir,
        name,
        &[
            ("pacta_local.db", b"fixture database bytes" as &[u8]),
            ("uploads/contracts/c1.pdf", b"pdf bytes"),
            ("backup_metadata.json", metadata.as_bytes()),
        ],
    )
}
