//! SQL schema for the warehouse's bookkeeping tables.
//!
//! Dataset tables themselves are created on demand by
//! [`crate::SqliteStore`]; this DDL only covers the registry, coded-value
//! domains and the mail queue. Executed once at connection startup.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per dataset or view; the table itself is named by `table_name`.
CREATE TABLE IF NOT EXISTS datasets (
    path          TEXT PRIMARY KEY,
    table_name    TEXT NOT NULL UNIQUE,
    kind          TEXT NOT NULL DEFAULT 'table',   -- 'table' | 'view'
    schema_json   TEXT NOT NULL,                   -- JSON DatasetSchema
    metadata_xml  TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS domains (
    workspace     TEXT NOT NULL,
    domain_name   TEXT NOT NULL,
    code          TEXT NOT NULL,
    description   TEXT NOT NULL,
    PRIMARY KEY (workspace, domain_name, code)
);

-- Picked up and delivered by the database mail agent.
CREATE TABLE IF NOT EXISTS mail_queue (
    mail_id                TEXT PRIMARY KEY,
    subject                TEXT NOT NULL,
    recipients             TEXT NOT NULL,
    copy_recipients        TEXT,
    blind_copy_recipients  TEXT,
    reply_to               TEXT,
    body                   TEXT NOT NULL,
    body_format            TEXT NOT NULL,   -- 'text' | 'html'
    queued_at              TEXT NOT NULL
);

PRAGMA user_version = 1;
";
