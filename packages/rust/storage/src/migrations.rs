//! SQL migration definitions for the kbchat document store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: documents with embeddings",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Knowledge documents. rowid order is insertion order; upserts keep it.
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    text          TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    dimensions    INTEGER NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index documents by source and category",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_documents_source
    ON documents(json_extract(metadata_json, '$.source'));
CREATE INDEX IF NOT EXISTS idx_documents_category
    ON documents(json_extract(metadata_json, '$.category'));

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
