//! libSQL document store.
//!
//! [`Storage`] persists knowledge documents with their embeddings and serves
//! as a brute-force [`NearestNeighborIndex`]: `search` scans every row and
//! scores it with cosine similarity. That is adequate for knowledge bases of a
//! few thousand documents; larger corpora want a real vector index.
//!
//! **Access rules:**
//! - CLI `load`/`forget`: read-write via [`Storage::open`]
//! - CLI `ask`/`related`: either mode; [`Storage::open_readonly`] rejects writes

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use kbchat_shared::{
    Document, KbChatError, Metadata, NearestNeighborIndex, Result, RetrievalCandidate,
    cosine_similarity,
};
use libsql::{Connection, Database, params};
use tracing::{debug, instrument};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> KbChatError {
    KbChatError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbChatError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbChatError::Storage(format!(
                "database not found at {}; run `kbchat load` first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    KbChatError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(KbChatError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert or replace documents in one transaction.
    ///
    /// A replaced document keeps its original position and `created_at`.
    #[instrument(skip_all, fields(count = documents.len()))]
    pub async fn upsert_documents(&self, documents: &[Document]) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for doc in documents {
            let metadata_json = serde_json::to_string(&doc.metadata).map_err(storage_err)?;
            tx.execute(
                "INSERT INTO documents (id, text, embedding, dimensions, metadata_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   text = excluded.text,
                   embedding = excluded.embedding,
                   dimensions = excluded.dimensions,
                   metadata_json = excluded.metadata_json,
                   updated_at = excluded.updated_at",
                params![
                    doc.id.as_str(),
                    doc.text.as_str(),
                    encode_embedding(&doc.embedding),
                    doc.embedding.len() as i64,
                    metadata_json,
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        debug!("documents upserted");
        Ok(())
    }

    /// Delete documents by id. Returns how many rows were removed.
    pub async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        self.check_writable()?;
        let mut removed = 0u64;
        for id in ids {
            removed += self
                .conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])
                .await
                .map_err(storage_err)?;
        }
        Ok(removed as usize)
    }

    /// Get one document by id.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, text, embedding, metadata_json FROM documents WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// All documents in insertion order.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, text, embedding, metadata_json FROM documents ORDER BY rowid",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }

    /// Number of stored documents.
    pub async fn count_documents(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map(|n| n.max(0) as u64).map_err(storage_err),
            None => Ok(0),
        }
    }

    /// Document counts per `category` metadata value, most populous first.
    pub async fn category_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(json_extract(metadata_json, '$.category'), 'Unknown') AS category,
                        COUNT(*) AS n
                 FROM documents
                 GROUP BY category
                 ORDER BY n DESC, category",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<i64>(1).map_err(storage_err)?.max(0) as u64,
            ));
        }
        Ok(results)
    }

    /// Top `limit` documents by cosine similarity to `vector`.
    ///
    /// Ties keep insertion order.
    #[instrument(skip_all, fields(limit))]
    pub async fn search_similar(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let mut scored: Vec<RetrievalCandidate> = self
            .list_documents()
            .await?
            .into_iter()
            .map(|doc| RetrievalCandidate {
                score: cosine_similarity(vector, &doc.embedding),
                document_id: doc.id,
                text: doc.text,
                metadata: doc.metadata,
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        debug!(hits = scored.len(), "similarity scan complete");
        Ok(scored)
    }
}

#[async_trait]
impl NearestNeighborIndex for Storage {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalCandidate>> {
        self.search_similar(vector, limit).await
    }

    async fn upsert(&self, documents: &[Document]) -> Result<()> {
        self.upsert_documents(documents).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.delete_documents(ids).await
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        self.list_documents().await
    }
}

/// Serialize an embedding as little-endian `f32` bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(KbChatError::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Convert a `(id, text, embedding, metadata_json)` row to a [`Document`].
fn row_to_document(row: &libsql::Row) -> Result<Document> {
    let blob: Vec<u8> = row.get(2).map_err(storage_err)?;
    let metadata_json: String = row.get(3).map_err(storage_err)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| KbChatError::Storage(format!("invalid metadata JSON: {e}")))?;

    Ok(Document {
        id: row.get::<String>(0).map_err(storage_err)?,
        text: row.get::<String>(1).map_err(storage_err)?,
        embedding: decode_embedding(&blob)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("kbchat_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn doc(id: &str, embedding: Vec<f32>, category: &str) -> Document {
        Document {
            id: id.into(),
            text: format!("body of {id}"),
            embedding,
            metadata: Metadata::new()
                .with("topic", id)
                .with("category", category)
                .with("source", "knowledge_base"),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("kbchat_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn document_roundtrip_preserves_embedding_and_metadata() {
        let storage = test_storage().await;
        let original = doc("kb-1", vec![0.25, -1.5, 3.0], "Technology");
        storage.upsert_documents(&[original.clone()]).await.unwrap();

        let loaded = storage.get_document("kb-1").await.unwrap().expect("stored");
        assert_eq!(loaded, original);
        assert!(storage.get_document("kb-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let storage = test_storage().await;
        storage
            .upsert_documents(&[doc("a", vec![1.0, 0.0], "AI"), doc("b", vec![0.0, 1.0], "AI")])
            .await
            .unwrap();

        let mut replaced = doc("a", vec![0.0, 1.0], "Science");
        replaced.text = "new body".into();
        storage.upsert_documents(&[replaced]).await.unwrap();

        let all = storage.list_documents().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(all[0].text, "new body");
        assert_eq!(storage.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_with_stable_ties() {
        let storage = test_storage().await;
        storage
            .upsert_documents(&[
                doc("far", vec![0.0, 1.0], "AI"),
                doc("tie1", vec![1.0, 1.0], "AI"),
                doc("exact", vec![1.0, 0.0], "AI"),
                doc("tie2", vec![1.0, 1.0], "AI"),
            ])
            .await
            .unwrap();

        let hits = storage.search(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "tie1", "tie2"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].metadata.category(), Some("AI"));
    }

    #[tokio::test]
    async fn empty_store_search_is_empty() {
        let storage = test_storage().await;
        assert!(storage.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_removed_count() {
        let storage = test_storage().await;
        storage
            .upsert_documents(&[doc("a", vec![1.0], "AI"), doc("b", vec![1.0], "AI")])
            .await
            .unwrap();

        let removed = storage
            .delete(&["a".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn category_counts_group_metadata() {
        let storage = test_storage().await;
        storage
            .upsert_documents(&[
                doc("a", vec![1.0], "Technology"),
                doc("b", vec![1.0], "Science"),
                doc("c", vec![1.0], "Technology"),
            ])
            .await
            .unwrap();

        let counts = storage.category_counts().await.unwrap();
        assert_eq!(
            counts,
            vec![("Technology".to_string(), 2), ("Science".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("kbchat_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_documents(&[doc("a", vec![1.0], "AI")]).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.count_documents().await.unwrap(), 1);
        let result = ro.upsert_documents(&[doc("b", vec![1.0], "AI")]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("kbchat_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }

    #[test]
    fn embedding_blob_is_little_endian_f32() {
        let bytes = encode_embedding(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&bytes).unwrap(), vec![1.0, -2.5]);
        assert!(decode_embedding(&bytes[..5]).is_err());
    }
}
