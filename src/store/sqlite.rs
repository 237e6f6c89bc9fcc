//! SQLite-backed [`IndexStore`].
//!
//! Schema:
//!
//! - `indices` holds one row per named index (dimension, model, creation time).
//! - `entries` holds chunk and document entries with their text and
//!   little-endian `f32` embedding blob, keyed by `(index_name, id)`.
//! - `entries_fts` is an FTS5 table over the entry's [`analyze`] terms joined
//!   by spaces, ranked with BM25. Pre-analyzed terms give CJK text bigram
//!   matching under the default `unicode61` tokenizer.
//!
//! Vector search is a brute-force cosine scan over the index's embeddings.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::{analyze, check_dimensions, query_terms, sort_candidates, Candidate, IndexStore};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{EntryUnit, IndexEntry, IndexInfo};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indices (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                model_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                index_name TEXT NOT NULL,
                id TEXT NOT NULL,
                unit TEXT NOT NULL,
                docs_root TEXT NOT NULL,
                doc_name TEXT NOT NULL,
                service TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (index_name, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 has no IF NOT EXISTS
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='entries_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE entries_fts USING fts5(
                    entry_id UNINDEXED,
                    index_name UNINDEXED,
                    unit UNINDEXED,
                    terms
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_document ON entries(index_name, docs_root, doc_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn require_index(&self, name: &str) -> Result<IndexInfo> {
        self.get_index(name)
            .await?
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    async fn write_document(
        &self,
        index: &str,
        docs_root: &str,
        doc_name: &str,
        entries: &[IndexEntry],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM entries_fts WHERE index_name = ? AND entry_id IN (
                SELECT id FROM entries WHERE index_name = ? AND docs_root = ? AND doc_name = ?
            )
            "#,
        )
        .bind(index)
        .bind(index)
        .bind(docs_root)
        .bind(doc_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entries WHERE index_name = ? AND docs_root = ? AND doc_name = ?")
            .bind(index)
            .bind(docs_root)
            .bind(doc_name)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO entries (index_name, id, unit, docs_root, doc_name, service,
                                     chunk_index, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(index)
            .bind(&entry.id)
            .bind(entry.unit.as_str())
            .bind(&entry.docs_root)
            .bind(&entry.doc_name)
            .bind(&entry.service)
            .bind(entry.chunk_index as i64)
            .bind(&entry.text)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO entries_fts (entry_id, index_name, unit, terms) VALUES (?, ?, ?, ?)")
                .bind(&entry.id)
                .bind(index)
                .bind(entry.unit.as_str())
                .bind(analyze(&entry.text).join(" "))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn index_from_row(row: &SqliteRow) -> anyhow::Result<IndexInfo> {
    let created_at: String = row.try_get("created_at")?;
    let dimension: i64 = row.try_get("dimension")?;
    Ok(IndexInfo {
        name: row.try_get("name")?,
        dimension: usize::try_from(dimension)?,
        model_id: row.try_get("model_id")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

fn candidate_from_row(row: &SqliteRow, raw_score: f64) -> anyhow::Result<Candidate> {
    let unit: String = row.try_get("unit")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    Ok(Candidate {
        entry_id: row.try_get("id")?,
        unit: unit.parse()?,
        docs_root: row.try_get("docs_root")?,
        doc_name: row.try_get("doc_name")?,
        service: row.try_get("service")?,
        chunk_index: usize::try_from(chunk_index)?,
        text: row.try_get("text")?,
        raw_score,
    })
}

/// FTS5 query matching any of the terms.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn create_index(&self, info: &IndexInfo) -> Result<IndexInfo> {
        sqlx::query(
            "INSERT OR IGNORE INTO indices (name, dimension, model_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&info.name)
        .bind(info.dimension as i64)
        .bind(&info.model_id)
        .bind(info.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        self.require_index(&info.name).await
    }

    async fn get_index(&self, name: &str) -> Result<Option<IndexInfo>> {
        let row = sqlx::query("SELECT name, dimension, model_id, created_at FROM indices WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        match row {
            Some(row) => Ok(Some(index_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        let deleted = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM entries_fts WHERE index_name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM entries WHERE index_name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM indices WHERE name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<bool, anyhow::Error>(result.rows_affected() > 0)
        }
        .await?;
        Ok(deleted)
    }

    async fn list_indices(&self) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query("SELECT name, dimension, model_id, created_at FROM indices ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        let mut indices = Vec::with_capacity(rows.len());
        for row in &rows {
            indices.push(index_from_row(row)?);
        }
        Ok(indices)
    }

    async fn replace_document(
        &self,
        index: &str,
        docs_root: &str,
        doc_name: &str,
        entries: &[IndexEntry],
    ) -> Result<()> {
        let info = self.require_index(index).await?;
        check_dimensions(info.dimension, entries)?;
        self.write_document(index, docs_root, doc_name, entries).await?;
        Ok(())
    }

    async fn count_entries(&self, index: &str, unit: Option<EntryUnit>) -> Result<usize> {
        self.require_index(index).await?;
        let count: i64 = match unit {
            Some(unit) => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries WHERE index_name = ? AND unit = ?")
                .bind(index)
                .bind(unit.as_str())
                .fetch_one(&self.pool)
                .await,
            None => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries WHERE index_name = ?")
                .bind(index)
                .fetch_one(&self.pool)
                .await,
        }
        .map_err(anyhow::Error::from)?;
        Ok(count.max(0) as usize)
    }

    async fn keyword_search(
        &self,
        index: &str,
        query: &str,
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        self.require_index(index).await?;
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT e.id, e.unit, e.docs_root, e.doc_name, e.service, e.chunk_index, e.text, f.rank
            FROM (
                SELECT entry_id, index_name, rank FROM entries_fts
                WHERE entries_fts MATCH ? AND index_name = ? AND unit = ?
                ORDER BY rank
                LIMIT ?
            ) f
            JOIN entries e ON e.index_name = f.index_name AND e.id = f.entry_id
            ORDER BY f.rank
            "#,
        )
        .bind(&fts)
        .bind(index)
        .bind(unit.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            // FTS5 rank is negated BM25: lower is better.
            let rank: f64 = row.try_get("rank").map_err(anyhow::Error::from)?;
            candidates.push(candidate_from_row(row, -rank)?);
        }
        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        self.require_index(index).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, unit, docs_root, doc_name, service, chunk_index, text, embedding
            FROM entries
            WHERE index_name = ? AND unit = ?
            "#,
        )
        .bind(index)
        .bind(unit.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(anyhow::Error::from)?;
            let stored = blob_to_vec(&blob);
            let score = cosine_similarity(vector, &stored) as f64;
            candidates.push(candidate_from_row(row, score)?);
        }

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("data/test.sqlite")).await.unwrap();
        (dir, store)
    }

    fn info(name: &str, dimension: usize) -> IndexInfo {
        IndexInfo {
            name: name.into(),
            dimension,
            model_id: Some("test-model".into()),
            created_at: Utc::now(),
        }
    }

    fn entry(doc_name: &str, idx: usize, text: &str, v: Vec<f32>) -> IndexEntry {
        let chunk = Chunk {
            docs_root: "s3://bucket".into(),
            doc_name: doc_name.into(),
            chunk_index: idx,
            text: text.into(),
        };
        IndexEntry::for_chunk(&chunk, "billing", v)
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        let store = SqliteStore::open(&path).await.unwrap();
        store.create_index(&info("docs", 2)).await.unwrap();
        drop(store);
        let reopened = SqliteStore::open(&path).await.unwrap();
        let listed = reopened.list_indices().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].model_id.as_deref(), Some("test-model"));
    }

    #[tokio::test]
    async fn create_keeps_existing_schema() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("docs", 2)).await.unwrap();
        let existing = store.create_index(&info("docs", 8)).await.unwrap();
        assert_eq!(existing.dimension, 2);
    }

    #[tokio::test]
    async fn keyword_and_vector_search() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("docs", 2)).await.unwrap();
        let entries = vec![
            entry("refund.txt", 0, "Refunds are issued within 30 days.", vec![1.0, 0.0]),
            entry("refund.txt", 1, "Contact support for shipping questions.", vec![0.0, 1.0]),
        ];
        store
            .replace_document("docs", "s3://bucket", "refund.txt", &entries)
            .await
            .unwrap();

        let kw = store
            .keyword_search("docs", "refunds policy", EntryUnit::Chunk, 10)
            .await
            .unwrap();
        assert_eq!(kw.len(), 1);
        assert_eq!(kw[0].chunk_index, 0);
        assert!(kw[0].raw_score > 0.0);
        assert_eq!(kw[0].service, "billing");

        let vec_hits = store
            .vector_search("docs", &[0.0, 1.0], EntryUnit::Chunk, 10)
            .await
            .unwrap();
        assert_eq!(vec_hits.len(), 2);
        assert_eq!(vec_hits[0].chunk_index, 1);
    }

    #[tokio::test]
    async fn replace_removes_stale_fts_rows() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("docs", 1)).await.unwrap();
        store
            .replace_document("docs", "s3://bucket", "a.txt", &[entry("a.txt", 0, "obsolete wording", vec![1.0])])
            .await
            .unwrap();
        store
            .replace_document("docs", "s3://bucket", "a.txt", &[entry("a.txt", 0, "fresh wording", vec![1.0])])
            .await
            .unwrap();

        assert!(store
            .keyword_search("docs", "obsolete", EntryUnit::Chunk, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .keyword_search("docs", "fresh", EntryUnit::Chunk, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn indices_are_isolated_and_deletable() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("a", 1)).await.unwrap();
        store.create_index(&info("b", 1)).await.unwrap();
        store
            .replace_document("a", "s3://bucket", "x.txt", &[entry("x.txt", 0, "shared term", vec![1.0])])
            .await
            .unwrap();

        assert!(store
            .keyword_search("b", "shared", EntryUnit::Chunk, 10)
            .await
            .unwrap()
            .is_empty());

        assert!(store.delete_index("a").await.unwrap());
        assert!(!store.delete_index("a").await.unwrap());
        assert!(matches!(
            store.count_entries("a", None).await.unwrap_err(),
            Error::IndexNotFound(_)
        ));
    }

    #[tokio::test]
    async fn dimension_mismatch_writes_nothing() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("docs", 3)).await.unwrap();
        let err = store
            .replace_document("docs", "s3://bucket", "a.txt", &[entry("a.txt", 0, "x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 1 }));
        assert_eq!(store.count_entries("docs", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn japanese_text_matches_on_bigrams() {
        let (_dir, store) = temp_store().await;
        store.create_index(&info("docs", 1)).await.unwrap();
        let text = "返金ポリシーについて説明します。購入から三十日以内であれば返金を受け付けます。";
        store
            .replace_document("docs", "s3://bucket", "ja.txt", &[entry("ja.txt", 0, text, vec![1.0])])
            .await
            .unwrap();

        let hits = store
            .keyword_search("docs", "返金", EntryUnit::Chunk, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, text);
        assert!(store
            .keyword_search("docs", "配送", EntryUnit::Chunk, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query("Refund AND policy").as_deref(), Some("\"refund\" OR \"and\" OR \"policy\""));
        assert!(fts_query("!!").is_none());
    }
}
