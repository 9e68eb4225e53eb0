// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite disk tier.
//!
//! One row per `(type, id)` holding the storage-shaped JSON as text:
//!
//! ```sql
//! CREATE TABLE records (
//!   type_key   TEXT NOT NULL,
//!   item_id    TEXT NOT NULL,
//!   payload    TEXT NOT NULL,   -- JSON, queryable via json_extract
//!   updated_at INTEGER NOT NULL,
//!   PRIMARY KEY (type_key, item_id)
//! )
//! ```
//!
//! Lists come back in first-insert order (upserts keep the rowid). An empty
//! list is a successful read; the engine decides whether that means "go to
//! the cloud". A missing single row is a [`TierMiss`](crate::AccessError::TierMiss).
//!
//! JSON functions work directly on the payload column:
//!
//! ```sql
//! SELECT payload FROM records
//! WHERE type_key = 'user' AND json_extract(payload, '$.team') = 'core';
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use super::sqlite::{open_pool, with_busy_retry};
use super::traits::{merge_patch, Target, Tier, TierKind, WriteMode};
use crate::error::{AccessError, Result};
use crate::item::{extract_id, now_millis, ItemId, TypeKey};

pub struct DiskTier {
    pool: SqlitePool,
}

impl DiskTier {
    /// Open (or create) the disk tier at `path`. Pass
    /// [`IN_MEMORY`](super::sqlite::IN_MEMORY) for a throwaway store.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = open_pool(path, "disk_tier_open").await?;
        let tier = Self { pool };
        tier.init_schema().await?;
        Ok(tier)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                type_key TEXT NOT NULL,
                item_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (type_key, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            info!(records = count, "Disk tier opened with existing records");
        }
        Ok(())
    }

    /// Number of stored records of one type.
    pub async fn count(&self, type_key: &TypeKey) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE type_key = ?")
            .bind(type_key.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Records of `type_key` whose top-level `field` equals `value`.
    pub async fn search(&self, type_key: &TypeKey, field: &str, value: &Value) -> Result<Vec<Value>> {
        let path = format!("$.{field}");

        let rows: Vec<String> = if value.is_null() {
            sqlx::query_scalar(
                "SELECT payload FROM records \
                 WHERE type_key = ? AND json_type(payload, ?) = 'null' ORDER BY rowid",
            )
            .bind(type_key.as_str())
            .bind(&path)
            .fetch_all(&self.pool)
            .await?
        } else {
            let query = sqlx::query_scalar::<Sqlite, String>(
                "SELECT payload FROM records \
                 WHERE type_key = ? AND json_extract(payload, ?) = ? ORDER BY rowid",
            )
            .bind(type_key.as_str())
            .bind(&path);
            let query = match value {
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                // json_extract yields objects and arrays as minified JSON text
                other => query.bind(other.to_string()),
            };
            query.fetch_all(&self.pool).await?
        };

        debug!(type_key = %type_key, field, hits = rows.len(), "Disk search");
        rows.iter().map(|raw| parse_payload(raw)).collect()
    }

    async fn upsert(
        tx: &mut Transaction<'_, Sqlite>,
        target: &Target,
        value: &Value,
        mode: WriteMode,
    ) -> Result<Value> {
        let id = extract_id(value, &target.id_field).ok_or_else(|| {
            AccessError::Configuration(format!(
                "{} value has no '{}' field",
                target.type_key, target.id_field
            ))
        })?;
        let key = id.key();

        let stored = if mode == WriteMode::Patch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT payload FROM records WHERE type_key = ? AND item_id = ?")
                    .bind(target.type_key.as_str())
                    .bind(&key)
                    .fetch_optional(&mut **tx)
                    .await?;
            match existing {
                Some(raw) => merge_patch(&parse_payload(&raw)?, value),
                None => value.clone(),
            }
        } else {
            value.clone()
        };

        sqlx::query(
            "INSERT INTO records (type_key, item_id, payload, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(type_key, item_id) DO UPDATE SET \
             payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(target.type_key.as_str())
        .bind(&key)
        .bind(serde_json::to_string(&stored)?)
        .bind(now_millis())
        .execute(&mut **tx)
        .await?;

        Ok(stored)
    }
}

fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(AccessError::from)
}

#[async_trait]
impl Tier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    async fn read_one(&self, target: &Target, id: &ItemId) -> Result<Value> {
        let key = id.key();
        let raw: Option<String> = with_busy_retry("disk_read_one", || async {
            sqlx::query_scalar("SELECT payload FROM records WHERE type_key = ? AND item_id = ?")
                .bind(target.type_key.as_str())
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        match raw {
            Some(raw) => parse_payload(&raw),
            None => Err(AccessError::miss(
                TierKind::Disk,
                format!("no {} row for {id}", target.type_key),
            )),
        }
    }

    async fn read_many(&self, target: &Target) -> Result<Vec<Value>> {
        let rows: Vec<String> = with_busy_retry("disk_read_many", || async {
            sqlx::query_scalar("SELECT payload FROM records WHERE type_key = ? ORDER BY rowid")
                .bind(target.type_key.as_str())
                .fetch_all(&self.pool)
                .await
        })
        .await?;
        rows.iter().map(|raw| parse_payload(raw)).collect()
    }

    async fn write_one(&self, target: &Target, value: &Value, mode: WriteMode) -> Result<Value> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::upsert(&mut tx, target, value, mode).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn write_many(&self, target: &Target, values: &[Value], mode: WriteMode) -> Result<Vec<Value>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(values.len());
        for value in values {
            stored.push(Self::upsert(&mut tx, target, value, mode).await?);
        }
        tx.commit().await?;
        debug!(type_key = %target.type_key, count = stored.len(), "Disk batch written");
        Ok(stored)
    }

    async fn delete_many(&self, target: &Target, ids: &[ItemId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM records WHERE type_key = ? AND item_id = ?")
                .bind(target.type_key.as_str())
                .bind(id.key())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, type_key: &TypeKey) -> Result<bool> {
        let result = with_busy_retry("disk_clear", || async {
            sqlx::query("DELETE FROM records WHERE type_key = ?")
                .bind(type_key.as_str())
                .execute(&self.pool)
                .await
        })
        .await?;
        info!(type_key = %type_key, removed = result.rows_affected(), "Disk tier cleared");
        Ok(true)
    }

    async fn search(&self, target: &Target, field: &str, value: &Value) -> Result<Vec<Value>> {
        DiskTier::search(self, &target.type_key, field, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::IN_MEMORY;
    use serde_json::json;

    fn users() -> Target {
        Target::local("user", "id")
    }

    async fn tier() -> DiskTier {
        DiskTier::open(IN_MEMORY).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_list_is_ok() {
        let disk = tier().await;
        assert!(disk.read_many(&users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_row_is_miss() {
        let disk = tier().await;
        let err = disk.read_one(&users(), &ItemId::Int(1)).await.unwrap_err();
        assert!(err.is_miss());
        assert!(err.to_string().starts_with("disk miss"));
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_insert_order() {
        let disk = tier().await;
        disk.write_many(
            &users(),
            &[json!({"id": 2, "v": 1}), json!({"id": 1, "v": 1})],
            WriteMode::Create,
        )
        .await
        .unwrap();
        disk.write_one(&users(), &json!({"id": 2, "v": 2}), WriteMode::Update)
            .await
            .unwrap();

        let listed = disk.read_many(&users()).await.unwrap();
        assert_eq!(listed, vec![json!({"id": 2, "v": 2}), json!({"id": 1, "v": 1})]);
        assert_eq!(disk.count(&"user".into()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_object_roundtrips() {
        let disk = tier().await;
        let target = Target::local("note", "key");
        disk.write_one(&target, &json!({"key": "k"}), WriteMode::Create).await.unwrap();
        assert_eq!(
            disk.read_one(&target, &ItemId::Text("k".into())).await.unwrap(),
            json!({"key": "k"})
        );
    }

    #[tokio::test]
    async fn test_patch_merges_stored_row() {
        let disk = tier().await;
        disk.write_one(&users(), &json!({"id": 1, "name": "Ada", "team": "core"}), WriteMode::Create)
            .await
            .unwrap();
        disk.write_one(&users(), &json!({"id": 1, "team": "infra"}), WriteMode::Patch)
            .await
            .unwrap();

        let row = disk.read_one(&users(), &ItemId::Int(1)).await.unwrap();
        assert_eq!(row, json!({"id": 1, "name": "Ada", "team": "infra"}));
    }

    #[tokio::test]
    async fn test_delete_many_and_clear() {
        let disk = tier().await;
        let values: Vec<Value> = (1..=4).map(|i| json!({"id": i})).collect();
        disk.write_many(&users(), &values, WriteMode::Create).await.unwrap();
        disk.write_one(&Target::local("repo", "id"), &json!({"id": 1}), WriteMode::Create)
            .await
            .unwrap();

        disk.delete_many(&users(), &[ItemId::Int(1), ItemId::Int(3)]).await.unwrap();
        assert_eq!(disk.read_many(&users()).await.unwrap(), vec![json!({"id": 2}), json!({"id": 4})]);

        assert!(disk.clear(&"user".into()).await.unwrap());
        assert_eq!(disk.count(&"user".into()).await.unwrap(), 0);
        assert_eq!(disk.count(&"repo".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_by_field() {
        let disk = tier().await;
        disk.write_many(
            &users(),
            &[
                json!({"id": 1, "team": "core", "admin": true, "age": 30}),
                json!({"id": 2, "team": "infra", "admin": false, "age": 41}),
                json!({"id": 3, "team": "core", "admin": false, "nick": null}),
            ],
            WriteMode::Create,
        )
        .await
        .unwrap();
        let user: TypeKey = "user".into();

        let core = disk.search(&user, "team", &json!("core")).await.unwrap();
        assert_eq!(core.len(), 2);

        let admins = disk.search(&user, "admin", &json!(true)).await.unwrap();
        assert_eq!(admins, vec![json!({"id": 1, "team": "core", "admin": true, "age": 30})]);

        let by_age = disk.search(&user, "age", &json!(41)).await.unwrap();
        assert_eq!(by_age[0]["id"], 2);

        let nulls = disk.search(&user, "nick", &Value::Null).await.unwrap();
        assert_eq!(nulls.len(), 1);
        assert_eq!(nulls[0]["id"], 3);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.db");
        let path = path.to_str().unwrap();

        {
            let disk = DiskTier::open(path).await.unwrap();
            disk.write_one(&users(), &json!({"id": 5}), WriteMode::Create).await.unwrap();
        }

        let disk = DiskTier::open(path).await.unwrap();
        assert_eq!(disk.read_one(&users(), &ItemId::Int(5)).await.unwrap(), json!({"id": 5}));
    }
}
