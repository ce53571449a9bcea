use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::info;

use crate::models::{ItemId, ProductRecord, ProductSummary, StoredProduct};
use crate::traits::ProductStore;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            if let Some(parent) = db_url
                .strip_prefix("sqlite:")
                .map(|path| Path::new(path.split('?').next().unwrap_or(path)))
                .and_then(Path::parent)
                .filter(|dir| !dir.as_os_str().is_empty())
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            info!("Creating database file");
            Sqlite::create_database(db_url)
                .await
                .with_context(|| format!("Failed to create database {db_url}"))?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .with_context(|| format!("Failed to connect to {db_url}"))?;
        Self::migrate(pool).await
    }

    /// Private in-memory store; a single connection keeps every query on the same database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Products saved by the most recent batch, by name
    pub async fn latest_batch(&self) -> Result<Vec<ProductSummary>> {
        let rows = sqlx::query(
            r"
            SELECT name, external_id FROM products
            WHERE fetched_at = (SELECT MAX(fetched_at) FROM products)
            ORDER BY name, price
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let products = rows
            .into_iter()
            .map(|row| ProductSummary {
                name: row.get("name"),
                external_id: ItemId(row.get("external_id")),
            })
            .collect();

        Ok(products)
    }
}

#[async_trait]
impl ProductStore for Database {
    async fn known_ids(&self) -> Result<HashSet<ItemId>> {
        let rows = sqlx::query("SELECT external_id FROM products")
            .fetch_all(&self.pool)
            .await?;

        let ids = rows
            .into_iter()
            .map(|row| ItemId(row.get::<i64, _>("external_id")))
            .collect();

        Ok(ids)
    }

    async fn persist(&self, records: &[ProductRecord]) -> Result<Vec<StoredProduct>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(records.len());

        for record in records {
            let key: i64 = sqlx::query_scalar(
                r"
                INSERT INTO products (name, price, description, image_url, discount, external_id, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                ",
            )
            .bind(record.name())
            .bind(record.price())
            .bind(record.description())
            .bind(record.image_url())
            .bind(record.discount())
            .bind(record.external_id().0)
            .bind(record.fetched_at())
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert product {}", record.external_id()))?;

            stored.push(StoredProduct {
                key,
                record: record.clone(),
            });
        }

        tx.commit().await?;
        info!("Saved {} products", stored.len());
        Ok(stored)
    }
}
