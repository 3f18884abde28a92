// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file and directory if they don't exist
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        // each connection to :memory: would get its own database, so the
        // in-memory variant is pinned to a single pooled connection
        let max_connections = if db_path == ":memory:" { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // listing_id uniqueness is owned by the dedup store logic, not a
        // constraint; clean_duplicates repairs drift from concurrent batches
        let create_listings_sql = r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                asking_price REAL,
                monthly_revenue REAL,
                monthly_profit REAL,
                profit_multiple REAL,
                revenue_multiple REAL,
                category TEXT NOT NULL,
                listing_status TEXT NOT NULL DEFAULT 'active',
                raw_snapshot TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL,
                verified BOOLEAN NOT NULL DEFAULT 0,
                scraped_at DATETIME NOT NULL,
                last_updated DATETIME NOT NULL
            )
        "#;

        let create_price_history_sql = r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id TEXT NOT NULL,
                field_type TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                changed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_jobs_sql = r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                config TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                last_error TEXT,
                created_at DATETIME NOT NULL,
                started_at DATETIME,
                completed_at DATETIME
            )
        "#;

        let create_industry_stats_sql = r#"
            CREATE TABLE IF NOT EXISTS industry_stats (
                industry TEXT NOT NULL,
                stat_date DATE NOT NULL,
                listing_count INTEGER NOT NULL,
                avg_asking_price REAL,
                avg_profit_multiple REAL,
                median_asking_price REAL,
                computed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (industry, stat_date)
            )
        "#;

        let create_health_snapshots_sql = r#"
            CREATE TABLE IF NOT EXISTS health_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report TEXT NOT NULL,
                flushed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_listings_listing_id ON listings (listing_id);
            CREATE INDEX IF NOT EXISTS idx_listings_category ON listings (category);
            CREATE INDEX IF NOT EXISTS idx_listings_scraped_at ON listings (scraped_at);
            CREATE INDEX IF NOT EXISTS idx_listings_asking_price ON listings (asking_price);
            CREATE INDEX IF NOT EXISTS idx_price_history_listing ON price_history (listing_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
            CREATE INDEX IF NOT EXISTS idx_jobs_type ON jobs (job_type)
        "#;

        sqlx::query(create_listings_sql).execute(&self.pool).await?;
        sqlx::query(create_price_history_sql).execute(&self.pool).await?;
        sqlx::query(create_jobs_sql).execute(&self.pool).await?;
        sqlx::query(create_industry_stats_sql).execute(&self.pool).await?;
        sqlx::query(create_health_snapshots_sql).execute(&self.pool).await?;
        for statement in create_indexes_sql.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }

        Ok(())
    }
}
