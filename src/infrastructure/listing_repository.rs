//! Deduplicating listing store
//!
//! The authoritative persistence layer for listings. Incoming records are
//! classified NEW / CHANGED / UNCHANGED against stored state in one batch
//! query; NEW records are inserted in fixed-size chunks with per-chunk
//! error isolation, CHANGED records are updated individually with their
//! differing tracked fields logged to price history before the update
//! commits. Writes are deliberately not transactional across chunks or
//! records - partial application under failure is a counted outcome.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::domain::job::Job;
use crate::domain::listing::{ChangeKind, ListingRecord, ListingStatus, PriceHistoryEntry};

/// How an incoming record relates to stored state
#[derive(Debug, Clone, PartialEq)]
pub enum RecordClass {
    New,
    Changed(Vec<FieldChange>),
    Unchanged,
}

/// One tracked field that differs between incoming and stored state
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field_type: ChangeKind,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Aggregate result of one batched save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub total_processed: usize,
    pub new_listings: usize,
    pub updated_listings: usize,
    pub errors: usize,
}

/// Daily aggregate for one industry
#[derive(Debug, Clone)]
pub struct IndustryStats {
    pub industry: String,
    pub stat_date: NaiveDate,
    pub listing_count: i64,
    pub avg_asking_price: Option<f64>,
    pub avg_profit_multiple: Option<f64>,
    pub median_asking_price: Option<f64>,
}

/// Repository over the listings, price_history, jobs and stats tables
#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
    chunk_size: usize,
}

fn fmt_money(v: Option<f64>) -> Option<String> {
    v.map(|v| format!("{v}"))
}

impl ListingStore {
    #[must_use]
    pub fn new(pool: SqlitePool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Classifies an incoming record against stored state. CHANGED is
    /// driven by the tracked fields only: asking price, profit multiple,
    /// revenue multiple and listing status.
    #[must_use]
    pub fn classify(incoming: &ListingRecord, existing: Option<&ListingRecord>) -> RecordClass {
        let Some(existing) = existing else {
            return RecordClass::New;
        };

        let mut changes = Vec::new();
        if incoming.asking_price != existing.asking_price {
            changes.push(FieldChange {
                field_type: ChangeKind::AskingPrice,
                old_value: fmt_money(existing.asking_price),
                new_value: fmt_money(incoming.asking_price),
            });
        }
        if incoming.profit_multiple != existing.profit_multiple {
            changes.push(FieldChange {
                field_type: ChangeKind::ProfitMultiple,
                old_value: fmt_money(existing.profit_multiple),
                new_value: fmt_money(incoming.profit_multiple),
            });
        }
        if incoming.revenue_multiple != existing.revenue_multiple {
            changes.push(FieldChange {
                field_type: ChangeKind::RevenueMultiple,
                old_value: fmt_money(existing.revenue_multiple),
                new_value: fmt_money(incoming.revenue_multiple),
            });
        }
        if incoming.listing_status != existing.listing_status {
            changes.push(FieldChange {
                field_type: ChangeKind::ListingStatus,
                old_value: Some(existing.listing_status.as_str().to_string()),
                new_value: Some(incoming.listing_status.as_str().to_string()),
            });
        }

        if changes.is_empty() {
            RecordClass::Unchanged
        } else {
            RecordClass::Changed(changes)
        }
    }

    /// Fetches current state for a batch of listing ids in one query
    pub async fn fetch_existing(
        &self,
        listing_ids: &[String],
    ) -> Result<HashMap<String, ListingRecord>, sqlx::Error> {
        if listing_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; listing_ids.len()].join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM listings WHERE listing_id IN ({placeholders}) \
             ORDER BY scraped_at DESC, id DESC"
        );
        let mut query = sqlx::query(&sql);
        for id in listing_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::new();
        for row in rows {
            let record = row_to_record(&row)?;
            // most recent row wins; older duplicates are ignored here and
            // reaped by clean_duplicates
            out.entry(record.listing_id.clone()).or_insert(record);
        }
        Ok(out)
    }

    /// Current snapshot for one listing id
    pub async fn get_listing(&self, listing_id: &str) -> Result<Option<ListingRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM listings WHERE listing_id = ? \
             ORDER BY scraped_at DESC, id DESC LIMIT 1"
        ))
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Saves a batch: classifies once against stored state, inserts NEW
    /// records in chunks, updates CHANGED records individually with price
    /// history logged first, leaves UNCHANGED records alone.
    pub async fn save_listings(&self, batch: &[ListingRecord]) -> SaveStats {
        let mut stats = SaveStats {
            total_processed: batch.len(),
            ..SaveStats::default()
        };
        if batch.is_empty() {
            return stats;
        }

        let ids: Vec<String> = batch.iter().map(|r| r.listing_id.clone()).collect();
        let existing = match self.fetch_existing(&ids).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "existence query failed, aborting batch");
                stats.errors = batch.len();
                return stats;
            }
        };

        let mut new_records: Vec<ListingRecord> = Vec::new();
        let mut changed: Vec<(&ListingRecord, Vec<FieldChange>)> = Vec::new();
        let mut snapshot_refresh: Vec<&ListingRecord> = Vec::new();

        for record in batch {
            match Self::classify(record, existing.get(&record.listing_id)) {
                RecordClass::New => {
                    let mut record = record.clone();
                    let now = Utc::now();
                    record.scraped_at = now;
                    record.last_updated = now;
                    new_records.push(record);
                }
                RecordClass::Changed(fields) => changed.push((record, fields)),
                RecordClass::Unchanged => {
                    // tracked fields identical; refresh the opaque snapshot
                    // when its content drifted so stored data never goes stale
                    if let Some(current) = existing.get(&record.listing_id) {
                        if current.snapshot_hash() != record.snapshot_hash() {
                            snapshot_refresh.push(record);
                        }
                    }
                }
            }
        }

        for chunk in new_records.chunks(self.chunk_size) {
            match self.insert_chunk(chunk).await {
                Ok(()) => stats.new_listings += chunk.len(),
                Err(e) => {
                    warn!(error = %e, chunk_len = chunk.len(), "chunk insert failed");
                    stats.errors += 1;
                }
            }
        }

        for (record, fields) in changed {
            match self.apply_update(record, &fields).await {
                Ok(()) => stats.updated_listings += 1,
                Err(e) => {
                    warn!(error = %e, listing_id = %record.listing_id, "listing update failed");
                    stats.errors += 1;
                }
            }
        }

        for record in snapshot_refresh {
            if let Err(e) = self.refresh_snapshot(record).await {
                debug!(error = %e, listing_id = %record.listing_id, "snapshot refresh failed");
                stats.errors += 1;
            }
        }

        stats
    }

    async fn insert_chunk(&self, chunk: &[ListingRecord]) -> Result<(), sqlx::Error> {
        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO listings (listing_id, title, url, asking_price, monthly_revenue, \
             monthly_profit, profit_multiple, revenue_multiple, category, listing_status, \
             raw_snapshot, snapshot_hash, verified, scraped_at, last_updated) ",
        );
        builder.push_values(chunk, |mut b, record| {
            b.push_bind(&record.listing_id)
                .push_bind(&record.title)
                .push_bind(&record.url)
                .push_bind(record.asking_price)
                .push_bind(record.monthly_revenue)
                .push_bind(record.monthly_profit)
                .push_bind(record.profit_multiple)
                .push_bind(record.revenue_multiple)
                .push_bind(&record.category)
                .push_bind(record.listing_status.as_str())
                .push_bind(record.raw_snapshot.to_string())
                .push_bind(record.snapshot_hash())
                .push_bind(record.verified)
                .push_bind(record.scraped_at)
                .push_bind(record.last_updated);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Logs the differing tracked fields, then applies the update. History
    /// goes first so a failed update never leaves an unexplained change.
    async fn apply_update(&self, record: &ListingRecord, fields: &[FieldChange]) -> Result<(), sqlx::Error> {
        for change in fields {
            sqlx::query(
                "INSERT INTO price_history (listing_id, field_type, old_value, new_value, changed_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.listing_id)
            .bind(change.field_type.as_str())
            .bind(&change.old_value)
            .bind(&change.new_value)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            "UPDATE listings SET title = ?, url = ?, asking_price = ?, monthly_revenue = ?, \
             monthly_profit = ?, profit_multiple = ?, revenue_multiple = ?, category = ?, \
             listing_status = ?, raw_snapshot = ?, snapshot_hash = ?, verified = ?, \
             last_updated = ? WHERE listing_id = ?",
        )
        .bind(&record.title)
        .bind(&record.url)
        .bind(record.asking_price)
        .bind(record.monthly_revenue)
        .bind(record.monthly_profit)
        .bind(record.profit_multiple)
        .bind(record.revenue_multiple)
        .bind(&record.category)
        .bind(record.listing_status.as_str())
        .bind(record.raw_snapshot.to_string())
        .bind(record.snapshot_hash())
        .bind(record.verified)
        .bind(Utc::now())
        .bind(&record.listing_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_snapshot(&self, record: &ListingRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE listings SET raw_snapshot = ?, snapshot_hash = ?, last_updated = ? \
             WHERE listing_id = ?",
        )
        .bind(record.raw_snapshot.to_string())
        .bind(record.snapshot_hash())
        .bind(Utc::now())
        .bind(&record.listing_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Keeps the most recently scraped row per listing id and deletes the
    /// rest. Returns the number of deleted rows.
    pub async fn clean_duplicates(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM listings WHERE id NOT IN ( \
                 SELECT id FROM ( \
                     SELECT id, ROW_NUMBER() OVER ( \
                         PARTITION BY listing_id \
                         ORDER BY scraped_at DESC, id DESC \
                     ) AS rn FROM listings \
                 ) WHERE rn = 1 \
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Price history for one listing, newest first
    pub async fn price_history(&self, listing_id: &str) -> Result<Vec<PriceHistoryEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT listing_id, field_type, old_value, new_value, changed_at \
             FROM price_history WHERE listing_id = ? ORDER BY changed_at DESC, id DESC",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PriceHistoryEntry {
                listing_id: row.get("listing_id"),
                field_type: row.get("field_type"),
                old_value: row.get("old_value"),
                new_value: row.get("new_value"),
                changed_at: row.get("changed_at"),
            })
            .collect())
    }

    /// Paginated listings for one category, most recent first
    pub async fn get_listings_paginated(
        &self,
        category: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<Vec<ListingRecord>, sqlx::Error> {
        let offset = (page.max(1) - 1) * limit;
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM listings WHERE category = ? \
                     ORDER BY scraped_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(category)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM listings ORDER BY scraped_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_record).collect()
    }

    /// Categories that still have active listings
    pub async fn active_categories(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT DISTINCT category FROM listings WHERE listing_status = 'active' ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("category")).collect())
    }

    /// Computes the daily aggregate for one industry
    pub async fn compute_industry_stats(
        &self,
        industry: &str,
        stat_date: NaiveDate,
    ) -> Result<IndustryStats, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, AVG(asking_price) AS avg_price, \
             AVG(profit_multiple) AS avg_multiple \
             FROM listings WHERE category = ? AND listing_status = 'active'",
        )
        .bind(industry)
        .fetch_one(&self.pool)
        .await?;

        let listing_count: i64 = row.get("cnt");
        let median_asking_price = if listing_count > 0 {
            sqlx::query(
                "SELECT asking_price FROM listings \
                 WHERE category = ? AND listing_status = 'active' AND asking_price IS NOT NULL \
                 ORDER BY asking_price LIMIT 1 OFFSET (\
                     SELECT (COUNT(*) - 1) / 2 FROM listings \
                     WHERE category = ? AND listing_status = 'active' AND asking_price IS NOT NULL)",
            )
            .bind(industry)
            .bind(industry)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| r.get("asking_price"))
        } else {
            None
        };

        Ok(IndustryStats {
            industry: industry.to_string(),
            stat_date,
            listing_count,
            avg_asking_price: row.get("avg_price"),
            avg_profit_multiple: row.get("avg_multiple"),
            median_asking_price,
        })
    }

    /// Upserts one day's aggregate for an industry
    pub async fn upsert_industry_stats(&self, stats: &IndustryStats) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO industry_stats \
             (industry, stat_date, listing_count, avg_asking_price, avg_profit_multiple, \
              median_asking_price, computed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stats.industry)
        .bind(stats.stat_date)
        .bind(stats.listing_count)
        .bind(stats.avg_asking_price)
        .bind(stats.avg_profit_multiple)
        .bind(stats.median_asking_price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mirrors a job row for post-mortem queries; called on terminal
    /// transitions
    pub async fn record_job(&self, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO jobs \
             (id, job_type, config, priority, status, attempts_made, result, last_error, \
              created_at, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.job_type.as_str())
        .bind(serde_json::to_string(&job.config).unwrap_or_default())
        .bind(i64::from(job.priority.weight()))
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts_made))
        .bind(job.result.as_ref().and_then(|r| serde_json::to_string(r).ok()))
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persists one health report snapshot (periodic, sampled)
    pub async fn flush_health_snapshot(&self, report: &serde_json::Value) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO health_snapshots (report, flushed_at) VALUES (?, ?)")
            .bind(report.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const COLUMNS: &str = "listing_id, title, url, asking_price, monthly_revenue, monthly_profit, \
                       profit_multiple, revenue_multiple, category, listing_status, raw_snapshot, \
                       verified, scraped_at, last_updated";

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ListingRecord, sqlx::Error> {
    let status: String = row.get("listing_status");
    let raw: String = row.get("raw_snapshot");
    let scraped_at: DateTime<Utc> = row.get("scraped_at");
    let last_updated: DateTime<Utc> = row.get("last_updated");
    Ok(ListingRecord {
        listing_id: row.get("listing_id"),
        title: row.get("title"),
        url: row.get("url"),
        asking_price: row.get("asking_price"),
        monthly_revenue: row.get("monthly_revenue"),
        monthly_profit: row.get("monthly_profit"),
        profit_multiple: row.get("profit_multiple"),
        revenue_multiple: row.get("revenue_multiple"),
        category: row.get("category"),
        listing_status: ListingStatus::parse_lenient(&status).unwrap_or(ListingStatus::Active),
        raw_snapshot: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        verified: row.get("verified"),
        scraped_at,
        last_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use serde_json::json;

    async fn store() -> ListingStore {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        ListingStore::new(db.pool().clone(), 50)
    }

    fn record(id: &str, price: f64) -> ListingRecord {
        let mut rec = ListingRecord::new(id, format!("Listing {id}"), "saas");
        rec.url = format!("https://market.example/listing/{id}");
        rec.asking_price = Some(price);
        rec.monthly_profit = Some(price / 30.0);
        rec.raw_snapshot = json!({"id": id, "price": price});
        rec
    }

    #[tokio::test]
    async fn new_records_are_inserted_and_counted() {
        let store = store().await;
        let batch = vec![record("a", 1000.0), record("b", 2000.0)];
        let stats = store.save_listings(&batch).await;
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.new_listings, 2);
        assert_eq!(stats.updated_listings, 0);
        assert_eq!(stats.errors, 0);
        assert!(store.get_listing("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reingesting_unchanged_batch_is_idempotent() {
        let store = store().await;
        let batch = vec![record("a", 1000.0), record("b", 2000.0)];
        store.save_listings(&batch).await;
        let stats = store.save_listings(&batch).await;
        assert_eq!(stats.new_listings, 0);
        assert_eq!(stats.updated_listings, 0);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn price_change_writes_exactly_one_history_entry() {
        let store = store().await;
        store.save_listings(&[record("a", 1000.0)]).await;

        let mut changed = record("a", 1200.0);
        changed.monthly_profit = Some(1000.0 / 30.0); // keep multiples untouched
        let stats = store.save_listings(&[changed]).await;
        assert_eq!(stats.updated_listings, 1);
        assert_eq!(stats.new_listings, 0);

        let history = store.price_history("a").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field_type, "askingPrice");
        assert_eq!(history[0].old_value.as_deref(), Some("1000"));
        assert_eq!(history[0].new_value.as_deref(), Some("1200"));
    }

    #[tokio::test]
    async fn classification_tracks_only_the_fixed_field_subset() {
        let existing = record("a", 1000.0);
        // title drift alone is not CHANGED
        let mut incoming = record("a", 1000.0);
        incoming.title = "Renamed listing".to_string();
        assert_eq!(
            ListingStore::classify(&incoming, Some(&existing)),
            RecordClass::Unchanged
        );

        // status drift is
        incoming.listing_status = ListingStatus::Sold;
        let class = ListingStore::classify(&incoming, Some(&existing));
        match class {
            RecordClass::Changed(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field_type, ChangeKind::ListingStatus);
            }
            other => panic!("expected Changed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_duplicates_keeps_most_recent_row() {
        let store = store().await;
        // insert the same listing twice by bypassing classification
        let older = record("dup", 1000.0);
        store.insert_chunk(&[older.clone()]).await.unwrap();
        let mut newer = record("dup", 1500.0);
        newer.scraped_at = older.scraped_at + chrono::Duration::hours(1);
        store.insert_chunk(&[newer.clone()]).await.unwrap();

        let deleted = store.clean_duplicates().await.unwrap();
        assert_eq!(deleted, 1);
        let kept = store.get_listing("dup").await.unwrap().unwrap();
        assert_eq!(kept.asking_price, Some(1500.0));
    }

    #[tokio::test]
    async fn chunked_insert_splits_large_batches() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = ListingStore::new(db.pool().clone(), 10);
        let batch: Vec<ListingRecord> =
            (0..25).map(|i| record(&format!("l{i}"), 1000.0 + f64::from(i))).collect();
        let stats = store.save_listings(&batch).await;
        assert_eq!(stats.new_listings, 25);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn stats_aggregate_per_industry() {
        let store = store().await;
        let mut batch = vec![record("a", 1000.0), record("b", 2000.0), record("c", 3000.0)];
        for rec in &mut batch {
            rec.profit_multiple = Some(2.0);
        }
        store.save_listings(&batch).await;

        let date = Utc::now().date_naive();
        let stats = store.compute_industry_stats("saas", date).await.unwrap();
        assert_eq!(stats.listing_count, 3);
        assert_eq!(stats.avg_asking_price, Some(2000.0));
        assert_eq!(stats.median_asking_price, Some(2000.0));
        store.upsert_industry_stats(&stats).await.unwrap();
    }

    #[tokio::test]
    async fn active_categories_lists_distinct_live_categories() {
        let store = store().await;
        let mut ecommerce = record("x", 500_000.0);
        ecommerce.category = "ecommerce".to_string();
        let mut sold = record("y", 100.0);
        sold.listing_status = ListingStatus::Sold;
        sold.category = "content".to_string();
        store
            .save_listings(&[record("a", 1000.0), ecommerce, sold])
            .await;

        let categories = store.active_categories().await.unwrap();
        assert_eq!(categories, vec!["ecommerce".to_string(), "saas".to_string()]);
    }
}
