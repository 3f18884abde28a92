//! Listing scan processor
//!
//! Walks one category's pages in order, extracts raw records through the
//! active selectors, validates and persists them through the dedup store,
//! and queues detail fetches for high-value listings with a priority
//! boost proportional to price. Pages are processed strictly in order so
//! pagination cursors stay deterministic; cancellation is honored between
//! pages.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::health::{ExtractionResult, ExtractionStatus};
use crate::domain::job::{Job, JobConfig, JobOutcome, JobPriority, JobType};
use crate::domain::listing::ListingRecord;
use crate::engine::error::EngineError;
use crate::engine::processors::{
    build_record, discover_listing_cards, ensure_selector, field_text_in_card, identify_card,
    ExtractedFields, JobProcessor, ProcessorContext, LISTING_FIELDS,
};
use crate::engine::progress::ProgressReporter;
use crate::engine::queue_manager::JobOptions;
use crate::infrastructure::extractor::ExtractorError;
use crate::selector::{CurrentResult, PageSnapshot};

/// Counters accumulated across one scan job
#[derive(Debug, Default)]
struct ScanTotals {
    scraped: usize,
    saved: usize,
    invalid: usize,
    detail_jobs: usize,
}

pub struct ListingScanProcessor;

impl ListingScanProcessor {
    /// Extracts every card on one page. Field extraction failures are
    /// reported to the health monitor per data type; they never abort the
    /// page.
    fn extract_page(ctx: &ProcessorContext, category: &str, page: &PageSnapshot) -> Vec<ListingRecord> {
        let cards = discover_listing_cards(page);
        if cards.is_empty() {
            debug!(category, "no listing cards found on page");
            return Vec::new();
        }

        let mut records = Vec::new();
        for &card in &cards {
            let Some((id, url)) = identify_card(page, card) else {
                continue;
            };
            let mut fields = ExtractedFields::default();
            for data_type in LISTING_FIELDS {
                let value = ensure_selector(ctx, page, data_type)
                    .and_then(|candidate| field_text_in_card(page, card, &candidate));
                fields.set(data_type, value);
            }
            if let Some(record) = build_record(category, &id, &url, &fields) {
                records.push(record);
            }
        }

        // health accounting per field: success when every card yielded a
        // value, partial when some did, failed when none did
        for data_type in LISTING_FIELDS {
            let Some(candidate) = ctx.generator.active_for(data_type) else {
                continue;
            };
            let hits = cards
                .iter()
                .filter(|&&card| field_text_in_card(page, card, &candidate).is_some())
                .count();
            let status = if hits == cards.len() {
                ctx.generator.record_success(data_type);
                ExtractionStatus::Success
            } else if hits > 0 {
                ExtractionStatus::Partial
            } else {
                ctx.generator.record_failure(data_type);
                ExtractionStatus::Failed
            };
            ctx.monitor.record_extraction_result(ExtractionResult::new(
                data_type.as_str(),
                candidate.strategy.clone(),
                status,
            ));

            // a selector that went completely blind triggers evolution
            if status == ExtractionStatus::Failed {
                let reports = ctx.generator.evolve_selectors(
                    &[CurrentResult {
                        data_type,
                        expression: candidate.expression.clone(),
                        extracted: Vec::new(),
                    }],
                    &[],
                    page,
                );
                for report in reports {
                    debug!(
                        data_type = %report.data_type,
                        action = ?report.action,
                        "selector evolution after failed extraction"
                    );
                }
            }
        }

        records
    }

    /// Persists one page's records and queues detail fetches for the
    /// high-value ones
    async fn persist_page(
        ctx: &ProcessorContext,
        totals: &mut ScanTotals,
        records: Vec<ListingRecord>,
    ) {
        totals.scraped += records.len();

        let mut valid = Vec::new();
        for record in records {
            match record.validate() {
                Ok(()) => valid.push(record),
                Err(issues) => {
                    totals.invalid += 1;
                    for issue in issues {
                        ctx.monitor
                            .record_error(&issue.to_string(), "listing_scan/validate");
                    }
                }
            }
        }

        let stats = ctx.store.save_listings(&valid).await;
        totals.saved += stats.new_listings + stats.updated_listings;
        if stats.errors > 0 {
            warn!(errors = stats.errors, "persistence errors during listing save");
        }

        let threshold = ctx.config.store.high_value_threshold;
        for record in &valid {
            if !record.is_high_value(threshold) {
                continue;
            }
            let priority = record
                .asking_price
                .map_or(JobPriority::Normal, |p| JobPriority::for_asking_price(p, threshold));
            let config = JobConfig::DetailFetch {
                listing_id: record.listing_id.clone(),
                url: record.url.clone(),
            };
            match ctx
                .queue
                .add_job(config, JobOptions::with_priority(priority))
                .await
            {
                Ok(_) => totals.detail_jobs += 1,
                Err(e) => ctx
                    .monitor
                    .record_error(&e.to_string(), "listing_scan/enqueue"),
            }
        }
    }
}

#[async_trait]
impl JobProcessor for ListingScanProcessor {
    fn job_type(&self) -> JobType {
        JobType::ListingScan
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<JobOutcome, EngineError> {
        let JobConfig::ListingScan { category, max_pages } = &job.config else {
            return Err(EngineError::Validation(
                "listing_scan job carries a foreign config".to_string(),
            ));
        };
        let max_pages = (*max_pages).max(1);

        let _session = ctx.sessions.start("listing_scan")?;
        let mut reporter = ProgressReporter::new(ctx.progress.clone(), job.id, job.job_type);
        reporter.advance(10, &format!("scanning {category}"));

        let mut totals = ScanTotals::default();
        // pages strictly in order for deterministic pagination cursors
        for page_number in 1..=max_pages {
            // cancellation checkpoint between pages
            if ctx.queue.cancel_requested(job.id).await {
                info!(job_id = %job.id, page_number, "listing scan cancelled at checkpoint");
                break;
            }

            let started = Instant::now();
            let page = match ctx.executor.fetch_listing_page(category, page_number).await {
                Ok(page) => page,
                Err(e) => {
                    let timed_out = matches!(e, ExtractorError::Timeout(_));
                    ctx.monitor.record_performance(started.elapsed(), timed_out);
                    return Err(e.into());
                }
            };
            ctx.monitor.record_performance(started.elapsed(), false);

            let records = Self::extract_page(ctx, category, &page);
            Self::persist_page(ctx, &mut totals, records).await;

            let percent = 10 + (page_number * 70 / max_pages) as u8;
            reporter.advance(percent, &format!("page {page_number}/{max_pages} done"));
        }

        reporter.advance(80, "persistence finished");
        reporter.advance(100, "scan complete");

        info!(
            category,
            scraped = totals.scraped,
            saved = totals.saved,
            invalid = totals.invalid,
            detail_jobs = totals.detail_jobs,
            "listing scan finished"
        );
        Ok(JobOutcome::ListingScan {
            listings_scraped: totals.scraped,
            listings_saved: totals.saved,
            listings_invalid: totals.invalid,
            detail_jobs_queued: totals.detail_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::processors::test_support::{context, FixtureExecutor};

    fn grid(card: &[(&str, &str, &str)]) -> String {
        let cards: String = card
            .iter()
            .map(|(id, title, price)| {
                format!(
                    r#"<div class="listing-card" data-listing-id="{id}">
                         <a href="/listing/{id}"><h3 class="listing-title">{title}</h3></a>
                         <span class="price">{price}</span>
                         <span class="multiple">3.1x</span>
                         <span class="state">Active</span>
                       </div>"#
                )
            })
            .collect();
        format!(r#"<html><body><div class="results">{cards}</div></body></html>"#)
    }

    #[tokio::test]
    async fn scan_persists_valid_records_and_reports_counts() {
        let executor = FixtureExecutor {
            listing_pages: vec![grid(&[
                ("fl-1", "Profitable SaaS analytics tool", "$120,000"),
                ("fl-2", "Established content website", "$45,000"),
            ])],
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::ListingScan {
                category: "saas".to_string(),
                max_pages: 1,
            },
            JobPriority::Normal,
            3,
        );

        let outcome = ListingScanProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::ListingScan {
            listings_scraped,
            listings_saved,
            listings_invalid,
            detail_jobs_queued,
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(listings_scraped, 2);
        assert_eq!(listings_saved, 2);
        assert_eq!(listings_invalid, 0);
        // fl-1 crosses the default 100k high-value threshold
        assert_eq!(detail_jobs_queued, 1);

        let saved = ctx.store.get_listing("fl-1").await.unwrap().unwrap();
        assert_eq!(saved.asking_price, Some(120_000.0));
        assert_eq!(saved.category, "saas");
    }

    #[tokio::test]
    async fn pages_are_fetched_in_order() {
        let executor = FixtureExecutor {
            listing_pages: vec![
                grid(&[("fl-1", "Profitable SaaS analytics tool", "$12,000")]),
                grid(&[("fl-2", "Established content website", "$13,000")]),
                grid(&[("fl-3", "Dropshipping storefront brand", "$14,000")]),
            ],
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::ListingScan {
                category: "saas".to_string(),
                max_pages: 3,
            },
            JobPriority::Normal,
            3,
        );
        ListingScanProcessor.process(&job, &ctx).await.unwrap();

        for id in ["fl-1", "fl-2", "fl-3"] {
            assert!(ctx.store.get_listing(id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn invalid_records_are_counted_not_fatal() {
        // absurd price fails plausibility validation
        let executor = FixtureExecutor {
            listing_pages: vec![grid(&[
                ("fl-1", "Profitable SaaS analytics tool", "$9,999,999,999"),
                ("fl-2", "Established content website", "$45,000"),
            ])],
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::ListingScan {
                category: "saas".to_string(),
                max_pages: 1,
            },
            JobPriority::Normal,
            3,
        );

        let outcome = ListingScanProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::ListingScan {
            listings_invalid,
            listings_saved,
            ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(listings_invalid, 1);
        assert_eq!(listings_saved, 1);
        assert!(ctx.store.get_listing("fl-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn infrastructure_failure_propagates_for_retry() {
        let executor = FixtureExecutor {
            fail_with: Some(ExtractorError::Timeout("listings".into())),
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::ListingScan {
                category: "saas".to_string(),
                max_pages: 1,
            },
            JobPriority::Normal,
            3,
        );

        let err = ListingScanProcessor.process(&job, &ctx).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn session_contention_fails_fast() {
        let executor = FixtureExecutor::default();
        let ctx = context(executor).await;
        let _held = ctx.sessions.start("other_job").unwrap();

        let job = Job::new(
            JobConfig::ListingScan {
                category: "saas".to_string(),
                max_pages: 1,
            },
            JobPriority::Normal,
            3,
        );
        let err = ListingScanProcessor.process(&job, &ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Session(_)));
        assert!(err.is_retryable());
    }
}
