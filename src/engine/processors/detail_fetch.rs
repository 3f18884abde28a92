//! Detail fetch processor
//!
//! Fetches one listing's detail page, extracts the full record, validates
//! and normalizes it, then upserts through the dedup store. Validation
//! failures are reported in the outcome - they are data problems, not job
//! failures - so the job completes either way.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::health::{ExtractionResult, ExtractionStatus};
use crate::domain::job::{Job, JobConfig, JobOutcome, JobType};
use crate::domain::listing::{ListingRecord, ListingStatus};
use crate::engine::error::EngineError;
use crate::engine::processors::{ensure_selector, JobProcessor, ProcessorContext, LISTING_FIELDS};
use crate::infrastructure::extractor::ExtractorError;
use crate::selector::discovery::{parse_currency, parse_multiple};
use crate::selector::{CurrentResult, PageSnapshot};

pub struct DetailFetchProcessor;

impl DetailFetchProcessor {
    /// Extracts the full record from a detail page. Detail pages carry one
    /// listing, so the first match per field wins.
    fn extract_detail(
        ctx: &ProcessorContext,
        listing_id: &str,
        url: &str,
        page: &PageSnapshot,
    ) -> ListingRecord {
        let mut values: Vec<(&'static str, Option<String>)> = Vec::new();
        for data_type in LISTING_FIELDS {
            let value = ensure_selector(ctx, page, data_type).and_then(|candidate| {
                let mut found = page.select_text(&candidate.expression).into_iter().next();
                if found.is_none() {
                    // the selector learned on listing pages can go blind on
                    // detail markup; evolution relocates the field before
                    // the miss is scored
                    let reports = ctx.generator.evolve_selectors(
                        &[CurrentResult {
                            data_type,
                            expression: candidate.expression.clone(),
                            extracted: Vec::new(),
                        }],
                        &[],
                        page,
                    );
                    if let Some(replacement) =
                        reports.into_iter().next().and_then(|r| r.replacement)
                    {
                        found = page
                            .select_text(&replacement.expression)
                            .into_iter()
                            .next();
                    }
                }
                let status = if found.is_some() {
                    ctx.generator.record_success(data_type);
                    ExtractionStatus::Success
                } else {
                    ctx.generator.record_failure(data_type);
                    ExtractionStatus::Failed
                };
                ctx.monitor.record_extraction_result(ExtractionResult::new(
                    data_type.as_str(),
                    candidate.strategy.clone(),
                    status,
                ));
                found
            });
            values.push((data_type.as_str(), value));
        }
        let field = |name: &str| -> Option<String> {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, v)| v.clone())
        };

        let mut record = ListingRecord::new(listing_id, field("title").unwrap_or_default(), "");
        record.url = url.to_string();
        record.asking_price = field("price").as_deref().and_then(parse_currency);
        record.monthly_revenue = field("revenue").as_deref().and_then(parse_currency);
        record.profit_multiple = field("multiple").as_deref().and_then(parse_multiple);
        record.listing_status = field("status")
            .as_deref()
            .and_then(ListingStatus::parse_lenient)
            .unwrap_or(ListingStatus::Active);
        record.raw_snapshot = json!({
            "fields": values
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect::<std::collections::HashMap<_, _>>(),
            "url": url,
        });
        record
    }
}

#[async_trait]
impl JobProcessor for DetailFetchProcessor {
    fn job_type(&self) -> JobType {
        JobType::DetailFetch
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<JobOutcome, EngineError> {
        let JobConfig::DetailFetch { listing_id, url } = &job.config else {
            return Err(EngineError::Validation(
                "detail_fetch job carries a foreign config".to_string(),
            ));
        };

        let _session = ctx.sessions.start("detail_fetch")?;
        let started = Instant::now();
        let page = match ctx.executor.fetch_detail(url).await {
            Ok(page) => page,
            Err(e) => {
                let timed_out = matches!(e, ExtractorError::Timeout(_));
                ctx.monitor.record_performance(started.elapsed(), timed_out);
                return Err(e.into());
            }
        };
        ctx.monitor.record_performance(started.elapsed(), false);

        let mut record = Self::extract_detail(ctx, listing_id, url, &page);

        // keep the category the listing was first seen under
        if let Ok(Some(existing)) = ctx.store.get_listing(listing_id).await {
            record.category = existing.category;
            record.verified = existing.verified;
        }

        if let Err(issues) = record.validate() {
            let errors: Vec<String> = issues.iter().map(ToString::to_string).collect();
            for error in &errors {
                ctx.monitor.record_error(error, "detail_fetch/validate");
            }
            debug!(listing_id = %listing_id, ?errors, "detail record failed validation");
            return Ok(JobOutcome::DetailFetch {
                success: false,
                listing_id: listing_id.clone(),
                errors,
            });
        }

        record.normalize();
        let stats = ctx.store.save_listings(&[record]).await;
        if stats.errors > 0 {
            // single-record batch: a counted error means nothing was saved
            return Ok(JobOutcome::DetailFetch {
                success: false,
                listing_id: listing_id.clone(),
                errors: vec!["persistence error during upsert".to_string()],
            });
        }

        info!(listing_id = %listing_id, "detail fetch upserted listing");
        Ok(JobOutcome::DetailFetch {
            success: true,
            listing_id: listing_id.clone(),
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobPriority;
    use crate::engine::processors::test_support::{context, FixtureExecutor};

    const DETAIL: &str = r#"
        <html><body>
          <div class="listing-detail">
            <h1 class="listing-title">Profitable SaaS analytics tool</h1>
            <span class="price">$120,000</span>
            <span class="revenue">$5,000</span>
            <span class="multiple">3.2x</span>
            <span class="state">Under Offer</span>
          </div>
        </body></html>
    "#;

    fn detail_job(listing_id: &str) -> Job {
        Job::new(
            JobConfig::DetailFetch {
                listing_id: listing_id.to_string(),
                url: format!("/listing/{listing_id}"),
            },
            JobPriority::High,
            3,
        )
    }

    #[tokio::test]
    async fn detail_fetch_upserts_normalized_record() {
        let executor = FixtureExecutor {
            detail: DETAIL.to_string(),
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        // listing was first seen by a scan under "saas"
        let mut seeded = crate::domain::listing::ListingRecord::new(
            "fl-1",
            "Profitable SaaS analytics tool",
            "saas",
        );
        seeded.url = "/listing/fl-1".to_string();
        seeded.asking_price = Some(120_000.0);
        ctx.store.save_listings(&[seeded]).await;

        let outcome = DetailFetchProcessor
            .process(&detail_job("fl-1"), &ctx)
            .await
            .unwrap();
        let JobOutcome::DetailFetch {
            success, errors, ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert!(success, "errors: {errors:?}");

        let stored = ctx.store.get_listing("fl-1").await.unwrap().unwrap();
        assert_eq!(stored.category, "saas");
        assert_eq!(stored.monthly_revenue, Some(5_000.0));
        assert_eq!(stored.listing_status, ListingStatus::UnderOffer);
    }

    #[tokio::test]
    async fn validation_failure_reports_errors_without_throwing() {
        // empty page: no title extractable
        let executor = FixtureExecutor::default();
        let ctx = context(executor).await;

        let outcome = DetailFetchProcessor
            .process(&detail_job("fl-9"), &ctx)
            .await
            .unwrap();
        let JobOutcome::DetailFetch {
            success, errors, ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert!(!success);
        assert!(!errors.is_empty());
    }

    #[tokio::test]
    async fn network_failure_is_a_job_failure() {
        let executor = FixtureExecutor {
            fail_with: Some(ExtractorError::Network("unreachable".into())),
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let err = DetailFetchProcessor
            .process(&detail_job("fl-1"), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
