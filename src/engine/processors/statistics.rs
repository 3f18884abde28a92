//! Statistics calculation processor
//!
//! Aggregates daily per-industry statistics from current listings. With an
//! industry given it aggregates just that one; without, it iterates every
//! active category, isolating per-industry failures into the outcome
//! breakdown instead of aborting the run.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::job::{IndustryOutcome, Job, JobConfig, JobOutcome, JobType};
use crate::engine::error::EngineError;
use crate::engine::processors::{JobProcessor, ProcessorContext};

pub struct StatisticsProcessor;

impl StatisticsProcessor {
    async fn aggregate_one(
        ctx: &ProcessorContext,
        industry: &str,
        date: chrono::NaiveDate,
    ) -> Result<(), sqlx::Error> {
        let stats = ctx.store.compute_industry_stats(industry, date).await?;
        ctx.store.upsert_industry_stats(&stats).await?;
        info!(
            industry,
            listing_count = stats.listing_count,
            "industry statistics upserted"
        );
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for StatisticsProcessor {
    fn job_type(&self) -> JobType {
        JobType::StatisticsCalc
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<JobOutcome, EngineError> {
        let JobConfig::StatisticsCalc { industry, date } = &job.config else {
            return Err(EngineError::Validation(
                "statistics_calc job carries a foreign config".to_string(),
            ));
        };
        let date = date.unwrap_or_else(|| Utc::now().date_naive());

        let industries = match industry {
            Some(industry) => vec![industry.clone()],
            // full run: every category that still has active listings.
            // A failing listing query here is an infrastructure failure.
            None => ctx.store.active_categories().await?,
        };

        let mut breakdown = Vec::with_capacity(industries.len());
        for industry in &industries {
            match Self::aggregate_one(ctx, industry, date).await {
                Ok(()) => breakdown.push(IndustryOutcome {
                    industry: industry.clone(),
                    success: true,
                    error: None,
                }),
                Err(e) => {
                    warn!(industry, error = %e, "industry aggregation failed, continuing");
                    ctx.monitor
                        .record_error(&e.to_string(), "statistics_calc");
                    breakdown.push(IndustryOutcome {
                        industry: industry.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let succeeded = breakdown.iter().filter(|o| o.success).count();
        let failed = breakdown.len() - succeeded;
        Ok(JobOutcome::StatisticsCalc {
            industries_processed: breakdown.len(),
            succeeded,
            failed,
            breakdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobPriority;
    use crate::domain::listing::ListingRecord;
    use crate::engine::processors::test_support::{context, FixtureExecutor};
    use serde_json::json;

    fn listing(id: &str, category: &str, price: f64) -> ListingRecord {
        let mut rec = ListingRecord::new(id, format!("Listing {id}"), category);
        rec.url = format!("/listing/{id}");
        rec.asking_price = Some(price);
        rec.raw_snapshot = json!({"id": id});
        rec
    }

    #[tokio::test]
    async fn single_industry_aggregation() {
        let ctx = context(FixtureExecutor::default()).await;
        ctx.store
            .save_listings(&[
                listing("a", "saas", 1_000.0),
                listing("b", "saas", 3_000.0),
                listing("c", "content", 2_000.0),
            ])
            .await;

        let job = Job::new(
            JobConfig::StatisticsCalc {
                industry: Some("saas".to_string()),
                date: None,
            },
            JobPriority::Low,
            3,
        );
        let outcome = StatisticsProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::StatisticsCalc {
            industries_processed,
            succeeded,
            failed,
            ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(industries_processed, 1);
        assert_eq!(succeeded, 1);
        assert_eq!(failed, 0);
    }

    #[tokio::test]
    async fn full_run_covers_every_active_category() {
        let ctx = context(FixtureExecutor::default()).await;
        ctx.store
            .save_listings(&[
                listing("a", "saas", 1_000.0),
                listing("b", "content", 2_000.0),
                listing("c", "ecommerce", 4_000.0),
            ])
            .await;

        let job = Job::new(
            JobConfig::StatisticsCalc {
                industry: None,
                date: None,
            },
            JobPriority::Low,
            3,
        );
        let outcome = StatisticsProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::StatisticsCalc {
            industries_processed,
            succeeded,
            breakdown,
            ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(industries_processed, 3);
        assert_eq!(succeeded, 3);
        let mut names: Vec<&str> = breakdown.iter().map(|o| o.industry.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["content", "ecommerce", "saas"]);
    }

    #[tokio::test]
    async fn empty_store_yields_empty_breakdown_not_error() {
        let ctx = context(FixtureExecutor::default()).await;
        let job = Job::new(
            JobConfig::StatisticsCalc {
                industry: None,
                date: None,
            },
            JobPriority::Low,
            3,
        );
        let outcome = StatisticsProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::StatisticsCalc {
            industries_processed,
            ..
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(industries_processed, 0);
    }
}
