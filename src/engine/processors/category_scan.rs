//! Category scan processor
//!
//! Extracts the category list with per-category listing counts and fans
//! out one `listing_scan` job per active category, sized by the count and
//! capped by configuration.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::domain::job::{Job, JobConfig, JobOutcome, JobType};
use crate::engine::error::EngineError;
use crate::engine::processors::{JobProcessor, ProcessorContext};
use crate::engine::queue_manager::JobOptions;
use crate::infrastructure::extractor::ExtractorError;
use crate::selector::PageSnapshot;

// Category entries render as "Name (123)"
static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.{2,60}?)\s*\((\d+)\)$").expect("category regex"));

/// One category with its listing count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub name: String,
    pub slug: String,
    pub count: u32,
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Pulls category entries out of the overview snapshot
pub(crate) fn extract_categories(page: &PageSnapshot) -> Vec<CategoryCount> {
    let mut out: Vec<CategoryCount> = Vec::new();
    for el in page.elements() {
        if el.child_count > 1 {
            continue;
        }
        let Some(captures) = CATEGORY_RE.captures(&el.text) else {
            continue;
        };
        let name = captures[1].trim().to_string();
        // containers concatenate several entries; their tail still matches
        // the pattern but the name part keeps the inner counts
        if name.contains('(') || name.contains(')') {
            continue;
        }
        let Ok(count) = captures[2].parse::<u32>() else {
            continue;
        };
        let slug = slugify(&name);
        if slug.is_empty() || out.iter().any(|c| c.slug == slug) {
            continue;
        }
        out.push(CategoryCount { name, slug, count });
    }
    out
}

pub struct CategoryScanProcessor;

#[async_trait]
impl JobProcessor for CategoryScanProcessor {
    fn job_type(&self) -> JobType {
        JobType::CategoryScan
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<JobOutcome, EngineError> {
        let JobConfig::CategoryScan { page_size } = &job.config else {
            return Err(EngineError::Validation(
                "category_scan job carries a foreign config".to_string(),
            ));
        };
        let page_size = (*page_size).max(1);

        let _session = ctx.sessions.start("category_scan")?;
        let started = std::time::Instant::now();
        let page = match ctx.executor.fetch_categories().await {
            Ok(page) => page,
            Err(e) => {
                let timed_out = matches!(e, ExtractorError::Timeout(_));
                ctx.monitor.record_performance(started.elapsed(), timed_out);
                return Err(e.into());
            }
        };
        ctx.monitor.record_performance(started.elapsed(), false);

        let categories = extract_categories(&page);
        debug!(found = categories.len(), "category scan extracted categories");

        let mut jobs_queued = 0usize;
        for category in &categories {
            if category.count == 0 {
                continue;
            }
            let pages = category
                .count
                .div_ceil(page_size)
                .min(ctx.config.scan.max_pages_per_category);
            let config = JobConfig::ListingScan {
                category: category.slug.clone(),
                max_pages: pages,
            };
            match ctx.queue.add_job(config, JobOptions::default()).await {
                Ok(_) => jobs_queued += 1,
                Err(e) => ctx
                    .monitor
                    .record_error(&e.to_string(), "category_scan/enqueue"),
            }
        }

        info!(
            categories_found = categories.len(),
            jobs_queued, "category scan finished"
        );
        Ok(JobOutcome::CategoryScan {
            categories_found: categories.len(),
            jobs_queued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobPriority;
    use crate::engine::processors::test_support::{context, FixtureExecutor};

    const CATEGORIES: &str = r#"
        <html><body>
          <ul class="categories">
            <li><a href="/listings/saas">SaaS (120)</a></li>
            <li><a href="/listings/content">Content Sites (48)</a></li>
            <li><a href="/listings/ecommerce">eCommerce (0)</a></li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn extraction_parses_names_and_counts() {
        let page = PageSnapshot::from_html(CATEGORIES);
        let categories = extract_categories(&page);
        assert_eq!(categories.len(), 3);
        assert_eq!(categories[0].slug, "saas");
        assert_eq!(categories[0].count, 120);
        assert_eq!(categories[1].slug, "content-sites");
        assert_eq!(categories[2].count, 0);
    }

    #[test]
    fn slugs_are_lowercase_dashed() {
        assert_eq!(slugify("Content Sites"), "content-sites");
        assert_eq!(slugify("SaaS & Apps"), "saas-apps");
    }

    #[tokio::test]
    async fn active_categories_fan_out_capped_scan_jobs() {
        let executor = FixtureExecutor {
            categories: CATEGORIES.to_string(),
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::CategoryScan { page_size: 25 },
            JobPriority::Normal,
            3,
        );

        let outcome = CategoryScanProcessor.process(&job, &ctx).await.unwrap();
        let JobOutcome::CategoryScan {
            categories_found,
            jobs_queued,
        } = outcome
        else {
            panic!("wrong outcome variant");
        };
        assert_eq!(categories_found, 3);
        // the zero-count category queues nothing
        assert_eq!(jobs_queued, 2);

        let stats = ctx.queue.get_queue_stats().await;
        assert_eq!(stats.waiting, 2);
    }

    #[tokio::test]
    async fn page_count_is_ceil_of_count_over_page_size() {
        // 120 listings at 25 per page -> 5 pages; 48 -> 2 pages
        let executor = FixtureExecutor {
            categories: CATEGORIES.to_string(),
            ..FixtureExecutor::default()
        };
        let ctx = context(executor).await;
        let job = Job::new(
            JobConfig::CategoryScan { page_size: 25 },
            JobPriority::Normal,
            3,
        );
        CategoryScanProcessor.process(&job, &ctx).await.unwrap();

        let stats = ctx.queue.get_queue_stats().await;
        assert_eq!(stats.total, 2);
    }
}
