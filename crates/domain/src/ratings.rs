use serde::Serialize;

use crate::DomainResult;
use crate::pagination::{MAX_PAGE_SIZE, QueryAccumulator, SubmissionQuery};
use crate::submission::{MAX_RATING, ServiceCategory, Submission};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RatingSummary {
    pub count: usize,
    pub average: Option<f64>,
    pub distribution: [usize; MAX_RATING as usize],
}

pub fn aggregate<'a, I>(submissions: I) -> RatingSummary
where
    I: IntoIterator<Item = &'a Submission>,
{
    let mut summary = RatingSummary::default();
    let mut total = 0u64;
    for submission in submissions {
        let rating = submission.rating.get();
        summary.distribution[usize::from(rating - 1)] += 1;
        summary.count += 1;
        total += u64::from(rating);
    }
    if summary.count > 0 {
        summary.average = Some(total as f64 / summary.count as f64);
    }
    summary
}

#[derive(Clone)]
pub struct RatingAggregator {
    accumulator: QueryAccumulator,
}

impl RatingAggregator {
    pub fn new(accumulator: QueryAccumulator) -> Self {
        Self { accumulator }
    }

    pub async fn summarize(&self, category: Option<ServiceCategory>) -> DomainResult<RatingSummary> {
        let query = match category {
            Some(category) => SubmissionQuery::all().in_category(category),
            None => SubmissionQuery::all(),
        };

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .accumulator
                .fetch_page(&query, MAX_PAGE_SIZE, cursor.as_deref())
                .await?;
            collected.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(aggregate(&collected))
    }
}
