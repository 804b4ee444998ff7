use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::gateway::RecordStoreGateway;
use crate::ports::record_store::{FilterClause, RecordFilter};
use crate::submission::{ServiceCategory, Submission, SubmissionStatus};

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 25;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionQuery {
    pub owner_id: Option<String>,
    pub category: Option<ServiceCategory>,
    pub statuses: Vec<SubmissionStatus>,
    pub exclude_status: Option<SubmissionStatus>,
    pub full_feedback_only: bool,
    pub min_rating: Option<u8>,
}

impl SubmissionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn in_category(mut self, category: ServiceCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = SubmissionStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn excluding(mut self, status: SubmissionStatus) -> Self {
        self.exclude_status = Some(status);
        self
    }

    pub fn full_feedback(mut self) -> Self {
        self.full_feedback_only = true;
        self
    }

    pub fn rated_at_least(mut self, rating: u8) -> Self {
        self.min_rating = Some(rating);
        self
    }

    pub fn server_filter(&self) -> RecordFilter {
        let mut filter = RecordFilter::new();
        if let Some(owner_id) = self.owner_id.as_deref() {
            filter = filter.and(FilterClause::eq("ownerId", owner_id));
        }
        if let Some(category) = self.category {
            filter = filter.and(FilterClause::eq("serviceCategory", category.as_str()));
        }
        if let Some(excluded) = self.exclude_status {
            filter = filter.and(FilterClause::ne("status", excluded.as_str()));
        }
        match self.statuses.as_slice() {
            [] => {}
            [status] => filter = filter.and(FilterClause::eq("status", status.as_str())),
            statuses if filter.is_empty() => {
                filter = filter.and(FilterClause::any_of(
                    "status",
                    statuses.iter().map(|status| status.as_str()),
                ));
            }
            _ => {}
        }
        filter
    }

    pub fn matches(&self, submission: &Submission) -> bool {
        self.owner_id
            .as_deref()
            .is_none_or(|owner_id| submission.owner_id == owner_id)
            && self
                .category
                .is_none_or(|category| submission.category == category)
            && (self.statuses.is_empty() || self.statuses.contains(&submission.status))
            && self
                .exclude_status
                .is_none_or(|excluded| submission.status != excluded)
            && (!self.full_feedback_only || submission.is_full_feedback())
            && self
                .min_rating
                .is_none_or(|min_rating| submission.rating.get() >= min_rating)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub items: Vec<Submission>,
    pub next_cursor: Option<String>,
}

/// `<skip>:<server cursor>`: a server chunk position plus how many of its raw
/// records the previous page already consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PageCursor {
    skip: usize,
    server: Option<String>,
}

impl PageCursor {
    fn parse(value: &str) -> DomainResult<Self> {
        let (skip, server) = value
            .split_once(':')
            .ok_or_else(|| DomainError::Validation("malformed page cursor".into()))?;
        let skip = skip
            .parse::<usize>()
            .map_err(|_| DomainError::Validation("malformed page cursor".into()))?;
        Ok(Self {
            skip,
            server: (!server.is_empty()).then(|| server.to_string()),
        })
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.skip, self.server.as_deref().unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct QueryAccumulator {
    gateway: RecordStoreGateway,
    chunk_size: usize,
}

impl QueryAccumulator {
    pub fn new(gateway: RecordStoreGateway, chunk_size: usize) -> Self {
        Self {
            gateway,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn fetch_page(
        &self,
        query: &SubmissionQuery,
        min_size: usize,
        cursor: Option<&str>,
    ) -> DomainResult<Page> {
        if !(1..=MAX_PAGE_SIZE).contains(&min_size) {
            return Err(DomainError::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let filter = query.server_filter();
        let mut position = cursor.map(PageCursor::parse).transpose()?.unwrap_or_default();
        let mut visited = HashSet::new();
        let mut items = Vec::with_capacity(min_size);

        loop {
            visited.insert(position.server.clone());
            let chunk = self
                .gateway
                .list_submissions(&filter, self.chunk_size, position.server.as_deref())
                .await?;

            let mut filled_at = None;
            for listed in chunk.items {
                if listed.position < position.skip || !query.matches(&listed.submission) {
                    continue;
                }
                items.push(listed.submission);
                if items.len() == min_size {
                    filled_at = Some(listed.position);
                    break;
                }
            }

            if let Some(last) = filled_at {
                let next = if last + 1 < chunk.raw_count {
                    Some(PageCursor {
                        skip: last + 1,
                        server: position.server,
                    })
                } else {
                    chunk.next_cursor.map(|server| PageCursor {
                        skip: 0,
                        server: Some(server),
                    })
                };
                return Ok(Page {
                    items,
                    next_cursor: next.as_ref().map(PageCursor::encode),
                });
            }

            let Some(server) = chunk.next_cursor else {
                return Ok(Page {
                    items,
                    next_cursor: None,
                });
            };
            if visited.contains(&Some(server.clone())) {
                warn!(cursor = %server, "record store returned a non-advancing cursor");
                return Ok(Page {
                    items,
                    next_cursor: None,
                });
            }
            debug!(collected = items.len(), wanted = min_size, "fetching next chunk");
            position = PageCursor {
                skip: 0,
                server: Some(server),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ReadRetryPolicy;
    use crate::ports::record_store::{
        EventKind, Precondition, RecordEvent, RecordList, RecordService, RecordType,
    };
    use crate::ports::{BoxFuture, BoxStream};
    use crate::submission::{self, SubmissionContent};
    use crate::testing::MemoryRecords;
    use crate::wire;
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn numbered(index: usize, full: bool) -> Submission {
        let content = if full {
            SubmissionContent {
                title: Some(format!("Feedback {index}")),
                description: Some("details".into()),
                ..SubmissionContent::default()
            }
        } else {
            SubmissionContent::rating_only()
        };
        let mut submission = submission::create(
            "owner-1",
            ServiceCategory::Cafeteria,
            (index % 5 + 1) as u8,
            content,
            1_000 + index as i64,
        )
        .unwrap();
        submission.id = format!("s-{index:03}");
        submission
    }

    async fn accumulator(store: &Arc<MemoryRecords>, chunk_size: usize) -> QueryAccumulator {
        QueryAccumulator::new(
            RecordStoreGateway::new(store.clone(), ReadRetryPolicy::no_retry()),
            chunk_size,
        )
    }

    fn ids(page: &Page) -> Vec<String> {
        page.items.iter().map(|item| item.id.clone()).collect()
    }

    #[tokio::test]
    async fn sparse_matches_are_paged_without_loss_or_duplication() {
        let store = Arc::new(MemoryRecords::default());
        for index in 0..40 {
            store.seed(&numbered(index, index % 4 == 0)).await;
        }
        let accumulator = accumulator(&store, 8).await;
        let query = SubmissionQuery::all().full_feedback();

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = accumulator
                .fetch_page(&query, 3, cursor.as_deref())
                .await
                .unwrap();
            assert!(page.items.len() <= 3);
            collected.extend(ids(&page));
            pages += 1;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let expected: Vec<String> = (0..40)
            .filter(|index| index % 4 == 0)
            .map(|index| format!("s-{index:03}"))
            .collect();
        assert_eq!(collected, expected);
        assert!(pages >= 4);
    }

    #[tokio::test]
    async fn one_in_four_survivors_fill_pages_of_twenty() {
        let store = Arc::new(MemoryRecords::default());
        for index in 0..200 {
            store.seed(&numbered(index, index % 4 == 0)).await;
        }
        let accumulator = accumulator(&store, 20).await;
        let query = SubmissionQuery::all().full_feedback();

        let mut sizes = Vec::new();
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = accumulator
                .fetch_page(&query, 20, cursor.as_deref())
                .await
                .unwrap();
            sizes.push(page.items.len());
            collected.extend(ids(&page));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let expected: Vec<String> = (0..200)
            .filter(|index| index % 4 == 0)
            .map(|index| format!("s-{index:03}"))
            .collect();
        assert_eq!(sizes, vec![20, 20, 10]);
        assert_eq!(collected, expected);
    }

    #[tokio::test]
    async fn empty_chunks_do_not_end_the_page() {
        let store = Arc::new(MemoryRecords::default());
        for index in 0..20 {
            store.seed(&numbered(index, false)).await;
        }
        store.seed(&numbered(20, true)).await;
        store.seed(&numbered(21, true)).await;
        let accumulator = accumulator(&store, 5).await;

        let page = accumulator
            .fetch_page(&SubmissionQuery::all().full_feedback(), 2, None)
            .await
            .unwrap();

        assert_eq!(ids(&page), vec!["s-020", "s-021"]);
        assert_eq!(page.next_cursor, None);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unused_survivors_are_served_by_the_next_page() {
        let store = Arc::new(MemoryRecords::default());
        for index in 0..6 {
            store.seed(&numbered(index, true)).await;
        }
        let accumulator = accumulator(&store, 10).await;
        let query = SubmissionQuery::for_owner("owner-1");

        let first = accumulator.fetch_page(&query, 4, None).await.unwrap();
        assert_eq!(ids(&first), vec!["s-000", "s-001", "s-002", "s-003"]);
        assert_eq!(first.next_cursor.as_deref(), Some("4:"));

        let second = accumulator
            .fetch_page(&query, 4, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["s-004", "s-005"]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn post_filter_applies_statuses_the_store_cannot() {
        let store = Arc::new(MemoryRecords::default());
        for index in 0..6 {
            let mut submission = numbered(index, true);
            submission.status = SubmissionStatus::ALL[index];
            store.seed(&submission).await;
        }
        let accumulator = accumulator(&store, 4).await;
        let query = SubmissionQuery::for_owner("owner-1")
            .with_statuses([SubmissionStatus::Resolved, SubmissionStatus::Rejected]);
        assert!(query.server_filter().is_supported());

        let page = accumulator.fetch_page(&query, 10, None).await.unwrap();

        assert_eq!(ids(&page), vec!["s-003", "s-004"]);
    }

    #[tokio::test]
    async fn page_size_and_cursor_are_validated() {
        let store = Arc::new(MemoryRecords::default());
        let accumulator = accumulator(&store, 4).await;

        for size in [0, MAX_PAGE_SIZE + 1] {
            let result = accumulator.fetch_page(&SubmissionQuery::all(), size, None).await;
            assert!(matches!(result, Err(DomainError::Validation(_))));
        }
        let result = accumulator
            .fetch_page(&SubmissionQuery::all(), 5, Some("not-a-cursor"))
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    struct StuckCursorService {
        calls: AtomicUsize,
    }

    impl RecordService for StuckCursorService {
        fn create(&self, _record_type: RecordType, input: &Value) -> BoxFuture<'_, DomainResult<Value>> {
            let input = input.clone();
            Box::pin(async move { Ok(input) })
        }

        fn get(&self, _record_type: RecordType, _id: &str) -> BoxFuture<'_, DomainResult<Option<Value>>> {
            Box::pin(async { Ok(None) })
        }

        fn list(
            &self,
            _record_type: RecordType,
            _filter: &RecordFilter,
            _limit: usize,
            _cursor: Option<&str>,
        ) -> BoxFuture<'_, DomainResult<RecordList>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(RecordList {
                    items: vec![wire::encode_submission(&numbered(1, false))?],
                    next_cursor: Some("stuck".into()),
                })
            })
        }

        fn update(
            &self,
            _record_type: RecordType,
            _partial: &Value,
            _precondition: Option<Precondition>,
        ) -> BoxFuture<'_, DomainResult<Value>> {
            Box::pin(async { Err(DomainError::NotFound) })
        }

        fn delete(&self, _record_type: RecordType, _id: &str) -> BoxFuture<'_, DomainResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _record_type: RecordType,
            _kind: EventKind,
            _filter: &RecordFilter,
        ) -> BoxFuture<'_, DomainResult<BoxStream<'static, RecordEvent>>> {
            Box::pin(async { Ok(Box::pin(futures_util::stream::empty()) as BoxStream<'static, RecordEvent>) })
        }
    }

    #[tokio::test]
    async fn non_advancing_cursor_ends_the_walk() {
        let service = Arc::new(StuckCursorService {
            calls: AtomicUsize::new(0),
        });
        let accumulator = QueryAccumulator::new(
            RecordStoreGateway::new(service.clone(), ReadRetryPolicy::no_retry()),
            4,
        );

        let page = accumulator
            .fetch_page(&SubmissionQuery::all().full_feedback(), 5, None)
            .await
            .unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mixed_filters_fall_back_to_post_filtering() {
        let query = SubmissionQuery::for_owner("owner-1")
            .with_statuses([SubmissionStatus::Submitted, SubmissionStatus::InProgress]);
        assert_eq!(query.server_filter(), RecordFilter::new().and(FilterClause::eq("ownerId", "owner-1")));

        let staff_queue = SubmissionQuery::all()
            .with_statuses([SubmissionStatus::Submitted, SubmissionStatus::InProgress]);
        assert!(matches!(
            staff_queue.server_filter().clauses.as_slice(),
            [FilterClause::AnyOf { .. }]
        ));
    }

    #[test]
    fn cursor_round_trips() {
        let cursor = PageCursor {
            skip: 3,
            server: Some("40".into()),
        };
        assert_eq!(PageCursor::parse(&cursor.encode()).unwrap(), cursor);
        assert_eq!(PageCursor::parse("0:").unwrap(), PageCursor::default());
    }
}
