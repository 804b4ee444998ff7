mod observability;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tanggap_domain::DomainResult;
use tanggap_domain::engine::SyncEngine;
use tanggap_domain::pagination::{MAX_PAGE_SIZE, SubmissionQuery};
use tanggap_domain::submission::SubmissionStatus;
use tanggap_infra::config::AppConfig;
use tanggap_infra::identity::StaticIdentityProvider;
use tanggap_infra::logging::init_tracing;
use tanggap_infra::object_store::InMemoryObjectStore;
use tanggap_infra::record_store::{InMemoryRecordService, PushMode};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let push_mode = if config.push_id_only {
        PushMode::IdOnly
    } else {
        PushMode::FullRecord
    };
    let engine = SyncEngine::new(
        Arc::new(InMemoryRecordService::with_push_mode(push_mode)),
        Arc::new(StaticIdentityProvider::new(
            config.subject_id.clone(),
            config.subject_group_set(),
        )),
        Arc::new(InMemoryObjectStore::new()),
        config.engine_config(),
    );

    let actor = engine.current_actor().await?;
    info!(
        subject_id = %actor.subject_id,
        is_staff = actor.is_staff,
        push_mode = ?push_mode,
        "sync worker starting"
    );

    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.queue_poll_interval_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started = Instant::now();
                let result = scan(&engine).await;
                let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
                match result {
                    Ok(()) => observability::register_queue_scan("ok", elapsed_ms),
                    Err(err) => {
                        observability::register_queue_scan("error", elapsed_ms);
                        warn!(error = %err, "queue scan failed");
                    }
                }
                if let Some(rendered) = observability::render_metrics() {
                    debug!(bytes = rendered.len(), "metrics snapshot rendered");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("sync worker shutdown");
    Ok(())
}

/// Counts the submissions still awaiting staff and refreshes rating gauges.
async fn scan(engine: &SyncEngine) -> DomainResult<()> {
    let query = SubmissionQuery::all().excluding(SubmissionStatus::Resolved);
    let mut open = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = engine
            .fetch_page(&query, MAX_PAGE_SIZE, cursor.as_deref())
            .await?;
        open += page
            .items
            .iter()
            .filter(|submission| submission.status != SubmissionStatus::Rejected)
            .count();
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    observability::set_open_submissions(open);

    let summary = engine.rating_summary(None).await?;
    observability::set_rating_summary(summary.count, summary.average);
    info!(
        open_submissions = open,
        ratings = summary.count,
        average_rating = summary.average.unwrap_or_default(),
        "queue scanned"
    );
    Ok(())
}
