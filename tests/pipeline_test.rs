//! End-to-end tests of one comment crawl cycle
//!
//! A mock review site serves two comment pages; the crawl is fired through
//! the registry, its feedback adapts the schedule and the crawled pages are
//! preprocessed afterwards.

mod common;

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cinetrack::config::Config;
use cinetrack::crawler::{CommentRecord, HttpPageFetcher};
use cinetrack::dispatch::{AppContext, DispatchTable, PreprocessJob};
use cinetrack::preprocess::Preprocessor;
use cinetrack::scheduler::{
    DayInterval, ExecutorPools, FeedbackLoop, FeedbackSample, JobArgs, JobKind, JobRegistry, ScheduleStore,
};

async fn mock_site(total: u64, users: &[&str]) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movie/subject/7/comments"))
        .and(query_param("start", "0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(common::comment_page_html(Some(total), users)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/movie/subject/7/comments"))
        .and(query_param("start", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::comment_page_html(None, &[])))
        .mount(&server)
        .await;

    server
}

fn context(config: Config, server: &MockServer) -> (AppContext, mpsc::Receiver<FeedbackSample>) {
    let movies = common::write_movie_list(&config, &[(7, 100)]).into_shared();
    let store = ScheduleStore::new(config.storage.schedule_file()).into_shared();
    let fetcher = HttpPageFetcher::from_config(&config.crawler)
        .unwrap()
        .with_base_url(&server.uri());
    let (feedback_tx, feedback_rx) = mpsc::channel(16);

    let ctx = AppContext {
        config: Arc::new(config),
        movies,
        store,
        registry: Arc::new(JobRegistry::new(ExecutorPools::default(), 0)),
        fetcher: Arc::new(fetcher),
        feedback_tx,
    };
    (ctx, feedback_rx)
}

#[tokio::test]
async fn test_crawl_cycle_adapts_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let server = mock_site(600, &["alice", "bob"]).await;
    let (ctx, feedback_rx) = context(common::test_config(dir.path()), &server);
    let table = DispatchTable::build(&ctx);

    {
        let mut store = ctx.store.write().await;
        store.full_recompute(&["comment_crawl_7".to_string()], 30);
        ctx.registry
            .reconcile(&store, table.as_ref(), JobKind::CommentCrawl)
            .await;
    }
    assert_eq!(
        ctx.registry.args_of("comment_crawl_7").await.unwrap(),
        JobArgs::comment_crawl(7, 100)
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feedback = FeedbackLoop::new(ctx.store.clone(), ctx.config.scheduler.interval_policy())
        .with_registry(ctx.registry.clone(), table.clone());
    let feedback_task = tokio::spawn(feedback.run(feedback_rx, shutdown_rx));

    let run = ctx.registry.run_now("comment_crawl_7").await.unwrap().unwrap();
    run.await.unwrap();

    // The feedback loop replaces the registration once the interval is stored
    let expected_args = JobArgs::comment_crawl(7, 600);
    for _ in 0..100 {
        if ctx.registry.args_of("comment_crawl_7").await.as_ref() == Some(&expected_args) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(ctx.registry.args_of("comment_crawl_7").await, Some(expected_args));

    // 1000 / (600 - 100) + 1 = 3
    let descriptor = ctx.store.read().await.get("comment_crawl_7").unwrap();
    assert_eq!(descriptor.day_interval, DayInterval::every(3));
    assert!(ctx
        .registry
        .trigger_of("comment_crawl_7")
        .await
        .unwrap()
        .describe()
        .contains("*/3"));

    assert_eq!(
        ctx.movies.read().await.get(7).unwrap().last_crawl_total_comment_count,
        600
    );
    assert_eq!(ctx.registry.run_count("comment_crawl_7").await, Some(1));

    let persisted = ScheduleStore::load(ctx.config.storage.schedule_file()).unwrap();
    assert_eq!(persisted.get("comment_crawl_7").unwrap().day_interval, DayInterval::every(3));

    shutdown_tx.send(true).unwrap();
    feedback_task.await.unwrap();
    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_crawled_pages_are_preprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let server = mock_site(2, &["alice", "bob"]).await;
    let (ctx, mut feedback_rx) = context(common::test_config(dir.path()), &server);
    let table = DispatchTable::build(&ctx);

    let handler = table.handler(JobKind::CommentCrawl).unwrap();
    handler
        .run("comment_crawl_7", &JobArgs::comment_crawl(7, 100))
        .await
        .unwrap();

    let sample = feedback_rx.try_recv().unwrap();
    assert_eq!((sample.previous_count, sample.current_count), (100, 2));

    let today = Local::now().date_naive();
    let report = PreprocessJob::new(&ctx).run_for_date(today).await.unwrap();
    assert_eq!(report.combined, 1);
    assert_eq!(report.merged, 1);

    let merged_path = Preprocessor::from_config(&ctx.config.storage).merged_path(7);
    let merged: Vec<CommentRecord> =
        serde_json::from_str(&std::fs::read_to_string(merged_path).unwrap()).unwrap();
    let users: Vec<_> = merged.iter().map(|r| r.user_name.as_str()).collect();
    assert_eq!(users, vec!["alice", "bob"]);

    ctx.registry.shutdown().await;
}

#[tokio::test]
async fn test_failed_crawl_sends_no_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (ctx, mut feedback_rx) = context(common::test_config(dir.path()), &server);
    let table = DispatchTable::build(&ctx);

    let result = table
        .handler(JobKind::CommentCrawl)
        .unwrap()
        .run("comment_crawl_7", &JobArgs::comment_crawl(7, 100))
        .await;

    assert!(result.is_err());
    assert!(feedback_rx.try_recv().is_err());
    assert_eq!(
        ctx.movies.read().await.get(7).unwrap().last_crawl_total_comment_count,
        100
    );

    ctx.registry.shutdown().await;
}
