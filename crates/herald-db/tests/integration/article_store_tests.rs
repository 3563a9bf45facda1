use chrono::{TimeZone, Utc};
use herald_core::models::{
    FetchMethod, NewsMetadata, ScrapeResult, ScrapeStatus, ScrapedArticle, Stage, compute_hash,
};

use crate::integration::common::setup_test_db;

fn metadata(id: &str, url: &str) -> NewsMetadata {
    NewsMetadata {
        news_id: id.into(),
        news_url: url.into(),
        title: Some(format!("Title {id}")),
        source_name: Some("CoinDesk".into()),
        published_at: Some(Utc.with_ymd_and_hms(2024, 3, 11, 9, 30, 0).unwrap()),
    }
}

#[tokio::test]
async fn upsert_metadata_marks_rows_pending_for_scrape() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();

    let rows = vec![
        metadata("n1", "https://example.com/a"),
        metadata("n2", "https://example.com/b"),
    ];
    assert_eq!(repo.upsert_metadata(&rows).await.unwrap(), 2);

    let pending = repo.pending(Stage::Scraped).await.unwrap();
    let mut ids: Vec<_> = pending.iter().map(|m| m.news_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["n1", "n2"]);
    assert_eq!(pending[0].source_name.as_deref(), Some("CoinDesk"));

    let status = repo.get_status("n1").await.unwrap().unwrap();
    assert!(status.metadata_fetched);
    assert!(!status.scraped);

    // Nothing is scraped yet, so nothing is ready for cleaning.
    assert!(repo.pending(Stage::Cleaned).await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_metadata_updates_existing_row() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();

    repo.upsert_metadata(&[metadata("n1", "https://example.com/old")])
        .await
        .unwrap();
    let mut updated = metadata("n1", "https://example.com/new");
    updated.title = Some("Renamed".into());
    repo.upsert_metadata(&[updated]).await.unwrap();

    let pending = repo.pending(Stage::Scraped).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].news_url, "https://example.com/new");
    assert_eq!(pending[0].title.as_deref(), Some("Renamed"));
}

#[tokio::test]
async fn upsert_scraped_inserts_then_updates() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();
    let meta = metadata("n1", "https://example.com/a");
    repo.upsert_metadata(std::slice::from_ref(&meta)).await.unwrap();

    let failed = ScrapeResult::failed("https://example.com/a", ScrapeStatus::Timeout, Some(90.0));
    let row = ScrapedArticle::from_result(&meta, &failed, Utc::now());
    assert_eq!(repo.upsert_scraped(&[row]).await.unwrap(), 1);

    let stored = repo.get_scraped("n1").await.unwrap().unwrap();
    assert_eq!(stored.status, "timeout");
    assert!(stored.full_text.is_none());
    assert_eq!(stored.elapsed_seconds, Some(90.0));

    let text = "Bitcoin rallied on ETF inflows.".to_string();
    let accepted = ScrapeResult::accepted(
        "https://example.com/a",
        text.clone(),
        5,
        FetchMethod::Reliable,
        3.5,
        0.05,
    );
    let row = ScrapedArticle::from_result(&meta, &accepted, Utc::now());
    assert_eq!(repo.upsert_scraped(&[row]).await.unwrap(), 1);

    let stored = repo.get_scraped("n1").await.unwrap().unwrap();
    assert_eq!(stored.status, "accepted");
    assert_eq!(stored.full_text.as_deref(), Some(text.as_str()));
    assert_eq!(stored.word_count, Some(5));
    assert_eq!(stored.fetch_method, Some(FetchMethod::Reliable));
    assert_eq!(stored.spam_score, Some(0.05));
    assert_eq!(stored.content_hash, Some(compute_hash(&text)));
    assert_eq!(stored.published_at, meta.published_at);
}

#[tokio::test]
async fn rejected_rows_keep_rejected_text_only() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();
    let meta = metadata("n1", "https://example.com/a");

    let spam = ScrapeResult::rejected_spam(
        "https://example.com/a",
        "BUY NOW!!!".into(),
        60,
        FetchMethod::Fast,
        0.4,
        0.8,
    );
    let row = ScrapedArticle::from_result(&meta, &spam, Utc::now());
    repo.upsert_scraped(&[row]).await.unwrap();

    let stored = repo.get_scraped("n1").await.unwrap().unwrap();
    assert_eq!(stored.status, "high spam score");
    assert!(stored.full_text.is_none());
    assert_eq!(stored.rejected_text.as_deref(), Some("BUY NOW!!!"));
    assert!(stored.content_hash.is_none());
}

#[tokio::test]
async fn mark_stage_removes_rows_from_pending() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();
    repo.upsert_metadata(&[
        metadata("n1", "https://example.com/a"),
        metadata("n2", "https://example.com/b"),
        metadata("n3", "https://example.com/c"),
    ])
    .await
    .unwrap();

    let marked = repo
        .mark_stage(&["n1".to_string(), "n3".to_string()], Stage::Scraped)
        .await
        .unwrap();
    assert_eq!(marked, 2);

    let pending = repo.pending(Stage::Scraped).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].news_id, "n2");

    let ready_to_clean = repo.pending(Stage::Cleaned).await.unwrap();
    assert_eq!(ready_to_clean.len(), 2);

    assert_eq!(repo.mark_stage(&[], Stage::Scraped).await.unwrap(), 0);
}

#[tokio::test]
async fn status_counts_tally_each_flag() {
    let (db, _container) = setup_test_db().await;
    let repo = db.articles();

    let empty = repo.status_counts().await.unwrap();
    assert_eq!(empty.total, 0);

    repo.upsert_metadata(&[
        metadata("n1", "https://example.com/a"),
        metadata("n2", "https://example.com/b"),
    ])
    .await
    .unwrap();
    repo.mark_stage(&["n1".to_string()], Stage::Scraped)
        .await
        .unwrap();

    let counts = repo.status_counts().await.unwrap();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.metadata_fetched, 2);
    assert_eq!(counts.scraped, 1);
    assert_eq!(counts.cleaned, 0);
    assert_eq!(counts.llm_processed, 0);
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.articles().health_check().await.unwrap();
}
