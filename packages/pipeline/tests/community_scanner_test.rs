//! Integration tests for the community scanner against a real Postgres
//! instance and a mocked GraphQL endpoint.

mod common;

use std::sync::Arc;

use serde_json::json;
use sqlx::Row;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talos_core::community_scanner::CommunityScanner;
use talos_core::config::PipelineConfig;
use talos_core::domain::CommunityRescanMessage;
use talos_core::http::TokenRotatingClient;
use talos_core::worker::ConsumerPass;

fn edge(id: &str, typename: &str) -> serde_json::Value {
    json!({
        "node": {
            "id": id,
            "__typename": typename,
            "createdAt": "2026-01-01T00:00:00.000000+00:00",
        }
    })
}

async fn mock_homepage(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/home"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html>{"accessToken":"tok-abc"}</html>"#,
        ))
        .mount(server)
        .await;
}

/// A follow-up page with no edges at all, so pagination terminates
/// once the fixture page has been exhausted instead of looping forever
/// re-fetching the same page.
async fn mock_exhausted_page(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/gql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "subredditInfoByName": {
                    "elements": { "edges": [] }
                }
            }
        })))
        .with_priority(2)
        .mount(server)
        .await;
}

fn scanner_config(server: &MockServer) -> PipelineConfig {
    let mut config = common::test_config();
    config.homepage_url = format!("{}/home", server.uri());
    config.api_base_url = format!("{}/gql", server.uri());
    config
}

#[tokio::test]
async fn fresh_community_first_scan_persists_all_posts() {
    let pool = common::test_pool().await;
    common::truncate_all(&pool).await;
    common::insert_subscription(&pool, "rust", true).await;

    let server = MockServer::start().await;
    mock_homepage(&server).await;
    Mock::given(method("POST"))
        .and(path("/gql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "subredditInfoByName": {
                    "elements": {
                        "edges": [
                            edge("t3_new1", "SubredditPost"),
                            edge("t3_new2", "SubredditPost"),
                        ]
                    }
                }
            }
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_exhausted_page(&server).await;

    let http = Arc::new(TokenRotatingClient::new(
        "ua/1.0".into(),
        format!("{}/home", server.uri()),
        100,
    ));
    let scanner = CommunityScanner::new(pool.clone(), http, scanner_config(&server));

    let payload = serde_json::to_vec(&CommunityRescanMessage {
        community: "rust".to_string(),
    })
    .unwrap();
    scanner.handle_message(&payload).await.unwrap();

    let (post_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM initial_posts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(post_count, 2);

    let (rescan_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM community_rescans")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rescan_count, 1);

    let (pending_rescans,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM post_rescans WHERE began_processing = false")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(pending_rescans, 2);

    let row = sqlx::query("SELECT is_currently_queued FROM subscriptions WHERE community_name = $1")
        .bind("rust")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!row.get::<bool, _>("is_currently_queued"));
}

#[tokio::test]
async fn rescan_stops_at_previously_seen_post() {
    let pool = common::test_pool().await;
    common::truncate_all(&pool).await;
    common::insert_subscription(&pool, "rust", true).await;

    let (rescan_id,): (i64,) = sqlx::query_as(
        "INSERT INTO community_rescans (community_name, ran_at) VALUES ($1, NOW()) RETURNING id",
    )
    .bind("rust")
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO initial_posts (id, metadata, rescan_id) VALUES ($1, $2, $3)")
        .bind("t3_old")
        .bind(json!({"id": "t3_old"}))
        .bind(rescan_id)
        .execute(&pool)
        .await
        .unwrap();

    let server = MockServer::start().await;
    mock_homepage(&server).await;
    Mock::given(method("POST"))
        .and(path("/gql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "subredditInfoByName": {
                    "elements": {
                        "edges": [
                            edge("t3_new1", "SubredditPost"),
                            edge("t3_old", "SubredditPost"),
                            edge("t3_should_not_be_seen", "SubredditPost"),
                        ]
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let http = Arc::new(TokenRotatingClient::new(
        "ua/1.0".into(),
        format!("{}/home", server.uri()),
        100,
    ));
    let scanner = CommunityScanner::new(pool.clone(), http, scanner_config(&server));

    let payload = serde_json::to_vec(&CommunityRescanMessage {
        community: "rust".to_string(),
    })
    .unwrap();
    scanner.handle_message(&payload).await.unwrap();

    // Only the post before "t3_old" in the feed should have been collected
    // as new; "t3_old" and anything past it are excluded.
    let (new_post_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM initial_posts WHERE id = $1")
            .bind("t3_new1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(new_post_count, 1);

    let (stale_post_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM initial_posts WHERE id = $1")
            .bind("t3_should_not_be_seen")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stale_post_count, 0);
}

#[tokio::test]
async fn non_community_post_edges_are_filtered_out() {
    let pool = common::test_pool().await;
    common::truncate_all(&pool).await;
    common::insert_subscription(&pool, "rust", true).await;

    let server = MockServer::start().await;
    mock_homepage(&server).await;
    Mock::given(method("POST"))
        .and(path("/gql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "subredditInfoByName": {
                    "elements": {
                        "edges": [
                            edge("t3_real", "SubredditPost"),
                            edge("t5_comment", "Comment"),
                        ]
                    }
                }
            }
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_exhausted_page(&server).await;

    let http = Arc::new(TokenRotatingClient::new(
        "ua/1.0".into(),
        format!("{}/home", server.uri()),
        100,
    ));
    let scanner = CommunityScanner::new(pool.clone(), http, scanner_config(&server));

    let payload = serde_json::to_vec(&CommunityRescanMessage {
        community: "rust".to_string(),
    })
    .unwrap();
    scanner.handle_message(&payload).await.unwrap();

    let (post_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM initial_posts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(post_count, 1);
}
