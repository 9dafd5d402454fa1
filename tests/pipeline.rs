//! End-to-end pipeline runs.
//!
//! Run with: cargo test --test pipeline --features sqlite
//!
//! WooCommerce and the geocoding service are served by wiremock, orders
//! land in an in-memory SQLite database and the checkpoint lives in a temp
//! directory.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use order_etl::checkpoint::{CheckpointStore, FixedClock};
use order_etl::config::Config;
use order_etl::pipeline::{CheckpointStatus, Pipeline};
use order_etl::storage::{SqliteOrderSink, TableName};
use order_etl::utils::retry::RecordingSleeper;

struct Environment {
    shop: MockServer,
    geocoder: MockServer,
    pool: SqlitePool,
    dir: TempDir,
}

impl Environment {
    async fn start() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite");

        Self {
            shop: MockServer::start().await,
            geocoder: MockServer::start().await,
            pool,
            dir: TempDir::new().unwrap(),
        }
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("other").join("last_extraction_time.json")
    }

    fn pipeline(&self, now: DateTime<Utc>) -> Pipeline {
        let mut config = Config::for_test(&self.shop.uri(), "sqlite::memory:");
        config.geocoding.endpoint = format!("{}/postcodes", self.geocoder.uri());
        config.checkpoint.path = self.checkpoint_path();

        let sink = SqliteOrderSink::new(
            self.pool.clone(),
            TableName::new(None, "customer_orders"),
            config.storage.batch_size,
        );
        Pipeline::from_config(
            &config,
            Arc::new(sink),
            Arc::new(RecordingSleeper::new()),
            Arc::new(FixedClock(now)),
        )
        .unwrap()
    }

    async fn serve_orders(&self, page: u32, body: Value) {
        Mock::given(method("GET"))
            .and(path("/orders"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.shop)
            .await;
    }

    async fn count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM customer_orders")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn shop_orders() -> Value {
    json!([
        {
            "id": 101,
            "status": "completed",
            "date_created": "2024-01-03T10:00:00",
            "date_modified": "2024-01-03T11:00:00",
            "customer_id": 42,
            "total": "25.00",
            "billing": {"email": "someone@example.com"},
            "shipping": {"postcode": "sw1a 1aa"},
            "line_items": [
                {"product_id": 11, "name": "Blue Mug", "quantity": 2, "price": 10.0, "sku": "MUG-B"}
            ]
        },
        {
            "id": 102,
            "status": "processing",
            "date_created": "2024-01-02T09:00:00",
            "customer_id": 0,
            "billing": {"email": " Guest@Example.com "},
            "shipping": {"postcode": "ZZ99 9ZZ"},
            "line_items": []
        }
    ])
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 22, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn test_full_run_loads_enriched_orders_and_advances_checkpoint() {
    let env = Environment::start().await;
    env.serve_orders(1, shop_orders()).await;
    env.serve_orders(2, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/postcodes"))
        .and(body_json(json!({"postcodes": ["SW1A 1AA", "ZZ99 9ZZ"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "result": [
                {"query": "SW1A 1AA", "result": {"latitude": 51.501009, "longitude": -0.141588}},
                {"query": "ZZ99 9ZZ", "result": null}
            ]
        })))
        .expect(1)
        .mount(&env.geocoder)
        .await;

    let report = env.pipeline(now()).run().await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.postcodes_resolved, 1);
    assert_eq!(report.postcodes_unresolved, 1);
    assert!(report.extraction_complete());

    let watermark = Utc.with_ymd_and_hms(2025, 8, 22, 11, 58, 0).unwrap();
    assert_eq!(report.checkpoint, CheckpointStatus::Advanced(watermark));
    let persisted = std::fs::read_to_string(env.checkpoint_path()).unwrap();
    assert!(persisted.contains("2025-08-22T11:58:00Z"));

    let (latitude, longitude, is_guest): (Option<f64>, Option<f64>, bool) = sqlx::query_as(
        "SELECT latitude, longitude, is_guest FROM customer_orders WHERE order_id = 101",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(latitude, Some(51.5));
    assert_eq!(longitude, Some(-0.14));
    assert!(!is_guest);

    let (identifier, latitude): (Option<String>, Option<f64>) = sqlx::query_as(
        "SELECT customer_identifier, latitude FROM customer_orders WHERE order_id = 102",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(identifier.map(|id| id.len()), Some(64));
    assert_eq!(latitude, None);
}

#[tokio::test]
async fn test_rerun_over_same_window_is_idempotent() {
    let env = Environment::start().await;
    env.serve_orders(1, shop_orders()).await;
    env.serve_orders(2, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/postcodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "result": []
        })))
        .mount(&env.geocoder)
        .await;

    env.pipeline(now()).run().await.unwrap();
    let later = Utc.with_ymd_and_hms(2025, 8, 22, 13, 0, 0).unwrap();
    let second = env.pipeline(later).run().await.unwrap();

    assert_eq!(env.count().await, 2);
    assert_eq!(
        second.since,
        Some(Utc.with_ymd_and_hms(2025, 8, 22, 11, 58, 0).unwrap())
    );
    assert_eq!(
        CheckpointStore::new(env.checkpoint_path()).read().await,
        Some(Utc.with_ymd_and_hms(2025, 8, 22, 12, 58, 0).unwrap())
    );
}

#[tokio::test]
async fn test_geocoder_outage_still_loads_orders() {
    let env = Environment::start().await;
    env.serve_orders(1, shop_orders()).await;
    env.serve_orders(2, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/postcodes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&env.geocoder)
        .await;

    let report = env.pipeline(now()).run().await.unwrap();

    assert_eq!(report.upserted, 2);
    assert_eq!(report.postcodes_resolved, 0);
    let located: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM customer_orders WHERE latitude IS NOT NULL")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(located, 0);
}

#[tokio::test]
async fn test_empty_window_creates_nothing() {
    let env = Environment::start().await;
    env.serve_orders(1, json!([])).await;

    let report = env.pipeline(now()).run().await.unwrap();

    assert_eq!(report.checkpoint, CheckpointStatus::Unchanged);
    assert!(!env.checkpoint_path().exists());
    assert!(env.geocoder.received_requests().await.unwrap().is_empty());
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'customer_orders'",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(tables, 0);
}
