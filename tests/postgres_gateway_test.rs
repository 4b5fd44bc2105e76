//! Runs against a live server: `DATABASE_URL=postgres://... cargo test -- --ignored`

use futures::StreamExt;
use sqlsage::db::{DatabaseGateway, PostgresGateway};

async fn gateway() -> PostgresGateway {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PostgresGateway::connect(&url, 2).await.unwrap()
}

#[tokio::test]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn test_empty_result_keeps_column_names() {
    let gateway = gateway().await;

    let stream = gateway
        .execute("SELECT 1 AS customer_id, 'x'::text AS name WHERE false")
        .await
        .unwrap();
    assert_eq!(stream.columns, vec!["customer_id", "name"]);
    assert_eq!(stream.reported_total, Some(0));
    assert_eq!(stream.rows.count().await, 0);
}

#[tokio::test]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn test_rows_decode_to_json() {
    let gateway = gateway().await;

    let stream = gateway
        .execute("SELECT g AS n, 'row ' || g AS label FROM generate_series(1, 3) AS g")
        .await
        .unwrap();
    assert_eq!(stream.columns, vec!["n", "label"]);
    let rows: Vec<_> = stream.rows.map(|r| r.unwrap()).collect().await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], vec![serde_json::json!(1), serde_json::json!("row 1")]);
}
