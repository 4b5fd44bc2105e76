use futures::StreamExt;
use serde_json::json;
use sqlsage::cache::ResultCache;
use sqlsage::config::CacheConfig;
use sqlsage::db::{DatabaseGateway, PolarsGateway, RowCount};
use sqlsage::metadata::{SchemaOverview, TableInfo};
use std::fs;
use std::path::PathBuf;

/// Write `orders.csv` with `n` rows into a fresh temp directory.
fn create_test_data(name: &str, n: usize) -> PathBuf {
    let data_dir = std::env::temp_dir().join(format!("sqlsage_{}_{}", name, std::process::id()));
    fs::create_dir_all(&data_dir).unwrap();
    let mut csv = String::from("order_id,customer,revenue\n");
    for i in 0..n {
        csv.push_str(&format!("{},customer_{},{}\n", i, i % 7, i * 10));
    }
    fs::write(data_dir.join("orders.csv"), csv).unwrap();
    data_dir
}

fn schema() -> SchemaOverview {
    SchemaOverview::from_tables(vec![TableInfo::named("orders")
        .with_description("Orders with revenue")
        .with_column("order_id", "integer", "")
        .with_column("customer", "text", "")
        .with_column("revenue", "integer", "")
        .with_path("orders.csv")])
}

#[tokio::test]
async fn test_csv_table_executes_sql() {
    let data_dir = create_test_data("execute", 12);
    let gateway = PolarsGateway::from_schema(&schema(), &data_dir).unwrap();

    let stream = gateway
        .execute("SELECT customer, revenue FROM orders WHERE revenue >= 50 ORDER BY revenue DESC")
        .await
        .unwrap();
    assert_eq!(stream.columns, vec!["customer", "revenue"]);
    let rows: Vec<_> = stream.rows.collect().await;
    assert_eq!(rows.len(), 7);
    let first = rows[0].as_ref().unwrap();
    assert_eq!(first, &vec![json!("customer_4"), json!(110)]);

    fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn test_rows_stream_across_slices() {
    let data_dir = create_test_data("slices", 700);
    let gateway = PolarsGateway::from_schema(&schema(), &data_dir).unwrap();

    let stream = gateway.execute("SELECT order_id FROM orders").await.unwrap();
    let rows: Vec<_> = stream.rows.collect().await;
    assert_eq!(rows.len(), 700);
    assert!(rows.iter().all(|r| r.is_ok()));

    fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn test_probe_count_is_capped() {
    let data_dir = create_test_data("probe", 250);
    let gateway = PolarsGateway::from_schema(&schema(), &data_dir).unwrap();

    assert_eq!(
        gateway.probe_count("SELECT * FROM orders", 100).await.unwrap(),
        RowCount::MoreThan(100)
    );
    assert_eq!(
        gateway.probe_count("SELECT * FROM orders WHERE revenue < 500", 100).await.unwrap(),
        RowCount::Exact(50)
    );

    fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn test_cache_over_polars() {
    let data_dir = create_test_data("cache", 100);
    let gateway = PolarsGateway::from_schema(&schema(), &data_dir).unwrap();
    let cache = ResultCache::new(CacheConfig::default());

    let sql = "SELECT * FROM orders";
    let stream = gateway.execute(sql).await.unwrap();
    let id = cache.populate(sql, stream, &gateway).await.unwrap();
    let entry = cache.get(&id).unwrap();
    assert_eq!(entry.total, RowCount::Exact(100));
    assert_eq!(entry.preview.len(), 20);

    fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn test_bad_sql_is_execution_error() {
    let data_dir = create_test_data("bad_sql", 3);
    let gateway = PolarsGateway::from_schema(&schema(), &data_dir).unwrap();

    let err = gateway.execute("SELECT missing_column FROM orders").await.unwrap_err();
    assert_eq!(err.class(), "ExecutionError");

    fs::remove_dir_all(&data_dir).ok();
}
