//! Database gateways
//!
//! `DatabaseGateway` executes SQL and answers bounded count probes. Two
//! engines are provided: PostgreSQL through sqlx and an embedded Polars SQL
//! context over CSV/Parquet files.

pub mod gateway;
pub mod polars_engine;
pub mod postgres;

pub use gateway::{DatabaseGateway, Row, RowCount, RowStream};
pub use polars_engine::PolarsGateway;
pub use postgres::PostgresGateway;
