//! PostgreSQL store tests
//!
//! Run with: cargo test --test postgres_store_test -- --ignored

mod common;

use common::{date, TestPostgres, FULTON};
use hexmarket_etl::models::{CountyAggregate, SalesMetrics};
use hexmarket_etl::store::Table;
use hexmarket_etl::{StoreLoader, TableStore};
use std::sync::Arc;

fn aggregate(period: &str, total: u64) -> CountyAggregate {
    CountyAggregate {
        county_id: FULTON,
        county_name: "Fulton".to_string(),
        period: period.to_string(),
        metrics: SalesMetrics {
            total_sales: total,
            median_price_per_sqft: Some(212.5),
            ..Default::default()
        },
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_replace_table_swaps_contents() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = Arc::new(pg.store(2));
    let loader = StoreLoader::new(store.clone(), 0.0, date("2026-10-18"));

    let first: Vec<_> = (1..=5).map(|m| aggregate(&format!("2026-0{}", m), m)).collect();
    let report = loader.load(&first).await.unwrap();
    assert_eq!(report.written, 5);
    assert_eq!(store.row_count(Table::CountyAggregates).await.unwrap(), 5);

    let second = vec![aggregate("2026-07", 9)];
    loader.load(&second).await.unwrap();
    assert_eq!(store.row_count(Table::CountyAggregates).await.unwrap(), 1);

    let (period, total): (String, i64) =
        sqlx::query_as("SELECT period, total_sales FROM county_aggregates")
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(period, "2026-07");
    assert_eq!(total, 9);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_replace_rolls_back() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = Arc::new(pg.store(10));
    let loader = StoreLoader::new(store.clone(), 0.0, date("2026-10-18"));

    loader.load(&[aggregate("2026-05", 3)]).await.unwrap();

    // duplicate primary key inside one replace
    let clashing = vec![aggregate("2026-06", 1), aggregate("2026-06", 2)];
    assert!(loader.load(&clashing).await.is_err());

    let (period,): (String,) = sqlx::query_as("SELECT period FROM county_aggregates")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(period, "2026-05");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_run_lock_is_exclusive_across_stores() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let first = pg.store(10);
    let second = pg.store(10);

    assert!(first.try_lock_run().await.unwrap());
    assert!(!second.try_lock_run().await.unwrap());
    assert!(!first.try_lock_run().await.unwrap());

    first.unlock_run().await.unwrap();
    assert!(second.try_lock_run().await.unwrap());
    second.unlock_run().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_migrations_create_every_table() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store(10);

    // idempotent
    store.migrate().await.unwrap();
    for table in Table::ALL {
        assert_eq!(store.row_count(table).await.unwrap(), 0, "{} should start empty", table);
    }
}
