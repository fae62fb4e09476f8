//! Bare and monitored views of the same connection answer alike.

use backend_monitor::backends::document::{Database, FindOptions, MemoryDocuments};
use backend_monitor::backends::sql::{Direction, MemoryDatabase, Operator, Orm, SqlError, Table};
use backend_monitor::backends::storage::{MemoryObjectStore, StorageError, Uploader};
use backend_monitor::backends::Instrument;
use backend_monitor::monitor::{Context, SpanStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod common;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Invoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    customer: String,
    total: u64,
}

impl Table for Invoice {
    fn table_name() -> &'static str {
        "invoices"
    }
}

fn invoice(customer: &str, total: u64) -> Invoice {
    Invoice {
        id: None,
        customer: customer.into(),
        total,
    }
}

#[tokio::test]
async fn test_sql_views_return_the_same_rows() {
    let (monitor, sink) = common::monitor_with_sink();
    let bare = Orm::new(MemoryDatabase::new("billing"));
    let monitored = bare.monitor(&Context::background(), &monitor, "req-31", true);

    bare.create(&invoice("ada", 40)).await.unwrap();
    monitored.create(&invoice("bob", 15)).await.unwrap();

    let query = |orm: &Orm<MemoryDatabase>| orm.filter("total", Operator::Gt, 10).order("total", Direction::Asc);
    let from_bare: Vec<Invoice> = query(&bare).all().await.unwrap();
    let from_monitored: Vec<Invoice> = query(&monitored).all().await.unwrap();
    assert_eq!(from_bare, from_monitored);
    assert_eq!(from_bare.len(), 2);

    let missing = monitored.filter("customer", Operator::Eq, "eve").first::<Invoice>().await;
    assert!(matches!(missing, Err(SqlError::NotFound(_))));
    assert!(matches!(
        bare.filter("customer", Operator::Eq, "eve").first::<Invoice>().await,
        Err(SqlError::NotFound(_))
    ));

    // Only the monitored view reports.
    let spans = sink.transactions();
    assert_eq!(spans.len(), 3);
    assert!(spans.iter().all(|s| s.operation == "db"));
    assert!(spans.iter().all(|s| s.tag("table") == Some("invoices")));
    assert_eq!(sink.transactions_named("GET FIRST")[0].status, SpanStatus::NotFound);
    assert_eq!(sink.capture_count(), 1);
}

#[tokio::test]
async fn test_document_views_return_the_same_documents() {
    let (monitor, sink) = common::monitor_with_sink();
    let db = Database::new(MemoryDocuments::new("shop"));
    let bare = db.collection("carts");
    let monitored = bare.monitor(&Context::background(), &monitor, "req-32", false);

    bare.insert(&json!({"_id": "c1", "owner": "ada", "items": 2})).await.unwrap();
    monitored.insert(&json!({"_id": "c2", "owner": "bob", "items": 5})).await.unwrap();

    let options = FindOptions::default().sort("items", -1);
    let from_bare: Vec<Value> = bare.find_all(Value::Null, options.clone()).await.unwrap();
    let from_monitored: Vec<Value> = monitored.find_all(Value::Null, options).await.unwrap();
    assert_eq!(from_bare, from_monitored);
    assert_eq!(from_bare[0]["_id"], "c2");

    let filter = json!({"items": {"$gte": 3}});
    assert_eq!(
        bare.count_with_filter(filter.clone()).await.unwrap(),
        monitored.count_with_filter(filter).await.unwrap()
    );

    let spans = sink.transactions();
    assert_eq!(spans.len(), 3);
    assert!(spans.iter().all(|s| s.tag("collection") == Some("carts")));
    assert!(spans.iter().all(|s| s.tag("database") == Some("shop")));
    assert_eq!(sink.capture_count(), 0);
}

#[tokio::test]
async fn test_storage_views_share_the_bucket() {
    let (monitor, sink) = common::monitor_with_sink();
    let bare = Uploader::new(MemoryObjectStore::new(), "reports");
    let monitored = bare.monitor(&Context::background(), &monitor, "req-33", true);

    bare.put("q1", "2024/q1.csv").await.unwrap();
    assert_eq!(monitored.get("2024/q1.csv").await.unwrap(), bare.get("2024/q1.csv").await.unwrap());

    assert!(matches!(monitored.get("2024/q2.csv").await, Err(StorageError::NotFound { .. })));
    assert!(matches!(bare.get("2024/q2.csv").await, Err(StorageError::NotFound { .. })));

    // The bucket already exists, so only existence checks and reads are traced.
    assert!(sink.transactions_named("MakeBucket").is_empty());
    assert_eq!(sink.transactions_named("BucketExists").len(), 2);
    let reads = sink.transactions_named("GetObject");
    assert_eq!(reads.len(), 2);
    assert!(reads.iter().all(|r| r.tag("requestId") == Some("req-33")));
    assert_eq!(sink.capture_count(), 1);
}
