//! Relational store adapter.
//!
//! # Data Flow
//! ```text
//! Orm::new(driver)
//!     .filter(..).or_filter(..).order(..).limit(..)   builds a Query (no I/O)
//!     .all::<Order>()
//!         → Guard::observe(Call "db" / "GET ALL", database, table)
//!         → SqlDriver::select(table, query)
//!         → rows decoded into Order
//! ```
//!
//! # Design Decisions
//! - Rows travel as JSON objects so any serde type can be a table row
//! - Builder methods return a new `Orm`; a base instance can be reused freely
//! - Filters form OR-of-AND groups: `filter` extends the current group,
//!   `or_filter` opens a new one

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::backends::{Call, Guard, Instrument, SpanError};
use crate::monitor::SpanStatus;

pub use memory::MemoryDatabase;

const OPERATION: &str = "db";

/// One table row.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("error fetch data from database: record not found in {0}")]
    NotFound(String),

    #[error("duplicate key {key} in {table}")]
    Conflict { table: String, key: String },

    #[error("row for {0} has no primary key value")]
    MissingPrimaryKey(String),

    #[error("failed to encode row for {table}: {source}")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode row from {table}: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("database connection closed")]
    Closed,

    #[error("database error: {0}")]
    Driver(String),
}

impl SpanError for SqlError {
    fn span_status(&self) -> SpanStatus {
        match self {
            SqlError::NotFound(_) => SpanStatus::NotFound,
            SqlError::Conflict { .. } => SpanStatus::AlreadyExists,
            SqlError::MissingPrimaryKey(_) | SqlError::Encode { .. } => SpanStatus::InvalidArgument,
            SqlError::Decode { .. } => SpanStatus::DataLoss,
            SqlError::Unsupported(_) => SpanStatus::Unimplemented,
            SqlError::Closed => SpanStatus::Unavailable,
            SqlError::Driver(_) => SpanStatus::InternalError,
        }
    }
}

/// A type stored in a table.
pub trait Table: Serialize + DeserializeOwned + Send + Sync {
    fn table_name() -> &'static str;

    fn primary_key() -> &'static str {
        "id"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// SQL LIKE with `%` and `_` wildcards.
    Like,
    /// Value must be an array.
    In,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

/// Conflict handling for upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnConflict {
    /// Columns identifying an existing row. Empty means the primary key.
    pub unique_columns: Vec<String>,
    /// Columns overwritten on conflict. Empty means every column.
    pub only_update: Vec<String>,
}

/// Accumulated query state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// OR of AND groups.
    pub groups: Vec<Vec<Condition>>,
    pub sorts: Vec<Sort>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub select: Vec<String>,
}

impl Query {
    pub fn has_conditions(&self) -> bool {
        self.groups.iter().any(|g| !g.is_empty())
    }

    /// Statement text with `$n` placeholders, for debug logging.
    pub fn to_sql(&self, table: &str) -> String {
        let columns = if self.select.is_empty() {
            "*".to_string()
        } else {
            self.select.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", columns, table);
        let mut n = 0;
        if self.has_conditions() {
            let groups: Vec<String> = self
                .groups
                .iter()
                .filter(|g| !g.is_empty())
                .map(|g| {
                    let parts: Vec<String> = g
                        .iter()
                        .map(|c| {
                            n += 1;
                            format!("{} {} ${}", c.field, c.operator.as_sql(), n)
                        })
                        .collect();
                    parts.join(" AND ")
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&groups.join(" OR "));
        }
        if !self.sorts.is_empty() {
            let sorts: Vec<String> = self
                .sorts
                .iter()
                .map(|s| match s.direction {
                    Direction::Asc => format!("{} ASC", s.field),
                    Direction::Desc => format!("{} DESC", s.field),
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&sorts.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    fn and(mut self, condition: Condition) -> Self {
        match self.groups.last_mut() {
            Some(group) => group.push(condition),
            None => self.groups.push(vec![condition]),
        }
        self
    }

    /// AND `condition` onto the whole filter: `(g1 OR g2) AND c`.
    fn narrow(mut self, condition: Condition) -> Self {
        self.groups.retain(|g| !g.is_empty());
        if self.groups.is_empty() {
            self.groups.push(vec![condition]);
        } else {
            for group in &mut self.groups {
                group.push(condition.clone());
            }
        }
        self
    }
}

/// Storage driver behind [`Orm`].
#[async_trait]
pub trait SqlDriver: Send + Sync + fmt::Debug + 'static {
    /// Name of the connected database, used to label spans.
    fn database(&self) -> &str;

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, SqlError>;
    async fn count(&self, table: &str, query: &Query) -> Result<u64, SqlError>;
    /// Insert rows, filling a missing primary key. Returns the stored rows.
    async fn insert(&self, table: &str, primary_key: &str, rows: Vec<Row>) -> Result<Vec<Row>, SqlError>;
    /// Overwrite the given columns on every row matching `query`.
    async fn update(&self, table: &str, query: &Query, values: Row) -> Result<u64, SqlError>;
    async fn delete(&self, table: &str, query: &Query) -> Result<u64, SqlError>;
    async fn upsert(
        &self,
        table: &str,
        primary_key: &str,
        rows: Vec<Row>,
        on_conflict: &OnConflict,
    ) -> Result<u64, SqlError>;
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, SqlError>;
    async fn raw(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, SqlError>;
    async fn ping(&self) -> Result<(), SqlError>;
    async fn close(&self) -> Result<(), SqlError>;
}

/// Query builder and executor, bare or monitored.
#[derive(Debug)]
pub struct Orm<D> {
    driver: Arc<D>,
    table: Option<String>,
    query: Query,
    sql_debug: bool,
    guard: Guard,
}

impl<D> Clone for Orm<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            table: self.table.clone(),
            query: self.query.clone(),
            sql_debug: self.sql_debug,
            guard: self.guard.clone(),
        }
    }
}

impl<D: SqlDriver> Instrument for Orm<D> {
    fn guard(&self) -> &Guard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }
}

impl<D: SqlDriver> Orm<D> {
    pub fn new(driver: D) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    pub fn from_arc(driver: Arc<D>) -> Self {
        Self {
            driver,
            table: None,
            query: Query::default(),
            sql_debug: false,
            guard: Guard::bare(),
        }
    }

    /// Connect and verify the database answers.
    pub async fn connect(driver: D) -> Result<Self, SqlError> {
        let orm = Self::new(driver);
        if let Err(e) = orm.driver.ping().await {
            tracing::error!(database = %orm.driver.database(), error = %e, "Failed ping on new database connection");
            return Err(e);
        }
        Ok(orm)
    }

    /// Log every statement at debug level before it runs.
    pub fn sql_debug(mut self, enabled: bool) -> Self {
        self.sql_debug = enabled;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Target `name` instead of the row type's table.
    pub fn table(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.table = Some(name.into());
        next
    }

    pub fn filter(&self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.query = next.query.and(Condition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        next
    }

    pub fn or_filter(&self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.query.groups.push(vec![Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }]);
        next
    }

    pub fn order(&self, field: impl Into<String>, direction: Direction) -> Self {
        let mut next = self.clone();
        next.query.sorts.push(Sort {
            field: field.into(),
            direction,
        });
        next
    }

    pub fn limit(&self, limit: usize) -> Self {
        let mut next = self.clone();
        next.query.limit = Some(limit);
        next
    }

    pub fn offset(&self, offset: usize) -> Self {
        let mut next = self.clone();
        next.query.offset = Some(offset);
        next
    }

    pub fn select(&self, fields: &[&str]) -> Self {
        let mut next = self.clone();
        next.query.select = fields.iter().map(|f| f.to_string()).collect();
        next
    }

    /// First matching row, ordered by primary key unless an order was given.
    pub async fn first<T: Table>(&self) -> Result<T, SqlError> {
        let table = self.table_for::<T>();
        let mut query = self.query.clone();
        if query.sorts.is_empty() {
            query.sorts.push(Sort {
                field: T::primary_key().to_string(),
                direction: Direction::Asc,
            });
        }
        query.limit = Some(1);

        self.guard
            .observe(self.call("GET FIRST", &table), async {
                self.debug(&query.to_sql(&table));
                let row = self
                    .driver
                    .select(&table, &query)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| SqlError::NotFound(table.clone()))?;
                decode(&table, row)
            })
            .await
    }

    pub async fn all<T: Table>(&self) -> Result<Vec<T>, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("GET ALL", &table), async {
                self.debug(&self.query.to_sql(&table));
                self.driver
                    .select(&table, &self.query)
                    .await?
                    .into_iter()
                    .map(|row| decode(&table, row))
                    .collect()
            })
            .await
    }

    pub async fn count<T: Table>(&self) -> Result<u64, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("COUNT", &table), async {
                self.debug(&self.query.to_sql(&table));
                self.driver.count(&table, &self.query).await
            })
            .await
    }

    /// Insert `data`, returning it as stored (with a generated key when it had none).
    pub async fn create<T: Table>(&self, data: &T) -> Result<T, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("CREATE", &table), async {
                let row = encode(&table, data)?;
                self.debug(&format!("INSERT INTO {} {}", table, Value::Object(row.clone())));
                let stored = self.driver.insert(&table, T::primary_key(), vec![row]).await?;
                let row = stored
                    .into_iter()
                    .next()
                    .ok_or_else(|| SqlError::Driver("insert returned no row".to_string()))?;
                decode(&table, row)
            })
            .await
    }

    /// Save every column of `data` by primary key, inserting when no row matches.
    pub async fn update<T: Table>(&self, data: &T) -> Result<(), SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("UPDATE", &table), async {
                let row = encode(&table, data)?;
                let query = by_primary_key(&table, T::primary_key(), &row)?;
                self.debug(&format!("UPDATE {} SET {} WHERE {} = $1", table, Value::Object(row.clone()), T::primary_key()));
                if self.driver.update(&table, &query, row.clone()).await? == 0 {
                    self.driver.insert(&table, T::primary_key(), vec![row]).await?;
                }
                Ok(())
            })
            .await
    }

    /// Update non-null columns of `data`, or only `fields` when given.
    ///
    /// Rows are matched by the builder's filters and, when `data` carries one,
    /// its primary key.
    pub async fn patch<T: Table>(&self, data: &T, fields: &[&str]) -> Result<u64, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("PATCH", &table), async {
                let row = encode(&table, data)?;
                let pk = T::primary_key();
                let mut query = self.query.clone();
                if let Some(id) = row.get(pk).filter(|v| !v.is_null()) {
                    query = query.narrow(Condition {
                        field: pk.to_string(),
                        operator: Operator::Eq,
                        value: id.clone(),
                    });
                }
                if !query.has_conditions() {
                    return Err(SqlError::MissingPrimaryKey(table.clone()));
                }

                let values: Row = row
                    .into_iter()
                    .filter(|(k, v)| k != pk && !v.is_null())
                    .filter(|(k, _)| fields.is_empty() || fields.contains(&k.as_str()))
                    .collect();
                self.debug(&format!("PATCH {} SET {} ({})", table, Value::Object(values.clone()), query.to_sql(&table)));
                self.driver.update(&table, &query, values).await
            })
            .await
    }

    /// Delete `data` by primary key, narrowed by the builder's filters.
    pub async fn delete<T: Table>(&self, data: &T) -> Result<u64, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("DELETE", &table), async {
                let row = encode(&table, data)?;
                let filters = Query {
                    groups: self.query.groups.clone(),
                    ..Query::default()
                };
                let query = filters.narrow(primary_key_condition(&table, T::primary_key(), &row)?);
                self.debug(&format!("DELETE ({})", query.to_sql(&table)));
                self.driver.delete(&table, &query).await
            })
            .await
    }

    /// Insert or update `data`, `chunk_size` rows per statement (0 = all at once).
    pub async fn upsert<T: Table>(&self, chunk_size: usize, data: &[T], on_conflict: &OnConflict) -> Result<u64, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("UPSERT", &table), async {
                let rows = data
                    .iter()
                    .map(|d| encode(&table, d))
                    .collect::<Result<Vec<_>, _>>()?;
                let chunk = if chunk_size == 0 { rows.len().max(1) } else { chunk_size };
                let mut affected = 0;
                for batch in rows.chunks(chunk) {
                    self.debug(&format!("UPSERT INTO {} ({} rows) {:?}", table, batch.len(), on_conflict));
                    affected += self
                        .driver
                        .upsert(&table, T::primary_key(), batch.to_vec(), on_conflict)
                        .await?;
                }
                Ok(affected)
            })
            .await
    }

    pub async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64, SqlError> {
        self.guard
            .observe(self.call("EXEC", ""), async {
                self.debug(sql);
                self.driver.execute(sql, args).await
            })
            .await
    }

    pub async fn raw_sql<T: Table>(&self, sql: &str, args: &[Value]) -> Result<Vec<T>, SqlError> {
        let table = self.table_for::<T>();
        self.guard
            .observe(self.call("RAW", &table), async {
                self.debug(sql);
                self.driver
                    .raw(sql, args)
                    .await?
                    .into_iter()
                    .map(|row| decode(&table, row))
                    .collect()
            })
            .await
    }

    pub async fn ping(&self) -> Result<(), SqlError> {
        self.driver.ping().await
    }

    pub async fn close(&self) -> Result<(), SqlError> {
        self.driver.close().await
    }

    fn table_for<T: Table>(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| T::table_name().to_string())
    }

    fn call(&self, action: &str, table: &str) -> Call {
        let call = Call::new(OPERATION, action).tag("database", self.driver.database());
        if table.is_empty() {
            call
        } else {
            call.tag("table", table)
        }
    }

    fn debug(&self, statement: &str) {
        if self.sql_debug {
            tracing::debug!(database = %self.driver.database(), "{}", statement);
        }
    }
}

fn primary_key_condition(table: &str, pk: &str, row: &Row) -> Result<Condition, SqlError> {
    let id = row
        .get(pk)
        .filter(|v| !v.is_null())
        .ok_or_else(|| SqlError::MissingPrimaryKey(table.to_string()))?;
    Ok(Condition {
        field: pk.to_string(),
        operator: Operator::Eq,
        value: id.clone(),
    })
}

fn by_primary_key(table: &str, pk: &str, row: &Row) -> Result<Query, SqlError> {
    Ok(Query::default().narrow(primary_key_condition(table, pk, row)?))
}

fn encode<T: Serialize>(table: &str, data: &T) -> Result<Row, SqlError> {
    match serde_json::to_value(data) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(SqlError::Encode {
            table: table.to_string(),
            source: serde::ser::Error::custom(format!("expected an object, got {}", other)),
        }),
        Err(source) => Err(SqlError::Encode {
            table: table.to_string(),
            source,
        }),
    }
}

fn decode<T: DeserializeOwned>(table: &str, row: Row) -> Result<T, SqlError> {
    serde_json::from_value(Value::Object(row)).map_err(|source| SqlError::Decode {
        table: table.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Context, Monitor};
    use crate::sink::MemorySink;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        customer: String,
        status: String,
        total: u64,
    }

    impl Table for Order {
        fn table_name() -> &'static str {
            "orders"
        }
    }

    fn order(customer: &str, status: &str, total: u64) -> Order {
        Order {
            id: None,
            customer: customer.into(),
            status: status.into(),
            total,
        }
    }

    async fn seeded() -> Orm<MemoryDatabase> {
        let orm = Orm::new(MemoryDatabase::new("shop"));
        for o in [
            order("ada", "paid", 30),
            order("bob", "open", 10),
            order("ada", "open", 20),
        ] {
            orm.create(&o).await.unwrap();
        }
        orm
    }

    #[test]
    fn test_query_renders_sql() {
        let orm = Orm::new(MemoryDatabase::new("shop"))
            .filter("status", Operator::Eq, "open")
            .filter("total", Operator::Gt, 10)
            .or_filter("customer", Operator::Eq, "ada")
            .order("total", Direction::Desc)
            .limit(5);
        assert_eq!(
            orm.query().to_sql("orders"),
            "SELECT * FROM orders WHERE status = $1 AND total > $2 OR customer = $3 ORDER BY total DESC LIMIT 5"
        );
    }

    #[tokio::test]
    async fn test_create_assigns_keys() {
        let orm = seeded().await;
        let all: Vec<Order> = orm.order("id", Direction::Asc).all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_filters_and_first() {
        let orm = seeded().await;
        let open: Vec<Order> = orm
            .filter("status", Operator::Eq, "open")
            .order("total", Direction::Desc)
            .all()
            .await
            .unwrap();
        assert_eq!(open.iter().map(|o| o.total).collect::<Vec<_>>(), vec![20, 10]);

        let first: Order = orm.filter("customer", Operator::Eq, "ada").first().await.unwrap();
        assert_eq!(first.id, Some(1));

        let either = orm
            .filter("customer", Operator::Eq, "bob")
            .or_filter("total", Operator::Gte, 30)
            .count::<Order>()
            .await
            .unwrap();
        assert_eq!(either, 2);
    }

    #[tokio::test]
    async fn test_first_not_found_is_reported() {
        let sink = Arc::new(MemorySink::new());
        let orm = seeded()
            .await
            .monitor(&Context::background(), &Monitor::new(sink.clone()), "req-5", true);

        let err = orm
            .filter("customer", Operator::Eq, "zed")
            .first::<Order>()
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::NotFound(_)));

        let span = &sink.transactions()[0];
        assert_eq!(span.operation, "db");
        assert_eq!(span.tag("action"), Some("GET FIRST"));
        assert_eq!(span.tag("database"), Some("shop"));
        assert_eq!(span.tag("table"), Some("orders"));
        assert_eq!(span.tag("requestId"), Some("req-5"));
        assert_eq!(span.status, SpanStatus::NotFound);
        assert_eq!(sink.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_update_patch_delete() {
        let orm = seeded().await;
        let mut o: Order = orm.filter("id", Operator::Eq, 2).first().await.unwrap();
        o.status = "paid".into();
        orm.update(&o).await.unwrap();

        let patch = Order {
            id: None,
            customer: String::new(),
            status: "shipped".into(),
            total: 0,
        };
        let n = orm
            .filter("status", Operator::Eq, "paid")
            .patch(&patch, &["status"])
            .await
            .unwrap();
        assert_eq!(n, 2);

        assert_eq!(orm.delete(&o).await.unwrap(), 1);
        let rest: Vec<Order> = orm.all().await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().any(|r| r.status == "shipped" && r.total == 30));
    }

    #[tokio::test]
    async fn test_patch_with_or_filter_touches_only_the_keyed_row() {
        let orm = seeded().await;
        let target = Order {
            id: Some(2),
            customer: String::new(),
            status: "shipped".into(),
            total: 0,
        };
        let n = orm
            .filter("status", Operator::Eq, "paid")
            .or_filter("status", Operator::Eq, "open")
            .patch(&target, &["status"])
            .await
            .unwrap();
        assert_eq!(n, 1);

        let rows: Vec<Order> = orm.order("id", Direction::Asc).all().await.unwrap();
        let statuses: Vec<_> = rows.iter().map(|o| o.status.as_str()).collect();
        assert_eq!(statuses, vec!["paid", "shipped", "open"]);

        // A key outside every group matches nothing.
        let missed = orm
            .filter("status", Operator::Eq, "paid")
            .or_filter("customer", Operator::Eq, "zed")
            .patch(&target, &["status"])
            .await
            .unwrap();
        assert_eq!(missed, 0);
    }

    #[tokio::test]
    async fn test_delete_with_or_filter_keeps_other_rows() {
        let orm = seeded().await;
        let second: Order = orm.filter("id", Operator::Eq, 2).first().await.unwrap();
        let n = orm
            .filter("status", Operator::Eq, "paid")
            .or_filter("status", Operator::Eq, "open")
            .delete(&second)
            .await
            .unwrap();
        assert_eq!(n, 1);

        let ids: Vec<_> = orm
            .order("id", Direction::Asc)
            .all::<Order>()
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[tokio::test]
    async fn test_exec_span_has_no_table() {
        let sink = Arc::new(MemorySink::new());
        let orm = seeded()
            .await
            .monitor(&Context::background(), &Monitor::new(sink.clone()), "req-6", false);
        orm.exec("TRUNCATE orders", &[]).await.unwrap();

        let span = &sink.transactions()[0];
        assert_eq!(span.tag("action"), Some("EXEC"));
        assert_eq!(span.tag("database"), Some("shop"));
        assert_eq!(span.tag("table"), None);
    }

    #[tokio::test]
    async fn test_upsert_in_chunks() {
        let orm = seeded().await;
        let rows = vec![
            Order {
                id: Some(1),
                customer: "ada".into(),
                status: "refunded".into(),
                total: 0,
            },
            Order {
                id: Some(9),
                customer: "cy".into(),
                status: "open".into(),
                total: 5,
            },
        ];
        let on_conflict = OnConflict {
            unique_columns: vec![],
            only_update: vec!["status".into()],
        };
        orm.upsert(1, &rows, &on_conflict).await.unwrap();

        let first: Order = orm.filter("id", Operator::Eq, 1).first().await.unwrap();
        assert_eq!(first.status, "refunded");
        assert_eq!(first.total, 30);
        assert_eq!(orm.count::<Order>().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_raw_statements() {
        let orm = seeded().await;
        let rows: Vec<Order> = orm.raw_sql("SELECT * FROM orders", &[]).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(orm.exec("DELETE FROM orders", &[json!(null)]).await.unwrap(), 3);
        assert!(matches!(
            orm.exec("VACUUM", &[]).await,
            Err(SqlError::Unsupported(_))
        ));
    }
}
