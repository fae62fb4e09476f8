//! In-process relational driver.
//!
//! Tables are created on first insert. Only `SELECT * FROM t`,
//! `DELETE FROM t` and `TRUNCATE t` are understood as raw statements.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::backends::cache::memory::glob_match;
use crate::backends::sql::{Condition, Direction, OnConflict, Operator, Query, Row, SqlDriver, SqlError};

#[derive(Debug, Default)]
struct TableData {
    rows: Vec<Row>,
    next_id: u64,
}

#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    tables: DashMap<String, TableData>,
    closed: AtomicBool,
    statements: AtomicU64,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: DashMap::new(),
            closed: AtomicBool::new(false),
            statements: AtomicU64::new(0),
        }
    }

    /// Statements executed so far.
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    fn check_open(&self) -> Result<(), SqlError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlError::Closed);
        }
        self.statements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn matching(&self, table: &str, query: &Query) -> Vec<Row> {
        let Some(data) = self.tables.get(table) else {
            return Vec::new();
        };
        let mut rows: Vec<Row> = data.rows.iter().filter(|r| matches(r, query)).cloned().collect();
        drop(data);

        for sort in query.sorts.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&sort.field), b.get(&sort.field));
                match sort.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.select))
            .collect()
    }

    fn insert_rows(&self, table: &str, primary_key: &str, rows: Vec<Row>) -> Result<Vec<Row>, SqlError> {
        let mut data = self.tables.entry(table.to_string()).or_default();
        let mut stored = Vec::with_capacity(rows.len());
        for mut row in rows {
            match row.get(primary_key).filter(|v| !v.is_null()) {
                Some(id) => {
                    if data.rows.iter().any(|r| r.get(primary_key) == Some(id)) {
                        return Err(SqlError::Conflict {
                            table: table.to_string(),
                            key: id.to_string(),
                        });
                    }
                    if let Some(n) = id.as_u64() {
                        data.next_id = data.next_id.max(n);
                    }
                }
                None => {
                    data.next_id += 1;
                    row.insert(primary_key.to_string(), Value::from(data.next_id));
                }
            }
            data.rows.push(row.clone());
            stored.push(row);
        }
        Ok(stored)
    }
}

#[async_trait]
impl SqlDriver for MemoryDatabase {
    fn database(&self) -> &str {
        &self.name
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, SqlError> {
        self.check_open()?;
        Ok(self.matching(table, query))
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64, SqlError> {
        self.check_open()?;
        let mut unbounded = query.clone();
        unbounded.limit = None;
        unbounded.offset = None;
        Ok(self.matching(table, &unbounded).len() as u64)
    }

    async fn insert(&self, table: &str, primary_key: &str, rows: Vec<Row>) -> Result<Vec<Row>, SqlError> {
        self.check_open()?;
        self.insert_rows(table, primary_key, rows)
    }

    async fn update(&self, table: &str, query: &Query, values: Row) -> Result<u64, SqlError> {
        self.check_open()?;
        let Some(mut data) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let mut n = 0;
        for row in data.rows.iter_mut().filter(|r| matches(r, query)) {
            for (k, v) in &values {
                row.insert(k.clone(), v.clone());
            }
            n += 1;
        }
        Ok(n)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, SqlError> {
        self.check_open()?;
        let Some(mut data) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = data.rows.len();
        data.rows.retain(|r| !matches(r, query));
        Ok((before - data.rows.len()) as u64)
    }

    async fn upsert(
        &self,
        table: &str,
        primary_key: &str,
        rows: Vec<Row>,
        on_conflict: &OnConflict,
    ) -> Result<u64, SqlError> {
        self.check_open()?;
        let unique: Vec<String> = if on_conflict.unique_columns.is_empty() {
            vec![primary_key.to_string()]
        } else {
            on_conflict.unique_columns.clone()
        };

        let mut affected = 0;
        for row in rows {
            let existing = {
                let mut data = self.tables.entry(table.to_string()).or_default();
                let found = data
                    .rows
                    .iter_mut()
                    .find(|r| unique.iter().all(|c| r.get(c).is_some() && r.get(c) == row.get(c)));
                match found {
                    Some(target) => {
                        for (k, v) in &row {
                            if on_conflict.only_update.is_empty() || on_conflict.only_update.contains(k) {
                                target.insert(k.clone(), v.clone());
                            }
                        }
                        true
                    }
                    None => false,
                }
            };
            if !existing {
                self.insert_rows(table, primary_key, vec![row])?;
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn execute(&self, sql: &str, _args: &[Value]) -> Result<u64, SqlError> {
        self.check_open()?;
        let words: Vec<&str> = sql.split_whitespace().collect();
        let table = match words.as_slice() {
            [d, f, t] if d.eq_ignore_ascii_case("DELETE") && f.eq_ignore_ascii_case("FROM") => *t,
            [tr, t] if tr.eq_ignore_ascii_case("TRUNCATE") => *t,
            _ => return Err(SqlError::Unsupported(sql.to_string())),
        };
        let table = table.trim_end_matches(';');
        Ok(self
            .tables
            .get_mut(table)
            .map(|mut data| {
                let n = data.rows.len() as u64;
                data.rows.clear();
                n
            })
            .unwrap_or(0))
    }

    async fn raw(&self, sql: &str, _args: &[Value]) -> Result<Vec<Row>, SqlError> {
        self.check_open()?;
        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            [s, star, f, t] if s.eq_ignore_ascii_case("SELECT") && *star == "*" && f.eq_ignore_ascii_case("FROM") => {
                Ok(self.matching(t.trim_end_matches(';'), &Query::default()))
            }
            _ => Err(SqlError::Unsupported(sql.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), SqlError> {
        self.check_open()
    }

    async fn close(&self) -> Result<(), SqlError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn matches(row: &Row, query: &Query) -> bool {
    let groups: Vec<&Vec<Condition>> = query.groups.iter().filter(|g| !g.is_empty()).collect();
    groups.is_empty() || groups.iter().any(|g| g.iter().all(|c| holds(row, c)))
}

fn holds(row: &Row, condition: &Condition) -> bool {
    let value = row.get(&condition.field);
    match condition.operator {
        Operator::Eq => compare(value, Some(&condition.value)) == CmpOrdering::Equal,
        Operator::Ne => compare(value, Some(&condition.value)) != CmpOrdering::Equal,
        Operator::Gt => compare(value, Some(&condition.value)) == CmpOrdering::Greater,
        Operator::Gte => compare(value, Some(&condition.value)) != CmpOrdering::Less,
        Operator::Lt => compare(value, Some(&condition.value)) == CmpOrdering::Less,
        Operator::Lte => compare(value, Some(&condition.value)) != CmpOrdering::Greater,
        Operator::Like => match (value.and_then(Value::as_str), condition.value.as_str()) {
            (Some(text), Some(pattern)) => glob_match(&pattern.replace('%', "*").replace('_', "?"), text),
            _ => false,
        },
        Operator::In => condition
            .value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| compare(value, Some(item)) == CmpOrdering::Equal)),
    }
}

/// Total order over JSON scalars: null < bool < number < string < other.
pub(crate) fn compare(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 4 && rank(b) == 4 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn project(row: Row, select: &[String]) -> Row {
    if select.is_empty() {
        return row;
    }
    row.into_iter().filter(|(k, _)| select.contains(k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_conflict_on_duplicate_key() {
        let db = MemoryDatabase::new("t");
        db.insert("users", "id", vec![row(json!({ "id": 1 }))]).await.unwrap();
        let err = db.insert("users", "id", vec![row(json!({ "id": 1 }))]).await.unwrap_err();
        assert!(matches!(err, SqlError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_like_in_and_projection() {
        let db = MemoryDatabase::new("t");
        db.insert(
            "users",
            "id",
            vec![
                row(json!({ "name": "alice", "age": 30 })),
                row(json!({ "name": "albert", "age": 41 })),
                row(json!({ "name": "bob", "age": 25 })),
            ],
        )
        .await
        .unwrap();

        let query = Query {
            groups: vec![vec![Condition {
                field: "name".into(),
                operator: Operator::Like,
                value: json!("al%"),
            }]],
            select: vec!["name".into()],
            ..Query::default()
        };
        let rows = db.select("users", &query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.len() == 1));

        let query = Query {
            groups: vec![vec![Condition {
                field: "age".into(),
                operator: Operator::In,
                value: json!([25, 41]),
            }]],
            ..Query::default()
        };
        assert_eq!(db.count("users", &query).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_database() {
        let db = MemoryDatabase::new("t");
        db.close().await.unwrap();
        assert!(matches!(db.ping().await, Err(SqlError::Closed)));
    }
}
