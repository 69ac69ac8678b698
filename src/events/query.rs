//! Stream queries: the server-side predicate over the event table.
//!
//! The predicate is a single OR chain. The optional time window (open
//! bounds; conjoined when both ends are present) comes first, then each
//! clause's type and producer equalities, each OR'd at the top level.
//! Results always come back time-ascending.

use super::{FieldFilter, EVENT_TYPE_COLUMN, NANOS_COLUMN, PRODUCER_COLUMN, SECONDS_COLUMN};
use crate::types::{StoredValue, Timestamp};
use std::fmt::Write;

/// One disjunct of a stream query: an event type and producer ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventClause {
    event_type: Option<String>,
    producer_ids: Vec<String>,
}

impl EventClause {
    pub fn new() -> Self {
        EventClause::default()
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn from_producer(mut self, producer_id: impl Into<String>) -> Self {
        self.producer_ids.push(producer_id.into());
        self
    }
}

/// What to pull out of an event stream: an optional time window,
/// type/producer clauses, and client-side field filters.
#[derive(Debug, Clone, Default)]
pub struct EventStreamQuery {
    after: Option<Timestamp>,
    before: Option<Timestamp>,
    clauses: Vec<EventClause>,
    filters: Vec<FieldFilter>,
}

impl EventStreamQuery {
    /// Matches every event.
    pub fn new() -> Self {
        EventStreamQuery::default()
    }

    /// Keeps events strictly after this time.
    pub fn after(mut self, time: Timestamp) -> Self {
        self.after = Some(time);
        self
    }

    /// Keeps events strictly before this time.
    pub fn before(mut self, time: Timestamp) -> Self {
        self.before = Some(time);
        self
    }

    pub fn with_clause(mut self, clause: EventClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub(crate) fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Composes the SELECT with its parameters.
    pub(crate) fn to_sql(&self, table: &str, columns: &[&str]) -> (String, Vec<StoredValue>) {
        let mut sql = format!("SELECT {} FROM {table}", columns.join(", "));
        let mut params = Vec::new();
        let mut has_where = false;

        match (self.after, self.before) {
            (Some(after), Some(before)) => {
                connect(&mut sql, &mut has_where);
                sql.push('(');
                push_time_bound(&mut sql, &mut params, after, '>');
                sql.push_str(" AND ");
                push_time_bound(&mut sql, &mut params, before, '<');
                sql.push(')');
            }
            (Some(after), None) => {
                connect(&mut sql, &mut has_where);
                push_time_bound(&mut sql, &mut params, after, '>');
            }
            (None, Some(before)) => {
                connect(&mut sql, &mut has_where);
                push_time_bound(&mut sql, &mut params, before, '<');
            }
            (None, None) => {}
        }

        for clause in &self.clauses {
            if let Some(event_type) = &clause.event_type {
                connect(&mut sql, &mut has_where);
                let _ = write!(sql, "{EVENT_TYPE_COLUMN} = ?");
                params.push(StoredValue::Text(event_type.clone()));
            }
            for producer in &clause.producer_ids {
                connect(&mut sql, &mut has_where);
                let _ = write!(sql, "{PRODUCER_COLUMN} = ?");
                params.push(StoredValue::Text(producer.clone()));
            }
        }

        let _ = write!(sql, " ORDER BY {SECONDS_COLUMN} ASC, {NANOS_COLUMN} ASC;");
        (sql, params)
    }
}

fn connect(sql: &mut String, has_where: &mut bool) {
    if *has_where {
        sql.push_str(" OR ");
    } else {
        sql.push_str(" WHERE ");
        *has_where = true;
    }
}

/// An open bound on (seconds, nanos): strictly past the seconds, or on
/// the same second strictly past the nanos.
fn push_time_bound(sql: &mut String, params: &mut Vec<StoredValue>, bound: Timestamp, op: char) {
    let _ = write!(
        sql,
        "({SECONDS_COLUMN} {op} ? OR ({SECONDS_COLUMN} = ? AND {NANOS_COLUMN} {op} ?))"
    );
    params.push(StoredValue::Int(bound.seconds));
    params.push(StoredValue::Int(bound.seconds));
    params.push(StoredValue::Int(i64::from(bound.nanos)));
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: [&str; 2] = ["id", "payload"];

    #[test]
    fn test_unrestricted_query_only_orders() {
        let (sql, params) = EventStreamQuery::new().to_sql("events", &COLUMNS);
        assert_eq!(sql, "SELECT id, payload FROM events ORDER BY seconds ASC, nanos ASC;");
        assert!(params.is_empty());
    }

    #[test]
    fn test_after_bound_is_open() {
        let query = EventStreamQuery::new().after(Timestamp::new(10, 500));
        let (sql, params) = query.to_sql("events", &COLUMNS);
        assert_eq!(
            sql,
            "SELECT id, payload FROM events \
             WHERE (seconds > ? OR (seconds = ? AND nanos > ?)) \
             ORDER BY seconds ASC, nanos ASC;"
        );
        assert_eq!(
            params,
            [StoredValue::Int(10), StoredValue::Int(10), StoredValue::Int(500)]
        );
    }

    #[test]
    fn test_window_conjoins_both_bounds() {
        let query = EventStreamQuery::new()
            .after(Timestamp::new(10, 0))
            .before(Timestamp::new(20, 0));
        let (sql, _) = query.to_sql("events", &COLUMNS);
        assert!(sql.contains(
            "WHERE ((seconds > ? OR (seconds = ? AND nanos > ?)) \
             AND (seconds < ? OR (seconds = ? AND nanos < ?)))"
        ));
    }

    #[test]
    fn test_clauses_join_the_or_chain() {
        let query = EventStreamQuery::new()
            .after(Timestamp::new(5, 0))
            .with_clause(
                EventClause::new().of_type("order.Placed").from_producer("p-1").from_producer("p-2"),
            );
        let (sql, params) = query.to_sql("events", &COLUMNS);
        assert!(sql.contains(
            "WHERE (seconds > ? OR (seconds = ? AND nanos > ?)) \
             OR event_type = ? OR producer_id = ? OR producer_id = ?"
        ));
        assert_eq!(params.len(), 6);
        assert_eq!(params[3], StoredValue::Text("order.Placed".to_string()));
        assert_eq!(params[5], StoredValue::Text("p-2".to_string()));
    }

    #[test]
    fn test_first_clause_term_opens_the_where() {
        let query =
            EventStreamQuery::new().with_clause(EventClause::new().of_type("order.Placed"));
        let (sql, _) = query.to_sql("events", &COLUMNS);
        assert!(sql.contains("WHERE event_type = ? ORDER BY"));
    }
}
