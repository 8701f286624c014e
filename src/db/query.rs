//! Partial-update builder.
//!
//! Column names are `&'static str` supplied by repository code, never by
//! callers; values always travel as bound parameters.

use rusqlite::types::ToSql;
use rusqlite::Connection;
use tracing;

use super::DatabaseError;

pub struct UpdateBuilder {
    table: &'static str,
    assignments: Vec<(&'static str, Box<dyn ToSql>)>,
}

impl UpdateBuilder {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            assignments: Vec::new(),
        }
    }

    /// Assign `column` only when the caller supplied a value.
    pub fn set_if<V>(mut self, column: &'static str, value: Option<V>) -> Self
    where
        V: ToSql + 'static,
    {
        if let Some(value) = value {
            self.assignments.push((column, Box::new(value)));
        }
        self
    }

    pub fn set<V>(mut self, column: &'static str, value: V) -> Self
    where
        V: ToSql + 'static,
    {
        self.assignments.push((column, Box::new(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn to_sql(&self) -> String {
        let sets: Vec<String> = self
            .assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            sets.join(", "),
            self.assignments.len() + 1
        )
    }

    /// Apply to the row with `id`. Returns rows changed; an empty builder
    /// touches nothing and returns 0.
    pub fn execute(self, conn: &Connection, id: i64) -> Result<usize, DatabaseError> {
        if self.is_empty() {
            tracing::debug!(table = self.table, id, "Empty partial update, nothing to write");
            return Ok(0);
        }

        let sql = self.to_sql();
        let mut params: Vec<&dyn ToSql> = self.assignments.iter().map(|(_, v)| v.as_ref()).collect();
        params.push(&id);
        Ok(conn.execute(&sql, params.as_slice())?)
    }
}
