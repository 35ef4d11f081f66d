//! Parameterized SQL statements.

use crate::models::TIMESTAMP_FORMAT;
use chrono::NaiveDateTime;

/// A bind parameter, encoded per dialect when the statement runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Integer(i64),
    Timestamp(NaiveDateTime),
}

/// SQL text with positional `?` placeholders and their values in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append SQL text containing exactly one `?` and its value.
    pub fn push_bind(&mut self, sql: &str, param: Param) -> &mut Self {
        debug_assert_eq!(sql.matches('?').count(), 1);
        self.sql.push_str(sql);
        self.params.push(param);
        self
    }

    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

pub(crate) fn sqlite_timestamp(t: &NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}
