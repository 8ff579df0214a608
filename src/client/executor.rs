//! Statement execution
//!
//! Statement templates are split on `;`, blank fragments dropped, and every
//! `{{key}}` placeholder replaced with its literal value. Values are not
//! escaped: a password containing `'` ends up verbatim in the SQL text, so
//! templates must quote accordingly.

use super::producer::ConnectionProducer;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder name to value map for one operation
///
/// `Debug` prints keys only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Number of placeholders
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no placeholder is defined
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Substitutions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Non-empty, trimmed statements of a template, in order
pub fn split_statements(template: &str) -> impl Iterator<Item = &str> {
    template
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

/// Replace every `{{key}}` with its value in a single pass
///
/// Unknown placeholders are left as written, and inserted values are never
/// scanned again.
pub fn substitute(statement: &str, substitutions: &Substitutions) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut rest = statement;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => match substitutions.get(&after[..end]) {
                Some(value) => {
                    out.push_str(value);
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render `statements` and run them under the producer lock
///
/// The lock is held across connection acquisition and every statement, so
/// batches from concurrent operations never interleave. Execution stops at the
/// first failure. Returns the number of statements executed.
pub async fn execute_statements(
    producer: &ConnectionProducer,
    statements: &[String],
    substitutions: &Substitutions,
) -> Result<usize> {
    let mut state = producer.lock().await;
    let handle = state.connection().await?;

    let mut executed = 0;
    for template in statements {
        for statement in split_statements(template) {
            let query = substitute(statement, substitutions);
            handle.execute(&query).await.map_err(|e| {
                // Server messages may quote the rendered statement
                tracing::warn!(
                    index = executed,
                    category = e.category(),
                    code = e.server_code(),
                    "statement failed, aborting batch"
                );
                Error::Execution(Box::new(e))
            })?;
            crate::metrics::counters::statement_executed();
            executed += 1;
        }
    }

    tracing::debug!(executed, placeholders = ?substitutions, "statements executed");
    Ok(executed)
}
