//! Live query description: table, equality filter and ordering.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::feed::Change;

/// Sort direction for the initial snapshot of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordering applied to the initial snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Equality filter on a single top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// A filtered live query over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Option<FieldFilter>,
    pub order_by: Option<OrderBy>,
    /// Emit every matching document as an insert before live changes.
    pub include_initial: bool,
}

impl Query {
    /// Query every document of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: None,
            include_initial: false,
        }
    }

    /// Restrict the query to documents whose `field` equals `value`.
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Order the initial snapshot by `field`.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Include the current matching documents at the start of the feed.
    pub fn include_initial(mut self, include: bool) -> Self {
        self.include_initial = include;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(Error::InvalidQuery("table name must not be empty".to_string()));
        }
        if let Some(filter) = &self.filter {
            if filter.field.is_empty() {
                return Err(Error::InvalidQuery("filter field must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Check whether a document satisfies the filter.
    pub fn matches(&self, doc: &Value) -> bool {
        match &self.filter {
            Some(filter) => doc.get(&filter.field) == Some(&filter.value),
            None => true,
        }
    }

    /// Project a raw table change through the filter.
    ///
    /// A document moving out of the filter is reported as a removal, one
    /// moving in as an insert. Changes that never touch the filter vanish.
    pub(crate) fn project(&self, change: &Change) -> Option<Change> {
        let old_val = change.old_val.as_ref().filter(|doc| self.matches(doc));
        let new_val = change.new_val.as_ref().filter(|doc| self.matches(doc));

        if old_val.is_none() && new_val.is_none() {
            return None;
        }

        Some(Change {
            old_val: old_val.cloned(),
            new_val: new_val.cloned(),
        })
    }

    pub(crate) fn sort(&self, docs: &mut [Value]) {
        let Some(order) = &self.order_by else {
            return;
        };

        docs.sort_by(|a, b| {
            let ord = compare_values(
                a.get(&order.field).unwrap_or(&Value::Null),
                b.get(&order.field).unwrap_or(&Value::Null),
            );
            match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| compare_values(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(old_val: Option<Value>, new_val: Option<Value>) -> Change {
        Change { old_val, new_val }
    }

    #[test]
    fn test_unfiltered_query_matches_everything() {
        let query = Query::table("channel");
        assert!(query.matches(&json!({"name": "general"})));
        assert!(query.matches(&json!({})));
    }

    #[test]
    fn test_filter_eq() {
        let query = Query::table("message").filter_eq("channelId", "42");
        assert!(query.matches(&json!({"channelId": "42"})));
        assert!(!query.matches(&json!({"channelId": "7"})));
        assert!(!query.matches(&json!({"body": "no channel"})));
    }

    #[test]
    fn test_project_moves_in_and_out_of_filter() {
        let query = Query::table("message").filter_eq("channelId", "42");

        let moved_in = change(Some(json!({"channelId": "7"})), Some(json!({"channelId": "42"})));
        let projected = query.project(&moved_in).unwrap();
        assert!(projected.old_val.is_none());
        assert!(projected.new_val.is_some());

        let moved_out = change(Some(json!({"channelId": "42"})), Some(json!({"channelId": "7"})));
        let projected = query.project(&moved_out).unwrap();
        assert!(projected.old_val.is_some());
        assert!(projected.new_val.is_none());

        let elsewhere = change(None, Some(json!({"channelId": "7"})));
        assert!(query.project(&elsewhere).is_none());
    }

    #[test]
    fn test_sort_descending_by_number() {
        let query = Query::table("message").order_by("createdAt", Direction::Desc);
        let mut docs = vec![
            json!({"createdAt": 1}),
            json!({"createdAt": 3}),
            json!({"createdAt": 2}),
        ];
        query.sort(&mut docs);
        let order: Vec<i64> = docs.iter().map(|d| d["createdAt"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_sort_places_missing_field_first_ascending() {
        let query = Query::table("channel").order_by("name", Direction::Asc);
        let mut docs = vec![json!({"name": "b"}), json!({}), json!({"name": "a"})];
        query.sort(&mut docs);
        assert_eq!(docs[0], json!({}));
        assert_eq!(docs[1]["name"], "a");
    }

    #[test]
    fn test_validate_rejects_empty_table() {
        assert!(matches!(
            Query::table("").validate(),
            Err(Error::InvalidQuery(_))
        ));
        assert!(Query::table("user").validate().is_ok());
    }
}
