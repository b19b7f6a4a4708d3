use std::cmp::Ordering;

use serde_json::Value;

use crate::backend::Document;
use crate::error::{FeedError, FeedResult};

/// Field path that addresses the document id instead of a stored field.
pub const DOCUMENT_ID: &str = "__name__";
/// Backends reject `in` filters with more values than this.
pub const MAX_IN_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl RangeOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            RangeOp::Lt => ordering == Ordering::Less,
            RangeOp::Le => ordering != Ordering::Greater,
            RangeOp::Gt => ordering == Ordering::Greater,
            RangeOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Equals { field: String, value: Value },
    Range { field: String, op: RangeOp, value: Value },
    In { field: String, values: Vec<Value> },
    OrderBy { field: String, direction: Direction },
    Limit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub constraints: Vec<Constraint>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            constraints: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.constraints.push(Constraint::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_range(mut self, field: &str, op: RangeOp, value: impl Into<Value>) -> Self {
        self.constraints.push(Constraint::Range {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.constraints.push(Constraint::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.constraints.push(Constraint::OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.constraints.push(Constraint::Limit(limit));
        self
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.collection.trim().is_empty() {
            return Err(FeedError::InvalidArgument("collection required".into()));
        }
        for constraint in &self.constraints {
            if let Constraint::In { field, values } = constraint {
                if values.is_empty() || values.len() > MAX_IN_VALUES {
                    return Err(FeedError::InvalidArgument(format!(
                        "`in` filter on {field} takes 1..={MAX_IN_VALUES} values, got {}",
                        values.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.constraints.iter().all(|constraint| match constraint {
            Constraint::Equals { field, value } => doc
                .field(field)
                .map(|found| compare(found, value) == Some(Ordering::Equal))
                .unwrap_or(false),
            Constraint::Range { field, op, value } => doc
                .field(field)
                .and_then(|found| compare(found, value))
                .map(|ordering| op.accepts(ordering))
                .unwrap_or(false),
            Constraint::In { field, values } => doc
                .field(field)
                .map(|found| {
                    values
                        .iter()
                        .any(|value| compare(found, value) == Some(Ordering::Equal))
                })
                .unwrap_or(false),
            Constraint::OrderBy { .. } | Constraint::Limit(_) => true,
        })
    }

    /// Filters, orders and truncates `docs` the way a backend would.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs.into_iter().filter(|doc| self.matches(doc)).collect();

        let orderings: Vec<(&str, Direction)> = self
            .constraints
            .iter()
            .filter_map(|constraint| match constraint {
                Constraint::OrderBy { field, direction } => Some((field.as_str(), *direction)),
                _ => None,
            })
            .collect();
        if !orderings.is_empty() {
            matched.sort_by(|a, b| {
                for (field, direction) in &orderings {
                    let ordering = match (a.field(field), b.field(field)) {
                        (Some(left), Some(right)) => compare(left, right).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    let ordering = match direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let limit = self.constraints.iter().rev().find_map(|constraint| match constraint {
            Constraint::Limit(limit) => Some(*limit),
            _ => None,
        });
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Orders two JSON scalars of the same kind. Mixed kinds do not compare.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document::new(id, data)
    }

    fn sample() -> Vec<Document> {
        vec![
            doc("a", json!({ "type": "restaurant", "geohash": "gc7x9", "isVerified": true, "rank": 3 })),
            doc("b", json!({ "type": "restaurant", "geohash": "gc7xb", "isVerified": false, "rank": 1 })),
            doc("c", json!({ "type": "event", "geohash": "gc7x2", "isVerified": true, "rank": 2 })),
            doc("d", json!({ "type": "restaurant", "geohash": "gc7w1", "isVerified": true })),
        ]
    }

    #[test]
    fn equality_and_range_constraints_combine() {
        let query = Query::collection("locations")
            .where_eq("type", "restaurant")
            .where_eq("isVerified", true)
            .where_range("geohash", RangeOp::Ge, "gc7x")
            .where_range("geohash", RangeOp::Le, "gc7y");
        let ids: Vec<_> = query.apply(sample()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn in_filter_on_document_id_with_order_and_limit() {
        let query = Query::collection("posts")
            .where_in(DOCUMENT_ID, ["a", "b", "c"])
            .order_by("rank", Direction::Desc)
            .limit(2);
        let ids: Vec<_> = query.apply(sample()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn oversized_in_filter_is_rejected() {
        let ids: Vec<String> = (0..11).map(|i| i.to_string()).collect();
        let query = Query::collection("posts").where_in(DOCUMENT_ID, ids);
        assert!(matches!(query.validate(), Err(FeedError::InvalidArgument(_))));
        let empty: Vec<String> = Vec::new();
        assert!(Query::collection("posts").where_in("x", empty).validate().is_err());
    }

    #[test]
    fn mixed_types_never_match() {
        let query = Query::collection("locations").where_eq("rank", "3");
        assert!(query.apply(sample()).is_empty());
    }
}
