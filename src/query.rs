use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::value::FieldValue;

// ---------------------------------------------------------------------------
// Sort specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Parse a sort spec into ordered `(field, order)` pairs.
///
/// Accepts an object (`{"name": -1, "age": 1}`, directions may also be
/// `"asc"`/`"desc"`) or a space separated string (`"-name age"`).
/// Null and empty specs produce no keys.
pub fn parse_sort_spec(spec: &Value) -> Result<Vec<(String, SortOrder)>> {
    match spec {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split_whitespace()
            .map(|token| match token.strip_prefix('-') {
                Some(field) => (field.to_string(), SortOrder::Desc),
                None => (token.trim_start_matches('+').to_string(), SortOrder::Asc),
            })
            .collect()),
        Value::Object(obj) => obj
            .iter()
            .map(|(field, dir)| Ok((field.clone(), parse_direction(dir)?)))
            .collect(),
        _ => Err(Error::InvalidQuery(
            "sort must be an object or a string".into(),
        )),
    }
}

fn parse_direction(dir: &Value) -> Result<SortOrder> {
    if let Some(n) = dir.as_i64() {
        return match n {
            1 => Ok(SortOrder::Asc),
            -1 => Ok(SortOrder::Desc),
            _ => Err(Error::InvalidQuery(
                "sort direction must be 1 (asc) or -1 (desc)".into(),
            )),
        };
    }
    match dir.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("asc" | "ascending") => Ok(SortOrder::Asc),
        Some("desc" | "descending") => Ok(SortOrder::Desc),
        _ => Err(Error::InvalidQuery(format!(
            "invalid sort direction: {dir}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Query AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(FieldValue),
    Ne(FieldValue),
    Gt(FieldValue),
    Gte(FieldValue),
    Lt(FieldValue),
    Lte(FieldValue),
    In(Vec<FieldValue>),
    Exists(bool),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub enum Query {
    Field { field: String, op: QueryOp },
    And(Vec<Query>),
    Or(Vec<Query>),
    All,
}

// ---------------------------------------------------------------------------
// Parsing: JSON -> Query AST
// ---------------------------------------------------------------------------

pub fn parse_query(query: &Value) -> Result<Query> {
    let obj = match query {
        Value::Null => return Ok(Query::All),
        Value::Object(obj) => obj,
        _ => return Err(Error::InvalidQuery("query must be a JSON object".into())),
    };

    let mut conditions: Vec<Query> = Vec::new();

    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidQuery(format!("{key} must be an array")))?;
                let subs = arr.iter().map(parse_query).collect::<Result<Vec<_>>>()?;
                conditions.push(if key == "$and" {
                    Query::And(subs)
                } else {
                    Query::Or(subs)
                });
            }
            field => match value.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op_key, op_val) in ops {
                        if op_key == "$options" {
                            continue;
                        }
                        conditions.push(Query::Field {
                            field: field.to_string(),
                            op: parse_op(op_key, op_val, ops)?,
                        });
                    }
                }
                _ => conditions.push(Query::Field {
                    field: field.to_string(),
                    op: QueryOp::Eq(FieldValue::from_json(value)),
                }),
            },
        }
    }

    Ok(match conditions.len() {
        0 => Query::All,
        1 => conditions.remove(0),
        _ => Query::And(conditions),
    })
}

fn parse_op(op_key: &str, op_val: &Value, siblings: &Map<String, Value>) -> Result<QueryOp> {
    let value = FieldValue::from_json(op_val);
    match op_key {
        "$eq" => Ok(QueryOp::Eq(value)),
        "$ne" => Ok(QueryOp::Ne(value)),
        "$gt" => Ok(QueryOp::Gt(value)),
        "$gte" => Ok(QueryOp::Gte(value)),
        "$lt" => Ok(QueryOp::Lt(value)),
        "$lte" => Ok(QueryOp::Lte(value)),
        "$in" => {
            let arr = op_val
                .as_array()
                .ok_or_else(|| Error::InvalidQuery("$in must be an array".into()))?;
            Ok(QueryOp::In(arr.iter().map(FieldValue::from_json).collect()))
        }
        "$exists" => op_val
            .as_bool()
            .map(QueryOp::Exists)
            .ok_or_else(|| Error::InvalidQuery("$exists must be a boolean".into())),
        "$regex" => {
            let pattern = op_val
                .as_str()
                .ok_or_else(|| Error::InvalidQuery("$regex must be a string".into()))?;
            let options = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
            RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .build()
                .map(QueryOp::Regex)
                .map_err(|e| Error::InvalidQuery(format!("invalid $regex: {e}")))
        }
        _ => Err(Error::InvalidQuery(format!("unknown operator: {op_key}"))),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Resolve a dot-notation path on a document.
pub fn resolve_field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

pub fn matches_value(query: &Query, data: &Value) -> bool {
    match query {
        Query::All => true,
        Query::Field { field, op } => {
            let field_val = resolve_field(data, field);
            if let QueryOp::Exists(expected) = op {
                return field_val.is_some() == *expected;
            }
            let Some(val) = field_val else {
                return matches!(op, QueryOp::Ne(_));
            };
            let fv = FieldValue::from_json(val);
            match op {
                QueryOp::Eq(v) => fv == *v,
                QueryOp::Ne(v) => fv != *v,
                QueryOp::Gt(v) => fv > *v,
                QueryOp::Gte(v) => fv >= *v,
                QueryOp::Lt(v) => fv < *v,
                QueryOp::Lte(v) => fv <= *v,
                QueryOp::In(vals) => vals.contains(&fv),
                QueryOp::Regex(re) => val.as_str().is_some_and(|s| re.is_match(s)),
                QueryOp::Exists(_) => unreachable!(),
            }
        }
        Query::And(subs) => subs.iter().all(|s| matches_value(s, data)),
        Query::Or(subs) => subs.iter().any(|s| matches_value(s, data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_eq() {
        let q = parse_query(&json!({"name": "Customer 1"})).unwrap();
        assert!(matches_value(&q, &json!({"name": "Customer 1"})));
        assert!(!matches_value(&q, &json!({"name": "Customer 2"})));
    }

    #[test]
    fn range() {
        let q = parse_query(&json!({"profit": {"$gte": 18, "$lt": 65}})).unwrap();
        assert!(matches_value(&q, &json!({"profit": 30})));
        assert!(!matches_value(&q, &json!({"profit": 10})));
        assert!(!matches_value(&q, &json!({"profit": 70})));
    }

    #[test]
    fn or_of_names() {
        let q = parse_query(&json!({
            "$or": [{"name": "Customer 0"}, {"name": "Customer 1"}]
        }))
        .unwrap();
        assert!(matches_value(&q, &json!({"name": "Customer 1"})));
        assert!(!matches_value(&q, &json!({"name": "Customer 2"})));
    }

    #[test]
    fn regex_case_insensitive() {
        let q = parse_query(&json!({"name": {"$regex": "customer 3", "$options": "i"}})).unwrap();
        assert!(matches_value(&q, &json!({"name": "Customer 3"})));
        assert!(!matches_value(&q, &json!({"name": "Customer 4"})));
        assert!(!matches_value(&q, &json!({"name": 3})));
    }

    #[test]
    fn ne_matches_missing_field() {
        let q = parse_query(&json!({"deleted": {"$ne": true}})).unwrap();
        assert!(matches_value(&q, &json!({"name": "x"})));
        assert!(!matches_value(&q, &json!({"deleted": true})));
    }

    #[test]
    fn non_object_query_rejected() {
        assert!(matches!(
            parse_query(&json!("name")),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn sort_from_string() {
        let keys = parse_sort_spec(&json!("-name profit")).unwrap();
        assert_eq!(
            keys,
            vec![
                ("name".to_string(), SortOrder::Desc),
                ("profit".to_string(), SortOrder::Asc)
            ]
        );
    }

    #[test]
    fn sort_from_object() {
        let keys = parse_sort_spec(&json!({"name": -1, "date": "asc"})).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], ("name".to_string(), SortOrder::Desc));
        assert_eq!(keys[1], ("date".to_string(), SortOrder::Asc));
    }

    #[test]
    fn bad_sort_direction() {
        assert!(parse_sort_spec(&json!({"name": 2})).is_err());
    }
}
