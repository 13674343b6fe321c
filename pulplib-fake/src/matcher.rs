//! Evaluation of search criteria against in-memory objects.
//!
//! Semantics follow what Pulp's mongo queries do for the matchers the
//! model can express: a missing field only equals null, an array field
//! matches if any element does, and numbers compare by value.

use std::cmp::Ordering;

use pulplib::PulpError;
use pulplib_proto::data::{lookup, pulp_name};
use pulplib_proto::task::TASK_FIELDS;
use pulplib_proto::{Criteria, Matcher, Task};
use serde_json::Value;

/// Rejects criteria the server would refuse before looking at any data.
fn validate(criteria: &Criteria) -> Result<(), PulpError> {
    match criteria {
        Criteria::True | Criteria::Field { .. } => Ok(()),
        Criteria::And(ops) if ops.is_empty() => {
            Err(PulpError::Invalid("Invalid AND in search query".into()))
        }
        Criteria::Or(ops) if ops.is_empty() => {
            Err(PulpError::Invalid("Invalid OR in search query".into()))
        }
        Criteria::And(ops) | Criteria::Or(ops) => ops.iter().try_for_each(validate),
    }
}

/// Keeps the items matching `criteria`, in their original order.
///
/// `field` reads a field by name, returning `None` when it is absent or
/// null.
///
/// # Errors
///
/// Returns [`PulpError::Invalid`] for an empty `And` or `Or`.
pub fn select<T, F>(items: Vec<T>, criteria: &Criteria, field: F) -> Result<Vec<T>, PulpError>
where
    F: Fn(&T, &str) -> Option<Value>,
{
    validate(criteria)?;
    Ok(items
        .into_iter()
        .filter(|item| matches(criteria, &|name| field(item, name)))
        .collect())
}

fn matches(criteria: &Criteria, field: &dyn Fn(&str) -> Option<Value>) -> bool {
    match criteria {
        Criteria::True => true,
        Criteria::And(ops) => ops.iter().all(|c| matches(c, field)),
        Criteria::Or(ops) => ops.iter().any(|c| matches(c, field)),
        Criteria::Field { name, matcher } => field_matches(field(name).as_ref(), matcher),
    }
}

fn field_matches(value: Option<&Value>, matcher: &Matcher) -> bool {
    match (matcher, value) {
        (Matcher::Exists, found) => found.is_some(),
        (Matcher::Equals(Value::Null), None) => true,
        (_, None) => false,
        (Matcher::Equals(expected), Some(v)) => any_element(v, |x| values_equal(x, expected)),
        (Matcher::Regex(pattern), Some(v)) => {
            any_element(v, |x| x.as_str().is_some_and(|s| pattern.is_match(s)))
        }
        (Matcher::In(options), Some(v)) => {
            any_element(v, |x| options.iter().any(|o| values_equal(x, o)))
        }
        (Matcher::LessThan(bound), Some(v)) => {
            any_element(v, |x| compare(x, bound) == Some(Ordering::Less))
        }
    }
}

/// Applies `test` to the value itself and, for arrays, to each element.
fn any_element(value: &Value, test: impl Fn(&Value) -> bool) -> bool {
    test(value) || value.as_array().is_some_and(|items| items.iter().any(&test))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Reads a task field by model name or Pulp path.
#[must_use]
pub fn task_field(task: &Task, name: &str) -> Option<Value> {
    let data = task.to_data();
    let path = pulp_name(TASK_FIELDS, name).unwrap_or(name);
    lookup(&data, path).filter(|v| !v.is_null()).cloned()
}
