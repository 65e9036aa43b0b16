//! Structural pattern matching with unification.
//!
//! A pattern is a JSON value matched against a subject:
//!
//! - `"?name"` - a variable. The first occurrence binds the subject subtree;
//!   later occurrences (or an existing binding) must be structurally equal.
//! - `"?"` - the anonymous variable, matches anything and binds nothing.
//! - scalars - exact equality with the subject (numbers compare by value).
//! - arrays - the subject must be an array of the same length; elements are
//!   matched left to right.
//! - objects - the subject must be an object holding at least every pattern
//!   key; extra subject keys are ignored.
//!
//! Examples:
//! - `{"event": "start"}` matches `{"event": "start", "at": 12}`
//! - `{"from": "?who", "to": "?who"}` matches only when both fields agree
//! - `["?x", 2]` matches `[1, 2]` binding `?x` to `1`

use crate::bindings::{is_anonymous, is_variable, Bindings};
use crate::value::values_equal;
use serde_json::Value;

/// Matches `pattern` against `subject`, extending `bindings`.
///
/// Returns the empty list when there is no match and never panics. A
/// deterministic pattern yields at most one binding set; callers must treat
/// more than one as a structural error. The input bindings are never
/// modified.
pub fn matches(pattern: &Value, subject: &Value, bindings: &Bindings) -> Vec<Bindings> {
    unify(pattern, subject, bindings.clone())
        .into_iter()
        .collect()
}

/// Matches branch patterns for the step engine.
pub trait PatternMatcher: Send + Sync {
    fn matches(&self, pattern: &Value, subject: &Value, bindings: &Bindings) -> Vec<Bindings>;
}

impl<F> PatternMatcher for F
where
    F: Fn(&Value, &Value, &Bindings) -> Vec<Bindings> + Send + Sync,
{
    fn matches(&self, pattern: &Value, subject: &Value, bindings: &Bindings) -> Vec<Bindings> {
        self(pattern, subject, bindings)
    }
}

fn unify(pattern: &Value, subject: &Value, mut bindings: Bindings) -> Option<Bindings> {
    match pattern {
        Value::String(name) if is_variable(name) => {
            if is_anonymous(name) {
                return Some(bindings);
            }
            match bindings.get(name) {
                Some(bound) => values_equal(bound, subject).then_some(bindings),
                None => {
                    bindings.insert(name.clone(), subject.clone());
                    Some(bindings)
                }
            }
        }
        Value::Array(patterns) => {
            let Value::Array(items) = subject else {
                return None;
            };
            if patterns.len() != items.len() {
                return None;
            }
            patterns
                .iter()
                .zip(items)
                .try_fold(bindings, |bs, (p, s)| unify(p, s, bs))
        }
        Value::Object(fields) => {
            let Value::Object(map) = subject else {
                return None;
            };
            fields
                .iter()
                .try_fold(bindings, |bs, (key, p)| unify(p, map.get(key)?, bs))
        }
        scalar => values_equal(scalar, subject).then_some(bindings),
    }
}
