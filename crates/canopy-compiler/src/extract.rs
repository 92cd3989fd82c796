//! Resource type extraction.
//!
//! Types come from `type equals` and `type in` comparisons reached through
//! `allOf`/`anyOf` only; a type test under `not`, inside a `count`, or inside
//! a scoped block does not say which resources the rule targets.

use serde_json::Value;

use canopy_expr::{FieldPath, Segment, ValueExpression};

use crate::condition::{Compare, Condition, Operator, SelectorKey};

/// Target resource types in discovery order, de-duplicated
/// case-insensitively (the first spelling wins).
pub fn resource_types(condition: &Condition) -> Vec<String> {
    let mut types = Vec::new();
    collect_types(condition, &mut types);
    types
}

fn collect_types(condition: &Condition, types: &mut Vec<String>) {
    match condition {
        Condition::AllOf(children) | Condition::AnyOf(children) => {
            children.iter().for_each(|c| collect_types(c, types));
        }
        Condition::Compare(c) if c.is_type_match() => {
            let values = match c.operand.as_literal() {
                Some(Value::String(t)) => vec![t.as_str()],
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            for t in values {
                push_unique(types, t);
            }
        }
        _ => {}
    }
}

/// Types named by the selectors of scoped blocks anywhere in the tree.
pub fn scoped_types(condition: &Condition) -> Vec<String> {
    let mut types = Vec::new();
    condition.walk(&mut |node| {
        if let Condition::Scoped(s) = node {
            for selector in s.selector.iter().filter(|s| s.key == SelectorKey::Type) {
                push_unique(&mut types, &selector.value);
            }
        }
    });
    types
}

fn push_unique(types: &mut Vec<String>, t: &str) {
    if !types.iter().any(|existing| existing.eq_ignore_ascii_case(t)) {
        types.push(t.to_string());
    }
}

/// True for a type match, or a connective made only of type matches.
fn is_pure_type(condition: &Condition) -> bool {
    match condition {
        Condition::Compare(c) => c.is_type_match(),
        Condition::AllOf(children) | Condition::AnyOf(children) => {
            !children.is_empty() && children.iter().all(is_pure_type)
        }
        _ => false,
    }
}

/// Remove the type tests captured by `Types` from conjunctive positions.
///
/// Returns `None` when nothing but type tests remain.
pub fn strip_types(condition: Condition) -> Option<Condition> {
    match condition {
        c if is_pure_type(&c) => None,
        Condition::AllOf(children) => {
            let kept: Vec<_> = children.into_iter().filter_map(strip_types).collect();
            (!kept.is_empty()).then(|| Condition::all_of(kept))
        }
        other => Some(other),
    }
}

/// The comparison matching `types`: `equals` for one type, `in` for several.
pub fn type_predicate(types: &[String]) -> Condition {
    let (operator, operand) = match types {
        [single] => (Operator::Equals, Value::String(single.clone())),
        _ => (
            Operator::In,
            Value::Array(types.iter().cloned().map(Value::String).collect()),
        ),
    };
    let field = FieldPath::from_segments(vec![Segment::Key("type".to_string())]);
    Condition::Compare(Compare::field(field, operator, ValueExpression::Literal(operand)))
}
