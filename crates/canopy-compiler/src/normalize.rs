//! Structural normalization passes.
//!
//! Run in this order by the visitor: [`simplify`], [`pull_up`], then, after
//! extraction, [`split_polarity`] and [`infer_convert`].

use serde_json::Value;

use canopy_expr::ValueExpression;

use crate::condition::{Condition, Count, Operator, Scoped, Subject};

/// Fold constants: `true` drops out of `allOf` and absorbs `anyOf`, `false`
/// the reverse. Empty connectives become their identity element.
pub fn simplify(condition: Condition) -> Condition {
    match condition {
        Condition::AllOf(children) => {
            let mut kept = Vec::with_capacity(children.len());
            for child in children.into_iter().map(simplify) {
                match child {
                    Condition::Constant(true) => {}
                    Condition::Constant(false) => return Condition::Constant(false),
                    other => kept.push(other),
                }
            }
            if kept.is_empty() {
                Condition::Constant(true)
            } else {
                Condition::AllOf(kept)
            }
        }
        Condition::AnyOf(children) => {
            let mut kept = Vec::with_capacity(children.len());
            for child in children.into_iter().map(simplify) {
                match child {
                    Condition::Constant(false) => {}
                    Condition::Constant(true) => return Condition::Constant(true),
                    other => kept.push(other),
                }
            }
            if kept.is_empty() {
                Condition::Constant(false)
            } else {
                Condition::AnyOf(kept)
            }
        }
        Condition::Not(inner) => match simplify(*inner) {
            Condition::Constant(b) => Condition::Constant(!b),
            other => Condition::not(other),
        },
        Condition::Count(c) => Condition::Count(Count {
            predicate: simplify_predicate(c.predicate),
            ..c
        }),
        Condition::Scoped(s) => Condition::Scoped(Scoped {
            predicate: simplify_predicate(s.predicate),
            ..s
        }),
        leaf => leaf,
    }
}

/// A nested predicate that is always true is the same as no predicate.
fn simplify_predicate(predicate: Option<Box<Condition>>) -> Option<Box<Condition>> {
    match predicate.map(|p| simplify(*p)) {
        Some(Condition::Constant(true)) | None => None,
        Some(other) => Some(Box::new(other)),
    }
}

/// Replace single-child connectives with their child and cancel double
/// negation, everywhere in the tree.
///
/// This applies to every single-child node, not only those left behind by
/// initiative flattening, so a source `{"anyOf": [x]}` is emitted as `x`.
pub fn pull_up(condition: Condition) -> Condition {
    match condition {
        Condition::AllOf(mut children) | Condition::AnyOf(mut children) if children.len() == 1 => {
            pull_up(children.remove(0))
        }
        Condition::AllOf(children) => Condition::AllOf(children.into_iter().map(pull_up).collect()),
        Condition::AnyOf(children) => Condition::AnyOf(children.into_iter().map(pull_up).collect()),
        Condition::Not(inner) => match pull_up(*inner) {
            Condition::Not(twice) => *twice,
            other => Condition::not(other),
        },
        Condition::Count(c) => Condition::Count(Count {
            predicate: c.predicate.map(|p| Box::new(pull_up(*p))),
            ..c
        }),
        Condition::Scoped(s) => Condition::Scoped(Scoped {
            predicate: s.predicate.map(|p| Box::new(pull_up(*p))),
            ..s
        }),
        leaf => leaf,
    }
}

/// Mark comparisons whose operands must be coerced before comparing.
///
/// Order comparisons always convert. Equality on a field against a string
/// literal converts, because documents routinely carry numbers and booleans
/// as strings. The `type` field never converts.
pub fn infer_convert(condition: &mut Condition) {
    match condition {
        Condition::AllOf(children) | Condition::AnyOf(children) => children.iter_mut().for_each(infer_convert),
        Condition::Not(inner) => infer_convert(inner),
        Condition::Count(Count { predicate, .. }) | Condition::Scoped(Scoped { predicate, .. }) => {
            if let Some(p) = predicate {
                infer_convert(p);
            }
        }
        Condition::Compare(c) => {
            let is_type = c.field_path().is_some_and(|p| p.is_type());
            let string_operand = matches!(c.operand, ValueExpression::Literal(Value::String(_)));
            let field_equality = matches!(c.subject, Subject::Field(_))
                && matches!(c.operator, Operator::Equals | Operator::NotEquals)
                && string_operand;
            c.convert = !is_type && (c.convert || c.operator.is_ordering() || field_equality);
        }
        Condition::Constant(_) => {}
    }
}

/// Split the non-type remainder of a rule's `if` into `(Where, Condition)`.
///
/// The `if` block describes a non-compliant resource, so the compliance
/// predicate is its inversion. Top-level siblings are sorted by polarity:
/// negative siblings (`not*` operators, `not`, `exists: false`) are inverted
/// into `Condition` while positive siblings narrow applicability in `Where`.
/// Without negative siblings, applicability-class siblings (`location`,
/// `name`, `tags`) move to `Where` and the rest is inverted. A split never
/// leaves `Condition` empty: when nothing is left to invert, `Where` is
/// `None` and `Condition` is the inversion of the whole remainder.
pub fn split_polarity(remainder: Condition) -> (Option<Condition>, Condition) {
    let siblings = match remainder {
        Condition::AllOf(children) => children,
        other => vec![other],
    };

    let (negative, positive): (Vec<_>, Vec<_>) = siblings.into_iter().partition(Condition::is_negative);
    if !negative.is_empty() {
        return (where_clause(positive), invert_all(negative));
    }

    let (applicability, rest): (Vec<_>, Vec<_>) = positive.into_iter().partition(Condition::is_applicability);
    if rest.is_empty() {
        return (None, invert_all(applicability));
    }
    (where_clause(applicability), invert_all(rest))
}

fn where_clause(children: Vec<Condition>) -> Option<Condition> {
    (!children.is_empty()).then(|| Condition::all_of(children))
}

/// Complement of the conjunction of `children`.
fn invert_all(children: Vec<Condition>) -> Condition {
    pull_up(Condition::all_of(children).invert())
}
