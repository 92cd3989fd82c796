//! The condition tree.
//!
//! A closed set of node kinds covering the predicate language: logical
//! connectives, comparisons on a field or a computed value, count-qualified
//! array predicates, and blocks scoped to related sub-resources. Every pass
//! in the compiler is an exhaustive match over [`Condition`].

use serde::{ser, Serialize, Serializer};
use serde_json::{json, Map, Value};

use canopy_contracts::error::{CanopyError, CanopyResult};
use canopy_expr::{FieldPath, ValueExpression};

/// Comparison operators, named as they are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Like,
    NotLike,
    Match,
    NotMatch,
    MatchInsensitively,
    NotMatchInsensitively,
    Contains,
    NotContains,
    In,
    NotIn,
    ContainsKey,
    NotContainsKey,
    Less,
    LessOrEquals,
    Greater,
    GreaterOrEquals,
    Exists,
}

impl Operator {
    const ALL: [Operator; 19] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Like,
        Operator::NotLike,
        Operator::Match,
        Operator::NotMatch,
        Operator::MatchInsensitively,
        Operator::NotMatchInsensitively,
        Operator::Contains,
        Operator::NotContains,
        Operator::In,
        Operator::NotIn,
        Operator::ContainsKey,
        Operator::NotContainsKey,
        Operator::Less,
        Operator::LessOrEquals,
        Operator::Greater,
        Operator::GreaterOrEquals,
        Operator::Exists,
    ];

    /// Look up an operator by its policy-language key, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::Like => "like",
            Operator::NotLike => "notLike",
            Operator::Match => "match",
            Operator::NotMatch => "notMatch",
            Operator::MatchInsensitively => "matchInsensitively",
            Operator::NotMatchInsensitively => "notMatchInsensitively",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::ContainsKey => "containsKey",
            Operator::NotContainsKey => "notContainsKey",
            Operator::Less => "less",
            Operator::LessOrEquals => "lessOrEquals",
            Operator::Greater => "greater",
            Operator::GreaterOrEquals => "greaterOrEquals",
            Operator::Exists => "exists",
        }
    }

    /// The operator that holds exactly when this one does not.
    ///
    /// `exists` is its own dual; the operand is flipped instead.
    pub fn dual(self) -> Self {
        match self {
            Operator::Equals => Operator::NotEquals,
            Operator::NotEquals => Operator::Equals,
            Operator::Like => Operator::NotLike,
            Operator::NotLike => Operator::Like,
            Operator::Match => Operator::NotMatch,
            Operator::NotMatch => Operator::Match,
            Operator::MatchInsensitively => Operator::NotMatchInsensitively,
            Operator::NotMatchInsensitively => Operator::MatchInsensitively,
            Operator::Contains => Operator::NotContains,
            Operator::NotContains => Operator::Contains,
            Operator::In => Operator::NotIn,
            Operator::NotIn => Operator::In,
            Operator::ContainsKey => Operator::NotContainsKey,
            Operator::NotContainsKey => Operator::ContainsKey,
            Operator::Less => Operator::GreaterOrEquals,
            Operator::GreaterOrEquals => Operator::Less,
            Operator::LessOrEquals => Operator::Greater,
            Operator::Greater => Operator::LessOrEquals,
            Operator::Exists => Operator::Exists,
        }
    }

    /// True for the `not*` operators.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::NotEquals
                | Operator::NotLike
                | Operator::NotMatch
                | Operator::NotMatchInsensitively
                | Operator::NotContains
                | Operator::NotIn
                | Operator::NotContainsKey
        )
    }

    /// True for order comparisons.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::Less | Operator::LessOrEquals | Operator::Greater | Operator::GreaterOrEquals
        )
    }
}

/// What a comparison reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    /// `{"field": ...}`
    Field(FieldPath),
    /// A field whose path is computed from parameters, e.g.
    /// `"[concat('tags[', parameters('tagName'), ']')]"`. Replaced by
    /// `Field` during parameter resolution.
    PendingField(ValueExpression),
    /// `{"value": ...}`
    Value(ValueExpression),
}

/// A leaf comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    pub subject: Subject,
    pub operator: Operator,
    pub operand: ValueExpression,
    /// Coerce operand types before comparing.
    pub convert: bool,
}

impl Compare {
    pub fn field(field: FieldPath, operator: Operator, operand: ValueExpression) -> Self {
        Self {
            subject: Subject::Field(field),
            operator,
            operand,
            convert: false,
        }
    }

    /// The field path, if the subject is a resolved field.
    pub fn field_path(&self) -> Option<&FieldPath> {
        match &self.subject {
            Subject::Field(path) => Some(path),
            _ => None,
        }
    }

    /// True for `type equals ...` and `type in [...]`.
    pub fn is_type_match(&self) -> bool {
        self.field_path().is_some_and(FieldPath::is_type)
            && matches!(self.operator, Operator::Equals | Operator::In)
    }

    /// True for `not*` operators and `exists: false`.
    pub fn is_negative(&self) -> bool {
        self.operator.is_negative()
            || (self.operator == Operator::Exists && exists_flag(&self.operand) == Some(false))
    }
}

/// Reads an `exists` operand, accepting `"true"`/`"false"` strings.
fn exists_flag(operand: &ValueExpression) -> Option<bool> {
    match operand.as_literal()? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Cardinality qualifiers for [`Count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Count,
    NotCount,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Quantifier {
    /// Map the operator of a native `count` expression.
    pub fn from_operator(operator: Operator) -> Option<Self> {
        match operator {
            Operator::Equals => Some(Quantifier::Count),
            Operator::NotEquals => Some(Quantifier::NotCount),
            Operator::Greater => Some(Quantifier::Greater),
            Operator::GreaterOrEquals => Some(Quantifier::GreaterOrEqual),
            Operator::Less => Some(Quantifier::Less),
            Operator::LessOrEquals => Some(Quantifier::LessOrEqual),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Quantifier::Count => "count",
            Quantifier::NotCount => "notCount",
            Quantifier::Greater => "greater",
            Quantifier::GreaterOrEqual => "greaterOrEqual",
            Quantifier::Less => "less",
            Quantifier::LessOrEqual => "lessOrEqual",
        }
    }

    pub fn dual(self) -> Self {
        match self {
            Quantifier::Count => Quantifier::NotCount,
            Quantifier::NotCount => Quantifier::Count,
            Quantifier::Greater => Quantifier::LessOrEqual,
            Quantifier::LessOrEqual => Quantifier::Greater,
            Quantifier::GreaterOrEqual => Quantifier::Less,
            Quantifier::Less => Quantifier::GreaterOrEqual,
        }
    }
}

/// "`quantifier` `threshold` elements of `field` satisfy `predicate`".
#[derive(Debug, Clone, PartialEq)]
pub struct Count {
    /// The counted array, ending in `[*]`.
    pub field: FieldPath,
    pub quantifier: Quantifier,
    pub threshold: ValueExpression,
    /// Fields inside are relative to one array element. `None` counts every
    /// element.
    pub predicate: Option<Box<Condition>>,
}

/// Which attribute of a related resource a selector matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKey {
    Type,
    Name,
}

impl SelectorKey {
    fn name(self) -> &'static str {
        match self {
            SelectorKey::Type => "type",
            SelectorKey::Name => "name",
        }
    }
}

/// One `where` term of a scoped block: `{"type": ".", "equals": value}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub key: SelectorKey,
    pub value: String,
}

/// A predicate over related sub-resources of the matched resource: "at least
/// one item of `field` matching `selector` satisfies `predicate`".
#[derive(Debug, Clone, PartialEq)]
pub struct Scoped {
    /// The sub-resource collection, normally `resources`.
    pub field: FieldPath,
    pub selector: Vec<Selector>,
    /// `None` when existence of a matching item is enough.
    pub predicate: Option<Box<Condition>>,
}

/// A node of the condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    AllOf(Vec<Condition>),
    AnyOf(Vec<Condition>),
    Not(Box<Condition>),
    Compare(Compare),
    Count(Count),
    Scoped(Scoped),
    /// A predicate already known to be true or false.
    Constant(bool),
}

impl Condition {
    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    /// Conjunction of `children`, without wrapping a single child.
    pub fn all_of(mut children: Vec<Condition>) -> Self {
        if children.len() == 1 {
            children.remove(0)
        } else {
            Condition::AllOf(children)
        }
    }

    /// Disjunction of `children`, without wrapping a single child.
    pub fn any_of(mut children: Vec<Condition>) -> Self {
        if children.len() == 1 {
            children.remove(0)
        } else {
            Condition::AnyOf(children)
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Condition::AllOf(_) | Condition::AnyOf(_) | Condition::Not(_))
    }

    /// True for `not` nodes and negative comparisons.
    pub fn is_negative(&self) -> bool {
        match self {
            Condition::Not(_) => true,
            Condition::Compare(c) => c.is_negative(),
            _ => false,
        }
    }

    /// True when the node only tests applicability-class fields (`type`,
    /// `location`, `name`, `tags`).
    pub fn is_applicability(&self) -> bool {
        match self {
            Condition::Compare(c) => c.field_path().is_some_and(FieldPath::is_applicability),
            Condition::AllOf(children) | Condition::AnyOf(children) => {
                !children.is_empty() && children.iter().all(Condition::is_applicability)
            }
            Condition::Not(inner) => inner.is_applicability(),
            _ => false,
        }
    }

    /// The logical complement of this node.
    pub fn invert(self) -> Condition {
        match self {
            Condition::AllOf(children) => Condition::AnyOf(children.into_iter().map(Condition::invert).collect()),
            Condition::AnyOf(children) => Condition::AllOf(children.into_iter().map(Condition::invert).collect()),
            Condition::Not(inner) => *inner,
            Condition::Constant(b) => Condition::Constant(!b),
            Condition::Compare(mut c) => {
                if c.operator == Operator::Exists {
                    match exists_flag(&c.operand) {
                        Some(flag) => {
                            c.operand = ValueExpression::Literal(Value::Bool(!flag));
                            Condition::Compare(c)
                        }
                        None => Condition::not(Condition::Compare(c)),
                    }
                } else {
                    c.operator = c.operator.dual();
                    Condition::Compare(c)
                }
            }
            Condition::Count(mut c) => {
                c.quantifier = c.quantifier.dual();
                Condition::Count(c)
            }
            scoped @ Condition::Scoped(_) => Condition::not(scoped),
        }
    }

    /// Visit this node and every descendant in pre-order, including count
    /// and scoped predicates.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        f(self);
        match self {
            Condition::AllOf(children) | Condition::AnyOf(children) => children.iter().for_each(|c| c.walk(f)),
            Condition::Not(inner) => inner.walk(f),
            Condition::Count(Count { predicate, .. }) | Condition::Scoped(Scoped { predicate, .. }) => {
                if let Some(p) = predicate {
                    p.walk(f);
                }
            }
            Condition::Compare(_) | Condition::Constant(_) => {}
        }
    }

    /// Serialize to the compiled rule form.
    ///
    /// Fails if any value is still unresolved.
    pub fn to_json(&self) -> CanopyResult<Value> {
        match self {
            Condition::AllOf(children) => Ok(json!({ "allOf": to_json_all(children)? })),
            Condition::AnyOf(children) => Ok(json!({ "anyOf": to_json_all(children)? })),
            Condition::Not(inner) => Ok(json!({ "not": inner.to_json()? })),
            Condition::Constant(b) => Ok(json!({ "value": true, "equals": b })),
            Condition::Compare(c) => {
                let mut obj = Map::new();
                match &c.subject {
                    Subject::Field(path) => {
                        obj.insert("field".to_string(), Value::String(path.to_string()));
                    }
                    Subject::Value(value) => {
                        obj.insert("value".to_string(), value.to_json()?);
                    }
                    Subject::PendingField(expr) => {
                        return Err(CanopyError::unsupported(format!("{expr:?}"), "field path is not resolved"))
                    }
                }
                obj.insert(c.operator.name().to_string(), c.operand.to_json()?);
                if c.convert {
                    obj.insert("convert".to_string(), Value::Bool(true));
                }
                Ok(Value::Object(obj))
            }
            Condition::Count(c) => {
                let mut obj = Map::new();
                let field = match c.predicate {
                    Some(_) => c.field.clone(),
                    None => c.field.without_trailing_wildcard(),
                };
                obj.insert("field".to_string(), Value::String(field.to_string()));
                obj.insert(c.quantifier.name().to_string(), c.threshold.to_json()?);
                if let Some(predicate) = &c.predicate {
                    insert_predicate(&mut obj, predicate)?;
                }
                Ok(Value::Object(obj))
            }
            Condition::Scoped(s) => {
                let mut obj = Map::new();
                obj.insert("field".to_string(), Value::String(s.field.to_string()));
                obj.insert("where".to_string(), selector_json(&s.selector));
                match &s.predicate {
                    Some(predicate) => insert_predicate(&mut obj, predicate)?,
                    None => {
                        obj.insert("greaterOrEqual".to_string(), json!(1));
                    }
                }
                Ok(Value::Object(obj))
            }
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().map_err(<S::Error as ser::Error>::custom)?.serialize(serializer)
    }
}

fn to_json_all(children: &[Condition]) -> CanopyResult<Vec<Value>> {
    children.iter().map(Condition::to_json).collect()
}

/// Attach a nested predicate as `allOf`/`anyOf`; a single leaf becomes a
/// one-element `allOf`.
fn insert_predicate(obj: &mut Map<String, Value>, predicate: &Condition) -> CanopyResult<()> {
    let (key, children) = match predicate {
        Condition::AllOf(children) => ("allOf", to_json_all(children)?),
        Condition::AnyOf(children) => ("anyOf", to_json_all(children)?),
        other => ("allOf", vec![other.to_json()?]),
    };
    obj.insert(key.to_string(), Value::Array(children));
    Ok(())
}

fn selector_json(selector: &[Selector]) -> Value {
    let terms: Vec<Value> = selector
        .iter()
        .map(|s| json!({ s.key.name(): ".", "equals": s.value }))
        .collect();
    match <[Value; 1]>::try_from(terms) {
        Ok([single]) => single,
        Err(terms) => json!({ "allOf": terms }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    fn leaf(p: &str, operator: Operator, operand: Value) -> Condition {
        Condition::Compare(Compare::field(path(p), operator, ValueExpression::Literal(operand)))
    }

    #[test]
    fn operators_have_involutive_duals() {
        for op in Operator::ALL {
            assert_eq!(op.dual().dual(), op, "{}", op.name());
            assert_eq!(Operator::from_name(&op.name().to_uppercase()), Some(op));
        }
        assert_eq!(Operator::Less.dual(), Operator::GreaterOrEquals);
        assert_eq!(Quantifier::GreaterOrEqual.dual(), Quantifier::Less);
    }

    #[test]
    fn compare_serializes_with_convert() {
        let mut c = Compare::field(
            path("properties.networkAcls.defaultAction"),
            Operator::Equals,
            ValueExpression::Literal(json!("Deny")),
        );
        c.convert = true;
        assert_eq!(
            Condition::Compare(c).to_json().unwrap(),
            json!({ "field": "properties.networkAcls.defaultAction", "equals": "Deny", "convert": true })
        );
    }

    #[test]
    fn count_serializes_with_and_without_predicate() {
        let with_predicate = Condition::Count(Count {
            field: path("properties.logs[*]"),
            quantifier: Quantifier::GreaterOrEqual,
            threshold: ValueExpression::Literal(json!(1)),
            predicate: Some(Box::new(Condition::AnyOf(vec![
                leaf("enabled", Operator::Equals, json!(true)),
                leaf("category", Operator::Equals, json!("Audit")),
            ]))),
        });
        assert_eq!(
            with_predicate.to_json().unwrap(),
            json!({
                "field": "properties.logs[*]",
                "greaterOrEqual": 1,
                "anyOf": [
                    { "field": "enabled", "equals": true },
                    { "field": "category", "equals": "Audit" }
                ]
            })
        );

        let bare = Condition::Count(Count {
            field: path("properties.ipRules[*]"),
            quantifier: Quantifier::NotCount,
            threshold: ValueExpression::Literal(json!(0)),
            predicate: None,
        });
        assert_eq!(bare.to_json().unwrap(), json!({ "field": "properties.ipRules", "notCount": 0 }));
    }

    #[test]
    fn scoped_serializes_selector_forms() {
        let single = Condition::Scoped(Scoped {
            field: path("resources"),
            selector: vec![Selector {
                key: SelectorKey::Type,
                value: "Microsoft.Insights/diagnosticSettings".into(),
            }],
            predicate: Some(Box::new(leaf("properties.enabled", Operator::Equals, json!(true)))),
        });
        assert_eq!(
            single.to_json().unwrap(),
            json!({
                "field": "resources",
                "where": { "type": ".", "equals": "Microsoft.Insights/diagnosticSettings" },
                "allOf": [ { "field": "properties.enabled", "equals": true } ]
            })
        );

        let named = Condition::Scoped(Scoped {
            field: path("resources"),
            selector: vec![
                Selector {
                    key: SelectorKey::Type,
                    value: "Microsoft.Sql/servers/auditingSettings".into(),
                },
                Selector {
                    key: SelectorKey::Name,
                    value: "default".into(),
                },
            ],
            predicate: None,
        });
        assert_eq!(
            named.to_json().unwrap(),
            json!({
                "field": "resources",
                "where": { "allOf": [
                    { "type": ".", "equals": "Microsoft.Sql/servers/auditingSettings" },
                    { "name": ".", "equals": "default" }
                ]},
                "greaterOrEqual": 1
            })
        );
    }

    #[test]
    fn invert_applies_duals_and_de_morgan() {
        let tree = Condition::AllOf(vec![
            leaf("location", Operator::NotIn, json!(["eastus"])),
            leaf("properties.publicNetworkAccess", Operator::Exists, json!("false")),
            Condition::not(leaf("tags.env", Operator::Equals, json!("prod"))),
            Condition::Constant(true),
        ]);
        assert_eq!(
            tree.invert(),
            Condition::AnyOf(vec![
                leaf("location", Operator::In, json!(["eastus"])),
                leaf("properties.publicNetworkAccess", Operator::Exists, json!(true)),
                leaf("tags.env", Operator::Equals, json!("prod")),
                Condition::Constant(false),
            ])
        );
    }

    #[test]
    fn negativity_and_applicability() {
        assert!(leaf("tags.NSW", Operator::NotIn, json!(["0"])).is_negative());
        assert!(leaf("properties.x", Operator::Exists, json!(false)).is_negative());
        assert!(!leaf("properties.x", Operator::Exists, json!(true)).is_negative());
        assert!(leaf("tags['env']", Operator::Equals, json!("prod")).is_applicability());
        assert!(!leaf("properties.sku", Operator::Equals, json!("basic")).is_applicability());
    }

    #[test]
    fn unresolved_values_fail_serialization() {
        let c = Condition::Compare(Compare::field(
            path("properties.adminLogin"),
            Operator::Equals,
            ValueExpression::Parameter("adminLogin".into()),
        ));
        assert!(c.to_json().is_err());
        assert!(serde_json::to_value(&c).is_err());
        assert_eq!(Condition::Constant(false).to_json().unwrap(), json!({ "value": true, "equals": false }));
    }
}
