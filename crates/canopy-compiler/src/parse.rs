//! Reading native policy-rule JSON into a [`Condition`] tree.
//!
//! Keys are matched case-insensitively, as the policy service does. Field
//! aliases are mapped to property paths here, and fields inside a `count`
//! predicate are made relative to the counted array.

use serde_json::{Map, Value};

use canopy_contracts::error::{CanopyError, CanopyResult};
use canopy_expr::{template, FieldPath, ValueExpression};

use crate::condition::{Compare, Condition, Count, Operator, Quantifier, Subject};

/// Parse the `if` block (or an existence condition) of `definition_id`.
pub fn parse_condition(raw: &Value, definition_id: &str) -> CanopyResult<Condition> {
    ConditionParser {
        definition_id,
        element_of: None,
    }
    .parse(raw)
}

/// Look up `key` in `obj` ignoring ASCII case.
pub(crate) fn get_ignore_case<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key)
        .or_else(|| obj.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
}

struct ConditionParser<'a> {
    definition_id: &'a str,
    /// The counted array when parsing inside `count.where`.
    element_of: Option<FieldPath>,
}

impl ConditionParser<'_> {
    fn malformed(&self, reason: impl Into<String>) -> CanopyError {
        CanopyError::malformed(self.definition_id, reason)
    }

    fn parse(&self, raw: &Value) -> CanopyResult<Condition> {
        let obj = raw
            .as_object()
            .ok_or_else(|| self.malformed(format!("condition must be an object, found {raw}")))?;

        if let Some(children) = get_ignore_case(obj, "allOf") {
            return Ok(Condition::AllOf(self.parse_list("allOf", children)?));
        }
        if let Some(children) = get_ignore_case(obj, "anyOf") {
            return Ok(Condition::AnyOf(self.parse_list("anyOf", children)?));
        }
        if let Some(inner) = get_ignore_case(obj, "not") {
            return Ok(Condition::not(self.parse(inner)?));
        }
        if let Some(count) = get_ignore_case(obj, "count") {
            return self.parse_count(obj, count);
        }
        if let Some(field) = get_ignore_case(obj, "field") {
            let subject = self.parse_field(field)?;
            return self.parse_compare(obj, subject);
        }
        if let Some(value) = get_ignore_case(obj, "value") {
            let subject = Subject::Value(self.parse_value(value)?);
            return self.parse_compare(obj, subject);
        }

        Err(self.malformed(format!("unrecognized condition {raw}")))
    }

    fn parse_list(&self, key: &str, raw: &Value) -> CanopyResult<Vec<Condition>> {
        raw.as_array()
            .ok_or_else(|| self.malformed(format!("'{key}' must be an array")))?
            .iter()
            .map(|child| self.parse(child))
            .collect()
    }

    fn parse_field(&self, raw: &Value) -> CanopyResult<Subject> {
        let field = raw
            .as_str()
            .ok_or_else(|| self.malformed(format!("'field' must be a string, found {raw}")))?;
        if template::is_expression(field) {
            if self.element_of.is_some() {
                return Err(CanopyError::unsupported(field, "computed field inside a count predicate"));
            }
            return Ok(Subject::PendingField(self.parse_value(raw)?));
        }
        let path = FieldPath::from_policy_field(field)?;
        Ok(Subject::Field(self.relative(path)?))
    }

    fn parse_value(&self, raw: &Value) -> CanopyResult<ValueExpression> {
        let value = ValueExpression::from_policy_value(raw)?;
        match &self.element_of {
            Some(prefix) => value.relative_to(prefix),
            None => Ok(value),
        }
    }

    /// `path` relative to the counted element; `.` for the element itself.
    fn relative(&self, path: FieldPath) -> CanopyResult<FieldPath> {
        let Some(prefix) = &self.element_of else {
            return Ok(path);
        };
        path.strip_prefix(prefix).ok_or_else(|| {
            CanopyError::unsupported(
                path.to_string(),
                format!("field is outside the counted array '{prefix}'"),
            )
        })
    }

    /// The first key of `obj` naming an operator, skipping `skip`.
    fn operator<'v>(&self, obj: &'v Map<String, Value>, skip: &str) -> CanopyResult<(Operator, &'v Value)> {
        obj.iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(skip))
            .find_map(|(k, v)| Operator::from_name(k).map(|op| (op, v)))
            .ok_or_else(|| self.malformed(format!("'{skip}' condition has no operator")))
    }

    fn parse_compare(&self, obj: &Map<String, Value>, subject: Subject) -> CanopyResult<Condition> {
        let skip = match subject {
            Subject::Value(_) => "value",
            _ => "field",
        };
        let (operator, operand) = self.operator(obj, skip)?;
        Ok(Condition::Compare(Compare {
            subject,
            operator,
            operand: self.parse_value(operand)?,
            convert: false,
        }))
    }

    fn parse_count(&self, obj: &Map<String, Value>, raw: &Value) -> CanopyResult<Condition> {
        let count = raw
            .as_object()
            .ok_or_else(|| self.malformed("'count' must be an object"))?;

        if get_ignore_case(count, "value").is_some() {
            return Err(CanopyError::unsupported(raw.to_string(), "value count expressions are not supported"));
        }

        let field = get_ignore_case(count, "field")
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed("'count' requires a 'field'"))?;
        let absolute = FieldPath::from_policy_field(field)?;
        if !absolute.ends_with_wildcard() {
            return Err(self.malformed(format!("counted field '{absolute}' is not an array")));
        }
        let field = self.relative(absolute.clone())?;

        let (operator, threshold) = self.operator(obj, "count")?;
        let quantifier = Quantifier::from_operator(operator)
            .ok_or_else(|| self.malformed(format!("operator '{}' cannot qualify a count", operator.name())))?;

        let predicate = match get_ignore_case(count, "where") {
            Some(inner) => {
                let nested = ConditionParser {
                    definition_id: self.definition_id,
                    element_of: Some(absolute),
                };
                Some(Box::new(nested.parse(inner)?))
            }
            None => None,
        };

        Ok(Condition::Count(Count {
            field,
            quantifier,
            threshold: self.parse_value(threshold)?,
            predicate,
        }))
    }
}
