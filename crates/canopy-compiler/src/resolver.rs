//! Parameter resolution.
//!
//! A [`ParameterScope`] answers "what is the value of `parameters('x')`?" for
//! one policy being compiled. For a single policy the answer comes from the
//! assignment override, then the policy's declared default. For an initiative
//! member the member's parameter is first mapped through the initiative's
//! binding (usually `[parameters('initiativeParam')]`), looked up in the
//! assignment overrides and the initiative's defaults, and only then falls
//! back to the member policy's own default.
//!
//! Values that cannot be inlined (secure, non-literal, or missing) resolve to
//! [`ValueExpression::Absent`]; [`resolve`] then drops every predicate that
//! depends on them.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use canopy_contracts::error::CanopyResult;
use canopy_expr::{template, ExpressionClassifier, FieldPath, ValueExpression};

use crate::condition::{Compare, Condition, Count, Scoped, Subject};

/// Case-insensitive lookup in a parameter map.
fn lookup<'a>(map: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Value> {
    map.get(name)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

/// The initiative-member half of a scope.
#[derive(Debug, Clone)]
struct MemberBinding {
    /// Member parameter name → raw binding value.
    bindings: BTreeMap<String, Value>,
    /// The member policy's declared defaults.
    defaults: BTreeMap<String, Value>,
}

/// Parameter values visible to one policy under one assignment.
pub struct ParameterScope<'a> {
    /// Assignment-level overrides.
    overrides: BTreeMap<String, Value>,
    /// Declared defaults of the assigned definition or initiative.
    defaults: BTreeMap<String, Value>,
    member: Option<MemberBinding>,
    classifier: &'a dyn ExpressionClassifier,
    secure: &'a [String],
}

impl<'a> ParameterScope<'a> {
    /// Scope for a policy assigned directly.
    pub fn for_policy(
        overrides: BTreeMap<String, Value>,
        defaults: BTreeMap<String, Value>,
        classifier: &'a dyn ExpressionClassifier,
        secure: &'a [String],
    ) -> Self {
        Self {
            overrides,
            defaults,
            member: None,
            classifier,
            secure,
        }
    }

    /// Scope for a member policy of an assigned initiative.
    pub fn for_member(
        overrides: BTreeMap<String, Value>,
        initiative_defaults: BTreeMap<String, Value>,
        bindings: BTreeMap<String, Value>,
        member_defaults: BTreeMap<String, Value>,
        classifier: &'a dyn ExpressionClassifier,
        secure: &'a [String],
    ) -> Self {
        Self {
            overrides,
            defaults: initiative_defaults,
            member: Some(MemberBinding {
                bindings,
                defaults: member_defaults,
            }),
            classifier,
            secure,
        }
    }

    fn is_secure_name(&self, name: &str) -> bool {
        self.secure.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    /// Resolve `parameters(name)` for the policy being compiled.
    pub fn parameter(&self, name: &str) -> ValueExpression {
        let Some(member) = &self.member else {
            return self.assigned(name);
        };

        let bound = match lookup(&member.bindings, name) {
            Some(binding) => self.bind_member(binding),
            None => ValueExpression::Absent,
        };
        if !bound.is_absent() {
            return bound;
        }
        match lookup(&member.defaults, name) {
            Some(default) if !self.is_secure_name(name) => self.admit(default),
            _ => ValueExpression::Absent,
        }
    }

    /// Assignment override, then declared default, of a top-level parameter.
    fn assigned(&self, name: &str) -> ValueExpression {
        if self.is_secure_name(name) {
            debug!(parameter = %name, "secure parameter left unresolved");
            return ValueExpression::Absent;
        }
        if let Some(value) = lookup(&self.overrides, name) {
            return self.admit(value);
        }
        match lookup(&self.defaults, name) {
            Some(value) => self.admit(value),
            None => ValueExpression::Absent,
        }
    }

    /// Evaluate an initiative binding against the initiative's scope.
    fn bind_member(&self, binding: &Value) -> ValueExpression {
        let Value::String(raw) = binding else {
            return ValueExpression::Literal(binding.clone());
        };
        if self.classifier.classify(raw, self.secure).is_secure {
            return ValueExpression::Absent;
        }
        match ValueExpression::from_policy_value(binding) {
            Ok(expr) => expr.bind(&|name: &str| self.assigned(name)),
            Err(err) => {
                debug!(binding = %raw, error = %err, "initiative binding is not usable");
                ValueExpression::Absent
            }
        }
    }

    /// Decide whether a concrete value may be inlined.
    fn admit(&self, value: &Value) -> ValueExpression {
        let Value::String(raw) = value else {
            return ValueExpression::Literal(value.clone());
        };
        let classification = self.classifier.classify(raw, self.secure);
        if classification.is_secure {
            return ValueExpression::Absent;
        }
        if !template::is_expression(raw) {
            return ValueExpression::Literal(Value::String(template::unescape_literal(raw).to_string()));
        }
        if !classification.is_literal {
            return ValueExpression::Absent;
        }
        match ValueExpression::from_policy_value(value).map(|e| e.bind(&|_: &str| ValueExpression::Absent)) {
            Ok(literal @ ValueExpression::Literal(_)) => literal,
            _ => ValueExpression::Absent,
        }
    }

    /// Resolve a raw JSON value, e.g. `then.effect`.
    pub fn resolve_value(&self, raw: &Value) -> CanopyResult<ValueExpression> {
        Ok(ValueExpression::from_policy_value(raw)?.bind(&|name: &str| self.parameter(name)))
    }

    fn bind(&self, value: ValueExpression) -> ValueExpression {
        value.bind(&|name: &str| self.parameter(name))
    }
}

/// Substitute parameters throughout `condition`.
///
/// Returns `Ok(None)` when every predicate depended on an unresolved value.
/// A logical node whose children were all dropped becomes its identity
/// element: `true` for `allOf`, `false` for `anyOf`.
pub fn resolve(condition: Condition, scope: &ParameterScope<'_>) -> CanopyResult<Option<Condition>> {
    match condition {
        Condition::AllOf(children) => {
            let kept = resolve_all(children, scope)?;
            Ok(Some(if kept.is_empty() {
                Condition::Constant(true)
            } else {
                Condition::AllOf(kept)
            }))
        }
        Condition::AnyOf(children) => {
            let kept = resolve_all(children, scope)?;
            Ok(Some(if kept.is_empty() {
                Condition::Constant(false)
            } else {
                Condition::AnyOf(kept)
            }))
        }
        Condition::Not(inner) => Ok(resolve(*inner, scope)?.map(Condition::not)),
        Condition::Compare(c) => resolve_compare(c, scope),
        Condition::Count(c) => {
            let threshold = scope.bind(c.threshold);
            if threshold.is_absent() {
                return Ok(None);
            }
            let predicate = match c.predicate {
                Some(p) => match resolve(*p, scope)? {
                    Some(p) => Some(Box::new(p)),
                    None => return Ok(None),
                },
                None => None,
            };
            Ok(Some(Condition::Count(Count {
                threshold,
                predicate,
                ..c
            })))
        }
        Condition::Scoped(s) => {
            let predicate = match s.predicate {
                Some(p) => match resolve(*p, scope)? {
                    Some(p) => Some(Box::new(p)),
                    None => return Ok(None),
                },
                None => None,
            };
            Ok(Some(Condition::Scoped(Scoped { predicate, ..s })))
        }
        constant @ Condition::Constant(_) => Ok(Some(constant)),
    }
}

fn resolve_all(children: Vec<Condition>, scope: &ParameterScope<'_>) -> CanopyResult<Vec<Condition>> {
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        if let Some(child) = resolve(child, scope)? {
            kept.push(child);
        }
    }
    Ok(kept)
}

fn resolve_compare(c: Compare, scope: &ParameterScope<'_>) -> CanopyResult<Option<Condition>> {
    let subject = match c.subject {
        Subject::Field(path) => Subject::Field(path),
        Subject::PendingField(expr) => match scope.bind(expr) {
            ValueExpression::Literal(Value::String(field)) => Subject::Field(FieldPath::from_policy_field(&field)?),
            _ => return Ok(None),
        },
        Subject::Value(expr) => match scope.bind(expr) {
            ValueExpression::Absent => return Ok(None),
            value => Subject::Value(value),
        },
    };
    let operand = scope.bind(c.operand);
    if operand.is_absent() {
        return Ok(None);
    }
    Ok(Some(Condition::Compare(Compare {
        subject,
        operand,
        ..c
    })))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use canopy_expr::TokenClassifier;

    use super::*;
    use crate::parse::parse_condition;

    fn map(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn resolve_json(raw: Value, scope: &ParameterScope<'_>) -> Option<Value> {
        let tree = parse_condition(&raw, "def").unwrap();
        resolve(tree, scope).unwrap().map(|c| c.to_json().unwrap())
    }

    #[test]
    fn override_wins_over_default() {
        let scope = ParameterScope::for_policy(
            map(json!({ "adminLogin": "sa-admin" })),
            map(json!({ "adminLogin": "admin", "sku": "Standard" })),
            &TokenClassifier,
            &[],
        );
        let resolved = resolve_json(
            json!({ "allOf": [
                { "field": "properties.administratorLogin", "notEquals": "[parameters('adminLogin')]" },
                { "field": "sku.tier", "equals": "[parameters('SKU')]" }
            ]}),
            &scope,
        )
        .unwrap();
        assert_eq!(
            resolved,
            json!({ "allOf": [
                { "field": "properties.administratorLogin", "notEquals": "sa-admin" },
                { "field": "sku.tier", "equals": "Standard" }
            ]})
        );
    }

    #[test]
    fn member_parameters_flow_through_bindings() {
        let scope = ParameterScope::for_member(
            map(json!({ "allowedLocations": ["australiaeast"] })),
            map(json!({ "allowedLocations": ["eastus"], "effect": "Audit" })),
            map(json!({
                "listOfAllowedLocations": "[parameters('allowedLocations')]",
                "unboundInitiativeParam": "[parameters('missing')]"
            })),
            map(json!({ "unboundInitiativeParam": "fallback" })),
            &TokenClassifier,
            &[],
        );

        assert_eq!(scope.parameter("listOfAllowedLocations"), ValueExpression::Literal(json!(["australiaeast"])));
        assert_eq!(scope.parameter("unboundInitiativeParam"), ValueExpression::Literal(json!("fallback")));
        assert!(scope.parameter("notDeclared").is_absent());
    }

    #[test]
    fn unresolved_leaves_are_dropped_with_identity_elements() {
        let scope = ParameterScope::for_policy(BTreeMap::new(), BTreeMap::new(), &TokenClassifier, &[]);

        let resolved = resolve_json(
            json!({ "allOf": [
                { "field": "type", "equals": "Microsoft.Sql/servers" },
                { "field": "location", "in": "[parameters('allowed')]" }
            ]}),
            &scope,
        )
        .unwrap();
        assert_eq!(resolved, json!({ "allOf": [ { "field": "type", "equals": "Microsoft.Sql/servers" } ] }));

        let resolved = resolve_json(
            json!({ "anyOf": [ { "field": "location", "in": "[parameters('allowed')]" } ] }),
            &scope,
        )
        .unwrap();
        assert_eq!(resolved, json!({ "value": true, "equals": false }));

        assert!(resolve_json(json!({ "field": "name", "equals": "[parameters('x')]" }), &scope).is_none());
    }

    #[test]
    fn secure_and_non_literal_overrides_are_not_inlined() {
        let secure = vec!["adminPassword".to_string()];
        let scope = ParameterScope::for_policy(
            map(json!({
                "adminPassword": "hunter2",
                "fromKeys": "[listKeys(resourceId('Microsoft.Storage/storageAccounts', 'sa'), '2021-09-01').keys[0].value]",
                "secret": "{{SecretReference name}}",
                "computed": "[concat('pre', '-', 'fix')]"
            })),
            BTreeMap::new(),
            &TokenClassifier,
            &secure,
        );
        assert!(scope.parameter("adminPassword").is_absent());
        assert!(scope.parameter("AdminPassword").is_absent());
        assert!(scope.parameter("fromKeys").is_absent());
        assert!(scope.parameter("secret").is_absent());
        assert_eq!(scope.parameter("computed"), ValueExpression::Literal(json!("pre-fix")));
    }

    #[test]
    fn computed_field_names_resolve_to_paths() {
        let scope = ParameterScope::for_policy(
            map(json!({ "tagName": "CostCenter" })),
            BTreeMap::new(),
            &TokenClassifier,
            &[],
        );
        let resolved = resolve_json(
            json!({ "field": "[concat('tags[', parameters('tagName'), ']')]", "exists": "false" }),
            &scope,
        )
        .unwrap();
        assert_eq!(resolved, json!({ "field": "tags['CostCenter']", "exists": "false" }));
    }

    #[test]
    fn resolves_effect_values() {
        let scope = ParameterScope::for_policy(
            BTreeMap::new(),
            map(json!({ "effect": "AuditIfNotExists" })),
            &TokenClassifier,
            &[],
        );
        assert_eq!(
            scope.resolve_value(&json!("[parameters('effect')]")).unwrap(),
            ValueExpression::Literal(json!("AuditIfNotExists"))
        );
    }
}
