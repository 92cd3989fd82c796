//! The assignment visitor: the compiler's orchestrator.
//!
//! For each assignment the visitor resolves the referenced definition,
//! expands initiatives into their member policies, and runs every policy
//! through the pipeline:
//!
//!   parse → resolve parameters → simplify/pull-up → extract types →
//!   split Where/Condition → infer convert → identity → context
//!
//! Each policy is an independent unit. A failure is recorded in the context
//! against that one definition and the visitor moves on to the next; nothing
//! a document contains can abort the batch.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use canopy_contracts::{
    document::{EffectDetails, PolicyAssignment, PolicyDefinitionSource},
    error::{CanopyError, CanopyResult},
    rule::{CompiledRule, RuleSelector},
};
use canopy_expr::{ExpressionClassifier, FieldPath, Segment, TokenClassifier, ValueExpression};

use crate::{
    condition::{Condition, Scoped, Selector, SelectorKey},
    context::{CompilationContext, CompileFailure},
    extract, identity, metadata, normalize,
    parse::parse_condition,
    resolver::{self, ParameterScope},
    traits::DefinitionSource,
};

/// Field holding the related sub-resources of a matched resource.
const RELATED_RESOURCES_FIELD: &str = "resources";

/// Drives compilation of assignments into a [`CompilationContext`].
pub struct AssignmentVisitor {
    source: Box<dyn DefinitionSource>,
    classifier: Box<dyn ExpressionClassifier>,
}

impl AssignmentVisitor {
    /// Create a visitor reading definitions from `source`, with the default
    /// [`TokenClassifier`].
    pub fn new(source: Box<dyn DefinitionSource>) -> Self {
        Self {
            source,
            classifier: Box::new(TokenClassifier),
        }
    }

    /// Replace the expression classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn ExpressionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Compile every policy reachable from `assignment` into `ctx`.
    ///
    /// Never fails: ignored definitions are noted in `ctx.ignored()`, broken
    /// ones in `ctx.failures()`.
    pub fn visit(&self, ctx: &mut CompilationContext, assignment: &PolicyAssignment) {
        let assignment_key = assignment.key().to_string();
        let definition_id = assignment.definition_id();

        info!(
            run_id = %ctx.run_id(),
            assignment = %assignment_key,
            definition_id = %definition_id,
            "visiting assignment"
        );

        if ctx.options().is_ignored(definition_id) {
            ctx.record_ignored(definition_id);
            return;
        }

        let definition = match self.source.definition(definition_id) {
            Ok(definition) => definition,
            Err(err) => {
                fail(ctx, &assignment_key, definition_id, &err);
                return;
            }
        };

        let secure = ctx.options().secure_parameters.clone();
        let overrides = assignment.parameter_overrides();

        if !definition.is_initiative() {
            let scope = ParameterScope::for_policy(
                overrides,
                definition.parameter_defaults(),
                self.classifier.as_ref(),
                &secure,
            );
            self.compile_into(ctx, &assignment_key, &definition, &scope);
            return;
        }

        let initiative_defaults = definition.parameter_defaults();
        debug!(
            assignment = %assignment_key,
            initiative = %definition.id,
            members = definition.properties.policy_definitions.len(),
            "expanding initiative"
        );

        for member in &definition.properties.policy_definitions {
            let member_id = member.policy_definition_id.as_str();
            if ctx.options().is_ignored(member_id) {
                ctx.record_ignored(member_id);
                continue;
            }

            let member_definition = match self.source.definition(member_id) {
                Ok(d) if d.is_initiative() => {
                    let err = CanopyError::malformed(member_id, "initiative member is itself an initiative");
                    fail(ctx, &assignment_key, member_id, &err);
                    continue;
                }
                Ok(d) => d,
                Err(err) => {
                    fail(ctx, &assignment_key, member_id, &err);
                    continue;
                }
            };

            let bindings: BTreeMap<String, Value> = member
                .parameters
                .iter()
                .map(|(name, p)| (name.clone(), p.value.clone()))
                .collect();
            let scope = ParameterScope::for_member(
                overrides.clone(),
                initiative_defaults.clone(),
                bindings,
                member_definition.parameter_defaults(),
                self.classifier.as_ref(),
                &secure,
            );
            self.compile_into(ctx, &assignment_key, &member_definition, &scope);
        }
    }

    fn compile_into(
        &self,
        ctx: &mut CompilationContext,
        assignment: &str,
        definition: &PolicyDefinitionSource,
        scope: &ParameterScope<'_>,
    ) {
        let module = ctx.options().selector_module.clone();
        match compile_definition(definition, scope, &module) {
            Ok(Some(rule)) => {
                ctx.insert(assignment, rule);
            }
            Ok(None) => {
                debug!(assignment = %assignment, definition_id = %definition.id, "definition is disabled");
            }
            Err(err) => fail(ctx, assignment, &definition.id, &err),
        }
    }
}

fn fail(ctx: &mut CompilationContext, assignment: &str, definition_id: &str, err: &CanopyError) {
    warn!(
        run_id = %ctx.run_id(),
        assignment = %assignment,
        definition_id = %definition_id,
        kind = err.kind(),
        error = %err,
        "definition failed to compile"
    );
    ctx.record_failure(CompileFailure::new(assignment, definition_id, err));
}

/// How the effect shapes the compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectKind {
    Disabled,
    /// `auditIfNotExists` / `deployIfNotExists`.
    IfNotExists,
    /// Every other effect: `if` describes a non-compliant resource.
    Violation,
}

impl EffectKind {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "disabled" => EffectKind::Disabled,
            "auditifnotexists" | "deployifnotexists" => EffectKind::IfNotExists,
            _ => EffectKind::Violation,
        }
    }
}

fn resolve_string(scope: &ParameterScope<'_>, raw: &str) -> CanopyResult<Option<String>> {
    match scope.resolve_value(&Value::String(raw.to_string()))? {
        ValueExpression::Literal(Value::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Parse, resolve, and tidy a raw condition. `None` when every predicate
/// was dropped for lack of a parameter value.
fn prepare(raw: &Value, definition_id: &str, scope: &ParameterScope<'_>) -> CanopyResult<Option<Condition>> {
    let parsed = parse_condition(raw, definition_id)?;
    Ok(resolver::resolve(parsed, scope)?
        .map(normalize::simplify)
        .map(normalize::pull_up))
}

/// Build the scoped block checking for a related resource.
fn existence_block(
    definition_id: &str,
    details: &EffectDetails,
    related_type: String,
    scope: &ParameterScope<'_>,
) -> CanopyResult<Condition> {
    let mut selector = vec![Selector {
        key: SelectorKey::Type,
        value: related_type,
    }];
    if let Some(name) = &details.name {
        if let Some(name) = resolve_string(scope, name)? {
            selector.push(Selector {
                key: SelectorKey::Name,
                value: name,
            });
        }
    }

    let predicate = match &details.existence_condition {
        Some(raw) => match prepare(raw, definition_id, scope)? {
            Some(Condition::Constant(true)) | None => None,
            Some(Condition::Constant(false)) => {
                return Err(CanopyError::EmptyCondition {
                    definition_id: definition_id.to_string(),
                })
            }
            Some(c) => Some(Box::new(c)),
        },
        None => None,
    };

    Ok(Condition::Scoped(Scoped {
        field: FieldPath::from_segments(vec![Segment::Key(RELATED_RESOURCES_FIELD.to_string())]),
        selector,
        predicate,
    }))
}

/// Compile one policy definition under `scope`.
///
/// Returns `Ok(None)` for a disabled effect.
pub fn compile_definition(
    definition: &PolicyDefinitionSource,
    scope: &ParameterScope<'_>,
    selector_module: &str,
) -> CanopyResult<Option<CompiledRule>> {
    let id = definition.id.as_str();
    let rule = definition
        .properties
        .policy_rule
        .as_ref()
        .ok_or_else(|| CanopyError::malformed(id, "definition has no policy rule"))?;

    let effect = match resolve_string(scope, &rule.then.effect)? {
        Some(effect) => EffectKind::from_name(&effect),
        None => {
            debug!(definition_id = %id, effect = %rule.then.effect, "effect did not resolve; compiling as a violation");
            EffectKind::Violation
        }
    };
    if effect == EffectKind::Disabled {
        return Ok(None);
    }

    let condition = match prepare(&rule.condition, id, scope)? {
        Some(Condition::Constant(_)) | None => {
            return Err(CanopyError::EmptyCondition {
                definition_id: id.to_string(),
            })
        }
        Some(c) => c,
    };

    let mut types = extract::resource_types(&condition);
    let remainder = extract::strip_types(condition);

    let related_type = match (effect, &rule.then.details) {
        (EffectKind::IfNotExists, Some(details)) => match &details.resource_type {
            Some(raw) => Some((
                details,
                resolve_string(scope, raw)?
                    .ok_or_else(|| CanopyError::malformed(id, "details.type did not resolve to a string"))?,
            )),
            None => None,
        },
        _ => None,
    };

    let (mut where_, mut compliance) = match related_type {
        Some((details, related_type)) => (remainder, existence_block(id, details, related_type, scope)?),
        None => {
            if types.is_empty() {
                return Err(CanopyError::UnresolvableType {
                    definition_id: id.to_string(),
                });
            }
            match remainder {
                None => (None, extract::type_predicate(&types)),
                Some(remainder) => normalize::split_polarity(remainder),
            }
        }
    };

    if types.is_empty() {
        types = extract::scoped_types(&compliance);
    }
    if types.is_empty() {
        return Err(CanopyError::UnresolvableType {
            definition_id: id.to_string(),
        });
    }

    normalize::infer_convert(&mut compliance);
    if let Some(w) = where_.as_mut() {
        normalize::infer_convert(w);
    }

    let mut scoped = false;
    compliance.walk(&mut |node| scoped |= matches!(node, Condition::Scoped(_)));
    let indexed_mode = definition
        .properties
        .mode
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("Indexed"));
    let selector = if scoped || indexed_mode {
        RuleSelector::Indexed
    } else {
        RuleSelector::All
    };

    let condition_json = compliance.to_json()?;
    let where_json = where_.map(|w| w.to_json()).transpose()?;
    let digest = identity::digest(id, &condition_json);
    let display_name = definition.display_name().to_string();
    let description = definition.properties.description.as_deref().unwrap_or_default();

    debug!(definition_id = %id, digest = %digest, types = ?types, "definition compiled");

    Ok(Some(CompiledRule {
        definition_id: id.to_string(),
        name: identity::rule_name(&digest),
        synopsis: metadata::synopsis(description, &display_name),
        recommendation: metadata::recommendation(description),
        display_name,
        category: definition.properties.metadata.category.clone(),
        version: definition.properties.metadata.version.clone(),
        types,
        where_: where_json,
        condition: condition_json,
        with: vec![selector.reference(selector_module)],
    }))
}
