//! The compilation context: session-scoped output of one compilation run.
//!
//! A context is created once per run, filled by repeated
//! [`AssignmentVisitor::visit`](crate::visitor::AssignmentVisitor::visit)
//! calls, and read at the end. It is not shared between threads; parallel
//! batches use one context each and [`merge`](CompilationContext::merge)
//! them afterwards.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use canopy_contracts::{
    error::CanopyError,
    options::CompilerOptions,
    rule::{Baseline, CompiledRule, BASELINE_DESCRIPTION, BASELINE_NAME, CURATED_BASELINE_RULES},
};

/// A definition that could not be compiled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileFailure {
    /// Key of the assignment being visited.
    pub assignment: String,
    pub definition_id: String,
    /// Machine-readable error kind, e.g. `unresolvable-type`.
    pub kind: String,
    pub reason: String,
}

impl CompileFailure {
    pub fn new(assignment: &str, definition_id: &str, error: &CanopyError) -> Self {
        Self {
            assignment: assignment.to_string(),
            definition_id: definition_id.to_string(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// A retained rule and the assignment that produced it.
#[derive(Debug, Clone)]
struct Entry {
    assignment: String,
    rule: CompiledRule,
}

/// Session-scoped store of compiled rules, failures, and skipped ids.
#[derive(Debug)]
pub struct CompilationContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    options: CompilerOptions,
    entries: Vec<Entry>,
    /// Dedup keys of `entries`.
    seen: HashSet<String>,
    failures: Vec<CompileFailure>,
    ignored: Vec<String>,
}

impl CompilationContext {
    pub fn new(options: CompilerOptions) -> Self {
        let run_id = Uuid::new_v4();
        debug!(run_id = %run_id, keep_duplicates = options.keep_duplicates, "compilation context created");
        Self {
            run_id,
            started_at: Utc::now(),
            options,
            entries: Vec::new(),
            seen: HashSet::new(),
            failures: Vec::new(),
            ignored: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// A pass-through value from the options' `settings` table.
    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.settings.get(key)
    }

    /// The key under which a rule is deduplicated.
    ///
    /// First-wins mode keys on the digest alone. Keep-duplicates mode also
    /// keys on the assignment and definition, so every assignment-driven
    /// variant is kept but the same assignment visited twice is not.
    fn dedup_key(&self, assignment: &str, rule: &CompiledRule) -> String {
        if self.options.keep_duplicates {
            format!("{assignment}\u{0}{}\u{0}{}", rule.definition_id, rule.digest())
        } else {
            rule.digest().to_string()
        }
    }

    /// Add `rule`, produced while visiting `assignment`.
    ///
    /// Returns `false` when the rule was discarded as a duplicate.
    pub fn insert(&mut self, assignment: &str, rule: CompiledRule) -> bool {
        let key = self.dedup_key(assignment, &rule);
        if !self.seen.insert(key) {
            debug!(
                run_id = %self.run_id,
                assignment = %assignment,
                name = %rule.name,
                "duplicate rule discarded"
            );
            return false;
        }
        info!(
            run_id = %self.run_id,
            assignment = %assignment,
            definition_id = %rule.definition_id,
            name = %rule.name,
            "rule compiled"
        );
        self.entries.push(Entry {
            assignment: assignment.to_string(),
            rule,
        });
        true
    }

    pub fn record_failure(&mut self, failure: CompileFailure) {
        self.failures.push(failure);
    }

    /// Note a definition skipped by the ignore list.
    pub fn record_ignored(&mut self, definition_id: &str) {
        debug!(run_id = %self.run_id, definition_id = %definition_id, "definition ignored");
        if !self.ignored.iter().any(|id| id == definition_id) {
            self.ignored.push(definition_id.to_string());
        }
    }

    /// Retained rules in insertion order.
    pub fn get_definitions(&self) -> Vec<&CompiledRule> {
        self.entries.iter().map(|e| &e.rule).collect()
    }

    pub fn failures(&self) -> &[CompileFailure] {
        &self.failures
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// Snapshot every generated rule name plus the curated set.
    pub fn generate_baseline(&self) -> Baseline {
        let mut include: Vec<String> = Vec::with_capacity(self.entries.len() + CURATED_BASELINE_RULES.len());
        let names = self
            .entries
            .iter()
            .map(|e| e.rule.name.as_str())
            .chain(CURATED_BASELINE_RULES.iter().copied());
        for name in names {
            if !include.iter().any(|n| n == name) {
                include.push(name.to_string());
            }
        }
        Baseline {
            name: BASELINE_NAME.to_string(),
            description: BASELINE_DESCRIPTION.to_string(),
            include,
        }
    }

    /// Fold `other` into this context using this context's dedup policy.
    /// Rules from `other` follow those already present.
    pub fn merge(&mut self, other: CompilationContext) {
        for entry in other.entries {
            self.insert(&entry.assignment, entry.rule);
        }
        self.failures.extend(other.failures);
        for id in other.ignored {
            self.record_ignored(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use canopy_contracts::rule::RuleSelector;

    use super::*;
    use crate::identity;

    fn rule(definition_id: &str) -> CompiledRule {
        let digest = identity::digest(definition_id, &serde_json::Value::Null);
        CompiledRule {
            definition_id: definition_id.to_string(),
            name: identity::rule_name(&digest),
            display_name: definition_id.to_string(),
            synopsis: String::new(),
            recommendation: String::new(),
            category: None,
            version: None,
            types: vec!["Microsoft.Storage/storageAccounts".to_string()],
            where_: None,
            condition: json!({ "field": "type", "equals": "Microsoft.Storage/storageAccounts" }),
            with: vec![RuleSelector::All.reference("PSRule.Rules.Azure")],
        }
    }

    fn keep_duplicates() -> CompilerOptions {
        CompilerOptions {
            keep_duplicates: true,
            ..CompilerOptions::default()
        }
    }

    #[test]
    fn first_wins_by_default() {
        let mut ctx = CompilationContext::new(CompilerOptions::default());
        assert!(ctx.insert("a1", rule("def-1")));
        assert!(!ctx.insert("a2", rule("def-1")));
        assert!(ctx.insert("a2", rule("def-2")));
        assert_eq!(ctx.get_definitions().len(), 2);
    }

    #[test]
    fn keep_duplicates_keeps_assignment_variants() {
        let mut ctx = CompilationContext::new(keep_duplicates());
        assert!(ctx.insert("a1", rule("def-1")));
        assert!(ctx.insert("a2", rule("def-1")));
        assert!(!ctx.insert("a2", rule("def-1")));
        assert_eq!(ctx.get_definitions().len(), 2);
    }

    #[test]
    fn get_definitions_is_stable() {
        let mut ctx = CompilationContext::new(CompilerOptions::default());
        for id in ["def-3", "def-1", "def-2"] {
            ctx.insert("a", rule(id));
        }
        let first: Vec<_> = ctx.get_definitions().iter().map(|r| r.definition_id.clone()).collect();
        let second: Vec<_> = ctx.get_definitions().iter().map(|r| r.definition_id.clone()).collect();
        assert_eq!(first, ["def-3", "def-1", "def-2"]);
        assert_eq!(first, second);
    }

    #[test]
    fn baseline_includes_names_then_curated_set_once() {
        let mut ctx = CompilationContext::new(keep_duplicates());
        let a = rule("def-a");
        let b = rule("def-b");
        let (name_a, name_b) = (a.name.clone(), b.name.clone());
        ctx.insert("x", a.clone());
        ctx.insert("y", a);
        ctx.insert("x", b);

        let baseline = ctx.generate_baseline();
        assert_eq!(baseline.name, "Azure.PolicyBaseline.All");
        assert_eq!(baseline.description, "Generated automatically when exporting Azure Policy rules.");
        assert_eq!(
            baseline.include,
            [name_a, name_b, "PSRule.Rules.Azure\\Azure.KeyVault.SoftDelete".to_string()]
        );
        assert_eq!(ctx.generate_baseline(), baseline);
    }

    #[test]
    fn merge_is_a_deduplicated_union() {
        let mut left = CompilationContext::new(CompilerOptions::default());
        left.insert("a1", rule("def-1"));
        left.record_ignored("ignored-1");

        let mut right = CompilationContext::new(CompilerOptions::default());
        right.insert("a2", rule("def-1"));
        right.insert("a2", rule("def-2"));
        right.record_ignored("ignored-1");
        right.record_failure(CompileFailure::new(
            "a2",
            "def-3",
            &CanopyError::UnresolvableType {
                definition_id: "def-3".to_string(),
            },
        ));

        left.merge(right);
        let ids: Vec<_> = left.get_definitions().iter().map(|r| r.definition_id.as_str()).collect();
        assert_eq!(ids, ["def-1", "def-2"]);
        assert_eq!(left.ignored(), ["ignored-1"]);
        assert_eq!(left.failures().len(), 1);
        assert_eq!(left.failures()[0].kind, "unresolvable-type");
    }

    #[test]
    fn settings_pass_through() {
        let mut options = CompilerOptions::default();
        options.settings.insert("AZURE_POLICY_WAIVER_MAX_EXPIRY".into(), json!(90));
        let ctx = CompilationContext::new(options);
        assert_eq!(ctx.setting("AZURE_POLICY_WAIVER_MAX_EXPIRY"), Some(&json!(90)));
        assert!(ctx.setting("missing").is_none());
    }
}
