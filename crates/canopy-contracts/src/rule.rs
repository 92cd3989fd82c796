//! Compiled rule and baseline output types.
//!
//! These records are the compiler's output contract. They hold plain JSON for
//! the `Where` and `Condition` predicates so a downstream rule engine can read
//! them without depending on the compiler's internal tree types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every generated rule name.
pub const RULE_NAME_PREFIX: &str = "Azure.Policy.";

/// Name of the generated baseline.
pub const BASELINE_NAME: &str = "Azure.PolicyBaseline.All";

/// Description of the generated baseline.
pub const BASELINE_DESCRIPTION: &str = "Generated automatically when exporting Azure Policy rules.";

/// Hand-curated rules that complement the policy-derived ones.
pub const CURATED_BASELINE_RULES: &[&str] = &["PSRule.Rules.Azure\\Azure.KeyVault.SoftDelete"];

/// Which base evaluation strategy a compiled rule needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleSelector {
    /// Evaluated once against each matched top-level resource.
    All,
    /// Evaluated once per matched nested or indexed occurrence.
    Indexed,
}

impl RuleSelector {
    /// The selector reference string, e.g. `PSRule.Rules.Azure\Azure.Policy.Indexed`.
    pub fn reference(self, module: &str) -> String {
        let name = match self {
            RuleSelector::All => "Azure.Policy.All",
            RuleSelector::Indexed => "Azure.Policy.Indexed",
        };
        if module.is_empty() {
            name.to_string()
        } else {
            format!("{module}\\{name}")
        }
    }
}

/// One compiled rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompiledRule {
    /// Source definition id; used for ignore-list matching and lookup.
    pub definition_id: String,

    /// Generated stable identifier: `Azure.Policy.<12 hex>`.
    pub name: String,

    pub display_name: String,

    /// First line of the description.
    pub synopsis: String,

    /// Full description with normalized line breaks.
    pub recommendation: String,

    pub category: Option<String>,

    pub version: Option<String>,

    /// Target resource types in discovery order; never empty.
    pub types: Vec<String>,

    /// Applicability predicate beyond type matching.
    #[serde(rename = "Where")]
    pub where_: Option<Value>,

    /// Compliance predicate; never null.
    pub condition: Value,

    /// Selector references for the base evaluation strategy.
    pub with: Vec<String>,
}

impl CompiledRule {
    /// The 12-character digest embedded in `name`.
    pub fn digest(&self) -> &str {
        self.name.strip_prefix(RULE_NAME_PREFIX).unwrap_or(&self.name)
    }
}

/// Snapshot of every rule produced in one compilation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Baseline {
    pub name: String,
    pub description: String,
    /// Generated rule names followed by the curated set; no duplicates.
    pub include: Vec<String>,
}
