//! # canopy-contracts
//!
//! Shared types for the Canopy policy compiler.
//!
//! All crates in the workspace import from here. No compilation logic lives in
//! this crate: only input documents, output records, options, and errors.

pub mod document;
pub mod error;
pub mod options;
pub mod rule;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use document::{PolicyAssignment, PolicyDefinitionSource};
    use error::CanopyError;
    use options::CompilerOptions;
    use rule::{CompiledRule, RuleSelector};

    // ── Documents ────────────────────────────────────────────────────────────

    #[test]
    fn assignment_reads_parameter_overrides() {
        let assignment: PolicyAssignment = serde_json::from_value(json!({
            "name": "allowed-locations",
            "properties": {
                "policyDefinitionId": "/providers/Microsoft.Authorization/policyDefinitions/e765b5de",
                "parameters": {
                    "listOfAllowedLocations": { "value": ["eastus", "westus"] }
                }
            }
        }))
        .unwrap();

        assert_eq!(assignment.key(), "allowed-locations");
        assert_eq!(
            assignment.definition_id(),
            "/providers/Microsoft.Authorization/policyDefinitions/e765b5de"
        );
        let overrides = assignment.parameter_overrides();
        assert_eq!(overrides["listOfAllowedLocations"], json!(["eastus", "westus"]));
    }

    #[test]
    fn assignment_accepts_pascal_case_export() {
        let assignment: PolicyAssignment = serde_json::from_value(json!({
            "Name": "assignment.1",
            "ResourceId": "/subscriptions/000/providers/Microsoft.Authorization/policyAssignments/assignment.1",
            "Properties": {
                "PolicyDefinitionId": "/providers/Microsoft.Authorization/policyDefinitions/abc",
                "Parameters": { "effect": { "Value": "Audit" } }
            }
        }))
        .unwrap();

        assert!(assignment.key().ends_with("assignment.1"));
        assert_eq!(assignment.parameter_overrides()["effect"], json!("Audit"));
    }

    #[test]
    fn definition_reads_metadata_and_defaults() {
        let definition: PolicyDefinitionSource = serde_json::from_value(json!({
            "id": "/providers/Microsoft.Authorization/policyDefinitions/abc",
            "name": "abc",
            "type": "Microsoft.Authorization/policyDefinitions",
            "properties": {
                "displayName": "Storage accounts should restrict network access",
                "mode": "Indexed",
                "metadata": { "category": "Storage", "version": "1.1.1" },
                "parameters": {
                    "effect": { "type": "String", "defaultValue": "Audit" },
                    "noDefault": { "type": "String" }
                },
                "policyRule": {
                    "if": { "field": "type", "equals": "Microsoft.Storage/storageAccounts" },
                    "then": { "effect": "[parameters('effect')]" }
                }
            }
        }))
        .unwrap();

        assert!(!definition.is_initiative());
        assert_eq!(definition.properties.metadata.category.as_deref(), Some("Storage"));
        assert_eq!(definition.properties.metadata.version.as_deref(), Some("1.1.1"));
        let defaults = definition.parameter_defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["effect"], json!("Audit"));
    }

    #[test]
    fn initiative_is_detected_by_type_or_members() {
        let by_type: PolicyDefinitionSource = serde_json::from_value(json!({
            "id": "/providers/Microsoft.Authorization/policySetDefinitions/set",
            "type": "Microsoft.Authorization/policySetDefinitions",
            "properties": { "policyDefinitions": [] }
        }))
        .unwrap();
        assert!(by_type.is_initiative());

        let by_members: PolicyDefinitionSource = serde_json::from_value(json!({
            "id": "set-2",
            "properties": {
                "policyDefinitions": [ { "policyDefinitionId": "member-1" } ]
            }
        }))
        .unwrap();
        assert!(by_members.is_initiative());
        assert_eq!(by_members.display_name(), "set-2");
    }

    // ── Rules ────────────────────────────────────────────────────────────────

    #[test]
    fn selector_reference_includes_module() {
        assert_eq!(
            RuleSelector::Indexed.reference("PSRule.Rules.Azure"),
            "PSRule.Rules.Azure\\Azure.Policy.Indexed"
        );
        assert_eq!(RuleSelector::All.reference(""), "Azure.Policy.All");
    }

    #[test]
    fn compiled_rule_serializes_pascal_case() {
        let rule = CompiledRule {
            definition_id: "def".to_string(),
            name: "Azure.Policy.0123456789ab".to_string(),
            display_name: "Display".to_string(),
            synopsis: "Synopsis".to_string(),
            recommendation: "Recommendation".to_string(),
            category: None,
            version: Some("1.0.0".to_string()),
            types: vec!["Microsoft.Storage/storageAccounts".to_string()],
            where_: None,
            condition: json!({ "field": "type", "equals": "Microsoft.Storage/storageAccounts" }),
            with: vec![RuleSelector::All.reference("")],
        };

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["Name"], json!("Azure.Policy.0123456789ab"));
        assert_eq!(value["Where"], serde_json::Value::Null);
        assert_eq!(value["With"], json!(["Azure.Policy.All"]));
        assert_eq!(rule.digest(), "0123456789ab");
    }

    // ── Options ──────────────────────────────────────────────────────────────

    #[test]
    fn options_parse_from_toml() {
        let options = CompilerOptions::from_toml_str(
            r#"
                keep_duplicates = true
                ignore = ["/providers/Microsoft.Authorization/policyDefinitions/abc"]
                secure_parameters = ["adminPassword"]

                [settings]
                AZURE_RESOURCE_ALLOWED_LOCATIONS = ["australiaeast"]
            "#,
        )
        .unwrap();

        assert!(options.keep_duplicates);
        assert!(options.is_ignored("/providers/Microsoft.Authorization/policyDefinitions/abc"));
        assert!(!options.is_ignored("/providers/Microsoft.Authorization/policyDefinitions/ABC"));
        assert_eq!(options.selector_module, "PSRule.Rules.Azure");
        assert_eq!(
            options.settings["AZURE_RESOURCE_ALLOWED_LOCATIONS"],
            json!(["australiaeast"])
        );
    }

    #[test]
    fn options_parse_error_is_config_error() {
        match CompilerOptions::from_toml_str("keep_duplicates = ][") {
            Err(CanopyError::ConfigError { reason }) => {
                assert!(reason.contains("failed to parse options TOML"), "got: {reason}");
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn error_display_carries_context() {
        let err = CanopyError::malformed("def-1", "policy rule has no 'then' block");
        let msg = err.to_string();
        assert!(msg.contains("def-1"));
        assert!(msg.contains("'then'"));
        assert_eq!(err.kind(), "malformed-definition");

        let err = CanopyError::UnresolvableType {
            definition_id: "def-2".to_string(),
        };
        assert!(err.to_string().contains("does not target any resource type"));
    }
}
