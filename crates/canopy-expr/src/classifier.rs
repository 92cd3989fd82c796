//! Classification of raw template-expression strings.
//!
//! Assignment parameter values arrive as strings that may or may not be
//! template expressions. Before a value is substituted into a compiled rule the
//! compiler asks a classifier whether it is a literal, which parameters it
//! reads, and whether it could expose a secret. Values that are not literal or
//! that are secure are never inlined.

use serde::Serialize;
use tracing::debug;

use crate::template::{self, TemplateExpr};

/// Marker that prefixes secret references in exported parameter files.
const SECRET_REFERENCE_MARKER: &str = "{{SecretReference";

/// What a classifier learned about one expression string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// The string is, or evaluates to, a value that can be inlined.
    pub is_literal: bool,
    /// Names passed to `parameters()`, in order of first appearance.
    pub referenced_parameters: Vec<String>,
    /// A `list*` resource function is called (`listKeys`, `listAdminKeys`).
    pub uses_list_function: bool,
    /// The value could carry a secret.
    pub is_secure: bool,
}

/// Classifies template-expression strings.
///
/// Implementations must be pure: the same input always produces the same
/// classification.
pub trait ExpressionClassifier: Send + Sync {
    /// Classify `expression`. `secure_parameters` names parameters declared
    /// secure; matching is case-insensitive.
    fn classify(&self, expression: &str, secure_parameters: &[String]) -> Classification;
}

/// Default classifier: tokenizes the expression and inspects its calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenClassifier;

impl ExpressionClassifier for TokenClassifier {
    fn classify(&self, expression: &str, secure_parameters: &[String]) -> Classification {
        if expression.is_empty() {
            return Classification::default();
        }

        if expression.starts_with(SECRET_REFERENCE_MARKER) {
            return Classification {
                is_secure: true,
                ..Classification::default()
            };
        }

        if !template::is_expression(expression) {
            return Classification {
                is_literal: true,
                ..Classification::default()
            };
        }

        let expr = match template::parse(expression) {
            Ok(expr) => expr,
            Err(err) => {
                debug!(%expression, error = %err, "expression did not parse; treating as non-literal");
                return Classification::default();
            }
        };

        let referenced_parameters = referenced_parameters(&expr);
        let uses_list_function = uses_list_function(&expr);
        let all_secure = !referenced_parameters.is_empty()
            && referenced_parameters
                .iter()
                .all(|p| secure_parameters.iter().any(|s| s.eq_ignore_ascii_case(p)));

        Classification {
            is_literal: has_literal(&expr),
            is_secure: uses_list_function || calls(&expr, "reference") || all_secure,
            referenced_parameters,
            uses_list_function,
        }
    }
}

/// True if `name` starts with `list` followed by an uppercase letter.
pub fn is_list_function(name: &str) -> bool {
    name.strip_prefix("list")
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_uppercase)
}

fn is_parameters_call(expr: &TemplateExpr) -> bool {
    expr.call_name().is_some_and(|n| n.eq_ignore_ascii_case("parameters"))
}

/// A string or integer token that is not the direct argument of
/// `parameters()`.
fn has_literal(expr: &TemplateExpr) -> bool {
    match expr {
        TemplateExpr::String(_) | TemplateExpr::Integer(_) => true,
        TemplateExpr::Call { args, .. } if is_parameters_call(expr) => args
            .iter()
            .any(|a| !matches!(a, TemplateExpr::String(_) | TemplateExpr::Integer(_)) && has_literal(a)),
        TemplateExpr::Call { args, .. } => args.iter().any(has_literal),
        TemplateExpr::Member { target, .. } => has_literal(target),
        TemplateExpr::Index { target, index } => has_literal(target) || has_literal(index),
    }
}

fn referenced_parameters(expr: &TemplateExpr) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    expr.walk(&mut |node| {
        if let TemplateExpr::Call { args, .. } = node {
            if is_parameters_call(node) {
                if let Some(TemplateExpr::String(name)) = args.first() {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.clone());
                    }
                }
            }
        }
    });
    names
}

fn uses_list_function(expr: &TemplateExpr) -> bool {
    let mut found = false;
    expr.walk(&mut |node| found |= node.call_name().is_some_and(is_list_function));
    found
}

fn calls(expr: &TemplateExpr, function: &str) -> bool {
    let mut found = false;
    expr.walk(&mut |node| found |= node.call_name().is_some_and(|n| n.eq_ignore_ascii_case(function)));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(expression: &str, secure: &[&str]) -> Classification {
        let secure: Vec<String> = secure.iter().map(|s| s.to_string()).collect();
        TokenClassifier.classify(expression, &secure)
    }

    #[test]
    fn literal_values() {
        for value in [
            "password",
            "123",
            "[variables('password')]",
            "[if(true(), variables('password'), parameters('password'))]",
            "[if(true(), 'password', parameters('password'))]",
        ] {
            assert!(classify(value, &[]).is_literal, "expected '{value}' to be literal");
        }
    }

    #[test]
    fn non_literal_values() {
        for value in [
            "[parameters('adminPassword')]",
            "[if(and(empty(parameters('sqlLogin')),parameters('useAADOnlyAuthentication')),null(),parameters('sqlLogin'))]",
            "[if(not(empty(parameters('administratorLogin'))), parameters('administratorLogin'), null())]",
            "",
            "[concat('a', ]",
        ] {
            assert!(!classify(value, &[]).is_literal, "expected '{value}' to be non-literal");
        }
    }

    #[test]
    fn referenced_parameters_in_order() {
        assert_eq!(classify("[parameters('adminPassword')]", &[]).referenced_parameters, ["adminPassword"]);
        assert!(classify("[variables('adminPassword')]", &[]).referenced_parameters.is_empty());
        assert!(classify("password", &[]).referenced_parameters.is_empty());
        assert_eq!(
            classify("[if(true(), null(), parameters('adminPassword'))]", &[]).referenced_parameters,
            ["adminPassword"]
        );
        assert_eq!(
            classify("[if(true(), parameters('adminPassword2'), parameters('adminPassword1'))]", &[])
                .referenced_parameters,
            ["adminPassword2", "adminPassword1"]
        );
    }

    #[test]
    fn list_functions() {
        for value in [
            "[listKeys(resourceId('Microsoft.Storage/storageAccounts', 'storage1'), '2021-09-01').keys[0].value]",
            "[listKeys(resourceId('Microsoft.Storage/storageAccounts', 'storage1'), '2021-09-01')]",
            "[listAdminKeys(resourceId('Microsoft.Search/searchServices', 'search1'), '2022-09-01').primaryKey]",
            "[listQueryKeys(resourceId('Microsoft.Search/searchServices', 'search1'), '2021-09-01').value[0].key]",
        ] {
            assert!(classify(value, &[]).uses_list_function, "expected list function in '{value}'");
        }
        for value in [
            "[list(resourceId('Microsoft.OperationalInsights/workspaces', 'workspace1'), '2023-09-01').value[0].properties.name]",
            "[resourceId('Microsoft.Storage/storageAccounts', 'storage1')]",
            "[if(not(empty(parameters('administratorLogin'))), parameters('administratorLogin'), null())]",
        ] {
            assert!(!classify(value, &[]).uses_list_function, "unexpected list function in '{value}'");
        }
    }

    #[test]
    fn secure_values() {
        let secure = ["adminPassword", "administratorLogin"];

        assert!(classify("[parameters('adminPassword')]", &secure).is_secure);
        assert!(classify("[parameters('adminPassword')]", &["AdminPassword"]).is_secure);
        assert!(!classify("[variables('adminPassword')]", &secure).is_secure);
        assert!(!classify("password", &secure).is_secure);
        assert!(!classify("[parameters('notSecure')]", &secure).is_secure);
        assert!(!classify("[parameters('notSecure')]", &[]).is_secure);
        assert!(
            classify(
                "[if(true(), parameters('adminPassword2'), parameters('adminPassword1'))]",
                &["adminPassword1", "adminPassword2"]
            )
            .is_secure
        );
        assert!(!classify("[if(true(), parameters('notSecure'), parameters('adminPassword'))]", &secure).is_secure);
        assert!(
            classify(
                "[listKeys(resourceId('Microsoft.Storage/storageAccounts', 'aStorageAccount'), '2021-09-01').keys[0].value]",
                &secure
            )
            .is_secure
        );
        assert!(classify("{{SecretReference aName}}", &secure).is_secure);
        assert!(
            classify(
                "[reference(resourceId('Microsoft.Insights/components', parameters('appInsightsName')), '2020-02-02').InstrumentationKey]",
                &secure
            )
            .is_secure
        );
        assert!(
            classify(
                "[if(not(empty(parameters('administratorLogin'))), parameters('administratorLogin'), null())]",
                &secure
            )
            .is_secure
        );
    }
}
