//! Value expressions.
//!
//! A value in a policy rule is a literal, a reference to a field of the
//! resource under evaluation, or a function call over those. Template strings
//! are converted into this model once; the compiler then binds parameters and
//! folds whatever can be computed ahead of time.
//!
//! Computed values are serialized under the marker key `"$"` so a consumer can
//! tell them apart from literals:
//!
//! ```json
//! { "$": { "padLeft": { "path": "retentionPolicy.days" }, "totalLength": 3, "paddingCharacter": "0" } }
//! ```

use serde::{ser, Serialize, Serializer};
use serde_json::{json, Map, Value};

use canopy_contracts::error::{CanopyError, CanopyResult};

use crate::{
    field::FieldPath,
    template::{self, TemplateExpr},
};

/// Marker key wrapping computed values in serialized output.
pub const EXPRESSION_MARKER: &str = "$";

/// Stand-in for `subscription().subscriptionId`; the real id is only known at
/// evaluation time.
pub const SUBSCRIPTION_ID_PLACEHOLDER: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

/// Largest `padLeft` total length the template language accepts.
pub const MAX_PAD_LENGTH: usize = 16;

/// Functions that may remain in a compiled value expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Concat,
    Split,
    PadLeft,
    ToLower,
    ToUpper,
    Substring,
    Trim,
    First,
    Last,
    Length,
}

impl Function {
    const ALL: [Function; 10] = [
        Function::Concat,
        Function::Split,
        Function::PadLeft,
        Function::ToLower,
        Function::ToUpper,
        Function::Substring,
        Function::Trim,
        Function::First,
        Function::Last,
        Function::Length,
    ];

    /// Look up a function by name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Canonical camelCase name.
    pub fn name(self) -> &'static str {
        match self {
            Function::Concat => "concat",
            Function::Split => "split",
            Function::PadLeft => "padLeft",
            Function::ToLower => "toLower",
            Function::ToUpper => "toUpper",
            Function::Substring => "substring",
            Function::Trim => "trim",
            Function::First => "first",
            Function::Last => "last",
            Function::Length => "length",
        }
    }

    /// Minimum and maximum argument counts.
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Concat => (1, usize::MAX),
            Function::Split => (2, 2),
            Function::PadLeft => (2, 3),
            Function::Substring => (2, 3),
            _ => (1, 1),
        }
    }

    /// Names of the literal arguments after the first, in serialized form.
    fn named_args(self) -> &'static [&'static str] {
        match self {
            Function::Split => &["delimiter"],
            Function::PadLeft => &["totalLength", "paddingCharacter"],
            Function::Substring => &["start", "length"],
            _ => &[],
        }
    }
}

/// Deployment-context functions that only have values at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextFunction {
    Subscription,
    ResourceGroup,
    RequestContext,
}

impl ContextFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "subscription" => Some(ContextFunction::Subscription),
            "resourcegroup" => Some(ContextFunction::ResourceGroup),
            "requestcontext" => Some(ContextFunction::RequestContext),
            _ => None,
        }
    }
}

/// A value in a policy predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpression {
    Literal(Value),
    Field(FieldPath),
    /// `parameters('name')`, before binding.
    Parameter(String),
    Context {
        function: ContextFunction,
        property: Option<String>,
    },
    Call {
        function: Function,
        args: Vec<ValueExpression>,
    },
    /// A value that could not be resolved at compile time.
    Absent,
}

impl ValueExpression {
    /// Convert a JSON value from a policy document. Strings holding template
    /// expressions are parsed; everything else is a literal.
    pub fn from_policy_value(value: &Value) -> CanopyResult<Self> {
        match value {
            Value::String(s) if template::is_expression(s) => {
                let expr = template::parse(s)?;
                Self::from_template(&expr, s)
            }
            Value::String(s) => Ok(Self::Literal(Value::String(template::unescape_literal(s).to_string()))),
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Convert a parsed template expression. `source` is used in errors.
    pub fn from_template(expr: &TemplateExpr, source: &str) -> CanopyResult<Self> {
        match expr {
            TemplateExpr::String(s) => Ok(Self::Literal(Value::String(s.clone()))),
            TemplateExpr::Integer(n) => Ok(Self::Literal(json!(n))),
            TemplateExpr::Call { name, args } => {
                let lower = name.to_ascii_lowercase();
                match lower.as_str() {
                    "parameters" => match args.as_slice() {
                        [TemplateExpr::String(p)] => Ok(Self::Parameter(p.clone())),
                        _ => Err(CanopyError::unsupported(source, "parameters() takes one string")),
                    },
                    "field" | "current" => match args.as_slice() {
                        [TemplateExpr::String(p)] => Ok(Self::Field(FieldPath::from_policy_field(p)?)),
                        _ => Err(CanopyError::unsupported(source, format!("{name}() takes one string"))),
                    },
                    "true" | "false" if args.is_empty() => Ok(Self::Literal(Value::Bool(lower == "true"))),
                    "null" if args.is_empty() => Ok(Self::Literal(Value::Null)),
                    _ => {
                        if let Some(function) = ContextFunction::from_name(name) {
                            return Ok(Self::Context {
                                function,
                                property: None,
                            });
                        }
                        let function = Function::from_name(name)
                            .ok_or_else(|| CanopyError::UnknownFunction { name: name.clone() })?;
                        let (min, max) = function.arity();
                        if args.len() < min || args.len() > max {
                            return Err(CanopyError::unsupported(
                                source,
                                format!("{}() called with {} arguments", function.name(), args.len()),
                            ));
                        }
                        let args = args
                            .iter()
                            .map(|a| Self::from_template(a, source))
                            .collect::<CanopyResult<Vec<_>>>()?;
                        Ok(Self::Call { function, args })
                    }
                }
            }
            TemplateExpr::Member { target, name } => match Self::from_template(target, source)? {
                Self::Context {
                    function,
                    property: None,
                } => Ok(Self::Context {
                    function,
                    property: Some(name.clone()),
                }),
                _ => Err(CanopyError::unsupported(source, "property access on a computed value")),
            },
            TemplateExpr::Index { .. } => {
                Err(CanopyError::unsupported(source, "index access on a computed value"))
            }
        }
    }

    /// The literal value, if this expression is one.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Rewrite field references relative to the array element `prefix`.
    /// Used inside `count` predicates, where fields address one element.
    ///
    /// Fails for a field outside the counted array, which an element-scoped
    /// predicate cannot address.
    pub fn relative_to(self, prefix: &FieldPath) -> CanopyResult<Self> {
        match self {
            Self::Field(path) => match path.strip_prefix(prefix) {
                Some(relative) => Ok(Self::Field(relative)),
                None => Err(CanopyError::unsupported(
                    path.to_string(),
                    format!("field is outside the counted array '{prefix}'"),
                )),
            },
            Self::Call { function, args } => Ok(Self::Call {
                function,
                args: args
                    .into_iter()
                    .map(|a| a.relative_to(prefix))
                    .collect::<CanopyResult<_>>()?,
            }),
            other => Ok(other),
        }
    }

    /// Replace parameter references using `parameter`, resolve deployment
    /// context functions, and fold calls whose arguments are all literal.
    ///
    /// Any sub-expression that binds to `Absent` makes the whole expression
    /// `Absent`.
    pub fn bind(self, parameter: &impl Fn(&str) -> ValueExpression) -> ValueExpression {
        match self {
            Self::Parameter(name) => parameter(&name),
            Self::Context { function, property } => match (function, property.as_deref()) {
                (ContextFunction::Subscription, Some(p)) if p.eq_ignore_ascii_case("subscriptionId") => {
                    Self::Literal(Value::String(SUBSCRIPTION_ID_PLACEHOLDER.to_string()))
                }
                _ => Self::Absent,
            },
            Self::Call { function, args } => {
                let args: Vec<_> = args.into_iter().map(|a| a.bind(parameter)).collect();
                if args.iter().any(Self::is_absent) {
                    return Self::Absent;
                }
                let literals: Option<Vec<&Value>> = args.iter().map(Self::as_literal).collect();
                match literals.and_then(|values| evaluate(function, &values)) {
                    Some(value) => Self::Literal(value),
                    None => Self::Call { function, args },
                }
            }
            other => other,
        }
    }

    /// Serialize to the output form: literals as-is, computed values under
    /// the `"$"` marker.
    pub fn to_json(&self) -> CanopyResult<Value> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Field(_) | Self::Call { .. } => {
                let mut wrapper = Map::new();
                wrapper.insert(EXPRESSION_MARKER.to_string(), self.shape()?);
                Ok(Value::Object(wrapper))
            }
            other => Err(CanopyError::unsupported(
                format!("{other:?}"),
                "value is not resolved",
            )),
        }
    }

    /// The function-call shape of an argument or computed value.
    fn shape(&self) -> CanopyResult<Value> {
        match self {
            Self::Literal(Value::String(s)) => Ok(json!({ "string": s })),
            Self::Literal(Value::Bool(b)) => Ok(json!({ "boolean": b })),
            Self::Literal(Value::Number(n)) if n.is_i64() => Ok(json!({ "integer": n })),
            Self::Literal(Value::Number(n)) => Ok(json!({ "number": n })),
            Self::Literal(other) => Ok(json!({ "value": other })),
            Self::Field(path) => Ok(json!({ "path": path.to_string() })),
            Self::Call { function, args } => {
                let mut shape = Map::new();
                match function {
                    Function::Concat => {
                        let parts = args.iter().map(Self::shape).collect::<CanopyResult<Vec<_>>>()?;
                        shape.insert(function.name().to_string(), Value::Array(parts));
                    }
                    _ => {
                        shape.insert(function.name().to_string(), args[0].shape()?);
                        for (key, arg) in function.named_args().iter().zip(&args[1..]) {
                            let value = arg.as_literal().ok_or_else(|| {
                                CanopyError::unsupported(
                                    format!("{}()", function.name()),
                                    format!("argument '{key}' must be a literal"),
                                )
                            })?;
                            let value = match (function, value) {
                                (Function::Split, Value::String(_)) => Value::Array(vec![value.clone()]),
                                _ => value.clone(),
                            };
                            shape.insert((*key).to_string(), value);
                        }
                    }
                }
                Ok(Value::Object(shape))
            }
            other => Err(CanopyError::unsupported(
                format!("{other:?}"),
                "value is not resolved",
            )),
        }
    }

    /// Read an argument or computed-value shape back into an expression.
    fn from_shape(shape: &Value) -> CanopyResult<Self> {
        let bad = |reason: &str| CanopyError::unsupported(shape.to_string(), reason);
        let obj = shape.as_object().ok_or_else(|| bad("expected an object"))?;

        if obj.len() == 1 {
            let (key, inner) = obj.iter().next().ok_or_else(|| bad("empty object"))?;
            match key.as_str() {
                "path" => {
                    let path = inner.as_str().ok_or_else(|| bad("path must be a string"))?;
                    return Ok(Self::Field(FieldPath::parse(path)?));
                }
                "string" | "boolean" | "integer" | "number" | "value" => {
                    return Ok(Self::Literal(inner.clone()))
                }
                _ => {}
            }
        }

        let (function, primary) = obj
            .iter()
            .find_map(|(k, v)| Function::from_name(k).filter(|f| f.name() == k.as_str()).map(|f| (f, v)))
            .ok_or_else(|| bad("no known function"))?;

        let mut args = Vec::new();
        match function {
            Function::Concat => {
                let parts = primary.as_array().ok_or_else(|| bad("concat expects an array"))?;
                for part in parts {
                    args.push(Self::from_shape(part)?);
                }
            }
            _ => {
                args.push(Self::from_shape(primary)?);
                for key in function.named_args() {
                    let Some(value) = obj.get(*key) else { break };
                    let value = match (function, value) {
                        (Function::Split, Value::Array(items)) if items.len() == 1 => items[0].clone(),
                        _ => value.clone(),
                    };
                    args.push(Self::Literal(value));
                }
            }
        }
        Ok(Self::Call { function, args })
    }
}

impl TryFrom<&Value> for ValueExpression {
    type Error = CanopyError;

    /// Read a serialized output value: objects with the `"$"` marker are
    /// computed expressions, anything else is a literal.
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value.as_object().and_then(|o| o.get(EXPRESSION_MARKER).filter(|_| o.len() == 1)) {
            Some(shape) => Self::from_shape(shape),
            None => Ok(Self::Literal(value.clone())),
        }
    }
}

impl Serialize for ValueExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().map_err(<S::Error as ser::Error>::custom)?.serialize(serializer)
    }
}

// ── Compile-time evaluation ───────────────────────────────────────────────────

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Evaluate `function` over literal arguments. `None` leaves the call for
/// the runtime engine.
fn evaluate(function: Function, args: &[&Value]) -> Option<Value> {
    match function {
        Function::Concat => {
            if args.iter().all(|a| a.is_array()) {
                let items = args.iter().filter_map(|a| a.as_array()).flatten().cloned().collect();
                return Some(Value::Array(items));
            }
            let parts: Option<Vec<String>> = args.iter().map(|a| as_text(a)).collect();
            parts.map(|p| Value::String(p.concat()))
        }
        Function::Split => {
            let text = args[0].as_str()?;
            let delimiters: Vec<String> = match args[1] {
                Value::String(d) => vec![d.clone()],
                Value::Array(items) => items.iter().filter_map(|d| d.as_str().map(str::to_string)).collect(),
                _ => return None,
            };
            let mut parts = vec![text.to_string()];
            for d in delimiters.iter().filter(|d| !d.is_empty()) {
                parts = parts.iter().flat_map(|p| p.split(d.as_str()).map(str::to_string)).collect();
            }
            Some(Value::Array(parts.into_iter().map(Value::String).collect()))
        }
        Function::PadLeft => {
            let text = as_text(args[0])?;
            let width = usize::try_from(args[1].as_u64()?).ok()?;
            if width > MAX_PAD_LENGTH {
                return None;
            }
            let pad = match args.get(2) {
                Some(c) => c.as_str()?.chars().next()?,
                None => ' ',
            };
            let len = text.chars().count();
            let padding: String = std::iter::repeat(pad).take(width.saturating_sub(len)).collect();
            Some(Value::String(padding + &text))
        }
        Function::ToLower => args[0].as_str().map(|s| Value::String(s.to_lowercase())),
        Function::ToUpper => args[0].as_str().map(|s| Value::String(s.to_uppercase())),
        Function::Trim => args[0].as_str().map(|s| Value::String(s.trim().to_string())),
        Function::Substring => {
            let chars: Vec<char> = args[0].as_str()?.chars().collect();
            let start = usize::try_from(args[1].as_u64()?).ok()?;
            let len = match args.get(2) {
                Some(l) => usize::try_from(l.as_u64()?).ok()?,
                None => chars.len().checked_sub(start)?,
            };
            let end = start.checked_add(len).filter(|e| *e <= chars.len())?;
            Some(Value::String(chars[start..end].iter().collect()))
        }
        Function::First | Function::Last => {
            let pick_first = function == Function::First;
            match args[0] {
                Value::String(s) => {
                    let c = if pick_first { s.chars().next() } else { s.chars().last() };
                    Some(Value::String(c.map(String::from).unwrap_or_default()))
                }
                Value::Array(items) => {
                    let item = if pick_first { items.first() } else { items.last() };
                    Some(item.cloned().unwrap_or(Value::Null))
                }
                _ => None,
            }
        }
        Function::Length => match args[0] {
            Value::String(s) => Some(json!(s.chars().count())),
            Value::Array(items) => Some(json!(items.len())),
            Value::Object(map) => Some(json!(map.len())),
            _ => None,
        },
    }
}
