//! Design parameters and their construction from user definitions.

use crate::expr::{analyze_option_syntax, analyze_order_syntax, evaluate, Bindings, Expr, Value};
use dse_types::{DesignPoint, DseError, DseResult, ExprError, ParamValue, SpaceError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Category of a parameter. Pipeline parameters are eligible for partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Pipeline,
    Parallel,
    Tiling,
    Unknown,
    Other(String),
}

impl ParamType {
    /// Parses a free-form type tag, case-insensitively.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_uppercase().as_str() {
            "PIPELINE" => Self::Pipeline,
            "PARALLEL" => Self::Parallel,
            "TILING" => Self::Tiling,
            "UNKNOWN" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_partitionable(&self) -> bool {
        matches!(self, Self::Pipeline)
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "PIPELINE"),
            Self::Parallel => write!(f, "PARALLEL"),
            Self::Tiling => write!(f, "TILING"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Other(tag) => write!(f, "{tag}"),
        }
    }
}

/// Maps a candidate value to its partition bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRule {
    pub expr: String,
    pub var: String,
    ast: Expr,
}

impl OrderRule {
    pub fn parse(expr: &str) -> Result<Self, ExprError> {
        let syntax = analyze_order_syntax(expr)?;
        Ok(Self {
            expr: expr.to_string(),
            var: syntax.var,
            ast: syntax.ast,
        })
    }

    pub fn bucket(&self, value: &ParamValue) -> Result<i64, ExprError> {
        let mut bindings = Bindings::new();
        bindings.insert(self.var.clone(), Value::from(value));
        let out = evaluate(&self.ast, &bindings)?;
        out.as_int().ok_or_else(|| ExprError::Type {
            message: format!("order must evaluate to an int, found {}", out.type_name()),
        })
    }
}

/// One entry of the user's design space definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// Option expression, or a literal list of options.
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub default: Option<ParamValue>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default, alias = "type")]
    pub ds_type: Option<String>,
}

impl ParameterConfig {
    pub fn new(options: impl Into<String>, default: impl Into<ParamValue>) -> Self {
        Self {
            options: Some(serde_json::Value::String(options.into())),
            default: Some(default.into()),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn with_type(mut self, ds_type: impl Into<String>) -> Self {
        self.ds_type = Some(ds_type.into());
        self
    }
}

/// A tunable knob of the design space.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: String,
    pub option_expr: String,
    options_ast: Expr,
    pub order: Option<OrderRule>,
    pub default: ParamValue,
    pub ds_type: ParamType,
    /// Parameters whose values the options read.
    pub deps: Vec<String>,
    /// Parameters whose options read this one.
    pub children: Vec<String>,
}

/// Renders values as a list literal of the expression language.
pub fn list_literal(values: &[ParamValue]) -> String {
    let items: Vec<String> = values.iter().map(ParamValue::to_literal).collect();
    format!("[{}]", items.join(", "))
}

fn options_source(id: &str, options: &serde_json::Value) -> DseResult<String> {
    match options {
        serde_json::Value::String(expr) => Ok(expr.clone()),
        serde_json::Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| serde_json::from_value::<ParamValue>(item.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SpaceError::InvalidOptions {
                    id: id.to_string(),
                    expr: options.to_string(),
                    message: err.to_string(),
                })?;
            Ok(list_literal(&values))
        }
        other => Err(SpaceError::InvalidOptions {
            id: id.to_string(),
            expr: other.to_string(),
            message: "options must be an expression string or a list".to_string(),
        }
        .into()),
    }
}

/// Builds a parameter from its definition. An unparsable order rule is dropped
/// with a warning; everything else that is malformed is an error.
pub fn create_parameter(id: &str, config: &ParameterConfig) -> DseResult<Parameter> {
    let options = config
        .options
        .as_ref()
        .ok_or_else(|| SpaceError::MissingAttribute {
            id: id.to_string(),
            attribute: "options".to_string(),
        })?;
    let option_expr = options_source(id, options)?;
    let syntax = analyze_option_syntax(&option_expr).map_err(|err| SpaceError::InvalidOptions {
        id: id.to_string(),
        expr: option_expr.clone(),
        message: err.to_string(),
    })?;

    let order = match &config.order {
        None => None,
        Some(expr) => match OrderRule::parse(expr) {
            Ok(rule) => Some(rule),
            Err(err) => {
                warn!(param = id, order = %expr, %err, "Failed to parse \"order\", ignore");
                None
            }
        },
    };

    let default = config
        .default
        .clone()
        .ok_or_else(|| SpaceError::MissingAttribute {
            id: id.to_string(),
            attribute: "default".to_string(),
        })?;

    let ds_type = match &config.ds_type {
        Some(tag) => ParamType::from_tag(tag),
        None => {
            warn!(param = id, "Missing attribute \"ds_type\", some optimization may not be triggered");
            ParamType::Unknown
        }
    };

    Ok(Parameter {
        id: id.to_string(),
        option_expr,
        options_ast: syntax.ast,
        order,
        default,
        ds_type,
        deps: syntax.deps,
        children: Vec::new(),
    })
}

impl Parameter {
    /// Bindings of this parameter's dependencies taken from `point`.
    pub fn bindings(&self, point: &DesignPoint) -> Bindings {
        self.deps
            .iter()
            .filter_map(|dep| point.get(dep).map(|v| (dep.clone(), Value::from(v))))
            .collect()
    }

    /// Evaluates the option expression.
    pub fn options(&self, bindings: &Bindings) -> DseResult<Vec<ParamValue>> {
        let value = evaluate(&self.options_ast, bindings).map_err(|source| SpaceError::Evaluation {
            id: self.id.clone(),
            expr: self.option_expr.clone(),
            source,
        })?;
        let non_list = || SpaceError::NonListOptions {
            id: self.id.clone(),
            expr: self.option_expr.clone(),
        };
        match value {
            Value::List(items) => items
                .iter()
                .map(|item| item.to_param_value().map_err(|_| DseError::from(non_list())))
                .collect(),
            _ => Err(non_list().into()),
        }
    }

    /// Options under the values of `point`.
    pub fn options_at(&self, point: &DesignPoint) -> DseResult<Vec<ParamValue>> {
        self.options(&self.bindings(point))
    }

    /// Replaces the option expression with a literal list of `values`.
    /// Dependencies are kept as they were.
    pub fn narrow_options(&mut self, values: &[ParamValue]) {
        self.option_expr = list_literal(values);
        self.options_ast = Expr::List(
            values
                .iter()
                .map(|v| match v {
                    ParamValue::Int(i) => Expr::Int(*i),
                    ParamValue::Str(s) => Expr::Str(s.clone()),
                })
                .collect(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_parameter() {
        let config = ParameterConfig::new(
            "[x for x in range(10) if x==0 or B!='flatten' and C!='flatten']",
            0,
        )
        .with_order("0 if x < 4 else 1")
        .with_type("parallel");
        let param = create_parameter("A", &config).unwrap();

        assert_eq!(param.deps, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(param.default, ParamValue::Int(0));
        assert_eq!(param.ds_type, ParamType::Parallel);
        assert_eq!(param.order.as_ref().map(|o| o.var.as_str()), Some("x"));
        assert!(param.children.is_empty());
    }

    #[test]
    fn test_missing_attributes() {
        let no_options = ParameterConfig {
            default: Some(ParamValue::Int(0)),
            ..ParameterConfig::default()
        };
        assert!(matches!(
            create_parameter("A", &no_options),
            Err(DseError::Space(SpaceError::MissingAttribute { ref attribute, .. })) if attribute == "options"
        ));

        let no_default = ParameterConfig {
            options: Some(serde_json::json!("[1, 2]")),
            ..ParameterConfig::default()
        };
        assert!(matches!(
            create_parameter("A", &no_default),
            Err(DseError::Space(SpaceError::MissingAttribute { ref attribute, .. })) if attribute == "default"
        ));
    }

    #[test]
    fn test_bad_options_is_fatal_bad_order_is_dropped() {
        let bad_options = ParameterConfig::new("[x, y for x in range(3)]", 0);
        assert!(matches!(
            create_parameter("A", &bad_options),
            Err(DseError::Space(SpaceError::InvalidOptions { .. }))
        ));

        let bad_order = ParameterConfig::new("[1, 2]", 1).with_order("0 if x==1 and y==2 else 1");
        let param = create_parameter("A", &bad_order).unwrap();
        assert!(param.order.is_none());
        assert_eq!(param.ds_type, ParamType::Unknown);
    }

    #[test]
    fn test_config_from_json() {
        let config: ParameterConfig = serde_json::from_value(serde_json::json!({
            "options": ["off", "", "flatten"],
            "default": "off",
            "order": "0 if x!='flatten' else 1",
            "type": "pipeline"
        }))
        .unwrap();
        let param = create_parameter("P", &config).unwrap();

        assert_eq!(param.option_expr, "['off', '', 'flatten']");
        assert_eq!(param.ds_type, ParamType::Pipeline);
        assert_eq!(
            param.options(&Bindings::new()).unwrap(),
            vec!["off".into(), "".into(), "flatten".into()]
        );
    }

    #[test]
    fn test_options_errors_name_the_parameter() {
        let param = create_parameter("A", &ParameterConfig::new("[x for x in range(B)]", 0)).unwrap();
        let err = param.options(&Bindings::new()).unwrap_err();
        assert!(matches!(
            err,
            DseError::Space(SpaceError::Evaluation { ref id, source: ExprError::UndefinedName { .. }, .. }) if id == "A"
        ));

        let scalar = create_parameter("S", &ParameterConfig::new("3", 3)).unwrap();
        assert!(matches!(
            scalar.options(&Bindings::new()),
            Err(DseError::Space(SpaceError::NonListOptions { .. }))
        ));
    }

    #[test]
    fn test_narrow_options_keeps_deps() {
        let mut param = create_parameter(
            "C",
            &ParameterConfig::new("[x for x in ['off', '', 'flatten'] if x=='off' or A&(A-1)==0]", "off"),
        )
        .unwrap();
        param.narrow_options(&["off".into(), "".into()]);

        assert_eq!(param.option_expr, "['off', '']");
        assert_eq!(param.deps, vec!["A".to_string()]);
        assert_eq!(
            param.options(&Bindings::new()).unwrap(),
            vec!["off".into(), "".into()]
        );
    }

    #[test]
    fn test_order_bucket() {
        let rule = OrderRule::parse("0 if x!='flatten' else 1").unwrap();
        assert_eq!(rule.bucket(&"off".into()).unwrap(), 0);
        assert_eq!(rule.bucket(&"flatten".into()).unwrap(), 1);
    }
}
