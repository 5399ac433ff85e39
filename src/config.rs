//! JSON Pipeline Configuration
//!
//! Parses the external pipeline description format into the IR and
//! serialises configs back out. The schema:
//!
//! ```json
//! {
//!   "name": "demo_pipeline",
//!   "inputs":    [{"name": "price_a", "type": "double", "required": true}],
//!   "variables": [{"name": "temp_sum", "type": "double", "required": false}],
//!   "steps": [
//!     {"op": "add", "args": ["$price_a", "$price_b"], "output": "temp_sum",
//!      "options": {"hint": "none"}}
//!   ],
//!   "outputs":   [{"name": "temp_sum", "type": "double", "required": true}]
//! }
//! ```
//!
//! Argument strings starting with `$` are variable references; everything
//! else is a literal whose type is inferred: integers become `int32` (or
//! `int64` past the 32-bit range), anything with a decimal point or exponent
//! becomes `double`, booleans become `int32` `1`/`0`, and the rest are
//! string literals.
//!
//! Parsing computes the fingerprint, so serialise-then-reparse yields a
//! config with the same fingerprint.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::{json, Map, Value as Json};

use crate::ir::{Arg, DataType, IoField, OpCall, PipelineConfig};

/// Result type for config parsing and generation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors reading or writing pipeline config files.
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read or written.
    Io(String, io::Error),
    /// Input is not valid JSON.
    Json(serde_json::Error),
    /// JSON is well-formed but violates the schema.
    Schema(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => write!(f, "config i/o on '{}': {}", path, err),
            ConfigError::Json(err) => write!(f, "config is not valid JSON: {}", err),
            ConfigError::Schema(msg) => write!(f, "config schema violation: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, err) => Some(err),
            ConfigError::Json(err) => Some(err),
            ConfigError::Schema(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

/// Parse a pipeline config from a JSON file.
pub fn parse_file(path: impl AsRef<Path>) -> ConfigResult<PipelineConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
    parse_str(&text)
}

/// Parse a pipeline config from a JSON string.
pub fn parse_str(text: &str) -> ConfigResult<PipelineConfig> {
    let root: Json = serde_json::from_str(text)?;
    let obj = root
        .as_object()
        .ok_or_else(|| ConfigError::Schema("top level must be an object".into()))?;

    let mut config = PipelineConfig {
        name: obj
            .get("name")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string(),
        ..PipelineConfig::default()
    };

    if let Some(v) = obj.get("inputs") {
        config.inputs = parse_io_fields(v, "inputs")?;
    }
    if let Some(v) = obj.get("variables") {
        config.variables = parse_io_fields(v, "variables")?;
    }
    if let Some(v) = obj.get("outputs") {
        config.outputs = parse_io_fields(v, "outputs")?;
    }
    if let Some(v) = obj.get("steps") {
        config.steps = parse_steps(v)?;
    }

    config.compute_fingerprint();
    Ok(config)
}

fn parse_io_fields(value: &Json, section: &str) -> ConfigResult<Vec<IoField>> {
    let arr = value
        .as_array()
        .ok_or_else(|| ConfigError::Schema(format!("'{}' must be an array", section)))?;

    let mut fields = Vec::with_capacity(arr.len());
    for item in arr {
        let obj = item
            .as_object()
            .ok_or_else(|| ConfigError::Schema(format!("'{}' entries must be objects", section)))?;
        let name = obj
            .get("name")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
        let ty = obj
            .get("type")
            .and_then(Json::as_str)
            .map(DataType::parse)
            .unwrap_or(DataType::Unknown);
        let required = obj.get("required").and_then(Json::as_bool).unwrap_or(true);
        fields.push(IoField { name, ty, required });
    }
    Ok(fields)
}

fn parse_steps(value: &Json) -> ConfigResult<Vec<OpCall>> {
    let arr = value
        .as_array()
        .ok_or_else(|| ConfigError::Schema("'steps' must be an array".into()))?;

    let mut steps = Vec::with_capacity(arr.len());
    for item in arr {
        let obj = item
            .as_object()
            .ok_or_else(|| ConfigError::Schema("'steps' entries must be objects".into()))?;

        let mut call = OpCall::new(
            obj.get("op").and_then(Json::as_str).unwrap_or_default(),
        );
        call.output_var = obj
            .get("output")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(args) = obj.get("args") {
            let arr = args
                .as_array()
                .ok_or_else(|| ConfigError::Schema("'args' must be an array".into()))?;
            call.args = arr.iter().map(parse_arg).collect();
        }

        if let Some(Json::Object(options)) = obj.get("options") {
            for (key, value) in options {
                let text = match value {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                };
                call.options.insert(key.clone(), text);
            }
        }

        steps.push(call);
    }
    Ok(steps)
}

/// Parse a single step argument, inferring literal types.
fn parse_arg(arg: &Json) -> Arg {
    match arg {
        Json::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                return Arg::variable(name, DataType::Unknown);
            }
            if s.parse::<f64>().is_ok() {
                if s.contains(['.', 'e', 'E']) {
                    return Arg::literal(s.clone(), DataType::F64);
                }
                if let Ok(v) = s.parse::<i64>() {
                    let ty = if i32::try_from(v).is_ok() {
                        DataType::I32
                    } else {
                        DataType::I64
                    };
                    return Arg::literal(s.clone(), ty);
                }
                return Arg::literal(s.clone(), DataType::F64);
            }
            Arg::literal(s.clone(), DataType::Str)
        }
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                let ty = if i32::try_from(v).is_ok() {
                    DataType::I32
                } else {
                    DataType::I64
                };
                Arg::literal(v.to_string(), ty)
            } else {
                Arg::literal(n.to_string(), DataType::F64)
            }
        }
        Json::Bool(b) => Arg::literal(if *b { "1" } else { "0" }, DataType::I32),
        other => Arg::literal(other.to_string(), DataType::Str),
    }
}

/// Serialise a config back into the external JSON format.
pub fn to_json(config: &PipelineConfig) -> String {
    let io_fields = |fields: &[IoField]| -> Json {
        Json::Array(
            fields
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "type": f.ty.as_str(),
                        "required": f.required,
                    })
                })
                .collect(),
        )
    };

    let steps: Vec<Json> = config
        .steps
        .iter()
        .map(|step| {
            let mut obj = Map::new();
            obj.insert("op".into(), json!(step.op_name));
            obj.insert("output".into(), json!(step.output_var));
            obj.insert(
                "args".into(),
                Json::Array(
                    step.args
                        .iter()
                        .map(|arg| match arg {
                            Arg::Variable { name, .. } => json!(format!("${}", name)),
                            Arg::Literal { text, .. } => json!(text),
                        })
                        .collect(),
                ),
            );
            if !step.options.is_empty() {
                let options: Map<String, Json> = step
                    .options
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                obj.insert("options".into(), Json::Object(options));
            }
            Json::Object(obj)
        })
        .collect();

    let root = json!({
        "name": config.name,
        "inputs": io_fields(&config.inputs),
        "variables": io_fields(&config.variables),
        "steps": steps,
        "outputs": io_fields(&config.outputs),
    });

    serde_json::to_string_pretty(&root).expect("config JSON serialisation cannot fail")
}

/// Write a config to disk in the external JSON format.
pub fn save_to_file(config: &PipelineConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
    let path = path.as_ref();
    fs::write(path, to_json(config))
        .map_err(|e| ConfigError::Io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::demo_config;

    const SAMPLE: &str = r#"{
        "name": "test_pipeline",
        "inputs": [
            {"name": "a", "type": "double", "required": true},
            {"name": "b", "type": "int32", "required": true}
        ],
        "variables": [
            {"name": "temp", "type": "double", "required": false}
        ],
        "steps": [
            {"op": "add", "args": ["$a", "$b"], "output": "temp"}
        ],
        "outputs": [
            {"name": "temp", "type": "double", "required": true}
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_str(SAMPLE).unwrap();
        assert_eq!(config.name, "test_pipeline");
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.inputs[1].ty, DataType::I32);
        assert_eq!(config.variables.len(), 1);
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].op_name, "add");
        assert_eq!(config.steps[0].output_var, "temp");
        assert_eq!(config.steps[0].args[0], Arg::variable("a", DataType::Unknown));
        assert!(!config.fingerprint.is_empty());
    }

    #[test]
    fn test_literal_inference() {
        assert_eq!(
            parse_arg(&json!("3.14")),
            Arg::literal("3.14", DataType::F64)
        );
        assert_eq!(parse_arg(&json!("42")), Arg::literal("42", DataType::I32));
        assert_eq!(
            parse_arg(&json!("5000000000")),
            Arg::literal("5000000000", DataType::I64)
        );
        assert_eq!(parse_arg(&json!("1e3")), Arg::literal("1e3", DataType::F64));
        assert_eq!(
            parse_arg(&json!("hello")),
            Arg::literal("hello", DataType::Str)
        );
        assert_eq!(parse_arg(&json!(7)), Arg::literal("7", DataType::I32));
        assert_eq!(parse_arg(&json!(2.5)), Arg::literal("2.5", DataType::F64));
        assert_eq!(parse_arg(&json!(true)), Arg::literal("1", DataType::I32));
    }

    #[test]
    fn test_round_trip_same_fingerprint() {
        let config = demo_config();
        let text = to_json(&config);
        let reparsed = parse_str(&text).unwrap();
        assert_eq!(reparsed.fingerprint, config.fingerprint);
        assert_eq!(reparsed.steps.len(), config.steps.len());
    }

    #[test]
    fn test_options_pass_through() {
        let text = r#"{
            "name": "p",
            "inputs": [{"name": "x", "type": "double"}],
            "steps": [
                {"op": "abs", "args": ["$x"], "output": "y",
                 "options": {"unroll": "4", "flag": true}}
            ],
            "outputs": []
        }"#;
        let config = parse_str(text).unwrap();
        let options = &config.steps[0].options;
        assert_eq!(options.get("unroll").map(String::as_str), Some("4"));
        assert_eq!(options.get("flag").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(parse_str("{"), Err(ConfigError::Json(_))));
        assert!(matches!(
            parse_str(r#"{"name": "p", "steps": 5}"#),
            Err(ConfigError::Schema(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let config = demo_config();
        save_to_file(&config, &path).unwrap();
        let loaded = parse_file(&path).unwrap();
        assert_eq!(loaded.fingerprint, config.fingerprint);
    }
}
