//! Pipeline Intermediate Representation (IR)
//!
//! This module defines the core IR types the rest of the engine consumes:
//! typed variables, a tagged value union, operator calls, and the pipeline
//! configuration itself. The IR is produced either by the JSON config parser
//! (`config` module) or built programmatically through [`OpCall`]'s builder
//! methods, and is consumed by the code emitter, the interpreter, and the
//! JIT executor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Scalar and list type tags supported by the engine.
///
/// `Unknown` marks variable references whose type is resolved from the
/// execution context at runtime (e.g. `$x` arguments in a JSON config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    I32,
    I64,
    F32,
    F64,
    Str,
    I32List,
    I64List,
    F64List,
    StrList,
    #[default]
    Unknown,
}

impl DataType {
    /// Parse the external (config-file) spelling of a type.
    pub fn parse(s: &str) -> DataType {
        match s {
            "int32" => DataType::I32,
            "int64" => DataType::I64,
            "float" => DataType::F32,
            "double" => DataType::F64,
            "string" => DataType::Str,
            "int32_list" => DataType::I32List,
            "int64_list" => DataType::I64List,
            "double_list" => DataType::F64List,
            "string_list" => DataType::StrList,
            _ => DataType::Unknown,
        }
    }

    /// The external (config-file) spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F32 => "float",
            DataType::F64 => "double",
            DataType::Str => "string",
            DataType::I32List => "int32_list",
            DataType::I64List => "int64_list",
            DataType::F64List => "double_list",
            DataType::StrList => "string_list",
            DataType::Unknown => "unknown",
        }
    }

    /// The C++ spelling used by the code emitter.
    pub fn cpp_type_name(&self) -> &'static str {
        match self {
            DataType::I32 => "int32_t",
            DataType::I64 => "int64_t",
            DataType::F32 => "float",
            DataType::F64 => "double",
            DataType::Str => "std::string",
            DataType::I32List => "std::vector<int32_t>",
            DataType::I64List => "std::vector<int64_t>",
            DataType::F64List => "std::vector<double>",
            DataType::StrList => "std::vector<std::string>",
            DataType::Unknown => "void",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            DataType::I32List | DataType::I64List | DataType::F64List | DataType::StrList
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::I32 | DataType::I64 | DataType::F32 | DataType::F64
        )
    }

    /// Element type of a list type, `Unknown` for non-lists.
    pub fn element_type(&self) -> DataType {
        match self {
            DataType::I32List => DataType::I32,
            DataType::I64List => DataType::I64,
            DataType::F64List => DataType::F64,
            DataType::StrList => DataType::Str,
            _ => DataType::Unknown,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged runtime value.
///
/// The tag always matches the active payload; there is no reinterpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    I32List(Vec<i32>),
    I64List(Vec<i64>),
    F64List(Vec<f64>),
    StrList(Vec<String>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::I32(_) => DataType::I32,
            Value::I64(_) => DataType::I64,
            Value::F32(_) => DataType::F32,
            Value::F64(_) => DataType::F64,
            Value::Str(_) => DataType::Str,
            Value::I32List(_) => DataType::I32List,
            Value::I64List(_) => DataType::I64List,
            Value::F64List(_) => DataType::F64List,
            Value::StrList(_) => DataType::StrList,
        }
    }

    /// Widen a numeric value to `f64`. Non-numeric values yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Narrow a numeric value to `i64` (floats truncate toward zero).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::F32(v) => Some(*v as i64),
            Value::F64(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Narrow a numeric value to `i32` (floats truncate toward zero).
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            Value::I64(v) => Some(*v as i32),
            Value::F32(v) => Some(*v as i32),
            Value::F64(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Runtime record of named typed values through which a pipeline call
/// communicates with its caller.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.variables.get(name).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.variables.get(name).and_then(Value::as_i64)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.variables.get(name).and_then(Value::as_i32)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.variables.get(name).and_then(Value::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// A single operator argument: a reference to a context variable or a
/// literal constant carried in text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Variable { name: String, ty: DataType },
    Literal { text: String, ty: DataType },
}

impl Arg {
    pub fn variable(name: impl Into<String>, ty: DataType) -> Arg {
        Arg::Variable {
            name: name.into(),
            ty,
        }
    }

    pub fn literal(text: impl Into<String>, ty: DataType) -> Arg {
        Arg::Literal {
            text: text.into(),
            ty,
        }
    }

    /// The fingerprint-relevant text of this argument: the variable name or
    /// the literal text.
    pub fn text(&self) -> &str {
        match self {
            Arg::Variable { name, .. } => name,
            Arg::Literal { text, .. } => text,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Arg::Variable { ty, .. } | Arg::Literal { ty, .. } => *ty,
        }
    }
}

/// One step of a pipeline: an operator invocation producing a named output.
///
/// `options` carries per-call tuning knobs; unknown keys pass through to
/// code generation untouched. A `BTreeMap` keeps emission deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpCall {
    pub op_name: String,
    pub output_var: String,
    pub args: Vec<Arg>,
    pub options: BTreeMap<String, String>,
}

impl OpCall {
    pub fn new(op_name: impl Into<String>) -> OpCall {
        OpCall {
            op_name: op_name.into(),
            ..OpCall::default()
        }
    }

    pub fn output(mut self, var: impl Into<String>) -> OpCall {
        self.output_var = var.into();
        self
    }

    pub fn arg(mut self, arg: Arg) -> OpCall {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Arg>) -> OpCall {
        self.args.extend(args);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> OpCall {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A named typed input, intermediate variable, or output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoField {
    pub name: String,
    pub ty: DataType,
    pub required: bool,
}

impl IoField {
    pub fn new(name: impl Into<String>, ty: DataType, required: bool) -> IoField {
        IoField {
            name: name.into(),
            ty,
            required,
        }
    }
}

/// Declarative description of a pipeline: ordered typed inputs, declared
/// intermediate variables, operator steps, and outputs.
///
/// The `fingerprint` is derived from the semantically relevant portion of
/// the config (see the `fingerprint` module); mutating any of those fields
/// invalidates cached artifacts compiled from the old shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    pub inputs: Vec<IoField>,
    pub variables: Vec<IoField>,
    pub outputs: Vec<IoField>,
    pub steps: Vec<OpCall>,
    pub fingerprint: String,
}

impl PipelineConfig {
    /// Recompute and store this config's fingerprint.
    pub fn compute_fingerprint(&mut self) -> String {
        self.fingerprint = crate::fingerprint::config_fingerprint(self);
        self.fingerprint.clone()
    }

    /// Look up the declared type of a name across inputs, variables, and
    /// step outputs (in that precedence order).
    pub fn declared_type(&self, name: &str) -> Option<DataType> {
        self.inputs
            .iter()
            .chain(self.variables.iter())
            .find(|f| f.name == name)
            .map(|f| f.ty)
            .or_else(|| {
                self.steps
                    .iter()
                    .find(|s| s.output_var == name)
                    .and_then(|s| crate::catalog::lookup(&s.op_name))
                    .map(|d| d.return_type)
            })
    }
}

/// The three-step demo pipeline used in tests and benchmarks:
/// `final_score = (price_a + price_b) * volume / 100`.
pub fn demo_config() -> PipelineConfig {
    let mut config = PipelineConfig {
        name: "demo_pipeline".to_string(),
        inputs: vec![
            IoField::new("price_a", DataType::F64, true),
            IoField::new("price_b", DataType::F64, true),
            IoField::new("volume", DataType::I32, true),
        ],
        variables: vec![
            IoField::new("temp_sum", DataType::F64, false),
            IoField::new("temp_product", DataType::F64, false),
            IoField::new("final_score", DataType::F64, false),
        ],
        outputs: vec![IoField::new("final_score", DataType::F64, false)],
        steps: vec![
            OpCall::new("add")
                .output("temp_sum")
                .arg(Arg::variable("price_a", DataType::F64))
                .arg(Arg::variable("price_b", DataType::F64)),
            OpCall::new("mul")
                .output("temp_product")
                .arg(Arg::variable("temp_sum", DataType::F64))
                .arg(Arg::variable("volume", DataType::I32)),
            OpCall::new("div")
                .output("final_score")
                .arg(Arg::variable("temp_product", DataType::F64))
                .arg(Arg::literal("100", DataType::F64)),
        ],
        fingerprint: String::new(),
    };
    config.compute_fingerprint();
    config
}
