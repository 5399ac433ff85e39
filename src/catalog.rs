//! Operator Catalog
//!
//! The catalog is the single source of truth shared by the code emitter, the
//! interpreter, and the config validator: one descriptor per external
//! operator name, carrying the C++ symbol it lowers to, its return type, its
//! arity (with trailing optional arguments for C++ default parameters), and
//! the declared argument kinds the interpreter coerces against.
//!
//! The catalog is fixed at build time. Adding an operator means adding its
//! implementation to `include/pipeline_ops.hpp`, its interpreter case in the
//! `interp` module, a descriptor here, and bumping [`CATALOG_REVISION`] so
//! stale cached artifacts are not reused.

use std::fmt;

use tracing::warn;

use crate::ir::{DataType, PipelineConfig};

/// Bumped whenever an operator's semantics, signature, or symbol changes.
/// Part of the fingerprint hash domain.
pub const CATALOG_REVISION: u32 = 3;

/// Declared kind of an operator argument, used for explicit coercion in the
/// interpreter and coercibility checks in the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Any numeric, widened to `f64`.
    F64,
    /// Any numeric, narrowed to `i32`.
    I32,
    /// A string.
    Str,
    /// Any numeric, nonzero meaning true.
    Bool,
    /// A list of any element type.
    AnyList,
    /// A list of `f64`.
    F64List,
    /// Coerced to the element type of the preceding list argument.
    ListElem,
}

impl ArgKind {
    /// Whether a value of declared type `ty` can coerce into this kind.
    /// `Unknown` always passes; it is resolved from the context at runtime.
    pub fn accepts(&self, ty: DataType) -> bool {
        if ty == DataType::Unknown {
            return true;
        }
        match self {
            ArgKind::F64 | ArgKind::I32 | ArgKind::Bool => ty.is_numeric(),
            ArgKind::Str => ty == DataType::Str,
            ArgKind::AnyList => ty.is_list(),
            ArgKind::F64List => ty == DataType::F64List,
            ArgKind::ListElem => ty.is_numeric() || ty == DataType::Str,
        }
    }
}

/// Descriptor of one catalog operator.
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    /// External name used in pipeline configs.
    pub name: &'static str,
    /// Function symbol in the operator library namespace.
    pub symbol: &'static str,
    /// Declared return type, independent of input types.
    pub return_type: DataType,
    /// Full argument count.
    pub arity: usize,
    /// Trailing arguments with C++ default values; calls may omit them.
    pub optional_args: usize,
    /// Whether the emitter must substitute an explicit scalar type
    /// parameter at the call site.
    pub scalar_param: bool,
    /// Scalar parameter to use when the return type is not itself a scalar.
    pub default_scalar: DataType,
    /// Declared argument kinds, `arity` entries.
    pub arg_types: &'static [ArgKind],
}

impl OpDescriptor {
    /// Minimum number of arguments a call may pass.
    pub fn min_args(&self) -> usize {
        self.arity - self.optional_args
    }
}

use ArgKind::*;
use DataType::{F64 as RF64, I32 as RI32, I64 as RI64, Str as RStr};

macro_rules! op {
    ($name:literal, $symbol:literal, $ret:expr, $opt:expr, $scalar:expr, $default:expr, [$($kind:expr),*]) => {
        OpDescriptor {
            name: $name,
            symbol: $symbol,
            return_type: $ret,
            arity: [$($kind),*].len(),
            optional_args: $opt,
            scalar_param: $scalar,
            default_scalar: $default,
            arg_types: &[$($kind),*],
        }
    };
}

static CATALOG: &[OpDescriptor] = &[
    op!("get_sign", "get_sign", RI32, 0, false, RF64, [F64]),
    op!("price_diff", "price_diff", RF64, 0, false, RF64, [F64, F64]),
    op!("avg_avg_log", "avg_avg_log", RI64, 4, false, RF64, [F64, I32, I32, I32, I32]),
    op!("direct_output_int32", "direct_output_int32", RI32, 0, true, RI32, [F64]),
    op!("direct_output_int64", "direct_output_int64", RI64, 0, true, RI64, [F64]),
    op!("direct_output_double", "direct_output_double", RF64, 0, true, RF64, [F64]),
    op!("direct_output_string", "direct_output_string", RStr, 0, true, RF64, [F64]),
    op!("len", "len", RI64, 0, false, RF64, [AnyList]),
    op!("list_to_string", "list_to_string", RStr, 1, false, RF64, [AnyList, Str]),
    op!("catein_list_cross", "catein_list_cross", RI32, 0, false, RF64, [AnyList, ListElem]),
    op!("catein_list_cross_count", "catein_list_cross_count", RI32, 0, false, RF64, [AnyList, ListElem]),
    op!("add", "add_op", RF64, 0, true, RF64, [F64, F64]),
    op!("sub", "sub_op", RF64, 0, true, RF64, [F64, F64]),
    op!("mul", "mul_op", RF64, 0, true, RF64, [F64, F64]),
    op!("div", "div_op", RF64, 0, true, RF64, [F64, F64]),
    op!("if_else", "if_else", RF64, 0, false, RF64, [Bool, F64, F64]),
    op!("max", "max_op", RF64, 0, true, RF64, [F64, F64]),
    op!("min", "min_op", RF64, 0, true, RF64, [F64, F64]),
    op!("abs", "abs_op", RF64, 0, true, RF64, [F64]),
    op!("square", "square_op", RF64, 0, true, RF64, [F64]),
    op!("sqrt", "sqrt_op", RF64, 0, true, RF64, [F64]),
    op!("floor", "floor_op", RI32, 0, true, RF64, [F64]),
    op!("ceil", "ceil_op", RI32, 0, true, RF64, [F64]),
    op!("percent", "percent_op", RF64, 0, false, RF64, [F64, F64]),
    op!("moving_average", "moving_average", RF64, 0, false, RF64, [F64List, I32]),
    op!("vector_sum", "vector_sum", RF64, 0, false, RF64, [F64List]),
    op!("vector_avg", "vector_avg", RF64, 0, false, RF64, [F64List]),
];

/// Look up the descriptor for an external operator name.
pub fn lookup(name: &str) -> Option<&'static OpDescriptor> {
    CATALOG.iter().find(|d| d.name == name)
}

/// All external operator names, in catalog order.
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|d| d.name)
}

// =============================================================================
// Config validation
// =============================================================================

/// Result type for config validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Structural errors that prevent executor construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Pipeline name is empty.
    EmptyPipelineName,
    /// A step has no operator name.
    EmptyOpName { step: usize },
    /// A step has no output variable.
    EmptyOutputVar { step: usize },
    /// Argument count outside the allowed range for the operator.
    ArityMismatch {
        step: usize,
        op: String,
        min: usize,
        max: usize,
        got: usize,
    },
    /// A variable-reference argument names nothing that exists at that step.
    UnknownVariable { step: usize, name: String },
    /// A literal's text does not parse under its declared type.
    BadLiteral {
        step: usize,
        text: String,
        ty: DataType,
    },
    /// An argument's declared type cannot coerce to the operator's
    /// declared argument kind.
    UncoercibleArg {
        step: usize,
        op: String,
        index: usize,
        ty: DataType,
    },
    /// An output name resolves to no input, variable, or step output.
    UnresolvedOutput { name: String },
    /// An output's declared type is incompatible with the type of the
    /// value it resolves to.
    IncompatibleOutput {
        name: String,
        declared: DataType,
        resolved: DataType,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyPipelineName => write!(f, "pipeline name is empty"),
            ValidationError::EmptyOpName { step } => {
                write!(f, "step {}: empty operator name", step)
            }
            ValidationError::EmptyOutputVar { step } => {
                write!(f, "step {}: empty output variable", step)
            }
            ValidationError::ArityMismatch {
                step,
                op,
                min,
                max,
                got,
            } => write!(
                f,
                "step {}: operator '{}' takes {}..={} arguments, got {}",
                step, op, min, max, got
            ),
            ValidationError::UnknownVariable { step, name } => {
                write!(f, "step {}: unknown variable '{}'", step, name)
            }
            ValidationError::BadLiteral { step, text, ty } => {
                write!(f, "step {}: literal '{}' does not parse as {}", step, text, ty)
            }
            ValidationError::UncoercibleArg {
                step,
                op,
                index,
                ty,
            } => write!(
                f,
                "step {}: argument {} of '{}' has type {} with no coercion",
                step, index, op, ty
            ),
            ValidationError::UnresolvedOutput { name } => {
                write!(f, "output '{}' resolves to no input, variable, or step", name)
            }
            ValidationError::IncompatibleOutput {
                name,
                declared,
                resolved,
            } => write!(
                f,
                "output '{}' declared {} but resolves to {}",
                name, declared, resolved
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

fn literal_parses(text: &str, ty: DataType) -> bool {
    match ty {
        DataType::I32 => text.parse::<i32>().is_ok(),
        DataType::I64 => text.parse::<i64>().is_ok(),
        DataType::F32 | DataType::F64 => text.parse::<f64>().is_ok(),
        DataType::Str | DataType::Unknown => true,
        _ => false,
    }
}

/// Validate a pipeline config against the catalog and the IR invariants.
///
/// An operator name absent from the catalog is allowed through with a
/// warning: emission falls back to a bare call on the literal name, and the
/// native compiler rejects it if the symbol does not exist. The interpreter
/// refuses such steps at execution time.
pub fn validate(config: &PipelineConfig) -> ValidationResult<()> {
    if config.name.is_empty() {
        return Err(ValidationError::EmptyPipelineName);
    }

    let mut known: Vec<&str> = config
        .inputs
        .iter()
        .chain(config.variables.iter())
        .map(|f| f.name.as_str())
        .collect();

    for (i, step) in config.steps.iter().enumerate() {
        if step.op_name.is_empty() {
            return Err(ValidationError::EmptyOpName { step: i });
        }
        if step.output_var.is_empty() {
            return Err(ValidationError::EmptyOutputVar { step: i });
        }

        let descriptor = lookup(&step.op_name);
        if descriptor.is_none() {
            warn!(step = i, op = %step.op_name, "operator not in catalog; deferring to the native compiler");
        }

        if let Some(desc) = descriptor {
            if step.args.len() < desc.min_args() || step.args.len() > desc.arity {
                return Err(ValidationError::ArityMismatch {
                    step: i,
                    op: step.op_name.clone(),
                    min: desc.min_args(),
                    max: desc.arity,
                    got: step.args.len(),
                });
            }
        }

        for (j, arg) in step.args.iter().enumerate() {
            match arg {
                crate::ir::Arg::Variable { name, ty } => {
                    if !known.contains(&name.as_str()) {
                        return Err(ValidationError::UnknownVariable {
                            step: i,
                            name: name.clone(),
                        });
                    }
                    if let Some(desc) = descriptor {
                        let kind = desc.arg_types[j];
                        if !kind.accepts(*ty) {
                            return Err(ValidationError::UncoercibleArg {
                                step: i,
                                op: step.op_name.clone(),
                                index: j,
                                ty: *ty,
                            });
                        }
                    }
                }
                crate::ir::Arg::Literal { text, ty } => {
                    if !literal_parses(text, *ty) {
                        return Err(ValidationError::BadLiteral {
                            step: i,
                            text: text.clone(),
                            ty: *ty,
                        });
                    }
                }
            }
        }

        // Steps may rebind declared variables; later steps see the name
        // either way.
        if !known.contains(&step.output_var.as_str()) {
            known.push(step.output_var.as_str());
        }
    }

    for output in &config.outputs {
        match config.declared_type(&output.name) {
            None => {
                return Err(ValidationError::UnresolvedOutput {
                    name: output.name.clone(),
                })
            }
            Some(resolved) => {
                let compatible = resolved == output.ty
                    || resolved == DataType::Unknown
                    || (resolved.is_numeric() && output.ty.is_numeric());
                if !compatible {
                    return Err(ValidationError::IncompatibleOutput {
                        name: output.name.clone(),
                        declared: output.ty,
                        resolved,
                    });
                }
            }
        }
    }

    Ok(())
}
