//! Interpreter Executor
//!
//! Walks the IR step by step, dispatching per operator name. This is both
//! the baseline the JIT is benchmarked against and the semantic reference:
//! every arm below reproduces the operator library in
//! `include/pipeline_ops.hpp` exactly, including the never-trap policy —
//! division by zero and the square root of a negative both yield zero, and
//! a missing variable reads as zero. Runtime never fails a pipeline; the
//! only dispatch error is an operator outside the catalog.
//!
//! # Coercion matrix
//!
//! Arguments are coerced to the kind the catalog declares for their
//! position:
//!
//! | target          | accepted sources                                   |
//! |-----------------|----------------------------------------------------|
//! | `F64` / `Bool`  | f64, f32, i64, i32 (widened)                       |
//! | `I32`           | i32, i64, f64, f32 (truncated toward zero)         |
//! | `Str`           | string values, string literals                     |
//! | `AnyList`       | any list value                                     |
//! | `F64List`       | f64 list values                                    |
//! | `ListElem`      | numeric or string, matched to the list's elements  |
//!
//! Anything else was already rejected by validation; at runtime an
//! unexpected shape degrades to the kind's zero value.

use smallvec::SmallVec;

use tracing::{error, trace};

use crate::catalog::{self, ArgKind};
use crate::ir::{Arg, DataType, ExecutionContext, OpCall, PipelineConfig, Value};
use crate::manager::{PipelineError, PipelineExecutor, PipelineResult};

/// Executor that interprets the IR directly, no compilation involved.
pub struct InterpreterExecutor {
    config: PipelineConfig,
}

impl InterpreterExecutor {
    pub fn new(mut config: PipelineConfig) -> Self {
        if config.fingerprint.is_empty() {
            config.compute_fingerprint();
        }
        InterpreterExecutor { config }
    }

    fn execute_step(&self, step: &OpCall, context: &mut ExecutionContext) -> PipelineResult<()> {
        let Some(descriptor) = catalog::lookup(&step.op_name) else {
            error!(op = %step.op_name, "unknown operator in interpreter dispatch");
            return Err(PipelineError::UnknownOperator(step.op_name.clone()));
        };

        let args = resolve_args(descriptor.arg_types, &step.args, context);
        let result = apply_op(&step.op_name, &args);
        trace!(op = %step.op_name, output = %step.output_var, ?result, "step evaluated");
        context.set_variable(step.output_var.clone(), result);
        Ok(())
    }
}

impl PipelineExecutor for InterpreterExecutor {
    fn execute(&mut self, context: &mut ExecutionContext) -> PipelineResult<()> {
        for step in &self.config.steps {
            self.execute_step(step, context)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn fingerprint(&self) -> &str {
        &self.config.fingerprint
    }
}

// =============================================================================
// Argument resolution
// =============================================================================

/// Raw value of an argument before coercion: context lookup for variables,
/// literal parse (by declared type) for constants.
fn raw_value(arg: &Arg, context: &ExecutionContext) -> Option<Value> {
    match arg {
        Arg::Variable { name, .. } => context.get(name).cloned(),
        Arg::Literal { text, ty } => match ty {
            DataType::I32 => text.parse::<i32>().ok().map(Value::I32),
            DataType::I64 => text.parse::<i64>().ok().map(Value::I64),
            DataType::F32 => text.parse::<f32>().ok().map(Value::F32),
            DataType::Str => Some(Value::Str(text.clone())),
            _ => text.parse::<f64>().ok().map(Value::F64),
        },
    }
}

fn resolve_args(
    kinds: &[ArgKind],
    args: &[Arg],
    context: &ExecutionContext,
) -> SmallVec<[Value; 4]> {
    let mut resolved: SmallVec<[Value; 4]> = SmallVec::new();
    for (i, arg) in args.iter().enumerate() {
        let kind = kinds.get(i).copied().unwrap_or(ArgKind::F64);
        let raw = raw_value(arg, context);
        let value = coerce(raw, kind, &resolved);
        resolved.push(value);
    }
    resolved
}

/// Coerce a raw value into the declared kind. Absent or unexpectedly
/// shaped values become the kind's zero.
fn coerce(raw: Option<Value>, kind: ArgKind, earlier: &[Value]) -> Value {
    match kind {
        ArgKind::F64 | ArgKind::Bool => {
            Value::F64(raw.and_then(|v| v.as_f64()).unwrap_or(0.0))
        }
        ArgKind::I32 => Value::I32(raw.and_then(|v| v.as_i32()).unwrap_or(0)),
        ArgKind::Str => match raw {
            Some(Value::Str(s)) => Value::Str(s),
            _ => Value::Str(String::new()),
        },
        ArgKind::AnyList => match raw {
            Some(v) if v.data_type().is_list() => v,
            _ => Value::F64List(Vec::new()),
        },
        ArgKind::F64List => match raw {
            Some(Value::F64List(v)) => Value::F64List(v),
            _ => Value::F64List(Vec::new()),
        },
        ArgKind::ListElem => {
            // Matched to the preceding list argument's element type.
            let elem_ty = earlier
                .iter()
                .rev()
                .find(|v| v.data_type().is_list())
                .map(|v| v.data_type().element_type())
                .unwrap_or(DataType::F64);
            match (elem_ty, raw) {
                (DataType::Str, Some(Value::Str(s))) => Value::Str(s),
                (DataType::Str, _) => Value::Str(String::new()),
                (DataType::I32, raw) => Value::I32(raw.and_then(|v| v.as_i32()).unwrap_or(0)),
                (DataType::I64, raw) => Value::I64(raw.and_then(|v| v.as_i64()).unwrap_or(0)),
                (_, raw) => Value::F64(raw.and_then(|v| v.as_f64()).unwrap_or(0.0)),
            }
        }
    }
}

// =============================================================================
// Operator semantics (mirror of pipeline_ops.hpp)
// =============================================================================

fn f(args: &[Value], i: usize) -> f64 {
    args.get(i).and_then(Value::as_f64).unwrap_or(0.0)
}

fn i32_or(args: &[Value], i: usize, default: i32) -> i32 {
    args.get(i).and_then(Value::as_i32).unwrap_or(default)
}

fn list_len(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::I32List(v)) => v.len() as i64,
        Some(Value::I64List(v)) => v.len() as i64,
        Some(Value::F64List(v)) => v.len() as i64,
        Some(Value::StrList(v)) => v.len() as i64,
        _ => 0,
    }
}

/// Format a number the way the generated C++ streams it for the common
/// cases: integral values print without a decimal point.
fn format_f64(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn avg_avg_log(origin: f64, inter1: i32, threshold1: i32, inter2: i32, threshold2: i32) -> i64 {
    if origin == 0.0 || inter1 <= 0 || inter2 <= 0 {
        return 0;
    }
    let ori_abs = origin.abs() as i64;
    let (inter1, threshold1) = (inter1 as i64, threshold1 as i64);
    let (inter2, threshold2) = (inter2 as i64, threshold2 as i64);

    if ori_abs <= threshold1 {
        let res = ori_abs / inter1 + 1;
        return if origin >= 0.0 { res } else { -res };
    }

    if ori_abs <= threshold2 {
        let start = threshold1 / inter1 + 1;
        let res = start + (ori_abs - threshold1) / inter2 + 1;
        return if origin >= 0.0 { res } else { -res };
    }

    let start = threshold1 / inter1 + 1 + (threshold2 - threshold1) / inter2 + 1;
    let real_log = (ori_abs / inter2) as f64;
    let res = start + (real_log.ln() / 1.5f64.ln()) as i64;
    if origin >= 0.0 {
        res
    } else {
        -res
    }
}

fn moving_average(history: &[f64], window: i32) -> f64 {
    if history.is_empty() || window <= 0 {
        return 0.0;
    }
    let start = (history.len() as i64 - window as i64).max(0) as usize;
    let tail = &history[start..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

fn join_list(list: &Value, delimiter: &str) -> String {
    fn join<T, F: Fn(&T) -> String>(items: &[T], delimiter: &str, fmt: F) -> String {
        items
            .iter()
            .map(fmt)
            .collect::<Vec<_>>()
            .join(delimiter)
    }
    match list {
        Value::I32List(v) => join(v, delimiter, |x| x.to_string()),
        Value::I64List(v) => join(v, delimiter, |x| x.to_string()),
        Value::F64List(v) => join(v, delimiter, |x| format_f64(*x)),
        Value::StrList(v) => v.join(delimiter),
        _ => String::new(),
    }
}

fn count_in_list(list: &Value, item: &Value) -> i32 {
    match (list, item) {
        (Value::I32List(v), _) => {
            let needle = item.as_i32().unwrap_or(0);
            v.iter().filter(|x| **x == needle).count() as i32
        }
        (Value::I64List(v), _) => {
            let needle = item.as_i64().unwrap_or(0);
            v.iter().filter(|x| **x == needle).count() as i32
        }
        (Value::F64List(v), _) => {
            let needle = item.as_f64().unwrap_or(0.0);
            v.iter().filter(|x| **x == needle).count() as i32
        }
        (Value::StrList(v), Value::Str(needle)) => {
            v.iter().filter(|x| *x == needle).count() as i32
        }
        _ => 0,
    }
}

fn apply_op(op_name: &str, args: &[Value]) -> Value {
    match op_name {
        "add" => Value::F64(f(args, 0) + f(args, 1)),
        "sub" => Value::F64(f(args, 0) - f(args, 1)),
        "mul" => Value::F64(f(args, 0) * f(args, 1)),
        "div" => {
            let b = f(args, 1);
            Value::F64(if b == 0.0 { 0.0 } else { f(args, 0) / b })
        }
        "get_sign" => {
            let v = f(args, 0);
            Value::I32(if v < 0.0 {
                -1
            } else if v > 0.0 {
                1
            } else {
                0
            })
        }
        "price_diff" => {
            let discount = f(args, 0);
            Value::F64(if discount == 0.0 {
                0.0
            } else {
                discount - f(args, 1)
            })
        }
        "avg_avg_log" => Value::I64(avg_avg_log(
            f(args, 0),
            i32_or(args, 1, 1000),
            i32_or(args, 2, 15000),
            i32_or(args, 3, 5000),
            i32_or(args, 4, 250000),
        )),
        "direct_output_int32" => Value::I32(f(args, 0) as i32),
        "direct_output_int64" => Value::I64(f(args, 0) as i64),
        "direct_output_double" => Value::F64(f(args, 0)),
        "direct_output_string" => Value::Str(format_f64(f(args, 0))),
        "len" => Value::I64(list_len(args.first())),
        "list_to_string" => {
            let delimiter = args.get(1).and_then(Value::as_str).unwrap_or("|");
            match args.first() {
                Some(list) => Value::Str(join_list(list, delimiter)),
                None => Value::Str(String::new()),
            }
        }
        "catein_list_cross" => {
            let count = match (args.first(), args.get(1)) {
                (Some(list), Some(item)) => count_in_list(list, item),
                _ => 0,
            };
            Value::I32(if count > 0 { 1 } else { 0 })
        }
        "catein_list_cross_count" => {
            let count = match (args.first(), args.get(1)) {
                (Some(list), Some(item)) => count_in_list(list, item),
                _ => 0,
            };
            Value::I32(count)
        }
        "if_else" => Value::F64(if f(args, 0) != 0.0 {
            f(args, 1)
        } else {
            f(args, 2)
        }),
        "max" => {
            let (a, b) = (f(args, 0), f(args, 1));
            Value::F64(if a > b { a } else { b })
        }
        "min" => {
            let (a, b) = (f(args, 0), f(args, 1));
            Value::F64(if a < b { a } else { b })
        }
        "abs" => {
            let v = f(args, 0);
            Value::F64(if v >= 0.0 { v } else { -v })
        }
        "square" => {
            let v = f(args, 0);
            Value::F64(v * v)
        }
        "sqrt" => {
            let v = f(args, 0);
            Value::F64(if v < 0.0 { 0.0 } else { v.sqrt() })
        }
        "floor" => Value::I32(f(args, 0).floor() as i32),
        "ceil" => Value::I32(f(args, 0).ceil() as i32),
        "percent" => {
            let total = f(args, 1);
            Value::F64(if total == 0.0 {
                0.0
            } else {
                f(args, 0) / total * 100.0
            })
        }
        "moving_average" => {
            let history = match args.first() {
                Some(Value::F64List(v)) => v.as_slice(),
                _ => &[],
            };
            Value::F64(moving_average(history, i32_or(args, 1, 0)))
        }
        "vector_sum" => {
            let sum = match args.first() {
                Some(Value::F64List(v)) => v.iter().sum(),
                _ => 0.0,
            };
            Value::F64(sum)
        }
        "vector_avg" => {
            let avg = match args.first() {
                Some(Value::F64List(v)) if !v.is_empty() => {
                    v.iter().sum::<f64>() / v.len() as f64
                }
                _ => 0.0,
            };
            Value::F64(avg)
        }
        // Unreachable through execute_step; kept total for direct callers.
        _ => Value::F64(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{demo_config, Arg, IoField};

    fn run_interp(config: PipelineConfig, context: &mut ExecutionContext) {
        InterpreterExecutor::new(config)
            .execute(context)
            .expect("interpreter execution");
    }

    fn demo_context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("price_a", Value::F64(100.0));
        ctx.set_variable("price_b", Value::F64(50.0));
        ctx.set_variable("volume", Value::I32(10));
        ctx
    }

    #[test]
    fn test_demo_pipeline() {
        let mut ctx = demo_context();
        run_interp(demo_config(), &mut ctx);
        // (100 + 50) * 10 / 100 = 15.0
        assert_eq!(ctx.get_f64("final_score"), Some(15.0));
    }

    #[test]
    fn test_unknown_operator_fails() {
        let mut config = demo_config();
        config.steps[1].op_name = "mystery".to_string();
        let mut executor = InterpreterExecutor::new(config);
        let err = executor
            .execute(&mut demo_context())
            .expect_err("unknown op must fail");
        assert!(matches!(err, PipelineError::UnknownOperator(op) if op == "mystery"));
    }

    #[test]
    fn test_get_sign() {
        assert_eq!(apply_op("get_sign", &[Value::F64(5.0)]), Value::I32(1));
        assert_eq!(apply_op("get_sign", &[Value::F64(-5.0)]), Value::I32(-1));
        assert_eq!(apply_op("get_sign", &[Value::F64(0.0)]), Value::I32(0));
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        assert_eq!(
            apply_op("div", &[Value::F64(10.0), Value::F64(0.0)]),
            Value::F64(0.0)
        );
        assert_eq!(
            apply_op("percent", &[Value::F64(10.0), Value::F64(0.0)]),
            Value::F64(0.0)
        );
    }

    #[test]
    fn test_sqrt_of_negative_is_zero() {
        assert_eq!(apply_op("sqrt", &[Value::F64(-9.0)]), Value::F64(0.0));
        assert_eq!(apply_op("sqrt", &[Value::F64(9.0)]), Value::F64(3.0));
    }

    #[test]
    fn test_type_conversions() {
        assert_eq!(
            apply_op("direct_output_int32", &[Value::F64(3.14)]),
            Value::I32(3)
        );
        assert_eq!(
            apply_op("direct_output_int64", &[Value::F64(3.14)]),
            Value::I64(3)
        );
        assert_eq!(
            apply_op("direct_output_double", &[Value::F64(42.0)]),
            Value::F64(42.0)
        );
        assert_eq!(
            apply_op("direct_output_string", &[Value::F64(42.0)]),
            Value::Str("42".to_string())
        );
    }

    #[test]
    fn test_avg_avg_log_regions() {
        // Region boundaries with the default parameters
        // inter1=1000 t1=15000 inter2=5000 t2=250000.
        assert_eq!(avg_avg_log(0.0, 1000, 15000, 5000, 250000), 0);
        assert_eq!(avg_avg_log(5000.0, 1000, 15000, 5000, 250000), 6);
        assert_eq!(avg_avg_log(-5000.0, 1000, 15000, 5000, 250000), -6);
        // Region 2: 16 + (20000-15000)/5000 + 1 = 18.
        assert_eq!(avg_avg_log(20000.0, 1000, 15000, 5000, 250000), 18);
        // Region 3 is positive and beyond region 2's ceiling.
        let high = avg_avg_log(300000.0, 1000, 15000, 5000, 250000);
        assert!(high > 18);
        assert_eq!(avg_avg_log(-300000.0, 1000, 15000, 5000, 250000), -high);
    }

    #[test]
    fn test_avg_avg_log_defaults_applied() {
        let config = {
            let mut c = PipelineConfig {
                name: "buckets".to_string(),
                inputs: vec![IoField::new("x", DataType::F64, true)],
                outputs: vec![IoField::new("bucket", DataType::I64, false)],
                steps: vec![OpCall::new("avg_avg_log")
                    .output("bucket")
                    .arg(Arg::variable("x", DataType::F64))],
                ..PipelineConfig::default()
            };
            c.compute_fingerprint();
            c
        };
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("x", Value::F64(5000.0));
        run_interp(config, &mut ctx);
        assert_eq!(ctx.get_i64("bucket"), Some(6));
    }

    #[test]
    fn test_list_operators() {
        let list = Value::I32List(vec![3, 1, 4, 1, 5]);
        assert_eq!(apply_op("len", &[list.clone()]), Value::I64(5));
        assert_eq!(
            apply_op("catein_list_cross", &[list.clone(), Value::I32(4)]),
            Value::I32(1)
        );
        assert_eq!(
            apply_op("catein_list_cross", &[list.clone(), Value::I32(9)]),
            Value::I32(0)
        );
        assert_eq!(
            apply_op("catein_list_cross_count", &[list.clone(), Value::I32(1)]),
            Value::I32(2)
        );
        assert_eq!(
            apply_op(
                "list_to_string",
                &[list, Value::Str(",".to_string())]
            ),
            Value::Str("3,1,4,1,5".to_string())
        );
    }

    #[test]
    fn test_list_to_string_default_delimiter() {
        let mut config = PipelineConfig {
            name: "join_default".to_string(),
            inputs: vec![IoField::new("xs", DataType::I32List, true)],
            outputs: vec![IoField::new("joined", DataType::Str, false)],
            steps: vec![OpCall::new("list_to_string")
                .output("joined")
                .arg(Arg::variable("xs", DataType::I32List))],
            ..PipelineConfig::default()
        };
        config.compute_fingerprint();
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("xs", Value::I32List(vec![1, 2, 3]));
        run_interp(config, &mut ctx);
        assert_eq!(ctx.get_str("joined"), Some("1|2|3"));
    }

    #[test]
    fn test_vector_operators() {
        let v = Value::F64List(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(apply_op("vector_sum", &[v.clone()]), Value::F64(10.0));
        assert_eq!(apply_op("vector_avg", &[v.clone()]), Value::F64(2.5));
        assert_eq!(
            apply_op("vector_avg", &[Value::F64List(vec![])]),
            Value::F64(0.0)
        );
        assert_eq!(
            apply_op("moving_average", &[v.clone(), Value::I32(2)]),
            Value::F64(3.5)
        );
        // Window larger than history clamps to the full list.
        assert_eq!(
            apply_op("moving_average", &[v, Value::I32(100)]),
            Value::F64(2.5)
        );
    }

    #[test]
    fn test_price_diff_zero_discount() {
        assert_eq!(
            apply_op("price_diff", &[Value::F64(0.0), Value::F64(80.0)]),
            Value::F64(0.0)
        );
        assert_eq!(
            apply_op("price_diff", &[Value::F64(60.0), Value::F64(80.0)]),
            Value::F64(-20.0)
        );
    }

    #[test]
    fn test_if_else_and_extrema() {
        assert_eq!(
            apply_op("if_else", &[Value::F64(1.0), Value::F64(2.0), Value::F64(3.0)]),
            Value::F64(2.0)
        );
        assert_eq!(
            apply_op("if_else", &[Value::F64(0.0), Value::F64(2.0), Value::F64(3.0)]),
            Value::F64(3.0)
        );
        assert_eq!(
            apply_op("max", &[Value::F64(3.0), Value::F64(5.0)]),
            Value::F64(5.0)
        );
        assert_eq!(
            apply_op("min", &[Value::F64(3.0), Value::F64(5.0)]),
            Value::F64(3.0)
        );
    }

    #[test]
    fn test_floor_ceil() {
        assert_eq!(apply_op("floor", &[Value::F64(3.7)]), Value::I32(3));
        assert_eq!(apply_op("ceil", &[Value::F64(3.2)]), Value::I32(4));
        assert_eq!(apply_op("floor", &[Value::F64(-3.2)]), Value::I32(-4));
    }

    #[test]
    fn test_missing_variable_reads_zero() {
        let mut config = demo_config();
        config.steps.truncate(1); // add(price_a, price_b) -> temp_sum
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("price_a", Value::F64(7.0));
        // price_b never set.
        run_interp(config, &mut ctx);
        assert_eq!(ctx.get_f64("temp_sum"), Some(7.0));
    }

    #[test]
    fn test_rebinding_output_var() {
        // A step may overwrite a declared variable; later steps observe
        // the new value.
        let mut config = PipelineConfig {
            name: "rebind".to_string(),
            inputs: vec![IoField::new("x", DataType::F64, true)],
            variables: vec![IoField::new("acc", DataType::F64, false)],
            outputs: vec![IoField::new("acc", DataType::F64, false)],
            steps: vec![
                OpCall::new("add")
                    .output("acc")
                    .arg(Arg::variable("x", DataType::F64))
                    .arg(Arg::literal("1", DataType::F64)),
                OpCall::new("mul")
                    .output("acc")
                    .arg(Arg::variable("acc", DataType::F64))
                    .arg(Arg::literal("2", DataType::F64)),
            ],
            ..PipelineConfig::default()
        };
        config.compute_fingerprint();
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("x", Value::F64(4.0));
        run_interp(config, &mut ctx);
        assert_eq!(ctx.get_f64("acc"), Some(10.0));
    }

    #[test]
    fn test_string_list_membership() {
        let list = Value::StrList(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            apply_op(
                "catein_list_cross_count",
                &[list.clone(), Value::Str("a".to_string())]
            ),
            Value::I32(2)
        );
        assert_eq!(
            apply_op("catein_list_cross", &[list, Value::Str("z".to_string())]),
            Value::I32(0)
        );
    }
}
