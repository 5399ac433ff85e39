//! C++ Code Emitter
//!
//! Lowers a validated [`PipelineConfig`] plus the operator catalog into a
//! single self-contained C++17 compilation unit:
//!
//! 1. a flat `PipelineContext` struct with one field per input, declared
//!    variable, and step output (no virtual dispatch — the optimiser must
//!    see through the entire pipeline);
//! 2. `execute_internal(PipelineContext&)` sequencing the operator calls;
//! 3. an `extern "C"` entry `pipeline_execute_<sanitised_fingerprint>`
//!    plus `pipeline_name` / `pipeline_fingerprint` accessors.
//!
//! The entry exchanges data through contiguous arrays of 8-byte slots, one
//! slot per input/output in declaration order: `double`/`float` values
//! travel as the bit pattern of the `double`, `int32`/`int64` values as
//! `int64_t`. The JIT executor marshals with the same encoding. String and
//! list fields do not cross the entry boundary; their context fields are
//! default-initialised.
//!
//! Emission never fails: an operator missing from the catalog lowers to a
//! bare call on its literal name under the operator-library namespace, and
//! the native compiler rejects the unit if the symbol does not exist.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::catalog;
use crate::fingerprint::sanitize_identifier;
use crate::ir::{Arg, DataType, OpCall, PipelineConfig};

/// Bumped whenever emitted code changes shape. Part of the fingerprint
/// hash domain so stale artifacts are never reused across emitter changes.
pub const EMITTER_REVISION: u32 = 4;

/// Code shape to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitStyle {
    /// Context struct + `execute_internal` (the full contract).
    #[default]
    Context,
    /// Step outputs as function locals inside the entry; same slot ABI.
    Locals,
}

/// Emission options.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub style: EmitStyle,
    /// Path text placed in the `#include` directive for the operator
    /// library. The default resolves next to the emitted source file.
    pub include_path: String,
    /// Override for the directory the driver writes sources/artifacts to;
    /// `None` uses the driver's cache directory.
    pub output_dir: Option<PathBuf>,
    /// Reuse cached artifacts when the fingerprint matches.
    pub use_cache: bool,
    pub enable_inline: bool,
    pub enable_vectorize: bool,
    /// Trades float determinism for speed; off by default to preserve
    /// interpreter/JIT equivalence.
    pub fast_math: bool,
    pub verbose: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            style: EmitStyle::Context,
            include_path: "pipeline_ops.hpp".to_string(),
            output_dir: None,
            use_cache: true,
            enable_inline: true,
            enable_vectorize: true,
            fast_math: false,
            verbose: false,
        }
    }
}

/// C++ scalar spelling for a template parameter; non-scalar types fall
/// back to the descriptor's default.
fn scalar_cpp_name(ty: DataType) -> &'static str {
    match ty {
        DataType::I32 => "int32_t",
        DataType::I64 => "int64_t",
        DataType::F32 => "float",
        _ => "double",
    }
}

fn escape_cpp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Lowers one pipeline config to a C++ compilation unit.
pub struct CodeEmitter<'a> {
    config: &'a PipelineConfig,
    options: &'a EmitOptions,
    /// Sanitised fingerprint: namespace, symbol suffix.
    ns: String,
    /// Every name visible in the pipeline body, with its resolved type.
    variables: HashMap<String, DataType>,
}

impl<'a> CodeEmitter<'a> {
    pub fn new(config: &'a PipelineConfig, options: &'a EmitOptions) -> Self {
        Self::with_fingerprint(config, &config.fingerprint, options)
    }

    /// Emit under an explicit fingerprint (used by the driver when the
    /// config carries none).
    pub fn with_fingerprint(
        config: &'a PipelineConfig,
        fingerprint: &str,
        options: &'a EmitOptions,
    ) -> Self {
        let mut variables = HashMap::new();
        for field in config.inputs.iter().chain(config.variables.iter()) {
            variables.insert(field.name.clone(), field.ty);
        }
        for step in &config.steps {
            let ty = catalog::lookup(&step.op_name)
                .map(|d| d.return_type)
                .unwrap_or(DataType::F64);
            variables.entry(step.output_var.clone()).or_insert(ty);
        }
        for output in &config.outputs {
            variables.entry(output.name.clone()).or_insert(output.ty);
        }

        CodeEmitter {
            config,
            options,
            ns: sanitize_identifier(fingerprint),
            variables,
        }
    }

    /// Produce the compilation unit. Deterministic: the same
    /// (config, catalog, emitter) triple yields byte-identical source.
    pub fn emit(&self) -> String {
        let mut out = String::with_capacity(4096);
        self.emit_header(&mut out);
        match self.options.style {
            EmitStyle::Context => {
                self.emit_context_struct(&mut out);
                self.emit_slot_helpers(&mut out);
                self.emit_execute_internal(&mut out);
                self.emit_exports_context(&mut out);
            }
            EmitStyle::Locals => {
                self.emit_slot_helpers(&mut out);
                self.emit_exports_locals(&mut out);
            }
        }
        let _ = writeln!(out, "\n}}  // namespace pipejit::generated::{}", self.ns);
        out
    }

    fn emit_header(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "// Auto-generated pipeline code. Do not edit.\n\
             // Pipeline:    {}\n\
             // Fingerprint: {}\n\
             // Emitter:     pipejit rev {}\n",
            self.config.name, self.ns, EMITTER_REVISION
        );
        out.push_str("#include <cmath>\n#include <cstdint>\n#include <cstring>\n#include <string>\n#include <vector>\n\n");
        let _ = writeln!(out, "#include \"{}\"\n", self.options.include_path);
        let _ = writeln!(out, "namespace pipejit::generated::{} {{\n", self.ns);
    }

    /// Field order: inputs, declared variables, step outputs, outputs —
    /// first declaration of a name wins, duplicates share the field.
    fn emit_context_struct(&self, out: &mut String) {
        out.push_str("struct PipelineContext {\n");
        let mut declared: Vec<&str> = Vec::new();

        for field in &self.config.inputs {
            if !declared.contains(&field.name.as_str()) {
                declared.push(&field.name);
                let _ = writeln!(
                    out,
                    "    {} {}{{}};",
                    field.ty.cpp_type_name(),
                    sanitize_identifier(&field.name)
                );
            }
        }
        for field in &self.config.variables {
            if !declared.contains(&field.name.as_str()) {
                declared.push(&field.name);
                let _ = writeln!(
                    out,
                    "    {} {}{{}};",
                    field.ty.cpp_type_name(),
                    sanitize_identifier(&field.name)
                );
            }
        }
        for step in &self.config.steps {
            if !declared.contains(&step.output_var.as_str()) {
                declared.push(&step.output_var);
                let ty = self.variables[&step.output_var];
                let _ = writeln!(
                    out,
                    "    {} {}{{}};",
                    ty.cpp_type_name(),
                    sanitize_identifier(&step.output_var)
                );
            }
        }
        for output in &self.config.outputs {
            if !declared.contains(&output.name.as_str()) {
                declared.push(&output.name);
                let _ = writeln!(
                    out,
                    "    {} {}{{}};",
                    output.ty.cpp_type_name(),
                    sanitize_identifier(&output.name)
                );
            }
        }
        out.push_str("};\n\n");
    }

    fn emit_slot_helpers(&self, out: &mut String) {
        out.push_str(
            "static inline double slot_to_f64(uint64_t s) {\n\
             \x20   double d;\n\
             \x20   std::memcpy(&d, &s, sizeof d);\n\
             \x20   return d;\n\
             }\n\
             static inline uint64_t f64_to_slot(double d) {\n\
             \x20   uint64_t s;\n\
             \x20   std::memcpy(&s, &d, sizeof s);\n\
             \x20   return s;\n\
             }\n\
             static inline int64_t slot_to_i64(uint64_t s) {\n\
             \x20   int64_t v;\n\
             \x20   std::memcpy(&v, &s, sizeof v);\n\
             \x20   return v;\n\
             }\n\
             static inline uint64_t i64_to_slot(int64_t v) {\n\
             \x20   uint64_t s;\n\
             \x20   std::memcpy(&s, &v, sizeof s);\n\
             \x20   return s;\n\
             }\n\n",
        );
    }

    fn arg_code(&self, arg: &Arg, prefix: &str) -> String {
        match arg {
            Arg::Variable { name, .. } => format!("{}{}", prefix, sanitize_identifier(name)),
            Arg::Literal { text, ty } => {
                if *ty == DataType::Str {
                    format!("\"{}\"", escape_cpp_string(text))
                } else {
                    text.clone()
                }
            }
        }
    }

    fn op_call_code(&self, step: &OpCall, prefix: &str) -> String {
        let args: Vec<String> = step.args.iter().map(|a| self.arg_code(a, prefix)).collect();
        let args = args.join(", ");
        let target = format!("{}{}", prefix, sanitize_identifier(&step.output_var));

        match catalog::lookup(&step.op_name) {
            Some(desc) => {
                let template = if desc.scalar_param {
                    let scalar = if desc.return_type.is_numeric() {
                        desc.return_type
                    } else {
                        desc.default_scalar
                    };
                    format!("<{}>", scalar_cpp_name(scalar))
                } else {
                    String::new()
                };
                format!(
                    "{} = ::pipejit::ops::{}{}({});",
                    target, desc.symbol, template, args
                )
            }
            // Unknown operator: defer to the native compiler.
            None => format!("{} = ::pipejit::ops::{}({});", target, step.op_name, args),
        }
    }

    fn emit_steps(&self, out: &mut String, prefix: &str) {
        for step in &self.config.steps {
            let _ = writeln!(out, "    // {} -> {}", step.op_name, step.output_var);
            if !step.options.is_empty() {
                let opts: Vec<String> = step
                    .options
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                let _ = writeln!(out, "    // options: {}", opts.join(", "));
            }
            let _ = writeln!(out, "    {}", self.op_call_code(step, prefix));
        }
    }

    fn emit_execute_internal(&self, out: &mut String) {
        out.push_str("bool execute_internal(PipelineContext& ctx) {\n");
        self.emit_steps(out, "ctx.");
        out.push_str("    return true;\n}\n\n");
    }

    fn emit_input_unpack(&self, out: &mut String, prefix: &str) {
        out.push_str("    if (input_data != nullptr) {\n");
        out.push_str("        const uint64_t* in = static_cast<const uint64_t*>(input_data);\n");
        for (i, input) in self.config.inputs.iter().enumerate() {
            let field = format!("{}{}", prefix, sanitize_identifier(&input.name));
            match input.ty {
                DataType::F64 => {
                    let _ = writeln!(out, "        {} = slot_to_f64(in[{}]);", field, i);
                }
                DataType::F32 => {
                    let _ = writeln!(
                        out,
                        "        {} = static_cast<float>(slot_to_f64(in[{}]));",
                        field, i
                    );
                }
                DataType::I64 => {
                    let _ = writeln!(out, "        {} = slot_to_i64(in[{}]);", field, i);
                }
                DataType::I32 => {
                    let _ = writeln!(
                        out,
                        "        {} = static_cast<int32_t>(slot_to_i64(in[{}]));",
                        field, i
                    );
                }
                other => {
                    let _ = writeln!(
                        out,
                        "        // input '{}' ({}) not marshalled",
                        input.name, other
                    );
                }
            }
        }
        out.push_str("    }\n");
    }

    fn emit_output_pack(&self, out: &mut String, prefix: &str) {
        out.push_str("        uint64_t* out = static_cast<uint64_t*>(output_data);\n");
        for (i, output) in self.config.outputs.iter().enumerate() {
            let field = format!("{}{}", prefix, sanitize_identifier(&output.name));
            match output.ty {
                DataType::F64 | DataType::F32 => {
                    let _ = writeln!(
                        out,
                        "        out[{}] = f64_to_slot(static_cast<double>({}));",
                        i, field
                    );
                }
                DataType::I32 | DataType::I64 => {
                    let _ = writeln!(
                        out,
                        "        out[{}] = i64_to_slot(static_cast<int64_t>({}));",
                        i, field
                    );
                }
                other => {
                    let _ = writeln!(
                        out,
                        "        // output '{}' ({}) not marshalled",
                        output.name, other
                    );
                }
            }
        }
    }

    fn emit_name_accessors(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "const char* pipeline_name() {{\n    return \"{}\";\n}}\n",
            escape_cpp_string(&self.config.name)
        );
        let _ = writeln!(
            out,
            "const char* pipeline_fingerprint() {{\n    return \"{}\";\n}}",
            self.ns
        );
    }

    fn emit_exports_context(&self, out: &mut String) {
        out.push_str("extern \"C\" {\n\n");
        let _ = writeln!(
            out,
            "bool pipeline_execute_{}(void* input_data, void* output_data) {{",
            self.ns
        );
        out.push_str("    PipelineContext ctx;\n");
        self.emit_input_unpack(out, "ctx.");
        out.push_str("\n    bool ok = execute_internal(ctx);\n\n");
        out.push_str("    if (output_data != nullptr && ok) {\n");
        self.emit_output_pack(out, "ctx.");
        out.push_str("    }\n    return ok;\n}\n\n");
        self.emit_name_accessors(out);
        out.push_str("\n}  // extern \"C\"\n");
    }

    /// Locals style: same ABI, no context struct; every name becomes a
    /// default-initialised local of the entry function.
    fn emit_exports_locals(&self, out: &mut String) {
        out.push_str("extern \"C\" {\n\n");
        let _ = writeln!(
            out,
            "bool pipeline_execute_{}(void* input_data, void* output_data) {{",
            self.ns
        );

        let mut declared: Vec<&str> = Vec::new();
        let mut declare = |out: &mut String, name: &str, ty: DataType| {
            let _ = writeln!(
                out,
                "    {} {}{{}};",
                ty.cpp_type_name(),
                sanitize_identifier(name)
            );
        };
        for field in self.config.inputs.iter().chain(self.config.variables.iter()) {
            if !declared.contains(&field.name.as_str()) {
                declared.push(&field.name);
                declare(out, &field.name, field.ty);
            }
        }
        for step in &self.config.steps {
            if !declared.contains(&step.output_var.as_str()) {
                declared.push(&step.output_var);
                declare(out, &step.output_var, self.variables[&step.output_var]);
            }
        }
        out.push('\n');

        self.emit_input_unpack(out, "");
        out.push('\n');
        self.emit_steps(out, "");
        out.push_str("\n    if (output_data != nullptr) {\n");
        self.emit_output_pack(out, "");
        out.push_str("    }\n    return true;\n}\n\n");
        self.emit_name_accessors(out);
        out.push_str("\n}  // extern \"C\"\n");
    }
}
