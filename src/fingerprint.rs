//! Pipeline Fingerprinting
//!
//! A fingerprint is a deterministic hash of the portions of a
//! [`PipelineConfig`](crate::ir::PipelineConfig) that affect generated code:
//! the pipeline name, the ordered input `(name, type)` pairs, and every step
//! as `op(arg,...)->output`. The catalog and emitter revisions are folded in
//! as well, so a semantic change to either invalidates previously cached
//! artifacts.
//!
//! The fingerprint doubles as the cache key and, after identifier
//! sanitisation, as the suffix of the emitted entry symbol and of the
//! on-disk source/artifact file names.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::catalog::CATALOG_REVISION;
use crate::codegen::EMITTER_REVISION;
use crate::ir::PipelineConfig;

/// Truncated length of the hex fingerprint. 64 bits of SHA-256 output,
/// plenty for the expected working set of distinct pipeline shapes.
pub const FINGERPRINT_LEN: usize = 16;

/// Compute the fingerprint of a config.
///
/// Order-sensitive across steps and argument positions; insensitive to
/// `variables`/`outputs` ordering, option maps, and formatting.
pub fn config_fingerprint(config: &PipelineConfig) -> String {
    let mut domain = String::new();
    domain.push_str(&config.name);
    domain.push('|');
    for input in &config.inputs {
        let _ = write!(domain, "{}:{},", input.name, input.ty);
    }
    domain.push('|');
    for step in &config.steps {
        let _ = write!(domain, "{}(", step.op_name);
        for (i, arg) in step.args.iter().enumerate() {
            if i > 0 {
                domain.push(',');
            }
            domain.push_str(arg.text());
        }
        let _ = write!(domain, ")->{};", step.output_var);
    }
    let _ = write!(domain, "|c{}|e{}", CATALOG_REVISION, EMITTER_REVISION);

    let digest = Sha256::digest(domain.as_bytes());
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Turn an arbitrary string into a valid C identifier fragment.
///
/// Empty input becomes `p_invalid`; a leading digit gains a `p_` prefix;
/// every other non-alphanumeric, non-underscore byte becomes `_`.
pub fn sanitize_identifier(s: &str) -> String {
    if s.is_empty() {
        return "p_invalid".to_string();
    }
    let mut result = String::with_capacity(s.len() + 2);
    if s.as_bytes()[0].is_ascii_digit() {
        result.push_str("p_");
    }
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            result.push(c);
        } else {
            result.push('_');
        }
    }
    result
}

/// Name of the exported entry symbol for a (raw) fingerprint.
pub fn entry_symbol(fingerprint: &str) -> String {
    format!("pipeline_execute_{}", sanitize_identifier(fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{demo_config, Arg, DataType};

    #[test]
    fn test_fingerprint_deterministic() {
        let a = demo_config();
        let b = demo_config();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_sensitive_to_steps() {
        let a = demo_config();
        let mut b = demo_config();
        b.steps[0].op_name = "sub".to_string();
        b.compute_fingerprint();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_sensitive_to_arg_order() {
        let mut a = demo_config();
        let mut b = demo_config();
        b.steps[0].args.swap(0, 1);
        a.compute_fingerprint();
        b.compute_fingerprint();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_sensitive_to_inputs() {
        let a = demo_config();
        let mut b = demo_config();
        b.inputs[2].ty = DataType::I64;
        b.compute_fingerprint();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_ignores_outputs_order() {
        let mut a = demo_config();
        a.outputs.push(crate::ir::IoField::new(
            "temp_sum",
            DataType::F64,
            false,
        ));
        let mut b = a.clone();
        b.outputs.swap(0, 1);
        a.compute_fingerprint();
        b.compute_fingerprint();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_ignores_literal_type_tag() {
        // Same literal text under a different declared type hashes the same;
        // the type tag only matters to validation, not to emitted code.
        let mut a = demo_config();
        let mut b = demo_config();
        b.steps[2].args[1] = Arg::literal("100", DataType::I32);
        a.compute_fingerprint();
        b.compute_fingerprint();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier(""), "p_invalid");
        assert_eq!(sanitize_identifier("123abc"), "p_123abc");
        assert_eq!(sanitize_identifier("a-b.c"), "a_b_c");
        assert_eq!(sanitize_identifier("already_ok_42"), "already_ok_42");
    }

    #[test]
    fn test_entry_symbol() {
        assert_eq!(entry_symbol("123abc"), "pipeline_execute_p_123abc");
        assert_eq!(entry_symbol("deadbeef"), "pipeline_execute_deadbeef");
    }
}
