//! Benchmark comparing the JIT executor against the interpreter baseline.
//!
//! Measures per-call latency on the demo pipeline and on a wider synthetic
//! chain of arithmetic steps. JIT compilation happens once, outside the
//! measured loops; what is timed is marshalling + entry invocation versus
//! the interpreter's dispatch walk.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pipejit::jit::CcDriver;
use pipejit::{
    demo_config, Arg, DataType, ExecutionContext, IoField, Mode, OpCall, PipelineConfig,
    PipelineExecutor, PipelineManager, Value,
};

fn demo_context() -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.set_variable("price_a", Value::F64(100.0));
    ctx.set_variable("price_b", Value::F64(50.0));
    ctx.set_variable("volume", Value::I32(10));
    ctx
}

/// A chain of `depth` dependent arithmetic steps over one input.
fn chain_config(depth: usize) -> PipelineConfig {
    let mut config = PipelineConfig {
        name: format!("chain_{}", depth),
        inputs: vec![IoField::new("x", DataType::F64, true)],
        ..PipelineConfig::default()
    };

    let mut previous = "x".to_string();
    for i in 0..depth {
        let output = format!("v{}", i);
        let op = match i % 3 {
            0 => "add",
            1 => "mul",
            _ => "sub",
        };
        config.steps.push(
            OpCall::new(op)
                .output(&output)
                .arg(Arg::variable(&previous, DataType::F64))
                .arg(Arg::literal("1.5", DataType::F64)),
        );
        previous = output;
    }
    config.outputs = vec![IoField::new(previous, DataType::F64, false)];
    config.compute_fingerprint();
    config
}

fn bench_demo_pipeline(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = PipelineManager::with_cache_dir(dir.path());

    let mut group = c.benchmark_group("demo_pipeline");

    let mut interp = manager
        .create(demo_config(), Mode::Interpreter)
        .expect("create interpreter");
    group.bench_function("interpreter", |b| {
        let mut ctx = demo_context();
        b.iter(|| {
            interp.execute(black_box(&mut ctx)).expect("execute");
        })
    });

    if CcDriver::available("c++") {
        let mut jit = manager.create(demo_config(), Mode::Jit).expect("create jit");
        // Warm-up call performs the one-time compile + load.
        jit.execute(&mut demo_context()).expect("warm-up");

        group.bench_function("jit", |b| {
            let mut ctx = demo_context();
            b.iter(|| {
                jit.execute(black_box(&mut ctx)).expect("execute");
            })
        });
    } else {
        eprintln!("skipping jit benchmarks: no c++ compiler on host");
    }

    group.finish();
}

fn bench_step_chains(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = PipelineManager::with_cache_dir(dir.path());
    let have_cxx = CcDriver::available("c++");

    let mut group = c.benchmark_group("step_chain");

    for depth in [4usize, 16, 64] {
        let config = chain_config(depth);

        let mut interp = manager
            .create(config.clone(), Mode::Interpreter)
            .expect("create interpreter");
        group.bench_with_input(
            BenchmarkId::new("interpreter", depth),
            &depth,
            |b, _| {
                let mut ctx = ExecutionContext::new();
                ctx.set_variable("x", Value::F64(2.0));
                b.iter(|| {
                    interp.execute(black_box(&mut ctx)).expect("execute");
                })
            },
        );

        if have_cxx {
            let mut jit = manager.create(config, Mode::Jit).expect("create jit");
            let mut warm = ExecutionContext::new();
            warm.set_variable("x", Value::F64(2.0));
            jit.execute(&mut warm).expect("warm-up");

            group.bench_with_input(BenchmarkId::new("jit", depth), &depth, |b, _| {
                let mut ctx = ExecutionContext::new();
                ctx.set_variable("x", Value::F64(2.0));
                b.iter(|| {
                    jit.execute(black_box(&mut ctx)).expect("execute");
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_demo_pipeline, bench_step_chains);
criterion_main!(benches);
