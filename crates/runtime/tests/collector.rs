//! Collector behavior: reclamation, rooting, finalization and collection
//! under execution pressure.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{expect_int, run_exported, test_context};
use tiro_core::{CompiledModuleBuilder, FunctionBuilder, FunctionKind, Opcode::*};
use tiro_runtime::{Context, ContextConfig, Global, NativeObject, Scope, TiroString, Value};

#[test]
fn unreachable_objects_are_reclaimed() {
    let mut ctx = test_context();
    let baseline = ctx.heap().allocated_objects();

    {
        let scope = Scope::new(&mut ctx);
        for index in 0..100 {
            let _ = scope.local(TiroString::make(&mut ctx, &format!("garbage-{index}")));
        }
        assert!(ctx.heap().allocated_objects() >= baseline + 100);
    }

    ctx.collect();
    assert!(ctx.heap().allocated_objects() <= baseline);
}

#[test]
fn rooted_values_survive_collection() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let kept = scope.local(TiroString::make(&mut ctx, "kept alive"));

    ctx.collect();
    ctx.collect();
    assert_eq!(kept.get().as_str(), "kept alive");
}

#[test]
fn global_roots_survive_collection() {
    let mut ctx = test_context();
    let global = {
        let scope = Scope::new(&mut ctx);
        let string = scope.local(TiroString::make(&mut ctx, "global root"));
        Global::new(&mut ctx, string.get())
    };

    ctx.collect();
    assert_eq!(global.get().as_str(), "global root");

    drop(global);
    ctx.collect();
}

static FINALIZED: AtomicUsize = AtomicUsize::new(0);

fn count_finalization(_data: *mut u8, _size: usize) {
    FINALIZED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn native_object_finalizers_run_during_sweep() {
    let mut ctx = test_context();

    let before = FINALIZED.load(Ordering::SeqCst);
    {
        let scope = Scope::new(&mut ctx);
        let object = scope.local(NativeObject::make(&mut ctx, 32, Some(count_finalization)));
        // Rooted: the first collection must not finalize it.
        ctx.collect();
        assert_eq!(FINALIZED.load(Ordering::SeqCst), before);
        assert_eq!(object.get().len(), 32);
    }

    ctx.collect();
    assert_eq!(FINALIZED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn collection_records_duration_and_count() {
    let mut ctx = test_context();
    let collections = ctx.collector().collections();
    ctx.collect();
    assert_eq!(ctx.collector().collections(), collections + 1);
    assert!(ctx.collector().last_duration_ms() >= 0.0);
}

#[test]
fn threshold_never_shrinks() {
    let mut ctx = test_context();
    let threshold = ctx.collector().next_threshold();
    ctx.collect();
    ctx.collect();
    assert!(ctx.collector().next_threshold() >= threshold);
}

// Running with a tiny collection threshold forces collections inside the
// interpreter; the result must be unaffected and every live value must have
// been rooted through the dispatch loop.
#[test]
fn execution_survives_frequent_collections() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut ctx = Context::with_config(ContextConfig {
        initial_gc_threshold: 1 << 12,
        ..ContextConfig::default()
    });
    ctx.load_std_module().unwrap();

    let mut builder = CompiledModuleBuilder::new("gc_stress");
    let mut fib = FunctionBuilder::new(FunctionKind::Normal, 1, 0);
    {
        let w = fib.code();
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Lte);
        let recurse = w.make_label();
        w.op(JmpFalsePop).label_ref(recurse);
        w.op(LoadParam).u32(0);
        w.op(Ret);
        w.bind(recurse);
        w.op(LoadModule).u32(0);
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Sub);
        w.op(Call).u32(1);
        w.op(LoadModule).u32(0);
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(2);
        w.op(Sub);
        w.op(Call).u32(1);
        w.op(Add);
        w.op(Ret);
    }
    let fib = builder.add_function(fib.finish().unwrap());
    assert_eq!(fib.0, 0);

    let mut run = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = run.code();
        w.op(LoadModule).u32(0);
        w.op(LoadInt).i64(18);
        w.op(Call).u32(1);
        w.op(Ret);
    }
    let run = builder.add_function(run.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, run);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 2584);
    assert!(ctx.collector().collections() > 0, "the tiny threshold must have forced collections");
}

#[test]
fn empty_containers_are_valid_and_traceable() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);
    let tuple = scope.local(tiro_runtime::Tuple::make(&mut ctx, 0));
    let array = scope.local(tiro_runtime::Array::make(&mut ctx));
    let table = scope.local(tiro_runtime::HashTable::make(&mut ctx));

    ctx.collect();

    assert_eq!(tuple.get().len(), 0);
    assert_eq!(array.get().len(), 0);
    assert_eq!(table.get().len(), 0);
    assert!(table.get().get(Value::null()).is_none());
}
