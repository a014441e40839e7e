//! Coroutine scheduling and the async native bridge.

mod common;

use std::time::Instant;

use common::{expect_int, run_exported, test_context};
use tiro_core::{CompiledModule, CompiledModuleBuilder, FunctionBuilder, FunctionKind, Opcode::*};
use tiro_runtime::{
    CoroutineState, CoroutineStack, ModuleBuilder, NativeAsyncFrame, RuntimeError, Scope,
    TypedValue, Value,
};

// import std; std.sleep(millis); return 42
fn sleeper_module(millis: i64) -> CompiledModule {
    let mut builder = CompiledModuleBuilder::new("sleeper");
    let std_import = builder.add_import("std");
    assert_eq!(std_import.0, 1);
    let sleep_sym = builder.add_symbol("sleep");
    assert_eq!(sleep_sym.0, 3);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadInt).i64(millis);
        w.op(CallMethod).u32(1);
        w.op(Pop);
        w.op(LoadInt).i64(42);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    builder.build().unwrap()
}

#[test]
fn sleep_suspends_and_resumes() {
    let mut ctx = test_context();
    let start = Instant::now();
    let result = run_exported(&mut ctx, &sleeper_module(50), "run").unwrap();
    assert_eq!(expect_int(result), 42);
    assert!(start.elapsed().as_millis() >= 50, "the coroutine must actually have slept");
}

#[test]
fn waiting_coroutine_has_async_frame_on_top() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);

    let module = scope.local(ctx.load_module(&sleeper_module(10_000)).unwrap());
    let sym = ctx.get_symbol("run");
    let entry = scope.local(module.get().exported_member(sym).unwrap());

    // Creates and schedules, but does not pump the event loop: the
    // coroutine runs until the sleep suspends it.
    let coro = scope.local(ctx.make_coroutine(entry.handle()).unwrap());
    assert_eq!(coro.get().state(), CoroutineState::Waiting);

    let stack = CoroutineStack::try_from_value(coro.get().stack()).expect("live stack");
    assert_eq!(stack.top_frame_kind(), tiro_runtime::FrameKind::Async);
}

#[test]
fn done_coroutine_drops_its_stack() {
    let mut ctx = test_context();
    let scope = Scope::new(&mut ctx);

    let mut builder = CompiledModuleBuilder::new("quick");
    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadInt).i64(7);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let compiled = builder.build().unwrap();

    let module = scope.local(ctx.load_module(&compiled).unwrap());
    let run_sym = ctx.get_symbol("run");
    let entry = scope.local(module.get().exported_member(run_sym).unwrap());

    let coro = scope.local(ctx.make_coroutine(entry.handle()).unwrap());
    assert_eq!(coro.get().state(), CoroutineState::Done);
    assert!(coro.get().stack().is_null());
    assert_eq!(expect_int(coro.get().result()), 7);
}

// An async native that completes during its initiating call: resumption is
// still deferred to the next scheduling pass.
fn immediate_echo(frame: NativeAsyncFrame<'_>) -> Result<(), RuntimeError> {
    let value = frame.arg(0).value();
    frame.complete(value);
    Ok(())
}

#[test]
fn immediately_completed_async_call_resumes_via_loop() {
    let mut ctx = test_context();

    {
        let scope = Scope::new(&mut ctx);
        let no_values = scope.local(Value::null());
        let mut native = ModuleBuilder::new(&mut ctx, "echoes");
        native.add_async_function(&mut ctx, "echo", 1, no_values.handle(), immediate_echo).unwrap();
        let module = scope.local(native.build(&mut ctx));
        assert!(ctx.add_module(module.handle()));
    }

    let mut builder = CompiledModuleBuilder::new("echo_user");
    let import = builder.add_import("echoes");
    assert_eq!(import.0, 1);
    let echo_sym = builder.add_symbol("echo");
    assert_eq!(echo_sym.0, 3);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadInt).i64(99);
        w.op(CallMethod).u32(1);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 99);
}

// Two coroutines launched through std.launch interleave through the FIFO
// ready queue; both must complete.
#[test]
fn launched_coroutines_complete() {
    let mut ctx = test_context();

    let mut builder = CompiledModuleBuilder::new("launcher");
    let std_import = builder.add_import("std");
    assert_eq!(std_import.0, 1);
    let launch_sym = builder.add_symbol("launch");
    assert_eq!(launch_sym.0, 3);

    // Member 4: worker returning a constant.
    let mut worker = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = worker.code();
        w.op(LoadInt).i64(11);
        w.op(Ret);
    }
    let worker = builder.add_function(worker.finish().unwrap());
    assert_eq!(worker.0, 4);

    let mut main = FunctionBuilder::new(FunctionKind::Normal, 0, 1);
    {
        let w = main.code();
        // coro = std.launch(worker)
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadModule).u32(4);
        w.op(CallMethod).u32(1);
        w.op(StoreLocal).u32(0);
        w.op(LoadInt).i64(5);
        w.op(Ret);
    }
    let main = builder.add_function(main.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, main);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 5);
}
