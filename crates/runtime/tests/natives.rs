//! The native function API: custom modules, closure values, bound methods.

mod common;

use common::{expect_int, run_exported, test_context};
use tiro_core::{CompiledModuleBuilder, FunctionBuilder, FunctionKind, Opcode::*};
use tiro_runtime::{
    BoundMethod, ModuleBuilder, NativeFrame, RuntimeError, Scope, Tuple, TypedValue, Value,
};

fn add_pair(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let a = tiro_runtime::math::extract_integer(frame.arg(0).value())?;
    let b = tiro_runtime::math::extract_integer(frame.arg(1).value())?;
    let sum = frame.ctx().get_integer(a + b);
    frame.result(sum);
    Ok(())
}

// Reads its closure tuple: returns values[0] plus the first argument.
fn add_bias(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let values = Tuple::try_from_value(frame.values()).expect("closure tuple");
    let bias = tiro_runtime::math::extract_integer(values.get(0))?;
    let argument = tiro_runtime::math::extract_integer(frame.arg(0).value())?;
    let sum = frame.ctx().get_integer(bias + argument);
    frame.result(sum);
    Ok(())
}

fn bind_first(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let function = frame.arg(0);
    let receiver = frame.arg(1);
    let bound = BoundMethod::make(frame.ctx(), function, receiver);
    frame.result(bound.value());
    Ok(())
}

fn install_native_module(ctx: &mut tiro_runtime::Context) {
    let scope = Scope::new(ctx);
    let no_values = scope.local(Value::null());

    let bias_values = {
        let tuple = scope.local(Tuple::make(ctx, 1));
        let hundred = ctx.get_integer(100);
        tuple.get().set(0, hundred);
        tuple
    };

    let mut builder = ModuleBuilder::new(ctx, "helpers");
    builder
        .add_function(ctx, "add_pair", 2, no_values.handle(), add_pair)
        .unwrap()
        .add_function(ctx, "add_bias", 1, bias_values.handle().erased(), add_bias)
        .unwrap()
        .add_function(ctx, "bind_first", 2, no_values.handle(), bind_first)
        .unwrap();
    let module = scope.local(builder.build(ctx));
    assert!(ctx.add_module(module.handle()));
}

#[test]
fn sync_native_function_receives_arguments() {
    let mut ctx = test_context();
    install_native_module(&mut ctx);

    let mut builder = CompiledModuleBuilder::new("native_user");
    let import = builder.add_import("helpers");
    assert_eq!(import.0, 1);
    let add_sym = builder.add_symbol("add_pair");
    assert_eq!(add_sym.0, 3);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadInt).i64(30);
        w.op(LoadInt).i64(12);
        w.op(CallMethod).u32(2);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 42);
}

#[test]
fn native_function_reads_closure_values() {
    let mut ctx = test_context();
    install_native_module(&mut ctx);

    let mut builder = CompiledModuleBuilder::new("bias_user");
    let import = builder.add_import("helpers");
    assert_eq!(import.0, 1);
    let bias_sym = builder.add_symbol("add_bias");
    assert_eq!(bias_sym.0, 3);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadInt).i64(7);
        w.op(CallMethod).u32(1);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 107);
}

// A bound method splices its receiver in front of the arguments when called.
#[test]
fn bound_method_passes_receiver_first() {
    let mut ctx = test_context();
    install_native_module(&mut ctx);

    let mut builder = CompiledModuleBuilder::new("bound_user");
    let import = builder.add_import("helpers");
    assert_eq!(import.0, 1);
    let bind_sym = builder.add_symbol("bind_first");
    assert_eq!(bind_sym.0, 3);

    // Member 4: identity(x) = x.
    let mut identity = FunctionBuilder::new(FunctionKind::Normal, 1, 0);
    {
        let w = identity.code();
        w.op(LoadParam).u32(0);
        w.op(Ret);
    }
    let identity = builder.add_function(identity.finish().unwrap());
    assert_eq!(identity.0, 4);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        // bound = helpers.bind_first(identity, 7); bound()
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(3);
        w.op(LoadModule).u32(4);
        w.op(LoadInt).i64(7);
        w.op(CallMethod).u32(2);
        w.op(Call).u32(0);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 7);
}

#[test]
fn calling_a_non_callable_is_fatal() {
    let mut ctx = test_context();

    let mut builder = CompiledModuleBuilder::new("not_callable");
    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadInt).i64(3);
        w.op(Call).u32(0);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.message(), "Cannot call object of type SmallInt as a function.");
}

#[test]
fn missing_module_member_is_fatal() {
    let mut ctx = test_context();

    let mut builder = CompiledModuleBuilder::new("missing_member");
    let std_import = builder.add_import("std");
    assert_eq!(std_import.0, 1);
    let nonsense = builder.add_symbol("does_not_exist");
    assert_eq!(nonsense.0, 3);

    let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0);
    {
        let w = func.code();
        w.op(LoadModule).u32(1);
        w.op(LoadMember).u32(3);
        w.op(Ret);
    }
    let func = builder.add_function(func.finish().unwrap());
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.message(), "Undefined symbol: 'does_not_exist'.");
}
