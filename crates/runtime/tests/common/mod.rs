//! Shared helpers for the integration tests: a context wrapper plus small
//! bytecode assembly utilities on top of the tiro-core builders.
#![allow(dead_code)]

use tiro_core::CompiledModule;
use tiro_runtime::{Context, Module, RuntimeError, Scope, TypedValue, Value};

pub fn test_context() -> Context {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut ctx = Context::new();
    ctx.load_std_module().expect("std module loads");
    ctx
}

pub fn load(ctx: &mut Context, compiled: &CompiledModule) -> Module {
    let scope = Scope::new(ctx);
    let module = scope.local(ctx.load_module(compiled).expect("module loads"));
    assert!(ctx.add_module(module.handle()), "module name not taken");
    module.get()
}

/// Loads `compiled` and runs its export `name` to completion.
pub fn run_exported(
    ctx: &mut Context,
    compiled: &CompiledModule,
    name: &str,
) -> Result<Value, RuntimeError> {
    let scope = Scope::new(ctx);
    let module = scope.local(ctx.load_module(compiled)?);
    let symbol = ctx.get_symbol(name);
    let entry = scope
        .local(module.get().exported_member(symbol).unwrap_or_else(|| {
            panic!("module has no export named {name}")
        }));
    ctx.run(entry.handle())
}

pub fn expect_int(value: Value) -> i64 {
    tiro_runtime::math::extract_integer(value).expect("integer result")
}

pub fn expect_string(value: Value) -> String {
    tiro_runtime::TiroString::try_from_value(value).expect("string result").as_str().to_string()
}
