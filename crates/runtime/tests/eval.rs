//! End-to-end execution tests: modules are assembled through the tiro-core
//! builders and run to completion on a fresh context.

mod common;

use common::{expect_int, expect_string, run_exported, test_context};
use tiro_core::{
    CompiledFunction, CompiledModule, CompiledModuleBuilder, FunctionBuilder, FunctionKind,
    Opcode::*,
};
use tiro_runtime::{
    ErrorKind, HashTable, Scope, TiroString, TypedValue, Value, ValueType,
};

fn function(
    params: u32,
    locals: u32,
    build: impl FnOnce(&mut tiro_core::BytecodeWriter),
) -> CompiledFunction {
    let mut builder = FunctionBuilder::new(FunctionKind::Normal, params, locals);
    build(builder.code());
    builder.finish().expect("valid function")
}

fn closure_function(
    params: u32,
    locals: u32,
    build: impl FnOnce(&mut tiro_core::BytecodeWriter),
) -> CompiledFunction {
    let mut builder = FunctionBuilder::new(FunctionKind::Closure, params, locals);
    build(builder.code());
    builder.finish().expect("valid function")
}

#[test]
fn returns_constant_integer() {
    let mut builder = CompiledModuleBuilder::new("return_value");
    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadInt).i64(123);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("f");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "f").unwrap();
    assert_eq!(expect_int(result), 123);
}

#[test]
fn returns_float_constant() {
    let mut builder = CompiledModuleBuilder::new("return_float");
    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadFloat).f64(4.0);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("f");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "f").unwrap();
    assert_eq!(result.type_of(), ValueType::Float);
    assert_eq!(tiro_runtime::Float::try_from_value(result).unwrap().get(), 4.0);
}

// fib(i) = i <= 1 ? i : fib(i - 1) + fib(i - 2); run() = fib(20)
fn recursive_fib_module() -> CompiledModule {
    let mut builder = CompiledModuleBuilder::new("fib_recursive");

    // Member 0: fib itself (the code below refers to member 0).
    let fib = builder.add_function(function(1, 0, |w| {
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
    }));
    assert_eq!(fib.0, 0);

    let run = builder.add_function(function(0, 0, |w| {
        w.op(LoadModule).u32(0);
        w.op(LoadInt).i64(20);
        w.op(Call).u32(1);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, run);
    builder.build().unwrap()
}

#[test]
fn runs_recursive_fibonacci() {
    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &recursive_fib_module(), "run").unwrap();
    assert_eq!(expect_int(result), 6765);
}

// Iterative fibonacci with locals and a loop; run() = iter(80).
fn iterative_fib_module() -> CompiledModule {
    let mut builder = CompiledModuleBuilder::new("fib_iterative");

    // Locals: 0 = a, 1 = b, 2 = c.
    let iter = builder.add_function(function(1, 3, |w| {
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Lte);
        let loop_setup = w.make_label();
        w.op(JmpFalsePop).label_ref(loop_setup);
        w.op(LoadParam).u32(0);
        w.op(Ret);

        w.bind(loop_setup);
        w.op(LoadInt).i64(0);
        w.op(StoreLocal).u32(0);
        w.op(LoadInt).i64(1);
        w.op(StoreLocal).u32(1);

        let head = w.make_label();
        let done = w.make_label();
        w.bind(head);
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(2);
        w.op(Gte);
        w.op(JmpFalsePop).label_ref(done);

        w.op(LoadLocal).u32(0);
        w.op(LoadLocal).u32(1);
        w.op(Add);
        w.op(StoreLocal).u32(2);
        w.op(LoadLocal).u32(1);
        w.op(StoreLocal).u32(0);
        w.op(LoadLocal).u32(2);
        w.op(StoreLocal).u32(1);
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Sub);
        w.op(StoreParam).u32(0);
        w.op(Jmp).label_ref(head);

        w.bind(done);
        w.op(LoadLocal).u32(1);
        w.op(Ret);
    }));
    assert_eq!(iter.0, 0);

    let run = builder.add_function(function(0, 0, |w| {
        w.op(LoadModule).u32(0);
        w.op(LoadInt).i64(80);
        w.op(Call).u32(1);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, run);
    builder.build().unwrap()
}

#[test]
fn runs_iterative_fibonacci() {
    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &iterative_fib_module(), "run").unwrap();
    assert_eq!(expect_int(result), 23416728348467685);
}

#[test]
fn concatenates_adjacent_strings() {
    let mut builder = CompiledModuleBuilder::new("strings");
    let hello = builder.add_string("hello ");
    let world = builder.add_string("world");
    assert_eq!((hello.0, world.0), (0, 1));

    let func = builder.add_function(function(0, 0, |w| {
        w.op(MkBuilder);
        w.op(LoadModule).u32(0);
        w.op(BuilderAppend);
        w.op(LoadModule).u32(1);
        w.op(BuilderAppend);
        w.op(BuilderString);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("strings");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "strings").unwrap();
    assert_eq!(expect_string(result), "hello world");
}

// import std; const b = std.new_string_builder();
// b.append("Hello", " ", "Marko!"); b.to_str()
#[test]
fn builds_string_through_std_module() {
    let mut builder = CompiledModuleBuilder::new("greeter");
    let std_import = builder.add_import("std");
    assert_eq!(std_import.0, 1);
    let hello = builder.add_string("Hello");
    let space = builder.add_string(" ");
    let marko = builder.add_string("Marko!");
    assert_eq!((hello.0, space.0, marko.0), (2, 3, 4));
    let new_builder_sym = builder.add_symbol("new_string_builder");
    let append_sym = builder.add_symbol("append");
    let to_str_sym = builder.add_symbol("to_str");
    assert_eq!((new_builder_sym.0, append_sym.0, to_str_sym.0), (6, 8, 10));

    let greet = builder.add_function(function(0, 1, |w| {
        w.op(LoadModule).u32(1);
        w.op(LoadMethod).u32(6);
        w.op(CallMethod).u32(0);
        w.op(StoreLocal).u32(0);

        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(8);
        w.op(LoadModule).u32(2);
        w.op(LoadModule).u32(3);
        w.op(LoadModule).u32(4);
        w.op(CallMethod).u32(3);
        w.op(Pop);

        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(10);
        w.op(CallMethod).u32(0);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("greet");
    builder.export(sym, greet);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "greet").unwrap();
    assert_eq!(expect_string(result), "Hello Marko!");
}

// {"k": "v", "rm": null}; remove("rm"); set(1, true); set(null, false)
#[test]
fn map_literal_with_updates() {
    let mut builder = CompiledModuleBuilder::new("maps");
    let k = builder.add_string("k");
    let v = builder.add_string("v");
    let rm = builder.add_string("rm");
    assert_eq!((k.0, v.0, rm.0), (0, 1, 2));
    let remove_sym = builder.add_symbol("remove");
    let set_sym = builder.add_symbol("set");
    assert_eq!((remove_sym.0, set_sym.0), (4, 6));

    let func = builder.add_function(function(0, 1, |w| {
        w.op(LoadModule).u32(0);
        w.op(LoadModule).u32(1);
        w.op(LoadModule).u32(2);
        w.op(LoadNull);
        w.op(MkMap).u32(2);
        w.op(StoreLocal).u32(0);

        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(4);
        w.op(LoadModule).u32(2);
        w.op(CallMethod).u32(1);
        w.op(Pop);

        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(6);
        w.op(LoadInt).i64(1);
        w.op(LoadTrue);
        w.op(CallMethod).u32(2);
        w.op(Pop);

        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(6);
        w.op(LoadNull);
        w.op(LoadFalse);
        w.op(CallMethod).u32(2);
        w.op(Pop);

        w.op(LoadLocal).u32(0);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "run").unwrap();

    let scope = Scope::new(&mut ctx);
    let table = scope.local(HashTable::try_from_value(result).expect("hash table result"));
    assert_eq!(table.get().len(), 3);
    table.get().check_invariants();

    let k = scope.local(TiroString::make(&mut ctx, "k"));
    let found = table.get().get(k.value()).expect("'k' is present");
    assert_eq!(expect_string(found), "v");

    let one = ctx.get_integer(1);
    assert!(table.get().get(one).expect("1 is present").same(ctx.get_true()));
    assert!(table.get().get(Value::null()).expect("null is present").same(ctx.get_false()));

    let rm = scope.local(TiroString::make(&mut ctx, "rm"));
    assert!(!table.get().contains(rm.value()));
}

// assert(false, "${x} boom!") with x = "tick tick..."
#[test]
fn assertion_failure_carries_message() {
    let mut builder = CompiledModuleBuilder::new("asserts");
    let expr = builder.add_string("false");
    let tick = builder.add_string("tick tick...");
    let boom = builder.add_string(" boom!");
    assert_eq!((expr.0, tick.0, boom.0), (0, 1, 2));

    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadFalse);
        let end = w.make_label();
        w.op(JmpTruePop).label_ref(end);
        w.op(LoadModule).u32(0);
        w.op(MkBuilder);
        w.op(LoadModule).u32(1);
        w.op(BuilderAppend);
        w.op(LoadModule).u32(2);
        w.op(BuilderAppend);
        w.op(BuilderString);
        w.op(AssertFail);
        w.bind(end);
        w.op(LoadNull);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssertionFailure);
    assert_eq!(err.message(), "Assertion `false` failed: tick tick... boom!");
    assert!(err.message().contains("tick tick... boom!"));
}

// Closures created inside a loop capture one fresh environment per
// iteration; the captured values must stay distinct.
#[test]
fn loop_closures_capture_fresh_environments() {
    let mut builder = CompiledModuleBuilder::new("closures");

    // Member 0: the closure template (paired with its environment by
    // MkClosure at run time).
    let template = builder.add_function(closure_function(0, 0, |w| {
        w.op(LoadClosure);
        w.op(LoadContext).u32(0).u32(0);
        w.op(Ret);
    }));
    assert_eq!(template.0, 0);

    // Locals: 0 = closures array, 1 = i, 2 = scratch.
    let outer = builder.add_function(function(0, 3, |w| {
        w.op(MkArray).u32(0);
        w.op(StoreLocal).u32(0);
        w.op(LoadInt).i64(0);
        w.op(StoreLocal).u32(1);

        let head = w.make_label();
        let done = w.make_label();
        w.bind(head);
        w.op(LoadLocal).u32(1);
        w.op(LoadInt).i64(3);
        w.op(Lt);
        w.op(JmpFalsePop).label_ref(done);

        // env = new Environment(1, parent: null); env[0] = i
        w.op(LoadNull);
        w.op(MkContext).u32(1);
        w.op(Dup);
        w.op(LoadLocal).u32(1);
        w.op(Rot2);
        w.op(StoreContext).u32(0).u32(0);

        // closures.push(Function(template, env))
        w.op(LoadModule).u32(0);
        w.op(Rot2);
        w.op(MkClosure);
        w.op(StoreLocal).u32(2);
        w.op(LoadLocal).u32(0);
        w.op(LoadMethod).u32(3);
        w.op(LoadLocal).u32(2);
        w.op(CallMethod).u32(1);
        w.op(Pop);

        w.op(LoadLocal).u32(1);
        w.op(LoadInt).i64(1);
        w.op(Add);
        w.op(StoreLocal).u32(1);
        w.op(Jmp).label_ref(head);

        w.bind(done);
        // closures[0]() * 100 + closures[1]() * 10 + closures[2]()
        w.op(LoadLocal).u32(0);
        w.op(LoadInt).i64(0);
        w.op(LoadIndex);
        w.op(Call).u32(0);
        w.op(LoadInt).i64(100);
        w.op(Mul);
        w.op(LoadLocal).u32(0);
        w.op(LoadInt).i64(1);
        w.op(LoadIndex);
        w.op(Call).u32(0);
        w.op(LoadInt).i64(10);
        w.op(Mul);
        w.op(Add);
        w.op(LoadLocal).u32(0);
        w.op(LoadInt).i64(2);
        w.op(LoadIndex);
        w.op(Call).u32(0);
        w.op(Add);
        w.op(Ret);
    }));
    assert_eq!(outer.0, 1);

    let push_sym = builder.add_symbol("push");
    assert_eq!(push_sym.0, 3);
    let run_sym = builder.add_symbol("run");
    builder.export(run_sym, outer);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 12);
}

#[test]
fn arithmetic_overflow_is_fatal() {
    let mut builder = CompiledModuleBuilder::new("overflow");
    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadInt).i64(i64::MAX);
        w.op(LoadInt).i64(1);
        w.op(Add);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
    assert_eq!(err.message(), "Integer overflow in addition.");
}

#[test]
fn division_by_zero_is_fatal() {
    let mut builder = CompiledModuleBuilder::new("div_zero");
    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadInt).i64(7);
        w.op(LoadInt).i64(0);
        w.op(Div);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.message(), "Integer division by zero.");
}

#[test]
fn reading_uninitialized_local_is_fatal() {
    let mut builder = CompiledModuleBuilder::new("undef_local");
    let func = builder.add_function(function(0, 1, |w| {
        w.op(LoadLocal).u32(0);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedValue);
}

#[test]
fn calling_with_wrong_arity_is_fatal() {
    let mut builder = CompiledModuleBuilder::new("arity");
    let callee = builder.add_function(function(2, 0, |w| {
        w.op(LoadParam).u32(0);
        w.op(Ret);
    }));
    assert_eq!(callee.0, 0);
    let func = builder.add_function(function(0, 0, |w| {
        w.op(LoadModule).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Call).u32(1);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let err = run_exported(&mut ctx, &module, "run").unwrap_err();
    assert_eq!(err.message(), "Invalid number of function arguments (need 2, but have 1).");
}

#[test]
fn deep_recursion_grows_the_stack() {
    // count(n) = n == 0 ? 0 : count(n - 1) + 1, deep enough to outgrow the
    // 512-byte initial stack arena several times.
    let mut builder = CompiledModuleBuilder::new("deep");
    let count = builder.add_function(function(1, 0, |w| {
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(0);
        w.op(Eq);
        let recurse = w.make_label();
        w.op(JmpFalsePop).label_ref(recurse);
        w.op(LoadInt).i64(0);
        w.op(Ret);
        w.bind(recurse);
        w.op(LoadModule).u32(0);
        w.op(LoadParam).u32(0);
        w.op(LoadInt).i64(1);
        w.op(Sub);
        w.op(Call).u32(1);
        w.op(LoadInt).i64(1);
        w.op(Add);
        w.op(Ret);
    }));
    assert_eq!(count.0, 0);
    let run = builder.add_function(function(0, 0, |w| {
        w.op(LoadModule).u32(0);
        w.op(LoadInt).i64(5000);
        w.op(Call).u32(1);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, run);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 5000);
}

#[test]
fn bitwise_operations() {
    let mut builder = CompiledModuleBuilder::new("bits");
    let func = builder.add_function(function(0, 0, |w| {
        // ((0b1100 & 0b1010) | 0b0001) ^ 0b1111 == 0b0110
        w.op(LoadInt).i64(0b1100);
        w.op(LoadInt).i64(0b1010);
        w.op(BAnd);
        w.op(LoadInt).i64(0b0001);
        w.op(BOr);
        w.op(LoadInt).i64(0b1111);
        w.op(BXor);
        // << 2 then >> 1
        w.op(LoadInt).i64(2);
        w.op(LSh);
        w.op(LoadInt).i64(1);
        w.op(RSh);
        w.op(Ret);
    }));
    let sym = builder.add_symbol("run");
    builder.export(sym, func);
    let module = builder.build().unwrap();

    let mut ctx = test_context();
    let result = run_exported(&mut ctx, &module, "run").unwrap();
    assert_eq!(expect_int(result), 0b0110 << 1);
}
