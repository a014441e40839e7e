//! Bytecode and module builders.
//!
//! [`BytecodeWriter`] emits instructions with big-endian operands and
//! supports forward jumps through labels that are patched when bound.
//! [`FunctionBuilder`] and [`CompiledModuleBuilder`] sit on top and produce
//! [`CompiledFunction`]/[`CompiledModule`] values. Compiler back ends and the
//! runtime's test suite both assemble modules through this interface.

use crate::module::{
    CompiledFunction, CompiledModule, FunctionId, FunctionKind, MemberId, ModuleError,
    ModuleMember,
};
use crate::opcode::Opcode;

/// A jump target within one function body.
///
/// Labels are created unbound, may be referenced by any number of jumps, and
/// must be bound to exactly one position before the function is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct LabelState {
    /// Bound byte offset, or `None` while unbound.
    position: Option<u32>,
    /// Offsets of 4-byte placeholders waiting for the bound position.
    patches: Vec<usize>,
}

/// Emits raw bytecode.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    code: Vec<u8>,
    labels: Vec<LabelState>,
}

impl BytecodeWriter {
    pub fn new() -> BytecodeWriter {
        BytecodeWriter::default()
    }

    /// Current byte offset, i.e. the position of the next emitted byte.
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.raw());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.code.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.code.extend_from_slice(&value.to_bits().to_be_bytes());
        self
    }

    pub fn make_label(&mut self) -> Label {
        self.labels.push(LabelState { position: None, patches: Vec::new() });
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let position = self.position();
        let state = &mut self.labels[label.0];
        debug_assert!(state.position.is_none(), "label bound twice");
        state.position = Some(position);
        for &patch in &state.patches {
            self.code[patch..patch + 4].copy_from_slice(&position.to_be_bytes());
        }
        state.patches.clear();
        self
    }

    /// Emits the 4-byte target of `label`, patching later if still unbound.
    pub fn label_ref(&mut self, label: Label) -> &mut Self {
        match self.labels[label.0].position {
            Some(position) => {
                self.u32(position);
            }
            None => {
                let patch = self.code.len();
                self.u32(0);
                self.labels[label.0].patches.push(patch);
            }
        }
        self
    }

    /// Consumes the writer, checking that no label is left unbound.
    pub fn finish(self) -> Result<Vec<u8>, ModuleError> {
        for state in &self.labels {
            if !state.patches.is_empty() {
                return Err(ModuleError::UnboundLabel);
            }
        }
        Ok(self.code)
    }
}

/// Builds a single compiled function.
#[derive(Debug)]
pub struct FunctionBuilder {
    kind: FunctionKind,
    name: Option<MemberId>,
    params: u32,
    locals: u32,
    writer: BytecodeWriter,
}

impl FunctionBuilder {
    pub fn new(kind: FunctionKind, params: u32, locals: u32) -> FunctionBuilder {
        FunctionBuilder { kind, name: None, params, locals, writer: BytecodeWriter::new() }
    }

    pub fn name(mut self, name: MemberId) -> FunctionBuilder {
        self.name = Some(name);
        self
    }

    pub fn code(&mut self) -> &mut BytecodeWriter {
        &mut self.writer
    }

    pub fn finish(self) -> Result<CompiledFunction, ModuleError> {
        Ok(CompiledFunction {
            kind: self.kind,
            name: self.name,
            params: self.params,
            locals: self.locals,
            code: self.writer.finish()?,
        })
    }
}

/// Builds a complete module.
#[derive(Debug)]
pub struct CompiledModuleBuilder {
    name: String,
    members: Vec<ModuleMember>,
    functions: Vec<CompiledFunction>,
    init: Option<MemberId>,
    exports: Vec<(MemberId, MemberId)>,
}

impl CompiledModuleBuilder {
    pub fn new(name: impl Into<String>) -> CompiledModuleBuilder {
        CompiledModuleBuilder {
            name: name.into(),
            members: Vec::new(),
            functions: Vec::new(),
            init: None,
            exports: Vec::new(),
        }
    }

    fn push_member(&mut self, member: ModuleMember) -> MemberId {
        let id = MemberId(self.members.len() as u32);
        self.members.push(member);
        id
    }

    pub fn add_integer(&mut self, value: i64) -> MemberId {
        self.push_member(ModuleMember::Integer(value))
    }

    pub fn add_float(&mut self, value: f64) -> MemberId {
        self.push_member(ModuleMember::Float(value))
    }

    pub fn add_string(&mut self, value: impl Into<String>) -> MemberId {
        self.push_member(ModuleMember::String(value.into()))
    }

    /// Adds a string member for `name` followed by a symbol member for it.
    pub fn add_symbol(&mut self, name: impl Into<String>) -> MemberId {
        let name = self.add_string(name);
        self.push_member(ModuleMember::Symbol { name })
    }

    pub fn add_import(&mut self, module_name: impl Into<String>) -> MemberId {
        let module_name = self.add_string(module_name);
        self.push_member(ModuleMember::Import { module_name })
    }

    pub fn add_variable(&mut self) -> MemberId {
        self.push_member(ModuleMember::Variable)
    }

    pub fn add_function(&mut self, function: CompiledFunction) -> MemberId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(function);
        self.push_member(ModuleMember::Function { id })
    }

    pub fn set_init(&mut self, member: MemberId) {
        self.init = Some(member);
    }

    pub fn export(&mut self, symbol: MemberId, value: MemberId) {
        self.exports.push((symbol, value));
    }

    pub fn build(self) -> Result<CompiledModule, ModuleError> {
        CompiledModule::new(self.name, self.members, self.functions, self.init, self.exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_big_endian_operands() {
        let mut writer = BytecodeWriter::new();
        writer.op(Opcode::LoadInt).i64(0x0102030405060708);
        let code = writer.finish().unwrap();
        assert_eq!(code, [Opcode::LoadInt.raw(), 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn forward_labels_are_patched() {
        let mut writer = BytecodeWriter::new();
        let end = writer.make_label();
        writer.op(Opcode::Jmp).label_ref(end);
        writer.op(Opcode::LoadNull);
        writer.bind(end);
        writer.op(Opcode::Ret);

        let code = writer.finish().unwrap();
        // Jump target is the offset of Ret (opcode + 4 operand bytes + LoadNull).
        assert_eq!(&code[1..5], &6u32.to_be_bytes());
        assert_eq!(code[6], Opcode::Ret.raw());
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut writer = BytecodeWriter::new();
        let label = writer.make_label();
        writer.op(Opcode::Jmp).label_ref(label);
        assert_eq!(writer.finish().unwrap_err(), ModuleError::UnboundLabel);
    }

    #[test]
    fn builder_assembles_a_module() {
        let mut builder = CompiledModuleBuilder::new("demo");
        let sym = builder.add_symbol("answer");
        let value = builder.add_integer(42);
        builder.export(sym, value);
        let module = builder.build().unwrap();

        assert_eq!(module.name(), "demo");
        assert_eq!(module.members().len(), 3);
        assert_eq!(module.exports(), &[(sym, value)]);
    }
}
