//! Binary wire format for compiled modules.
//!
//! The format is deliberately plain: a fixed magic, a version, then the
//! module sections in order (name, members, functions, init, exports). All
//! integers are big-endian, matching the operand encoding inside bytecode.
//!
//! ```text
//! magic        "TIRO"              4 bytes
//! version      u32                 currently 1
//! name         u32 length + bytes  UTF-8
//! members      u32 count, then per member: u8 tag + payload
//! functions    u32 count, then per function:
//!                u8 kind, u8 has_name (+ u32 name), u32 params,
//!                u32 locals, u32 code length + code bytes
//! init         u8 flag (+ u32 member)
//! exports      u32 count, then u32 symbol member + u32 value member
//! ```

use crate::module::{
    CompiledFunction, CompiledModule, FunctionId, FunctionKind, MemberId, ModuleError,
    ModuleMember,
};

const MAGIC: &[u8; 4] = b"TIRO";
const VERSION: u32 = 1;

const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_SYMBOL: u8 = 4;
const TAG_IMPORT: u8 = 5;
const TAG_VARIABLE: u8 = 6;
const TAG_FUNCTION: u8 = 7;

const KIND_NORMAL: u8 = 0;
const KIND_CLOSURE: u8 = 1;

/// Serializes a module into the pinned binary format.
pub fn encode_module(module: &CompiledModule) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);

    write_bytes(&mut out, module.name().as_bytes());

    write_u32(&mut out, module.members().len() as u32);
    for member in module.members() {
        match member {
            ModuleMember::Integer(value) => {
                out.push(TAG_INTEGER);
                out.extend_from_slice(&value.to_be_bytes());
            }
            ModuleMember::Float(value) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&value.to_bits().to_be_bytes());
            }
            ModuleMember::String(value) => {
                out.push(TAG_STRING);
                write_bytes(&mut out, value.as_bytes());
            }
            ModuleMember::Symbol { name } => {
                out.push(TAG_SYMBOL);
                write_u32(&mut out, name.0);
            }
            ModuleMember::Import { module_name } => {
                out.push(TAG_IMPORT);
                write_u32(&mut out, module_name.0);
            }
            ModuleMember::Variable => out.push(TAG_VARIABLE),
            ModuleMember::Function { id } => {
                out.push(TAG_FUNCTION);
                write_u32(&mut out, id.0);
            }
        }
    }

    write_u32(&mut out, module.functions().len() as u32);
    for function in module.functions() {
        out.push(match function.kind {
            FunctionKind::Normal => KIND_NORMAL,
            FunctionKind::Closure => KIND_CLOSURE,
        });
        match function.name {
            Some(name) => {
                out.push(1);
                write_u32(&mut out, name.0);
            }
            None => out.push(0),
        }
        write_u32(&mut out, function.params);
        write_u32(&mut out, function.locals);
        write_bytes(&mut out, &function.code);
    }

    match module.init() {
        Some(init) => {
            out.push(1);
            write_u32(&mut out, init.0);
        }
        None => out.push(0),
    }

    write_u32(&mut out, module.exports().len() as u32);
    for &(symbol, value) in module.exports() {
        write_u32(&mut out, symbol.0);
        write_u32(&mut out, value.0);
    }

    out
}

/// Parses and validates a module from the pinned binary format.
pub fn decode_module(data: &[u8]) -> Result<CompiledModule, ModuleError> {
    let mut cursor = Cursor { data, pos: 0 };

    let magic = cursor.bytes(4)?;
    if magic != MAGIC {
        return Err(invalid("bad magic"));
    }
    let version = cursor.u32()?;
    if version != VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }

    let name = cursor.string()?;

    let member_count = cursor.u32()? as usize;
    if member_count > crate::module::MAX_MODULE_MEMBERS {
        return Err(ModuleError::TooManyMembers { count: member_count });
    }
    let mut members = Vec::with_capacity(member_count);
    for _ in 0..member_count {
        let member = match cursor.u8()? {
            TAG_INTEGER => ModuleMember::Integer(cursor.u64()? as i64),
            TAG_FLOAT => ModuleMember::Float(f64::from_bits(cursor.u64()?)),
            TAG_STRING => ModuleMember::String(cursor.string()?),
            TAG_SYMBOL => ModuleMember::Symbol { name: MemberId(cursor.u32()?) },
            TAG_IMPORT => ModuleMember::Import { module_name: MemberId(cursor.u32()?) },
            TAG_VARIABLE => ModuleMember::Variable,
            TAG_FUNCTION => ModuleMember::Function { id: FunctionId(cursor.u32()?) },
            tag => return Err(invalid(format!("unknown member tag {tag}"))),
        };
        members.push(member);
    }

    let function_count = cursor.u32()? as usize;
    let mut functions = Vec::with_capacity(function_count);
    for _ in 0..function_count {
        let kind = match cursor.u8()? {
            KIND_NORMAL => FunctionKind::Normal,
            KIND_CLOSURE => FunctionKind::Closure,
            kind => return Err(invalid(format!("unknown function kind {kind}"))),
        };
        let name = match cursor.u8()? {
            0 => None,
            1 => Some(MemberId(cursor.u32()?)),
            flag => return Err(invalid(format!("bad name flag {flag}"))),
        };
        let params = cursor.u32()?;
        let locals = cursor.u32()?;
        let code_len = cursor.u32()? as usize;
        let code = cursor.bytes(code_len)?.to_vec();
        functions.push(CompiledFunction { kind, name, params, locals, code });
    }

    let init = match cursor.u8()? {
        0 => None,
        1 => Some(MemberId(cursor.u32()?)),
        flag => return Err(invalid(format!("bad init flag {flag}"))),
    };

    let export_count = cursor.u32()? as usize;
    let mut exports = Vec::with_capacity(export_count);
    for _ in 0..export_count {
        let symbol = MemberId(cursor.u32()?);
        let value = MemberId(cursor.u32()?);
        exports.push((symbol, value));
    }

    if cursor.pos != data.len() {
        return Err(invalid("trailing data after module"));
    }

    CompiledModule::new(name, members, functions, init, exports)
}

fn invalid(message: impl Into<String>) -> ModuleError {
    ModuleError::InvalidFormat(message.into())
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, count: usize) -> Result<&'a [u8], ModuleError> {
        if self.data.len() - self.pos < count {
            return Err(invalid("unexpected end of data"));
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ModuleError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ModuleError> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, ModuleError> {
        let bytes = self.bytes(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn string(&mut self) -> Result<String, ModuleError> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("invalid UTF-8 string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;
    use crate::writer::{CompiledModuleBuilder, FunctionBuilder};

    fn sample_module() -> CompiledModule {
        let mut builder = CompiledModuleBuilder::new("sample");
        let name = builder.add_string("answer");
        let mut func = FunctionBuilder::new(FunctionKind::Normal, 0, 0).name(name);
        func.code().op(Opcode::LoadInt).i64(42);
        func.code().op(Opcode::Ret);
        let func = builder.add_function(func.finish().unwrap());
        let sym = builder.add_symbol("answer");
        builder.export(sym, func);
        builder.build().unwrap()
    }

    #[test]
    fn round_trip() {
        let module = sample_module();
        let encoded = encode_module(&module);
        let decoded = decode_module(&encoded).unwrap();
        assert_eq!(module, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode_module(&sample_module());
        encoded[0] = b'X';
        assert!(matches!(decode_module(&encoded), Err(ModuleError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_truncated_data() {
        let encoded = encode_module(&sample_module());
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(decode_module(truncated), Err(ModuleError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_trailing_data() {
        let mut encoded = encode_module(&sample_module());
        encoded.push(0);
        assert!(matches!(decode_module(&encoded), Err(ModuleError::InvalidFormat(_))));
    }
}
