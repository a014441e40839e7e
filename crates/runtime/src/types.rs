//! Type-directed operations: indexing, members, method lookup.
//!
//! Everything here dispatches on the concrete type tag of the receiver — one
//! big match, no per-object indirection. Types with methods (hash tables,
//! builders, buffers, arrays, tuples, strings, coroutines) each get a method
//! table, a symbol-keyed hash table of [`Method`] wrappers populated at
//! context startup. Modules and dynamic objects route method lookup through
//! their member protocol instead.

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::{Handle, Scope};
use crate::math::try_extract_integer;
use crate::objects::arrays::Array;
use crate::objects::buffers::Buffer;
use crate::objects::classes::{DynamicObject, Method};
use crate::objects::coroutines::Coroutine;
use crate::objects::hash_tables::HashTable;
use crate::objects::modules::Module;
use crate::objects::native::{NativeFrame, NativeFunction, NativeFunctionPtr};
use crate::objects::strings::{StringBuilder, Symbol, TiroString};
use crate::objects::tuples::Tuple;
use crate::value::{TypedValue, Value, ValueType};

/// Per-type method tables.
pub struct TypeSystem {
    // (type tag, HashTable<Symbol, Method>) pairs; the handful of entries
    // makes a linear scan the fastest lookup.
    classes: Vec<(ValueType, Value)>,
}

impl TypeSystem {
    pub(crate) fn new() -> TypeSystem {
        TypeSystem { classes: Vec::new() }
    }

    pub(crate) fn class_of(&self, type_: ValueType) -> Option<Value> {
        self.classes.iter().find(|(t, _)| *t == type_).map(|(_, table)| *table)
    }

    pub(crate) fn walk(&self, visit: &mut dyn FnMut(Value)) {
        for (_, table) in &self.classes {
            visit(*table);
        }
    }
}

/// Builds all method tables. Called once while the context boots.
pub(crate) fn init(ctx: &mut Context) {
    let entries: &[(ValueType, &[(&str, u32, NativeFunctionPtr)])] = &[
        (
            ValueType::HashTable,
            &[
                ("set", 3, hash_table_set),
                ("contains", 2, hash_table_contains),
                ("remove", 2, hash_table_remove),
                ("size", 1, hash_table_size),
                ("keys", 1, hash_table_keys),
                ("values", 1, hash_table_values),
            ],
        ),
        (
            ValueType::StringBuilder,
            &[
                ("append", 2, string_builder_append),
                ("append_byte", 2, string_builder_append_byte),
                ("clear", 1, string_builder_clear),
                ("to_str", 1, string_builder_to_str),
                ("size", 1, string_builder_size),
            ],
        ),
        (ValueType::Buffer, &[("size", 1, buffer_size)]),
        (
            ValueType::Array,
            &[("push", 2, array_push), ("pop", 1, array_pop), ("size", 1, array_size)],
        ),
        (ValueType::Tuple, &[("size", 1, tuple_size)]),
        (ValueType::String, &[("size", 1, string_size)]),
        (ValueType::Coroutine, &[("name", 1, coroutine_name)]),
    ];

    for (type_, methods) in entries {
        let table = build_class(ctx, methods);
        ctx.types_mut().classes.push((*type_, table));
    }
}

fn build_class(ctx: &mut Context, methods: &[(&str, u32, NativeFunctionPtr)]) -> Value {
    let scope = Scope::new(ctx);
    let table = scope.local(HashTable::make(ctx));

    for &(name, params, func) in methods {
        let symbol = scope.local(ctx.get_symbol(name));
        let func_name = scope.local(symbol.get().name());
        let no_values = scope.local(Value::null());
        let function = scope.local(
            NativeFunction::make(ctx, func_name.handle(), no_values.handle(), params, func).value(),
        );
        let method = scope.local(Method::make(ctx, function.handle()).value());
        HashTable::set(table.handle(), ctx, symbol.handle().erased(), method.handle());
    }

    table.value()
}

fn index_in_bounds(raw: i64, len: usize, what: &str) -> Result<usize, RuntimeError> {
    if raw >= 0 && (raw as u64) < len as u64 {
        Ok(raw as usize)
    } else {
        Err(RuntimeError::type_mismatch(format!(
            "Invalid index {raw} into {what} of size {len}."
        )))
    }
}

fn integer_index(index: Value, what: &str) -> Result<i64, RuntimeError> {
    try_extract_integer(index)
        .ok_or_else(|| RuntimeError::type_mismatch(format!("{what} index must be an integer.")))
}

/// `object[index]`.
pub(crate) fn load_index(
    ctx: &mut Context,
    object: Handle<Value>,
    index: Handle<Value>,
) -> Result<Value, RuntimeError> {
    match object.value().type_of() {
        ValueType::Array => {
            let array = Array::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Array")?;
            let at = index_in_bounds(raw, array.len(), "array")?;
            Ok(array.get(at))
        }
        ValueType::Tuple => {
            let tuple = Tuple::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Tuple")?;
            let at = index_in_bounds(raw, tuple.len(), "tuple")?;
            Ok(tuple.get(at))
        }
        ValueType::Buffer => {
            let buffer = Buffer::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Buffer")?;
            let at = index_in_bounds(raw, buffer.len(), "buffer")?;
            Ok(ctx.get_integer(buffer.get(at) as i64))
        }
        ValueType::HashTable => {
            let table = HashTable::from_value_unchecked(object.value());
            Ok(table.get(index.value()).unwrap_or(Value::null()))
        }
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Loading an index is not supported for objects of type {type_}."
        ))),
    }
}

/// `object[index] = value`.
pub(crate) fn store_index(
    ctx: &mut Context,
    object: Handle<Value>,
    index: Handle<Value>,
    value: Handle<Value>,
) -> Result<(), RuntimeError> {
    match object.value().type_of() {
        ValueType::Array => {
            let array = Array::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Array")?;
            let at = index_in_bounds(raw, array.len(), "array")?;
            array.set(at, value.value());
            Ok(())
        }
        ValueType::Tuple => {
            let tuple = Tuple::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Tuple")?;
            let at = index_in_bounds(raw, tuple.len(), "tuple")?;
            tuple.set(at, value.value());
            Ok(())
        }
        ValueType::Buffer => {
            let buffer = Buffer::from_value_unchecked(object.value());
            let raw = integer_index(index.value(), "Buffer")?;
            let at = index_in_bounds(raw, buffer.len(), "buffer")?;
            let byte = match try_extract_integer(value.value()) {
                Some(b @ 0..=255) => b as u8,
                _ => {
                    return Err(RuntimeError::type_mismatch(
                        "Buffer value must be a valid byte (integers 0 through 255).",
                    ));
                }
            };
            buffer.set(at, byte);
            Ok(())
        }
        ValueType::HashTable => {
            let table = object.cast::<HashTable>();
            HashTable::set(table, ctx, index, value);
            Ok(())
        }
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Storing an index is not supported for objects of type {type_}."
        ))),
    }
}

/// `object.member`.
pub(crate) fn load_member(
    _ctx: &mut Context,
    object: Handle<Value>,
    member: Handle<Symbol>,
) -> Result<Value, RuntimeError> {
    match object.value().type_of() {
        ValueType::Module => {
            let module = Module::from_value_unchecked(object.value());
            module.exported_member(member.get()).ok_or_else(|| {
                RuntimeError::missing_symbol(format!(
                    "Undefined symbol: '{}'.",
                    member.get().name().as_str()
                ))
            })
        }
        ValueType::DynamicObject => {
            let object = DynamicObject::from_value_unchecked(object.value());
            Ok(object.get(member.get()))
        }
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Failed to load property '{}' on value of type {type_}.",
            member.get().name().as_str()
        ))),
    }
}

/// `object.member = value`.
pub(crate) fn store_member(
    ctx: &mut Context,
    object: Handle<Value>,
    member: Handle<Symbol>,
    value: Handle<Value>,
) -> Result<(), RuntimeError> {
    match object.value().type_of() {
        ValueType::Module => Err(RuntimeError::type_mismatch(format!(
            "Failed to store property '{}': modules cannot be modified.",
            member.get().name().as_str()
        ))),
        ValueType::DynamicObject => {
            DynamicObject::set(object.cast(), ctx, member, value);
            Ok(())
        }
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Failed to store property '{}' on value of type {type_}.",
            member.get().name().as_str()
        ))),
    }
}

/// Attribute lookup for the LoadMethod/CallMethod pair. Returns a [`Method`]
/// for receivers with a method table, a plain member value for modules and
/// dynamic objects, or `None` when nothing is found.
pub(crate) fn load_method(
    ctx: &mut Context,
    object: Handle<Value>,
    member: Handle<Symbol>,
) -> Result<Option<Value>, RuntimeError> {
    match object.value().type_of() {
        ValueType::Module | ValueType::DynamicObject => {
            load_member(ctx, object, member).map(Some)
        }
        type_ => {
            let Some(class) = ctx.types().class_of(type_) else {
                return Ok(None);
            };
            let class = HashTable::from_value_unchecked(class);
            Ok(class.get(member.value()))
        }
    }
}

// ---- native method implementations -------------------------------------

fn check_instance<T: TypedValue>(frame: &NativeFrame<'_>) -> Result<Handle<T>, RuntimeError> {
    let this = frame.arg(0);
    if this.value().is::<T>() {
        Ok(this.cast())
    } else {
        Err(RuntimeError::type_mismatch(format!(
            "`this` is of unexpected type {}.",
            this.value().type_of()
        )))
    }
}

fn hash_table_set(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<HashTable>(frame)?;
    let key = frame.arg(1);
    let value = frame.arg(2);
    HashTable::set(this, frame.ctx(), key, value);
    Ok(())
}

fn hash_table_contains(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<HashTable>(frame)?;
    let contains = this.get().contains(frame.arg(1).value());
    let result = frame.ctx().get_boolean(contains);
    frame.result(result);
    Ok(())
}

fn hash_table_remove(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<HashTable>(frame)?;
    this.get().remove(frame.arg(1).value());
    Ok(())
}

fn hash_table_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<HashTable>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn hash_table_keys(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    collect_table_parts(frame, |key, _| key)
}

fn hash_table_values(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    collect_table_parts(frame, |_, value| value)
}

fn collect_table_parts(
    frame: &mut NativeFrame<'_>,
    pick: fn(Value, Value) -> Value,
) -> Result<(), RuntimeError> {
    let this = check_instance::<HashTable>(frame)?;
    let ctx = frame.ctx();

    let scope = Scope::new(ctx);
    let array = scope.local(Array::make(ctx));
    let mut cursor = 0;
    loop {
        let entries = this.get().entries_for_iteration();
        let Some((key, value)) = HashTable::iterate_storage(entries, &mut cursor) else {
            break;
        };
        let picked = scope.local(pick(key, value));
        Array::push(array.handle(), ctx, picked.handle());
    }

    frame.result(array.value());
    Ok(())
}

fn string_builder_append(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<StringBuilder>(frame)?;
    for index in 1..frame.arg_count() {
        let arg = frame.arg(index);
        match arg.value().type_of() {
            ValueType::String => {
                StringBuilder::append_string(this, frame.ctx(), arg.cast());
            }
            ValueType::StringBuilder => {
                StringBuilder::append_builder(this, frame.ctx(), arg.cast());
            }
            type_ => {
                return Err(RuntimeError::type_mismatch(format!(
                    "Cannot append values of type {type_}."
                )));
            }
        }
    }
    Ok(())
}

fn string_builder_append_byte(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<StringBuilder>(frame)?;
    let byte = match try_extract_integer(frame.arg(1).value()) {
        Some(b @ 0..=255) => b as u8,
        _ => {
            return Err(RuntimeError::type_mismatch(
                "Expected a byte argument (between 0 and 255).",
            ));
        }
    };
    StringBuilder::append_bytes(this, frame.ctx(), &[byte]);
    Ok(())
}

fn string_builder_clear(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<StringBuilder>(frame)?;
    this.get().clear();
    Ok(())
}

fn string_builder_to_str(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<StringBuilder>(frame)?;
    let string = StringBuilder::make_string(this, frame.ctx());
    frame.result(string.value());
    Ok(())
}

fn string_builder_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<StringBuilder>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn buffer_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Buffer>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn array_push(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Array>(frame)?;
    let value = frame.arg(1);
    Array::push(this, frame.ctx(), value);
    Ok(())
}

fn array_pop(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Array>(frame)?;
    frame.result(this.get().pop());
    Ok(())
}

fn array_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Array>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn tuple_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Tuple>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn string_size(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<TiroString>(frame)?;
    let size = this.get().len() as i64;
    let result = frame.ctx().get_integer(size);
    frame.result(result);
    Ok(())
}

fn coroutine_name(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let this = check_instance::<Coroutine>(frame)?;
    frame.result(this.get().name().value());
    Ok(())
}
