//! The object library.
//!
//! Each heap kind is a `#[repr(C)]` payload struct whose first field is the
//! object [`Header`](crate::heap::Header), plus a copyable wrapper type over
//! the tagged word. The per-kind byte size, child enumeration and finalizer
//! live in the dispatch functions at the bottom of this module: one big
//! match over the type tag, no per-object vtables.

pub mod arrays;
pub mod buffers;
pub mod classes;
pub mod coroutines;
pub mod functions;
pub mod hash_tables;
pub mod modules;
pub mod native;
pub mod primitives;
pub mod strings;
pub mod tuples;

use crate::context::Context;
use crate::value::{Value, ValueType};

/// Declares a copyable wrapper type over a heap value of one concrete kind.
macro_rules! heap_object {
    ($(#[$meta:meta])* $name:ident, $tag:ident, $data:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name(crate::value::Value);

        impl $name {
            #[inline]
            pub(crate) fn data(self) -> *mut $data {
                self.0.heap_ptr() as *mut $data
            }
        }

        impl crate::value::TypedValue for $name {
            fn is_instance(value: crate::value::Value) -> bool {
                value.type_of() == crate::value::ValueType::$tag
            }

            fn from_value_unchecked(value: crate::value::Value) -> Self {
                debug_assert!(Self::is_instance(value));
                $name(value)
            }

            fn value(self) -> crate::value::Value {
                self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}", self.0)
            }
        }
    };
}

pub(crate) use heap_object;

fn round_up_to_word(size: usize) -> usize {
    let align = align_of::<usize>();
    (size + align - 1) & !(align - 1)
}

/// Byte size of a varsize object with `extra` trailing payload bytes.
pub(crate) fn varsize_object<T>(extra: usize) -> usize {
    round_up_to_word(size_of::<T>() + extra)
}

/// Allocates a fixed-size object; the payload starts out zeroed.
pub(crate) fn alloc_fixed<T>(ctx: &mut Context, type_: ValueType) -> *mut T {
    ctx.allocate(type_, round_up_to_word(size_of::<T>())) as *mut T
}

/// Allocates an object with `extra` trailing payload bytes.
pub(crate) fn alloc_varsize<T>(ctx: &mut Context, type_: ValueType, extra: usize) -> *mut T {
    let size = size_of::<T>()
        .checked_add(extra)
        .unwrap_or_else(|| panic!("object size overflow"));
    ctx.allocate(type_, round_up_to_word(size)) as *mut T
}

/// True if values of this kind can hold outgoing references. Kinds without
/// references skip tracing entirely after being marked.
pub fn may_contain_references(type_: ValueType) -> bool {
    use ValueType::*;
    match type_ {
        Null | SmallInt | Undefined | Boolean | Integer | Float | String | Buffer | Code
        | NativeObject | NativePointer => false,

        StringBuilder | Symbol | Tuple | Array | ArrayStorage | HashTable | HashTableStorage
        | HashTableIterator | Module | FunctionTemplate | Environment | Function | BoundMethod
        | Method | NativeFunction | NativeAsyncFunction | DynamicObject | Coroutine
        | CoroutineStack => true,
    }
}

/// Byte size of a heap object, fixed or computed from its capacity fields.
pub(crate) fn object_size(value: Value) -> usize {
    use crate::value::TypedValue;
    use ValueType::*;

    let fixed = |size: usize| round_up_to_word(size);
    match value.type_of() {
        Null | SmallInt => 0,
        Undefined => fixed(size_of::<primitives::UndefinedData>()),
        Boolean => fixed(size_of::<primitives::BooleanData>()),
        Integer => fixed(size_of::<primitives::IntegerData>()),
        Float => fixed(size_of::<primitives::FloatData>()),
        String => strings::TiroString::from_value_unchecked(value).object_size(),
        StringBuilder => fixed(size_of::<strings::StringBuilderData>()),
        Symbol => fixed(size_of::<strings::SymbolData>()),
        Buffer => buffers::Buffer::from_value_unchecked(value).object_size(),
        Tuple => tuples::Tuple::from_value_unchecked(value).object_size(),
        Array => fixed(size_of::<arrays::ArrayData>()),
        ArrayStorage => arrays::ArrayStorage::from_value_unchecked(value).object_size(),
        HashTable => fixed(size_of::<hash_tables::HashTableData>()),
        HashTableStorage => {
            hash_tables::HashTableStorage::from_value_unchecked(value).object_size()
        }
        HashTableIterator => fixed(size_of::<hash_tables::HashTableIteratorData>()),
        Module => fixed(size_of::<modules::ModuleData>()),
        Code => functions::Code::from_value_unchecked(value).object_size(),
        FunctionTemplate => fixed(size_of::<functions::FunctionTemplateData>()),
        Environment => functions::Environment::from_value_unchecked(value).object_size(),
        Function => fixed(size_of::<functions::FunctionData>()),
        BoundMethod => fixed(size_of::<functions::BoundMethodData>()),
        Method => fixed(size_of::<classes::MethodData>()),
        NativeFunction => fixed(size_of::<native::NativeFunctionData>()),
        NativeAsyncFunction => fixed(size_of::<native::NativeAsyncFunctionData>()),
        DynamicObject => fixed(size_of::<classes::DynamicObjectData>()),
        Coroutine => fixed(size_of::<coroutines::CoroutineData>()),
        CoroutineStack => coroutines::CoroutineStack::from_value_unchecked(value).object_size(),
        NativeObject => native::NativeObject::from_value_unchecked(value).object_size(),
        NativePointer => fixed(size_of::<native::NativePointerData>()),
    }
}

/// Enumerates every outgoing reference of `value`.
pub(crate) fn trace(value: Value, visit: &mut dyn FnMut(Value)) {
    use crate::value::TypedValue;
    use ValueType::*;

    match value.type_of() {
        Null | SmallInt | Undefined | Boolean | Integer | Float | String | Buffer | Code
        | NativeObject | NativePointer => {}

        StringBuilder => strings::StringBuilder::from_value_unchecked(value).walk(visit),
        Symbol => strings::Symbol::from_value_unchecked(value).walk(visit),
        Tuple => tuples::Tuple::from_value_unchecked(value).walk(visit),
        Array => arrays::Array::from_value_unchecked(value).walk(visit),
        ArrayStorage => arrays::ArrayStorage::from_value_unchecked(value).walk(visit),
        HashTable => hash_tables::HashTable::from_value_unchecked(value).walk(visit),
        HashTableStorage => hash_tables::HashTableStorage::from_value_unchecked(value).walk(visit),
        HashTableIterator => {
            hash_tables::HashTableIterator::from_value_unchecked(value).walk(visit)
        }
        Module => modules::Module::from_value_unchecked(value).walk(visit),
        FunctionTemplate => functions::FunctionTemplate::from_value_unchecked(value).walk(visit),
        Environment => functions::Environment::from_value_unchecked(value).walk(visit),
        Function => functions::Function::from_value_unchecked(value).walk(visit),
        BoundMethod => functions::BoundMethod::from_value_unchecked(value).walk(visit),
        Method => classes::Method::from_value_unchecked(value).walk(visit),
        NativeFunction => native::NativeFunction::from_value_unchecked(value).walk(visit),
        NativeAsyncFunction => native::NativeAsyncFunction::from_value_unchecked(value).walk(visit),
        DynamicObject => classes::DynamicObject::from_value_unchecked(value).walk(visit),
        Coroutine => coroutines::Coroutine::from_value_unchecked(value).walk(visit),
        CoroutineStack => coroutines::CoroutineStack::from_value_unchecked(value).walk(visit),
    }
}

/// Runs the finalizer of `value`, if its kind has one.
pub(crate) fn finalize(value: Value) {
    use crate::value::TypedValue;
    if value.type_of() == ValueType::NativeObject {
        native::NativeObject::from_value_unchecked(value).finalize();
    }
}
