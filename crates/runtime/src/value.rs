//! Tagged value representation.
//!
//! A [`Value`] is one machine word. Three encodings exist:
//!
//! ```text
//! Null:           the all-zero word
//! Small integer:  low bit 1, remaining bits hold a signed integer
//! Heap pointer:   low bit 0, non-zero, points at an object header
//! ```
//!
//! Heap objects begin with a [`Header`](crate::heap::Header) carrying the
//! concrete [`ValueType`] and a flag byte; everything after the header is the
//! per-kind payload described in `objects/`.

use crate::hash::{float_hash, integer_hash};
use crate::heap::Header;
use crate::objects::coroutines::Coroutine;
use crate::objects::functions::Function;
use crate::objects::primitives::{Boolean, Float, Integer, SmallInt};
use crate::objects::strings::{Symbol, TiroString};

/// Number of bits available to an embedded small integer (including sign).
pub const EMBEDDED_INTEGER_BITS: u32 = usize::BITS - 1;

/// The concrete kind of a value.
///
/// `Null` and `SmallInt` are immediate encodings; all other kinds are heap
/// objects and appear as header tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null = 0,
    SmallInt,
    Undefined,
    Boolean,
    Integer,
    Float,
    String,
    StringBuilder,
    Symbol,
    Buffer,
    Tuple,
    Array,
    ArrayStorage,
    HashTable,
    HashTableStorage,
    HashTableIterator,
    Module,
    Code,
    FunctionTemplate,
    Environment,
    Function,
    BoundMethod,
    Method,
    NativeFunction,
    NativeAsyncFunction,
    DynamicObject,
    Coroutine,
    CoroutineStack,
    NativeObject,
    NativePointer,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        use ValueType::*;
        match self {
            Null => "Null",
            SmallInt => "SmallInt",
            Undefined => "Undefined",
            Boolean => "Boolean",
            Integer => "Integer",
            Float => "Float",
            String => "String",
            StringBuilder => "StringBuilder",
            Symbol => "Symbol",
            Buffer => "Buffer",
            Tuple => "Tuple",
            Array => "Array",
            ArrayStorage => "ArrayStorage",
            HashTable => "HashTable",
            HashTableStorage => "HashTableStorage",
            HashTableIterator => "HashTableIterator",
            Module => "Module",
            Code => "Code",
            FunctionTemplate => "FunctionTemplate",
            Environment => "Environment",
            Function => "Function",
            BoundMethod => "BoundMethod",
            Method => "Method",
            NativeFunction => "NativeFunction",
            NativeAsyncFunction => "NativeAsyncFunction",
            DynamicObject => "DynamicObject",
            Coroutine => "Coroutine",
            CoroutineStack => "CoroutineStack",
            NativeObject => "NativeObject",
            NativePointer => "NativePointer",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A machine-word-sized tagged reference.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Value(usize);

impl Value {
    /// The null value (the all-zero word).
    #[inline]
    pub const fn null() -> Value {
        Value(0)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Encodes a small integer. The value must be in
    /// [`SmallInt::MIN`]..=[`SmallInt::MAX`].
    #[inline]
    pub(crate) fn from_embedded_integer(value: i64) -> Value {
        debug_assert!(SmallInt::fits(value), "value out of small integer range");
        Value(((value as isize) << 1) as usize | 1)
    }

    #[inline]
    pub fn is_embedded_integer(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub(crate) fn embedded_integer(self) -> i64 {
        debug_assert!(self.is_embedded_integer());
        ((self.0 as isize) >> 1) as i64
    }

    #[inline]
    pub fn is_heap_ptr(self) -> bool {
        !self.is_null() && !self.is_embedded_integer()
    }

    #[inline]
    pub(crate) fn from_heap(header: *mut Header) -> Value {
        debug_assert!(!header.is_null());
        debug_assert_eq!(header as usize & 1, 0, "heap pointers are word aligned");
        Value(header as usize)
    }

    #[inline]
    pub(crate) fn heap_ptr(self) -> *mut Header {
        debug_assert!(self.is_heap_ptr());
        self.0 as *mut Header
    }

    /// The concrete type of this value.
    #[inline]
    pub fn type_of(self) -> ValueType {
        if self.is_null() {
            ValueType::Null
        } else if self.is_embedded_integer() {
            ValueType::SmallInt
        } else {
            unsafe { (*self.heap_ptr()).type_ }
        }
    }

    /// Bit identity.
    #[inline]
    pub fn same(self, other: Value) -> bool {
        self.0 == other.0
    }

    pub fn is<T: TypedValue>(self) -> bool {
        T::is_instance(self)
    }

    /// Raw word, used for pointer hashing.
    #[inline]
    pub(crate) fn raw(self) -> usize {
        self.0
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_of() {
            ValueType::Null => write!(f, "null"),
            ValueType::SmallInt => write!(f, "SmallInt({})", self.embedded_integer()),
            type_ => write!(f, "{}@{:#x}", type_, self.0),
        }
    }
}

/// A typed view over a [`Value`].
///
/// Implementations are thin wrappers around the raw word; converting is free.
/// `from_value_unchecked` must only be applied to values for which
/// `is_instance` holds.
pub trait TypedValue: Copy {
    fn is_instance(value: Value) -> bool;

    fn from_value_unchecked(value: Value) -> Self;

    fn value(self) -> Value;

    fn try_from_value(value: Value) -> Option<Self> {
        if Self::is_instance(value) { Some(Self::from_value_unchecked(value)) } else { None }
    }
}

impl TypedValue for Value {
    fn is_instance(_value: Value) -> bool {
        true
    }

    fn from_value_unchecked(value: Value) -> Self {
        value
    }

    fn value(self) -> Value {
        self
    }
}

fn numeric_value(value: Value) -> Option<f64> {
    match value.type_of() {
        ValueType::SmallInt => Some(value.embedded_integer() as f64),
        ValueType::Integer => Some(Integer::from_value_unchecked(value).get() as f64),
        ValueType::Float => Some(Float::from_value_unchecked(value).get()),
        _ => None,
    }
}

/// Value equality.
///
/// Numeric kinds compare across representations, strings compare by content
/// (pointer equality suffices when both are interned), symbols compare by
/// pointer, everything else by reference.
pub fn equal(a: Value, b: Value) -> bool {
    let ta = a.type_of();
    let tb = b.type_of();

    match ta {
        ValueType::Null => tb == ValueType::Null,
        ValueType::Undefined => tb == ValueType::Undefined,
        ValueType::Boolean => {
            tb == ValueType::Boolean
                && Boolean::from_value_unchecked(a).get() == Boolean::from_value_unchecked(b).get()
        }
        ValueType::SmallInt | ValueType::Integer | ValueType::Float => {
            // Integer/integer comparisons must not go through f64 (precision).
            match (crate::math::try_extract_integer(a), crate::math::try_extract_integer(b)) {
                (Some(x), Some(y)) => x == y,
                _ => match (numeric_value(a), numeric_value(b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            }
        }
        ValueType::String => {
            tb == ValueType::String
                && TiroString::from_value_unchecked(a).equal(TiroString::from_value_unchecked(b))
        }
        ValueType::Symbol => a.same(b),
        _ => a.same(b),
    }
}

/// Hash of a value, consistent with [`equal`].
pub fn hash(value: Value) -> usize {
    match value.type_of() {
        ValueType::Null | ValueType::Undefined => 0,
        ValueType::Boolean => {
            if Boolean::from_value_unchecked(value).get() {
                1
            } else {
                0
            }
        }
        ValueType::SmallInt => integer_hash(value.embedded_integer() as u64),
        ValueType::Integer => integer_hash(Integer::from_value_unchecked(value).get() as u64),
        ValueType::Float => float_hash(Float::from_value_unchecked(value).get()),
        ValueType::String => TiroString::from_value_unchecked(value).hash(),
        // Reference types hash over their address. Safe because the
        // collector never moves objects.
        _ => integer_hash(value.raw() as u64),
    }
}

/// Appends the display form of `value` to a string builder. Strings append
/// their raw contents; everything else appends what [`format_value`] yields.
pub fn append_value_to_builder(
    ctx: &mut crate::context::Context,
    builder: crate::handles::Handle<crate::objects::strings::StringBuilder>,
    value: crate::handles::Handle<Value>,
) {
    use crate::objects::strings::StringBuilder;

    if value.value().is::<TiroString>() {
        StringBuilder::append_string(builder, ctx, value.cast());
        return;
    }
    let text = format_value(value.value());
    StringBuilder::append_str(builder, ctx, &text);
}

/// Renders a value for diagnostics and `print`-style output.
pub fn format_value(value: Value) -> String {
    match value.type_of() {
        ValueType::Null => "null".to_string(),
        ValueType::Undefined => "undefined".to_string(),
        ValueType::Boolean => {
            if Boolean::from_value_unchecked(value).get() { "true" } else { "false" }.to_string()
        }
        ValueType::SmallInt => value.embedded_integer().to_string(),
        ValueType::Integer => Integer::from_value_unchecked(value).get().to_string(),
        ValueType::Float => Float::from_value_unchecked(value).get().to_string(),
        ValueType::String => TiroString::from_value_unchecked(value).as_str().to_string(),
        ValueType::Symbol => {
            format!("#{}", Symbol::from_value_unchecked(value).name().as_str())
        }
        ValueType::Coroutine => {
            format!("Coroutine({})", Coroutine::from_value_unchecked(value).name().as_str())
        }
        ValueType::Function => {
            format!("Function({})", Function::from_value_unchecked(value).template().name().as_str())
        }
        type_ => format!("{}@{:#x}", type_, value.raw()),
    }
}

