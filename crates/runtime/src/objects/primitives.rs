//! Primitive values: undefined, booleans, integers, floats.
//!
//! `Undefined` marks uninitialized storage (locals, closure slots, module
//! variables). It must never escape to user code; observing it is a fatal
//! runtime error raised at the access site. Booleans and undefined are
//! singletons per context.

use crate::context::Context;
use crate::heap::Header;
use crate::objects::{alloc_fixed, heap_object};
use crate::value::{TypedValue, Value, ValueType, EMBEDDED_INTEGER_BITS};

#[repr(C)]
pub struct UndefinedData {
    header: Header,
}

heap_object!(
    /// The sentinel for uninitialized storage. One instance per context.
    Undefined,
    Undefined,
    UndefinedData
);

impl Undefined {
    pub fn make(ctx: &mut Context) -> Undefined {
        let data = alloc_fixed::<UndefinedData>(ctx, ValueType::Undefined);
        Undefined(Value::from_heap(data as *mut Header))
    }
}

#[repr(C)]
pub struct BooleanData {
    header: Header,
    value: bool,
}

heap_object!(
    /// `true` or `false`. Two instances per context.
    Boolean,
    Boolean,
    BooleanData
);

impl Boolean {
    pub fn make(ctx: &mut Context, value: bool) -> Boolean {
        let data = alloc_fixed::<BooleanData>(ctx, ValueType::Boolean);
        unsafe { (*data).value = value };
        Boolean(Value::from_heap(data as *mut Header))
    }

    pub fn get(self) -> bool {
        unsafe { (*self.data()).value }
    }
}

#[repr(C)]
pub struct IntegerData {
    header: Header,
    value: i64,
}

heap_object!(
    /// A heap-allocated 64-bit integer. Only used when the value does not
    /// fit into the embedded small-integer encoding.
    Integer,
    Integer,
    IntegerData
);

impl Integer {
    pub fn make(ctx: &mut Context, value: i64) -> Integer {
        let data = alloc_fixed::<IntegerData>(ctx, ValueType::Integer);
        unsafe { (*data).value = value };
        Integer(Value::from_heap(data as *mut Header))
    }

    pub fn get(self) -> i64 {
        unsafe { (*self.data()).value }
    }
}

#[repr(C)]
pub struct FloatData {
    header: Header,
    value: f64,
}

heap_object!(
    /// A heap-allocated IEEE-754 double.
    Float,
    Float,
    FloatData
);

impl Float {
    pub fn make(ctx: &mut Context, value: f64) -> Float {
        let data = alloc_fixed::<FloatData>(ctx, ValueType::Float);
        unsafe { (*data).value = value };
        Float(Value::from_heap(data as *mut Header))
    }

    pub fn get(self) -> f64 {
        unsafe { (*self.data()).value }
    }
}

/// An integer embedded directly in the value word.
#[derive(Clone, Copy)]
pub struct SmallInt(Value);

impl SmallInt {
    pub const MAX: i64 = (1i64 << (EMBEDDED_INTEGER_BITS - 1)) - 1;
    pub const MIN: i64 = -(1i64 << (EMBEDDED_INTEGER_BITS - 1));

    pub fn fits(value: i64) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }

    /// Encodes `value`, which must be within [`SmallInt::MIN`]..=[`SmallInt::MAX`].
    pub fn make(value: i64) -> SmallInt {
        assert!(Self::fits(value), "value out of small integer range");
        SmallInt(Value::from_embedded_integer(value))
    }

    pub fn get(self) -> i64 {
        self.0.embedded_integer()
    }
}

impl TypedValue for SmallInt {
    fn is_instance(value: Value) -> bool {
        value.is_embedded_integer()
    }

    fn from_value_unchecked(value: Value) -> Self {
        debug_assert!(Self::is_instance(value));
        SmallInt(value)
    }

    fn value(self) -> Value {
        self.0
    }
}

impl std::fmt::Debug for SmallInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SmallInt({})", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integer_bounds_round_trip() {
        for value in [SmallInt::MIN, SmallInt::MIN + 1, -1, 0, 1, SmallInt::MAX - 1, SmallInt::MAX]
        {
            let small = SmallInt::make(value);
            assert_eq!(small.get(), value);
            assert!(small.value().is_embedded_integer());
        }
    }

    #[test]
    fn out_of_range_values_do_not_fit() {
        assert!(!SmallInt::fits(SmallInt::MAX + 1));
        assert!(!SmallInt::fits(SmallInt::MIN - 1));
        assert!(SmallInt::fits(0));
    }

    #[test]
    fn small_integer_is_not_null() {
        // Zero encodes as 0b1, never as the null word.
        assert!(!SmallInt::make(0).value().is_null());
    }
}
