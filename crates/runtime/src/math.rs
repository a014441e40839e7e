//! Arithmetic over runtime values.
//!
//! Integer arithmetic is checked: overflow, division by zero and `MIN / -1`
//! are fatal errors. Mixing an integer with a float widens to float. Integer
//! power with a negative exponent only succeeds for bases 1 and -1.

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::Handle;
use crate::objects::primitives::Float;
use crate::value::{TypedValue, Value, ValueType};

/// Extracts an integer from either integer representation.
pub fn try_extract_integer(value: Value) -> Option<i64> {
    match value.type_of() {
        ValueType::SmallInt => Some(value.embedded_integer()),
        ValueType::Integer => {
            Some(crate::objects::primitives::Integer::from_value_unchecked(value).get())
        }
        _ => None,
    }
}

pub fn extract_integer(value: Value) -> Result<i64, RuntimeError> {
    try_extract_integer(value).ok_or_else(|| {
        RuntimeError::type_mismatch(format!(
            "Value of type {} is not an integer.",
            value.type_of()
        ))
    })
}

/// Extracts a non-negative integer usable as a size.
pub fn extract_size(value: Value) -> Result<usize, RuntimeError> {
    match try_extract_integer(value) {
        Some(i) if i >= 0 => Ok(i as usize),
        _ => Err(RuntimeError::type_mismatch("The given value is not a valid size.")),
    }
}

/// Converts any numeric value to a float.
pub fn try_convert_float(value: Value) -> Option<f64> {
    match value.type_of() {
        ValueType::SmallInt => Some(value.embedded_integer() as f64),
        ValueType::Integer => {
            Some(crate::objects::primitives::Integer::from_value_unchecked(value).get() as f64)
        }
        ValueType::Float => Some(Float::from_value_unchecked(value).get()),
        _ => None,
    }
}

pub fn convert_float(value: Value) -> Result<f64, RuntimeError> {
    try_convert_float(value).ok_or_else(|| {
        RuntimeError::type_mismatch(format!(
            "Cannot convert value of type {} to float.",
            value.type_of()
        ))
    })
}

fn is_float(value: Value) -> bool {
    value.type_of() == ValueType::Float
}

fn binary_op(
    ctx: &mut Context,
    left: Handle<Value>,
    right: Handle<Value>,
    int_op: impl FnOnce(i64, i64) -> Result<i64, RuntimeError>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    if is_float(left.value()) || is_float(right.value()) {
        let a = convert_float(left.value())?;
        let b = convert_float(right.value())?;
        return Ok(Float::make(ctx, float_op(a, b)).value());
    }

    let a = extract_integer(left.value())?;
    let b = extract_integer(right.value())?;
    Ok(ctx.get_integer(int_op(a, b)?))
}

pub fn add(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(
        ctx,
        a,
        b,
        |x, y| x.checked_add(y).ok_or_else(|| RuntimeError::arithmetic("Integer overflow in addition.")),
        |x, y| x + y,
    )
}

pub fn sub(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(
        ctx,
        a,
        b,
        |x, y| {
            x.checked_sub(y)
                .ok_or_else(|| RuntimeError::arithmetic("Integer overflow in subtraction."))
        },
        |x, y| x - y,
    )
}

pub fn mul(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(
        ctx,
        a,
        b,
        |x, y| {
            x.checked_mul(y)
                .ok_or_else(|| RuntimeError::arithmetic("Integer overflow in multiplication."))
        },
        |x, y| x * y,
    )
}

pub fn div(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(
        ctx,
        a,
        b,
        |x, y| {
            if y == 0 {
                return Err(RuntimeError::arithmetic("Integer division by zero."));
            }
            if x == i64::MIN && y == -1 {
                return Err(RuntimeError::arithmetic("Integer overflow in division."));
            }
            Ok(x / y)
        },
        |x, y| x / y,
    )
}

pub fn modulo(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(
        ctx,
        a,
        b,
        |x, y| {
            if y == 0 {
                return Err(RuntimeError::arithmetic("Integer modulus by zero."));
            }
            if x == i64::MIN && y == -1 {
                return Err(RuntimeError::arithmetic("Integer overflow in modulus."));
            }
            Ok(x % y)
        },
        |x, y| x % y,
    )
}

pub fn pow(ctx: &mut Context, a: Handle<Value>, b: Handle<Value>) -> Result<Value, RuntimeError> {
    binary_op(ctx, a, b, int_pow, f64::powf)
}

// Exponentiation by squaring. Negative exponents are only defined for the
// unit bases (1 and -1, where the result stays exact).
fn int_pow(mut base: i64, mut exp: i64) -> Result<i64, RuntimeError> {
    if exp < 0 {
        return match base {
            1 => Ok(1),
            -1 => Ok(if exp & 1 == 0 { 1 } else { -1 }),
            _ => Err(RuntimeError::arithmetic("Cannot raise this base to a negative power.")),
        };
    }

    let overflow = || RuntimeError::arithmetic("Integer overflow in pow.");
    let mut result: i64 = 1;
    loop {
        if exp & 1 != 0 {
            result = result.checked_mul(base).ok_or_else(overflow)?;
        }
        exp >>= 1;
        if exp == 0 {
            break;
        }
        base = base.checked_mul(base).ok_or_else(overflow)?;
    }
    Ok(result)
}

pub fn unary_plus(value: Handle<Value>) -> Result<Value, RuntimeError> {
    match value.value().type_of() {
        ValueType::SmallInt | ValueType::Integer | ValueType::Float => Ok(value.value()),
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Invalid operand type for unary plus: {type_}."
        ))),
    }
}

pub fn unary_minus(ctx: &mut Context, value: Handle<Value>) -> Result<Value, RuntimeError> {
    match value.value().type_of() {
        ValueType::SmallInt | ValueType::Integer => {
            let v = extract_integer(value.value())?;
            if v == i64::MIN {
                return Err(RuntimeError::arithmetic("Integer overflow in unary minus."));
            }
            Ok(ctx.get_integer(-v))
        }
        ValueType::Float => {
            let v = Float::from_value_unchecked(value.value()).get();
            Ok(Float::make(ctx, -v).value())
        }
        type_ => Err(RuntimeError::type_mismatch(format!(
            "Invalid operand type for unary minus: {type_}."
        ))),
    }
}

pub fn bitwise_not(ctx: &mut Context, value: Handle<Value>) -> Result<Value, RuntimeError> {
    let v = extract_integer(value.value())?;
    Ok(ctx.get_integer(!v))
}

fn shift_amount(value: i64) -> Result<u32, RuntimeError> {
    if (0..64).contains(&value) {
        Ok(value as u32)
    } else {
        Err(RuntimeError::arithmetic("Shift amount must be in the range [0, 63]."))
    }
}

pub fn left_shift(
    ctx: &mut Context,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Value, RuntimeError> {
    let x = extract_integer(a.value())?;
    let shift = shift_amount(extract_integer(b.value())?)?;
    Ok(ctx.get_integer(((x as u64) << shift) as i64))
}

pub fn right_shift(
    ctx: &mut Context,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Value, RuntimeError> {
    let x = extract_integer(a.value())?;
    let shift = shift_amount(extract_integer(b.value())?)?;
    Ok(ctx.get_integer(x >> shift))
}

pub fn bitwise_and(
    ctx: &mut Context,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Value, RuntimeError> {
    let x = extract_integer(a.value())?;
    let y = extract_integer(b.value())?;
    Ok(ctx.get_integer(x & y))
}

pub fn bitwise_or(
    ctx: &mut Context,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Value, RuntimeError> {
    let x = extract_integer(a.value())?;
    let y = extract_integer(b.value())?;
    Ok(ctx.get_integer(x | y))
}

pub fn bitwise_xor(
    ctx: &mut Context,
    a: Handle<Value>,
    b: Handle<Value>,
) -> Result<Value, RuntimeError> {
    let x = extract_integer(a.value())?;
    let y = extract_integer(b.value())?;
    Ok(ctx.get_integer(x ^ y))
}

/// Three-way numeric comparison; null sorts before everything.
pub fn compare(a: Value, b: Value) -> Result<std::cmp::Ordering, RuntimeError> {
    use std::cmp::Ordering;

    if a.is_null() {
        return Ok(if b.is_null() { Ordering::Equal } else { Ordering::Less });
    }
    if b.is_null() {
        return Ok(Ordering::Greater);
    }

    // Integer/integer comparisons stay exact; mixed comparisons go through
    // f64.
    if let (Some(x), Some(y)) = (try_extract_integer(a), try_extract_integer(b)) {
        return Ok(x.cmp(&y));
    }

    match (try_convert_float(a), try_convert_float(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
            RuntimeError::arithmetic("Comparisons involving NaN are not ordered.")
        }),
        _ => Err(RuntimeError::type_mismatch(format!(
            "Comparisons are not defined for types {} and {}.",
            a.type_of(),
            b.type_of()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_pow_squares() {
        assert_eq!(int_pow(2, 10).unwrap(), 1024);
        assert_eq!(int_pow(3, 0).unwrap(), 1);
        assert_eq!(int_pow(0, 0).unwrap(), 1);
        assert_eq!(int_pow(-2, 3).unwrap(), -8);
    }

    #[test]
    fn int_pow_negative_exponents() {
        assert_eq!(int_pow(1, -5).unwrap(), 1);
        assert_eq!(int_pow(-1, -3).unwrap(), -1);
        assert_eq!(int_pow(-1, -4).unwrap(), 1);
        assert!(int_pow(0, -1).is_err());
        assert!(int_pow(2, -1).is_err());
    }

    #[test]
    fn int_pow_overflow() {
        assert!(int_pow(2, 63).is_err());
        assert_eq!(int_pow(2, 62).unwrap(), 1 << 62);
    }

    #[test]
    fn shift_amounts_are_validated() {
        assert!(shift_amount(0).is_ok());
        assert!(shift_amount(63).is_ok());
        assert!(shift_amount(64).is_err());
        assert!(shift_amount(-1).is_err());
    }
}
