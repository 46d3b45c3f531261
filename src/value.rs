//! Typed value model.
//!
//! A [`Value`] holds exactly one of boolean, 64-bit integer, double precision real or
//! string. Coercion never mutates: [`Value::convert_to`] and the `as_*` readers return new
//! data and leave the source untouched, so a value shared by a variable and a stack slot
//! can be coerced freely.
//!
//! Operator dispatch is keyed on the left operand's variant. The right operand is read
//! through the matching `as_*` reader, so `"1" + 2` concatenates (string lhs) while
//! `1 + "2"` adds (integer lhs).

extern crate alloc;

use crate::error::{ExprError, NumericError, Result};
use crate::types::OpType;
use alloc::format;
use alloc::string::{String, ToString};
use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Relative tolerance for the `~=` operator on reals.
pub const APPROX_EPSILON: f64 = 1e-6;

bitflags! {
    /// Type mask for function argument declarations.
    ///
    /// Several bits at one position form a union of accepted types. `NUL` marks an
    /// optional argument that may be omitted at the call site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueType: u32 {
        const BOOLEAN = 1 << 0;
        const INTEGER = 1 << 1;
        const REAL    = 1 << 2;
        const STRING  = 1 << 3;
        const NUL     = 1 << 4;
        const ANY     = Self::BOOLEAN.bits() | Self::INTEGER.bits() | Self::REAL.bits() | Self::STRING.bits();
    }
}

/// A runtime value.
///
/// `Null` is not produced by any expression. It only stands in for an optional function
/// argument that the caller left out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Str(String),
    Null,
}

impl Value {
    pub fn boolean(b: bool) -> Self {
        Value::Boolean(b)
    }

    pub fn integer(i: i64) -> Self {
        Value::Integer(i)
    }

    pub fn real(r: f64) -> Self {
        Value::Real(r)
    }

    pub fn string(s: &str) -> Self {
        Value::Str(s.to_string())
    }

    /// The single type bit describing this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::BOOLEAN,
            Value::Integer(_) => ValueType::INTEGER,
            Value::Real(_) => ValueType::REAL,
            Value::Str(_) => ValueType::STRING,
            Value::Null => ValueType::NUL,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Null => "null",
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Value::Real(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Read as a boolean. Numbers are true when non-zero; strings must spell a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Real(r) => Some(*r != 0.0),
            Value::Str(s) => parse_boolean(s),
            Value::Null => None,
        }
    }

    /// Read as an integer. Reals truncate toward zero.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Integer(i) => Some(*i),
            Value::Real(r) => Some(*r as i64),
            Value::Str(s) => s.trim().parse::<i64>().ok(),
            Value::Null => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Str(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Text as the host prints it. Same as `Display`.
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }

    /// Convert to a type accepted by `mask`.
    ///
    /// Returns a clone when the value already satisfies the mask. Otherwise the first
    /// accepted type in boolean, integer, real, string order is tried.
    pub fn convert_to(&self, mask: ValueType) -> Option<Value> {
        if mask.intersects(self.value_type()) {
            return Some(self.clone());
        }

        if mask.contains(ValueType::BOOLEAN) {
            self.as_boolean().map(Value::Boolean)
        } else if mask.contains(ValueType::INTEGER) {
            self.as_integer().map(Value::Integer)
        } else if mask.contains(ValueType::REAL) {
            self.as_real().map(Value::Real)
        } else if mask.contains(ValueType::STRING) {
            self.as_string().map(Value::Str)
        } else {
            None
        }
    }

    /// Apply a unary operator.
    pub fn unary_op(&self, op: OpType) -> Result<Value> {
        match (self, op) {
            (Value::Boolean(b), OpType::LogicalNot) => Ok(Value::Boolean(!b)),
            (Value::Integer(i), OpType::UnaryPlus) => Ok(Value::Integer(*i)),
            (Value::Integer(i), OpType::UnaryMinus) => Ok(Value::Integer(i.wrapping_neg())),
            (Value::Integer(i), OpType::BitNot) => Ok(Value::Integer(!i)),
            (Value::Real(r), OpType::UnaryPlus) => Ok(Value::Real(*r)),
            (Value::Real(r), OpType::UnaryMinus) => Ok(Value::Real(-r)),
            _ => Err(unsupported(self, op)),
        }
    }

    /// Apply a binary operator with `self` as the left operand.
    pub fn binary_op(&self, rhs: &Value, op: OpType) -> Result<Value> {
        match self {
            Value::Boolean(l) => boolean_binary_op(*l, rhs, op),
            Value::Integer(l) => integer_binary_op(*l, rhs, op),
            Value::Real(l) => real_binary_op(*l, rhs, op),
            Value::Str(l) => string_binary_op(l, rhs, op),
            Value::Null => Err(unsupported(self, op)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) if r.is_nan() => f.write_str("NaN"),
            Value::Real(r) => write!(f, "{}", r),
            Value::Str(s) => f.write_str(s),
            Value::Null => f.write_str("<null>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Host types that convert into a [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl<T: Into<Value>> IntoValue for T {
    fn into_value(self) -> Value {
        self.into()
    }
}

/// Host types that can be read out of a [`Value`].
///
/// `TYPE_CHAR` is the argument signature letter for the type, so a host wrapper can
/// build a signature string from its parameter types.
pub trait FromValue: Sized {
    const TYPE_CHAR: char;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const TYPE_CHAR: char = 'b';

    fn from_value(value: &Value) -> Option<Self> {
        value.as_boolean()
    }
}

impl FromValue for i64 {
    const TYPE_CHAR: char = 'i';

    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer()
    }
}

impl FromValue for f64 {
    const TYPE_CHAR: char = 'r';

    fn from_value(value: &Value) -> Option<Self> {
        value.as_real()
    }
}

impl FromValue for String {
    const TYPE_CHAR: char = 's';

    fn from_value(value: &Value) -> Option<Self> {
        value.as_string()
    }
}

fn parse_boolean(s: &str) -> Option<bool> {
    let s = s.trim();
    for word in ["true", "yes", "on", "1"] {
        if s.eq_ignore_ascii_case(word) {
            return Some(true);
        }
    }
    for word in ["false", "no", "off", "0"] {
        if s.eq_ignore_ascii_case(word) {
            return Some(false);
        }
    }
    None
}

fn unsupported(value: &Value, op: OpType) -> ExprError {
    ExprError::InvalidValue(format!(
        "operator '{}' is not supported for {} values",
        op,
        value.type_name()
    ))
}

fn unreadable(rhs: &Value, wanted: &str) -> ExprError {
    ExprError::InvalidValue(format!("cannot read {} value as {}", rhs.type_name(), wanted))
}

fn boolean_binary_op(l: bool, rhs: &Value, op: OpType) -> Result<Value> {
    let r = rhs.as_boolean().ok_or_else(|| unreadable(rhs, "boolean"))?;

    match op {
        OpType::LogicalAnd => Ok(Value::Boolean(l && r)),
        OpType::LogicalOr => Ok(Value::Boolean(l || r)),
        OpType::Equal | OpType::ApproxEqual => Ok(Value::Boolean(l == r)),
        OpType::NotEqual => Ok(Value::Boolean(l != r)),
        _ => Err(unsupported(&Value::Boolean(l), op)),
    }
}

fn integer_binary_op(l: i64, rhs: &Value, op: OpType) -> Result<Value> {
    let r = rhs.as_integer().ok_or_else(|| unreadable(rhs, "integer"))?;

    let value = match op {
        OpType::Power => Value::Integer(integer_power(l, r)?),
        OpType::Times => Value::Integer(l.wrapping_mul(r)),
        OpType::Divide => {
            if r == 0 {
                return Err(NumericError::DivideByZero.into());
            }
            Value::Integer(l.wrapping_div(r))
        }
        OpType::Modulus => {
            if r == 0 {
                return Err(NumericError::DivideByZero.into());
            }
            Value::Integer(l.wrapping_rem(r))
        }
        OpType::Plus => Value::Integer(l.wrapping_add(r)),
        OpType::Minus => Value::Integer(l.wrapping_sub(r)),
        OpType::BitLShift | OpType::BitRShift => {
            let shift = u32::try_from(r)
                .ok()
                .filter(|s| *s < i64::BITS)
                .ok_or_else(|| ExprError::InvalidValue(format!("invalid shift amount {}", r)))?;
            if op == OpType::BitLShift {
                Value::Integer(l << shift)
            } else {
                Value::Integer(l >> shift)
            }
        }
        OpType::Less => Value::Boolean(l < r),
        OpType::LessEqual => Value::Boolean(l <= r),
        OpType::Greater => Value::Boolean(l > r),
        OpType::GreaterEqual => Value::Boolean(l >= r),
        OpType::Equal | OpType::ApproxEqual => Value::Boolean(l == r),
        OpType::NotEqual => Value::Boolean(l != r),
        OpType::BitAnd => Value::Integer(l & r),
        OpType::BitXor => Value::Integer(l ^ r),
        OpType::BitOr => Value::Integer(l | r),
        _ => return Err(unsupported(&Value::Integer(l), op)),
    };

    Ok(value)
}

fn real_binary_op(l: f64, rhs: &Value, op: OpType) -> Result<Value> {
    let r = rhs.as_real().ok_or_else(|| unreadable(rhs, "real"))?;

    let value = match op {
        OpType::Power => Value::Real(real_power(l, r)?),
        OpType::Times => Value::Real(l * r),
        OpType::Divide => Value::Real(l / r),
        OpType::Modulus => Value::Real(real_modulus(l, r)?),
        OpType::Plus => Value::Real(l + r),
        OpType::Minus => Value::Real(l - r),
        OpType::Less => Value::Boolean(l < r),
        OpType::LessEqual => Value::Boolean(l <= r),
        OpType::Greater => Value::Boolean(l > r),
        OpType::GreaterEqual => Value::Boolean(l >= r),
        OpType::Equal => Value::Boolean(l == r),
        OpType::NotEqual => Value::Boolean(l != r),
        OpType::ApproxEqual => Value::Boolean(approx_equal(l, r)),
        _ => return Err(unsupported(&Value::Real(l), op)),
    };

    Ok(value)
}

fn string_binary_op(l: &str, rhs: &Value, op: OpType) -> Result<Value> {
    let r = rhs.as_string().ok_or_else(|| unreadable(rhs, "string"))?;
    let r = r.as_str();

    let value = match op {
        OpType::Less => Value::Boolean(l < r),
        OpType::LessEqual => Value::Boolean(l <= r),
        OpType::Greater => Value::Boolean(l > r),
        OpType::GreaterEqual => Value::Boolean(l >= r),
        OpType::Equal => Value::Boolean(l == r),
        OpType::NotEqual => Value::Boolean(l != r),
        OpType::ApproxEqual => Value::Boolean(l.eq_ignore_ascii_case(r)),
        OpType::Plus => {
            let mut s = String::with_capacity(l.len() + r.len());
            s.push_str(l);
            s.push_str(r);
            Value::Str(s)
        }
        _ => return Err(ExprError::InvalidValue(format!(
            "operator '{}' is not supported for string values",
            op
        ))),
    };

    Ok(value)
}

fn approx_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = 1.0f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= APPROX_EPSILON * scale
}

/// Integer power with the exponent sign handled the way a real power then truncation
/// would: negative exponents only survive for bases of magnitude one.
pub fn integer_power(base: i64, exp: i64) -> Result<i64> {
    if base == 0 && exp < 0 {
        return Err(NumericError::ZeroToNegativePower.into());
    }

    if exp < 0 {
        return Ok(match base {
            1 => 1,
            -1 if exp % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        });
    }

    match base {
        0 => return Ok(if exp == 0 { 1 } else { 0 }),
        1 => return Ok(1),
        -1 => return Ok(if exp % 2 == 0 { 1 } else { -1 }),
        _ => {}
    }

    u32::try_from(exp)
        .ok()
        .and_then(|e| base.checked_pow(e))
        .ok_or(ExprError::Numeric(NumericError::RealTooBigForInteger))
}

/// Real power with explicit domain checks.
pub fn real_power(base: f64, exp: f64) -> Result<f64> {
    if base.is_nan() || exp.is_nan() {
        return Err(NumericError::NanOperation.into());
    }

    let is_int = (exp as i64) as f64 == exp;

    if base < 0.0 && !is_int {
        return Err(NumericError::NonIntegerPowerOfNegative.into());
    }

    if base == 0.0 && exp < 0.0 {
        return Err(NumericError::ZeroToNegativePower.into());
    }

    let result = if exp < 0.0 {
        1.0 / pow(base, -exp)
    } else {
        pow(base, exp)
    };

    if result.is_nan() && base.is_finite() && exp.is_finite() {
        return Err(NumericError::PowerFailed.into());
    }

    Ok(result)
}

/// Real remainder, `a - b * trunc(a / b)`.
pub fn real_modulus(a: f64, b: f64) -> Result<f64> {
    if a.is_nan() || b.is_nan() {
        return Err(NumericError::NanOperation.into());
    }

    if b == 0.0 {
        return Err(NumericError::DivideByZero.into());
    }

    let factor = (a / b) as i64;

    Ok(a - b * factor as f64)
}

/// Narrow a real to an integer, failing when the real is out of range.
pub fn real_to_integer(real: f64) -> Result<i64> {
    let integer = real as i64;

    if real.is_nan() || (integer as f64 - real).abs() >= 1.0 {
        return Err(NumericError::RealTooBigForInteger.into());
    }

    Ok(integer)
}

#[cfg(feature = "libm")]
fn pow(base: f64, exp: f64) -> f64 {
    libm::pow(base, exp)
}

#[cfg(not(feature = "libm"))]
fn pow(base: f64, exp: f64) -> f64 {
    // Without libm only integral exponents are computed.
    if (exp as i64) as f64 != exp {
        return f64::NAN;
    }
    let mut n = exp as i64;
    let mut b = base;
    let mut acc = 1.0;
    while n > 0 {
        if n & 1 == 1 {
            acc *= b;
        }
        b *= b;
        n >>= 1;
    }
    acc
}
