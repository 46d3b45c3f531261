//! Numeric edge cases: power domain checks, division and modulus by zero, NaN,
//! integer wrapping and shift limits.


use expr_vm::{ExprError, NumericError, Value, assert_approx_eq};
use test_helpers::{create_test_context, eval, eval_err, eval_real};

#[test]
fn test_integer_power() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "2 ** 10"), Value::Integer(1024));
    assert_eq!(eval(&mut ctx, "(-2) ** 3"), Value::Integer(-8));
    assert_eq!(eval(&mut ctx, "5 ** 0"), Value::Integer(1));
    assert_eq!(eval(&mut ctx, "2 ** -1"), Value::Integer(0));
    assert_eq!(eval(&mut ctx, "(-1) ** -3"), Value::Integer(-1));
    assert_eq!(
        eval_err(&mut ctx, "0 ** -1"),
        ExprError::Numeric(NumericError::ZeroToNegativePower)
    );
    assert!(matches!(
        eval_err(&mut ctx, "2 ** 63"),
        ExprError::Numeric(_)
    ));
}

#[cfg(feature = "libm")]
#[test]
fn test_real_power() {
    let mut ctx = create_test_context();
    assert_approx_eq!(eval_real(&mut ctx, "2.0 ** 0.5"), core::f64::consts::SQRT_2);
    assert_approx_eq!(eval_real(&mut ctx, "2 ** -1.0"), 0.5);
    assert_approx_eq!(eval_real(&mut ctx, "(-2.0) ** 2"), 4.0);
    assert_eq!(
        eval_err(&mut ctx, "(-8.0) ** 0.5"),
        ExprError::Numeric(NumericError::NonIntegerPowerOfNegative)
    );
    assert_eq!(
        eval_err(&mut ctx, "0.0 ** -2"),
        ExprError::Numeric(NumericError::ZeroToNegativePower)
    );
}

#[test]
fn test_division() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "7 / 2"), Value::Integer(3));
    assert_eq!(eval(&mut ctx, "-7 / 2"), Value::Integer(-3));
    assert_eq!(eval(&mut ctx, "7.0 / 2"), Value::Real(3.5));

    let inf = eval_real(&mut ctx, "5 / 0");
    assert!(inf.is_infinite() && inf > 0.0);
    let neg_inf = eval_real(&mut ctx, "-5 / 0");
    assert!(neg_inf.is_infinite() && neg_inf < 0.0);
    assert!(eval_real(&mut ctx, "0 / 0").is_nan());
}

#[test]
fn test_modulus() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "-7 % 3"), Value::Integer(-1));
    assert_approx_eq!(eval_real(&mut ctx, "7.5 % 2"), 1.5);
    assert_approx_eq!(eval_real(&mut ctx, "-7.5 % 2"), -1.5);
    assert_eq!(
        eval_err(&mut ctx, "7 % 0"),
        ExprError::Numeric(NumericError::DivideByZero)
    );
    assert_eq!(
        eval_err(&mut ctx, "7.5 % 0"),
        ExprError::Numeric(NumericError::DivideByZero)
    );
}

#[test]
fn test_nan_operands() {
    let mut ctx = create_test_context();
    ctx.create_real_variable("nan", f64::NAN).unwrap();

    assert_eq!(
        eval_err(&mut ctx, "nan ** 2"),
        ExprError::Numeric(NumericError::NanOperation)
    );
    assert_eq!(
        eval_err(&mut ctx, "nan % 2"),
        ExprError::Numeric(NumericError::NanOperation)
    );
    assert_eq!(eval(&mut ctx, "nan == nan"), Value::Boolean(false));
    assert!(eval_real(&mut ctx, "nan + 1").is_nan());
}

#[test]
fn test_integer_wrapping() {
    let mut ctx = create_test_context();
    assert_eq!(
        eval(&mut ctx, "9223372036854775807 + 1"),
        Value::Integer(i64::MIN)
    );
    assert_eq!(eval(&mut ctx, "4611686018427387904 * 4"), Value::Integer(0));
    assert_eq!(
        eval(&mut ctx, "x = 9223372036854775807, -x - 2"),
        Value::Integer(i64::MAX)
    );
}

#[test]
fn test_oversized_literal_becomes_real() {
    let mut ctx = create_test_context();
    assert_eq!(
        eval(&mut ctx, "9223372036854775808"),
        Value::Real(9223372036854775808.0)
    );
}

#[test]
fn test_shifts() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "1 << 62"), Value::Integer(1 << 62));
    assert_eq!(eval(&mut ctx, "-16 >> 2"), Value::Integer(-4));
    assert!(matches!(
        eval_err(&mut ctx, "1 << 64"),
        ExprError::InvalidValue(_)
    ));
    assert!(matches!(
        eval_err(&mut ctx, "1 >> -1"),
        ExprError::InvalidValue(_)
    ));
}

#[test]
fn test_bitwise_and_logical_unary() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "~5"), Value::Integer(-6));
    assert_eq!(eval(&mut ctx, "!1"), Value::Boolean(false));
    assert_eq!(eval(&mut ctx, "!(1 > 2)"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "y = 3, -y"), Value::Integer(-3));
}

#[test]
fn test_mixed_comparisons() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "3 == 3.0"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "2 < 2.5"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "(1 < 2) == (2 < 3)"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "(1 < 2) != (3 < 2)"), Value::Boolean(true));
    assert!(matches!(
        eval_err(&mut ctx, "(1 < 2) + 1"),
        ExprError::InvalidValue(_)
    ));
}

#[test]
fn test_approximate_equality() {
    let mut ctx = create_test_context();
    assert_eq!(eval(&mut ctx, "1.5 ~= 1.5000001"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "1.5 ~= 1.51"), Value::Boolean(false));
    assert_eq!(eval(&mut ctx, "1000000 ~= 1000000.5"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "2 ~= 3"), Value::Boolean(false));
    assert_eq!(eval(&mut ctx, "\"ABC\" ~= \"abc\""), Value::Boolean(true));
}
