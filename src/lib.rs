#![cfg_attr(not(test), no_std)]
#![doc = r#"
# expr-vm

An embeddable, no_std-friendly expression language with a small compiler and stack
machine behind it.

## Overview

Expressions go through four stages:

1. **Tokenize** ([`lexer`]): text to a flat token stream. Integer (decimal, hex, octal),
   real and string literals, identifiers and C-style operators.
2. **Interpret** ([`interp`]): a backtracking recursive-descent grammar builds an AST
   in a bump arena.
3. **Compile** ([`compiler`]): the AST becomes a postfix [`Program`]. Ternary branches
   are emitted as deferred blocks, compound assignments and `++`/`--` are rewritten, and
   function calls are resolved against the registry by argument count.
4. **Execute** ([`executor`]): a stack machine runs the program against the context's
   variables and functions.

Values are booleans, 64-bit integers, reals and strings. Integer arithmetic stays in
integers until a real operand shows up; integer division by zero is routed to real
division and yields an infinity instead of failing.

Key features:
- C operator set with standard precedence, plus `**` (right associative) and `~=`
- Lazy `?:`: only the selected branch runs
- Native functions with typed, optional and variadic arguments
- Overload sets resolved by argument count
- Formula functions (`f(x) = ...`) compiled on first call, with recursion
- Host-backed variables through [`VariableAccessor`]
- Tracing of every pipeline stage when the DEBUG flag is set

## Quick Start

```rust
use expr_vm::{ExprContext, Value};

let mut ctx = ExprContext::new();

assert_eq!(ctx.evaluate("2 + 3 * 4").unwrap(), Value::Integer(14));
assert_eq!(ctx.evaluate("2 ** 3 ** 2").unwrap(), Value::Integer(512));
assert_eq!(ctx.evaluate("1 ? 5 : (1 / 0)").unwrap(), Value::Integer(5));
assert_eq!(ctx.evaluate("\"ab\" + \"cd\"").unwrap(), Value::string("abcd"));
```

## Compile once, run many times

```rust
use expr_vm::{ExprContext, Value};

let mut ctx = ExprContext::new();
ctx.create_integer_variable("i", 0).unwrap();

let program = ctx.compile_text("i += 2").unwrap();
for _ in 0..3 {
    ctx.execute(&program).unwrap();
}
assert_eq!(ctx.variable("i"), Some(Value::Integer(6)));
```

## Functions

```rust
use expr_vm::{ExprContext, Value};

let mut ctx = ExprContext::new();

// Native function taking a real and an optional integer.
ctx.register_function("scale", "r, in", |_, args| {
    let x = args[0].as_real().unwrap_or(0.0);
    let factor = args[1].as_integer().unwrap_or(10);
    Ok(Value::Real(x * factor as f64))
})
.unwrap();

assert_eq!(ctx.evaluate("scale(1.5)").unwrap(), Value::Real(15.0));
assert_eq!(ctx.evaluate("scale(1.5, 2)").unwrap(), Value::Real(3.0));

// Formula function.
ctx.define_function("sq(x) = x * x").unwrap();
assert_eq!(ctx.evaluate("sq(7)").unwrap(), Value::Integer(49));
```

## Embedding expressions in a larger syntax

[`lexer::skip_expression`] finds where an expression ends without evaluating it:

```rust
use expr_vm::lexer::skip_expression;

let line = "x + f(1, 2), rest";
let mut pos = 0;
assert!(skip_expression(line, &mut pos));
assert_eq!(&line[pos..], ", rest");
```
"#]

extern crate alloc;

pub mod compiler;
pub mod context;
pub mod error;
pub mod executor;
pub mod functions;
pub mod interp;
pub mod lexer;
pub mod types;
pub mod value;
pub mod variables;

pub use compiler::{Instr, Program};
pub use context::{ContextFlags, ExprContext};
pub use error::{ExprError, NumericError, Result};
pub use executor::{Execution, Executor, INITIAL_STACK_CAPACITY};
pub use functions::{Function, FunctionKind, FunctionObject, FunctionRegistry, NativeProc};
pub use interp::Node;
pub use lexer::{Lexer, Token, TokenKind};
pub use types::{MAX_NAME_LEN, Name, OpType, Rule, TryIntoName};
pub use value::{FromValue, IntoValue, Value, ValueType};
pub use variables::{Variable, VariableAccessor, VariableRegistry};

pub mod constants {
    /// Default epsilon for [`assert_approx_eq!`](crate::assert_approx_eq).
    pub const TEST_PRECISION: f64 = 1e-10;
}

/// Utility macro to check if two floating point values are approximately equal
/// within a specified epsilon. Supports optional format arguments like assert_eq!.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr $(,)?) => {
        $crate::assert_approx_eq!($left, $right, $crate::constants::TEST_PRECISION)
    };
    ($left:expr, $right:expr, $epsilon:expr $(,)?) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let eps: f64 = $epsilon;

        if left_val.is_nan() && right_val.is_nan() {
            // both NaN
        } else if left_val.is_infinite() && right_val.is_infinite() {
            assert_eq!(left_val.signum(), right_val.signum(), "infinities differ in sign");
        } else {
            assert!(
                (left_val - right_val).abs() < eps,
                "assertion failed: `(left ≈ right)` (left: `{}`, right: `{}`, epsilon: `{}`)",
                left_val,
                right_val,
                eps
            );
        }
    }};
    ($left:expr, $right:expr, $epsilon:expr, $msg:literal $(,)?) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let eps: f64 = $epsilon;

        if !(left_val.is_nan() && right_val.is_nan()) {
            assert!((left_val - right_val).abs() < eps, $msg);
        }
    }};
    ($left:expr, $right:expr, $epsilon:expr, $fmt:expr, $($arg:tt)+) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let eps: f64 = $epsilon;

        if !(left_val.is_nan() && right_val.is_nan()) {
            assert!((left_val - right_val).abs() < eps, $fmt, $($arg)+);
        }
    }};
}
