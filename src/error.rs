//! Error types and handling for the expr-vm crate.
//!
//! Every pipeline stage reports failures through [`ExprError`]. Numeric failures raised by
//! the value model are grouped under [`NumericError`] so that hosts can match on them
//! without string comparison.

extern crate alloc;
use alloc::string::String;
use core::fmt;

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, ExprError>;

/// Numeric conditions raised while applying an operator to two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericError {
    /// `0 ** n` with a negative exponent is undefined.
    ZeroToNegativePower,
    /// The underlying power computation produced no finite result.
    PowerFailed,
    /// A real result could not be narrowed back to a 64-bit integer.
    RealTooBigForInteger,
    /// One of the operands was NaN.
    NanOperation,
    /// A negative base was raised to a non-integer exponent.
    NonIntegerPowerOfNegative,
    /// Integer or real modulus by zero.
    DivideByZero,
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NumericError::ZeroToNegativePower => "zero to negative power is undefined",
            NumericError::PowerFailed => "power failed",
            NumericError::RealTooBigForInteger => "real too big for integer",
            NumericError::NanOperation => "operation on NaN",
            NumericError::NonIntegerPowerOfNegative => "non-integer power of negative",
            NumericError::DivideByZero => "divide by zero",
        };
        f.write_str(text)
    }
}

/// Error type for expression tokenizing, interpretation, compilation and execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The tokenizer met a character or literal it cannot scan.
    ///
    /// `position` is the 0-based byte offset of the offending character.
    Lexical { position: usize, message: String },

    /// A grammar production could not be matched.
    ///
    /// The string holds the first reported reason, e.g. "Missing colon for '?:'".
    Syntax(String),

    /// No function with this name is registered.
    UnknownFunction { name: String },

    /// A fixed-arity function was called with the wrong number of arguments.
    InvalidFunctionCall {
        /// Name of the function that was called
        name: String,
        /// Number of arguments the resolved overload declares
        expected: usize,
        /// Number of arguments supplied at the call site
        found: usize,
    },

    /// A variable-arity function was called with fewer than its declared arguments.
    TooFewArguments {
        name: String,
        minimum: usize,
        found: usize,
    },

    /// The left side of an assignment is not an identifier.
    NonLvalue,

    /// A numeric operator could not produce a value.
    Numeric(NumericError),

    /// A function argument could not be coerced to its declared type mask.
    InvalidArgumentType { name: String, position: usize },

    /// An opcode reached the executor that it cannot run.
    InvalidOperator(String),

    /// An operator or conversion produced no value.
    InvalidValue(String),

    /// A function signature string used an unknown type letter.
    InvalidArgumentSpec(char),

    /// A variable name does not start with a letter or underscore, or contains other
    /// characters than letters, digits and underscores.
    InvalidVariableName(String),

    /// A name is too long for its heapless buffer.
    StringTooLong,

    /// Execution finished but some stack entries could not be resolved to values.
    MissingResult,

    /// General-purpose error for anything else.
    Other(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Lexical { position, message } => {
                write!(f, "{} at position {}", message, position)
            }
            ExprError::Syntax(err) => write!(f, "Syntax error: {}", err),
            ExprError::UnknownFunction { name } => write!(f, "Invalid Function '{}'", name),
            ExprError::InvalidFunctionCall {
                name,
                expected,
                found,
            } => write!(
                f,
                "Function '{}' called with wrong number of arguments: expected {}, found {}",
                name, expected, found
            ),
            ExprError::TooFewArguments {
                name,
                minimum,
                found,
            } => write!(
                f,
                "Function '{}' called with too few arguments: expected at least {}, found {}",
                name, minimum, found
            ),
            ExprError::NonLvalue => write!(f, "Non lvalue for assignment"),
            ExprError::Numeric(err) => write!(f, "Numeric error: {}", err),
            ExprError::InvalidArgumentType { name, position } => write!(
                f,
                "Invalid type for function argument {} of '{}'",
                position, name
            ),
            ExprError::InvalidOperator(op) => write!(f, "Invalid operator '{}'", op),
            ExprError::InvalidValue(err) => write!(f, "Invalid value: {}", err),
            ExprError::InvalidArgumentSpec(c) => write!(f, "Invalid argument type char '{}'", c),
            ExprError::InvalidVariableName(name) => write!(f, "Invalid variable name '{}'", name),
            ExprError::StringTooLong => write!(f, "String too long for heapless buffer"),
            ExprError::MissingResult => write!(f, "Expression did not produce a value"),
            ExprError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl From<String> for ExprError {
    fn from(err: String) -> ExprError {
        ExprError::Other(err)
    }
}

impl From<NumericError> for ExprError {
    fn from(err: NumericError) -> ExprError {
        ExprError::Numeric(err)
    }
}

/// Single-slot error record for one interpretation or compilation pass.
///
/// Only the first error set after [`ErrorState::clear`] is kept. Later calls to
/// [`ErrorState::set`] are ignored so the reported diagnostic names the root cause
/// rather than a cascade.
#[derive(Debug, Clone, Default)]
pub struct ErrorState {
    error: Option<ExprError>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self { error: None }
    }

    /// Record `err` unless an error is already held.
    pub fn set(&mut self, err: ExprError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn clear(&mut self) {
        self.error = None;
    }

    pub fn is_set(&self) -> bool {
        self.error.is_some()
    }

    pub fn get(&self) -> Option<&ExprError> {
        self.error.as_ref()
    }

    /// Remove and return the held error.
    pub fn take(&mut self) -> Option<ExprError> {
        self.error.take()
    }
}
