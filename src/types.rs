//! Type definitions shared by the pipeline stages.
//!
//! This module holds the opcode table ([`OpType`]), the grammar production tags used to
//! label AST nodes ([`Rule`]), and the heapless [`Name`] type used as the key for
//! variables and functions.

extern crate alloc;

use crate::error::ExprError;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Maximum length of a variable or function name.
pub const MAX_NAME_LEN: usize = 64;

/// Heapless string used for variable and function names.
pub type Name = heapless::String<MAX_NAME_LEN>;

/// Helper trait to convert string slices into heapless names.
pub trait TryIntoName {
    fn try_into_name(&self) -> Result<Name, ExprError>;
}

impl TryIntoName for str {
    fn try_into_name(&self) -> Result<Name, ExprError> {
        let mut name = Name::new();
        name.push_str(self).map_err(|_| ExprError::StringTooLong)?;
        Ok(name)
    }
}

/// Operator opcodes.
///
/// The tokenizer produces the symbolic operators; the compiler additionally emits
/// `UnaryPlus`/`UnaryMinus` for prefix signs and `StartBlock`/`EndBlock` around deferred
/// ternary branches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    OpenRBracket,
    CloseRBracket,
    LogicalNot,
    BitNot,
    Increment,
    Decrement,
    UnaryPlus,
    UnaryMinus,
    Power,
    Times,
    Divide,
    Modulus,
    Plus,
    Minus,
    BitLShift,
    BitRShift,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    ApproxEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Question,
    Colon,
    Equals,
    PlusEquals,
    MinusEquals,
    TimesEquals,
    DivideEquals,
    ModulusEquals,
    BitAndEquals,
    BitXorEquals,
    BitOrEquals,
    BitLShiftEquals,
    BitRShiftEquals,
    Comma,
    StartBlock,
    EndBlock,
}

impl OpType {
    /// Source text of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            OpType::OpenRBracket => "(",
            OpType::CloseRBracket => ")",
            OpType::LogicalNot => "!",
            OpType::BitNot => "~",
            OpType::Increment => "++",
            OpType::Decrement => "--",
            OpType::UnaryPlus | OpType::Plus => "+",
            OpType::UnaryMinus | OpType::Minus => "-",
            OpType::Power => "**",
            OpType::Times => "*",
            OpType::Divide => "/",
            OpType::Modulus => "%",
            OpType::BitLShift => "<<",
            OpType::BitRShift => ">>",
            OpType::Less => "<",
            OpType::LessEqual => "<=",
            OpType::Greater => ">",
            OpType::GreaterEqual => ">=",
            OpType::Equal => "==",
            OpType::NotEqual => "!=",
            OpType::ApproxEqual => "~=",
            OpType::BitAnd => "&",
            OpType::BitXor => "^",
            OpType::BitOr => "|",
            OpType::LogicalAnd => "&&",
            OpType::LogicalOr => "||",
            OpType::Question => "?",
            OpType::Colon => ":",
            OpType::Equals => "=",
            OpType::PlusEquals => "+=",
            OpType::MinusEquals => "-=",
            OpType::TimesEquals => "*=",
            OpType::DivideEquals => "/=",
            OpType::ModulusEquals => "%=",
            OpType::BitAndEquals => "&=",
            OpType::BitXorEquals => "^=",
            OpType::BitOrEquals => "|=",
            OpType::BitLShiftEquals => "<<=",
            OpType::BitRShiftEquals => ">>=",
            OpType::Comma => ",",
            OpType::StartBlock => "{",
            OpType::EndBlock => "}",
        }
    }

    /// For a compound assignment, the binary operator it applies before assigning.
    pub fn compound_base(self) -> Option<OpType> {
        match self {
            OpType::PlusEquals => Some(OpType::Plus),
            OpType::MinusEquals => Some(OpType::Minus),
            OpType::TimesEquals => Some(OpType::Times),
            OpType::DivideEquals => Some(OpType::Divide),
            OpType::ModulusEquals => Some(OpType::Modulus),
            OpType::BitAndEquals => Some(OpType::BitAnd),
            OpType::BitXorEquals => Some(OpType::BitXor),
            OpType::BitOrEquals => Some(OpType::BitOr),
            OpType::BitLShiftEquals => Some(OpType::BitLShift),
            OpType::BitRShiftEquals => Some(OpType::BitRShift),
            _ => None,
        }
    }

    /// True for `=` and every compound assignment operator.
    pub fn is_assignment(self) -> bool {
        self == OpType::Equals || self.compound_base().is_some()
    }

    /// Relational and equality operators; a string operand after one of these is
    /// part of a comparison rather than the start of a new expression.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpType::Less
                | OpType::LessEqual
                | OpType::Greater
                | OpType::GreaterEqual
                | OpType::Equal
                | OpType::NotEqual
                | OpType::ApproxEqual
        )
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Grammar production that produced an AST node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    Expression,
    AssignmentExpression,
    ConditionalExpression,
    LogicalOrExpression,
    LogicalAndExpression,
    InclusiveOrExpression,
    ExclusiveOrExpression,
    AndExpression,
    EqualityExpression,
    RelationalExpression,
    ShiftExpression,
    AdditiveExpression,
    MultiplicativeExpression,
    PowerExpression,
    UnaryExpression,
    PostfixExpression,
    PrimaryExpression,
    ArgumentExpressionList,
}

impl Rule {
    pub fn name(self) -> &'static str {
        match self {
            Rule::Expression => "expression",
            Rule::AssignmentExpression => "assignment_expression",
            Rule::ConditionalExpression => "conditional_expression",
            Rule::LogicalOrExpression => "logical_or_expression",
            Rule::LogicalAndExpression => "logical_and_expression",
            Rule::InclusiveOrExpression => "inclusive_or_expression",
            Rule::ExclusiveOrExpression => "exclusive_or_expression",
            Rule::AndExpression => "and_expression",
            Rule::EqualityExpression => "equality_expression",
            Rule::RelationalExpression => "relational_expression",
            Rule::ShiftExpression => "shift_expression",
            Rule::AdditiveExpression => "additive_expression",
            Rule::MultiplicativeExpression => "multiplicative_expression",
            Rule::PowerExpression => "power_expression",
            Rule::UnaryExpression => "unary_expression",
            Rule::PostfixExpression => "postfix_expression",
            Rule::PrimaryExpression => "primary_expression",
            Rule::ArgumentExpressionList => "argument_expression_list",
        }
    }
}
