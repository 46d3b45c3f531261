//! AST to program compiler.
//!
//! Emits a flat, postfix-ordered [`Program`]. Operands come before their operator,
//! except that ternary branches are wrapped in `StartBlock`/`EndBlock` pairs ahead of
//! the condition so the executor can defer them.
//!
//! Rewrites done here:
//!
//! - `a op= b` becomes `a a b op =`
//! - `++a` becomes `a a 1 + =` (new value)
//! - `a++` becomes `a a 1 + = 1 -` (old value)
//!
//! Calls emit an `OpenCall` marker, the arguments, `Null` placeholders for omitted
//! optional arguments, then the resolved function.

extern crate alloc;

use crate::error::{ErrorState, ExprError, Result};
use crate::functions::{Function, FunctionRegistry};
use crate::interp::Node;
use crate::lexer::TokenKind;
use crate::types::{OpType, Rule};
use crate::value::Value;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

/// One program instruction.
#[derive(Clone, Debug)]
pub enum Instr {
    /// Variable reference, resolved when consumed.
    Ident(String),
    Value(Value),
    Op(OpType),
    /// Marks where a call's arguments begin.
    OpenCall,
    /// Resolved call target. The reference is weak so a cached body that calls its
    /// own function does not keep it alive.
    Call { name: String, function: Weak<Function> },
    StartBlock,
    EndBlock,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Ident(name) => f.write_str(name),
            Instr::Value(Value::Str(s)) => {
                write!(f, "\"{}\"", crate::lexer::encode_escapes(s))
            }
            Instr::Value(v) => write!(f, "{}", v),
            Instr::Op(op) => write!(f, "{}", op),
            Instr::OpenCall => f.write_str("["),
            Instr::Call { name, .. } => write!(f, "{}()", name),
            Instr::StartBlock => f.write_str("{"),
            Instr::EndBlock => f.write_str("}"),
        }
    }
}

/// A compiled expression.
#[derive(Clone, Debug, Default)]
pub struct Program {
    instrs: Vec<Instr>,
}

impl Program {
    pub fn new(instrs: Vec<Instr>) -> Self {
        Self { instrs }
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// True if the program calls a function named `name`.
    pub fn references(&self, name: &str) -> bool {
        self.instrs
            .iter()
            .any(|i| matches!(i, Instr::Call { name: callee, .. } if callee == name))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instrs.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", instr)?;
        }
        Ok(())
    }
}

/// Compile an AST against the functions in `functions`.
pub fn compile(node: &Node<'_>, functions: &FunctionRegistry) -> Result<Program> {
    let mut compiler = Compiler::new(functions);
    compiler.compile(node)
}

pub struct Compiler<'r> {
    functions: &'r FunctionRegistry,
    instrs: Vec<Instr>,
    error: ErrorState,
}

impl<'r> Compiler<'r> {
    pub fn new(functions: &'r FunctionRegistry) -> Self {
        Self {
            functions,
            instrs: Vec::new(),
            error: ErrorState::new(),
        }
    }

    pub fn compile(&mut self, node: &Node<'_>) -> Result<Program> {
        self.error.clear();
        self.instrs.clear();

        if let Err(err) = self.node(node) {
            self.error.set(err);
        }

        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(Program::new(core::mem::take(&mut self.instrs))),
        }
    }

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn node(&mut self, node: &Node<'_>) -> Result<()> {
        let Node::Rule { rule, children } = node else {
            return self.leaf(node);
        };

        match (rule, *children) {
            (Rule::Expression, [lhs, _, rhs]) => {
                self.node(lhs)?;
                self.node(rhs)?;
                self.emit(Instr::Op(OpType::Comma));
            }
            (Rule::AssignmentExpression, [target, op, value]) => {
                let name = lvalue(target)?;
                let op = operator(op)?;
                self.emit(Instr::Ident(name.to_string()));
                match op.compound_base() {
                    Some(base) => {
                        self.emit(Instr::Ident(name.to_string()));
                        self.node(value)?;
                        self.emit(Instr::Op(base));
                    }
                    None => self.node(value)?,
                }
                self.emit(Instr::Op(OpType::Equals));
            }
            (Rule::ConditionalExpression, [cond, _, then, _, otherwise]) => {
                self.emit(Instr::StartBlock);
                self.node(then)?;
                self.emit(Instr::EndBlock);
                self.emit(Instr::StartBlock);
                self.node(otherwise)?;
                self.emit(Instr::EndBlock);
                self.node(cond)?;
                self.emit(Instr::Op(OpType::Question));
            }
            (Rule::UnaryExpression, [op, operand]) => match operator(op)? {
                op @ (OpType::Increment | OpType::Decrement) => {
                    let name = lvalue(operand)?;
                    self.step(name, op);
                }
                OpType::Plus => {
                    self.node(operand)?;
                    self.emit(Instr::Op(OpType::UnaryPlus));
                }
                OpType::Minus => {
                    self.node(operand)?;
                    self.emit(Instr::Op(OpType::UnaryMinus));
                }
                op => {
                    self.node(operand)?;
                    self.emit(Instr::Op(op));
                }
            },
            (Rule::PostfixExpression, [operand, op]) => {
                let name = lvalue(operand)?;
                let op = operator(op)?;
                self.step(name, op);
                // Undo the step on the pushed result so the expression yields the old value.
                self.emit(Instr::Value(Value::Integer(1)));
                self.emit(Instr::Op(if op == OpType::Increment {
                    OpType::Minus
                } else {
                    OpType::Plus
                }));
            }
            (Rule::PostfixExpression, [name, _, _]) => {
                self.call(name, &[])?;
            }
            (Rule::PostfixExpression, [name, _, args, _]) => {
                self.call(name, args.children())?;
            }
            (Rule::PrimaryExpression, [_, inner, _]) => self.node(inner)?,
            (_, [lhs, op, rhs]) => {
                self.node(lhs)?;
                self.node(rhs)?;
                let op = operator(op)?;
                self.emit(Instr::Op(op));
            }
            (rule, children) => {
                debug_assert!(false, "unexpected {} node", rule.name());
                return Err(ExprError::Other(format!(
                    "Unexpected {} node with {} children",
                    rule.name(),
                    children.len()
                )));
            }
        }

        Ok(())
    }

    fn leaf(&mut self, node: &Node<'_>) -> Result<()> {
        let token = node
            .token()
            .ok_or_else(|| ExprError::Other("Expected a token".to_string()))?;

        let instr = match &token.kind {
            TokenKind::Identifier(name) => Instr::Ident(name.clone()),
            TokenKind::Integer(i) => Instr::Value(Value::Integer(*i)),
            TokenKind::Real(r) => Instr::Value(Value::Real(*r)),
            TokenKind::Str(s) => Instr::Value(Value::Str(s.clone())),
            TokenKind::Operator(op) => {
                return Err(ExprError::Syntax(format!("Unexpected operator '{}'", op)));
            }
        };

        self.emit(instr);
        Ok(())
    }

    /// `name name 1 +|- =`
    fn step(&mut self, name: &str, op: OpType) {
        let base = if op == OpType::Increment {
            OpType::Plus
        } else {
            OpType::Minus
        };
        self.emit(Instr::Ident(name.to_string()));
        self.emit(Instr::Ident(name.to_string()));
        self.emit(Instr::Value(Value::Integer(1)));
        self.emit(Instr::Op(base));
        self.emit(Instr::Op(OpType::Equals));
    }

    fn call(&mut self, name: &Node<'_>, args: &[&Node<'_>]) -> Result<()> {
        let name = name
            .identifier()
            .ok_or_else(|| ExprError::Syntax("Expected a function name".to_string()))?;

        let candidates = self.functions.get_all(name);
        let Some(fallback) = candidates.last() else {
            return Err(ExprError::UnknownFunction {
                name: name.to_string(),
            });
        };

        let count = args.len();
        let function = candidates
            .iter()
            .find(|f| f.accepts_count(count))
            .unwrap_or(fallback)
            .clone();

        self.emit(Instr::OpenCall);
        for arg in args {
            self.node(arg)?;
        }

        let arity = function.arity();
        if count < arity {
            if function.optional_from(count) {
                for _ in count..arity {
                    self.emit(Instr::Value(Value::Null));
                }
            } else if function.is_variable_args() {
                return Err(ExprError::TooFewArguments {
                    name: name.to_string(),
                    minimum: arity,
                    found: count,
                });
            } else {
                return Err(ExprError::InvalidFunctionCall {
                    name: name.to_string(),
                    expected: arity,
                    found: count,
                });
            }
        } else if count > arity && !function.is_variable_args() {
            return Err(ExprError::InvalidFunctionCall {
                name: name.to_string(),
                expected: arity,
                found: count,
            });
        }

        self.emit(Instr::Call {
            name: name.to_string(),
            function: Rc::downgrade(&function),
        });
        Ok(())
    }
}

fn operator(node: &Node<'_>) -> Result<OpType> {
    node.operator()
        .ok_or_else(|| ExprError::Other("Expected an operator".to_string()))
}

/// Assignment targets must be bare identifiers.
fn lvalue<'a>(node: &Node<'a>) -> Result<&'a str> {
    node.identifier().ok_or(ExprError::NonLvalue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::interpret;
    use crate::lexer::Lexer;
    use bumpalo::Bump;

    fn compile_with(text: &str, functions: &FunctionRegistry) -> Result<Program> {
        let tokens = Lexer::tokenize(text)?;
        let arena = Bump::new();
        let node = interpret(&arena, &tokens)?;
        compile(node, functions)
    }

    fn listing(text: &str) -> String {
        compile_with(text, &FunctionRegistry::new())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_postfix_order() {
        assert_eq!(listing("2 + 3 * 4"), "2 3 4 * +");
        assert_eq!(listing("2 ** 3 ** 2"), "2 3 2 ** **");
        assert_eq!(listing("-x"), "x -");
        assert_eq!(listing("a, b"), "a b ,");
    }

    #[test]
    fn test_ternary_blocks() {
        assert_eq!(listing("c ? 1 : 2"), "{ 1 } { 2 } c ?");
        assert_eq!(
            listing("a ? b ? 1 : 2 : 3"),
            "{ { 1 } { 2 } b ? } { 3 } a ?"
        );
    }

    #[test]
    fn test_assignment_rewrites() {
        assert_eq!(listing("x = 1"), "x 1 =");
        assert_eq!(listing("x += 2"), "x x 2 + =");
        assert_eq!(listing("x <<= 1"), "x x 1 << =");
        assert_eq!(listing("++x"), "x x 1 + =");
        assert_eq!(listing("x--"), "x x 1 - = 1 +");
    }

    #[test]
    fn test_non_lvalue() {
        let funcs = FunctionRegistry::new();
        assert_eq!(compile_with("5 = 3", &funcs).unwrap_err(), ExprError::NonLvalue);
        assert_eq!(compile_with("(x) = 3", &funcs).unwrap_err(), ExprError::NonLvalue);
        assert_eq!(compile_with("++5", &funcs).unwrap_err(), ExprError::NonLvalue);
    }

    fn noop() -> crate::functions::NativeProc {
        Rc::new(|_, _| Ok(Value::Integer(0)))
    }

    #[test]
    fn test_call_resolution() {
        let mut funcs = FunctionRegistry::new();
        funcs.add_proc("f", "r, rn", noop()).unwrap();
        funcs.add_proc("v", "s, ...", noop()).unwrap();

        assert_eq!(
            compile_with("f(1)", &funcs).unwrap().to_string(),
            "[ 1 <null> f()"
        );
        assert_eq!(
            compile_with("f(1, 2, 3)", &funcs).unwrap_err(),
            ExprError::InvalidFunctionCall {
                name: "f".to_string(),
                expected: 2,
                found: 3
            }
        );
        assert_eq!(
            compile_with("v()", &funcs).unwrap_err(),
            ExprError::TooFewArguments {
                name: "v".to_string(),
                minimum: 1,
                found: 0
            }
        );
        assert!(compile_with("v(1, 2, 3)", &funcs).is_ok());
        assert_eq!(
            compile_with("nope(1)", &funcs).unwrap_err(),
            ExprError::UnknownFunction {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_references() {
        let mut funcs = FunctionRegistry::new();
        funcs.add_proc("f", "r", noop()).unwrap();
        let program = compile_with("1 + f(2)", &funcs).unwrap();
        assert!(program.references("f"));
        assert!(!program.references("g"));
    }
}
