//! Stack machine.
//!
//! Runs a [`Program`] against an [`ExprContext`]. Identifiers are pushed unresolved and
//! only read when an operator consumes them, which is what lets `=` see its target name.
//!
//! An operator or call that cannot produce a value pushes a failed slot instead of
//! aborting; the failure flows through every operator that consumes it and surfaces when
//! results are collected. Only malformed programs (an unknown opcode, an unterminated
//! block, a call with no open marker) stop execution immediately.

extern crate alloc;

use crate::compiler::{Instr, Program};
use crate::context::ExprContext;
use crate::error::{ErrorState, ExprError, Result};
use crate::functions::{Function, FunctionKind};
use crate::lexer::Lexer;
use crate::types::OpType;
use crate::value::{Value, ValueType};
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec::Vec;

/// Initial capacity of the runtime stack.
pub const INITIAL_STACK_CAPACITY: usize = 16;

/// Runtime stack entry.
#[derive(Debug, Clone)]
enum Slot<'p> {
    Ident(&'p str),
    Value(Value),
    Block(&'p [Instr]),
    OpenCall,
    Failed,
}

/// Values collected after a run, plus the first failure if any.
///
/// Values that did resolve are kept even when the run failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub values: Vec<Value>,
    pub error: Option<ExprError>,
}

impl Execution {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<Value>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values),
        }
    }

    /// The final value of a successful run.
    pub fn into_last(self) -> Result<Value> {
        let mut values = self.into_result()?;
        values.pop().ok_or(ExprError::MissingResult)
    }
}

pub struct Executor<'c> {
    ctx: &'c mut ExprContext,
    depth: usize,
    error: ErrorState,
}

impl<'c> Executor<'c> {
    pub fn new(ctx: &'c mut ExprContext) -> Self {
        Self::nested(ctx, 0)
    }

    fn nested(ctx: &'c mut ExprContext, depth: usize) -> Self {
        Self {
            ctx,
            depth,
            error: ErrorState::new(),
        }
    }

    pub fn execute(&mut self, program: &Program) -> Execution {
        self.run(program.instrs())
    }

    /// Run `instrs` and collect every remaining stack entry, oldest first.
    pub fn run(&mut self, instrs: &[Instr]) -> Execution {
        self.error.clear();
        let mut stack: Vec<Slot<'_>> = Vec::with_capacity(INITIAL_STACK_CAPACITY);

        if let Err(err) = self.step_all(instrs, &mut stack) {
            return Execution {
                values: Vec::new(),
                error: Some(err),
            };
        }

        let mut values = Vec::with_capacity(stack.len());
        for slot in stack {
            if let Some(value) = self.resolve(slot) {
                values.push(value);
            } else {
                self.error.set(ExprError::MissingResult);
            }
        }

        Execution {
            values,
            error: self.error.take(),
        }
    }

    fn step_all<'p>(&mut self, instrs: &'p [Instr], stack: &mut Vec<Slot<'p>>) -> Result<()> {
        let mut pc = 0;

        while let Some(instr) = instrs.get(pc) {
            pc += 1;

            match instr {
                Instr::Ident(name) => stack.push(Slot::Ident(name)),
                Instr::Value(value) => stack.push(Slot::Value(value.clone())),
                Instr::OpenCall => stack.push(Slot::OpenCall),
                Instr::StartBlock => {
                    let end = block_end(instrs, pc)?;
                    stack.push(Slot::Block(&instrs[pc..end]));
                    pc = end + 1;
                }
                Instr::EndBlock => {
                    return Err(ExprError::Other("Unmatched end of block".to_string()));
                }
                Instr::Call { name, function } => {
                    let slot = self.call(name, function, stack)?;
                    stack.push(slot);
                }
                Instr::Op(op) => self.operator(*op, stack)?,
            }
        }

        Ok(())
    }

    fn fail<'p>(&mut self, err: ExprError) -> Slot<'p> {
        self.error.set(err);
        Slot::Failed
    }

    /// Read a slot as a value. Identifiers are looked up now.
    fn resolve(&mut self, slot: Slot<'_>) -> Option<Value> {
        match slot {
            Slot::Value(value) => Some(value),
            Slot::Ident(name) => match self.ctx.variables.get(name) {
                Some(value) => Some(value),
                None => {
                    self.error
                        .set(ExprError::InvalidValue(format!("undefined variable '{}'", name)));
                    None
                }
            },
            Slot::Failed => None,
            Slot::Block(_) | Slot::OpenCall => {
                self.error.set(ExprError::MissingResult);
                None
            }
        }
    }

    fn pop_value(&mut self, stack: &mut Vec<Slot<'_>>) -> Option<Value> {
        match stack.pop() {
            Some(slot) => self.resolve(slot),
            None => {
                self.error.set(ExprError::MissingResult);
                None
            }
        }
    }

    fn operator<'p>(&mut self, op: OpType, stack: &mut Vec<Slot<'p>>) -> Result<()> {
        let slot = match op {
            OpType::Comma => return Ok(()),
            OpType::Equals => self.assign(stack),
            OpType::Question => self.ternary(stack)?,
            OpType::LogicalNot | OpType::BitNot | OpType::UnaryPlus | OpType::UnaryMinus => {
                self.unary(op, stack)
            }
            OpType::Power
            | OpType::Times
            | OpType::Divide
            | OpType::Modulus
            | OpType::Plus
            | OpType::Minus
            | OpType::BitLShift
            | OpType::BitRShift
            | OpType::Less
            | OpType::LessEqual
            | OpType::Greater
            | OpType::GreaterEqual
            | OpType::Equal
            | OpType::NotEqual
            | OpType::ApproxEqual
            | OpType::BitAnd
            | OpType::BitXor
            | OpType::BitOr
            | OpType::LogicalAnd
            | OpType::LogicalOr => self.binary(op, stack),
            other => return Err(ExprError::InvalidOperator(other.symbol().to_string())),
        };

        stack.push(slot);
        Ok(())
    }

    fn unary<'p>(&mut self, op: OpType, stack: &mut Vec<Slot<'p>>) -> Slot<'p> {
        let Some(value) = self.pop_value(stack) else {
            return Slot::Failed;
        };

        let coerced = match op {
            OpType::LogicalNot => value.convert_to(ValueType::BOOLEAN),
            OpType::BitNot => value.convert_to(ValueType::INTEGER),
            _ => Some(value),
        };

        let Some(operand) = coerced else {
            return self.fail(ExprError::InvalidValue(format!(
                "operand of '{}' has the wrong type",
                op
            )));
        };

        match operand.unary_op(op) {
            Ok(result) => Slot::Value(result),
            Err(err) => self.fail(err),
        }
    }

    fn binary<'p>(&mut self, op: OpType, stack: &mut Vec<Slot<'p>>) -> Slot<'p> {
        let rhs = self.pop_value(stack);
        let lhs = self.pop_value(stack);
        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            return Slot::Failed;
        };

        let mask = match op {
            OpType::LogicalAnd | OpType::LogicalOr => Some(ValueType::BOOLEAN),
            OpType::BitAnd
            | OpType::BitXor
            | OpType::BitOr
            | OpType::BitLShift
            | OpType::BitRShift => Some(ValueType::INTEGER),
            _ if promotes_to_real(&lhs, &rhs, op) => Some(ValueType::REAL),
            _ => None,
        };

        let (lhs, rhs) = match mask {
            Some(mask) => match (lhs.convert_to(mask), rhs.convert_to(mask)) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return self.fail(ExprError::InvalidValue(format!(
                        "operands of '{}' have the wrong type",
                        op
                    )));
                }
            },
            None => (lhs, rhs),
        };

        match lhs.binary_op(&rhs, op) {
            Ok(result) => Slot::Value(result),
            Err(err) => self.fail(err),
        }
    }

    fn assign<'p>(&mut self, stack: &mut Vec<Slot<'p>>) -> Slot<'p> {
        let value = self.pop_value(stack);

        let name = match stack.pop() {
            Some(Slot::Ident(name)) => name,
            Some(Slot::Failed) => return Slot::Failed,
            _ => return self.fail(ExprError::NonLvalue),
        };

        let Some(value) = value else {
            return Slot::Failed;
        };

        match self.ctx.variables.set(name, value.clone()) {
            Ok(()) => Slot::Value(value),
            Err(err) => self.fail(err),
        }
    }

    /// Pop the condition, then the false and true blocks, and run the selected one.
    fn ternary<'p>(&mut self, stack: &mut Vec<Slot<'p>>) -> Result<Slot<'p>> {
        let cond = self
            .pop_value(stack)
            .and_then(|v| v.as_boolean())
            .unwrap_or(false);

        let (Some(Slot::Block(otherwise)), Some(Slot::Block(then))) = (stack.pop(), stack.pop())
        else {
            return Err(ExprError::Other("Missing block for '?:'".to_string()));
        };

        let block = if cond { then } else { otherwise };
        let result = Executor::nested(&mut *self.ctx, self.depth).run(block);

        Ok(match result.into_last() {
            Ok(value) => Slot::Value(value),
            Err(err) => self.fail(err),
        })
    }

    fn call<'p>(
        &mut self,
        name: &str,
        function: &Weak<Function>,
        stack: &mut Vec<Slot<'p>>,
    ) -> Result<Slot<'p>> {
        let mut slots = Vec::new();
        loop {
            match stack.pop() {
                Some(Slot::OpenCall) => break,
                Some(slot) => slots.push(slot),
                None => {
                    return Err(ExprError::Other(format!(
                        "Missing argument marker for '{}'",
                        name
                    )));
                }
            }
        }
        slots.reverse();

        // The function was removed from the registry after this program compiled.
        let Some(function) = function.upgrade() else {
            return Ok(self.fail(ExprError::UnknownFunction {
                name: name.to_string(),
            }));
        };

        let mut args = Vec::with_capacity(slots.len());
        let mut failed = false;
        for (i, slot) in slots.into_iter().enumerate() {
            let Some(value) = self.resolve(slot) else {
                failed = true;
                continue;
            };

            let mask = function.arg_type(i);
            if value.is_null() && mask.contains(ValueType::NUL) {
                args.push(value);
                continue;
            }

            match value.convert_to(mask) {
                Some(v) => args.push(v),
                None => {
                    self.error.set(ExprError::InvalidArgumentType {
                        name: function.name().to_string(),
                        position: i + 1,
                    });
                    failed = true;
                }
            }
        }

        if failed {
            return Ok(Slot::Failed);
        }

        if let Err(err) = function.validate(&args) {
            return Ok(self.fail(err));
        }

        let result = match function.kind() {
            FunctionKind::User { params, body } => self.call_user(&function, params, body, args),
            _ => function.call_native(self.ctx, &args),
        };

        Ok(match result {
            Ok(value) => Slot::Value(value),
            Err(err) => self.fail(err),
        })
    }

    fn call_user(
        &mut self,
        function: &Function,
        params: &[crate::types::Name],
        body: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        if self.ctx.max_call_depth().is_some_and(|max| self.depth >= max) {
            return Err(ExprError::Other(format!(
                "Maximum call depth exceeded in '{}'",
                function.name()
            )));
        }

        let program = match function.compiled() {
            Some(program) => program,
            None => {
                let program = Rc::new(compile_body(self.ctx, body)?);
                tracing::trace!(function = function.name(), program = %program, "compiled user function");
                function.set_compiled(program.clone());
                program
            }
        };

        let bindings = params.iter().cloned().zip(args).collect();
        self.ctx.variables.push_frame(bindings);
        let result = Executor::nested(&mut *self.ctx, self.depth + 1).execute(&program);
        self.ctx.variables.pop_frame();

        result.into_last()
    }
}

fn compile_body(ctx: &ExprContext, body: &str) -> Result<Program> {
    let tokens = Lexer::tokenize(body)?;
    let arena = bumpalo::Bump::new();
    let node = crate::interp::interpret(&arena, &tokens)?;
    crate::compiler::compile(node, &ctx.functions)
}

/// Index of the `EndBlock` closing a block whose body starts at `start`.
fn block_end(instrs: &[Instr], start: usize) -> Result<usize> {
    let mut depth = 1usize;
    for (i, instr) in instrs.iter().enumerate().skip(start) {
        match instr {
            Instr::StartBlock => depth += 1,
            Instr::EndBlock => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(ExprError::Other("Unterminated block".to_string()))
}

/// Arithmetic and relational operators run in real arithmetic when either operand is
/// real, and integer division by zero is routed to real division.
fn promotes_to_real(lhs: &Value, rhs: &Value, op: OpType) -> bool {
    let arithmetic = matches!(
        op,
        OpType::Power
            | OpType::Times
            | OpType::Divide
            | OpType::Modulus
            | OpType::Plus
            | OpType::Minus
            | OpType::Less
            | OpType::LessEqual
            | OpType::Greater
            | OpType::GreaterEqual
            | OpType::Equal
            | OpType::NotEqual
            | OpType::ApproxEqual
    );

    if !arithmetic || lhs.is_string() {
        return false;
    }

    if lhs.is_real() || rhs.is_real() {
        return true;
    }

    op == OpType::Divide && lhs.is_integer() && *rhs == Value::Integer(0)
}
