//! Host-facing evaluation context.
//!
//! [`ExprContext`] owns the variable and function registries and the behaviour flags,
//! and runs each pipeline stage (tokenize, interpret, compile, execute) on its own or
//! all together through [`ExprContext::evaluate`]. Errors go to an optional sink and
//! the log unless QUIET is set.

extern crate alloc;

use crate::compiler::{self, Program};
use crate::error::{ExprError, Result};
use crate::executor::Executor;
use crate::functions::{Function, FunctionObject, FunctionRegistry};
use crate::interp::{self, Node};
use crate::lexer::{self, Lexer, Token};
use crate::value::{Value, ValueType};
use crate::variables::{VariableAccessor, VariableRegistry};
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use bitflags::bitflags;
use bumpalo::Bump;
use core::cell::RefCell;

bitflags! {
    /// Behaviour switches for an [`ExprContext`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContextFlags: u32 {
        /// Do not send error messages to the sink or the log.
        const QUIET   = 1 << 0;
        /// Log every pipeline stage's intermediate form.
        const DEBUG   = 1 << 1;
        /// Trigonometric builtins take degrees instead of radians.
        const DEGREES = 1 << 2;
    }
}

type ErrorSink = Rc<dyn Fn(&str)>;

/// Evaluation context.
///
/// Owns the variable and function registries and runs the pipeline: tokenize,
/// interpret, compile, execute. Every stage is callable on its own, so a host can
/// compile an expression once and execute the [`Program`] many times.
///
/// # Examples
///
/// ```
/// use expr_vm::{ExprContext, Value};
///
/// let mut ctx = ExprContext::new();
/// ctx.create_integer_variable("x", 4).unwrap();
///
/// assert_eq!(ctx.evaluate("x * 2 + 1").unwrap(), Value::Integer(9));
/// assert_eq!(ctx.evaluate("y = x ** 2").unwrap(), Value::Integer(16));
/// assert_eq!(ctx.variable("y"), Some(Value::Integer(16)));
/// ```
///
/// User functions compile on their first call:
///
/// ```
/// use expr_vm::{ExprContext, Value};
///
/// let mut ctx = ExprContext::new();
/// ctx.define_function("fact(n) = n <= 1 ? 1 : n * fact(n - 1)").unwrap();
/// assert_eq!(ctx.evaluate("fact(5)").unwrap(), Value::Integer(120));
/// ```
pub struct ExprContext {
    flags: ContextFlags,
    pub(crate) variables: VariableRegistry,
    pub(crate) functions: FunctionRegistry,
    error_sink: Option<ErrorSink>,
    last_error: RefCell<Option<String>>,
    max_call_depth: Option<usize>,
}

impl Default for ExprContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprContext {
    /// Creates a context with the builtin math functions registered.
    pub fn new() -> Self {
        let mut ctx = Self::empty();
        #[cfg(feature = "libm")]
        ctx.functions.register_builtins();
        ctx
    }

    /// Creates a context with no variables and no functions.
    pub fn empty() -> Self {
        Self {
            flags: ContextFlags::empty(),
            variables: VariableRegistry::new(),
            functions: FunctionRegistry::new(),
            error_sink: None,
            last_error: RefCell::new(None),
            max_call_depth: None,
        }
    }

    /// Deepest user-function nesting allowed, if any. Unlimited by default: every
    /// nested call runs on the host stack, so hosts with a small stack should set one.
    pub fn max_call_depth(&self) -> Option<usize> {
        self.max_call_depth
    }

    pub fn set_max_call_depth(&mut self, depth: Option<usize>) {
        self.max_call_depth = depth;
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ContextFlags) {
        self.flags = flags;
    }

    pub fn set_quiet(&mut self, on: bool) {
        self.flags.set(ContextFlags::QUIET, on);
    }

    pub fn is_quiet(&self) -> bool {
        self.flags.contains(ContextFlags::QUIET)
    }

    pub fn set_debug(&mut self, on: bool) {
        self.flags.set(ContextFlags::DEBUG, on);
    }

    pub fn is_debug(&self) -> bool {
        self.flags.contains(ContextFlags::DEBUG)
    }

    pub fn set_degrees(&mut self, on: bool) {
        self.flags.set(ContextFlags::DEGREES, on);
    }

    pub fn is_degrees(&self) -> bool {
        self.flags.contains(ContextFlags::DEGREES)
    }

    /// Install a callback that receives every reported error message.
    pub fn set_error_sink<F>(&mut self, sink: F)
    where
        F: Fn(&str) + 'static,
    {
        self.error_sink = Some(Rc::new(sink));
    }

    pub fn clear_error_sink(&mut self) {
        self.error_sink = None;
    }

    /// The most recent error message, whether or not QUIET was set.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Report a message through the error sink.
    pub fn error_msg(&self, message: &str) {
        *self.last_error.borrow_mut() = Some(message.to_string());

        if self.is_quiet() {
            return;
        }

        tracing::warn!(error = message, "expression error");
        if let Some(sink) = &self.error_sink {
            sink(message);
        }
    }

    fn report(&self, err: &ExprError, source: Option<&str>) {
        let message = match (err, source) {
            (ExprError::Lexical { position, message }, Some(text)) => {
                lexer::diagnostic(text, *position, message)
            }
            _ => err.to_string(),
        };
        self.error_msg(&message);
    }

    /// Tokenize `text`.
    pub fn parse(&self, text: &str) -> Result<Vec<Token>> {
        let tokens = Lexer::tokenize(text).inspect_err(|e| self.report(e, Some(text)))?;

        if self.is_debug() {
            let listing: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
            tracing::debug!(stage = "parse", tokens = %listing.join(" "));
        }

        Ok(tokens)
    }

    /// Build the AST for `tokens` in `arena`.
    pub fn interpret<'a>(&self, arena: &'a Bump, tokens: &'a [Token]) -> Result<&'a Node<'a>> {
        let node = interp::interpret(arena, tokens).inspect_err(|e| self.report(e, None))?;

        if self.is_debug() {
            tracing::debug!(stage = "interp", tree = %node.tree_string());
        }

        Ok(node)
    }

    /// Compile an AST.
    pub fn compile(&self, node: &Node<'_>) -> Result<Program> {
        let program =
            compiler::compile(node, &self.functions).inspect_err(|e| self.report(e, None))?;

        if self.is_debug() {
            tracing::debug!(stage = "compile", program = %program);
        }

        Ok(program)
    }

    /// Tokenize, interpret and compile `text`.
    pub fn compile_text(&self, text: &str) -> Result<Program> {
        let tokens = self.parse(text)?;
        let arena = Bump::new();
        let node = self.interpret(&arena, &tokens)?;
        self.compile(node)
    }

    /// Run `program` and return every top-level value.
    pub fn execute_all(&mut self, program: &Program) -> Result<Vec<Value>> {
        let execution = Executor::new(self).execute(program);

        if self.is_debug() {
            let listing: Vec<String> = execution.values.iter().map(|v| v.to_string()).collect();
            tracing::debug!(stage = "execute", values = %listing.join(", "), ok = execution.is_ok());
        }

        execution.into_result().inspect_err(|e| self.report(e, None))
    }

    /// Run `program` and return its final value.
    pub fn execute(&mut self, program: &Program) -> Result<Value> {
        let mut values = self.execute_all(program)?;
        values.pop().ok_or(ExprError::MissingResult)
    }

    /// Evaluate `text` and return every top-level value.
    pub fn evaluate_all(&mut self, text: &str) -> Result<Vec<Value>> {
        let program = self.compile_text(text)?;
        self.execute_all(&program)
    }

    /// Evaluate `text` and return its final value.
    pub fn evaluate(&mut self, text: &str) -> Result<Value> {
        let program = self.compile_text(text)?;
        self.execute(&program)
    }

    /// See [`lexer::skip_expression`].
    pub fn skip_expression(&self, text: &str, pos: &mut usize) -> bool {
        lexer::skip_expression(text, pos)
    }

    // Variables

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name)
    }

    pub fn variable_type(&self, name: &str) -> Option<ValueType> {
        self.variables.get(name).map(|v| v.value_type())
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.names()
    }

    /// Create a variable, or update it if the name already exists.
    pub fn create_variable(&mut self, name: &str, value: Value) -> Result<()> {
        self.variables
            .create(name, value)
            .inspect_err(|e| self.report(e, None))
    }

    pub fn create_boolean_variable(&mut self, name: &str, value: bool) -> Result<()> {
        self.create_variable(name, Value::Boolean(value))
    }

    pub fn create_integer_variable(&mut self, name: &str, value: i64) -> Result<()> {
        self.create_variable(name, Value::Integer(value))
    }

    pub fn create_real_variable(&mut self, name: &str, value: f64) -> Result<()> {
        self.create_variable(name, Value::Real(value))
    }

    pub fn create_string_variable(&mut self, name: &str, value: &str) -> Result<()> {
        self.create_variable(name, Value::string(value))
    }

    /// Create a variable whose reads and writes go to `accessor`.
    pub fn create_accessor_variable(
        &mut self,
        name: &str,
        accessor: Rc<dyn VariableAccessor>,
    ) -> Result<()> {
        self.variables
            .create_accessor(name, accessor)
            .inspect_err(|e| self.report(e, None))
    }

    pub fn remove_variable(&mut self, name: &str) -> bool {
        self.variables.remove(name)
    }

    // Functions

    pub fn function(&self, name: &str) -> Option<Rc<Function>> {
        self.functions.get(name)
    }

    /// Every overload registered under `name`.
    pub fn functions_named(&self, name: &str) -> Vec<Rc<Function>> {
        self.functions.get_all(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.names()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register a native function with an argument signature such as `"r, ri"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use expr_vm::{ExprContext, Value};
    ///
    /// let mut ctx = ExprContext::new();
    /// ctx.register_function("half", "r", |_, args| {
    ///     Ok(Value::Real(args[0].as_real().unwrap_or(0.0) / 2.0))
    /// })
    /// .unwrap();
    ///
    /// // The integer argument arrives as a real.
    /// assert_eq!(ctx.evaluate("half(3)").unwrap(), Value::Real(1.5));
    /// ```
    pub fn register_function<F>(&mut self, name: &str, signature: &str, f: F) -> Result<()>
    where
        F: Fn(&ExprContext, &[Value]) -> Result<Value> + 'static,
    {
        let result = self.functions.add_proc(name, signature, Rc::new(f));
        self.registered(result)
    }

    /// Register a native object. It replaces same-named functions unless it reports
    /// [`FunctionObject::is_overload`].
    pub fn register_object(
        &mut self,
        name: &str,
        signature: &str,
        object: Rc<dyn FunctionObject>,
    ) -> Result<()> {
        let result = self.functions.add_object(name, signature, object);
        self.registered(result)
    }

    /// Register a formula function. The body compiles on first call.
    pub fn register_user_function(&mut self, name: &str, params: &[&str], body: &str) -> Result<()> {
        let result = self.functions.add_user(name, params, body);
        self.registered(result)
    }

    /// Register a formula function from a definition like `f(x, y) = x * y`.
    pub fn define_function(&mut self, definition: &str) -> Result<()> {
        let parsed = split_definition(definition);
        let Some((name, params, body)) = parsed else {
            let err = ExprError::Syntax("Invalid function definition".to_string());
            self.report(&err, None);
            return Err(err);
        };
        self.register_user_function(name, &params, body)
    }

    fn registered(&self, result: Result<Rc<Function>>) -> Result<()> {
        match result {
            Ok(function) => {
                if self.is_debug() {
                    tracing::debug!(function = %function.signature(), "registered");
                }
                Ok(())
            }
            Err(err) => {
                self.report(&err, None);
                Err(err)
            }
        }
    }

    pub fn remove_function(&mut self, name: &str) -> bool {
        self.functions.remove(name)
    }

    /// True if any compiled user function calls `name`.
    pub fn has_function_reference(&self, name: &str) -> bool {
        self.functions.has_reference(name)
    }

    /// Drop every cached user-function program.
    pub fn reset_functions(&self) {
        self.functions.reset();
    }
}

/// Split `name(a, b) = body` into its parts.
fn split_definition(definition: &str) -> Option<(&str, Vec<&str>, &str)> {
    let open = definition.find('(')?;
    let close = definition[open..].find(')')? + open;
    let name = definition[..open].trim();

    let params: Vec<&str> = definition[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let rest = definition[close + 1..].trim_start();
    let body = rest.strip_prefix('=')?;
    if body.starts_with('=') {
        return None;
    }

    Some((name, params, body.trim()))
}
