//! Function registry.
//!
//! Three kinds of callable live here:
//!
//! - native procs: a host closure plus a declared argument signature,
//! - native objects: a [`FunctionObject`] trait object. An object replaces same-named
//!   functions unless it reports itself as an overload, in which case it joins an
//!   overload set resolved by argument count,
//! - user functions: formula text with named parameters, compiled on first call and
//!   cached until the registry changes.
//!
//! Argument signatures are written as a comma separated list of type letters, one entry
//! per position: `b` boolean, `i` integer, `r` real, `s` string, `n` optional. Several
//! letters at one position accept any of those types, and a final `...` makes the
//! function variadic. `"r, ri, n"` declares three arguments.

extern crate alloc;

use crate::compiler::Program;
use crate::context::ExprContext;
use crate::error::{ExprError, Result};
use crate::types::{Name, TryIntoName};
use crate::value::{Value, ValueType};
use crate::variables::is_valid_variable_name;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

/// Host closure backing a native proc.
pub type NativeProc = Rc<dyn Fn(&ExprContext, &[Value]) -> Result<Value>>;

/// A host callable registered as a native object.
pub trait FunctionObject {
    fn call(&self, ctx: &ExprContext, args: &[Value]) -> Result<Value>;

    /// Checked after argument coercion and before [`FunctionObject::call`].
    fn validate(&self, _args: &[Value]) -> Result<()> {
        Ok(())
    }

    /// Overload objects join the functions already registered under their name
    /// instead of replacing them.
    fn is_overload(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub enum FunctionKind {
    Proc(NativeProc),
    Object(Rc<dyn FunctionObject>),
    User { params: Vec<Name>, body: String },
}

/// A registered function.
pub struct Function {
    name: Name,
    kind: FunctionKind,
    arg_types: Vec<ValueType>,
    variable_args: bool,
    builtin: bool,
    compiled: RefCell<Option<Rc<Program>>>,
}

impl Function {
    fn new(name: Name, kind: FunctionKind, arg_types: Vec<ValueType>, variable_args: bool) -> Self {
        Self {
            name,
            kind,
            arg_types,
            variable_args,
            builtin: false,
            compiled: RefCell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    /// Number of declared arguments. Variadic functions accept this many or more.
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    pub fn arg_types(&self) -> &[ValueType] {
        &self.arg_types
    }

    /// Type mask for argument `index`. Arguments past the declared list of a variadic
    /// function take the last declared mask.
    pub fn arg_type(&self, index: usize) -> ValueType {
        self.arg_types
            .get(index)
            .or_else(|| self.arg_types.last())
            .copied()
            .unwrap_or(ValueType::ANY)
    }

    pub fn is_variable_args(&self) -> bool {
        self.variable_args
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, FunctionKind::User { .. })
    }

    /// True when `count` arguments match the declared arity exactly, or reach it for a
    /// variadic function.
    pub fn accepts_count(&self, count: usize) -> bool {
        count == self.arity() || (self.variable_args && count >= self.arity())
    }

    /// True when every declared argument from `count` on may be omitted.
    pub fn optional_from(&self, count: usize) -> bool {
        self.arg_types
            .iter()
            .skip(count)
            .all(|t| t.contains(ValueType::NUL))
    }

    /// Reject a missing argument at a position that is not optional.
    pub fn validate(&self, args: &[Value]) -> Result<()> {
        for (i, arg) in args.iter().enumerate() {
            if arg.is_null() && !self.arg_type(i).contains(ValueType::NUL) {
                return Err(ExprError::InvalidArgumentType {
                    name: self.name.to_string(),
                    position: i + 1,
                });
            }
        }

        match &self.kind {
            FunctionKind::Object(obj) => obj.validate(args),
            _ => Ok(()),
        }
    }

    /// Invoke a native function. User functions are run by the executor.
    pub fn call_native(&self, ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        match &self.kind {
            FunctionKind::Proc(proc) => proc(ctx, args),
            FunctionKind::Object(obj) => obj.call(ctx, args),
            FunctionKind::User { .. } => Err(ExprError::Other(format!(
                "'{}' is a user function",
                self.name
            ))),
        }
    }

    pub fn compiled(&self) -> Option<Rc<Program>> {
        self.compiled.borrow().clone()
    }

    pub fn set_compiled(&self, program: Rc<Program>) {
        *self.compiled.borrow_mut() = Some(program);
    }

    /// Drop the cached program.
    pub fn reset(&self) {
        self.compiled.borrow_mut().take();
    }

    /// Display form: `name(a, b)= body` for user functions, `name(r, ri)` otherwise.
    pub fn signature(&self) -> String {
        match &self.kind {
            FunctionKind::User { params, body } => {
                let params: Vec<&str> = params.iter().map(|p| p.as_str()).collect();
                format!("{}({})= {}", self.name, params.join(", "), body)
            }
            _ => {
                let mut parts: Vec<String> = self.arg_types.iter().map(|t| type_letters(*t)).collect();
                if self.variable_args {
                    parts.push("...".to_string());
                }
                format!("{}({})", self.name, parts.join(", "))
            }
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

fn type_letters(mask: ValueType) -> String {
    let mut s = String::new();
    for (bit, letter) in [
        (ValueType::BOOLEAN, 'b'),
        (ValueType::INTEGER, 'i'),
        (ValueType::REAL, 'r'),
        (ValueType::STRING, 's'),
        (ValueType::NUL, 'n'),
    ] {
        if mask.contains(bit) {
            s.push(letter);
        }
    }
    s
}

/// Parse an argument signature into per-position masks and the variadic flag.
pub fn parse_arg_types(signature: &str) -> Result<(Vec<ValueType>, bool)> {
    let mut types = Vec::new();
    let mut variable_args = false;

    for part in signature.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if variable_args {
            // `...` must be the last entry.
            return Err(ExprError::InvalidArgumentSpec('.'));
        }
        if part == "..." {
            variable_args = true;
            continue;
        }

        let mut mask = ValueType::empty();
        for c in part.chars() {
            mask |= match c {
                'b' => ValueType::BOOLEAN,
                'i' => ValueType::INTEGER,
                'r' => ValueType::REAL,
                's' => ValueType::STRING,
                'n' => ValueType::NUL,
                other => return Err(ExprError::InvalidArgumentSpec(other)),
            };
        }
        types.push(mask);
    }

    Ok((types, variable_args))
}

/// Registered functions, in registration order.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: Vec<Rc<Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First function registered under `name`.
    pub fn get(&self, name: &str) -> Option<Rc<Function>> {
        self.functions.iter().find(|f| f.name() == name).cloned()
    }

    /// Every function registered under `name` (the overload set).
    pub fn get_all(&self, name: &str) -> Vec<Rc<Function>> {
        self.functions
            .iter()
            .filter(|f| f.name() == name)
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name() == name)
    }

    fn insert(&mut self, function: Function, replace: bool) -> Rc<Function> {
        if replace {
            self.functions.retain(|f| f.name() != function.name());
        }
        let function = Rc::new(function);
        self.functions.push(function.clone());
        self.reset();
        function
    }

    /// Register a native proc, replacing every function of the same name.
    pub fn add_proc(&mut self, name: &str, signature: &str, proc: NativeProc) -> Result<Rc<Function>> {
        let (types, variable_args) = parse_arg_types(signature)?;
        let function = Function::new(
            function_name(name)?,
            FunctionKind::Proc(proc),
            types,
            variable_args,
        );
        Ok(self.insert(function, true))
    }

    /// Register a native object. It replaces every function of the same name unless it
    /// reports [`FunctionObject::is_overload`], in which case it joins the overload set.
    pub fn add_object(
        &mut self,
        name: &str,
        signature: &str,
        object: Rc<dyn FunctionObject>,
    ) -> Result<Rc<Function>> {
        let (types, variable_args) = parse_arg_types(signature)?;
        let replace = !object.is_overload();
        let function = Function::new(
            function_name(name)?,
            FunctionKind::Object(object),
            types,
            variable_args,
        );
        Ok(self.insert(function, replace))
    }

    /// Register a user function, replacing every function of the same name.
    pub fn add_user(&mut self, name: &str, params: &[&str], body: &str) -> Result<Rc<Function>> {
        let params = params
            .iter()
            .map(|p| {
                if is_valid_variable_name(p) {
                    p.try_into_name()
                } else {
                    Err(ExprError::InvalidVariableName(p.to_string()))
                }
            })
            .collect::<Result<Vec<Name>>>()?;

        let types = alloc::vec![ValueType::ANY; params.len()];
        let function = Function::new(
            function_name(name)?,
            FunctionKind::User {
                params,
                body: body.trim().to_string(),
            },
            types,
            false,
        );
        Ok(self.insert(function, true))
    }

    /// Remove every function registered under `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.functions.len();
        self.functions.retain(|f| f.name() != name);
        let removed = self.functions.len() != before;
        if removed {
            self.reset();
        }
        removed
    }

    /// Distinct names in registration order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for f in &self.functions {
            if !names.iter().any(|n| n == f.name()) {
                names.push(f.name().to_string());
            }
        }
        names
    }

    /// Clear every cached user-function program.
    pub fn reset(&self) {
        for f in &self.functions {
            f.reset();
        }
    }

    /// True if any compiled user function calls `name`.
    pub fn has_reference(&self, name: &str) -> bool {
        self.functions
            .iter()
            .filter_map(|f| f.compiled())
            .any(|program| program.references(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Function>> {
        self.functions.iter()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Register the builtin math table.
    #[cfg(feature = "libm")]
    pub fn register_builtins(&mut self) {
        for (name, signature, f) in builtins::TABLE {
            let Ok((types, variable_args)) = parse_arg_types(signature) else {
                continue;
            };
            let Ok(name) = name.try_into_name() else {
                continue;
            };
            let mut function =
                Function::new(name, FunctionKind::Proc(Rc::new(*f)), types, variable_args);
            function.builtin = true;
            self.insert(function, true);
        }
    }
}

fn function_name(name: &str) -> Result<Name> {
    if !is_valid_variable_name(name) {
        return Err(ExprError::Other(format!("Invalid function name '{}'", name)));
    }
    name.try_into_name()
}

#[cfg(feature = "libm")]
mod builtins {
    use super::*;

    type Builtin = fn(&ExprContext, &[Value]) -> Result<Value>;

    pub(super) const TABLE: &[(&str, &str, Builtin)] = &[
        ("sqrt", "r", sqrt),
        ("exp", "r", exp),
        ("log", "r", log),
        ("log10", "r", log10),
        ("sin", "r", sin),
        ("cos", "r", cos),
        ("tan", "r", tan),
        ("asin", "r", asin),
        ("acos", "r", acos),
        ("atan", "r", atan),
        ("abs", "ri", abs),
    ];

    fn sqrt(_: &ExprContext, args: &[Value]) -> Result<Value> {
        real1(args, libm::sqrt)
    }

    fn exp(_: &ExprContext, args: &[Value]) -> Result<Value> {
        real1(args, libm::exp)
    }

    fn log(_: &ExprContext, args: &[Value]) -> Result<Value> {
        real1(args, libm::log)
    }

    fn log10(_: &ExprContext, args: &[Value]) -> Result<Value> {
        real1(args, libm::log10)
    }

    fn sin(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::sin)
    }

    fn cos(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::cos)
    }

    fn tan(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::tan)
    }

    fn asin(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::asin)
    }

    fn acos(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::acos)
    }

    fn atan(ctx: &ExprContext, args: &[Value]) -> Result<Value> {
        trig(ctx, args, libm::atan)
    }

    fn abs(_: &ExprContext, args: &[Value]) -> Result<Value> {
        match args.first() {
            Some(Value::Integer(i)) => Ok(Value::Integer(i.wrapping_abs())),
            _ => Ok(Value::Real(libm::fabs(arg(args)?))),
        }
    }

    fn arg(args: &[Value]) -> Result<f64> {
        args.first()
            .and_then(Value::as_real)
            .ok_or_else(|| ExprError::InvalidValue("expected a real argument".to_string()))
    }

    fn real1(args: &[Value], f: fn(f64) -> f64) -> Result<Value> {
        Ok(Value::Real(f(arg(args)?)))
    }

    /// The degrees flag converts the input of every trigonometric builtin.
    fn trig(ctx: &ExprContext, args: &[Value], f: fn(f64) -> f64) -> Result<Value> {
        let mut x = arg(args)?;
        if ctx.is_degrees() {
            x = x.to_radians();
        }
        Ok(Value::Real(f(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_types() {
        let (types, var) = parse_arg_types("r, ri, sn").unwrap();
        assert_eq!(
            types,
            alloc::vec![
                ValueType::REAL,
                ValueType::REAL | ValueType::INTEGER,
                ValueType::STRING | ValueType::NUL
            ]
        );
        assert!(!var);

        let (types, var) = parse_arg_types("s, ...").unwrap();
        assert_eq!(types.len(), 1);
        assert!(var);

        assert_eq!(parse_arg_types("").unwrap().0.len(), 0);
        assert_eq!(parse_arg_types("rx"), Err(ExprError::InvalidArgumentSpec('x')));
        assert!(parse_arg_types("..., r").is_err());
    }

    fn proc_returning(v: i64) -> NativeProc {
        Rc::new(move |_, _| Ok(Value::Integer(v)))
    }

    #[test]
    fn test_proc_registration_replaces() {
        let mut reg = FunctionRegistry::new();
        reg.add_proc("f", "i", proc_returning(1)).unwrap();
        reg.add_proc("f", "i, i", proc_returning(2)).unwrap();
        assert_eq!(reg.get_all("f").len(), 1);
        assert_eq!(reg.get("f").unwrap().arity(), 2);
    }

    struct Constant(i64);

    impl FunctionObject for Constant {
        fn call(&self, _ctx: &ExprContext, _args: &[Value]) -> Result<Value> {
            Ok(Value::Integer(self.0))
        }
    }

    struct Overload(i64);

    impl FunctionObject for Overload {
        fn call(&self, _ctx: &ExprContext, _args: &[Value]) -> Result<Value> {
            Ok(Value::Integer(self.0))
        }

        fn is_overload(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_plain_object_replaces_same_name() {
        let mut reg = FunctionRegistry::new();
        reg.add_proc("h", "i", proc_returning(1)).unwrap();
        reg.add_object("h", "i", Rc::new(Overload(2))).unwrap();
        reg.add_object("h", "i", Rc::new(Constant(3))).unwrap();
        let all = reg.get_all("h");
        assert_eq!(all.len(), 1);
        assert!(matches!(all[0].kind(), FunctionKind::Object(_)));
    }

    #[test]
    fn test_objects_accumulate_overloads() {
        let mut reg = FunctionRegistry::new();
        reg.add_object("g", "i", Rc::new(Overload(1))).unwrap();
        reg.add_object("g", "i, i", Rc::new(Overload(2))).unwrap();
        let all = reg.get_all("g");
        assert_eq!(all.len(), 2);
        assert!(all[1].accepts_count(2));
        assert!(!all[1].accepts_count(1));
        assert_eq!(reg.names(), alloc::vec!["g".to_string()]);
        assert!(reg.remove("g"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_signatures() {
        let mut reg = FunctionRegistry::new();
        let user = reg.add_user("f", &["x", "y"], " x + y ").unwrap();
        assert_eq!(user.signature(), "f(x, y)= x + y");
        let var = reg.add_proc("printf", "s, ...", proc_returning(0)).unwrap();
        assert_eq!(var.signature(), "printf(s, ...)");
        assert!(var.accepts_count(3));
        assert!(reg.add_user("h", &["1x"], "1").is_err());
    }

    #[test]
    fn test_optional_arguments() {
        let mut reg = FunctionRegistry::new();
        let f = reg.add_proc("f", "r, rn, rn", proc_returning(0)).unwrap();
        assert!(f.optional_from(1));
        assert!(!f.optional_from(0));
        assert!(f.validate(&[Value::Real(1.0), Value::Null]).is_ok());
        assert!(f.validate(&[Value::Null]).is_err());
    }

    #[test]
    fn test_reset_clears_compiled_programs() {
        let mut reg = FunctionRegistry::new();
        let f = reg.add_user("f", &["x"], "x").unwrap();
        f.set_compiled(Rc::new(Program::default()));
        assert!(f.compiled().is_some());
        reg.add_proc("other", "", proc_returning(0)).unwrap();
        assert!(f.compiled().is_none());
    }

    #[cfg(feature = "libm")]
    #[test]
    fn test_builtins_are_flagged() {
        let mut reg = FunctionRegistry::new();
        reg.register_builtins();
        let sqrt = reg.get("sqrt").unwrap();
        assert!(sqrt.is_builtin());
        assert_eq!(sqrt.arg_types(), &[ValueType::REAL]);
        assert_eq!(
            reg.get("abs").unwrap().arg_types(),
            &[ValueType::REAL | ValueType::INTEGER]
        );
    }
}
