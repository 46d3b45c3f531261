//! Variable registry.
//!
//! Globals live in a flat list keyed by name. User-function calls push a frame holding
//! the call's parameter bindings; lookups search frames innermost first and then the
//! globals, so a parameter shadows a same-named global for the duration of the call and
//! the global is untouched when the frame is popped.

extern crate alloc;

use crate::error::{ExprError, Result};
use crate::types::{Name, TryIntoName};
use crate::value::Value;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Host-side storage for a variable.
///
/// When a variable has an accessor, reads and writes go through it instead of the
/// value stored in the registry.
pub trait VariableAccessor {
    fn get(&self) -> Value;
    fn set(&self, value: Value);
}

/// A named variable.
#[derive(Clone)]
pub struct Variable {
    name: Name,
    value: Value,
    accessor: Option<Rc<dyn VariableAccessor>>,
}

impl Variable {
    pub fn new(name: Name, value: Value) -> Self {
        Self {
            name,
            value,
            accessor: None,
        }
    }

    pub fn with_accessor(name: Name, accessor: Rc<dyn VariableAccessor>) -> Self {
        Self {
            name,
            value: Value::Null,
            accessor: Some(accessor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_accessor(&self) -> bool {
        self.accessor.is_some()
    }

    pub fn value(&self) -> Value {
        match &self.accessor {
            Some(accessor) => accessor.get(),
            None => self.value.clone(),
        }
    }

    pub fn set_value(&mut self, value: Value) {
        match &self.accessor {
            Some(accessor) => accessor.set(value),
            None => self.value = value,
        }
    }
}

impl core::fmt::Debug for Variable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("accessor", &self.accessor.is_some())
            .finish()
    }
}

/// True if `name` starts with a letter or underscore and continues with letters, digits
/// and underscores only.
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(c) if c == b'_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|c| c == b'_' || c.is_ascii_alphanumeric())
}

fn checked_name(name: &str) -> Result<Name> {
    if !is_valid_variable_name(name) {
        return Err(ExprError::InvalidVariableName(name.to_string()));
    }
    name.try_into_name()
}

#[derive(Default, Clone, Debug)]
pub struct VariableRegistry {
    globals: Vec<Variable>,
    frames: Vec<Vec<Variable>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Variable> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(var) = frame.iter_mut().find(|v| v.name() == name) {
                return Some(var);
            }
        }
        self.globals.iter_mut().find(|v| v.name() == name)
    }

    /// Look up a variable, innermost call frame first.
    pub fn find(&self, name: &str) -> Option<&Variable> {
        for frame in self.frames.iter().rev() {
            if let Some(var) = frame.iter().find(|v| v.name() == name) {
                return Some(var);
            }
        }
        self.globals.iter().find(|v| v.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.find(name).map(Variable::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Assign `value` to `name`. A visible binding (frame or global) is updated in place;
    /// otherwise a new global is created.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(var) = self.find_mut(name) {
            var.set_value(value);
            return Ok(());
        }

        let name = checked_name(name)?;
        self.globals.push(Variable::new(name, value));
        Ok(())
    }

    /// Create or update a global, ignoring call frames.
    pub fn create(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(var) = self.globals.iter_mut().find(|v| v.name() == name) {
            var.set_value(value);
            return Ok(());
        }

        let name = checked_name(name)?;
        self.globals.push(Variable::new(name, value));
        Ok(())
    }

    /// Create a global backed by `accessor`, replacing any global of that name.
    pub fn create_accessor(&mut self, name: &str, accessor: Rc<dyn VariableAccessor>) -> Result<()> {
        let name = checked_name(name)?;
        self.globals.retain(|v| v.name() != name.as_str());
        self.globals.push(Variable::with_accessor(name, accessor));
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.globals.len();
        self.globals.retain(|v| v.name() != name);
        self.globals.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.globals.iter().map(|v| v.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Enter a call. Each binding becomes a frame-local variable.
    pub fn push_frame(&mut self, bindings: Vec<(Name, Value)>) {
        let frame = bindings
            .into_iter()
            .map(|(name, value)| Variable::new(name, value))
            .collect();
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    fn name(s: &str) -> Name {
        s.try_into_name().unwrap()
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_variable_name("x"));
        assert!(is_valid_variable_name("_tmp2"));
        assert!(is_valid_variable_name("snake_case"));
        assert!(!is_valid_variable_name("2x"));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("a-b"));
    }

    #[test]
    fn test_create_is_idempotent_by_name() {
        let mut vars = VariableRegistry::new();
        vars.create("x", Value::Integer(1)).unwrap();
        vars.create("x", Value::Integer(2)).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("x"), Some(Value::Integer(2)));
        assert!(matches!(
            vars.create("1x", Value::Integer(0)),
            Err(ExprError::InvalidVariableName(_))
        ));
    }

    #[test]
    fn test_frames_shadow_and_restore() {
        let mut vars = VariableRegistry::new();
        vars.create("x", Value::Integer(10)).unwrap();

        vars.push_frame(alloc::vec![(name("x"), Value::Integer(3))]);
        assert_eq!(vars.get("x"), Some(Value::Integer(3)));
        vars.set("x", Value::Integer(4)).unwrap();
        assert_eq!(vars.get("x"), Some(Value::Integer(4)));

        vars.pop_frame();
        assert_eq!(vars.get("x"), Some(Value::Integer(10)));
        assert_eq!(vars.frame_depth(), 0);
    }

    #[test]
    fn test_set_inside_frame_creates_global() {
        let mut vars = VariableRegistry::new();
        vars.push_frame(alloc::vec![(name("n"), Value::Integer(1))]);
        vars.set("total", Value::Integer(5)).unwrap();
        vars.pop_frame();
        assert_eq!(vars.get("total"), Some(Value::Integer(5)));
        assert_eq!(vars.get("n"), None);
    }

    struct Counter(Cell<i64>);

    impl VariableAccessor for Counter {
        fn get(&self) -> Value {
            Value::Integer(self.0.get())
        }

        fn set(&self, value: Value) {
            self.0.set(value.as_integer().unwrap_or(0));
        }
    }

    #[test]
    fn test_accessor_takes_precedence() {
        let counter = Rc::new(Counter(Cell::new(7)));
        let mut vars = VariableRegistry::new();
        vars.create("c", Value::Integer(1)).unwrap();
        vars.create_accessor("c", counter.clone()).unwrap();

        assert_eq!(vars.get("c"), Some(Value::Integer(7)));
        vars.set("c", Value::Integer(42)).unwrap();
        assert_eq!(counter.0.get(), 42);
        assert!(vars.find("c").unwrap().has_accessor());
    }

    #[test]
    fn test_remove() {
        let mut vars = VariableRegistry::new();
        vars.create("a", Value::Boolean(true)).unwrap();
        assert!(vars.remove("a"));
        assert!(!vars.remove("a"));
        assert!(vars.is_empty());
    }
}
