//! Function registration, overload resolution, argument coercion and formula functions.


use expr_vm::{ExprError, Value, VariableAccessor, assert_approx_eq};
use std::cell::Cell;
use std::rc::Rc;
use test_helpers::{Tagged, create_test_context, eval, eval_err, eval_real};

#[cfg(feature = "libm")]
#[test]
fn test_builtin_math() {
    let mut ctx = create_test_context();
    assert_approx_eq!(eval_real(&mut ctx, "sqrt(16)"), 4.0);
    assert_approx_eq!(eval_real(&mut ctx, "exp(0)"), 1.0);
    assert_approx_eq!(eval_real(&mut ctx, "log10(1000)"), 3.0);
    assert_approx_eq!(eval_real(&mut ctx, "sin(0) + cos(0)"), 1.0);
    assert_eq!(eval(&mut ctx, "abs(-3)"), Value::Integer(3));
    assert_eq!(eval(&mut ctx, "abs(-2.5)"), Value::Real(2.5));
}

#[cfg(feature = "libm")]
#[test]
fn test_degrees_flag_converts_trig_input() {
    let mut ctx = create_test_context();
    ctx.set_degrees(true);
    assert_approx_eq!(eval_real(&mut ctx, "sin(90)"), 1.0);
    assert_approx_eq!(eval_real(&mut ctx, "cos(180)"), -1.0);

    ctx.set_degrees(false);
    assert_approx_eq!(eval_real(&mut ctx, "sin(90)"), 90f64.sin());
}

#[cfg(feature = "libm")]
#[test]
fn test_builtin_signatures() {
    let ctx = create_test_context();
    let sqrt = ctx.function("sqrt").unwrap();
    assert!(sqrt.is_builtin());
    assert_eq!(sqrt.signature(), "sqrt(r)");
    assert_eq!(ctx.function("abs").unwrap().signature(), "abs(ir)");
}

#[cfg(feature = "libm")]
#[test]
fn test_fixed_arity_mismatch() {
    let mut ctx = create_test_context();
    assert_eq!(
        eval_err(&mut ctx, "sqrt(1, 2)"),
        ExprError::InvalidFunctionCall {
            name: "sqrt".to_string(),
            expected: 1,
            found: 2
        }
    );
    assert!(matches!(
        eval_err(&mut ctx, "sqrt()"),
        ExprError::InvalidFunctionCall { found: 0, .. }
    ));
}

#[test]
fn test_unknown_function() {
    let mut ctx = create_test_context();
    assert_eq!(
        eval_err(&mut ctx, "missing(1)"),
        ExprError::UnknownFunction {
            name: "missing".to_string()
        }
    );
}

#[test]
fn test_optional_arguments_receive_null() {
    let mut ctx = create_test_context();
    ctx.register_function("scale", "r, in", |_, args| {
        let x = args[0].as_real().unwrap_or(0.0);
        let factor = match &args[1] {
            Value::Null => 10,
            other => other.as_integer().unwrap_or(1),
        };
        Ok(Value::Real(x * factor as f64))
    })
    .unwrap();

    assert_eq!(eval(&mut ctx, "scale(1.5)"), Value::Real(15.0));
    assert_eq!(eval(&mut ctx, "scale(1.5, 2)"), Value::Real(3.0));
    assert!(matches!(
        eval_err(&mut ctx, "scale()"),
        ExprError::InvalidFunctionCall { .. }
    ));
}

#[test]
fn test_variadic_functions() {
    let mut ctx = create_test_context();
    ctx.register_function("sum", "r, ...", |_, args| {
        Ok(Value::Real(args.iter().filter_map(Value::as_real).sum()))
    })
    .unwrap();

    assert_eq!(eval(&mut ctx, "sum(1)"), Value::Real(1.0));
    assert_eq!(eval(&mut ctx, "sum(1, 2, 3.5)"), Value::Real(6.5));
    assert_eq!(
        eval_err(&mut ctx, "sum()"),
        ExprError::TooFewArguments {
            name: "sum".to_string(),
            minimum: 1,
            found: 0
        }
    );
    assert_eq!(ctx.function("sum").unwrap().signature(), "sum(r, ...)");
}

#[test]
fn test_argument_coercion() {
    let mut ctx = create_test_context();
    ctx.register_function("kind", "r", |_, args| {
        Ok(Value::string(args[0].type_name()))
    })
    .unwrap();
    ctx.register_function("flag", "b", |_, args| Ok(args[0].clone()))
        .unwrap();

    assert_eq!(eval(&mut ctx, "kind(3)"), Value::string("real"));
    assert_eq!(eval(&mut ctx, "flag(\"yes\")"), Value::Boolean(true));
    assert_eq!(eval(&mut ctx, "flag(0)"), Value::Boolean(false));
    assert_eq!(
        eval_err(&mut ctx, "flag(\"maybe\")"),
        ExprError::InvalidArgumentType {
            name: "flag".to_string(),
            position: 1
        }
    );
}

#[test]
fn test_native_proc_reads_context() {
    let mut ctx = create_test_context();
    ctx.register_function("degrees", "", |ctx, _| {
        Ok(Value::Boolean(ctx.is_degrees()))
    })
    .unwrap();

    assert_eq!(eval(&mut ctx, "degrees()"), Value::Boolean(false));
    ctx.set_degrees(true);
    assert_eq!(eval(&mut ctx, "degrees()"), Value::Boolean(true));
}

#[test]
fn test_overloads_resolve_by_count() {
    let mut ctx = create_test_context();
    let one = Tagged::overload(1);
    let two = Tagged::overload(2);
    ctx.register_object("g", "i", one.clone()).unwrap();
    ctx.register_object("g", "i, i", two.clone()).unwrap();

    assert_eq!(ctx.functions_named("g").len(), 2);
    assert_eq!(eval(&mut ctx, "g(1)"), Value::Integer(1));
    assert_eq!(eval(&mut ctx, "g(1, 2)"), Value::Integer(2));
    assert_eq!(*one.calls.borrow(), 1);
    assert_eq!(*two.calls.borrow(), 1);

    // No candidate takes three: the last one is checked and rejects the call.
    assert_eq!(
        eval_err(&mut ctx, "g(1, 2, 3)"),
        ExprError::InvalidFunctionCall {
            name: "g".to_string(),
            expected: 2,
            found: 3
        }
    );
}

#[test]
fn test_object_replaces_existing_function() {
    let mut ctx = create_test_context();
    ctx.register_function("twice", "i", |_, args| {
        Ok(Value::Integer(args[0].as_integer().unwrap_or(0) * 2))
    })
    .unwrap();
    let tagged = Tagged::new(999);
    ctx.register_object("twice", "i", tagged.clone()).unwrap();

    assert_eq!(ctx.functions_named("twice").len(), 1);
    assert_eq!(eval(&mut ctx, "twice(4)"), Value::Integer(999));
    assert_eq!(*tagged.calls.borrow(), 1);
}

#[cfg(feature = "libm")]
#[test]
fn test_object_overrides_builtin() {
    let mut ctx = create_test_context();
    ctx.register_object("sqrt", "r", Tagged::new(999)).unwrap();
    assert_eq!(ctx.functions_named("sqrt").len(), 1);
    assert_eq!(eval(&mut ctx, "sqrt(4)"), Value::Integer(999));
}

struct RangeCheck;

impl expr_vm::FunctionObject for RangeCheck {
    fn call(&self, _ctx: &expr_vm::ExprContext, args: &[Value]) -> expr_vm::Result<Value> {
        Ok(args[0].clone())
    }

    fn validate(&self, args: &[Value]) -> expr_vm::Result<()> {
        match args[0].as_integer() {
            Some(i) if (0..10).contains(&i) => Ok(()),
            _ => Err(ExprError::InvalidValue("digit out of range".to_string())),
        }
    }
}

#[test]
fn test_object_validation_runs_before_call() {
    let mut ctx = create_test_context();
    ctx.register_object("digit", "i", Rc::new(RangeCheck)).unwrap();
    assert_eq!(eval(&mut ctx, "digit(7)"), Value::Integer(7));
    assert!(matches!(
        eval_err(&mut ctx, "digit(12)"),
        ExprError::InvalidValue(_)
    ));
}

#[test]
fn test_registration_errors() {
    let mut ctx = create_test_context();
    assert_eq!(
        ctx.register_function("f", "rq", |_, _| Ok(Value::Null)),
        Err(ExprError::InvalidArgumentSpec('q'))
    );
    assert!(ctx.register_user_function("2f", &["x"], "x").is_err());
    assert!(ctx.register_user_function("f", &["bad name"], "1").is_err());
    assert!(ctx.define_function("no definition here").is_err());
}

struct Sensor {
    reading: Cell<i64>,
}

impl VariableAccessor for Sensor {
    fn get(&self) -> Value {
        Value::Integer(self.reading.get())
    }

    fn set(&self, value: Value) {
        self.reading.set(value.as_integer().unwrap_or(0));
    }
}

#[test]
fn test_accessor_variables() {
    let mut ctx = create_test_context();
    let sensor = Rc::new(Sensor {
        reading: Cell::new(20),
    });
    ctx.create_accessor_variable("temp", sensor.clone()).unwrap();

    assert_eq!(eval(&mut ctx, "temp + 1"), Value::Integer(21));
    sensor.reading.set(25);
    assert_eq!(ctx.variable("temp"), Some(Value::Integer(25)));

    eval(&mut ctx, "temp = 40");
    assert_eq!(sensor.reading.get(), 40);
}

#[test]
fn test_recursive_formula_restores_globals() {
    let mut ctx = create_test_context();
    ctx.define_function("fact(x) = x <= 1 ? 1 : x * fact(x - 1)")
        .unwrap();
    ctx.create_integer_variable("x", 100).unwrap();

    assert_eq!(eval(&mut ctx, "fact(5)"), Value::Integer(120));
    assert_eq!(eval(&mut ctx, "fact(10) / fact(8)"), Value::Integer(90));
    assert_eq!(ctx.variable("x"), Some(Value::Integer(100)));
}

#[test]
fn test_deep_recursion_is_unbounded_by_default() {
    // Nested calls run on the host stack, so give this thread room.
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mut ctx = create_test_context();
            ctx.define_function("sum(n) = n <= 0 ? 0 : n + sum(n - 1)")
                .unwrap();
            assert_eq!(ctx.max_call_depth(), None);
            assert_eq!(eval(&mut ctx, "sum(200)"), Value::Integer(20100));
            assert_eq!(eval(&mut ctx, "sum(1000)"), Value::Integer(500500));
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn test_call_depth_limit_is_configurable() {
    let mut ctx = create_test_context();
    ctx.define_function("sum(n) = n <= 0 ? 0 : n + sum(n - 1)")
        .unwrap();
    ctx.set_max_call_depth(Some(50));

    assert_eq!(eval(&mut ctx, "sum(20)"), Value::Integer(210));
    assert!(matches!(eval_err(&mut ctx, "sum(200)"), ExprError::Other(_)));

    ctx.set_max_call_depth(None);
    assert_eq!(eval(&mut ctx, "sum(60)"), Value::Integer(1830));
}

#[test]
fn test_recursive_formula_is_freed_with_context() {
    let mut ctx = create_test_context();
    ctx.define_function("fact(n) = n <= 1 ? 1 : n * fact(n - 1)")
        .unwrap();
    assert_eq!(eval(&mut ctx, "fact(3)"), Value::Integer(6));
    assert!(ctx.has_function_reference("fact"));

    let fact = Rc::downgrade(&ctx.function("fact").unwrap());
    drop(ctx);
    assert!(fact.upgrade().is_none());
}

#[test]
fn test_held_program_sees_removed_function() {
    let mut ctx = create_test_context();
    ctx.define_function("sq(x) = x * x").unwrap();
    let program = ctx.compile_text("sq(3) + 1").unwrap();
    assert_eq!(ctx.execute(&program), Ok(Value::Integer(10)));

    assert!(ctx.remove_function("sq"));
    assert_eq!(
        ctx.execute(&program),
        Err(ExprError::UnknownFunction {
            name: "sq".to_string()
        })
    );
}

#[test]
fn test_formula_parameters_are_scoped() {
    let mut ctx = create_test_context();
    ctx.define_function("remember(v) = last = v * 2").unwrap();

    assert_eq!(eval(&mut ctx, "remember(7)"), Value::Integer(14));
    assert_eq!(ctx.variable("last"), Some(Value::Integer(14)));
    assert_eq!(ctx.variable("v"), None);
}

#[test]
fn test_formula_compiles_lazily() {
    let mut ctx = create_test_context();
    // The body is only checked on first call.
    ctx.define_function("broken(x) = x +").unwrap();
    assert!(matches!(
        eval_err(&mut ctx, "broken(1)"),
        ExprError::Syntax(_)
    ));

    ctx.define_function("later(x) = helper(x) + 1").unwrap();
    ctx.define_function("helper(x) = x * 10").unwrap();
    assert_eq!(eval(&mut ctx, "later(2)"), Value::Integer(21));
}

#[test]
fn test_function_references_track_compiled_bodies() {
    let mut ctx = create_test_context();
    ctx.define_function("sq(x) = x * x").unwrap();
    ctx.define_function("f(x) = sq(x) + 1").unwrap();

    assert!(!ctx.has_function_reference("sq"));
    assert_eq!(eval(&mut ctx, "f(3)"), Value::Integer(10));
    assert!(ctx.has_function_reference("sq"));

    ctx.reset_functions();
    assert!(!ctx.has_function_reference("sq"));
}

#[test]
fn test_registry_changes_invalidate_compiled_bodies() {
    let mut ctx = create_test_context();
    ctx.define_function("sq(x) = x * x").unwrap();
    ctx.define_function("f(x) = sq(x) + 1").unwrap();
    assert_eq!(eval(&mut ctx, "f(3)"), Value::Integer(10));

    ctx.define_function("sq(x) = x * x * x").unwrap();
    assert_eq!(eval(&mut ctx, "f(3)"), Value::Integer(28));

    assert!(ctx.remove_function("sq"));
    assert_eq!(
        eval_err(&mut ctx, "f(3)"),
        ExprError::UnknownFunction {
            name: "sq".to_string()
        }
    );
    assert!(!ctx.remove_function("sq"));
}

#[test]
fn test_function_listing() {
    let mut ctx = expr_vm::ExprContext::empty();
    ctx.set_quiet(true);
    ctx.define_function("a(x) = x").unwrap();
    ctx.register_function("b", "", |_, _| Ok(Value::Integer(0)))
        .unwrap();
    ctx.define_function("a(x, y) = x + y").unwrap();

    assert_eq!(ctx.function_names(), vec!["b", "a"]);
    assert_eq!(ctx.functions().len(), 2);
    assert_eq!(
        ctx.function("a").unwrap().signature(),
        "a(x, y)= x + y"
    );
    assert!(ctx.function("a").unwrap().is_user());
}
