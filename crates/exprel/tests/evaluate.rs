//! End-to-end evaluation through the public API.
//!
//! Every `check` runs the program interpreted once and accelerated three
//! times so cached sites are exercised on the later calls.

use exprel::{
    ClassDef, CompileErrorKind, CompileOptions, Engine, EngineConfig, EvalErrorKind, EvalOptions,
    Type, Value, Variables,
};
use std::sync::Arc;

fn person_class() -> Arc<ClassDef> {
    ClassDef::builder("Person")
        .field("name", Type::Str)
        .field("age", Type::Int)
        .field_constructor()
        .method("greet", vec![Type::Str], Type::Str, |this, args| {
            let name = this.as_object().and_then(|o| o.get_field("name")).unwrap_or_default();
            Ok(Value::from(format!("{} greets {}", name, args[0])))
        })
        .method("greet", vec![Type::Int], Type::Str, |_, args| {
            Ok(Value::from(format!("greets {} people", args[0])))
        })
        .method("greet", vec![Type::Float], Type::Str, |_, args| {
            Ok(Value::from(format!("greets {} of a person", args[0])))
        })
        .build()
}

fn engine() -> Engine {
    Engine::default().with_class(person_class())
}

fn run(src: &str, ctx: &Value, interpret: bool) -> Result<Value, exprel::Error> {
    let engine = engine();
    let compiled = engine.compile(src, &CompileOptions::default())?;
    let options = EvalOptions {
        interpret,
        ..EvalOptions::default()
    };
    Ok(compiled.evaluate_with(ctx, &Value::Null, None, &options)?)
}

fn check_ctx(src: &str, ctx: &Value, expected: Value) {
    let engine = engine();
    let compiled = engine
        .compile(src, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("compile({}) failed: {}", src, e));
    let interpreted = EvalOptions {
        interpret: true,
        ..EvalOptions::default()
    };
    let result = compiled
        .evaluate_with(ctx, &Value::Null, None, &interpreted)
        .unwrap_or_else(|e| panic!("interpreted {} failed: {}", src, e));
    assert_eq!(result, expected, "interpreted: {}", src);
    for round in 0..3 {
        let result = compiled
            .evaluate(ctx, &Value::Null, None)
            .unwrap_or_else(|e| panic!("{} failed on round {}: {}", src, round, e));
        assert_eq!(result, expected, "accelerated round {}: {}", round, src);
    }
}

fn check(src: &str, expected: Value) {
    check_ctx(src, &Value::Null, expected);
}

fn check_err(src: &str) -> EvalErrorKind {
    let accelerated = run(src, &Value::Null, false);
    let interpreted = run(src, &Value::Null, true);
    assert_eq!(accelerated, interpreted, "modes disagree on {}", src);
    match accelerated {
        Err(exprel::Error::Evaluation(e)) => e.kind,
        other => panic!("expected an evaluation error for {}, got {:?}", src, other),
    }
}

fn compile_err(src: &str) -> CompileErrorKind {
    match engine().compile(src, &CompileOptions::default()) {
        Err(e) => e.kind,
        Ok(_) => panic!("expected a compile error for {}", src),
    }
}

// ---------------------------------------------------------------- Operators

#[test]
fn test_precedence() {
    check("1 + 2 * 3", Value::Int(7));
    check("(1 + 2) * 3", Value::Int(9));
    check("1 + 2 * 3 == 7", Value::Bool(true));
    check("2 ** 3 ** 2", Value::Int(512));
    check("10 - 4 - 3", Value::Int(3));
    check("7 % 4 * 2", Value::Int(6));
    check("1 << 2 + 1", Value::Int(8));
    check("6 & 3 | 8", Value::Int(10));
    check("-2 + 5", Value::Int(3));
    check("1 + 2.5", Value::Float(3.5));
    check("'a' + 1 + 2", Value::from("a12"));
}

#[test]
fn test_short_circuit() {
    check("true || undefinedVar", Value::Bool(true));
    check("false && undefinedVar", Value::Bool(false));
    check("false || 1 < 2 && 2 < 3", Value::Bool(true));
    check("!(1 > 2)", Value::Bool(true));
    assert!(matches!(
        check_err("false || undefinedVar"),
        EvalErrorKind::UnresolvableProperty(_)
    ));
}

#[test]
fn test_ternary_and_empty() {
    let ctx = Value::from_pairs([("n", Value::Int(5)), ("s", Value::from(""))]);
    check_ctx("n > 3 ? 'big' : 'small'", &ctx, Value::from("big"));
    check_ctx("n > 9 ? 'big' : n > 4 ? 'mid' : 'small'", &ctx, Value::from("mid"));
    check_ctx("s == empty", &ctx, Value::Bool(true));
    check_ctx("n != empty", &ctx, Value::Bool(true));
    check("[] == empty", Value::Bool(true));
    check("null == empty", Value::Bool(true));
    check("empty", Value::Null);
}

#[test]
fn test_regex_match() {
    check("'abc' ~= 'a.c'", Value::Bool(true));
    check("'abcd' ~= 'a.c'", Value::Bool(false));
    let ctx = Value::from_pairs([("pattern", Value::from("[0-9]+")), ("code", Value::from("2024"))]);
    check_ctx("code ~= pattern", &ctx, Value::Bool(true));
    check("null ~= '.*'", Value::Bool(false));
    assert_eq!(compile_err("x ~= '(unclosed'"), CompileErrorKind::InvalidRegex);
}

#[test]
fn test_word_operators() {
    check("[1, 2, 3] contains 2", Value::Bool(true));
    check("'haystack' contains 'st'", Value::Bool(true));
    check("'text' instanceof String", Value::Bool(true));
    check("new Person('Ada', 36) is Person", Value::Bool(true));
    check("5 instanceof String", Value::Bool(false));
}

// ------------------------------------------------------------------ Variables

#[test]
fn test_assignment_sequence() {
    check("a = 5; b = a + 1; b", Value::Int(6));
    check("x = 1; x += 4; x *= 3; x", Value::Int(15));
    check("i = 1; j = i++; j * 10 + i", Value::Int(12));
    check("i = 1; j = ++i; j * 10 + i", Value::Int(22));
    check("int n = '42'; n + 1", Value::Int(43));
    check("double d = 1; d", Value::Float(1.0));
    check("String s; s == null", Value::Bool(true));
    check("var v = [1, 2]; v.size()", Value::Int(2));
    check("m = -9223372036854775808; m", Value::Int(i64::MIN));
}

#[test]
fn test_foreach_total_in_caller_variables() {
    let engine = engine();
    let vars = Variables::new().with("total", 0);
    let result = engine.execute("foreach (i : [1, 2, 3]) { total = total + i }", &Value::Null, Some(&vars));
    assert_eq!(result, Ok(Value::Void));
    assert_eq!(vars.get("total"), Some(Value::Int(6)));
}

#[test]
fn test_context_properties() {
    let ctx = Value::from_pairs([
        ("order", Value::from_pairs([
            ("lines", Value::list(vec![
                Value::from_pairs([("qty", Value::Int(2)), ("price", Value::Float(1.5))]),
                Value::from_pairs([("qty", Value::Int(1)), ("price", Value::Float(4.0))]),
            ])),
            ("customer", Value::Null),
        ])),
    ]);
    check_ctx("order.lines[0].qty * order.lines[0].price", &ctx, Value::Float(3.0));
    check_ctx("order.lines.size()", &ctx, Value::Int(2));
    check_ctx("order.customer?.name", &ctx, Value::Null);
    check_ctx("order['lines'][1]['price']", &ctx, Value::Float(4.0));
}

// ---------------------------------------------------------------- Statements

#[test]
fn test_if_chain() {
    let src = "if (n < 0) { 'neg' } else if (n == 0) { 'zero' } else { 'pos' }";
    for (n, expected) in [(-3, "neg"), (0, "zero"), (7, "pos")] {
        let ctx = Value::from_pairs([("n", Value::Int(n))]);
        check_ctx(src, &ctx, Value::from(expected));
    }
    check("if (false) { 1 }", Value::Void);
}

#[test]
fn test_loops() {
    check("s = 0; foreach (i : 4) { s += i }; s", Value::Int(10));
    check("c = 0; foreach (ch : 'abc') { c++ }; c", Value::Int(3));
    check("k = ''; for (key : ['x': 1, 'y': 2]) { k += key }; k", Value::from("xy"));
    check("t = 0; for (int i = 0; i < 5; i++) { t += i }; t", Value::Int(10));
    check("i = 0; while (i < 3) { i++ }; i", Value::Int(3));
    check("i = 0; until (i >= 4) { i++ }; i", Value::Int(4));
    check("i = 10; do { i++ } while (i < 5); i", Value::Int(11));
    check("i = 0; do { i += 2 } until (i > 5); i", Value::Int(6));
    check("n = 0; foreach (x : null) { n++ }; n", Value::Int(0));
}

#[test]
fn test_large_range_stops_at_return() {
    check("x = 0; foreach (i : 400000000) { x = i; return x }", Value::Int(1));
    check(
        "def first_over(limit) { foreach (i : 9223372036854775807) { if (i > limit) { return i } } }; first_over(3)",
        Value::Int(4),
    );
}

#[test]
fn test_inline_collections() {
    check("[1, 2, 3].size()", Value::Int(3));
    check("['a': 1, 'b': 2].b", Value::Int(2));
    check("m = [:]; m.k = 'v'; m.k", Value::from("v"));
    check("{1, 2, 3}.length", Value::Int(3));
    check("list = new ArrayList(); list.add(1); list.add(2); list.size()", Value::Int(2));
}

#[test]
fn test_functions() {
    check("def add(a, b) { a + b }; add(2, 3)", Value::Int(5));
    check(
        "def fact(n) { if (n <= 1) { return 1 }; n * fact(n - 1) }; fact(6)",
        Value::Int(720),
    );
    check(
        "def sign(int n) { if (n < 0) { return -1 } else if (n == 0) { return 0 }; 1 }; sign('-8')",
        Value::Int(-1),
    );
    check("base = 10; function plus(x) { base + x }; plus(5)", Value::Int(15));
    assert!(matches!(
        check_err("def f(a) { a }; f(1, 2)"),
        EvalErrorKind::InvocationFailure { .. }
    ));
}

#[test]
fn test_recursion_limit() {
    let engine = Engine::new(EngineConfig {
        max_call_depth: 16,
        ..EngineConfig::default()
    });
    let err = engine
        .execute("def down(n) { down(n + 1) }; down(0)", &Value::Null, None)
        .unwrap_err();
    match err {
        exprel::Error::Evaluation(e) => assert_eq!(e.kind, EvalErrorKind::StackOverflow(16)),
        other => panic!("expected a stack overflow, got {}", other),
    }
    let counted = engine.execute(
        "def count(n) { n == 0 ? 0 : 1 + count(n - 1) }; count(10)",
        &Value::Null,
        None,
    );
    assert_eq!(counted, Ok(Value::Int(10)));
}

#[test]
fn test_return_at_top_level() {
    check("x = 1; if (x == 1) { return 'early' }; 'late'", Value::from("early"));
}

// ------------------------------------------------------------- Host objects

#[test]
fn test_new_and_with() {
    check("p = new Person('Ada', 36); p.name", Value::from("Ada"));
    check(
        "p = new Person('Ada', 36); with (p) { name = 'Grace', age = age + 1 }; p.name + ' ' + p.age",
        Value::from("Grace 37"),
    );
    check("with (new Person('Ada', 1)) { age = 2 }.age", Value::Int(2));
}

#[test]
fn test_overload_resolution() {
    check("new Person('Ada', 36).greet('Bob')", Value::from("Ada greets Bob"));
    check("new Person('Ada', 36).greet(3)", Value::from("greets 3 people"));
    check("new Person('Ada', 36).greet(0.5)", Value::from("greets 0.5 of a person"));
    check("Math.max(1, 2)", Value::Int(2));
    check("Math.max(1, 2.5)", Value::Float(2.5));
    check("Math.abs(-3)", Value::Int(3));
    check("'abc'.toUpperCase()", Value::from("ABC"));
    assert!(matches!(
        check_err("'abc'.noSuchMethod()"),
        EvalErrorKind::InvocationFailure { .. }
    ));
}

#[test]
fn test_import() {
    check("import java.lang.Math; Math.min(4, 3)", Value::Int(3));
    assert_eq!(compile_err("import Unknown"), CompileErrorKind::UnresolvedType);
}

// ------------------------------------------------------------------- Errors

#[test]
fn test_evaluation_errors() {
    assert!(matches!(check_err("1 / 0"), EvalErrorKind::Arithmetic(_)));
    assert!(matches!(check_err("missing.field"), EvalErrorKind::UnresolvableProperty(_)));
    assert!(matches!(check_err("p = null; p.name"), EvalErrorKind::NullReference(_)));
    assert!(matches!(check_err("if (1) { 2 }"), EvalErrorKind::NonBooleanCondition(_)));
    assert_eq!(
        check_err("assert 1 == 2"),
        EvalErrorKind::AssertionFailed("1 == 2".into())
    );
    assert_eq!(
        check_err("[1, 2][5]"),
        EvalErrorKind::IndexOutOfBounds { index: 5, len: 2 }
    );
    assert!(matches!(check_err("1 - 'a'"), EvalErrorKind::InvalidOperation { .. }));
    assert!(matches!(check_err("int n = 'abc'"), EvalErrorKind::TypeCoercionFailure { .. }));
}

#[test]
fn test_compile_errors() {
    assert_eq!(compile_err("(1 + 2"), CompileErrorKind::Unbalanced);
    assert_eq!(compile_err("'open"), CompileErrorKind::Unbalanced);
    assert_eq!(compile_err("1 +"), CompileErrorKind::Syntax);
    assert_eq!(compile_err("x = if"), CompileErrorKind::ReservedWord);
    assert_eq!(compile_err("var null = 1"), CompileErrorKind::ReservedWord);
    assert_eq!(compile_err("def if() { 1 }"), CompileErrorKind::ReservedWord);
    assert_eq!(compile_err("int x = 1; String x = 'a'"), CompileErrorKind::Redeclaration);
}

#[test]
fn test_error_location() {
    let engine = engine();
    let src = "a = 1;\nb = null;\nb.c";
    let options = CompileOptions::new().debug_symbols(Some("rules.ex"));
    let compiled = engine.compile(src, &options).unwrap();
    let err = compiled.evaluate(&Value::Null, &Value::Null, None).unwrap_err();
    assert!(matches!(err.kind, EvalErrorKind::NullReference(_)));
    assert_eq!(err.line, Some(3));
    assert_eq!(err.source_name.as_deref(), Some("rules.ex"));
    assert_eq!(err.offset, src.find("b.c").unwrap());
    let rendered = err.render(src);
    assert!(rendered.contains('^'), "got: {}", rendered);

    let err = engine.compile("x = (1 +\n 2", &options).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Unbalanced);
    assert_eq!(err.line, 1);
}

/// Records `(line, x)` for every statement.
#[derive(Default)]
struct Recorder {
    events: std::cell::RefCell<Vec<(usize, Option<Value>)>>,
    names: std::cell::RefCell<Vec<Option<String>>>,
}

impl exprel::StepHook for Recorder {
    fn on_statement(&self, event: &exprel::StepEvent<'_>) {
        self.events.borrow_mut().push((event.line, event.lookup("x")));
        self.names.borrow_mut().push(event.source_name.map(str::to_string));
    }
}

#[test]
fn test_step_hook_sees_each_statement() {
    let engine = engine();
    let src = "x = 1;\nif (x == 1) {\n  x = 2\n}\nx";
    let options = CompileOptions::new().debug_symbols(Some("steps.ex"));
    let compiled = engine.compile(src, &options).unwrap();
    for interpret in [true, false] {
        let recorder = Recorder::default();
        let eval_options = EvalOptions {
            hook: Some(&recorder),
            interpret,
        };
        let result = compiled.evaluate_with(&Value::Null, &Value::Null, None, &eval_options);
        assert_eq!(result, Ok(Value::Int(2)));
        assert_eq!(
            *recorder.events.borrow(),
            vec![
                (1, None),
                (2, Some(Value::Int(1))),
                (3, Some(Value::Int(1))),
                (5, Some(Value::Int(2))),
            ],
            "interpret: {}",
            interpret
        );
        assert!(recorder
            .names
            .borrow()
            .iter()
            .all(|n| n.as_deref() == Some("steps.ex")));
    }

    // Without debug symbols there are no lines to report.
    let plain = engine.compile(src, &CompileOptions::default()).unwrap();
    let recorder = Recorder::default();
    let eval_options = EvalOptions {
        hook: Some(&recorder),
        interpret: false,
    };
    plain
        .evaluate_with(&Value::Null, &Value::Null, None, &eval_options)
        .unwrap();
    assert!(recorder.events.borrow().is_empty());
}

#[test]
fn test_strict_typing() {
    let engine = engine();
    let options = CompileOptions::new()
        .strict()
        .input("p", Type::object("Person"));
    let compiled = engine.compile("p.age + 1", &options).unwrap();
    assert_eq!(compiled.egress_type(), &Type::Int);
    let person = engine
        .execute("new Person('Ada', 36)", &Value::Null, None)
        .unwrap();
    let ctx = Value::from_pairs([("p", person)]);
    assert_eq!(compiled.evaluate(&ctx, &Value::Null, None), Ok(Value::Int(37)));

    let err = engine.compile("p.height", &options).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
    let err = engine.compile("q.name", &options).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnresolvedType);
    // Without strict typing the same programs compile.
    assert!(engine.compile("p.height", &CompileOptions::new().verify()).is_ok());
}

#[test]
fn test_this_ref() {
    let engine = engine();
    let compiled = engine.compile("this.name + '!'", &CompileOptions::default()).unwrap();
    let person = engine.execute("new Person('Ada', 1)", &Value::Null, None).unwrap();
    assert_eq!(
        compiled.evaluate(&Value::Null, &person, None),
        Ok(Value::from("Ada!"))
    );
    // Bare names fall back to members of `this`.
    let compiled = engine.compile("age * 2", &CompileOptions::default()).unwrap();
    assert_eq!(compiled.evaluate(&Value::Null, &person, None), Ok(Value::Int(2)));
}

#[test]
fn test_free_functions_share_the_global_engine() {
    let ctx = Value::from_pairs([("x", Value::Int(4))]);
    assert_eq!(exprel::eval("x * x", &ctx, None), Ok(Value::Int(16)));
    let compiled = exprel::compile("x + 1", &CompileOptions::default()).unwrap();
    assert_eq!(exprel::evaluate(&compiled, &ctx, &Value::Null, None), Ok(Value::Int(5)));

    let target = Value::from_pairs([("cfg", Value::from_pairs([("level", Value::Int(1))]))]);
    let setter = exprel::compile_set_expression("cfg.level").unwrap();
    assert_eq!(
        exprel::execute_set_expression(&setter, &target, None, Value::Int(3)),
        Ok(Value::Int(3))
    );
    assert_eq!(exprel::eval("cfg.level", &target, None), Ok(Value::Int(3)));
}
