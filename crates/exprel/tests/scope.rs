//! Variable placement under the two block scoping rules.

use exprel::{BlockScoping, Engine, EngineConfig, EvalErrorKind, Type, Value, Variables};

fn engine(block_scoping: BlockScoping) -> Engine {
    Engine::new(EngineConfig {
        block_scoping,
        ..EngineConfig::default()
    })
}

fn eval_kind(engine: &Engine, src: &str, vars: Option<&Variables>) -> Result<Value, EvalErrorKind> {
    engine.execute(src, &Value::Null, vars).map_err(|e| match e {
        exprel::Error::Evaluation(e) => e.kind,
        other => panic!("{} failed to compile: {}", src, other),
    })
}

#[test]
fn test_block_local_names_vanish() {
    let local = engine(BlockScoping::Local);
    let err = eval_kind(&local, "if (true) { y = 1 }; y", None).unwrap_err();
    assert!(matches!(err, EvalErrorKind::UnresolvableProperty(_)), "{:?}", err);

    let vars = Variables::new();
    assert_eq!(eval_kind(&local, "foreach (i : 3) { last = i }", Some(&vars)), Ok(Value::Void));
    assert!(!vars.contains("last"));
}

#[test]
fn test_promoted_names_reach_caller_variables() {
    let promote = engine(BlockScoping::Promote);
    assert_eq!(eval_kind(&promote, "if (true) { y = 1 }; y", None), Ok(Value::Int(1)));

    let vars = Variables::new();
    assert_eq!(eval_kind(&promote, "foreach (i : 3) { last = i }", Some(&vars)), Ok(Value::Void));
    assert_eq!(vars.get("last"), Some(Value::Int(3)));
}

#[test]
fn test_existing_bindings_are_updated_in_place() {
    for scoping in [BlockScoping::Local, BlockScoping::Promote] {
        let engine = engine(scoping);
        assert_eq!(
            eval_kind(&engine, "x = 1; if (true) { x = 2 }; x", None),
            Ok(Value::Int(2)),
            "{:?}",
            scoping
        );
        let vars = Variables::new().with("count", 0);
        eval_kind(&engine, "while (count < 4) { count++ }", Some(&vars)).unwrap();
        assert_eq!(vars.get("count"), Some(Value::Int(4)));
    }
}

#[test]
fn test_declarations_shadow_outer_names() {
    for scoping in [BlockScoping::Local, BlockScoping::Promote] {
        let engine = engine(scoping);
        assert_eq!(
            eval_kind(&engine, "x = 1; if (true) { int x = 5; x = x + 1 }; x", None),
            Ok(Value::Int(1)),
            "{:?}",
            scoping
        );
        assert_eq!(
            eval_kind(&engine, "i = 100; s = 0; foreach (i : [1, 2]) { s += i }; s * 1000 + i", None),
            Ok(Value::Int(3100)),
            "{:?}",
            scoping
        );
    }
}

#[test]
fn test_function_locals_stay_in_the_call() {
    let vars = Variables::new();
    let promote = engine(BlockScoping::Promote);
    assert_eq!(
        eval_kind(&promote, "def f() { if (true) { z = 3 }; z }; f()", Some(&vars)),
        Ok(Value::Int(3))
    );
    assert!(!vars.contains("z"));

    let local = engine(BlockScoping::Local);
    let err = eval_kind(&local, "def f() { if (true) { z = 3 }; z }; f()", None).unwrap_err();
    assert!(matches!(err, EvalErrorKind::UnresolvableProperty(_)), "{:?}", err);
}

#[test]
fn test_typed_caller_variables_coerce_writes() {
    let engine = engine(BlockScoping::Local);
    let vars = Variables::new();
    vars.declare("n", Type::Int, 1);
    assert_eq!(eval_kind(&engine, "n = '5'; n + 1", Some(&vars)), Ok(Value::Int(6)));
    assert_eq!(vars.get("n"), Some(Value::Int(5)));
    let err = eval_kind(&engine, "n = 'five'", Some(&vars)).unwrap_err();
    assert!(matches!(err, EvalErrorKind::TypeCoercionFailure { .. }), "{:?}", err);
}
