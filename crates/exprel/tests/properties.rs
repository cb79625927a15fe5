//! Property tests: evaluation modes and constant folding agree.

use exprel::{CompileOptions, Engine, EngineConfig, EvalErrorKind, EvalOptions, OptimizerMode, Value};
use proptest::prelude::*;

const OPS: &[&str] = &["+", "-", "*", "/", "%", "<", ">=", "==", "!="];

/// An arithmetic expression over `v0..vN` together with the operand values.
#[derive(Debug, Clone)]
struct Arith {
    values: Vec<i64>,
    ops: Vec<&'static str>,
    grouped: bool,
}

impl Arith {
    fn render(&self, operand: impl Fn(usize, i64) -> String) -> String {
        let mut out = operand(0, self.values[0]);
        for (i, op) in self.ops.iter().enumerate() {
            let rhs = operand(i + 1, self.values[i + 1]);
            out = if self.grouped && i % 2 == 1 {
                format!("({} {} {})", out, op, rhs)
            } else {
                format!("{} {} {}", out, op, rhs)
            };
        }
        out
    }

    fn with_literals(&self) -> String {
        self.render(|_, v| format!("({})", v))
    }

    fn with_variables(&self) -> String {
        self.render(|i, _| format!("v{}", i))
    }

    fn context(&self) -> Value {
        Value::from_pairs(
            self.values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("v{}", i), Value::Int(*v))),
        )
    }
}

fn arith() -> impl Strategy<Value = Arith> {
    (2usize..6)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(-50i64..50, n),
                prop::collection::vec(prop::sample::select(OPS), n - 1),
                any::<bool>(),
            )
        })
        .prop_map(|(values, ops, grouped)| Arith { values, ops, grouped })
}

fn outcome(engine: &Engine, src: &str, ctx: &Value, interpret: bool) -> Result<Value, EvalErrorKind> {
    let compiled = engine
        .compile(src, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("{} failed to compile: {}", src, e));
    let options = EvalOptions {
        interpret,
        ..EvalOptions::default()
    };
    compiled
        .evaluate_with(ctx, &Value::Null, None, &options)
        .map_err(|e| e.kind)
}

fn hot_engine(optimizer: OptimizerMode) -> Engine {
    Engine::new(EngineConfig {
        optimizer,
        tenuring_threshold: 0,
        time_span_ms: 60_000,
        ..EngineConfig::default()
    })
}

proptest! {
    #[test]
    fn folded_literals_match_runtime_operands(expr in arith()) {
        let engine = Engine::default();
        let folded = outcome(&engine, &expr.with_literals(), &Value::Null, true);
        let runtime = outcome(&engine, &expr.with_variables(), &expr.context(), true);
        prop_assert_eq!(folded, runtime);
    }

    #[test]
    fn accelerated_matches_interpreted(expr in arith()) {
        let src = expr.with_variables();
        let ctx = expr.context();
        for mode in [OptimizerMode::Safe, OptimizerMode::Specializing, OptimizerMode::Dynamic] {
            let engine = hot_engine(mode);
            let compiled = engine.compile(&src, &CompileOptions::default()).unwrap();
            let interpreted = EvalOptions { interpret: true, ..EvalOptions::default() };
            let expected = compiled
                .evaluate_with(&ctx, &Value::Null, None, &interpreted)
                .map_err(|e| e.kind);
            for _ in 0..3 {
                let accelerated = compiled.evaluate(&ctx, &Value::Null, None).map_err(|e| e.kind);
                prop_assert_eq!(&accelerated, &expected);
            }
        }
    }

    #[test]
    fn evaluation_is_deterministic(values in prop::collection::vec(-1000i64..1000, 1..8)) {
        let engine = Engine::default();
        let src = "total = 0; foreach (n : items) { if (n % 2 == 0) { total += n } else { total -= 1 } }; total";
        let ctx = Value::from_pairs([(
            "items",
            Value::list(values.iter().copied().map(Value::Int).collect()),
        )]);
        let expected: i64 = values.iter().map(|n| if n % 2 == 0 { *n } else { -1 }).sum();
        for _ in 0..3 {
            let vars = exprel::Variables::new();
            let result = engine.execute(src, &ctx, Some(&vars));
            prop_assert_eq!(result, Ok(Value::Int(expected)));
        }
    }
}
