//! Embeddable expression language.
//!
//! # Overview
//!
//! Source text is compiled once into an immutable AST and evaluated any
//! number of times against a context object, an optional `this` value and
//! caller-supplied [`Variables`]. Property paths such as `order.lines[0].qty`
//! start on a reflective accessor chain; hot paths are promoted to
//! specialized units keyed by path and root type (see
//! [`accessor::OptimizerMode`]).
//!
//! # Example
//!
//! ```
//! use exprel::{Engine, Value, Variables};
//!
//! let engine = Engine::default();
//! let ctx = Value::from_pairs([("price", Value::Int(40)), ("qty", Value::Int(3))]);
//! let vars = Variables::new().with("discount", 20);
//!
//! let total = engine.execute("price * qty - discount", &ctx, Some(&vars)).unwrap();
//! assert_eq!(total, Value::Int(100));
//!
//! let value = engine.eval("x = 0; foreach (n : [1, 2, 3]) { x += n }; x", &Value::Null, None);
//! assert_eq!(value, Ok(Value::Int(6)));
//! ```

pub mod accessor;
pub mod ast;
pub mod builtins;
pub mod class;
pub mod convert;
pub mod engine;
pub mod error;
pub mod lexer;
mod parser;
pub mod runtime;
pub mod scope;
pub mod types;
pub mod value;

// Re-export the core public API
pub use accessor::{OptimizerMode, Tier};
pub use class::{ClassDef, ClassLibrary, Instance, NativeFunction};
pub use convert::{ConversionRegistry, Converter};
pub use engine::{
    compile, compile_set_expression, eval, evaluate, evaluate_with, execute_set_expression,
    global, BlockScoping, CompileOptions, CompiledExpression, CompiledSetter, Engine, EngineConfig,
    ExpressionCache,
};
pub use error::{CompileError, CompileErrorKind, Error, EvalErrorKind, EvaluationError, Result};
pub use exprel_codegen::RegistryStats;
pub use parser::{is_reserved, RESERVED};
pub use runtime::{EvalOptions, StepEvent, StepHook};
pub use scope::Variables;
pub use types::Type;
pub use value::Value;
