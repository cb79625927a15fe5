//! Engine configuration, compiled expressions and the entry points.

use crate::accessor::{self, OptimizerMode, PathExpr, SpecializedUnit};
use crate::ast::{Node, Site};
use crate::class::{ClassDef, ClassLibrary};
use crate::convert::{ConversionRegistry, Converter};
use crate::error::{CompileError, Error, EvaluationError};
use crate::parser;
use crate::runtime::{EvalOptions, Frame, Mode, Runtime};
use crate::scope::Variables;
use crate::types::Type;
use crate::value::Value;
use exprel_codegen::{RegistryStats, UnitRegistry, DEFAULT_TENURE_CEILING};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Where a new, undeclared binding lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockScoping {
    /// In the innermost scope, so a name first assigned inside an `if` or
    /// loop body is gone after the body.
    #[default]
    Local,
    /// In the nearest assignment-target scope (the function frame or the
    /// caller's variables).
    Promote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub optimizer: OptimizerMode,
    /// Evaluations within one window before a site is promoted.
    pub tenuring_threshold: u32,
    /// Length of the promotion window in milliseconds.
    pub time_span_ms: u64,
    /// Live specialized units before the registry evicts everything.
    pub tenure_ceiling: usize,
    pub block_scoping: BlockScoping,
    pub max_call_depth: usize,
    /// Compiled expressions kept by the engine's source cache.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            optimizer: OptimizerMode::Dynamic,
            tenuring_threshold: 50,
            time_span_ms: 100,
            tenure_ceiling: DEFAULT_TENURE_CEILING,
            block_scoping: BlockScoping::Local,
            max_call_depth: 128,
            cache_capacity: 1024,
        }
    }
}

/// Options for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Unresolvable names and members are compile errors.
    pub strict_typing: bool,
    /// Infer static types of paths. Implied by `strict_typing`.
    pub verify_types: bool,
    /// Static types of the variables and context properties the caller
    /// will supply.
    pub known_input_types: IndexMap<String, Type>,
    /// Names bound in the import scope of every evaluation.
    pub imports: IndexMap<String, Value>,
    /// Record source lines for error reports and step hooks.
    pub debug_symbols: bool,
    pub source_name: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        CompileOptions::default()
    }

    pub fn strict(mut self) -> Self {
        self.strict_typing = true;
        self.verify_types = true;
        self
    }

    pub fn verify(mut self) -> Self {
        self.verify_types = true;
        self
    }

    pub fn input(mut self, name: &str, ty: Type) -> Self {
        self.known_input_types.insert(name.to_string(), ty);
        self
    }

    pub fn import(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.imports.insert(name.to_string(), value.into());
        self
    }

    pub fn import_class(self, class: Arc<ClassDef>) -> Self {
        let name = class.name().to_string();
        self.import(&name, Value::Class(class))
    }

    pub fn debug_symbols(mut self, source_name: Option<&str>) -> Self {
        self.debug_symbols = true;
        self.source_name = source_name.map(str::to_string);
        self
    }

    pub(crate) fn verifies(&self) -> bool {
        self.verify_types || self.strict_typing
    }
}

/// A compiled program, safe to evaluate from many threads at once.
pub struct CompiledExpression {
    root: Node,
    runtime: Arc<Runtime>,
}

impl CompiledExpression {
    /// Static result type of the whole program.
    pub fn egress_type(&self) -> &Type {
        self.root.egress()
    }

    pub fn source(&self) -> &str {
        &self.runtime.source
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn evaluate(
        &self,
        ctx: &Value,
        this_ref: &Value,
        vars: Option<&Variables>,
    ) -> Result<Value, EvaluationError> {
        self.evaluate_with(ctx, this_ref, vars, &EvalOptions::default())
    }

    pub fn evaluate_with(
        &self,
        ctx: &Value,
        this_ref: &Value,
        vars: Option<&Variables>,
        options: &EvalOptions<'_>,
    ) -> Result<Value, EvaluationError> {
        let mode = if options.interpret {
            Mode::Interpreted
        } else {
            Mode::Accelerated
        };
        let frame = Frame::new(&self.runtime, ctx, this_ref, vars, mode, options.hook);
        let value = self.root.eval_unscoped(&frame)?;
        Ok(frame.take_return().unwrap_or(value))
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.runtime.source)
            .field("egress", self.root.egress())
            .finish()
    }
}

/// A compiled assignment target such as `order.lines[0].qty`.
pub struct CompiledSetter {
    path: PathExpr,
    site: Site,
    runtime: Arc<Runtime>,
}

impl CompiledSetter {
    pub fn path(&self) -> &PathExpr {
        &self.path
    }

    /// Writes `value` at the path and returns the stored value.
    pub fn set(
        &self,
        ctx: &Value,
        vars: Option<&Variables>,
        value: Value,
    ) -> Result<Value, EvaluationError> {
        let frame = Frame::new(&self.runtime, ctx, &Value::Null, vars, Mode::Accelerated, None);
        accessor::assign_path(&self.path, &self.site, &frame, value)
    }
}

impl fmt::Debug for CompiledSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledSetter({})", self.path)
    }
}

/// Compiled expressions keyed by source text. Cleared wholesale when full.
#[derive(Default)]
pub struct ExpressionCache {
    entries: RwLock<HashMap<Arc<str>, Arc<CompiledExpression>>>,
}

impl ExpressionCache {
    pub fn get(&self, source: &str) -> Option<Arc<CompiledExpression>> {
        self.entries.read().get(source).cloned()
    }

    fn insert(&self, compiled: Arc<CompiledExpression>, capacity: usize) -> Arc<CompiledExpression> {
        let mut entries = self.entries.write();
        if entries.len() >= capacity.max(1) {
            tracing::debug!(entries = entries.len(), "expression cache full, clearing");
            entries.clear();
        }
        let key = Arc::clone(&compiled.runtime.source);
        Arc::clone(entries.entry(key).or_insert(compiled))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpressionCache({} entries)", self.len())
    }
}

/// Owns the configuration, host classes, conversions and the specialized
/// unit registry shared by everything it compiles.
pub struct Engine {
    config: EngineConfig,
    converter: Arc<dyn Converter>,
    classes: Arc<ClassLibrary>,
    registry: Arc<UnitRegistry<SpecializedUnit>>,
    cache: ExpressionCache,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            registry: Arc::new(UnitRegistry::new(config.tenure_ceiling)),
            config,
            converter: Arc::new(ConversionRegistry::new()),
            classes: Arc::new(ClassLibrary::standard()),
            cache: ExpressionCache::default(),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    /// Makes a host class available to `new` and `import` by name.
    pub fn with_class(mut self, class: Arc<ClassDef>) -> Self {
        Arc::make_mut(&mut self.classes).register(class);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classes(&self) -> &ClassLibrary {
        &self.classes
    }

    pub fn registry(&self) -> &UnitRegistry<SpecializedUnit> {
        &self.registry
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn cache(&self) -> &ExpressionCache {
        &self.cache
    }

    fn runtime(&self, source: &str, options: &CompileOptions) -> Runtime {
        Runtime {
            config: self.config.clone(),
            converter: Arc::clone(&self.converter),
            classes: Arc::clone(&self.classes),
            registry: Arc::clone(&self.registry),
            source: Arc::from(source),
            source_name: options.source_name.as_deref().map(Arc::from),
            imports: options.imports.clone(),
        }
    }

    pub fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompiledExpression, CompileError> {
        let root = parser::compile_program(source, options, &self.classes)
            .map_err(|e| e.with_source_name(options.source_name.as_deref()))?;
        tracing::trace!(source, egress = %root.egress(), "compiled expression");
        Ok(CompiledExpression {
            root,
            runtime: Arc::new(self.runtime(source, options)),
        })
    }

    /// Compiles with default options, reusing an earlier compilation of the
    /// same source text.
    pub fn compile_cached(&self, source: &str) -> Result<Arc<CompiledExpression>, CompileError> {
        if let Some(hit) = self.cache.get(source) {
            return Ok(hit);
        }
        let compiled = Arc::new(self.compile(source, &CompileOptions::default())?);
        Ok(self.cache.insert(compiled, self.config.cache_capacity))
    }

    /// Compiles (through the cache) and evaluates in accelerated mode.
    pub fn execute(&self, source: &str, ctx: &Value, vars: Option<&Variables>) -> Result<Value, Error> {
        let compiled = self.compile_cached(source)?;
        Ok(compiled.evaluate(ctx, &Value::Null, vars)?)
    }

    pub fn compile_set_expression(&self, path: &str) -> Result<CompiledSetter, CompileError> {
        let options = CompileOptions::default();
        let path_expr = parser::compile_path(path, &options, &self.classes)?;
        Ok(CompiledSetter {
            path: path_expr,
            site: Site::new(),
            runtime: Arc::new(self.runtime(path, &options)),
        })
    }

    /// One-shot interpreted evaluation. Nothing is cached and no accessor
    /// is optimized.
    pub fn eval(&self, source: &str, ctx: &Value, vars: Option<&Variables>) -> Result<Value, Error> {
        let compiled = self.compile(source, &CompileOptions::default())?;
        let options = EvalOptions {
            interpret: true,
            ..EvalOptions::default()
        };
        Ok(compiled.evaluate_with(ctx, &Value::Null, vars, &options)?)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry.stats())
            .field("cache", &self.cache)
            .finish()
    }
}

/// The process-wide engine behind the free functions, created on first use
/// with the default configuration.
pub fn global() -> &'static Engine {
    static GLOBAL: OnceLock<Engine> = OnceLock::new();
    GLOBAL.get_or_init(Engine::default)
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledExpression, CompileError> {
    global().compile(source, options)
}

pub fn evaluate(
    compiled: &CompiledExpression,
    ctx: &Value,
    this_ref: &Value,
    vars: Option<&Variables>,
) -> Result<Value, EvaluationError> {
    compiled.evaluate(ctx, this_ref, vars)
}

pub fn evaluate_with(
    compiled: &CompiledExpression,
    ctx: &Value,
    this_ref: &Value,
    vars: Option<&Variables>,
    options: &EvalOptions<'_>,
) -> Result<Value, EvaluationError> {
    compiled.evaluate_with(ctx, this_ref, vars, options)
}

pub fn compile_set_expression(path: &str) -> Result<CompiledSetter, CompileError> {
    global().compile_set_expression(path)
}

pub fn execute_set_expression(
    setter: &CompiledSetter,
    ctx: &Value,
    vars: Option<&Variables>,
    value: Value,
) -> Result<Value, EvaluationError> {
    setter.set(ctx, vars, value)
}

pub fn eval(source: &str, ctx: &Value, vars: Option<&Variables>) -> Result<Value, Error> {
    global().eval(source, ctx, vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"optimizer": "safe", "tenuring_threshold": 3}"#).unwrap();
        assert_eq!(config.optimizer, OptimizerMode::Safe);
        assert_eq!(config.tenuring_threshold, 3);
        assert_eq!(config.max_call_depth, 128);
        assert_eq!(config.block_scoping, BlockScoping::Local);
    }

    #[test]
    fn test_config_from_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            optimizer = "specializing"
            tenure_ceiling = 16
            block_scoping = "promote"
            "#,
        )
        .unwrap();
        assert_eq!(config.optimizer, OptimizerMode::Specializing);
        assert_eq!(config.tenure_ceiling, 16);
        assert_eq!(config.block_scoping, BlockScoping::Promote);
        assert_eq!(config.time_span_ms, 100);

        let text = toml::to_string(&config).unwrap();
        assert_eq!(toml::from_str::<EngineConfig>(&text).unwrap(), config);
    }

    #[test]
    fn test_cache_reuses_compilation() {
        let engine = Engine::default();
        let a = engine.compile_cached("1 + 2").unwrap();
        let b = engine.compile_cached("1 + 2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn test_cache_clears_when_full() {
        let engine = Engine::new(EngineConfig {
            cache_capacity: 2,
            ..EngineConfig::default()
        });
        engine.compile_cached("1").unwrap();
        engine.compile_cached("2").unwrap();
        engine.compile_cached("3").unwrap();
        assert_eq!(engine.cache().len(), 1);
        assert!(engine.cache().get("3").is_some());
    }

    #[test]
    fn test_setter_writes_into_context() {
        let engine = Engine::default();
        let ctx = Value::from_pairs([("order", Value::from_pairs([("qty", Value::Int(1))]))]);
        let setter = engine.compile_set_expression("order.qty").unwrap();
        assert_eq!(setter.set(&ctx, None, Value::Int(5)), Ok(Value::Int(5)));
        assert_eq!(setter.set(&ctx, None, Value::Int(7)), Ok(Value::Int(7)));
        assert_eq!(engine.execute("order.qty", &ctx, None), Ok(Value::Int(7)));
        assert!(engine.compile_set_expression("1 + 2").is_err());
    }
}
