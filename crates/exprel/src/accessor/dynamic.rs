//! Tiered optimizer.
//!
//! Every site starts on its safe chain and counts evaluations inside a time
//! window. When the count passes the tenuring threshold before the window
//! expires, the site traces one evaluation and swaps in a specialized unit.
//! A unit from an older registry generation sends the site back to the safe
//! tier with its counters cleared.

use super::safe::{AssignAccessor, SafeAccessor};
use super::specialize::{specialize, SpecializedUnit, SpecializingOptimizer};
use super::{Accessor, AccessorOptimizer, CollectionSpec, NewSpec, Optimized, PathExpr};
use crate::error::EvaluationError;
use crate::runtime::Frame;
use crate::types::Type;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Safe,
    Specialized,
}

enum Current {
    Safe,
    Specialized(Arc<SpecializedUnit>, u64),
}

struct TierState {
    current: Current,
    count: u32,
    window_start: Instant,
    promoting: bool,
}

enum Plan {
    Safe,
    Run(Arc<SpecializedUnit>),
    Promote,
}

pub struct DynamicAccessor {
    safe: SafeAccessor,
    state: Mutex<TierState>,
}

impl DynamicAccessor {
    pub fn new(path: PathExpr) -> Self {
        DynamicAccessor {
            safe: SafeAccessor::new(path),
            state: Mutex::new(TierState {
                current: Current::Safe,
                count: 0,
                window_start: Instant::now(),
                promoting: false,
            }),
        }
    }

    pub fn tier(&self) -> Tier {
        match self.state.lock().current {
            Current::Safe => Tier::Safe,
            Current::Specialized(..) => Tier::Specialized,
        }
    }

    /// Evaluations counted in the current window.
    pub fn invocations(&self) -> u32 {
        self.state.lock().count
    }

    fn plan(&self, f: &Frame<'_>) -> Plan {
        let config = &f.runtime.config;
        let live = f.runtime.registry.generation();
        let mut state = self.state.lock();
        let stale = match &state.current {
            Current::Specialized(unit, generation) if *generation == live => {
                return Plan::Run(Arc::clone(unit));
            }
            Current::Specialized(_, generation) => Some(*generation),
            Current::Safe => None,
        };
        let now = Instant::now();
        if let Some(generation) = stale {
            tracing::debug!(
                path = %self.safe.path(),
                generation,
                live,
                "specialized unit evicted, deoptimizing"
            );
            state.current = Current::Safe;
            state.count = 0;
            state.window_start = now;
        }
        if now.duration_since(state.window_start) >= Duration::from_millis(config.time_span_ms) {
            state.count = 0;
            state.window_start = now;
            return Plan::Safe;
        }
        state.count = state.count.saturating_add(1);
        if state.count > config.tenuring_threshold && !state.promoting {
            state.promoting = true;
            Plan::Promote
        } else {
            Plan::Safe
        }
    }

    fn promote(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        let outcome = specialize(&self.safe, f);
        let mut state = self.state.lock();
        state.promoting = false;
        let (value, installed) = outcome?;
        match installed {
            Some((unit, generation)) => {
                tracing::debug!(
                    path = %self.safe.path(),
                    key = %unit.key(),
                    count = state.count,
                    "site promoted to specialized unit"
                );
                state.current = Current::Specialized(unit, generation);
            }
            None => {
                state.count = 0;
                state.window_start = Instant::now();
            }
        }
        Ok(value)
    }
}

impl fmt::Debug for DynamicAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicAccessor")
            .field("path", self.safe.path())
            .field("tier", &self.tier())
            .finish()
    }
}

impl Accessor for DynamicAccessor {
    fn get_value(&self, f: &Frame<'_>) -> Result<Value, EvaluationError> {
        match self.plan(f) {
            Plan::Safe => self.safe.get_value(f),
            Plan::Run(unit) => unit.execute(&self.safe, f),
            Plan::Promote => self.promote(f),
        }
    }

    fn set_value(&self, f: &Frame<'_>, value: Value) -> Result<Value, EvaluationError> {
        self.safe.set_value(f, value)
    }

    fn egress_type(&self) -> Type {
        match &self.state.lock().current {
            Current::Specialized(unit, _) => unit.egress().clone(),
            Current::Safe => Type::Any,
        }
    }
}

/// Safe first, specialized once hot. Collection literals and `new`
/// expressions have no tiers and are handled as the specializing strategy
/// handles them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicOptimizer;

impl AccessorOptimizer for DynamicOptimizer {
    fn optimize_accessor(&self, path: &PathExpr, f: &Frame<'_>) -> Result<Optimized, EvaluationError> {
        let accessor = DynamicAccessor::new(path.clone());
        let value = accessor.get_value(f)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_assignment(
        &self,
        path: &PathExpr,
        f: &Frame<'_>,
        value: Value,
    ) -> Result<Optimized, EvaluationError> {
        let prefix = (path.len() > 1).then(|| {
            Arc::new(DynamicAccessor::new(path.prefix(path.len() - 1))) as Arc<dyn Accessor>
        });
        let accessor = AssignAccessor::with_prefix(path.clone(), prefix);
        let value = accessor.set_value(f, value)?;
        Ok(Optimized::new(Arc::new(accessor), value))
    }

    fn optimize_collection(
        &self,
        spec: &Arc<CollectionSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        SpecializingOptimizer.optimize_collection(spec, f)
    }

    fn optimize_object_creation(
        &self,
        spec: &Arc<NewSpec>,
        f: &Frame<'_>,
    ) -> Result<Optimized, EvaluationError> {
        SpecializingOptimizer.optimize_object_creation(spec, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Segment;
    use crate::class::{ClassDef, ClassLibrary};
    use crate::convert::ConversionRegistry;
    use crate::engine::EngineConfig;
    use crate::lexer::Span;
    use crate::runtime::{Mode, Runtime};
    use exprel_codegen::UnitRegistry;
    use indexmap::IndexMap;

    fn runtime(config: EngineConfig) -> Runtime {
        Runtime {
            registry: Arc::new(UnitRegistry::new(config.tenure_ceiling)),
            config,
            converter: Arc::new(ConversionRegistry::new()),
            classes: Arc::new(ClassLibrary::standard()),
            source: Arc::from("person.name"),
            source_name: None,
            imports: IndexMap::new(),
        }
    }

    fn hot(threshold: u32, time_span_ms: u64) -> EngineConfig {
        EngineConfig {
            tenuring_threshold: threshold,
            time_span_ms,
            ..EngineConfig::default()
        }
    }

    fn person_name() -> PathExpr {
        PathExpr::new(
            "person.name",
            Span::new(0, 11),
            vec![
                Segment::Root("person".into()),
                Segment::Property {
                    name: "name".into(),
                    null_safe: false,
                },
            ],
            vec![6, 11],
        )
    }

    fn ctx_with(person: Value) -> Value {
        Value::from_pairs([("person", person)])
    }

    #[test]
    fn test_promotes_after_threshold() {
        let rt = runtime(hot(3, 60_000));
        let ctx = ctx_with(Value::from_pairs([("name", Value::from("Ada"))]));
        let frame = Frame::new(&rt, &ctx, &Value::Null, None, Mode::Accelerated, None);
        let site = DynamicAccessor::new(person_name());
        for call in 1..=3 {
            assert_eq!(site.get_value(&frame), Ok(Value::from("Ada")));
            assert_eq!(site.tier(), Tier::Safe, "call {}", call);
        }
        assert_eq!(site.get_value(&frame), Ok(Value::from("Ada")));
        assert_eq!(site.tier(), Tier::Specialized);
        assert_eq!(rt.registry.len(), 1);
        assert_eq!(site.get_value(&frame), Ok(Value::from("Ada")));
    }

    #[test]
    fn test_guard_miss_uses_safe_chain() {
        let rt = runtime(hot(0, 60_000));
        let site = DynamicAccessor::new(person_name());
        let as_map = ctx_with(Value::from_pairs([("name", Value::from("Ada"))]));
        let frame = Frame::new(&rt, &as_map, &Value::Null, None, Mode::Accelerated, None);
        assert_eq!(site.get_value(&frame), Ok(Value::from("Ada")));
        assert_eq!(site.tier(), Tier::Specialized);

        let class = ClassDef::builder("Person").field("name", Type::Str).build();
        let instance = class.instantiate();
        instance.set_field("name", Value::from("Grace"));
        let as_object = ctx_with(Value::Object(Arc::new(instance)));
        let frame = Frame::new(&rt, &as_object, &Value::Null, None, Mode::Accelerated, None);
        assert_eq!(site.get_value(&frame), Ok(Value::from("Grace")));
        assert_eq!(site.tier(), Tier::Specialized);
    }

    #[test]
    fn test_eviction_deoptimizes() {
        let rt = runtime(hot(0, 60_000));
        let ctx = ctx_with(Value::from_pairs([("name", Value::from("Ada"))]));
        let frame = Frame::new(&rt, &ctx, &Value::Null, None, Mode::Accelerated, None);
        let site = DynamicAccessor::new(person_name());
        site.get_value(&frame).unwrap();
        assert_eq!(site.tier(), Tier::Specialized);

        rt.registry.evict_all();
        assert_eq!(site.egress_type(), Type::Str);
        // The deoptimizing call counts as the first of a new window and, with
        // a threshold of zero, promotes again straight away.
        assert_eq!(site.get_value(&frame), Ok(Value::from("Ada")));
        assert_eq!(site.tier(), Tier::Specialized);
        assert_eq!(rt.registry.stats().generation, 1);
    }

    #[test]
    fn test_zero_time_span_never_promotes() {
        let rt = runtime(hot(1, 0));
        let ctx = ctx_with(Value::from_pairs([("name", Value::from("Ada"))]));
        let frame = Frame::new(&rt, &ctx, &Value::Null, None, Mode::Accelerated, None);
        let site = DynamicAccessor::new(person_name());
        for _ in 0..10 {
            site.get_value(&frame).unwrap();
        }
        assert_eq!(site.tier(), Tier::Safe);
        assert_eq!(site.invocations(), 0);
        assert!(rt.registry.is_empty());
    }
}
