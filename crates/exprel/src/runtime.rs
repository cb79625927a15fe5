//! Per-evaluation state threaded through node evaluation.

use crate::accessor::SpecializedUnit;
use crate::ast::NodeMeta;
use crate::class::ClassLibrary;
use crate::convert::Converter;
use crate::engine::EngineConfig;
use crate::error::{EvalErrorKind, EvaluationError};
use crate::scope::{ImportScope, ScopeRef, Variables};
use crate::value::Value;
use exprel_codegen::UnitRegistry;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// How nodes evaluate. Both modes produce identical results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fresh safe accessors, regexes compiled per call, foreach shape
    /// detected per call.
    Interpreted,
    /// Cached accessor sites, precompiled regexes, cached foreach shapes.
    Accelerated,
}

/// Everything a compiled expression shares across evaluations.
pub struct Runtime {
    pub config: EngineConfig,
    pub converter: Arc<dyn Converter>,
    pub classes: Arc<ClassLibrary>,
    pub registry: Arc<UnitRegistry<SpecializedUnit>>,
    pub source: Arc<str>,
    pub source_name: Option<Arc<str>>,
    /// Names bound in the import scope of every evaluation.
    pub imports: IndexMap<String, Value>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("source_name", &self.source_name)
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Receives one event per evaluated statement of code compiled with debug
/// symbols.
pub trait StepHook {
    fn on_statement(&self, event: &StepEvent<'_>);
}

pub struct StepEvent<'a> {
    pub source_name: Option<&'a str>,
    pub line: usize,
    pub scope: &'a ScopeRef,
}

impl StepEvent<'_> {
    /// Current value of a variable visible at this statement.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.scope.resolve(name).map(|slot| slot.get())
    }
}

/// Options for [`crate::evaluate_with`].
#[derive(Default, Clone, Copy)]
pub struct EvalOptions<'a> {
    pub hook: Option<&'a dyn StepHook>,
    /// Force interpreted evaluation.
    pub interpret: bool,
}

impl fmt::Debug for EvalOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalOptions")
            .field("hook", &self.hook.is_some())
            .field("interpret", &self.interpret)
            .finish()
    }
}

/// Pending `return` of the innermost function call (or of the program).
#[derive(Default)]
pub(crate) struct Control {
    returned: RefCell<Option<Value>>,
}

#[derive(Clone)]
pub struct Frame<'a> {
    pub runtime: &'a Runtime,
    /// Context object: unresolved identifiers are read from it.
    pub ctx: &'a Value,
    pub this_ref: &'a Value,
    pub scope: ScopeRef,
    /// Root of the chain (import scope over the caller's variables).
    pub root: ScopeRef,
    pub mode: Mode,
    pub hook: Option<&'a dyn StepHook>,
    pub depth: usize,
    control: Rc<Control>,
}

impl<'a> Frame<'a> {
    pub fn new(
        runtime: &'a Runtime,
        ctx: &'a Value,
        this_ref: &'a Value,
        vars: Option<&Variables>,
        mode: Mode,
        hook: Option<&'a dyn StepHook>,
    ) -> Self {
        let globals = vars.cloned().unwrap_or_default().scope();
        let imports = ImportScope::new(globals);
        let root: ScopeRef = Rc::new(imports);
        for (name, value) in &runtime.imports {
            root.import(name, value.clone());
        }
        Frame {
            runtime,
            ctx,
            this_ref,
            scope: Rc::clone(&root),
            root,
            mode,
            hook,
            depth: 0,
            control: Rc::new(Control::default()),
        }
    }

    pub fn with_scope(&self, scope: ScopeRef) -> Frame<'a> {
        Frame {
            scope,
            ..self.clone()
        }
    }

    /// Same frame with `this` bound to another value.
    pub fn with_this<'b>(&self, this_ref: &'b Value) -> Frame<'b>
    where
        'a: 'b,
    {
        Frame {
            runtime: self.runtime,
            ctx: self.ctx,
            this_ref,
            scope: self.scope.clone(),
            root: self.root.clone(),
            mode: self.mode,
            hook: self.hook,
            depth: self.depth,
            control: Rc::clone(&self.control),
        }
    }

    /// Frame for a function body: fresh return state, one level deeper.
    pub fn for_call(&self, scope: ScopeRef) -> Result<Frame<'a>, EvalErrorKind> {
        let depth = self.depth + 1;
        if depth > self.runtime.config.max_call_depth {
            return Err(EvalErrorKind::StackOverflow(self.runtime.config.max_call_depth));
        }
        Ok(Frame {
            scope,
            depth,
            control: Rc::new(Control::default()),
            ..self.clone()
        })
    }

    pub fn converter(&self) -> &dyn Converter {
        self.runtime.converter.as_ref()
    }

    pub fn interpreted(&self) -> bool {
        self.mode == Mode::Interpreted
    }

    pub fn error(&self, kind: EvalErrorKind, meta: &NodeMeta) -> EvaluationError {
        EvaluationError {
            kind,
            offset: meta.span.start,
            line: meta.line.map(|l| l as usize),
            source_name: self.runtime.source_name.clone(),
        }
    }

    pub fn error_at(&self, kind: EvalErrorKind, offset: usize) -> EvaluationError {
        EvaluationError {
            kind,
            offset,
            line: None,
            source_name: self.runtime.source_name.clone(),
        }
    }

    pub(crate) fn returned(&self) -> bool {
        self.control.returned.borrow().is_some()
    }

    pub(crate) fn set_return(&self, value: Value) {
        *self.control.returned.borrow_mut() = Some(value);
    }

    pub(crate) fn take_return(&self) -> Option<Value> {
        self.control.returned.borrow_mut().take()
    }

    pub(crate) fn step(&self, meta: &NodeMeta) {
        if let (Some(hook), Some(line)) = (self.hook, meta.line) {
            hook.on_statement(&StepEvent {
                source_name: self.runtime.source_name.as_deref(),
                line: line as usize,
                scope: &self.scope,
            });
        }
    }
}
