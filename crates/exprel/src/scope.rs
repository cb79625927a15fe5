//! Variable scope chain.
//!
//! Scopes are singly linked, innermost first, and live for one evaluation
//! (`Rc`, not `Send`). Each scope owns name -> slot bindings; a slot is shared
//! so that an accessor that resolved it keeps seeing later writes.

use crate::convert::Converter;
use crate::error::EvalErrorKind;
use crate::types::Type;
use crate::value::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type ScopeRef = Rc<dyn VariableScope>;
pub type Slot = Rc<Binding>;

/// One variable binding. Typed bindings coerce every value written to them.
pub struct Binding {
    value: RefCell<Value>,
    ty: Option<Type>,
}

impl Binding {
    pub fn new(value: Value, ty: Option<Type>) -> Slot {
        Rc::new(Binding {
            value: RefCell::new(value),
            ty: ty.filter(Type::is_known),
        })
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn ty(&self) -> Option<&Type> {
        self.ty.as_ref()
    }

    /// Stores `value`, converting it to the declared type first. Returns the
    /// stored value.
    pub fn set(&self, value: Value, converter: &dyn Converter) -> Result<Value, EvalErrorKind> {
        let value = match &self.ty {
            Some(ty) => converter.convert(&value, ty)?,
            None => value,
        };
        *self.value.borrow_mut() = value.clone();
        Ok(value)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty {
            Some(ty) => write!(f, "{}: {:?}", ty, self.value.borrow()),
            None => write!(f, "{:?}", self.value.borrow()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Caller-supplied variables.
    Global,
    /// Function registers.
    Indexed,
    Block,
    /// Loop item plus the loop body's locals.
    Item,
    /// Imported classes and functions.
    Import,
}

pub trait VariableScope {
    fn kind(&self) -> ScopeKind;

    fn next(&self) -> Option<&ScopeRef>;

    /// A binding owned by this scope.
    fn local(&self, name: &str) -> Option<Slot>;

    /// Whether new bindings without an explicit declaration may land here.
    fn is_target(&self) -> bool {
        false
    }

    /// Creates (or replaces) a binding in this scope.
    fn create(&self, name: &str, value: Value, ty: Option<Type>) -> Slot;

    /// Creates a binding at a compile-time allocated register.
    fn create_indexed(&self, _register: usize, name: &str, value: Value, ty: Option<Type>) -> Slot {
        self.create(name, value, ty)
    }

    /// Binds an imported name. Only import scopes accept.
    fn import(&self, _name: &str, _value: Value) -> bool {
        false
    }

    /// Names bound directly in this scope.
    fn names(&self) -> Vec<String>;

    /// Resolves `name` innermost first.
    fn resolve(&self, name: &str) -> Option<Slot> {
        match self.local(name) {
            Some(slot) => Some(slot),
            None => self.next().and_then(|next| next.resolve(name)),
        }
    }

    fn is_resolvable(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// The nearest scope that accepts undeclared bindings.
pub fn nearest_target(scope: &ScopeRef) -> ScopeRef {
    let mut current = scope;
    loop {
        if current.is_target() {
            return Rc::clone(current);
        }
        match current.next() {
            Some(next) => current = next,
            None => return Rc::clone(scope),
        }
    }
}

/// Binds `name` in the nearest import scope of the chain.
pub fn import_into(scope: &ScopeRef, name: &str, value: Value) -> bool {
    let mut current = Some(scope);
    while let Some(s) = current {
        if s.import(name, value.clone()) {
            return true;
        }
        current = s.next();
    }
    false
}

/// Hashed scope used for caller variables, blocks and loop items.
pub struct MapScope {
    kind: ScopeKind,
    vars: RefCell<IndexMap<String, Slot>>,
    next: Option<ScopeRef>,
}

impl MapScope {
    pub fn global() -> Self {
        MapScope {
            kind: ScopeKind::Global,
            vars: RefCell::new(IndexMap::new()),
            next: None,
        }
    }

    pub fn block(next: ScopeRef) -> ScopeRef {
        Rc::new(MapScope {
            kind: ScopeKind::Block,
            vars: RefCell::new(IndexMap::new()),
            next: Some(next),
        })
    }

    pub fn item(next: ScopeRef, name: &str, value: Value, ty: Option<Type>) -> ScopeRef {
        let mut vars = IndexMap::new();
        vars.insert(name.to_string(), Binding::new(value, ty));
        Rc::new(MapScope {
            kind: ScopeKind::Item,
            vars: RefCell::new(vars),
            next: Some(next),
        })
    }
}

impl VariableScope for MapScope {
    fn kind(&self) -> ScopeKind {
        self.kind
    }

    fn next(&self) -> Option<&ScopeRef> {
        self.next.as_ref()
    }

    fn local(&self, name: &str) -> Option<Slot> {
        self.vars.borrow().get(name).cloned()
    }

    fn is_target(&self) -> bool {
        self.kind == ScopeKind::Global
    }

    fn create(&self, name: &str, value: Value, ty: Option<Type>) -> Slot {
        let slot = Binding::new(value, ty);
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&slot));
        slot
    }

    fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

/// Register file of one function invocation.
///
/// Parameters occupy the first registers, the body's locals follow in
/// declaration order. Names created at run time without a register are
/// appended after the compiled ones.
pub struct IndexedScope {
    names: RefCell<Vec<String>>,
    slots: RefCell<Vec<Option<Slot>>>,
    next: Option<ScopeRef>,
}

impl IndexedScope {
    pub fn new(names: Vec<String>, next: ScopeRef) -> Self {
        let slots = vec![None; names.len()];
        IndexedScope {
            names: RefCell::new(names),
            slots: RefCell::new(slots),
            next: Some(next),
        }
    }

    /// The slot at `register`, if it has been assigned.
    pub fn register(&self, register: usize) -> Option<Slot> {
        self.slots.borrow().get(register).cloned().flatten()
    }
}

impl VariableScope for IndexedScope {
    fn kind(&self) -> ScopeKind {
        ScopeKind::Indexed
    }

    fn next(&self) -> Option<&ScopeRef> {
        self.next.as_ref()
    }

    fn local(&self, name: &str) -> Option<Slot> {
        let index = self.names.borrow().iter().position(|n| n == name)?;
        self.register(index)
    }

    fn is_target(&self) -> bool {
        true
    }

    fn create(&self, name: &str, value: Value, ty: Option<Type>) -> Slot {
        let existing = self.names.borrow().iter().position(|n| n == name);
        let register = match existing {
            Some(r) => r,
            None => {
                self.names.borrow_mut().push(name.to_string());
                self.slots.borrow_mut().push(None);
                self.names.borrow().len() - 1
            }
        };
        self.create_indexed(register, name, value, ty)
    }

    fn create_indexed(&self, register: usize, name: &str, value: Value, ty: Option<Type>) -> Slot {
        let fits = self.names.borrow().get(register).map(|n| n == name);
        if fits != Some(true) {
            return self.create(name, value, ty);
        }
        let slot = Binding::new(value, ty);
        self.slots.borrow_mut()[register] = Some(Rc::clone(&slot));
        slot
    }

    fn names(&self) -> Vec<String> {
        let slots = self.slots.borrow();
        self.names
            .borrow()
            .iter()
            .zip(slots.iter())
            .filter(|(_, s)| s.is_some())
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// Imported classes and functions. Sits innermost in the root chain but is
/// never an assignment target: creations are forwarded to the next scope.
pub struct ImportScope {
    imports: RefCell<IndexMap<String, Slot>>,
    next: ScopeRef,
}

impl ImportScope {
    pub fn new(next: ScopeRef) -> Self {
        ImportScope {
            imports: RefCell::new(IndexMap::new()),
            next,
        }
    }
}

impl VariableScope for ImportScope {
    fn kind(&self) -> ScopeKind {
        ScopeKind::Import
    }

    fn next(&self) -> Option<&ScopeRef> {
        Some(&self.next)
    }

    fn local(&self, name: &str) -> Option<Slot> {
        self.imports.borrow().get(name).cloned()
    }

    fn create(&self, name: &str, value: Value, ty: Option<Type>) -> Slot {
        self.next.create(name, value, ty)
    }

    fn import(&self, name: &str, value: Value) -> bool {
        self.imports
            .borrow_mut()
            .insert(name.to_string(), Binding::new(value, None));
        true
    }

    fn names(&self) -> Vec<String> {
        self.imports.borrow().keys().cloned().collect()
    }
}

/// Variables supplied by the caller of an evaluation.
///
/// Cloning shares the bindings, so values written by an expression are
/// visible to the caller afterwards.
#[derive(Clone)]
pub struct Variables {
    scope: Rc<MapScope>,
}

impl Variables {
    pub fn new() -> Self {
        Variables {
            scope: Rc::new(MapScope::global()),
        }
    }

    /// Builder form of [`Variables::set`].
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Binds or overwrites an untyped variable.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        match self.scope.local(name) {
            Some(slot) if slot.ty().is_none() => {
                *slot.value.borrow_mut() = value.into();
            }
            _ => {
                self.scope.create(name, value.into(), None);
            }
        }
    }

    /// Binds a typed variable; later writes are coerced to `ty`.
    pub fn declare(&self, name: &str, ty: Type, value: impl Into<Value>) {
        self.scope.create(name, value.into(), Some(ty));
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.scope.local(name).map(|slot| slot.get())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scope.local(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.scope.names()
    }

    pub fn scope(&self) -> ScopeRef {
        Rc::clone(&self.scope) as ScopeRef
    }
}

impl Default for Variables {
    fn default() -> Self {
        Variables::new()
    }
}

impl fmt::Debug for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.scope.vars.borrow().iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConversionRegistry;

    #[test]
    fn test_resolution_is_innermost_first() {
        let globals = Variables::new().with("x", 1).with("y", 2);
        let block = MapScope::block(globals.scope());
        block.create("x", Value::Int(10), None);
        assert_eq!(block.resolve("x").map(|s| s.get()), Some(Value::Int(10)));
        assert_eq!(block.resolve("y").map(|s| s.get()), Some(Value::Int(2)));
        assert!(block.resolve("z").is_none());
        assert_eq!(globals.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_nearest_target_skips_blocks_and_imports() {
        let globals = Variables::new();
        let imports: ScopeRef = Rc::new(ImportScope::new(globals.scope()));
        let block = MapScope::block(Rc::clone(&imports));
        let target = nearest_target(&block);
        assert_eq!(target.kind(), ScopeKind::Global);
        // Creations through the import scope land in the globals.
        imports.create("a", Value::Int(1), None);
        assert_eq!(globals.get("a"), Some(Value::Int(1)));
        assert!(import_into(&block, "Math", Value::Null));
        assert!(imports.local("Math").is_some());
    }

    #[test]
    fn test_indexed_registers() {
        let globals = Variables::new();
        let frame = IndexedScope::new(vec!["a".into(), "b".into(), "tmp".into()], globals.scope());
        frame.create_indexed(0, "a", Value::Int(1), None);
        frame.create_indexed(1, "b", Value::Int(2), None);
        assert_eq!(frame.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(frame.local("tmp").is_none());
        frame.create("extra", Value::Int(3), None);
        assert_eq!(frame.register(3).map(|s| s.get()), Some(Value::Int(3)));
        // A mismatched register falls back to name-based placement.
        frame.create_indexed(0, "tmp", Value::Int(4), None);
        assert_eq!(frame.register(2).map(|s| s.get()), Some(Value::Int(4)));
        assert_eq!(frame.local("a").map(|s| s.get()), Some(Value::Int(1)));
    }

    #[test]
    fn test_typed_binding_coerces() {
        let converter = ConversionRegistry::default();
        let slot = Binding::new(Value::Int(0), Some(Type::Int));
        assert_eq!(slot.set(Value::Float(2.9), &converter), Ok(Value::Int(2)));
        assert!(slot.set(Value::from("x"), &converter).is_err());
        assert_eq!(slot.get(), Value::Int(2));
        let untyped = Binding::new(Value::Null, Some(Type::Any));
        assert!(untyped.ty().is_none());
    }
}
