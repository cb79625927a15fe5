use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Cache key of a generated unit: the path text plus the concrete type the
/// path was specialized against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub path: String,
    pub declaring_type: String,
}

impl UnitKey {
    pub fn new(path: impl Into<String>, declaring_type: impl Into<String>) -> Self {
        UnitKey {
            path: path.into(),
            declaring_type: declaring_type.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.declaring_type)
    }
}

impl From<&str> for UnitKey {
    /// Parses `path@type`; a key without `@` gets an empty declaring type.
    fn from(s: &str) -> Self {
        match s.rsplit_once('@') {
            Some((path, ty)) => UnitKey::new(path, ty),
            None => UnitKey::new(s, ""),
        }
    }
}

/// Outcome of [`UnitRegistry::register`].
#[derive(Debug)]
pub enum Registration<U> {
    /// The unit was stored; it stays valid while the registry generation
    /// equals `generation`.
    Installed { unit: Arc<U>, generation: u64 },
    /// A unit for the same key was already present; it is returned instead
    /// of the one offered.
    Existing { unit: Arc<U>, generation: u64 },
    /// Storing the unit exceeded the ceiling. The container was emptied and
    /// the offered unit dropped with it.
    Evicted { generation: u64 },
}

/// Counters describing the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub live_units: usize,
    pub installed: u64,
    pub reused: u64,
    pub evictions: u64,
    pub generation: u64,
    pub ceiling: usize,
}

/// Process-wide (or engine-owned) table of generated units.
///
/// Registration and eviction are serialized by the write lock. Readers that
/// already hold an `Arc` to a unit keep using it across an eviction; only the
/// container is replaced.
pub struct UnitRegistry<U> {
    units: RwLock<HashMap<UnitKey, Arc<U>>>,
    ceiling: AtomicUsize,
    generation: AtomicU64,
    installed: AtomicU64,
    reused: AtomicU64,
    evictions: AtomicU64,
}

impl<U> UnitRegistry<U> {
    pub fn new(ceiling: usize) -> Self {
        UnitRegistry {
            units: RwLock::new(HashMap::new()),
            ceiling: AtomicUsize::new(ceiling),
            generation: AtomicU64::new(0),
            installed: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current generation. Units handed out under an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Relaxed)
    }

    /// Changes the ceiling. Takes effect at the next registration.
    pub fn set_ceiling(&self, ceiling: usize) {
        self.ceiling.store(ceiling, Ordering::Relaxed);
    }

    /// Number of live units.
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Looks up a live unit together with the generation it belongs to.
    pub fn lookup(&self, key: &UnitKey) -> Option<(Arc<U>, u64)> {
        let units = self.units.read();
        let unit = units.get(key)?;
        self.reused.fetch_add(1, Ordering::Relaxed);
        Some((Arc::clone(unit), self.generation()))
    }

    /// Stores `unit` under `key`, evicting everything if the ceiling is exceeded.
    pub fn register(&self, key: impl Into<UnitKey>, unit: U) -> Registration<U> {
        let key = key.into();
        let mut units = self.units.write();
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(existing) = units.get(&key) {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return Registration::Existing {
                unit: Arc::clone(existing),
                generation,
            };
        }
        if units.len() + 1 > self.ceiling() {
            let dropped = units.len();
            *units = HashMap::new();
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                dropped,
                generation,
                key = %key,
                "specialized unit ceiling exceeded, registry evicted"
            );
            return Registration::Evicted { generation };
        }
        let unit = Arc::new(unit);
        units.insert(key, Arc::clone(&unit));
        self.installed.fetch_add(1, Ordering::Relaxed);
        Registration::Installed { unit, generation }
    }

    /// Drops every unit and starts a new generation. Returns the number dropped.
    pub fn evict_all(&self) -> usize {
        let mut units = self.units.write();
        let dropped = units.len();
        *units = HashMap::new();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(dropped, generation, "registry evicted on request");
        dropped
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_units: self.len(),
            installed: self.installed.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            generation: self.generation(),
            ceiling: self.ceiling(),
        }
    }
}

impl<U> Default for UnitRegistry<U> {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TENURE_CEILING)
    }
}

impl<U> fmt::Debug for UnitRegistry<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_register_and_lookup() {
        let registry = UnitRegistry::new(8);
        let key = UnitKey::new("person.name", "Person");
        match registry.register(key.clone(), 1u32) {
            Registration::Installed { unit, generation } => {
                assert_eq!(*unit, 1);
                assert_eq!(generation, 0);
            }
            other => panic!("unexpected registration: {:?}", other),
        }
        let (unit, generation) = registry.lookup(&key).expect("unit should be live");
        assert_eq!(*unit, 1);
        assert_eq!(generation, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_key_returns_existing() {
        let registry = UnitRegistry::new(8);
        registry.register("a@Map", 1u32);
        match registry.register("a@Map", 2u32) {
            Registration::Existing { unit, .. } => assert_eq!(*unit, 1),
            other => panic!("unexpected registration: {:?}", other),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ceiling_evicts_everything() {
        let registry = UnitRegistry::new(2);
        registry.register("a@Map", 1u32);
        registry.register("b@Map", 2u32);
        assert!(matches!(
            registry.register("c@Map", 3u32),
            Registration::Evicted { generation: 1 }
        ));
        assert!(registry.is_empty());
        assert!(registry.lookup(&UnitKey::from("a@Map")).is_none());
        // The container is usable again right away.
        assert!(matches!(
            registry.register("c@Map", 3u32),
            Registration::Installed { generation: 1, .. }
        ));
        let stats = registry.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.live_units, 1);
    }

    #[test]
    fn test_units_survive_eviction_for_holders() {
        let registry = UnitRegistry::new(1);
        let held = match registry.register("a@Map", String::from("unit")) {
            Registration::Installed { unit, .. } => unit,
            other => panic!("unexpected registration: {:?}", other),
        };
        assert_eq!(registry.evict_all(), 1);
        assert_eq!(held.as_str(), "unit");
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!(UnitKey::from("a.b@Person"), UnitKey::new("a.b", "Person"));
        assert_eq!(UnitKey::from("a.b"), UnitKey::new("a.b", ""));
        assert_eq!(UnitKey::new("x", "Map").to_string(), "x@Map");
    }

    #[test]
    fn test_concurrent_registration_respects_ceiling() {
        let registry = Arc::new(UnitRegistry::new(16));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        registry.register(format!("p{}_{}@Map", t, i).as_str(), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("registration thread panicked");
        }
        assert!(registry.len() <= 16);
        assert!(registry.stats().evictions > 0);
    }
}
