//! Generated-code container for exprel.
//!
//! The expression engine specializes hot property paths into closure chains
//! ("units") that perform one exact access sequence. Units are not collected
//! individually: this crate keeps them in a [`UnitRegistry`] with a fixed
//! ceiling, and when the ceiling is exceeded the whole container is discarded
//! and a fresh one takes its place.
//!
//! Every discard bumps the registry *generation*. Holders of a unit remember the
//! generation they received it in and treat a mismatch as a signal to drop back
//! to their unspecialized path. No per-unit bookkeeping is needed.
//!
//! ```
//! use exprel_codegen::{Registration, UnitRegistry};
//!
//! let registry: UnitRegistry<&'static str> = UnitRegistry::new(2);
//! assert!(matches!(registry.register("a@Map", "unit-a"), Registration::Installed { .. }));
//! assert!(matches!(registry.register("b@Map", "unit-b"), Registration::Installed { .. }));
//! // The third unit pushes the count past the ceiling and empties the container.
//! assert!(matches!(registry.register("c@Map", "unit-c"), Registration::Evicted { .. }));
//! assert_eq!(registry.len(), 0);
//! assert_eq!(registry.generation(), 1);
//! ```

mod registry;

pub use registry::{Registration, RegistryStats, UnitKey, UnitRegistry};

/// Ceiling used when a registry is created without an explicit one.
pub const DEFAULT_TENURE_CEILING: usize = 4096;
