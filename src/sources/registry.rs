//! Static entropy-source registry.
//!
//! One slot per source kind, filled at init and never emptied. The
//! registry is owned exclusively by the entropy-source manager.

use std::sync::Arc;

use crate::sources::{EntropySource, SourceKind};
use crate::EsdmError;

/// Fixed table of registered source drivers.
pub struct SourceRegistry {
    slots: [Option<Arc<dyn EntropySource>>; SourceKind::COUNT],
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: [const { None }; SourceKind::COUNT],
        }
    }

    /// Registers a driver into its slot.
    ///
    /// At most one driver per kind; a second registration for the same
    /// slot is an argument error.
    pub fn register(&mut self, source: Arc<dyn EntropySource>) -> Result<(), EsdmError> {
        let idx = source.kind().index();
        if self.slots[idx].is_some() {
            return Err(EsdmError::InvalidArgument("source slot already registered"));
        }
        tracing::info!(source = source.name(), "entropy source registered");
        self.slots[idx] = Some(source);
        Ok(())
    }

    /// Returns the driver registered for `kind`, if any.
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn EntropySource>> {
        self.slots[kind.index()].as_ref()
    }

    /// Iterates registered drivers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EntropySource>> {
        self.slots.iter().flatten()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SourceRegistry::new();
        registry
            .register(Arc::new(MockSource::new(SourceKind::Jitter, 256)))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(SourceKind::Jitter).is_some());
        assert!(registry.get(SourceKind::Cpu).is_none());
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut registry = SourceRegistry::new();
        registry
            .register(Arc::new(MockSource::new(SourceKind::Jitter, 256)))
            .unwrap();

        let dup = registry.register(Arc::new(MockSource::new(SourceKind::Jitter, 128)));
        assert!(matches!(dup, Err(EsdmError::InvalidArgument(_))));
    }

    #[test]
    fn test_iter_order_follows_slots() {
        let mut registry = SourceRegistry::new();
        registry
            .register(Arc::new(MockSource::new(SourceKind::KernelRng, 256)))
            .unwrap();
        registry
            .register(Arc::new(MockSource::new(SourceKind::Cpu, 8)))
            .unwrap();

        let kinds: Vec<SourceKind> = registry.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::Cpu, SourceKind::KernelRng]);
    }
}
