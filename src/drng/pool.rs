//! Per-node DRNG pool.
//!
//! One DRNG per topology node, with the init DRNG doubling as node 0.
//! The init DRNG is the distinguished fallback serving every caller
//! whose node instance is absent or not yet fully seeded. The pool owns
//! its instances; borrowers hold clones of the shared handles only for
//! the duration of a locked operation.

use std::sync::Arc;

use crate::crypto::{DrngCb, HashCb};
use crate::drng::instance::Drng;
use crate::EsdmError;

/// Fixed-size collection of per-node DRNGs.
pub struct NodePool {
    /// Node-indexed instances; entry 0 is the init DRNG.
    nodes: Vec<Arc<Drng>>,
}

impl NodePool {
    /// Allocates the init DRNG plus one instance per additional node.
    pub fn new(
        drng_cb: &'static dyn DrngCb,
        hash_cb: &'static dyn HashCb,
        node_count: u32,
    ) -> Result<Self, EsdmError> {
        let node_count = node_count.max(1) as usize;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(Arc::new(Drng::alloc(drng_cb, hash_cb)?));
        }
        tracing::info!(nodes = node_count, "DRNG pool allocated");
        Ok(Self { nodes })
    }

    /// The init DRNG, the fallback for all callers.
    pub fn init_drng(&self) -> &Arc<Drng> {
        &self.nodes[0]
    }

    /// Number of online nodes in the pool.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The instance owned by `node`, if within the topology.
    pub fn get(&self, node: u32) -> Option<&Arc<Drng>> {
        self.nodes.get(node as usize)
    }

    /// Selects the DRNG serving a caller on `node`.
    ///
    /// The node instance is used iff present and fully seeded; otherwise
    /// the init DRNG serves the request.
    pub fn select(&self, node: u32) -> Arc<Drng> {
        match self.get(node) {
            Some(drng) if drng.fully_seeded() => {
                tracing::trace!(node, "serving from node DRNG");
                Arc::clone(drng)
            }
            _ => {
                tracing::trace!(node, "serving from init DRNG");
                Arc::clone(self.init_drng())
            }
        }
    }

    /// Iterates online nodes in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<Drng>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, drng)| (i as u32, drng))
    }

    /// True once every online node DRNG is fully seeded.
    pub fn all_fully_seeded(&self) -> bool {
        self.nodes.iter().all(|drng| drng.fully_seeded())
    }

    /// Resets every instance in the pool.
    pub fn reset_all(&self) {
        for (_, drng) in self.iter() {
            drng.reset();
        }
    }

    /// Tears down every instance, dropping crypto state.
    pub fn teardown_all(&self) {
        for (_, drng) in self.iter() {
            drng.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{drng_cb, hash_cb, DrngKind, HashKind};

    fn test_pool(nodes: u32) -> NodePool {
        NodePool::new(
            drng_cb(DrngKind::HashDrbg),
            hash_cb(HashKind::Sha512),
            nodes,
        )
        .unwrap()
    }

    #[test]
    fn test_init_drng_is_node_zero() {
        let pool = test_pool(4);
        assert!(Arc::ptr_eq(pool.init_drng(), pool.get(0).unwrap()));
        assert_eq!(pool.node_count(), 4);
    }

    #[test]
    fn test_selection_falls_back_to_init() {
        let pool = test_pool(2);

        // Nothing seeded: every caller lands on the init DRNG.
        assert!(Arc::ptr_eq(&pool.select(1), pool.init_drng()));

        // Seed node 1: callers on node 1 now use it.
        pool.get(1).unwrap().seed(&[7; 48], true, "node1").unwrap();
        assert!(Arc::ptr_eq(&pool.select(1), pool.get(1).unwrap()));

        // Out-of-range nodes fall back.
        assert!(Arc::ptr_eq(&pool.select(99), pool.init_drng()));
    }

    #[test]
    fn test_all_fully_seeded_tracks_every_node() {
        let pool = test_pool(2);
        assert!(!pool.all_fully_seeded());

        pool.get(0).unwrap().seed(&[1; 48], true, "init").unwrap();
        assert!(!pool.all_fully_seeded());

        pool.get(1).unwrap().seed(&[2; 48], true, "node1").unwrap();
        assert!(pool.all_fully_seeded());
    }

    #[test]
    fn test_reset_all_clears_seed_state() {
        let pool = test_pool(2);
        for (_, drng) in pool.iter() {
            drng.seed(&[3; 48], true, "seed").unwrap();
        }
        assert!(pool.all_fully_seeded());

        pool.reset_all();
        assert!(!pool.all_fully_seeded());
        for (_, drng) in pool.iter() {
            assert!(drng.force_reseed());
        }
    }

    #[test]
    fn test_pool_has_at_least_one_node() {
        let pool = test_pool(0);
        assert_eq!(pool.node_count(), 1);
    }
}
