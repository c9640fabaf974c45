//! All-pairs broad phase.

use std::collections::BTreeMap;

use crate::error::{PhysicsError, Result};
use crate::physics::aabb::Aabb;

use super::{BroadPhase, CollisionPair, ProxyId};

/// `O(n^2)` pairwise AABB test over every tracked proxy.
///
/// Slow, but trivially correct: the other strategies are tested against it.
#[derive(Debug, Default)]
pub struct BruteForce {
    proxies: BTreeMap<ProxyId, Aabb>,
    checks: usize,
}

impl BruteForce {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadPhase for BruteForce {
    fn add(&mut self, id: ProxyId, aabb: Aabb) {
        self.proxies.insert(id, aabb);
    }

    fn remove(&mut self, id: ProxyId) -> Result<()> {
        self.proxies
            .remove(&id)
            .map(|_| ())
            .ok_or(PhysicsError::UnknownProxy(id))
    }

    fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> Result<()> {
        let slot = self
            .proxies
            .get_mut(&id)
            .ok_or(PhysicsError::UnknownProxy(id))?;
        *slot = aabb;
        Ok(())
    }

    fn clear(&mut self) {
        self.proxies.clear();
    }

    fn update(&mut self) {}

    fn calculate_pairs(&mut self) -> Vec<CollisionPair> {
        // BTreeMap iterates in key order, so pairs come out canonical and sorted.
        let entries: Vec<(ProxyId, Aabb)> = self.proxies.iter().map(|(k, v)| (*k, *v)).collect();
        let mut pairs = Vec::new();
        self.checks = 0;

        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (id_a, aabb_a) = &entries[i];
                let (id_b, aabb_b) = &entries[j];
                self.checks += 1;
                if aabb_a.collides(aabb_b) {
                    pairs.push(CollisionPair { a: *id_a, b: *id_b });
                }
            }
        }

        pairs
    }

    fn checks_made(&self) -> usize {
        self.checks
    }

    fn len(&self) -> usize {
        self.proxies.len()
    }

    fn debug_bounds(&self) -> Vec<Aabb> {
        self.proxies.values().copied().collect()
    }
}
