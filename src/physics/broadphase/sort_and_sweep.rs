//! Sort-and-sweep (sweep and prune) broad phase.
//!
//! Each axis keeps a list of interval endpoints sorted by value. Objects move
//! a little per frame, so the lists stay nearly sorted and an insertion sort
//! restores order in close to linear time. Whenever a start endpoint passes
//! an end endpoint (or the other way round) the two intervals begin or stop
//! overlapping on that axis, and a [`SweepEvent`] is recorded.
//!
//! The three axis sorts are independent and run as separate jobs. Their
//! events are collected in one mutex-guarded list and applied to the
//! persistent overlap set only after all three jobs have been joined.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PhysicsError, Result};
use crate::jobs::{wait_all, JobError, JobPriority, JobSystem, JobSystemExt};
use crate::physics::aabb::Aabb;

use super::{BroadPhase, CollisionPair, ProxyId};

/// One end of an object's extent along a single axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endpoint {
    /// Dense index of the owning object.
    pub object: u32,
    pub value: f32,
    pub is_start: bool,
}

impl Endpoint {
    /// Sort order: by value, with starts before ends on ties so that touching
    /// intervals count as overlapping.
    #[inline]
    fn precedes(&self, other: &Endpoint) -> bool {
        self.value < other.value || (self.value == other.value && self.is_start && !other.is_start)
    }

    fn cmp_order(&self, other: &Endpoint) -> std::cmp::Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| other.is_start.cmp(&self.is_start))
    }
}

/// Extent of an AABB along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    #[inline]
    pub fn of(aabb: &Aabb, axis: usize) -> Self {
        Self {
            min: aabb.min_on(axis),
            max: aabb.max_on(axis),
        }
    }

    #[inline]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Change in overlap between two objects along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepEvent {
    Begin(u32, u32),
    End(u32, u32),
}

/// Start and end slot of every object in one axis list.
type SlotTable = Vec<[u32; 2]>;

/// Incremental sort-and-sweep over the three world axes.
pub struct SortAndSweep {
    jobs: Arc<dyn JobSystem>,
    proxies: Vec<ProxyId>,
    index_of: HashMap<ProxyId, u32>,
    aabbs: Vec<Aabb>,
    axes: [Vec<Endpoint>; 3],
    slots: [SlotTable; 3],
    overlaps: BTreeSet<CollisionPair>,
    /// Set when the tracked object count changes; the next update rebuilds.
    dirty: bool,
    checks: usize,
    rebuilds: usize,
}

impl SortAndSweep {
    pub fn new(jobs: Arc<dyn JobSystem>) -> Self {
        Self {
            jobs,
            proxies: Vec::new(),
            index_of: HashMap::new(),
            aabbs: Vec::new(),
            axes: Default::default(),
            slots: Default::default(),
            overlaps: BTreeSet::new(),
            dirty: false,
            checks: 0,
            rebuilds: 0,
        }
    }

    /// Full rebuilds performed so far.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Sorted endpoint list for one axis.
    pub fn endpoints(&self, axis: usize) -> &[Endpoint] {
        &self.axes[axis]
    }

    fn index(&self, id: ProxyId) -> Result<u32> {
        self.index_of
            .get(&id)
            .copied()
            .ok_or(PhysicsError::UnknownProxy(id))
    }

    fn pair(&self, a: u32, b: u32) -> CollisionPair {
        CollisionPair::new(self.proxies[a as usize], self.proxies[b as usize])
    }

    /// True when the two objects overlap on all three axes, judged by their
    /// slots in the sorted lists.
    fn overlapping(&self, a: u32, b: u32) -> bool {
        self.slots.iter().all(|table| {
            let [a_start, a_end] = table[a as usize];
            let [b_start, b_end] = table[b as usize];
            a_start < b_end && b_start < a_end
        })
    }

    fn rebuild_slots(&mut self) {
        let count = self.proxies.len();
        for (axis, endpoints) in self.axes.iter().enumerate() {
            let table = &mut self.slots[axis];
            table.clear();
            table.resize(count, [0, 0]);
            for (slot, endpoint) in endpoints.iter().enumerate() {
                let side = if endpoint.is_start { 0 } else { 1 };
                table[endpoint.object as usize][side] = slot as u32;
            }
        }
    }

    fn refresh_values(&mut self) {
        for (axis, endpoints) in self.axes.iter_mut().enumerate() {
            for endpoint in endpoints.iter_mut() {
                let interval = Interval::of(&self.aabbs[endpoint.object as usize], axis);
                endpoint.value = if endpoint.is_start {
                    interval.min
                } else {
                    interval.max
                };
            }
        }
    }

    /// Regenerate and fully sort every axis, then recompute the overlap set
    /// from scratch with a sweep along x.
    fn rebuild(&mut self) {
        for (axis, endpoints) in self.axes.iter_mut().enumerate() {
            endpoints.clear();
            for (object, aabb) in self.aabbs.iter().enumerate() {
                let interval = Interval::of(aabb, axis);
                endpoints.push(Endpoint {
                    object: object as u32,
                    value: interval.min,
                    is_start: true,
                });
                endpoints.push(Endpoint {
                    object: object as u32,
                    value: interval.max,
                    is_start: false,
                });
            }
            endpoints.sort_by(Endpoint::cmp_order);
        }
        self.rebuild_slots();

        self.overlaps.clear();
        let mut active: Vec<u32> = Vec::new();
        for endpoint in &self.axes[0] {
            if endpoint.is_start {
                let aabb = &self.aabbs[endpoint.object as usize];
                for other in &active {
                    self.checks += 1;
                    if aabb.collides(&self.aabbs[*other as usize]) {
                        let pair = self.pair(endpoint.object, *other);
                        self.overlaps.insert(pair);
                    }
                }
                active.push(endpoint.object);
            } else {
                active.retain(|o| *o != endpoint.object);
            }
        }

        self.dirty = false;
        self.rebuilds += 1;
        tracing::debug!(
            objects = self.proxies.len(),
            overlaps = self.overlaps.len(),
            "sort-and-sweep rebuilt"
        );
    }

    /// Re-sort the three axes on the job system and collect crossing events.
    fn sweep_axes(&mut self) -> std::result::Result<Vec<SweepEvent>, JobError> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let handles = self
            .axes
            .iter_mut()
            .map(|axis| {
                let mut endpoints = std::mem::take(axis);
                let events = Arc::clone(&events);
                self.jobs.submit(JobPriority::High, move || {
                    let mut local = Vec::new();
                    insertion_sort(&mut endpoints, &mut local);
                    events.lock().extend(local);
                    endpoints
                })
            })
            .collect();

        let sorted = wait_all(handles)?;
        for (axis, endpoints) in self.axes.iter_mut().zip(sorted) {
            *axis = endpoints;
        }

        let events = std::mem::take(&mut *events.lock());
        Ok(events)
    }

    fn apply_events(&mut self, events: &[SweepEvent]) {
        for event in events {
            self.checks += 1;
            match *event {
                SweepEvent::Begin(a, b) => {
                    if self.overlapping(a, b) {
                        let pair = self.pair(a, b);
                        self.overlaps.insert(pair);
                    }
                }
                SweepEvent::End(a, b) => {
                    if !self.overlapping(a, b) {
                        let pair = self.pair(a, b);
                        self.overlaps.remove(&pair);
                    }
                }
            }
        }
    }
}

/// Single pass insertion sort recording crossings between starts and ends.
fn insertion_sort(endpoints: &mut [Endpoint], events: &mut Vec<SweepEvent>) {
    for i in 1..endpoints.len() {
        let current = endpoints[i];
        let mut j = i;
        while j > 0 && current.precedes(&endpoints[j - 1]) {
            let passed = endpoints[j - 1];
            if current.object != passed.object {
                match (current.is_start, passed.is_start) {
                    (true, false) => events.push(SweepEvent::Begin(current.object, passed.object)),
                    (false, true) => events.push(SweepEvent::End(current.object, passed.object)),
                    _ => {}
                }
            }
            endpoints[j] = passed;
            j -= 1;
        }
        endpoints[j] = current;
    }
}

impl BroadPhase for SortAndSweep {
    fn add(&mut self, id: ProxyId, aabb: Aabb) {
        if let Some(index) = self.index_of.get(&id) {
            self.aabbs[*index as usize] = aabb;
            return;
        }
        self.index_of.insert(id, self.proxies.len() as u32);
        self.proxies.push(id);
        self.aabbs.push(aabb);
        self.dirty = true;
    }

    fn remove(&mut self, id: ProxyId) -> Result<()> {
        let index = self.index(id)? as usize;
        self.index_of.remove(&id);
        self.proxies.swap_remove(index);
        self.aabbs.swap_remove(index);
        if let Some(moved) = self.proxies.get(index) {
            self.index_of.insert(*moved, index as u32);
        }
        self.overlaps.retain(|pair| !pair.contains(id));
        self.dirty = true;
        Ok(())
    }

    fn set_aabb(&mut self, id: ProxyId, aabb: Aabb) -> Result<()> {
        let index = self.index(id)?;
        self.aabbs[index as usize] = aabb;
        Ok(())
    }

    fn clear(&mut self) {
        self.proxies.clear();
        self.index_of.clear();
        self.aabbs.clear();
        for axis in &mut self.axes {
            axis.clear();
        }
        for table in &mut self.slots {
            table.clear();
        }
        self.overlaps.clear();
        self.dirty = false;
    }

    fn update(&mut self) {
        self.checks = 0;
        if self.dirty {
            self.rebuild();
            return;
        }
        if self.proxies.is_empty() {
            return;
        }

        self.refresh_values();
        match self.sweep_axes() {
            Ok(events) => {
                self.rebuild_slots();
                self.apply_events(&events);
            }
            Err(JobError::Panicked(message)) => {
                panic!("sort-and-sweep axis job panicked: {message}")
            }
            Err(err) => {
                tracing::warn!(%err, "sort-and-sweep axis job lost, rebuilding");
                self.rebuild();
            }
        }
    }

    fn calculate_pairs(&mut self) -> Vec<CollisionPair> {
        if self.dirty {
            self.rebuild();
        }
        self.overlaps.iter().copied().collect()
    }

    fn checks_made(&self) -> usize {
        self.checks
    }

    fn len(&self) -> usize {
        self.proxies.len()
    }

    fn debug_bounds(&self) -> Vec<Aabb> {
        self.aabbs.clone()
    }
}
