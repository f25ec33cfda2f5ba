//! Spatial search structures for 3D point sets.
//!
//! This crate provides the data structures behind k-nearest-neighbour
//! queries over static point clouds:
//!
//! - [`Aabb3`] - 3D axis-aligned bounding box
//! - [`MinHeap`] - fixed-capacity binary min-heap (traversal frontier)
//! - [`KSmallestHeap`] - bounded max-heap retaining the K smallest priorities
//! - [`KdTree`] - static, array-backed KD-tree built with the sliding-midpoint rule
//! - [`QueryCache`] - reusable per-thread scratch for KNN queries
//!
//! # Example
//!
//! ```
//! use talus_spatial::{KdTree, QueryCache};
//! use glam::Vec3;
//!
//! let points: Vec<Vec3> = (0..64)
//!     .map(|i| Vec3::new((i % 4) as f32, ((i / 4) % 4) as f32, (i / 16) as f32))
//!     .collect();
//!
//! let tree = KdTree::build(points, 8).unwrap();
//! let mut cache = QueryCache::new(&tree, 4).unwrap();
//!
//! let mut neighbours = [0u32; 4];
//! tree.k_nearest_into(Vec3::ZERO, &mut cache, &mut neighbours);
//! assert!(neighbours.contains(&0));
//! ```

use glam::Vec3;
use thiserror::Error;

/// Errors from tree construction and query setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpatialError {
    /// Tried to build a tree over zero points.
    #[error("cannot build a kd-tree over an empty point set")]
    EmptyPointSet,

    /// A query asked for more neighbours than the tree holds.
    #[error("neighbourhood size {k} exceeds available point count {available}")]
    InsufficientPoints {
        /// Requested neighbour count.
        k: usize,
        /// Points actually present in the tree.
        available: usize,
    },
}

// ============================================================================
// AABB
// ============================================================================

/// 3D axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb3 {
    /// Creates a new AABB from min and max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Computes the bounds of a point slice in a single pass.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let mut min = first;
        let mut max = first;
        for &p in &points[1..] {
            min = min.min(p);
            max = max.max(p);
        }
        Some(Self { min, max })
    }

    /// Returns the center of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the size of the AABB.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Checks if this AABB contains a point (boundary inclusive).
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Returns the point inside the AABB closest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Total surface area of the box.
    pub fn surface_area(&self) -> f32 {
        let s = self.size();
        2.0 * (s.x * s.y + s.y * s.z + s.z * s.x)
    }
}

// ============================================================================
// Bounded heaps
// ============================================================================

/// Fixed-capacity binary min-heap keyed by an `f32` priority.
///
/// Used as the best-first traversal frontier during KNN search. The capacity
/// is set at construction and never grows; pushing past it is a sizing bug
/// in the caller and panics rather than corrupting the traversal.
#[derive(Debug, Clone)]
pub struct MinHeap<T> {
    entries: Vec<(f32, T)>,
    capacity: usize,
}

impl<T: Copy> MinHeap<T> {
    /// Creates an empty heap that can hold at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of entries currently in the heap.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the heap holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts an item with the given priority.
    pub fn push(&mut self, item: T, priority: f32) {
        assert!(
            self.entries.len() < self.capacity,
            "min-heap capacity exceeded ({})",
            self.capacity
        );
        self.entries.push((priority, item));
        self.bubble_up(self.entries.len() - 1);
    }

    /// Removes and returns the minimum-priority item.
    pub fn pop(&mut self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let (_, item) = self.entries.pop().expect("non-empty");
        if !self.entries.is_empty() {
            self.bubble_down(0);
        }
        Some(item)
    }

    fn bubble_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[parent].0 <= self.entries[index].0 {
                break;
            }
            self.entries.swap(parent, index);
            index = parent;
        }
    }

    fn bubble_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.entries[left].0 < self.entries[smallest].0 {
                smallest = left;
            }
            if right < len && self.entries[right].0 < self.entries[smallest].0 {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.entries.swap(index, smallest);
            index = smallest;
        }
    }
}

/// Bounded max-heap that retains the K smallest priorities seen.
///
/// Below capacity every push is inserted. At capacity a push replaces the
/// root (the current largest of the K smallest) only when the new priority
/// is smaller. The root therefore doubles as the pruning bound for KNN
/// search: the biggest smallest squared radius.
///
/// [`pop`](KSmallestHeap::pop) consumes entries in *descending* priority
/// order.
#[derive(Debug, Clone)]
pub struct KSmallestHeap {
    entries: Vec<(f32, u32)>,
    capacity: usize,
}

impl KSmallestHeap {
    /// Creates a heap retaining the `capacity` smallest entries.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "k-smallest heap needs capacity > 0");
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once the heap holds exactly K entries.
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// The largest priority among the retained entries.
    ///
    /// Panics on an empty heap.
    pub fn head_priority(&self) -> f32 {
        self.entries[0].0
    }

    /// Removes all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Offers an item; it is kept only while it ranks among the K smallest.
    pub fn push(&mut self, item: u32, priority: f32) {
        if self.entries.len() == self.capacity {
            // Full: only replace the current maximum with a smaller entry.
            if priority < self.entries[0].0 {
                self.entries[0] = (priority, item);
                self.bubble_down(0);
            }
        } else {
            self.entries.push((priority, item));
            self.bubble_up(self.entries.len() - 1);
        }
    }

    /// Removes and returns the largest remaining entry as `(item, priority)`.
    pub fn pop(&mut self) -> Option<(u32, f32)> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let (priority, item) = self.entries.pop().expect("non-empty");
        if !self.entries.is_empty() {
            self.bubble_down(0);
        }
        Some((item, priority))
    }

    fn bubble_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[parent].0 >= self.entries[index].0 {
                break;
            }
            self.entries.swap(parent, index);
            index = parent;
        }
    }

    fn bubble_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut largest = index;
            if left < len && self.entries[left].0 > self.entries[largest].0 {
                largest = left;
            }
            if right < len && self.entries[right].0 > self.entries[largest].0 {
                largest = right;
            }
            if largest == index {
                break;
            }
            self.entries.swap(index, largest);
            index = largest;
        }
    }
}

// ============================================================================
// KD-tree
// ============================================================================

/// A node of the KD-tree: bounds, a half-open range into the permutation
/// array, and split data for internal nodes.
#[derive(Debug, Clone, Copy)]
pub struct KdNode {
    /// Bounding box of every point in this node's range.
    pub bounds: Aabb3,
    /// Range start into the permutation array (inclusive).
    pub start: u32,
    /// Range end into the permutation array (exclusive).
    pub end: u32,
    split: Option<KdSplit>,
}

#[derive(Debug, Clone, Copy)]
struct KdSplit {
    axis: usize,
    coord: f32,
    negative: u32,
    positive: u32,
}

impl KdNode {
    fn leaf(bounds: Aabb3, start: u32, end: u32) -> Self {
        Self {
            bounds,
            start,
            end,
            split: None,
        }
    }

    /// Number of points covered by this node.
    pub fn count(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Returns true if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    /// Split axis and coordinate for internal nodes.
    pub fn split_plane(&self) -> Option<(usize, f32)> {
        self.split.map(|s| (s.axis, s.coord))
    }

    /// Child node ids as `(negative, positive)` for internal nodes.
    pub fn children(&self) -> Option<(u32, u32)> {
        self.split.map(|s| (s.negative, s.positive))
    }
}

/// Static KD-tree over a 3D point set.
///
/// The tree owns the points and a permutation array that reorders point
/// indices into contiguous per-node ranges; every node addresses its points
/// as `permutation[start..end]`. Construction splits along the widest axis
/// using the sliding-midpoint pivot rule, so clustered data cannot produce
/// empty children, and partitions the permutation in place so no per-level
/// allocation happens.
///
/// The structure is immutable after construction; queries go through
/// [`k_nearest_into`](KdTree::k_nearest_into) with a caller-owned
/// [`QueryCache`] so concurrent queries never share mutable state.
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<Vec3>,
    permutation: Vec<u32>,
    nodes: Vec<KdNode>,
    max_points_per_leaf: usize,
}

impl KdTree {
    /// Root node id.
    pub const ROOT: u32 = 0;

    /// Builds a tree over `points`, splitting nodes larger than
    /// `max_points_per_leaf`.
    pub fn build(points: Vec<Vec3>, max_points_per_leaf: usize) -> Result<Self, SpatialError> {
        assert!(max_points_per_leaf >= 1, "leaf size must be at least 1");
        let count = points.len();
        if count == 0 {
            return Err(SpatialError::EmptyPointSet);
        }

        let bounds = Aabb3::from_points(&points).expect("non-empty");
        let node_estimate = 4 * count.div_ceil(max_points_per_leaf) + 1;

        let mut tree = Self {
            points,
            permutation: (0..count as u32).collect(),
            nodes: Vec::with_capacity(node_estimate),
            max_points_per_leaf,
        };

        tree.nodes.push(KdNode::leaf(bounds, 0, count as u32));
        if count > max_points_per_leaf {
            tree.split_node(Self::ROOT);
        }
        Ok(tree)
    }

    /// Number of points in the tree.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the tree holds no points (never true post-build).
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The indexed point set.
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// All nodes; index 0 is the root.
    pub fn nodes(&self) -> &[KdNode] {
        &self.nodes
    }

    /// Bounds of the whole point set.
    pub fn bounds(&self) -> Aabb3 {
        self.nodes[Self::ROOT as usize].bounds
    }

    /// Original point indices covered by `node`.
    pub fn indices_in(&self, node: &KdNode) -> &[u32] {
        &self.permutation[node.start as usize..node.end as usize]
    }

    /// Follows split decisions from the root down to the leaf whose region
    /// contains `point`.
    pub fn leaf_for(&self, point: Vec3) -> &KdNode {
        let mut node = &self.nodes[Self::ROOT as usize];
        while let Some(split) = node.split {
            node = if point[split.axis] < split.coord {
                &self.nodes[split.negative as usize]
            } else {
                &self.nodes[split.positive as usize]
            };
        }
        node
    }

    fn split_node(&mut self, node_id: u32) {
        let parent = self.nodes[node_id as usize];
        let bounds = parent.bounds;
        let size = bounds.size();

        // Split along the widest extent.
        let mut axis = 0;
        if size.y > size[axis] {
            axis = 1;
        }
        if size.z > size[axis] {
            axis = 2;
        }

        let pivot = self.sliding_midpoint_pivot(
            parent.start as usize,
            parent.end as usize,
            bounds.min[axis],
            bounds.max[axis],
            axis,
        );

        let mid = self.partition(parent.start as usize, parent.end as usize, pivot, axis);

        // A slid pivot that equals the lower bound cannot tighten the
        // populated child: every point shares that coordinate on this axis
        // and recursing would never make progress. Keep the node a leaf.
        // Any other pivot may leave one child empty (zero thickness), but
        // the populated sibling's bound tightens to an actual point
        // coordinate, so the recursion terminates.
        if mid == parent.start as usize && pivot <= bounds.min[axis] {
            return;
        }

        let mut negative_bounds = bounds;
        negative_bounds.max[axis] = pivot;
        let mut positive_bounds = bounds;
        positive_bounds.min[axis] = pivot;

        let negative = self.nodes.len() as u32;
        self.nodes
            .push(KdNode::leaf(negative_bounds, parent.start, mid as u32));
        let positive = self.nodes.len() as u32;
        self.nodes
            .push(KdNode::leaf(positive_bounds, mid as u32, parent.end));

        self.nodes[node_id as usize].split = Some(KdSplit {
            axis,
            coord: pivot,
            negative,
            positive,
        });

        if self.nodes[negative as usize].count() > self.max_points_per_leaf {
            self.split_node(negative);
        }
        if self.nodes[positive as usize].count() > self.max_points_per_leaf {
            self.split_node(positive);
        }
    }

    /// Sliding-midpoint pivot: the midpoint of the axis extent when points
    /// lie on both sides of it, otherwise the extreme value of the occupied
    /// side so the empty side collapses to zero thickness.
    fn sliding_midpoint_pivot(
        &self,
        start: usize,
        end: usize,
        bounds_min: f32,
        bounds_max: f32,
        axis: usize,
    ) -> f32 {
        let midpoint = (bounds_min + bounds_max) * 0.5;

        let mut negative = false;
        let mut positive = false;
        for &index in &self.permutation[start..end] {
            if self.points[index as usize][axis] < midpoint {
                negative = true;
            } else {
                positive = true;
            }
            if negative && positive {
                return midpoint;
            }
        }

        if negative {
            // All points below the midpoint: slide to their maximum.
            let mut neg_max = f32::MIN;
            for &index in &self.permutation[start..end] {
                neg_max = neg_max.max(self.points[index as usize][axis]);
            }
            neg_max
        } else {
            // All points at or above the midpoint: slide to their minimum.
            let mut pos_min = f32::MAX;
            for &index in &self.permutation[start..end] {
                pos_min = pos_min.min(self.points[index as usize][axis]);
            }
            pos_min
        }
    }

    /// Hoare-style in-place partition of `permutation[start..end]` around
    /// `pivot` on `axis`. Returns the split index: everything in
    /// `[start, split)` is below the pivot, everything in `[split, end)` at
    /// or above it.
    fn partition(&mut self, start: usize, end: usize, pivot: f32, axis: usize) -> usize {
        let mut left = start;
        let mut right = end;

        loop {
            while left < right && self.points[self.permutation[left] as usize][axis] < pivot {
                left += 1;
            }
            while right > left && self.points[self.permutation[right - 1] as usize][axis] >= pivot {
                right -= 1;
            }
            if left + 1 < right {
                self.permutation.swap(left, right - 1);
            } else {
                return left;
            }
        }
    }
}

// ============================================================================
// KNN query
// ============================================================================

/// Frontier payload: a node plus the closest point of its region to the
/// query position.
#[derive(Debug, Clone, Copy)]
struct KdQueryNode {
    node: u32,
    closest: Vec3,
}

/// Reusable scratch state for KNN queries.
///
/// Owns the traversal frontier and the bounded result heap so repeated
/// queries allocate nothing. A cache must only ever be used by one thread
/// at a time; give each worker its own.
#[derive(Debug)]
pub struct QueryCache {
    k: usize,
    frontier: MinHeap<KdQueryNode>,
    results: KSmallestHeap,
}

impl QueryCache {
    /// Creates scratch for `k`-nearest queries against `tree`.
    ///
    /// Fails when `k` is zero or exceeds the tree's point count; the query
    /// engine never silently clamps a neighbourhood size.
    pub fn new(tree: &KdTree, k: usize) -> Result<Self, SpatialError> {
        if k == 0 || k > tree.len() {
            return Err(SpatialError::InsufficientPoints {
                k,
                available: tree.len(),
            });
        }
        Ok(Self {
            k,
            // Each tree node enters the frontier at most once, so the node
            // count is a hard capacity bound.
            frontier: MinHeap::with_capacity(tree.nodes().len()),
            results: KSmallestHeap::new(k),
        })
    }

    /// The neighbourhood size this cache was built for.
    pub fn k(&self) -> usize {
        self.k
    }

    fn reset(&mut self) {
        self.frontier.clear();
        self.results.clear();
    }
}

impl KdTree {
    /// Finds the `cache.k()` nearest points to `query` and writes their
    /// indices into `out` in descending-distance order.
    ///
    /// Panics if `out.len() != cache.k()`.
    pub fn k_nearest_into(&self, query: Vec3, cache: &mut QueryCache, out: &mut [u32]) {
        assert_eq!(
            out.len(),
            cache.k,
            "output slice must hold exactly k indices"
        );
        self.search(query, cache);
        for slot in out.iter_mut() {
            let (index, _) = cache.results.pop().expect("search yields exactly k");
            *slot = index;
        }
    }

    /// Returns only the K-th nearest point (the farthest of the K nearest).
    ///
    /// The distance to it is a local density proxy: the smaller it is, the
    /// denser the neighbourhood around `query`.
    pub fn k_nearest_last(&self, query: Vec3, cache: &mut QueryCache) -> u32 {
        self.search(query, cache);
        // Descending pop order, so the first pop is the K-th nearest.
        let (index, _) = cache.results.pop().expect("search yields exactly k");
        index
    }

    /// Best-first branch-and-bound KNN search; fills `cache.results`.
    fn search(&self, query: Vec3, cache: &mut QueryCache) {
        cache.reset();
        let k = cache.k;

        // Biggest smallest squared radius: the pruning bound. Infinite until
        // the result heap first fills.
        let mut bssr = f32::INFINITY;

        let root_closest = self.nodes[Self::ROOT as usize].bounds.closest_point(query);
        push_frontier(&mut cache.frontier, Self::ROOT, root_closest, query);

        while let Some(query_node) = cache.frontier.pop() {
            if query_node.closest.distance_squared(query) > bssr {
                continue;
            }

            let node = self.nodes[query_node.node as usize];
            if let Some(split) = node.split {
                let mut closest = query_node.closest;

                // The inherited closest point already lies in one child's
                // half-space; that child keeps it unchanged. The sibling gets
                // it projected onto the split plane.
                let (near, far) = if closest[split.axis] < split.coord {
                    (split.negative, split.positive)
                } else {
                    (split.positive, split.negative)
                };

                push_frontier(&mut cache.frontier, near, closest, query);

                closest[split.axis] = split.coord;
                if self.nodes[far as usize].count() > 0 {
                    push_frontier(&mut cache.frontier, far, closest, query);
                }
            } else {
                for &index in self.indices_in(&node) {
                    let dist_sq = self.points[index as usize].distance_squared(query);
                    if dist_sq <= bssr {
                        cache.results.push(index, dist_sq);
                        if cache.results.len() == k {
                            bssr = cache.results.head_priority();
                        }
                    }
                }
            }
        }
    }
}

fn push_frontier(frontier: &mut MinHeap<KdQueryNode>, node: u32, closest: Vec3, query: Vec3) {
    let dist_sq = closest.distance_squared(query);
    frontier.push(KdQueryNode { node, closest }, dist_sq);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(count: usize, seed: u64) -> Vec<Vec3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Vec3::new(
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-10.0..10.0),
                )
            })
            .collect()
    }

    fn brute_force_k_nearest(points: &[Vec3], query: Vec3, k: usize) -> Vec<u32> {
        let mut indexed: Vec<(u32, f32)> = points
            .iter()
            .enumerate()
            .map(|(i, &p)| (i as u32, p.distance_squared(query)))
            .collect();
        indexed.sort_by(|a, b| a.1.total_cmp(&b.1));
        indexed.truncate(k);
        indexed.into_iter().map(|(i, _)| i).collect()
    }

    // Aabb tests

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb3::from_points(&[
            Vec3::new(-1.0, 0.0, 3.0),
            Vec3::new(2.0, -5.0, 1.0),
            Vec3::new(0.0, 1.0, 2.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -5.0, 1.0));
        assert_eq!(aabb.max, Vec3::new(2.0, 1.0, 3.0));
        assert!(Aabb3::from_points(&[]).is_none());
    }

    #[test]
    fn test_aabb_closest_point() {
        let aabb = Aabb3::new(Vec3::ZERO, Vec3::ONE);
        // Inside: unchanged.
        assert_eq!(aabb.closest_point(Vec3::splat(0.5)), Vec3::splat(0.5));
        // Outside: clamped per axis.
        assert_eq!(
            aabb.closest_point(Vec3::new(2.0, -1.0, 0.5)),
            Vec3::new(1.0, 0.0, 0.5)
        );
    }

    #[test]
    fn test_aabb_surface_area() {
        let aabb = Aabb3::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.surface_area(), 22.0);
    }

    // Heap tests

    #[test]
    fn test_min_heap_orders_pops() {
        let mut heap = MinHeap::with_capacity(16);
        for (i, p) in [5.0, 1.0, 4.0, 2.0, 3.0, 0.5].iter().enumerate() {
            heap.push(i, *p);
        }
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop()).collect();
        assert_eq!(order, vec![5, 1, 3, 4, 2, 0]);
    }

    #[test]
    #[should_panic(expected = "capacity exceeded")]
    fn test_min_heap_capacity_panics() {
        let mut heap = MinHeap::with_capacity(2);
        heap.push(0, 1.0);
        heap.push(1, 2.0);
        heap.push(2, 3.0);
    }

    #[test]
    fn test_k_smallest_retains_smallest_descending() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut priorities: Vec<f32> = (0..200).map(|_| rng.random_range(0.0..100.0)).collect();

        let k = 10;
        let mut heap = KSmallestHeap::new(k);
        for (i, &p) in priorities.iter().enumerate() {
            heap.push(i as u32, p);
        }

        let mut popped = Vec::new();
        while let Some((_, priority)) = heap.pop() {
            popped.push(priority);
        }

        // Popped in descending order.
        for pair in popped.windows(2) {
            assert!(pair[0] >= pair[1]);
        }

        // Exactly the k smallest priorities seen.
        priorities.sort_by(f32::total_cmp);
        let mut expected: Vec<f32> = priorities[..k].to_vec();
        expected.reverse();
        assert_eq!(popped, expected);
    }

    #[test]
    fn test_k_smallest_head_is_pruning_bound() {
        let mut heap = KSmallestHeap::new(3);
        heap.push(0, 9.0);
        heap.push(1, 1.0);
        heap.push(2, 5.0);
        assert!(heap.is_full());
        assert_eq!(heap.head_priority(), 9.0);

        // A smaller entry evicts the head and tightens the bound.
        heap.push(3, 2.0);
        assert_eq!(heap.head_priority(), 5.0);

        // A larger entry is ignored.
        heap.push(4, 100.0);
        assert_eq!(heap.head_priority(), 5.0);
    }

    // KD-tree construction tests

    #[test]
    fn test_build_empty_fails() {
        assert_eq!(
            KdTree::build(Vec::new(), 8).unwrap_err(),
            SpatialError::EmptyPointSet
        );
    }

    #[test]
    fn test_leaf_ranges_partition_points() {
        let points = random_points(2000, 11);
        let tree = KdTree::build(points, 16).unwrap();

        let mut seen = vec![false; tree.len()];
        for node in tree.nodes() {
            if !node.is_leaf() {
                continue;
            }
            for &index in tree.indices_in(node) {
                assert!(!seen[index as usize], "point assigned to two leaves");
                seen[index as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "point missing from every leaf");
    }

    #[test]
    fn test_points_lie_inside_leaf_bounds() {
        let points = random_points(10_000, 3);
        let tree = KdTree::build(points.clone(), 32).unwrap();

        for node in tree.nodes() {
            if node.is_leaf() {
                for &index in tree.indices_in(node) {
                    assert!(node.bounds.contains_point(points[index as usize]));
                }
            }
        }

        // Descending by split decisions reaches the leaf holding the point.
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..1000 {
            let index = rng.random_range(0..points.len());
            let leaf = tree.leaf_for(points[index]);
            assert!(tree.indices_in(leaf).contains(&(index as u32)));
        }
    }

    #[test]
    fn test_children_split_parent_range() {
        let points = random_points(512, 23);
        let tree = KdTree::build(points, 8).unwrap();

        for node in tree.nodes() {
            if let Some((neg, pos)) = node.children() {
                let neg = &tree.nodes()[neg as usize];
                let pos = &tree.nodes()[pos as usize];
                assert_eq!(neg.start, node.start);
                assert_eq!(neg.end, pos.start);
                assert_eq!(pos.end, node.end);
            }
        }
    }

    #[test]
    fn test_sliding_midpoint_handles_clustered_points() {
        // All mass near one corner plus a single far outlier. A plain
        // midpoint split would produce an empty child at every level.
        let mut points = vec![Vec3::splat(100.0)];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..255 {
            points.push(Vec3::new(
                rng.random_range(0.0..0.01),
                rng.random_range(0.0..0.01),
                rng.random_range(0.0..0.01),
            ));
        }

        let tree = KdTree::build(points, 4).unwrap();
        for node in tree.nodes() {
            if let Some((neg, pos)) = node.children() {
                assert!(tree.nodes()[neg as usize].count() > 0);
                assert!(tree.nodes()[pos as usize].count() > 0);
            }
        }
    }

    #[test]
    fn test_duplicate_points_terminate() {
        let points = vec![Vec3::splat(1.0); 100];
        let tree = KdTree::build(points, 4).unwrap();
        // Cannot be split below the leaf limit, but must not recurse forever.
        assert!(tree.nodes()[0].is_leaf());
    }

    #[test]
    fn test_split_progresses_when_all_points_exceed_midpoint() {
        // One outlier at the origin drags the bounds far below a dense band
        // near 1.0, so every split inside the band sees all its points above
        // the node midpoint. The slid pivot must still subdivide the band
        // down to the leaf limit instead of giving up.
        let mut rng = StdRng::seed_from_u64(31);
        let mut points = vec![Vec3::ZERO];
        for _ in 0..1000 {
            points.push(Vec3::new(
                rng.random_range(0.9..1.0),
                rng.random_range(0.9..1.0),
                rng.random_range(0.9..1.0),
            ));
        }

        let tree = KdTree::build(points, 8).unwrap();
        for node in tree.nodes() {
            if node.is_leaf() {
                assert!(node.count() <= 8, "leaf holds {} points", node.count());
            }
        }
    }

    // KNN query tests

    #[test]
    fn test_knn_matches_brute_force() {
        let points = random_points(500, 41);
        let tree = KdTree::build(points.clone(), 16).unwrap();

        let k = 10;
        let mut cache = QueryCache::new(&tree, k).unwrap();
        let mut result = vec![0u32; k];
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..50 {
            let query = Vec3::new(
                rng.random_range(-12.0..12.0),
                rng.random_range(-12.0..12.0),
                rng.random_range(-12.0..12.0),
            );

            tree.k_nearest_into(query, &mut cache, &mut result);

            let mut got = result.clone();
            let mut expected = brute_force_k_nearest(&points, query, k);
            got.sort_unstable();
            expected.sort_unstable();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_knn_result_order_is_descending_distance() {
        let points = random_points(300, 9);
        let tree = KdTree::build(points.clone(), 16).unwrap();

        let mut cache = QueryCache::new(&tree, 8).unwrap();
        let mut result = [0u32; 8];
        tree.k_nearest_into(Vec3::ZERO, &mut cache, &mut result);

        let distances: Vec<f32> = result
            .iter()
            .map(|&i| points[i as usize].distance_squared(Vec3::ZERO))
            .collect();
        for pair in distances.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_k_nearest_last_density_ordering() {
        // A tight cluster and a sparse one: the distance to the K-th
        // neighbour must be smaller inside the tight cluster.
        let mut points = Vec::new();
        let mut rng = StdRng::seed_from_u64(77);
        for _ in 0..50 {
            points.push(Vec3::new(
                rng.random_range(0.0..0.1),
                rng.random_range(0.0..0.1),
                rng.random_range(0.0..0.1),
            ));
        }
        for _ in 0..50 {
            points.push(Vec3::new(
                rng.random_range(10.0..20.0),
                rng.random_range(10.0..20.0),
                rng.random_range(10.0..20.0),
            ));
        }

        let tree = KdTree::build(points.clone(), 8).unwrap();
        let mut cache = QueryCache::new(&tree, 5).unwrap();

        let dense_query = Vec3::splat(0.05);
        let sparse_query = Vec3::splat(15.0);

        let dense_last = tree.k_nearest_last(dense_query, &mut cache);
        let sparse_last = tree.k_nearest_last(sparse_query, &mut cache);

        let dense_d = points[dense_last as usize].distance_squared(dense_query);
        let sparse_d = points[sparse_last as usize].distance_squared(sparse_query);
        assert!(dense_d < sparse_d);
    }

    #[test]
    fn test_query_cache_rejects_oversized_k() {
        let tree = KdTree::build(random_points(10, 1), 4).unwrap();
        assert!(matches!(
            QueryCache::new(&tree, 11),
            Err(SpatialError::InsufficientPoints {
                k: 11,
                available: 10
            })
        ));
        assert!(QueryCache::new(&tree, 10).is_ok());
        assert!(QueryCache::new(&tree, 0).is_err());
    }

    #[test]
    fn test_query_cache_is_reusable() {
        let points = random_points(200, 13);
        let tree = KdTree::build(points.clone(), 16).unwrap();
        let mut cache = QueryCache::new(&tree, 4).unwrap();

        let mut first = [0u32; 4];
        let mut again = [0u32; 4];
        tree.k_nearest_into(Vec3::ONE, &mut cache, &mut first);
        tree.k_nearest_into(Vec3::splat(-3.0), &mut cache, &mut again);
        tree.k_nearest_into(Vec3::ONE, &mut cache, &mut again);
        assert_eq!(first, again);
    }
}
