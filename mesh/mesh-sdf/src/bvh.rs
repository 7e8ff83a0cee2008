//! Bounding Volume Hierarchy for nearest-triangle queries.
//!
//! The tree is stored flat: nodes live in one `Vec` in pre-order (node, left
//! subtree, right subtree) and reference their children by index. Leaves own
//! a contiguous range of a permuted primitive-index array, so a traversal
//! touches two arrays and never chases pointers.
//!
//! Nearest queries are a branch-and-bound walk with an explicit stack,
//! pruning subtrees whose box is farther than the best hit so far.

use mesh_types::{Aabb, Point3, Triangle};
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

use crate::query::{TriangleFeature, closest_point_on_triangle};

/// A node of the flattened hierarchy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BvhNode {
    /// Node with two children.
    Internal {
        /// Bounding box of all triangles in this subtree.
        bbox: Aabb,
        /// Index of the left child.
        left: u32,
        /// Index of the right child.
        right: u32,
    },
    /// Node referencing a run of primitive indices.
    Leaf {
        /// Bounding box of the leaf's triangles.
        bbox: Aabb,
        /// First slot in [`Bvh::indices`].
        start: u32,
        /// Number of slots.
        count: u32,
    },
}

impl BvhNode {
    /// Bounding box of this node.
    #[must_use]
    pub const fn bbox(&self) -> &Aabb {
        match self {
            Self::Internal { bbox, .. } | Self::Leaf { bbox, .. } => bbox,
        }
    }

    /// Check whether this is a leaf.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Shift child references by `offset` (used when splicing subtrees).
    const fn relocated(self, offset: u32) -> Self {
        match self {
            Self::Internal { bbox, left, right } => Self::Internal {
                bbox,
                left: left + offset,
                right: right + offset,
            },
            leaf @ Self::Leaf { .. } => leaf,
        }
    }
}

/// Result of a nearest-triangle query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestHit {
    /// Index of the nearest triangle.
    pub primitive: u32,
    /// Closest point on that triangle.
    pub point: Point3<f64>,
    /// Squared distance from the query to `point`.
    pub distance_squared: f64,
    /// Feature of the triangle holding `point`.
    pub feature: TriangleFeature,
}

impl NearestHit {
    /// Distance from the query to the surface.
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance_squared.sqrt()
    }
}

/// Bounding Volume Hierarchy over a triangle array.
///
/// Read-only once built. Primitive ids are positions in the triangle array
/// the tree was built from; queries take that same array.
///
/// # Example
///
/// ```
/// use mesh_sdf::Bvh;
/// use mesh_types::{unit_cube, Point3};
///
/// let triangles: Vec<_> = unit_cube().triangles().collect();
/// let bvh = Bvh::build(&triangles, 2);
///
/// let hit = bvh.nearest(&triangles, &Point3::new(0.5, 0.5, 3.0)).unwrap();
/// assert!((hit.distance() - 2.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
}

/// Recursive builder state shared by every subtree.
struct Builder<'a> {
    boxes: &'a [Aabb],
    centroids: &'a [Point3<f64>],
    max_leaf_size: usize,
    /// Subtrees at least this large fork onto the rayon pool.
    fork_threshold: Option<usize>,
}

impl Builder<'_> {
    /// Append the subtree over `indices` to `nodes` in pre-order.
    ///
    /// `first` is the position of `indices[0]` in the full index array; child
    /// references are relative to the start of `nodes`.
    #[allow(clippy::cast_possible_truncation)]
    fn build(&self, indices: &mut [u32], first: usize, nodes: &mut Vec<BvhNode>) {
        let bbox = indices
            .iter()
            .fold(Aabb::empty(), |acc, &i| acc.union(&self.boxes[i as usize]));

        if indices.len() <= self.max_leaf_size {
            nodes.push(BvhNode::Leaf {
                bbox,
                start: first as u32,
                count: indices.len() as u32,
            });
            return;
        }

        let mid = self.split(indices, &bbox);
        let (left_ids, right_ids) = indices.split_at_mut(mid);

        let me = nodes.len();
        nodes.push(BvhNode::Leaf {
            bbox,
            start: 0,
            count: 0,
        });

        let fork = self
            .fork_threshold
            .is_some_and(|t| left_ids.len() >= t || right_ids.len() >= t);

        let (left, right) = if fork {
            let (left_nodes, right_nodes) = rayon::join(
                || {
                    let mut sub = Vec::new();
                    self.build(left_ids, first, &mut sub);
                    sub
                },
                || {
                    let mut sub = Vec::new();
                    self.build(right_ids, first + mid, &mut sub);
                    sub
                },
            );
            let left = nodes.len();
            nodes.extend(left_nodes.into_iter().map(|n| n.relocated(left as u32)));
            let right = nodes.len();
            nodes.extend(right_nodes.into_iter().map(|n| n.relocated(right as u32)));
            (left, right)
        } else {
            let left = nodes.len();
            self.build(left_ids, first, nodes);
            let right = nodes.len();
            self.build(right_ids, first + mid, nodes);
            (left, right)
        };

        nodes[me] = BvhNode::Internal {
            bbox,
            left: left as u32,
            right: right as u32,
        };
    }

    /// Reorder `indices` into two non-empty halves and return the cut.
    ///
    /// Midpoint of the box's longest axis, stable on input order; when every
    /// centroid lands on one side, a median cut by centroid (ties by index).
    fn split(&self, indices: &mut [u32], bbox: &Aabb) -> usize {
        let axis = bbox.longest_axis();
        let pivot = bbox.center()[axis];
        let coord = |i: u32| self.centroids[i as usize][axis];

        let (below, above): (Vec<u32>, Vec<u32>) =
            indices.iter().partition(|&&i| coord(i) < pivot);

        if below.is_empty() || above.is_empty() {
            indices.sort_unstable_by(|&a, &b| coord(a).total_cmp(&coord(b)).then(a.cmp(&b)));
            return indices.len() / 2;
        }

        let mid = below.len();
        indices[..mid].copy_from_slice(&below);
        indices[mid..].copy_from_slice(&above);
        mid
    }
}

impl Bvh {
    /// Sentinel root index of an empty tree.
    pub const NO_NODE: u32 = u32::MAX;

    /// Build a tree on the calling thread.
    ///
    /// `max_leaf_size` is clamped to at least 1. Degenerate triangles are
    /// indexed like any other.
    #[must_use]
    pub fn build(triangles: &[Triangle], max_leaf_size: usize) -> Self {
        Self::build_with(triangles, max_leaf_size, None)
    }

    /// Build a tree, forking subtrees of at least `parallel_threshold`
    /// triangles onto the current rayon pool.
    ///
    /// The result is identical to [`Bvh::build`].
    #[must_use]
    pub fn build_parallel(
        triangles: &[Triangle],
        max_leaf_size: usize,
        parallel_threshold: usize,
    ) -> Self {
        Self::build_with(triangles, max_leaf_size, Some(parallel_threshold.max(1)))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn build_with(triangles: &[Triangle], max_leaf_size: usize, fork_threshold: Option<usize>) -> Self {
        if triangles.is_empty() {
            return Self::default();
        }

        let (boxes, centroids): (Vec<Aabb>, Vec<Point3<f64>>) = if fork_threshold.is_some() {
            triangles.par_iter().map(|t| (t.aabb(), t.centroid())).unzip()
        } else {
            triangles.iter().map(|t| (t.aabb(), t.centroid())).unzip()
        };

        let builder = Builder {
            boxes: &boxes,
            centroids: &centroids,
            max_leaf_size: max_leaf_size.max(1),
            fork_threshold,
        };

        let mut indices: Vec<u32> = (0..triangles.len() as u32).collect();
        let mut nodes = Vec::with_capacity(2 * triangles.len() / builder.max_leaf_size + 1);
        builder.build(&mut indices, 0, &mut nodes);

        let bvh = Self { nodes, indices };
        let stats = bvh.stats();
        debug!(
            triangles = triangles.len(),
            nodes = bvh.nodes.len(),
            leaves = stats.leaf_count,
            depth = stats.max_depth,
            parallel = fork_threshold.is_some(),
            "Built BVH"
        );
        bvh
    }

    /// Root node index, or [`Bvh::NO_NODE`] when empty.
    #[must_use]
    pub fn root(&self) -> u32 {
        if self.nodes.is_empty() { Self::NO_NODE } else { 0 }
    }

    /// All nodes in pre-order; the root is at index 0.
    #[must_use]
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Permuted primitive ids referenced by the leaves.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of indexed primitives.
    #[must_use]
    pub fn primitive_count(&self) -> usize {
        self.indices.len()
    }

    /// Check if the tree indexes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounding box of the whole tree, empty when there are no primitives.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or_else(Aabb::empty, |n| *n.bbox())
    }

    /// Heap bytes held by the node and index arrays.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of_val(self.nodes.as_slice()) + std::mem::size_of_val(self.indices.as_slice())
    }

    /// Upper bound of [`Bvh::memory_bytes`] for a tree over `triangles`
    /// primitives: every leaf holds at least one, so there are at most
    /// `2n - 1` nodes.
    #[must_use]
    pub const fn max_memory_bytes(triangles: usize) -> usize {
        if triangles == 0 {
            return 0;
        }
        (2 * triangles - 1) * std::mem::size_of::<BvhNode>() + triangles * std::mem::size_of::<u32>()
    }

    /// Primitives of a leaf.
    fn leaf_slice(&self, start: u32, count: u32) -> &[u32] {
        let start = start as usize;
        &self.indices[start..start + count as usize]
    }

    /// Nearest triangle to `point`.
    ///
    /// `triangles` must be the array the tree was built from. Among
    /// equidistant triangles the lowest id wins. Returns `None` for an empty
    /// tree or a query with non-finite coordinates.
    #[must_use]
    pub fn nearest(&self, triangles: &[Triangle], point: &Point3<f64>) -> Option<NearestHit> {
        self.nearest_seeded(triangles, point, None)
    }

    /// [`Bvh::nearest`] starting from a known candidate.
    ///
    /// The exact distance to `seed` bounds the search from the start, so a
    /// good guess prunes most of the tree. The result is the same as the
    /// unseeded query, ties included, whatever the seed. An out-of-range seed
    /// is ignored.
    #[must_use]
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn nearest_seeded(
        &self,
        triangles: &[Triangle],
        point: &Point3<f64>,
        seed: Option<u32>,
    ) -> Option<NearestHit> {
        if self.nodes.is_empty() || !point.coords.iter().all(|c| c.is_finite()) {
            return None;
        }

        let mut best: Option<NearestHit> = seed.and_then(|id| {
            let hit = closest_point_on_triangle(point, triangles.get(id as usize)?);
            // a NaN bound would prune nothing and never be replaced
            (!hit.distance_squared.is_nan()).then_some(NearestHit {
                primitive: id,
                point: hit.point,
                distance_squared: hit.distance_squared,
                feature: hit.feature,
            })
        });
        let mut best_d2 = best.map_or(f64::INFINITY, |b| b.distance_squared);
        let mut stack: SmallVec<[(u32, f64); 64]> = SmallVec::new();
        stack.push((0, self.nodes[0].bbox().distance_squared_to_point(point)));

        while let Some((index, bound)) = stack.pop() {
            // strict: an equally distant subtree may still hold a lower id
            if bound > best_d2 {
                continue;
            }
            match self.nodes[index as usize] {
                BvhNode::Internal { left, right, .. } => {
                    let dl = self.nodes[left as usize].bbox().distance_squared_to_point(point);
                    let dr = self.nodes[right as usize].bbox().distance_squared_to_point(point);
                    let (near, far) = if dl <= dr {
                        ((left, dl), (right, dr))
                    } else {
                        ((right, dr), (left, dl))
                    };
                    if !(far.1 > best_d2) {
                        stack.push(far);
                    }
                    if !(near.1 > best_d2) {
                        stack.push(near);
                    }
                }
                BvhNode::Leaf { start, count, .. } => {
                    for &id in self.leaf_slice(start, count) {
                        let hit = closest_point_on_triangle(point, &triangles[id as usize]);
                        let d2 = hit.distance_squared;
                        let better = d2 < best_d2
                            || (d2 == best_d2 && best.is_none_or(|b| id < b.primitive));
                        if better {
                            best_d2 = d2;
                            best = Some(NearestHit {
                                primitive: id,
                                point: hit.point,
                                distance_squared: d2,
                                feature: hit.feature,
                            });
                        }
                    }
                }
            }
        }

        best
    }

    /// Primitives whose leaf box overlaps `bbox` grown by `tolerance`.
    ///
    /// This is a broad-phase test: candidates are not checked against the
    /// triangles themselves. Ids come out in tree order.
    #[must_use]
    pub fn query_aabb(&self, bbox: &Aabb, tolerance: f64) -> Vec<u32> {
        let mut result = Vec::new();
        if self.nodes.is_empty() {
            return result;
        }

        let mut stack: SmallVec<[u32; 64]> = SmallVec::new();
        stack.push(0);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.bbox().intersects_with_tolerance(bbox, tolerance) {
                continue;
            }
            match *node {
                BvhNode::Internal { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                BvhNode::Leaf { start, count, .. } => {
                    result.extend_from_slice(self.leaf_slice(start, count));
                }
            }
        }
        result
    }

    /// Shape statistics of the tree.
    #[must_use]
    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats::default();
        if self.nodes.is_empty() {
            return stats;
        }

        let mut stack: SmallVec<[(u32, usize); 64]> = SmallVec::new();
        stack.push((0, 0));
        while let Some((index, depth)) = stack.pop() {
            stats.max_depth = stats.max_depth.max(depth);
            match self.nodes[index as usize] {
                BvhNode::Internal { left, right, .. } => {
                    stats.internal_count += 1;
                    stack.push((right, depth + 1));
                    stack.push((left, depth + 1));
                }
                BvhNode::Leaf { count, .. } => {
                    let count = count as usize;
                    stats.leaf_count += 1;
                    stats.total_primitives_in_leaves += count;
                    stats.max_leaf_size = stats.max_leaf_size.max(count);
                }
            }
        }
        stats
    }
}

/// Statistics about BVH structure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BvhStats {
    /// Number of internal (branch) nodes.
    pub internal_count: usize,
    /// Number of leaf nodes.
    pub leaf_count: usize,
    /// Depth of the deepest node (root = 0).
    pub max_depth: usize,
    /// Largest number of primitives in any leaf.
    pub max_leaf_size: usize,
    /// Primitive references across all leaves.
    pub total_primitives_in_leaves: usize,
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_types::{unit_cube, uv_sphere};

    fn sphere_triangles() -> Vec<Triangle> {
        uv_sphere(Point3::origin(), 1.0, 24, 16).triangles().collect()
    }

    fn brute_force(triangles: &[Triangle], point: &Point3<f64>) -> (u32, f64) {
        let mut best = (u32::MAX, f64::INFINITY);
        for (i, tri) in triangles.iter().enumerate() {
            let d2 = closest_point_on_triangle(point, tri).distance_squared;
            if d2 < best.1 {
                best = (i as u32, d2);
            }
        }
        best
    }

    fn grid(n: usize, half: f64) -> Vec<Point3<f64>> {
        let step = 2.0 * half / (n - 1) as f64;
        let mut out = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    out.push(Point3::new(
                        -half + i as f64 * step,
                        -half + j as f64 * step,
                        -half + k as f64 * step,
                    ));
                }
            }
        }
        out
    }

    #[test]
    fn empty_tree() {
        let bvh = Bvh::build(&[], 4);
        assert!(bvh.is_empty());
        assert_eq!(bvh.root(), Bvh::NO_NODE);
        assert!(bvh.bounds().is_empty());
        assert!(bvh.nearest(&[], &Point3::origin()).is_none());
        assert!(bvh.query_aabb(&Aabb::from_point(Point3::origin()), 1.0).is_empty());
        assert_eq!(bvh.stats(), BvhStats::default());
    }

    #[test]
    fn single_triangle_is_a_leaf() {
        let tris = [Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])];
        let bvh = Bvh::build(&tris, 4);
        assert_eq!(bvh.nodes().len(), 1);
        assert!(bvh.nodes()[0].is_leaf());
        assert_eq!(bvh.root(), 0);

        let hit = bvh.nearest(&tris, &Point3::new(0.25, 0.25, 1.0)).unwrap();
        assert_eq!(hit.primitive, 0);
        assert_eq!(hit.feature, TriangleFeature::Face);
        assert_relative_eq!(hit.distance(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn every_primitive_lands_in_exactly_one_leaf() {
        let tris = sphere_triangles();
        let bvh = Bvh::build(&tris, 4);
        let stats = bvh.stats();
        assert_eq!(stats.total_primitives_in_leaves, tris.len());
        assert!(stats.max_leaf_size <= 4);
        assert_eq!(stats.leaf_count, stats.internal_count + 1);

        let mut seen = bvh.indices().to_vec();
        seen.sort_unstable();
        assert!(seen.iter().enumerate().all(|(i, &id)| id as usize == i));
    }

    #[test]
    fn node_boxes_bound_their_subtrees() {
        let tris = sphere_triangles();
        let bvh = Bvh::build(&tris, 3);
        for node in bvh.nodes() {
            match *node {
                BvhNode::Internal { bbox, left, right } => {
                    assert!(bbox.contains_aabb(bvh.nodes()[left as usize].bbox()));
                    assert!(bbox.contains_aabb(bvh.nodes()[right as usize].bbox()));
                }
                BvhNode::Leaf { bbox, start, count } => {
                    for &id in bvh.leaf_slice(start, count) {
                        assert!(bbox.contains_aabb(&tris[id as usize].aabb()));
                    }
                }
            }
        }
    }

    #[test]
    fn nearest_matches_brute_force() {
        let tris = sphere_triangles();
        let bvh = Bvh::build(&tris, 4);
        for q in grid(7, 1.6) {
            let hit = bvh.nearest(&tris, &q).unwrap();
            let (_, d2) = brute_force(&tris, &q);
            assert_relative_eq!(hit.distance_squared, d2, epsilon = 1e-12);
        }
    }

    #[test]
    fn parallel_build_is_identical() {
        let tris = sphere_triangles();
        let sequential = Bvh::build(&tris, 4);
        let parallel = Bvh::build_parallel(&tris, 4, 16);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let tri = Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let far = Triangle::from_arrays([5.0, 5.0, 5.0], [6.0, 5.0, 5.0], [5.0, 6.0, 5.0]);
        let tris = vec![far, tri, far, tri, tri];
        let bvh = Bvh::build(&tris, 1);
        let hit = bvh.nearest(&tris, &Point3::new(0.2, 0.2, 0.5)).unwrap();
        assert_eq!(hit.primitive, 1);
    }

    #[test]
    fn coincident_centroids_fall_back_to_median() {
        let tri = Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let tris = vec![tri; 9];
        let bvh = Bvh::build(&tris, 2);
        let stats = bvh.stats();
        assert_eq!(stats.total_primitives_in_leaves, 9);
        assert!(stats.max_leaf_size <= 2);
    }

    #[test]
    fn non_finite_query_has_no_hit() {
        let tris: Vec<_> = unit_cube().triangles().collect();
        let bvh = Bvh::build(&tris, 4);
        assert!(bvh.nearest(&tris, &Point3::new(f64::NAN, 0.0, 0.0)).is_none());
        assert!(bvh.nearest(&tris, &Point3::new(0.0, f64::INFINITY, 0.0)).is_none());
    }

    #[test]
    fn query_aabb_finds_overlapping_leaves() {
        let tris: Vec<_> = unit_cube().triangles().collect();
        let bvh = Bvh::build(&tris, 1);

        let all = bvh.query_aabb(&bvh.bounds(), 0.0);
        assert_eq!(all.len(), tris.len());

        let far = Aabb::from_point(Point3::new(10.0, 10.0, 10.0));
        assert!(bvh.query_aabb(&far, 0.0).is_empty());
        assert_eq!(bvh.query_aabb(&far, 100.0).len(), tris.len());

        // the bottom face stays below z = 0.9
        let top = Aabb::new(Point3::new(-1.0, -1.0, 0.9), Point3::new(2.0, 2.0, 2.0));
        let mut found = bvh.query_aabb(&top, 0.0);
        found.sort_unstable();
        for id in &found {
            assert!(tris[*id as usize].aabb().max.z >= 0.9);
        }
        assert!(found.contains(&2) && found.contains(&3));
        assert!(!found.contains(&0) && !found.contains(&1));
    }

    #[test]
    fn memory_accounts_for_both_arrays() {
        let tris: Vec<_> = unit_cube().triangles().collect();
        let bvh = Bvh::build(&tris, 4);
        assert_eq!(
            bvh.memory_bytes(),
            bvh.nodes().len() * std::mem::size_of::<BvhNode>() + 12 * 4
        );
    }

    #[test]
    fn seeded_query_matches_unseeded_for_any_seed() {
        let tris = sphere_triangles();
        let bvh = Bvh::build(&tris, 4);
        let last = tris.len() as u32 - 1;
        for q in grid(7, 1.5) {
            let expected = bvh.nearest(&tris, &q);
            for seed in [None, Some(0), Some(last / 2), Some(last), Some(u32::MAX)] {
                assert_eq!(bvh.nearest_seeded(&tris, &q, seed), expected, "seed {seed:?}");
            }
        }
    }

    #[test]
    fn seeded_query_corrects_a_close_runner_up() {
        // two parallel squares, 1e-9 apart in height; the seed is the far one
        let tris = [
            Triangle::from_arrays([0.0, 0.0, 1e-9], [1.0, 0.0, 1e-9], [0.0, 1.0, 1e-9]),
            Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let bvh = Bvh::build(&tris, 1);
        let hit = bvh
            .nearest_seeded(&tris, &Point3::new(0.25, 0.25, -1.0), Some(0))
            .unwrap();
        assert_eq!(hit.primitive, 1);
        assert_eq!(hit.feature, TriangleFeature::Face);
        assert_relative_eq!(hit.distance_squared, 1.0, epsilon = 1e-15);
    }
}
