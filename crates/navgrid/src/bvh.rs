//! A static bounding-volume tree over arbitrary values.
//!
//! Values are bulk-loaded with [`Bvh::insert`], after which [`Bvh::build_tree`] splits the flat
//! list of leaves into a binary hierarchy once. The tree is read-only afterwards and can be
//! queried from many threads at the same time.

use std::ops::ControlFlow;

use slotmap::SlotMap;
use thiserror::Error;

use crate::math::Aabb3d;

/// Branches with fewer children than this are left as flat lists.
const TARGET_LEAF_SIZE: usize = 4;

slotmap::new_key_type! {
    /// A key for a node in a [`Bvh`].
    pub struct BvhNodeKey;
}

/// A node of a [`Bvh`].
#[derive(Debug, Clone)]
pub struct BvhNode<T> {
    /// Encloses the node's value or all of its children.
    pub aabb: Aabb3d,
    /// Whether the node holds a value or further nodes.
    pub kind: BvhNodeKind<T>,
}

/// The contents of a [`BvhNode`]. A node never holds both a value and children.
#[derive(Debug, Clone)]
pub enum BvhNodeKind<T> {
    /// A leaf holding one inserted value.
    Leaf(T),
    /// An inner node.
    Branch(Vec<BvhNodeKey>),
}

/// A bounding-volume tree.
#[derive(Debug, Clone)]
pub struct Bvh<T> {
    nodes: SlotMap<BvhNodeKey, BvhNode<T>>,
    root: BvhNodeKey,
}

impl<T> Default for Bvh<T> {
    fn default() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(BvhNode {
            aabb: Aabb3d::EMPTY,
            kind: BvhNodeKind::Branch(Vec::new()),
        });
        Self { nodes, root }
    }
}

impl<T> Bvh<T> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value covering `aabb` as a direct child of the root.
    ///
    /// Call [`Bvh::build_tree`] once all values are inserted.
    pub fn insert(&mut self, aabb: Aabb3d, value: T) {
        let leaf = self.nodes.insert(BvhNode {
            aabb,
            kind: BvhNodeKind::Leaf(value),
        });
        let root = &mut self.nodes[self.root];
        root.aabb = root.aabb.merged(&aabb);
        if let BvhNodeKind::Branch(children) = &mut root.kind {
            children.push(leaf);
        }
    }

    /// Recursively splits the root into a binary hierarchy.
    ///
    /// Every branch with at least [`TARGET_LEAF_SIZE`] children has them sorted by centroid along
    /// its longest axis and divided into two halves.
    pub fn build_tree(&mut self) {
        self.split(self.root);
    }

    fn split(&mut self, key: BvhNodeKey) {
        let node = &mut self.nodes[key];
        let axis = node.aabb.longest_axis();
        let BvhNodeKind::Branch(children) = &mut node.kind else {
            return;
        };
        if children.len() < TARGET_LEAF_SIZE {
            return;
        }
        let mut left = std::mem::take(children);

        let nodes = &self.nodes;
        left.sort_by(|a, b| {
            let a = nodes[*a].aabb.center()[axis];
            let b = nodes[*b].aabb.center()[axis];
            a.total_cmp(&b)
        });
        let right = left.split_off(left.len() / 2);

        let left = self.insert_branch(left);
        let right = self.insert_branch(right);
        if let BvhNodeKind::Branch(children) = &mut self.nodes[key].kind {
            children.extend([left, right]);
        }
        self.split(left);
        self.split(right);
    }

    fn insert_branch(&mut self, children: Vec<BvhNodeKey>) -> BvhNodeKey {
        let aabb = children
            .iter()
            .fold(Aabb3d::EMPTY, |aabb, child| aabb.merged(&self.nodes[*child].aabb));
        self.nodes.insert(BvhNode {
            aabb,
            kind: BvhNodeKind::Branch(children),
        })
    }

    /// Calls `visitor` on every value whose box intersects `aabb`.
    ///
    /// Traversal stops as soon as the visitor returns [`ControlFlow::Break`], which is then returned.
    pub fn query<F>(&self, aabb: &Aabb3d, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        self.query_node(self.root, aabb, &mut visitor)
    }

    fn query_node<F>(&self, key: BvhNodeKey, aabb: &Aabb3d, visitor: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&T) -> ControlFlow<()>,
    {
        let BvhNodeKind::Branch(children) = &self.nodes[key].kind else {
            return ControlFlow::Continue(());
        };
        for child in children {
            let node = &self.nodes[*child];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            match &node.kind {
                BvhNodeKind::Leaf(value) => visitor(value)?,
                BvhNodeKind::Branch(_) => self.query_node(*child, aabb, visitor)?,
            }
        }
        ControlFlow::Continue(())
    }

    /// Checks that every node's box is well-formed and contained in its parent's box.
    pub fn validate(&self) -> Result<(), BvhValidationError> {
        self.validate_node(self.root)
    }

    fn validate_node(&self, key: BvhNodeKey) -> Result<(), BvhValidationError> {
        let parent = &self.nodes[key];
        let BvhNodeKind::Branch(children) = &parent.kind else {
            return Ok(());
        };
        for child in children {
            let node = &self.nodes[*child];
            if !node.aabb.is_valid() {
                return Err(BvhValidationError::InvalidAabb { aabb: node.aabb });
            }
            if !parent.aabb.contains(&node.aabb) {
                return Err(BvhValidationError::ChildNotContained {
                    parent: parent.aabb,
                    child: node.aabb,
                });
            }
            self.validate_node(*child)?;
        }
        Ok(())
    }

    /// The box enclosing every inserted value, or `None` if the tree is empty.
    pub fn bounding_box(&self) -> Option<Aabb3d> {
        (!self.is_empty()).then(|| self.nodes[self.root].aabb)
    }

    /// Whether no value was inserted yet.
    pub fn is_empty(&self) -> bool {
        // Only the root exists.
        self.nodes.len() == 1
    }

    /// The number of inserted values.
    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| matches!(node.kind, BvhNodeKind::Leaf(_)))
            .count()
    }

    /// The root node.
    pub fn root(&self) -> &BvhNode<T> {
        &self.nodes[self.root]
    }

    /// Looks up a node by key.
    pub fn node(&self, key: BvhNodeKey) -> Option<&BvhNode<T>> {
        self.nodes.get(key)
    }
}

/// Errors reported by [`Bvh::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BvhValidationError {
    /// A node's minimum corner exceeds its maximum corner.
    #[error("node has an inverted bounding box: {aabb:?}")]
    InvalidAabb {
        /// The offending box
        aabb: Aabb3d,
    },
    /// A child sticks out of its parent.
    #[error("child bounding box {child:?} is not contained in parent {parent:?}")]
    ChildNotContained {
        /// The box of the parent node
        parent: Aabb3d,
        /// The box of the child node
        child: Aabb3d,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn random_aabb(rng: &mut StdRng, extent: f32, max_half_size: f32) -> Aabb3d {
        let center = Vec3A::new(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        );
        let half_size = Vec3A::new(
            rng.gen_range(0.0..max_half_size),
            rng.gen_range(0.0..max_half_size),
            rng.gen_range(0.0..max_half_size),
        );
        Aabb3d::new(center, half_size)
    }

    fn depth<T>(bvh: &Bvh<T>, node: &BvhNode<T>) -> usize {
        match &node.kind {
            BvhNodeKind::Leaf(_) => 0,
            BvhNodeKind::Branch(children) => {
                1 + children
                    .iter()
                    .map(|child| depth(bvh, bvh.node(*child).unwrap()))
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    #[test]
    fn query_finds_every_intersecting_box() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let boxes: Vec<_> = (0..500)
            .map(|_| random_aabb(&mut rng, 100.0, 8.0))
            .collect();
        let mut bvh = Bvh::new();
        for (i, aabb) in boxes.iter().enumerate() {
            bvh.insert(*aabb, i);
        }
        bvh.build_tree();
        bvh.validate().unwrap();

        for _ in 0..200 {
            let query = random_aabb(&mut rng, 100.0, 20.0);
            let mut found = Vec::new();
            let flow = bvh.query(&query, |i| {
                found.push(*i);
                ControlFlow::Continue(())
            });
            assert_eq!(flow, ControlFlow::Continue(()));
            found.sort_unstable();

            let expected: Vec<_> = boxes
                .iter()
                .enumerate()
                .filter(|(_, aabb)| aabb.intersects(&query))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn build_tree_produces_a_shallow_hierarchy() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut bvh = Bvh::new();
        for i in 0..1024 {
            bvh.insert(random_aabb(&mut rng, 50.0, 1.0), i);
        }
        assert_eq!(depth(&bvh, bvh.root()), 1);
        bvh.build_tree();
        bvh.validate().unwrap();
        let depth = depth(&bvh, bvh.root());
        assert!((8..=12).contains(&depth), "unexpected depth {depth}");
    }

    #[test]
    fn small_trees_stay_flat() {
        let mut bvh = Bvh::new();
        for i in 0..3 {
            let center = Vec3A::splat(i as f32 * 3.0);
            bvh.insert(Aabb3d::new(center, Vec3A::ONE), i);
        }
        bvh.build_tree();
        let BvhNodeKind::Branch(children) = &bvh.root().kind else {
            panic!("root must be a branch");
        };
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn query_stops_when_visitor_breaks() {
        let mut bvh = Bvh::new();
        for i in 0..64 {
            bvh.insert(Aabb3d::new(Vec3A::ZERO, Vec3A::splat(1.0 + i as f32)), i);
        }
        bvh.build_tree();
        let mut visited = 0;
        let flow = bvh.query(&Aabb3d::new(Vec3A::ZERO, Vec3A::ONE), |_| {
            visited += 1;
            if visited == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(visited, 5);
    }

    #[test]
    fn bounding_box_grows_with_inserts() {
        let mut bvh = Bvh::new();
        assert!(bvh.is_empty());
        assert_eq!(bvh.bounding_box(), None);
        bvh.insert(Aabb3d::from_min_max([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]), ());
        bvh.insert(Aabb3d::from_min_max([-2.0, 3.0, 0.5], [-1.0, 4.0, 0.5]), ());
        assert_eq!(
            bvh.bounding_box(),
            Some(Aabb3d::from_min_max([-2.0, 0.0, 0.0], [1.0, 4.0, 1.0]))
        );
    }

    #[test]
    fn validate_rejects_inverted_leaf() {
        let mut bvh = Bvh::new();
        let inverted = Aabb3d::from_min_max([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]);
        bvh.insert(inverted, ());
        assert_eq!(
            bvh.validate(),
            Err(BvhValidationError::InvalidAabb { aabb: inverted })
        );
    }
}
