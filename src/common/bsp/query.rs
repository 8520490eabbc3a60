//! BSP Query: point-in-leaf descent and cluster-to-cluster PVS lookup.

use cgmath::{InnerSpace, Vector3};

use super::{Child, Map};

/// Descends the tree from node 0, returning the id of the leaf containing `pos`.
///
/// At each node the signed distance `d = pos . normal - dist` chooses the front child
/// (`d >= 0`) or the back child (`d < 0`); descent stops when a leaf child is reached.
/// Guaranteed to terminate because the tree is finite and acyclic. If the map has no nodes at
/// all, or descent would index past the node array, leaf `0` is returned rather than panicking.
pub fn find_leaf(map: &Map, pos: Vector3<f32>) -> u32 {
    if map.nodes.is_empty() {
        return 0;
    }

    let mut node_idx: usize = 0;

    loop {
        let node = match map.nodes.get(node_idx) {
            Some(n) => n,
            None => return 0,
        };

        let plane = match map.planes.get(node.plane as usize) {
            Some(p) => p,
            None => return 0,
        };

        let d = pos.dot(plane.normal) - plane.dist;
        let child = if d >= 0.0 {
            node.children[0]
        } else {
            node.children[1]
        };

        match child {
            Child::Leaf(leaf) => return leaf,
            Child::Node(next) => node_idx = next as usize,
        }
    }
}

/// Is cluster `to` potentially visible from cluster `from`? Negative cluster ids (leaves with
/// no PVS row) are treated as always visible, a safe extension of the unguarded lookup this is
/// based on. Symmetry is not assumed: `cluster_visible(a, b)` may differ from `cluster_visible(b,
/// a)`.
pub fn cluster_visible(map: &Map, from: i32, to: i32) -> bool {
    map.visdata.cluster_visible(from, to)
}
