//! The Tracer: swept-AABB collision detection against a decoded map's brush geometry.
//!
//! This reproduces the Quake 3 `CM_BoxTrace` algorithm: the box's local `mins`/`maxs` extents are
//! used directly, with a corner-offset table indexed by a plane's `signbits` picking out the
//! "leading corner" against that plane's normal. The BSP tree is then walked once, splitting the
//! `[p1f, p2f]` fractional interval at each node whose splitting plane the box's swept extent
//! actually straddles; brushes in the leaves the box passes through are clipped one side at a
//! time.
//!
//! `STARTS_OUT`/`ENDS_OUT` are sticky for the whole trace: once one brushside sets one, it stays
//! set for every remaining leaf and brush the sweep visits, exactly as in the reference
//! implementation's `trace->allsolid`/`trace->startsolid` fields. A later brush the box starts
//! outside of does not retroactively clear a flag an earlier brush set. `ALL_SOLID` is derived
//! from those two *accumulated* flags, checked again after every brush: if neither has been
//! observed by any brushside visited so far in this trace, the move is declared embedded in solid
//! and `frac` is forced to zero. Because the check reads the whole-trace accumulator rather than a
//! per-brush local, which brush trips it — and hence whether it trips at all — depends on the
//! order leaves are visited in.

use cgmath::{InnerSpace, Vector3, Zero};

use crate::common::bsp::{Child, Contents, Map, Plane, PlaneKind};

/// Distance, in map units, that a clipping plane is pushed back from the surface it represents.
/// Keeps the box from coming to rest exactly on a surface, where floating point error could put
/// it on either side on the next trace.
const SURF_CLIP_EPSILON: f32 = 0.125;

/// Conservative half-width used in place of the box's real extent when testing a non-axial
/// plane. The true per-plane projection of the box's extents onto a non-axial normal is more
/// expensive to compute, so the reference implementation substitutes a value guaranteed to be
/// larger than any box the tracer will ever see and accepts the resulting over-wide fast-reject
/// margin. Kept as-is (see the movement controller's air-control note for another quirk in the
/// same spirit).
const NON_AXIAL_BOX_OFFSET: f32 = 2048.0;

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TraceFlags: u8 {
        /// Some brush the sweep encountered had the start point outside of it.
        const STARTS_OUT = 0x1;
        /// Some brush the sweep encountered had the end point outside of it.
        const ENDS_OUT   = 0x2;
        /// Some brush the sweep encountered contained both the start and end point (the box
        /// never left solid geometry for that brush).
        const ALL_SOLID  = 0x4;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TraceResult {
    /// Fraction of `[start, end]` actually travelled before the first collision, in `[0, 1]`.
    pub frac: f32,
    pub endpos: Vector3<f32>,
    /// The plane collided with, if `frac < 1.0`.
    pub plane: Option<Plane>,
    pub flags: TraceFlags,
}

impl TraceResult {
    fn unobstructed(end: Vector3<f32>) -> TraceResult {
        TraceResult {
            frac: 1.0,
            endpos: end,
            plane: None,
            flags: TraceFlags::empty(),
        }
    }
}

/// The corner of `[mins, maxs]` picked out by a plane's `signbits`: bit `i` set selects `maxs[i]`,
/// clear selects `mins[i]`.
fn corner_offset(mins: Vector3<f32>, maxs: Vector3<f32>, signbits: u8) -> Vector3<f32> {
    Vector3::new(
        if signbits & 1 != 0 { maxs.x } else { mins.x },
        if signbits & 2 != 0 { maxs.y } else { mins.y },
        if signbits & 4 != 0 { maxs.z } else { mins.z },
    )
}

struct Work<'a> {
    map: &'a Map,
    start: Vector3<f32>,
    end: Vector3<f32>,
    /// The box's local extents, relative to the swept point.
    mins: Vector3<f32>,
    maxs: Vector3<f32>,
    is_point: bool,
    result: TraceResult,
}

/// Sweeps a box with the given local extents from `start` to `end` through `map`, stopping at
/// the first solid brush surface encountered. `mins`/`maxs` are the box's local extents relative
/// to the swept point (e.g. a player hitbox of `(-15,-15,-24)`..`(15,15,32)`).
pub fn trace(
    map: &Map,
    start: Vector3<f32>,
    end: Vector3<f32>,
    mins: Vector3<f32>,
    maxs: Vector3<f32>,
) -> TraceResult {
    let is_point = mins == Vector3::zero() && maxs == Vector3::zero();

    let mut work = Work {
        map,
        start,
        end,
        mins,
        maxs,
        is_point,
        result: TraceResult::unobstructed(end),
    };

    if map.nodes.is_empty() {
        return work.result;
    }

    trace_node(&mut work, 0, 0.0, 1.0, start, end);

    if work.result.frac < 1.0 {
        let t = work.result.frac;
        work.result.endpos = start + (end - start) * t;
    } else {
        work.result.endpos = end;
    }

    work.result
}

fn trace_node(work: &mut Work, node_idx: u32, p1f: f32, p2f: f32, p1: Vector3<f32>, p2: Vector3<f32>) {
    if work.result.frac <= p1f {
        return;
    }

    let node = match work.map.nodes.get(node_idx as usize) {
        Some(n) => n,
        None => return,
    };

    let plane = match work.map.planes.get(node.plane as usize) {
        Some(p) => p,
        None => return,
    };
    let meta = work.map.planes_meta.get(node.plane);

    let (t1, t2, offset) = match meta.map(|m| m.kind) {
        Some(PlaneKind::X) => (
            p1.x - plane.dist,
            p2.x - plane.dist,
            offset_for(work, 0),
        ),
        Some(PlaneKind::Y) => (
            p1.y - plane.dist,
            p2.y - plane.dist,
            offset_for(work, 1),
        ),
        Some(PlaneKind::Z) => (
            p1.z - plane.dist,
            p2.z - plane.dist,
            offset_for(work, 2),
        ),
        _ => {
            let t1 = p1.dot(plane.normal) - plane.dist;
            let t2 = p2.dot(plane.normal) - plane.dist;
            let offset = if work.is_point { 0.0 } else { NON_AXIAL_BOX_OFFSET };
            (t1, t2, offset)
        }
    };

    if t1 >= offset + 1.0 && t2 >= offset + 1.0 {
        descend(work, node.children[0], p1f, p2f, p1, p2);
        return;
    }
    if t1 < -offset - 1.0 && t2 < -offset - 1.0 {
        descend(work, node.children[1], p1f, p2f, p1, p2);
        return;
    }

    // The swept box straddles the plane: split the interval and test the near side first.
    let (side, frac1, frac2) = if t1 < t2 {
        let idist = 1.0 / (t1 - t2);
        let side = 1;
        let frac1 = ((t1 - offset - SURF_CLIP_EPSILON) * idist).clamp(0.0, 1.0);
        let frac2 = ((t1 + offset + SURF_CLIP_EPSILON) * idist).clamp(0.0, 1.0);
        (side, frac1, frac2)
    } else if t1 > t2 {
        let idist = 1.0 / (t1 - t2);
        let side = 0;
        let frac1 = ((t1 + offset + SURF_CLIP_EPSILON) * idist).clamp(0.0, 1.0);
        let frac2 = ((t1 - offset - SURF_CLIP_EPSILON) * idist).clamp(0.0, 1.0);
        (side, frac1, frac2)
    } else {
        (0, 0.0, 1.0)
    };

    let midf1 = p1f + (p2f - p1f) * frac1;
    let mid1 = p1 + (p2 - p1) * frac1;
    descend(work, node.children[side], p1f, midf1, p1, mid1);

    let midf2 = p1f + (p2f - p1f) * frac2;
    let mid2 = p1 + (p2 - p1) * frac2;
    descend(work, node.children[1 - side], midf2, p2f, mid2, p2);
}

fn offset_for(work: &Work, axis: usize) -> f32 {
    (-work.mins[axis]).max(work.maxs[axis])
}

fn descend(
    work: &mut Work,
    child: Child,
    p1f: f32,
    p2f: f32,
    p1: Vector3<f32>,
    p2: Vector3<f32>,
) {
    match child {
        Child::Node(idx) => trace_node(work, idx, p1f, p2f, p1, p2),
        Child::Leaf(idx) => trace_leaf(work, idx),
    }
}

fn trace_leaf(work: &mut Work, leaf_idx: u32) {
    let leaf = match work.map.leaves.get(leaf_idx as usize) {
        Some(l) => l,
        None => return,
    };

    for &brush_idx in &work.map.leafbrushes[leaf.leafbrushes()] {
        let brush = match work.map.brushes.get(brush_idx as usize) {
            Some(b) => b,
            None => continue,
        };
        if brush.n_brushsides == 0 {
            continue;
        }
        let texture = match work.map.textures.get(brush.texture as usize) {
            Some(t) => t,
            None => continue,
        };
        if !texture.contents.contains(Contents::SOLID) {
            continue;
        }

        if work.result.frac <= 0.0 {
            break;
        }

        trace_brush(work, brush_idx);
    }
}

fn trace_brush(work: &mut Work, brush_idx: u32) {
    let brush = match work.map.brushes.get(brush_idx as usize) {
        Some(b) => b,
        None => return,
    };

    let mut enter_frac = -1.0f32;
    let mut leave_frac = 1.0f32;
    let mut clip_plane: Option<Plane> = None;
    let mut got_plane = false;

    for side in &work.map.brushsides[brush.brushsides()] {
        let plane = match work.map.planes.get(side.plane as usize) {
            Some(p) => p,
            None => continue,
        };
        let meta = work.map.planes_meta.get(side.plane);
        let signbits = meta.map(|m| m.signbits).unwrap_or(0);

        let dist = if work.is_point {
            plane.dist
        } else {
            let corner = corner_offset(work.mins, work.maxs, signbits);
            plane.dist - corner.dot(plane.normal)
        };

        let d1 = work.start.dot(plane.normal) - dist;
        let d2 = work.end.dot(plane.normal) - dist;

        if d1 > 0.0 {
            work.result.flags |= TraceFlags::STARTS_OUT;
        }
        if d2 > 0.0 {
            work.result.flags |= TraceFlags::ENDS_OUT;
        }

        if d1 > 0.0 && d2 > 0.0 {
            // Fully outside this side for the whole move: the box never enters the brush.
            return;
        }
        if d1 <= 0.0 && d2 <= 0.0 {
            continue;
        }

        if d1 > d2 {
            let f = ((d1 - SURF_CLIP_EPSILON) / (d1 - d2)).clamp(0.0, 1.0);
            if f > enter_frac {
                enter_frac = f;
                clip_plane = Some(*plane);
                got_plane = true;
            }
        } else {
            let f = ((d1 + SURF_CLIP_EPSILON) / (d1 - d2)).clamp(0.0, 1.0);
            if f < leave_frac {
                leave_frac = f;
            }
        }
    }

    // Checked against the whole-trace accumulator, not a brush-local copy: see the module note on
    // `ALL_SOLID`.
    if !work.result.flags.intersects(TraceFlags::STARTS_OUT | TraceFlags::ENDS_OUT) {
        work.result.flags |= TraceFlags::ALL_SOLID;
        work.result.frac = 0.0;
        return;
    }

    if !got_plane {
        return;
    }

    if enter_frac < leave_frac && enter_frac > -1.0 && enter_frac < work.result.frac {
        work.result.frac = enter_frac.max(0.0);
        work.result.plane = clip_plane;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bsp::{Brush, Brushside, Leaf, Node, PlaneIndex, Texture, Visdata};
    use std::rc::Rc;

    fn point_map_with(
        planes: Vec<Plane>,
        nodes: Vec<Node>,
        leaves: Vec<Leaf>,
        leafbrushes: Vec<u32>,
        brushes: Vec<Brush>,
        brushsides: Vec<Brushside>,
        textures: Vec<Texture>,
    ) -> Map {
        let planes_meta = PlaneIndex::build(&planes);
        Map {
            raw: Rc::from(Vec::new().into_boxed_slice()),
            entities: String::new(),
            textures,
            planes,
            nodes,
            leaves,
            leaffaces: Vec::new(),
            leafbrushes,
            models: Vec::new(),
            brushes,
            brushsides,
            vertices: Vec::new(),
            meshverts: Vec::new(),
            effects: Vec::new(),
            faces: Vec::new(),
            lightmaps: Vec::new(),
            lightvols: Vec::new(),
            visdata: Visdata::empty(),
            planes_meta,
        }
    }

    /// A single solid brush occupying `z <= 0`: floor at z=0, six sides of a closed box.
    pub(super) fn floor_map() -> Map {
        use crate::common::bsp::Child;

        let planes = vec![Plane {
            normal: Vector3::new(0.0, 0.0, 1.0),
            dist: 0.0,
        }];

        let nodes = vec![Node {
            plane: 0,
            children: [Child::Leaf(0), Child::Leaf(1)],
            mins: [-4096, -4096, -4096],
            maxs: [4096, 4096, 4096],
        }];

        let leaves = vec![
            Leaf {
                cluster: 0,
                area: 0,
                mins: [-4096, -4096, 0],
                maxs: [4096, 4096, 4096],
                leafface: 0,
                n_leaffaces: 0,
                leafbrush: 0,
                n_leafbrushes: 0,
            },
            Leaf {
                cluster: -1,
                area: 0,
                mins: [-4096, -4096, -4096],
                maxs: [4096, 4096, 0],
                leafface: 0,
                n_leaffaces: 0,
                leafbrush: 0,
                n_leafbrushes: 1,
            },
        ];

        let brushsides = vec![Brushside {
            plane: 0,
            texture: 0,
        }];
        let brushes = vec![Brush {
            brushside: 0,
            n_brushsides: 1,
            texture: 0,
        }];
        let textures = vec![Texture {
            name: "floor".into(),
            flags: 0,
            contents: Contents::SOLID,
        }];

        point_map_with(
            planes,
            nodes,
            leaves,
            vec![0],
            brushes,
            brushsides,
            textures,
        )
    }

    #[test]
    fn point_trace_stops_at_floor() {
        let map = floor_map();
        let result = trace(
            &map,
            Vector3::new(0.0, 0.0, 64.0),
            Vector3::new(0.0, 0.0, -64.0),
            Vector3::zero(),
            Vector3::zero(),
        );

        assert!(result.frac < 1.0);
        assert!(result.endpos.z >= 0.0 - SURF_CLIP_EPSILON - 1e-3);
        assert!(result.plane.is_some());
    }

    #[test]
    fn point_trace_above_floor_does_not_collide() {
        let map = floor_map();
        let result = trace(
            &map,
            Vector3::new(0.0, 0.0, 64.0),
            Vector3::new(0.0, 0.0, 32.0),
            Vector3::zero(),
            Vector3::zero(),
        );

        assert_eq!(result.frac, 1.0);
        assert!(result.plane.is_none());
    }

    #[test]
    fn trace_on_empty_map_is_unobstructed() {
        let map = point_map_with(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let result = trace(
            &map,
            Vector3::zero(),
            Vector3::new(10.0, 10.0, 10.0),
            Vector3::zero(),
            Vector3::zero(),
        );
        assert_eq!(result.frac, 1.0);
    }

    /// S2: a point trace through open air with no brushes in the descent path travels unimpeded.
    #[test]
    fn s2_point_trace_in_free_space() {
        let map = point_map_with(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let result = trace(
            &map,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -100.0),
            Vector3::zero(),
            Vector3::zero(),
        );
        assert_eq!(result.frac, 1.0);
        assert_eq!(result.endpos, Vector3::new(0.0, 0.0, -100.0));
    }

    /// A solid unit cube spanning `[0,32]` on every axis, reachable from any descent direction
    /// (both node children route to the one leaf holding it) so the six-sided brush can be
    /// exercised without modelling the rest of the tree.
    fn cube_map() -> Map {
        use crate::common::bsp::Child;

        let planes = vec![
            Plane { normal: Vector3::new(0.0, 0.0, 1.0), dist: 0.0 },
            Plane { normal: Vector3::new(-1.0, 0.0, 0.0), dist: 0.0 },
            Plane { normal: Vector3::new(1.0, 0.0, 0.0), dist: 32.0 },
            Plane { normal: Vector3::new(0.0, -1.0, 0.0), dist: 0.0 },
            Plane { normal: Vector3::new(0.0, 1.0, 0.0), dist: 32.0 },
            Plane { normal: Vector3::new(0.0, 0.0, -1.0), dist: 0.0 },
            Plane { normal: Vector3::new(0.0, 0.0, 1.0), dist: 32.0 },
        ];

        let nodes = vec![Node {
            plane: 0,
            children: [Child::Leaf(0), Child::Leaf(0)],
            mins: [-4096, -4096, -4096],
            maxs: [4096, 4096, 4096],
        }];

        let leaves = vec![Leaf {
            cluster: 0,
            area: 0,
            mins: [0, 0, 0],
            maxs: [32, 32, 32],
            leafface: 0,
            n_leaffaces: 0,
            leafbrush: 0,
            n_leafbrushes: 1,
        }];

        let brushsides = (1..=6).map(|plane| Brushside { plane, texture: 0 }).collect();
        let brushes = vec![Brush {
            brushside: 0,
            n_brushsides: 6,
            texture: 0,
        }];
        let textures = vec![Texture {
            name: "cube".into(),
            flags: 0,
            contents: Contents::SOLID,
        }];

        point_map_with(planes, nodes, leaves, vec![0], brushes, brushsides, textures)
    }

    /// S3: a box trace into a unit axis-aligned solid cube.
    #[test]
    fn s3_box_trace_into_cube() {
        let map = cube_map();
        let result = trace(
            &map,
            Vector3::new(16.0, 16.0, 100.0),
            Vector3::new(16.0, 16.0, 0.0),
            Vector3::new(-15.0, -15.0, -24.0),
            Vector3::new(15.0, 15.0, 32.0),
        );

        assert!(result.frac < 1.0);
        assert!((result.endpos.z - 56.0).abs() <= SURF_CLIP_EPSILON + 1e-3);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use super::tests::floor_map;
    use cgmath::InnerSpace;
    use proptest::prelude::*;

    proptest! {
        // Invariant 2: 0 <= frac <= 1, and endpos lies on the segment from start to end.
        #[test]
        fn frac_in_range_and_endpos_on_segment(
            start_z in -200.0f32..200.0,
            end_z in -200.0f32..200.0,
        ) {
            let map = floor_map();
            let start = Vector3::new(0.0, 0.0, start_z);
            let end = Vector3::new(0.0, 0.0, end_z);
            let result = trace(&map, start, end, Vector3::zero(), Vector3::zero());

            prop_assert!(result.frac >= 0.0 && result.frac <= 1.0);
            let expected = start + (end - start) * result.frac;
            prop_assert!((result.endpos - expected).magnitude() < 1e-3);
        }

        // Invariant 3: if frac < 1, plane is non-null and endpos sits within SURF_CLIP_EPSILON of
        // the plane, on its open (positive-normal) side.
        #[test]
        fn collision_endpos_is_near_the_clip_plane(
            start_z in 1.0f32..200.0,
            end_z in -200.0f32..-1.0,
        ) {
            let map = floor_map();
            let start = Vector3::new(0.0, 0.0, start_z);
            let end = Vector3::new(0.0, 0.0, end_z);
            let result = trace(&map, start, end, Vector3::zero(), Vector3::zero());

            if result.frac < 1.0 {
                let plane = result.plane.expect("collision must record a plane");
                let signed_dist = result.endpos.dot(plane.normal) - plane.dist;
                prop_assert!(signed_dist >= -SURF_CLIP_EPSILON - 1e-3);
                prop_assert!(signed_dist <= SURF_CLIP_EPSILON + 1e-3);
            }
        }

        // Invariant 4: tracing with start == end yields frac == 1 (never blocked by "no motion"),
        // unless the point is embedded in solid, in which case ALL_SOLID is set instead.
        #[test]
        fn zero_length_trace_is_unblocked_or_all_solid(z in -200.0f32..200.0) {
            prop_assume!(z != 0.0);
            let map = floor_map();
            let point = Vector3::new(0.0, 0.0, z);
            let result = trace(&map, point, point, Vector3::zero(), Vector3::zero());

            if z < 0.0 {
                prop_assert!(result.flags.contains(TraceFlags::ALL_SOLID));
            } else {
                prop_assert_eq!(result.frac, 1.0);
            }
        }
    }
}
