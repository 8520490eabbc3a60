//! Plane Index: per-plane sign-bits and axis-type tags, derived once at load time.
//!
//! The tracer's inner loop (`trace_node`/`trace_brush`) needs two cheap per-plane facts for
//! every distance test: whether the plane is axis-aligned (so the dot product collapses to a
//! single component access), and which of the hitbox's eight corners is the "worst case" corner
//! against this plane's normal (the `signbits`). Both are pure functions of the plane's normal,
//! so they are computed once, in parallel with `Map::planes`, rather than recomputed per trace.

use super::Plane;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlaneKind {
    X,
    Y,
    Z,
    NonAxial,
}

#[derive(Copy, Clone, Debug)]
pub struct PlaneMeta {
    pub kind: PlaneKind,
    /// Bit `i` is set iff `normal[i] < 0.0`. Used to pick the hitbox corner whose offset vector
    /// is the worst case against this plane.
    pub signbits: u8,
}

#[derive(Clone, Debug, Default)]
pub struct PlaneIndex {
    meta: Vec<PlaneMeta>,
}

impl PlaneIndex {
    /// Builds the index from the planes lump. O(n_planes), infallible.
    pub fn build(planes: &[Plane]) -> PlaneIndex {
        let meta = planes
            .iter()
            .map(|p| {
                let n = p.normal;
                let mut signbits = 0u8;
                for i in 0..3 {
                    if n[i] < 0.0 {
                        signbits |= 1 << i;
                    }
                }

                let kind = if (n.x.abs() - 1.0).abs() < f32::EPSILON {
                    PlaneKind::X
                } else if (n.y.abs() - 1.0).abs() < f32::EPSILON {
                    PlaneKind::Y
                } else if (n.z.abs() - 1.0).abs() < f32::EPSILON {
                    PlaneKind::Z
                } else {
                    PlaneKind::NonAxial
                };

                PlaneMeta { kind, signbits }
            })
            .collect();

        PlaneIndex { meta }
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn get(&self, plane: u32) -> Option<PlaneMeta> {
        self.meta.get(plane as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    fn plane(normal: Vector3<f32>, dist: f32) -> Plane {
        Plane { normal, dist }
    }

    #[test]
    fn axis_planes_are_tagged_by_type() {
        let planes = vec![
            plane(Vector3::new(1.0, 0.0, 0.0), 10.0),
            plane(Vector3::new(0.0, -1.0, 0.0), 10.0),
            plane(Vector3::new(0.0, 0.0, 1.0), 10.0),
            plane(Vector3::new(0.7071, 0.7071, 0.0), 10.0),
        ];

        let idx = PlaneIndex::build(&planes);

        assert_eq!(idx.get(0).unwrap().kind, PlaneKind::X);
        assert_eq!(idx.get(1).unwrap().kind, PlaneKind::Y);
        assert_eq!(idx.get(2).unwrap().kind, PlaneKind::Z);
        assert_eq!(idx.get(3).unwrap().kind, PlaneKind::NonAxial);
    }

    #[test]
    fn signbits_match_negative_components() {
        let planes = vec![plane(Vector3::new(-1.0, 1.0, -1.0), 0.0)];
        let idx = PlaneIndex::build(&planes);
        let meta = idx.get(0).unwrap();

        // bit 0 (x) and bit 2 (z) set, bit 1 (y) clear
        assert_eq!(meta.signbits, 0b101);
    }

}
