//! Quake 3 BSP (v46) file and data structure handling.
//!
//! # Data Structure
//!
//! The binary space partitioning tree, or BSP, is the central data structure used to represent
//! collision and render geometry for a map. Nodes split space with a plane; each child is either
//! another node or a leaf. Leaves are convex cells and carry a cluster id used to look up
//! potential visibility against other clusters.
//!
//! # File Format
//!
//! The file begins with a 4-byte magic (`"IBSP"`), a little-endian `i32` version (`46`), and a
//! directory of 17 lumps, each a `(offset: i32, length: i32)` pair giving a byte range into the
//! file. Every record in every lump uses the on-disk layout verbatim: little-endian, tightly
//! packed, no implicit padding. Decoding must not assume the host's native alignment matches the
//! file's; every field is read with an explicit little-endian accessor.
//!
//! Lump 16 (`Visdata`) is unlike the others: its first 8 bytes are a `(n_vecs: i32, sz_vecs: i32)`
//! header, and the remainder is `n_vecs * sz_vecs` bytes of cluster-visibility bitmask.

mod error;
mod load;
pub mod plane;
pub mod query;

pub use self::error::{LoadError, LoadErrorKind};
pub use self::load::load;
pub use self::plane::{PlaneIndex, PlaneKind};

use std::rc::Rc;

use bitflags::bitflags;
use cgmath::Vector3;

pub const HEADER_MAGIC: &[u8; 4] = b"IBSP";
pub const HEADER_VERSION: i32 = 46;
pub const LUMP_COUNT: usize = 17;

bitflags! {
    /// The `contents` bitfield stored on each texture entry referenced by a brush.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Contents: i32 {
        const SOLID        = 0x0000_0001;
        const LAVA         = 0x0000_0008;
        const SLIME        = 0x0000_0010;
        const WATER        = 0x0000_0020;
        const FOG          = 0x0000_0040;
        const AREAPORTAL   = 0x0000_8000;
        const PLAYERCLIP   = 0x0001_0000;
        const MONSTERCLIP  = 0x0002_0000;
        const TRIGGER      = 0x0040_0000;
        const STRUCTURAL   = 0x1000_0000;
        const DETAIL       = 0x2000_0000;
        const TRANSLUCENT  = 0x4000_0000;
    }
}

/// Name of a lump, in on-disk directory order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lump {
    Entities,
    Textures,
    Planes,
    Nodes,
    Leaves,
    Leaffaces,
    Leafbrushes,
    Models,
    Brushes,
    Brushsides,
    Vertices,
    Meshverts,
    Effects,
    Faces,
    Lightmaps,
    Lightvols,
    Visdata,
}

impl Lump {
    pub const ALL: [Lump; LUMP_COUNT] = [
        Lump::Entities,
        Lump::Textures,
        Lump::Planes,
        Lump::Nodes,
        Lump::Leaves,
        Lump::Leaffaces,
        Lump::Leafbrushes,
        Lump::Models,
        Lump::Brushes,
        Lump::Brushsides,
        Lump::Vertices,
        Lump::Meshverts,
        Lump::Effects,
        Lump::Faces,
        Lump::Lightmaps,
        Lump::Lightvols,
        Lump::Visdata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Lump::Entities => "entities",
            Lump::Textures => "textures",
            Lump::Planes => "planes",
            Lump::Nodes => "nodes",
            Lump::Leaves => "leaves",
            Lump::Leaffaces => "leaffaces",
            Lump::Leafbrushes => "leafbrushes",
            Lump::Models => "models",
            Lump::Brushes => "brushes",
            Lump::Brushsides => "brushsides",
            Lump::Vertices => "vertices",
            Lump::Meshverts => "meshverts",
            Lump::Effects => "effects",
            Lump::Faces => "faces",
            Lump::Lightmaps => "lightmaps",
            Lump::Lightvols => "lightvols",
            Lump::Visdata => "visdata",
        }
    }
}

/// A decoded texture entry (one per surface/brush material, not a pixel buffer — Quake 3 stores
/// the actual image data in a separate `.jpg`/`.tga` pak entry named after `name`).
#[derive(Clone, Debug)]
pub struct Texture {
    pub name: String,
    pub flags: i32,
    pub contents: Contents,
}

/// A splitting plane in point-normal form: `normal . p - dist == 0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub dist: f32,
}

/// Either an internal node or a leaf, per the BSP child-index convention: non-negative indices
/// point at another node, negative indices point at a leaf (`leaf = -child - 1`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Child {
    Node(u32),
    Leaf(u32),
}

impl Child {
    pub fn from_raw(raw: i32) -> Child {
        if raw >= 0 {
            Child::Node(raw as u32)
        } else {
            Child::Leaf((-raw - 1) as u32)
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Node {
    pub plane: u32,
    pub children: [Child; 2],
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
}

#[derive(Copy, Clone, Debug)]
pub struct Leaf {
    /// Negative means "no PVS" (conservatively treated as always visible).
    pub cluster: i32,
    pub area: i32,
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
    pub leafface: u32,
    pub n_leaffaces: u32,
    pub leafbrush: u32,
    pub n_leafbrushes: u32,
}

impl Leaf {
    pub fn leaffaces(&self) -> std::ops::Range<usize> {
        self.leafface as usize..(self.leafface + self.n_leaffaces) as usize
    }

    pub fn leafbrushes(&self) -> std::ops::Range<usize> {
        self.leafbrush as usize..(self.leafbrush + self.n_leafbrushes) as usize
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Model {
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub face: u32,
    pub n_faces: u32,
    pub brush: u32,
    pub n_brushes: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Brush {
    pub brushside: u32,
    pub n_brushsides: u32,
    pub texture: u32,
}

impl Brush {
    pub fn brushsides(&self) -> std::ops::Range<usize> {
        self.brushside as usize..(self.brushside + self.n_brushsides) as usize
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Brushside {
    pub plane: u32,
    pub texture: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub position: Vector3<f32>,
    pub texcoord: [f32; 2],
    pub lm_texcoord: [f32; 2],
    pub normal: Vector3<f32>,
    pub color: [u8; 4],
}

#[derive(Copy, Clone, Debug)]
pub struct Meshvert {
    pub offset: i32,
}

#[derive(Clone, Debug)]
pub struct Effect {
    pub name: String,
    pub brush: i32,
    pub unknown: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, num_derive::FromPrimitive)]
pub enum FaceType {
    Polygon = 1,
    Patch = 2,
    Mesh = 3,
    Billboard = 4,
}

impl FaceType {
    /// Unrecognized tags (and `0`, which the format never assigns) fall back to `Polygon` rather
    /// than erroring — a face decoder has no use for an `InvariantViolation` here.
    fn from_raw(raw: i32) -> FaceType {
        use num::FromPrimitive;
        FaceType::from_i32(raw).unwrap_or(FaceType::Polygon)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Face {
    pub texture: i32,
    pub effect: i32,
    pub kind: FaceType,
    pub vertex: i32,
    pub n_vertexes: i32,
    pub meshvert: i32,
    pub n_meshverts: i32,
    pub lm_index: i32,
    pub lm_start: [i32; 2],
    pub lm_size: [i32; 2],
    pub lm_origin: Vector3<f32>,
    pub lm_vecs: [Vector3<f32>; 2],
    pub normal: Vector3<f32>,
    pub size: [i32; 2],
    /// Patch control-point grid dimensions; only meaningful when `kind == Patch`. Not
    /// tessellated here — see the `Non-goals` note on patch rendering/collision.
    pub patch_size: [i32; 2],
}

pub const LIGHTMAP_SIZE: usize = 128;

#[derive(Clone)]
pub struct Lightmap {
    pub rgb: Box<[u8; LIGHTMAP_SIZE * LIGHTMAP_SIZE * 3]>,
}

impl std::fmt::Debug for Lightmap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Lightmap").finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Lightvol {
    pub ambient: [u8; 3],
    pub directional: [u8; 3],
    pub dir: [u8; 2],
}

/// The visibility lump: a PVS bit per `(from cluster, to cluster)` pair.
#[derive(Clone, Debug)]
pub struct Visdata {
    pub n_vecs: usize,
    pub sz_vecs: usize,
    pub vecs: Vec<u8>,
}

impl Visdata {
    pub fn empty() -> Visdata {
        Visdata {
            n_vecs: 0,
            sz_vecs: 0,
            vecs: Vec::new(),
        }
    }

    /// Is cluster `to` potentially visible from cluster `from`? Conservative defaults apply when
    /// there is no visdata at all, or the lookup would otherwise escape the buffer.
    pub fn cluster_visible(&self, from: i32, to: i32) -> bool {
        if from < 0 || to < 0 {
            return true;
        }

        if self.n_vecs == 0 || self.sz_vecs == 0 {
            return true;
        }

        let from = from as usize;
        let to = to as usize;

        if from >= self.n_vecs {
            return true;
        }

        let byte_index = from * self.sz_vecs + to / 8;
        let bit_index = to % 8;

        match self.vecs.get(byte_index) {
            Some(byte) => byte & (1 << bit_index) != 0,
            None => true,
        }
    }
}

/// A fully decoded BSP map. The raw file image is retained only for provenance/debugging; every
/// lump below is eagerly decoded into an owned, typed array at load time — nothing outside the
/// Loader may mutate a map's lumps, and decoding never attempts an unsound zero-copy cast over a
/// file whose alignment and endianness cannot be assumed to match the host.
#[derive(Debug)]
pub struct Map {
    pub(crate) raw: Rc<[u8]>,

    pub entities: String,
    pub textures: Vec<Texture>,
    pub planes: Vec<Plane>,
    pub nodes: Vec<Node>,
    pub leaves: Vec<Leaf>,
    pub leaffaces: Vec<u32>,
    pub leafbrushes: Vec<u32>,
    pub models: Vec<Model>,
    pub brushes: Vec<Brush>,
    pub brushsides: Vec<Brushside>,
    pub vertices: Vec<Vertex>,
    pub meshverts: Vec<Meshvert>,
    pub effects: Vec<Effect>,
    pub faces: Vec<Face>,
    pub lightmaps: Vec<Lightmap>,
    pub lightvols: Vec<Lightvol>,
    pub visdata: Visdata,

    pub planes_meta: PlaneIndex,
}

impl Map {
    /// The integer AABB of the root node, i.e. the whole map.
    pub fn bounds(&self) -> ([i32; 3], [i32; 3]) {
        match self.nodes.first() {
            Some(root) => (root.mins, root.maxs),
            None => ([0, 0, 0], [0, 0, 0]),
        }
    }

    /// Number of bytes in the original file image.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }
}
