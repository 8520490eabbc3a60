//! BSP Loader: maps a raw file image to the typed lump views in [`super::Map`].

use std::io::{Cursor, Read};
use std::path::Path;
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt};
use cgmath::Vector3;
use failure::ensure;

use super::error::{LoadError, LoadErrorKind};
use super::plane::PlaneIndex;
use super::{
    Brush, Brushside, Child, Contents, Effect, Face, FaceType, Leaf, Lightmap, Lightvol, Map,
    Meshvert, Model, Node, Plane, Texture, Vertex, Visdata, HEADER_MAGIC, HEADER_VERSION,
    LIGHTMAP_SIZE, LUMP_COUNT,
};

const HEADER_SIZE: usize = 4 + 4 + LUMP_COUNT * 8;

const TEXTURE_SIZE: usize = 64 + 4 + 4;
const PLANE_SIZE: usize = 12 + 4;
const NODE_SIZE: usize = 4 + 4 + 4 + 12 + 12;
const LEAF_SIZE: usize = 4 + 4 + 12 + 12 + 4 + 4 + 4 + 4;
const LEAFFACE_SIZE: usize = 4;
const LEAFBRUSH_SIZE: usize = 4;
const MODEL_SIZE: usize = 12 + 12 + 4 + 4 + 4 + 4;
const BRUSH_SIZE: usize = 4 + 4 + 4;
const BRUSHSIDE_SIZE: usize = 4 + 4;
const VERTEX_SIZE: usize = 12 + 8 + 8 + 12 + 4;
const MESHVERT_SIZE: usize = 4;
const EFFECT_SIZE: usize = 64 + 4 + 4;
const FACE_SIZE: usize = 4 * 8 + 8 + 8 + 12 + 24 + 12 + 8;
const LIGHTMAP_SIZE_BYTES: usize = LIGHTMAP_SIZE * LIGHTMAP_SIZE * 3;
const LIGHTVOL_SIZE: usize = 3 + 3 + 2;
const VISDATA_HEADER_SIZE: usize = 8;

/// Reads the entire file at `path`, validates the header, and decodes every lump into an owned
/// [`Map`]. Fails with [`LoadError`] on any structural problem (truncation, bad magic/version,
/// an out-of-range or misaligned lump) — this is the one place the core surfaces I/O errors to
/// the caller; everything downstream (Tracer, Movement Controller) is a total function.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Map, LoadError> {
    let bytes = std::fs::read(path)?;
    load_bytes(bytes)
}

fn load_bytes(bytes: Vec<u8>) -> Result<Map, LoadError> {
    ensure!(
        bytes.len() >= HEADER_SIZE,
        LoadErrorKind::Truncated { len: bytes.len() }
    );

    let raw: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
    let mut cursor = Cursor::new(&raw[..]);

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    ensure!(&magic == HEADER_MAGIC, LoadErrorKind::BadMagic { found: magic });

    let version = cursor.read_i32::<LittleEndian>()?;
    ensure!(
        version == HEADER_VERSION,
        LoadErrorKind::BadVersion { found: version }
    );

    let mut lump_table = [(0usize, 0usize); LUMP_COUNT];
    for slot in lump_table.iter_mut() {
        let offset = cursor.read_i32::<LittleEndian>()?;
        let length = cursor.read_i32::<LittleEndian>()?;
        *slot = (offset.max(0) as usize, length.max(0) as usize);
    }

    let lump_bytes = |lump: super::Lump| -> Result<&[u8], LoadError> {
        let (offset, length) = lump_table[lump as usize];
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= raw.len())
            .ok_or(LoadErrorKind::LumpOutOfRange {
                lump: lump.name(),
                offset,
                len: length,
                file_len: raw.len(),
            })?;
        Ok(&raw[offset..end])
    };

    let records = |lump: super::Lump, record_size: usize| -> Result<usize, LoadError> {
        let (_, length) = lump_table[lump as usize];
        ensure!(
            record_size > 0 && length % record_size == 0,
            LoadErrorKind::MisalignedRecord {
                lump: lump.name(),
                len: length,
                record_size,
            }
        );
        Ok(length / record_size)
    };

    use super::Lump::*;

    let entities = {
        let data = lump_bytes(Entities)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        String::from_utf8_lossy(&data[..end]).into_owned()
    };

    let textures = {
        let n = records(Textures, TEXTURE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Textures)?);
        (0..n).map(|_| read_texture(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let planes = {
        let n = records(Planes, PLANE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Planes)?);
        (0..n).map(|_| read_plane(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let nodes = {
        let n = records(Nodes, NODE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Nodes)?);
        (0..n).map(|_| read_node(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let leaves = {
        let n = records(Leaves, LEAF_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Leaves)?);
        (0..n).map(|_| read_leaf(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let leaffaces = {
        let n = records(Leaffaces, LEAFFACE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Leaffaces)?);
        (0..n)
            .map(|_| Ok(cur.read_i32::<LittleEndian>()? as u32))
            .collect::<Result<Vec<_>, LoadError>>()?
    };

    let leafbrushes = {
        let n = records(Leafbrushes, LEAFBRUSH_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Leafbrushes)?);
        (0..n)
            .map(|_| Ok(cur.read_i32::<LittleEndian>()? as u32))
            .collect::<Result<Vec<_>, LoadError>>()?
    };

    let models = {
        let n = records(Models, MODEL_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Models)?);
        (0..n).map(|_| read_model(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let brushes = {
        let n = records(Brushes, BRUSH_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Brushes)?);
        (0..n).map(|_| read_brush(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let brushsides = {
        let n = records(Brushsides, BRUSHSIDE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Brushsides)?);
        (0..n).map(|_| read_brushside(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let vertices = {
        let n = records(Vertices, VERTEX_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Vertices)?);
        (0..n).map(|_| read_vertex(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let meshverts = {
        let n = records(Meshverts, MESHVERT_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Meshverts)?);
        (0..n)
            .map(|_| Ok(Meshvert { offset: cur.read_i32::<LittleEndian>()? }))
            .collect::<Result<Vec<_>, LoadError>>()?
    };

    let effects = {
        let n = records(Effects, EFFECT_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Effects)?);
        (0..n).map(|_| read_effect(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let faces = {
        let n = records(Faces, FACE_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Faces)?);
        (0..n).map(|_| read_face(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let lightmaps = {
        let n = records(Lightmaps, LIGHTMAP_SIZE_BYTES)?;
        let mut cur = Cursor::new(lump_bytes(Lightmaps)?);
        (0..n).map(|_| read_lightmap(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let lightvols = {
        let n = records(Lightvols, LIGHTVOL_SIZE)?;
        let mut cur = Cursor::new(lump_bytes(Lightvols)?);
        (0..n).map(|_| read_lightvol(&mut cur)).collect::<Result<Vec<_>, LoadError>>()?
    };

    let visdata = {
        let data = lump_bytes(Visdata)?;
        if data.len() < VISDATA_HEADER_SIZE {
            Visdata::empty()
        } else {
            let mut cur = Cursor::new(data);
            let n_vecs = cur.read_i32::<LittleEndian>()?.max(0) as usize;
            let sz_vecs = cur.read_i32::<LittleEndian>()?.max(0) as usize;
            let mut vecs = Vec::new();
            cur.read_to_end(&mut vecs)?;
            Visdata { n_vecs, sz_vecs, vecs }
        }
    };

    let planes_meta = PlaneIndex::build(&planes);

    Ok(Map {
        raw,
        entities,
        textures,
        planes,
        nodes,
        leaves,
        leaffaces,
        leafbrushes,
        models,
        brushes,
        brushsides,
        vertices,
        meshverts,
        effects,
        faces,
        lightmaps,
        lightvols,
        visdata,
        planes_meta,
    })
}

fn read_vec3<R: ReadBytesExt>(r: &mut R) -> Result<Vector3<f32>, LoadError> {
    Ok(Vector3::new(
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ))
}

fn read_fixed_name<R: ReadBytesExt>(r: &mut R, len: usize) -> Result<String, LoadError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn read_texture<R: ReadBytesExt>(r: &mut R) -> Result<Texture, LoadError> {
    let name = read_fixed_name(r, 64)?;
    let flags = r.read_i32::<LittleEndian>()?;
    let contents = Contents::from_bits_truncate(r.read_i32::<LittleEndian>()?);
    Ok(Texture { name, flags, contents })
}

fn read_plane<R: ReadBytesExt>(r: &mut R) -> Result<Plane, LoadError> {
    let normal = read_vec3(r)?;
    let dist = r.read_f32::<LittleEndian>()?;
    Ok(Plane { normal, dist })
}

fn read_node<R: ReadBytesExt>(r: &mut R) -> Result<Node, LoadError> {
    let plane = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let children = [
        Child::from_raw(r.read_i32::<LittleEndian>()?),
        Child::from_raw(r.read_i32::<LittleEndian>()?),
    ];
    let mut mins = [0i32; 3];
    for v in mins.iter_mut() {
        *v = r.read_i32::<LittleEndian>()?;
    }
    let mut maxs = [0i32; 3];
    for v in maxs.iter_mut() {
        *v = r.read_i32::<LittleEndian>()?;
    }
    Ok(Node { plane, children, mins, maxs })
}

fn read_leaf<R: ReadBytesExt>(r: &mut R) -> Result<Leaf, LoadError> {
    let cluster = r.read_i32::<LittleEndian>()?;
    let area = r.read_i32::<LittleEndian>()?;
    let mut mins = [0i32; 3];
    for v in mins.iter_mut() {
        *v = r.read_i32::<LittleEndian>()?;
    }
    let mut maxs = [0i32; 3];
    for v in maxs.iter_mut() {
        *v = r.read_i32::<LittleEndian>()?;
    }
    let leafface = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let n_leaffaces = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let leafbrush = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let n_leafbrushes = r.read_i32::<LittleEndian>()?.max(0) as u32;
    Ok(Leaf {
        cluster,
        area,
        mins,
        maxs,
        leafface,
        n_leaffaces,
        leafbrush,
        n_leafbrushes,
    })
}

fn read_model<R: ReadBytesExt>(r: &mut R) -> Result<Model, LoadError> {
    let mins = read_vec3(r)?;
    let maxs = read_vec3(r)?;
    let face = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let n_faces = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let brush = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let n_brushes = r.read_i32::<LittleEndian>()?.max(0) as u32;
    Ok(Model { mins, maxs, face, n_faces, brush, n_brushes })
}

fn read_brush<R: ReadBytesExt>(r: &mut R) -> Result<Brush, LoadError> {
    let brushside = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let n_brushsides = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let texture = r.read_i32::<LittleEndian>()?.max(0) as u32;
    Ok(Brush { brushside, n_brushsides, texture })
}

fn read_brushside<R: ReadBytesExt>(r: &mut R) -> Result<Brushside, LoadError> {
    let plane = r.read_i32::<LittleEndian>()?.max(0) as u32;
    let texture = r.read_i32::<LittleEndian>()?.max(0) as u32;
    Ok(Brushside { plane, texture })
}

fn read_vertex<R: ReadBytesExt>(r: &mut R) -> Result<Vertex, LoadError> {
    let position = read_vec3(r)?;
    let texcoord = [r.read_f32::<LittleEndian>()?, r.read_f32::<LittleEndian>()?];
    let lm_texcoord = [r.read_f32::<LittleEndian>()?, r.read_f32::<LittleEndian>()?];
    let normal = read_vec3(r)?;
    let mut color = [0u8; 4];
    r.read_exact(&mut color)?;
    Ok(Vertex { position, texcoord, lm_texcoord, normal, color })
}

fn read_effect<R: ReadBytesExt>(r: &mut R) -> Result<Effect, LoadError> {
    let name = read_fixed_name(r, 64)?;
    let brush = r.read_i32::<LittleEndian>()?;
    let unknown = r.read_i32::<LittleEndian>()?;
    Ok(Effect { name, brush, unknown })
}

fn read_face<R: ReadBytesExt>(r: &mut R) -> Result<Face, LoadError> {
    let texture = r.read_i32::<LittleEndian>()?;
    let effect = r.read_i32::<LittleEndian>()?;
    let kind = FaceType::from_raw(r.read_i32::<LittleEndian>()?);
    let vertex = r.read_i32::<LittleEndian>()?;
    let n_vertexes = r.read_i32::<LittleEndian>()?;
    let meshvert = r.read_i32::<LittleEndian>()?;
    let n_meshverts = r.read_i32::<LittleEndian>()?;
    let lm_index = r.read_i32::<LittleEndian>()?;
    let lm_start = [r.read_i32::<LittleEndian>()?, r.read_i32::<LittleEndian>()?];
    let lm_size = [r.read_i32::<LittleEndian>()?, r.read_i32::<LittleEndian>()?];
    let lm_origin = read_vec3(r)?;
    let lm_vecs = [read_vec3(r)?, read_vec3(r)?];
    let normal = read_vec3(r)?;
    let size = [r.read_i32::<LittleEndian>()?, r.read_i32::<LittleEndian>()?];

    // Patch control-point dimensions alias `size` on-disk for patch faces; for polygon/mesh
    // faces the field is unused. Tessellation is out of scope (see Non-goals).
    let patch_size = if kind == FaceType::Patch { size } else { [0, 0] };

    Ok(Face {
        texture,
        effect,
        kind,
        vertex,
        n_vertexes,
        meshvert,
        n_meshverts,
        lm_index,
        lm_start,
        lm_size,
        lm_origin,
        lm_vecs,
        normal,
        size,
        patch_size,
    })
}

fn read_lightmap<R: Read>(r: &mut R) -> Result<Lightmap, LoadError> {
    let mut rgb = Box::new([0u8; LIGHTMAP_SIZE * LIGHTMAP_SIZE * 3]);
    r.read_exact(&mut rgb[..])?;
    Ok(Lightmap { rgb })
}

fn read_lightvol<R: Read>(r: &mut R) -> Result<Lightvol, LoadError> {
    let mut ambient = [0u8; 3];
    r.read_exact(&mut ambient)?;
    let mut directional = [0u8; 3];
    r.read_exact(&mut directional)?;
    let mut dir = [0u8; 2];
    r.read_exact(&mut dir)?;
    Ok(Lightvol { ambient, directional, dir })
}
