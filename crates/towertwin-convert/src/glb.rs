//! Binary glTF 2.0 container writer.
//!
//! Emits a single-buffer GLB with one POINTS-mode primitive. Layout per
//! the glTF 2.0 spec: 12-byte header, space-padded JSON chunk, zero-padded
//! BIN chunk, all lengths 4-byte aligned.

use serde_json::json;

use crate::errors::ConvertError;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"

const COMPONENT_FLOAT: u32 = 5126;
const MODE_POINTS: u32 = 0;

pub fn export_points_glb(name: Option<&str>, points: &[[f32; 3]]) -> Result<Vec<u8>, ConvertError> {
    if points.is_empty() {
        return Err(ConvertError::NoGeometry);
    }

    let mut bin = Vec::with_capacity(points.len() * 12);
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for point in points {
        for axis in 0..3 {
            min[axis] = min[axis].min(point[axis]);
            max[axis] = max[axis].max(point[axis]);
            bin.extend_from_slice(&point[axis].to_le_bytes());
        }
    }

    let document = json!({
        "asset": { "version": "2.0", "generator": "towertwin-convert" },
        "scene": 0,
        "scenes": [ { "nodes": [0] } ],
        "nodes": [ { "mesh": 0, "name": name.unwrap_or("ifc-model") } ],
        "meshes": [ {
            "primitives": [ {
                "attributes": { "POSITION": 0 },
                "mode": MODE_POINTS,
            } ],
        } ],
        "accessors": [ {
            "bufferView": 0,
            "componentType": COMPONENT_FLOAT,
            "count": points.len(),
            "type": "VEC3",
            "min": min,
            "max": max,
        } ],
        "bufferViews": [ {
            "buffer": 0,
            "byteOffset": 0,
            "byteLength": bin.len(),
        } ],
        "buffers": [ { "byteLength": bin.len() } ],
    });

    let mut json_bytes =
        serde_json::to_vec(&document).map_err(|err| ConvertError::Export(err.to_string()))?;
    pad_to_alignment(&mut json_bytes, b' ');
    pad_to_alignment(&mut bin, 0);

    let total_len = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total_len);
    glb.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
    glb.extend_from_slice(&(total_len as u32).to_le_bytes());

    glb.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(&json_bytes);

    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    glb.extend_from_slice(&bin);

    Ok(glb)
}

fn pad_to_alignment(buffer: &mut Vec<u8>, fill: u8) {
    while buffer.len() % 4 != 0 {
        buffer.push(fill);
    }
}
