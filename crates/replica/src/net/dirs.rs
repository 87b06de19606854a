//! Direction codebook: 162 unit normals addressable by a single byte.
//!
//! The table is the vertex set of a twice-subdivided icosahedron, the same
//! construction behind the classic Quake III normal table. Both peers run
//! this code, so the table is generated once at first use instead of being
//! transcribed; tests pin the properties callers rely on (entry count, unit
//! length, worst-case angular error).

use std::collections::HashMap;
use std::sync::OnceLock;

use glam::Vec3;

pub const CODEBOOK_SIZE: usize = 162;

/// Worst-case angle between an arbitrary direction and its nearest codebook
/// entry, in radians. Pinned by test; callers must not assume better.
pub const MAX_ANGULAR_ERROR: f32 = 8.0 * std::f32::consts::PI / 180.0;

static CODEBOOK: OnceLock<Vec<Vec3>> = OnceLock::new();

fn codebook() -> &'static [Vec3] {
    CODEBOOK.get_or_init(build_codebook)
}

fn build_codebook() -> Vec<Vec3> {
    // Golden-ratio icosahedron, unit-normalized.
    let t = (1.0 + 5.0f32.sqrt()) / 2.0;
    let mut verts: Vec<Vec3> = [
        (-1.0, t, 0.0),
        (1.0, t, 0.0),
        (-1.0, -t, 0.0),
        (1.0, -t, 0.0),
        (0.0, -1.0, t),
        (0.0, 1.0, t),
        (0.0, -1.0, -t),
        (0.0, 1.0, -t),
        (t, 0.0, -1.0),
        (t, 0.0, 1.0),
        (-t, 0.0, -1.0),
        (-t, 0.0, 1.0),
    ]
    .iter()
    .map(|&(x, y, z)| Vec3::new(x, y, z).normalize())
    .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    // Two subdivision passes: 12 -> 42 -> 162 vertices.
    for _ in 0..2 {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut next_faces = Vec::with_capacity(faces.len() * 4);

        let mut midpoint = |a: usize, b: usize, verts: &mut Vec<Vec3>| -> usize {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let v = ((verts[a] + verts[b]) * 0.5).normalize();
                verts.push(v);
                verts.len() - 1
            })
        };

        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut verts);
            let bc = midpoint(b, c, &mut verts);
            let ca = midpoint(c, a, &mut verts);
            next_faces.push([a, ab, ca]);
            next_faces.push([b, bc, ab]);
            next_faces.push([c, ca, bc]);
            next_faces.push([ab, bc, ca]);
        }
        faces = next_faces;
    }

    debug_assert_eq!(verts.len(), CODEBOOK_SIZE);
    verts
}

/// Quantizes a direction to the codebook index whose entry maximizes the dot
/// product with `v`. Ties resolve to the lowest index; a zero (or
/// non-normalizable) vector encodes as index 0.
pub fn dir_to_byte(v: Vec3) -> u8 {
    let Some(dir) = v.try_normalize() else {
        return 0;
    };
    let mut best = 0usize;
    let mut best_dot = f32::NEG_INFINITY;
    for (i, n) in codebook().iter().enumerate() {
        let dot = dir.dot(*n);
        if dot > best_dot {
            best_dot = dot;
            best = i;
        }
    }
    best as u8
}

/// Direct lookup. Indices ≥ 162 fold back into the table so a corrupt byte
/// still yields a unit direction.
pub fn byte_to_dir(b: u8) -> Vec3 {
    let table = codebook();
    table[b as usize % table.len()]
}
