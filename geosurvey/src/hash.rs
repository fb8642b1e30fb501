//! Empreintes blake3 des géométries et des clés de dédoublonnage
//!
//! Le hash d'un anneau est normalisé pour être indépendant du vertex de départ
//! (un polygone qui commence à un vertex différent aura le même hash).

use blake3::Hasher;
use geo::{Coord, LineString};

use crate::types::Geometry;

/// Calcule un hash stable d'une géométrie
pub fn geometry_hash(geom: &Geometry) -> [u8; 32] {
    let mut hasher = Hasher::new();

    match geom {
        Geometry::Point(p) => {
            hasher.update(b"POINT");
            hash_coord(&mut hasher, p.0);
        }
        Geometry::LineString(ls) => {
            hasher.update(b"LINESTRING");
            for coord in ls.0.iter() {
                hash_coord(&mut hasher, *coord);
            }
        }
        Geometry::Polygon(p) => {
            hasher.update(b"POLYGON");
            hash_ring_normalized(&mut hasher, p.exterior());
        }
    }

    *hasher.finalize().as_bytes()
}

/// Hash d'une liste de champs texte (séparateur non ambigu)
pub fn key_hash<'a>(parts: impl IntoIterator<Item = &'a str>) -> [u8; 32] {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Hash un anneau en commençant au vertex lexicographiquement le plus petit
fn hash_ring_normalized(hasher: &mut Hasher, ring: &LineString) {
    // Ignore le dernier point, identique au premier pour un ring fermé
    let len = if ring.0.len() > 1 && ring.0.first() == ring.0.last() {
        ring.0.len() - 1
    } else {
        ring.0.len()
    };

    if len == 0 {
        return;
    }

    let min_idx = (0..len)
        .min_by(|&a, &b| {
            let ca = &ring.0[a];
            let cb = &ring.0[b];
            ca.x.partial_cmp(&cb.x)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.y.partial_cmp(&cb.y).unwrap_or(std::cmp::Ordering::Equal))
        })
        .unwrap_or(0);

    for i in 0..len {
        let idx = (min_idx + i) % len;
        hash_coord(hasher, ring.0[idx]);
    }
}

/// Arrondi à 7 décimales (~1 cm en degrés)
fn hash_coord(hasher: &mut Hasher, coord: Coord) {
    let x = (coord.x * 10_000_000.0).round() as i64;
    let y = (coord.y * 10_000_000.0).round() as i64;
    hasher.update(&x.to_le_bytes());
    hasher.update(&y.to_le_bytes());
}
