//! Calcul des surfaces et emprises
//!
//! La surface d'un polygone est un calcul planaire (shoelace) en degrés²,
//! converti avec un facteur fixe degrés → mètres. C'est une approximation
//! assumée, pas un calcul géodésique: les surfaces déjà stockées par les
//! appelants reposent sur cette formule.

use geo::{Area as _, BoundingRect, Rect};
use serde::Serialize;

use crate::types::{Geometry, GeometryRecord};

/// Facteur approximatif degrés → mètres
pub const DEGREES_TO_METERS: f64 = 111_320.0;

/// m² par hectare
pub const SQM_PER_HECTARE: f64 = 10_000.0;

/// Surface d'un polygone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub square_meters: f64,
    pub hectares: f64,
}

/// Emprise `{min_lon, min_lat, max_lon, max_lat}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn from_rect(rect: Rect) -> Self {
        Self {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        }
    }

    /// Union de deux emprises
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Emprise au format `[min_lon, min_lat, max_lon, max_lat]` (bbox GeoJSON)
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Surface d'une géométrie (None si ce n'est pas un polygone)
pub fn geometry_area(geometry: &Geometry) -> Option<Area> {
    match geometry {
        Geometry::Polygon(polygon) => {
            let square_meters = polygon.unsigned_area() * DEGREES_TO_METERS * DEGREES_TO_METERS;
            Some(Area {
                square_meters,
                hectares: square_meters / SQM_PER_HECTARE,
            })
        }
        _ => None,
    }
}

/// Surface d'un enregistrement: valeur stockée si présente, sinon recalculée
pub fn record_area(record: &GeometryRecord) -> Option<Area> {
    match (record.area_sqm, record.area_hectares) {
        (Some(square_meters), Some(hectares)) => Some(Area {
            square_meters,
            hectares,
        }),
        _ => geometry_area(&record.geometry),
    }
}

/// Retourne une copie de l'enregistrement avec la surface renseignée
///
/// L'enregistrement d'origine n'est jamais modifié.
pub fn with_area(record: &GeometryRecord) -> GeometryRecord {
    let area = record_area(record);
    GeometryRecord {
        area_hectares: area.map(|a| a.hectares),
        area_sqm: area.map(|a| a.square_meters),
        ..record.clone()
    }
}

/// Emprise d'une géométrie
pub fn geometry_bounds(geometry: &Geometry) -> Option<BoundingBox> {
    let rect = match geometry {
        Geometry::Point(p) => Some(p.bounding_rect()),
        Geometry::LineString(ls) => ls.bounding_rect(),
        Geometry::Polygon(p) => p.bounding_rect(),
    };
    rect.map(BoundingBox::from_rect)
}

/// Emprise d'un enregistrement
pub fn record_bounds(record: &GeometryRecord) -> Option<BoundingBox> {
    geometry_bounds(&record.geometry)
}

/// Emprise de l'union d'une collection (None si vide)
pub fn collection_bounds<'a, I>(records: I) -> Option<BoundingBox>
where
    I: IntoIterator<Item = &'a GeometryRecord>,
{
    records
        .into_iter()
        .filter_map(record_bounds)
        .reduce(|acc, b| acc.union(&b))
}
