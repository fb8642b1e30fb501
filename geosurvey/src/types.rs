//! Types de données pour le crate geosurvey
//!
//! Le modèle canonique partagé par tous les parsers et exporters:
//! [`GeometryRecord`] (géométrie 2D + attributs ordonnés) et [`ParseResult`].

use std::collections::BTreeMap;
use std::fmt;

use geo::{Coord, LineString, Point, Polygon};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::calc::{self, BoundingBox};
use crate::error::RecordError;

/// Format source d'un enregistrement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SourceFormat {
    #[serde(rename = "KML")]
    Kml,
    #[serde(rename = "CSV")]
    Csv,
    Shapefile,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kml => "KML",
            Self::Csv => "CSV",
            Self::Shapefile => "Shapefile",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type de géométrie (sans les coordonnées)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
        }
    }

    /// Nombre minimal de couples de coordonnées acceptés
    pub fn min_coords(&self) -> usize {
        match self {
            Self::Point => 1,
            Self::LineString => 2,
            Self::Polygon => 3,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GeometryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "point" => Ok(Self::Point),
            "linestring" | "line" | "polyline" => Ok(Self::LineString),
            "polygon" => Ok(Self::Polygon),
            _ => Err(format!(
                "Unknown geometry kind: {}. Use: point, linestring, polygon",
                s
            )),
        }
    }
}

/// Géométrie canonique, toujours en 2D (lon, lat)
///
/// Un polygone ne porte que son anneau extérieur: les trous ne sont pas gérés.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
}

impl Geometry {
    /// Construit un Point depuis (lon, lat)
    pub fn point(lon: f64, lat: f64) -> Self {
        Self::Point(Point::new(lon, lat))
    }

    /// Construit une LineString (au moins 2 couples)
    pub fn line_string(coords: Vec<Coord>) -> Result<Self, String> {
        check_count(GeometryKind::LineString, coords.len())?;
        Ok(Self::LineString(LineString::new(coords)))
    }

    /// Construit un Polygon depuis son anneau extérieur (au moins 3 couples)
    ///
    /// L'anneau est fermé automatiquement si le dernier couple diffère du premier.
    pub fn polygon(ring: Vec<Coord>) -> Result<Self, String> {
        check_count(GeometryKind::Polygon, distinct_ring_len(&ring))?;
        Ok(Self::Polygon(Polygon::new(LineString::new(ring), Vec::new())))
    }

    /// Construit une géométrie du type demandé
    pub fn from_coords(kind: GeometryKind, coords: Vec<Coord>) -> Result<Self, String> {
        match kind {
            GeometryKind::Point => match coords.as_slice() {
                [c] => Ok(Self::Point(Point::from(*c))),
                _ => Err(format!(
                    "Point needs exactly 1 coordinate pair, got {}",
                    coords.len()
                )),
            },
            GeometryKind::LineString => Self::line_string(coords),
            GeometryKind::Polygon => Self::polygon(coords),
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::LineString(_) => GeometryKind::LineString,
            Self::Polygon(_) => GeometryKind::Polygon,
        }
    }

    /// Coordonnées dans l'ordre de la source (anneau extérieur pour un polygone)
    pub fn coords(&self) -> Vec<Coord> {
        match self {
            Self::Point(p) => vec![p.0],
            Self::LineString(ls) => ls.0.clone(),
            Self::Polygon(p) => p.exterior().0.clone(),
        }
    }

    /// Conversion vers `geo::Geometry` pour l'écosystème (geozero, geojson)
    pub fn to_geo(&self) -> geo::Geometry {
        match self {
            Self::Point(p) => geo::Geometry::Point(*p),
            Self::LineString(ls) => geo::Geometry::LineString(ls.clone()),
            Self::Polygon(p) => geo::Geometry::Polygon(p.clone()),
        }
    }

    /// Vérifie l'invariant du modèle: nombre de couples et bornes lon/lat
    pub fn validate(&self) -> Result<(), String> {
        let coords = self.coords();
        let count = match self {
            Self::Polygon(_) => distinct_ring_len(&coords),
            _ => coords.len(),
        };
        check_count(self.kind(), count)?;
        coords.into_iter().try_for_each(check_lon_lat)
    }

    /// Sérialisation en liste JSON `[lon, lat]` / `[[lon, lat], ...]`
    pub fn coordinates_json(&self) -> serde_json::Value {
        let pair = |c: &Coord| serde_json::json!([c.x, c.y]);
        match self {
            Self::Point(p) => pair(&p.0),
            _ => serde_json::Value::Array(self.coords().iter().map(pair).collect()),
        }
    }
}

/// Vérifie qu'un couple est dans les bornes géographiques
pub fn check_lon_lat(c: Coord) -> Result<(), String> {
    if !c.x.is_finite() || !(-180.0..=180.0).contains(&c.x) {
        return Err(format!("longitude {} out of range [-180, 180]", c.x));
    }
    if !c.y.is_finite() || !(-90.0..=90.0).contains(&c.y) {
        return Err(format!("latitude {} out of range [-90, 90]", c.y));
    }
    Ok(())
}

fn check_count(kind: GeometryKind, count: usize) -> Result<(), String> {
    if count < kind.min_coords() {
        return Err(format!(
            "{} needs at least {} coordinate pairs, got {}",
            kind,
            kind.min_coords(),
            count
        ));
    }
    Ok(())
}

/// Longueur d'un anneau sans le couple de fermeture
fn distinct_ring_len(ring: &[Coord]) -> usize {
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.len() - 1
    } else {
        ring.len()
    }
}

/// Valeur d'attribut: ensemble fermé de types
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Valeur numérique (les textes numériques sont acceptés)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Boolean(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Attributs à signification inter-formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnown {
    Name,
    Description,
    Owner,
    ParcelId,
}

impl WellKnown {
    pub const ALL: [WellKnown; 4] = [
        WellKnown::Name,
        WellKnown::Description,
        WellKnown::Owner,
        WellKnown::ParcelId,
    ];

    /// Clé canonique dans `attributes`
    pub fn key(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Owner => "owner_name",
            Self::ParcelId => "kitta_no",
        }
    }

    /// Résout un nom de colonne/champ (insensible à la casse) vers un attribut connu
    pub fn from_alias(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "name" | "placemark_name" => Some(Self::Name),
            "description" | "desc" => Some(Self::Description),
            "owner" | "owner_name" | "ownername" => Some(Self::Owner),
            "kitta" | "kitta_no" | "kitta_number" | "kittano" | "parcel" | "parcel_id"
            | "parcel_no" => Some(Self::ParcelId),
            _ => None,
        }
    }

    pub fn is_well_known_key(key: &str) -> bool {
        Self::ALL.iter().any(|w| w.key() == key)
    }
}

/// Attributs ordonnés (ordre d'insertion conservé, clés uniques)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttributeValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère ou remplace (la position d'origine est conservée en cas de remplacement)
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Insère seulement si la clé est absente
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        if !self.contains_key(&key) {
            self.entries.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Valeur textuelle non vide
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(AttributeValue::as_text)
            .filter(|s| !s.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Self::new();
        for (k, v) in iter {
            attributes.insert(k, v);
        }
        attributes
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Un enregistrement canonique, issu d'une seule feature source
///
/// Immuable après création: les étapes suivantes produisent de nouvelles valeurs.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    pub geometry: Geometry,
    pub attributes: Attributes,
    /// Altitude lue dans la source (jamais mêlée au couple 2D)
    pub altitude: Option<f64>,
    /// Surface en hectares (polygones uniquement)
    pub area_hectares: Option<f64>,
    /// Surface en m² (polygones uniquement)
    pub area_sqm: Option<f64>,
    pub source_format: SourceFormat,
}

impl GeometryRecord {
    /// Crée un enregistrement; la surface est calculée pour les polygones
    pub fn new(geometry: Geometry, attributes: Attributes, source_format: SourceFormat) -> Self {
        let area = calc::geometry_area(&geometry);
        Self {
            geometry,
            attributes,
            altitude: None,
            area_hectares: area.map(|a| a.hectares),
            area_sqm: area.map(|a| a.square_meters),
            source_format,
        }
    }

    pub fn with_altitude(mut self, altitude: Option<f64>) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn kind(&self) -> GeometryKind {
        self.geometry.kind()
    }

    pub fn well_known(&self, field: WellKnown) -> Option<&str> {
        self.attributes.get_text(field.key())
    }

    pub fn name(&self) -> Option<&str> {
        self.well_known(WellKnown::Name)
    }

    pub fn owner(&self) -> Option<&str> {
        self.well_known(WellKnown::Owner)
    }

    pub fn parcel_id(&self) -> Option<&str> {
        self.well_known(WellKnown::ParcelId)
    }

    pub fn description(&self) -> Option<&str> {
        self.well_known(WellKnown::Description)
    }

    /// Empreinte stable de la géométrie (hex blake3)
    pub fn fingerprint(&self) -> String {
        hex::encode(crate::hash::geometry_hash(&self.geometry))
    }
}

/// Résultat du parsing d'un fichier
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Enregistrements valides, dans l'ordre de la source
    pub records: Vec<GeometryRecord>,

    /// Enregistrements ignorés (non fatal)
    pub per_record_errors: Vec<RecordError>,

    /// Métadonnées du format (ex: `crs` pour un Shapefile)
    pub format_metadata: BTreeMap<String, String>,
}

impl ParseResult {
    /// Part des enregistrements rejetés sur le total rencontré
    pub fn error_ratio(&self) -> f64 {
        let total = self.records.len() + self.per_record_errors.len();
        if total == 0 {
            0.0
        } else {
            self.per_record_errors.len() as f64 / total as f64
        }
    }

    /// Résumé de la collection (type de géométrie, nombre, emprise)
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary::of(&self.records)
    }
}

/// Résumé d'une collection d'enregistrements
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    /// `Point`, `LineString`, `Polygon`, `Mixed`, ou absent si vide
    pub geometry_type: Option<String>,
    pub feature_count: usize,
    pub bounds: Option<BoundingBox>,
}

impl CollectionSummary {
    pub fn of(records: &[GeometryRecord]) -> Self {
        let mut kinds = records.iter().map(GeometryRecord::kind);
        let geometry_type = kinds.next().map(|first| {
            if kinds.all(|k| k == first) {
                first.to_string()
            } else {
                "Mixed".to_string()
            }
        });

        Self {
            geometry_type,
            feature_count: records.len(),
            bounds: calc::collection_bounds(records),
        }
    }
}
