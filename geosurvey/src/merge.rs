//! Fusion d'enregistrements de plusieurs fichiers, filtrage et dédoublonnage
//!
//! Un [`RecordSet`] emprunte les `ParseResult` déjà calculés: rien n'est copié
//! ni modifié. Le dédoublonnage ne retire un doublon que de la sélection,
//! jamais de la source.

use std::collections::HashSet;

use tracing::debug;

use crate::hash;
use crate::types::{GeometryKind, GeometryRecord, ParseResult, SourceFormat};

/// Enregistrement accompagné de son origine (nom de fichier, upload...)
#[derive(Debug, Clone, Copy)]
pub struct SourcedRecord<'a> {
    pub origin: &'a str,
    pub record: &'a GeometryRecord,
}

/// Collection virtuelle d'enregistrements, dans l'ordre d'insertion
#[derive(Debug, Clone, Default)]
pub struct RecordSet<'a> {
    entries: Vec<SourcedRecord<'a>>,
}

impl<'a> RecordSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fusionne plusieurs résultats `(origine, résultat)` dans l'ordre donné
    pub fn merge<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a ParseResult)>,
    {
        let mut set = Self::new();
        for (origin, result) in sources {
            set.add(origin, result);
        }
        set
    }

    /// Ajoute tous les enregistrements d'un résultat
    pub fn add(&mut self, origin: &'a str, result: &'a ParseResult) {
        self.extend(origin, &result.records);
    }

    pub fn extend<I>(&mut self, origin: &'a str, records: I)
    where
        I: IntoIterator<Item = &'a GeometryRecord>,
    {
        self.entries
            .extend(records.into_iter().map(|record| SourcedRecord { origin, record }));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourcedRecord<'a>> {
        self.entries.iter()
    }

    /// Enregistrements satisfaisant le prédicat; sans prédicat, tout est retourné
    pub fn filter(&self, predicate: Option<&FilterPredicate>) -> Vec<SourcedRecord<'a>> {
        match predicate {
            None => self.entries.clone(),
            Some(p) => self
                .entries
                .iter()
                .filter(|e| p.matches(e.record))
                .copied()
                .collect(),
        }
    }

    /// Première occurrence de chaque clé de dédoublonnage
    pub fn deduplicated(&self) -> Vec<SourcedRecord<'a>> {
        deduplicate(self.entries.iter().copied())
    }

    /// Filtre, puis dédoublonne si demandé
    pub fn select(&self, predicate: Option<&FilterPredicate>, dedup: bool) -> Vec<SourcedRecord<'a>> {
        let filtered = self.filter(predicate);
        let selected = if dedup {
            deduplicate(filtered)
        } else {
            filtered
        };
        debug!(
            total = self.entries.len(),
            selected = selected.len(),
            dedup,
            "Records selected"
        );
        selected
    }
}

/// Enregistrements d'une sélection, sans leur origine
pub fn records<'a>(selection: &[SourcedRecord<'a>]) -> Vec<&'a GeometryRecord> {
    selection.iter().map(|e| e.record).collect()
}

fn deduplicate<'a, I>(entries: I) -> Vec<SourcedRecord<'a>>
where
    I: IntoIterator<Item = SourcedRecord<'a>>,
{
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(dedup_key(e.record)))
        .collect()
}

fn normalize(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

/// Clé composite: (n° de parcelle, propriétaire, nom, surface en ha à 4 décimales)
///
/// Sans aucune de ces valeurs, la clé est l'empreinte de la géométrie: seuls
/// les enregistrements géométriquement identiques sont alors fusionnés.
pub fn dedup_key(record: &GeometryRecord) -> [u8; 32] {
    let area = record
        .area_hectares
        .map(|ha| format!("{:.4}", ha))
        .unwrap_or_default();
    let parts = [
        normalize(record.parcel_id()),
        normalize(record.owner()),
        normalize(record.name()),
        area,
    ];
    if parts.iter().all(String::is_empty) {
        return hash::geometry_hash(&record.geometry);
    }
    hash::key_hash(parts.iter().map(String::as_str))
}

/// Champ numérique testé par un intervalle
#[derive(Debug, Clone, PartialEq)]
pub enum NumericField {
    AreaHectares,
    AreaSqm,
    Attribute(String),
}

impl NumericField {
    fn value(&self, record: &GeometryRecord) -> Option<f64> {
        match self {
            Self::AreaHectares => record.area_hectares,
            Self::AreaSqm => record.area_sqm,
            Self::Attribute(key) => record.attributes.get(key).and_then(|v| v.as_f64()),
        }
    }
}

/// Une condition d'un prédicat
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// L'attribut contient le texte (insensible à la casse)
    Contains { field: String, needle: String },
    /// Valeur dans `[min, max]`; une borne absente n'est pas testée
    NumericRange {
        field: NumericField,
        min: Option<f64>,
        max: Option<f64>,
    },
    Kind(GeometryKind),
    SourceFormat(SourceFormat),
}

impl Clause {
    fn matches(&self, record: &GeometryRecord) -> bool {
        match self {
            Self::Contains { field, needle } => record
                .attributes
                .get(field)
                .map(|v| v.to_string().to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Self::NumericRange { field, min, max } => match field.value(record) {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => false,
            },
            Self::Kind(kind) => record.kind() == *kind,
            Self::SourceFormat(format) => record.source_format == *format,
        }
    }
}

/// Conjonction de clauses; un prédicat vide accepte tout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPredicate {
    pub clauses: Vec<Clause>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.with(Clause::Contains {
            field: field.into(),
            needle: needle.into(),
        })
    }

    pub fn area_hectares(self, min: Option<f64>, max: Option<f64>) -> Self {
        if min.is_none() && max.is_none() {
            return self;
        }
        self.with(Clause::NumericRange {
            field: NumericField::AreaHectares,
            min,
            max,
        })
    }

    pub fn kind(self, kind: GeometryKind) -> Self {
        self.with(Clause::Kind(kind))
    }

    pub fn source_format(self, format: SourceFormat) -> Self {
        self.with(Clause::SourceFormat(format))
    }

    pub fn matches(&self, record: &GeometryRecord) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }
}
