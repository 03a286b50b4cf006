//! Relationship records and relationship maps.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::element::{DeclaredKind, ElementId};
use crate::provenance::Provenance;

/// Kind of a directed relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RelationshipKind {
    /// Two elements share a boundary element. Always stored both ways.
    Adjacency,
    /// Source volume fully contains the target.
    Contains,
    /// Inverse of [`RelationshipKind::Contains`].
    ContainedBy,
    /// Source element bounds the target space.
    BoundsSpace,
    /// Inverse of [`RelationshipKind::BoundsSpace`].
    BoundedBy,
    /// Two spaces connected through a door or window.
    ConnectsSpaces,
    /// Element is made of the target material.
    MadeOf,
    /// A relation stated in the source file.
    Declared(DeclaredKind),
}

impl RelationshipKind {
    /// The inferred kinds, in connectivity-graph insertion order.
    pub const INFERRED: [RelationshipKind; 6] = [
        RelationshipKind::Adjacency,
        RelationshipKind::Contains,
        RelationshipKind::ContainedBy,
        RelationshipKind::BoundsSpace,
        RelationshipKind::BoundedBy,
        RelationshipKind::ConnectsSpaces,
    ];

    /// Relationship type label in the graph database.
    pub fn label(self) -> &'static str {
        match self {
            RelationshipKind::Adjacency => "ADJACENT",
            RelationshipKind::Contains => "CONTAINS_TOPOLOGICALLY",
            RelationshipKind::ContainedBy => "IS_CONTAINED_IN",
            RelationshipKind::BoundsSpace => "BOUNDS_SPACE",
            RelationshipKind::BoundedBy => "IS_BOUNDED_BY",
            RelationshipKind::ConnectsSpaces => "CONNECTS_SPACES",
            RelationshipKind::MadeOf => "IS_MADE_OF",
            RelationshipKind::Declared(kind) => kind.label(),
        }
    }

    /// Short snake_case name used in exports and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            RelationshipKind::Adjacency => "adjacency",
            RelationshipKind::Contains => "contains",
            RelationshipKind::ContainedBy => "contained_by",
            RelationshipKind::BoundsSpace => "bounds_space",
            RelationshipKind::BoundedBy => "bounded_by",
            RelationshipKind::ConnectsSpaces => "connects_spaces",
            RelationshipKind::MadeOf => "made_of",
            RelationshipKind::Declared(DeclaredKind::ContainedIn) => "declared:contained_in",
            RelationshipKind::Declared(DeclaredKind::PartOf) => "declared:part_of",
            RelationshipKind::Declared(DeclaredKind::FillsOpeningOf) => "declared:fills_opening_of",
            RelationshipKind::Declared(DeclaredKind::BoundsSpace) => "declared:bounds_space",
            RelationshipKind::Declared(DeclaredKind::ConnectedTo) => "declared:connected_to",
        }
    }

    /// The kind of the reverse edge, if this kind is stored in both directions.
    pub fn inverse(self) -> Option<RelationshipKind> {
        match self {
            RelationshipKind::Adjacency => Some(RelationshipKind::Adjacency),
            RelationshipKind::ConnectsSpaces => Some(RelationshipKind::ConnectsSpaces),
            RelationshipKind::Contains => Some(RelationshipKind::ContainedBy),
            RelationshipKind::ContainedBy => Some(RelationshipKind::Contains),
            RelationshipKind::BoundsSpace => Some(RelationshipKind::BoundedBy),
            RelationshipKind::BoundedBy => Some(RelationshipKind::BoundsSpace),
            RelationshipKind::MadeOf | RelationshipKind::Declared(_) => None,
        }
    }

    fn all() -> impl Iterator<Item = RelationshipKind> {
        RelationshipKind::INFERRED
            .into_iter()
            .chain(std::iter::once(RelationshipKind::MadeOf))
            .chain(DeclaredKind::ALL.into_iter().map(RelationshipKind::Declared))
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RelationshipKind {
    type Err = String;

    /// Accepts the short name (`adjacency`), the graph label (`ADJACENT`)
    /// or `adjacent`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("adjacent") {
            return Ok(RelationshipKind::Adjacency);
        }
        RelationshipKind::all()
            .find(|kind| {
                kind.name().eq_ignore_ascii_case(wanted) || kind.label().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown relationship kind: {wanted}"))
    }
}

impl From<RelationshipKind> for String {
    fn from(kind: RelationshipKind) -> Self {
        kind.name().to_string()
    }
}

impl TryFrom<String> for RelationshipKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A scalar relationship or node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::String(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::String(v)
    }
}

/// Ordered property bag.
pub type PropertyBag = BTreeMap<String, PropValue>;

/// One directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source: ElementId,
    pub target: ElementId,
    pub kind: RelationshipKind,
    #[serde(default)]
    pub properties: PropertyBag,
    pub provenance: Provenance,
}

/// Identity of a relationship: endpoints and kind.
pub type RelationshipKey = (ElementId, ElementId, RelationshipKind);

impl RelationshipRecord {
    pub fn new(
        source: impl Into<ElementId>,
        target: impl Into<ElementId>,
        kind: RelationshipKind,
        provenance: Provenance,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            properties: PropertyBag::new(),
            provenance,
        }
    }

    /// An inferred relationship carrying the tolerance it was found with.
    pub fn inferred(
        source: impl Into<ElementId>,
        target: impl Into<ElementId>,
        kind: RelationshipKind,
        tolerance: f64,
    ) -> Self {
        Self::new(source, target, kind, Provenance::Inferred)
            .with_property("tolerance", tolerance)
            .with_property("relationship_source", Provenance::Inferred.source_tag())
    }

    /// A relationship stated in the source file.
    pub fn declared(
        source: impl Into<ElementId>,
        target: impl Into<ElementId>,
        kind: RelationshipKind,
    ) -> Self {
        Self::new(source, target, kind, Provenance::Declared)
            .with_property("relationship_source", Provenance::Declared.source_tag())
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> RelationshipKey {
        (self.source.clone(), self.target.clone(), self.kind)
    }

    pub fn is_self_edge(&self) -> bool {
        self.source == self.target
    }

    /// The same relationship pointing the other way under `kind`.
    pub fn reversed(&self, kind: RelationshipKind) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            kind,
            properties: self.properties.clone(),
            provenance: self.provenance,
        }
    }
}

/// Deduplicated, insertion-ordered collection of relationships.
///
/// Self-edges are never stored. Symmetric and inverse insertions store both
/// directions with identical properties or neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<RelationshipRecord>", from = "Vec<RelationshipRecord>")]
pub struct RelationshipMap {
    records: Vec<RelationshipRecord>,
    seen: HashSet<RelationshipKey>,
}

impl From<Vec<RelationshipRecord>> for RelationshipMap {
    fn from(records: Vec<RelationshipRecord>) -> Self {
        let mut map = RelationshipMap::new();
        for record in records {
            map.insert(record);
        }
        map
    }
}

impl From<RelationshipMap> for Vec<RelationshipRecord> {
    fn from(map: RelationshipMap) -> Self {
        map.records
    }
}

impl RelationshipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one record. Returns false for self-edges and duplicates.
    pub fn insert(&mut self, record: RelationshipRecord) -> bool {
        if record.is_self_edge() {
            return false;
        }
        if !self.seen.insert(record.key()) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Insert `record` and its mirror under the same kind.
    pub fn insert_symmetric(&mut self, record: RelationshipRecord) -> bool {
        let mirror = record.reversed(record.kind);
        self.insert_pair(record, mirror)
    }

    /// Insert `record` and its reverse under the inverse kind.
    ///
    /// Kinds without an inverse are inserted one-way.
    pub fn insert_with_inverse(&mut self, record: RelationshipRecord) -> bool {
        match record.kind.inverse() {
            Some(inverse) => {
                let reverse = record.reversed(inverse);
                self.insert_pair(record, reverse)
            }
            None => self.insert(record),
        }
    }

    fn insert_pair(&mut self, forward: RelationshipRecord, backward: RelationshipRecord) -> bool {
        if forward.is_self_edge() {
            return false;
        }
        let a = self.insert(forward);
        let b = self.insert(backward);
        a || b
    }

    /// Append every record of `other` not already present.
    pub fn extend_from(&mut self, other: &RelationshipMap) {
        for record in other.iter() {
            self.insert(record.clone());
        }
    }

    pub fn contains(&self, source: &str, target: &str, kind: RelationshipKind) -> bool {
        self.seen
            .contains(&(ElementId::from(source), ElementId::from(target), kind))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RelationshipRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[RelationshipRecord] {
        &self.records
    }

    /// Records of one kind, in insertion order.
    pub fn of_kind(&self, kind: RelationshipKind) -> impl Iterator<Item = &RelationshipRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a RelationshipMap {
    type Item = &'a RelationshipRecord;
    type IntoIter = std::slice::Iter<'a, RelationshipRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_names_and_labels() {
        assert_eq!("adjacency".parse::<RelationshipKind>(), Ok(RelationshipKind::Adjacency));
        assert_eq!("ADJACENT".parse::<RelationshipKind>(), Ok(RelationshipKind::Adjacency));
        assert_eq!("Adjacent".parse::<RelationshipKind>(), Ok(RelationshipKind::Adjacency));
        assert_eq!("is_contained_in".parse::<RelationshipKind>(), Ok(RelationshipKind::ContainedBy));
        assert_eq!(
            "declared:fills_opening_of".parse::<RelationshipKind>(),
            Ok(RelationshipKind::Declared(DeclaredKind::FillsOpeningOf))
        );
        assert!("touching".parse::<RelationshipKind>().is_err());
    }

    #[test]
    fn inverse_is_an_involution() {
        for kind in RelationshipKind::INFERRED {
            let inverse = kind.inverse().unwrap();
            assert_eq!(inverse.inverse(), Some(kind));
        }
        assert_eq!(RelationshipKind::MadeOf.inverse(), None);
    }

    #[test]
    fn self_edges_are_rejected() {
        let mut map = RelationshipMap::new();
        assert!(!map.insert_symmetric(RelationshipRecord::inferred(
            "a",
            "a",
            RelationshipKind::Adjacency,
            1e-3
        )));
        assert!(map.is_empty());
    }

    #[test]
    fn symmetric_insert_stores_both_directions_once() {
        let mut map = RelationshipMap::new();
        let record = RelationshipRecord::inferred("a", "b", RelationshipKind::Adjacency, 1e-3);
        assert!(map.insert_symmetric(record.clone()));
        assert!(!map.insert_symmetric(record.reversed(RelationshipKind::Adjacency)));
        assert_eq!(map.len(), 2);
        assert!(map.contains("b", "a", RelationshipKind::Adjacency));
    }

    #[test]
    fn inverse_insert_copies_properties() {
        let mut map = RelationshipMap::new();
        let record = RelationshipRecord::inferred("room", "chair", RelationshipKind::Contains, 1e-3)
            .with_property("containment_type", "full");
        map.insert_with_inverse(record);
        let back = map
            .of_kind(RelationshipKind::ContainedBy)
            .next()
            .unwrap();
        assert_eq!(back.source.as_str(), "chair");
        assert_eq!(back.properties, map.records()[0].properties);
    }

    #[test]
    fn map_serializes_as_record_list() {
        let mut map = RelationshipMap::new();
        map.insert_symmetric(RelationshipRecord::inferred(
            "a",
            "b",
            RelationshipKind::Adjacency,
            1e-3,
        ));
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["kind"], "adjacency");
        assert_eq!(json[0]["provenance"], "inferred");

        let back: RelationshipMap = serde_json::from_value(json).unwrap();
        assert!(back.contains("b", "a", RelationshipKind::Adjacency));
    }
}
