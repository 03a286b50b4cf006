//! Element records: the parser-facing input of an analysis run.
//!
//! An [`ElementSet`] is the read-only view of one building model: every
//! element with its identifier, type tag, raw boundary geometry, declared
//! relations and material associations. Identifiers are validated to be
//! unique when the set is built.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::kernel::Tier;

/// Globally unique element identifier (the source file's GlobalId).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Coarse element classification derived from the type tag.
///
/// Drives the resolver's tier order, graph node labels and which elements
/// are considered as space boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementClass {
    Project,
    Site,
    Building,
    Storey,
    Space,
    Wall,
    Slab,
    Roof,
    Door,
    Window,
    Opening,
    Beam,
    Column,
    Member,
    Railing,
    Stair,
    Covering,
    Furniture,
    Proxy,
    Other,
}

impl ElementClass {
    /// Classify a type tag such as `IfcWallStandardCase` or `IfcBuildingStorey`.
    ///
    /// Matching is case-insensitive and ignores the `Ifc` prefix.
    pub fn from_tag(type_tag: &str) -> Self {
        let lower = type_tag.to_ascii_lowercase();
        let bare = lower.strip_prefix("ifc").unwrap_or(&lower);

        // Longer names first: "buildingstorey" and "buildingelementproxy"
        // both start with "building".
        const TABLE: &[(&str, ElementClass)] = &[
            ("project", ElementClass::Project),
            ("site", ElementClass::Site),
            ("buildingstorey", ElementClass::Storey),
            ("buildingelementproxy", ElementClass::Proxy),
            ("building", ElementClass::Building),
            ("space", ElementClass::Space),
            ("wall", ElementClass::Wall),
            ("slab", ElementClass::Slab),
            ("roof", ElementClass::Roof),
            ("door", ElementClass::Door),
            ("window", ElementClass::Window),
            ("openingelement", ElementClass::Opening),
            ("beam", ElementClass::Beam),
            ("column", ElementClass::Column),
            ("member", ElementClass::Member),
            ("railing", ElementClass::Railing),
            ("stair", ElementClass::Stair),
            ("covering", ElementClass::Covering),
            ("furnishingelement", ElementClass::Furniture),
            ("furniture", ElementClass::Furniture),
        ];

        TABLE
            .iter()
            .find(|(prefix, _)| bare.starts_with(prefix))
            .map(|(_, class)| *class)
            .unwrap_or(ElementClass::Other)
    }

    /// Project, site, building and storey: organisational containers that
    /// never carry geometry of their own.
    pub fn is_site_hierarchy(self) -> bool {
        matches!(
            self,
            ElementClass::Project | ElementClass::Site | ElementClass::Building | ElementClass::Storey
        )
    }

    /// The site hierarchy plus spaces.
    pub fn is_spatial_structure(self) -> bool {
        self.is_site_hierarchy() || self == ElementClass::Space
    }

    pub fn is_space(self) -> bool {
        self == ElementClass::Space
    }

    /// Doors and windows.
    pub fn is_opening_filler(self) -> bool {
        matches!(self, ElementClass::Door | ElementClass::Window)
    }

    /// Element classes tested geometrically against spaces for boundaries.
    pub fn is_boundary_candidate(self) -> bool {
        matches!(
            self,
            ElementClass::Wall
                | ElementClass::Slab
                | ElementClass::Roof
                | ElementClass::Door
                | ElementClass::Window
                | ElementClass::Opening
        )
    }

    /// Whether elements of this class take part in geometric inference.
    pub fn is_geometry_candidate(self) -> bool {
        !self.is_site_hierarchy()
    }

    /// Proxy tiers to try, in order.
    pub fn preferred_tiers(self) -> &'static [Tier] {
        match self {
            ElementClass::Project
            | ElementClass::Site
            | ElementClass::Building
            | ElementClass::Storey => &[],
            ElementClass::Beam | ElementClass::Column | ElementClass::Member => {
                &[Tier::Volume, Tier::Curve]
            }
            ElementClass::Furniture | ElementClass::Proxy | ElementClass::Other => {
                &[Tier::Volume, Tier::Surface, Tier::PointCluster]
            }
            _ => &[Tier::Volume, Tier::Surface, Tier::Curve],
        }
    }

    /// The specific graph label for this class.
    ///
    /// Spatial structure keeps the schema name (`IfcSpace`), physical
    /// elements use a short name (`Wall`). `Other` falls back to the bare
    /// type tag.
    pub fn specific_label(self, type_tag: &str) -> String {
        let fixed = match self {
            ElementClass::Project => "IfcProject",
            ElementClass::Site => "IfcSite",
            ElementClass::Building => "IfcBuilding",
            ElementClass::Storey => "IfcBuildingStorey",
            ElementClass::Space => "IfcSpace",
            ElementClass::Wall => "Wall",
            ElementClass::Slab => "Slab",
            ElementClass::Roof => "Roof",
            ElementClass::Door => "Door",
            ElementClass::Window => "Window",
            ElementClass::Opening => "Opening",
            ElementClass::Beam => "Beam",
            ElementClass::Column => "Column",
            ElementClass::Member => "Member",
            ElementClass::Railing => "Railing",
            ElementClass::Stair => "Stair",
            ElementClass::Covering => "Covering",
            ElementClass::Furniture => "Furniture",
            ElementClass::Proxy => "Proxy",
            ElementClass::Other => {
                let bare = type_tag.strip_prefix("Ifc").unwrap_or(type_tag);
                return if bare.is_empty() {
                    "Unknown".to_string()
                } else {
                    bare.to_string()
                };
            }
        };
        fixed.to_string()
    }

    /// All graph labels for a node of this class.
    ///
    /// Every node carries the common `Entity` lookup label; physical
    /// elements additionally carry `Element`.
    pub fn node_labels(self, type_tag: &str) -> Vec<String> {
        let mut labels = vec![self.specific_label(type_tag)];
        if !self.is_spatial_structure() {
            labels.push(ELEMENT_LABEL.to_string());
        }
        labels.push(ENTITY_LABEL.to_string());
        labels
    }
}

/// Common label on every imported node, used for identifier lookups.
pub const ENTITY_LABEL: &str = "Entity";
/// Label shared by physical building elements.
pub const ELEMENT_LABEL: &str = "Element";
/// Label of material nodes.
pub const MATERIAL_LABEL: &str = "Material";

/// Boundary-represented geometry as delivered by the parser.
///
/// `faces` is a flat list of count-prefixed index runs:
/// `[n, i0, .., i(n-1), m, j0, .., j(m-1), ...]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    pub vertices: Vec<[f64; 3]>,
    #[serde(default)]
    pub faces: Vec<usize>,
}

impl RawGeometry {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<usize>) -> Self {
        Self { vertices, faces }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Split `faces` into index runs.
    ///
    /// Stops at the first run whose count overruns the array. Runs shorter
    /// than three indices, or that reference a missing vertex, are skipped.
    pub fn face_runs(&self) -> Vec<&[usize]> {
        let mut runs = Vec::new();
        let mut cursor = 0;
        while cursor < self.faces.len() {
            let count = self.faces[cursor];
            let start = cursor + 1;
            let Some(end) = start.checked_add(count).filter(|&end| end <= self.faces.len()) else {
                break;
            };
            let run = &self.faces[start..end];
            if run.len() >= 3 && run.iter().all(|&i| i < self.vertices.len()) {
                runs.push(run);
            }
            cursor = end;
        }
        runs
    }

    /// Axis-aligned box mesh with outward-wound quad faces.
    pub fn cuboid(min: [f64; 3], max: [f64; 3]) -> Self {
        let [x0, y0, z0] = min;
        let [x1, y1, z1] = max;
        let vertices = vec![
            [x0, y0, z0],
            [x1, y0, z0],
            [x1, y1, z0],
            [x0, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x1, y1, z1],
            [x0, y1, z1],
        ];
        let quads: [[usize; 4]; 6] = [
            [0, 3, 2, 1], // bottom
            [4, 5, 6, 7], // top
            [0, 1, 5, 4], // front
            [2, 3, 7, 6], // back
            [1, 2, 6, 5], // right
            [3, 0, 4, 7], // left
        ];
        let mut faces = Vec::with_capacity(quads.len() * 5);
        for quad in quads {
            faces.push(4);
            faces.extend_from_slice(&quad);
        }
        Self { vertices, faces }
    }
}

/// Kinds of relationship stated directly in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredKind {
    /// Spatial containment in a space, storey, building or site.
    ContainedIn,
    /// Aggregation into a larger element.
    PartOf,
    /// A door or window filling an opening in the target element.
    FillsOpeningOf,
    /// The element bounds the target space.
    BoundsSpace,
    /// A generic port or path connection.
    ConnectedTo,
}

impl DeclaredKind {
    /// Relationship label used in the graph database.
    pub fn label(self) -> &'static str {
        match self {
            DeclaredKind::ContainedIn => "CONTAINED_IN_STRUCTURE",
            DeclaredKind::PartOf => "PART_OF",
            DeclaredKind::FillsOpeningOf => "FILLS",
            DeclaredKind::BoundsSpace => "BOUNDS",
            DeclaredKind::ConnectedTo => "CONNECTED_TO",
        }
    }

    pub const ALL: [DeclaredKind; 5] = [
        DeclaredKind::ContainedIn,
        DeclaredKind::PartOf,
        DeclaredKind::FillsOpeningOf,
        DeclaredKind::BoundsSpace,
        DeclaredKind::ConnectedTo,
    ];
}

/// One declared relation, from the owning element to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclaredRelation {
    pub kind: DeclaredKind,
    pub target: ElementId,
}

/// One building-model element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: ElementId,
    pub type_tag: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub declared: Vec<DeclaredRelation>,
    #[serde(default)]
    pub materials: Vec<String>,
}

impl ElementRecord {
    pub fn new(id: impl Into<ElementId>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            name: None,
            geometry: None,
            declared: Vec::new(),
            materials: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_geometry(mut self, geometry: RawGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn declare(mut self, kind: DeclaredKind, target: impl Into<ElementId>) -> Self {
        self.declared.push(DeclaredRelation {
            kind,
            target: target.into(),
        });
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.materials.push(material.into());
        self
    }

    pub fn class(&self) -> ElementClass {
        ElementClass::from_tag(&self.type_tag)
    }

    /// The display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Targets of declared relations of one kind.
    pub fn declared_targets(&self, kind: DeclaredKind) -> impl Iterator<Item = &ElementId> {
        self.declared
            .iter()
            .filter(move |rel| rel.kind == kind)
            .map(|rel| &rel.target)
    }
}

/// A material from the model's material catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize)]
struct RawElementSet {
    elements: Vec<ElementRecord>,
    #[serde(default)]
    materials: Vec<MaterialRecord>,
}

/// A validated set of elements with unique identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawElementSet")]
pub struct ElementSet {
    elements: Vec<ElementRecord>,
    #[serde(skip)]
    index: HashMap<ElementId, usize>,
    materials: Vec<MaterialRecord>,
}

impl TryFrom<RawElementSet> for ElementSet {
    type Error = ModelError;

    fn try_from(raw: RawElementSet) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.elements)?.with_materials(raw.materials))
    }
}

impl ElementSet {
    /// Build a set, rejecting empty or repeated identifiers.
    pub fn new(elements: Vec<ElementRecord>) -> Result<Self, ModelError> {
        let mut index = HashMap::with_capacity(elements.len());
        for (position, element) in elements.iter().enumerate() {
            if element.id.as_str().is_empty() {
                return Err(ModelError::EmptyIdentifier { index: position });
            }
            if index.insert(element.id.clone(), position).is_some() {
                return Err(ModelError::DuplicateIdentifier {
                    id: element.id.to_string(),
                });
            }
        }
        Ok(Self {
            elements,
            index,
            materials: Vec::new(),
        })
    }

    pub fn with_materials(mut self, materials: Vec<MaterialRecord>) -> Self {
        self.materials = materials;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        serde_json::from_str(json).map_err(|e| ModelError::Parse {
            message: e.to_string(),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn get(&self, id: &str) -> Option<&ElementRecord> {
        self.index.get(id).map(|&i| &self.elements[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ElementRecord> {
        self.elements.iter()
    }

    pub fn as_slice(&self) -> &[ElementRecord] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Material catalogue. Elements may name materials missing from it.
    pub fn materials(&self) -> &[MaterialRecord] {
        &self.materials
    }

    /// Number of elements that take part in geometric inference.
    pub fn geometry_candidates(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.class().is_geometry_candidate())
            .count()
    }
}

impl<'a> IntoIterator for &'a ElementSet {
    type Item = &'a ElementRecord;
    type IntoIter = std::slice::Iter<'a, ElementRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_type_tags() {
        assert_eq!(ElementClass::from_tag("IfcWallStandardCase"), ElementClass::Wall);
        assert_eq!(ElementClass::from_tag("IfcBuildingStorey"), ElementClass::Storey);
        assert_eq!(ElementClass::from_tag("IfcBuilding"), ElementClass::Building);
        assert_eq!(
            ElementClass::from_tag("IfcBuildingElementProxy"),
            ElementClass::Proxy
        );
        assert_eq!(ElementClass::from_tag("IFCDOOR"), ElementClass::Door);
        assert_eq!(ElementClass::from_tag("IfcFlowTerminal"), ElementClass::Other);
    }

    #[test]
    fn node_labels_follow_class() {
        let wall = ElementClass::Wall.node_labels("IfcWall");
        assert_eq!(wall, vec!["Wall", "Element", "Entity"]);

        let space = ElementClass::Space.node_labels("IfcSpace");
        assert_eq!(space, vec!["IfcSpace", "Entity"]);

        let other = ElementClass::Other.node_labels("IfcFlowTerminal");
        assert_eq!(other[0], "FlowTerminal");
    }

    #[test]
    fn tier_order_by_class() {
        assert_eq!(
            ElementClass::Column.preferred_tiers(),
            &[Tier::Volume, Tier::Curve]
        );
        assert_eq!(ElementClass::Wall.preferred_tiers()[0], Tier::Volume);
        assert!(ElementClass::Storey.preferred_tiers().is_empty());
    }

    #[test]
    fn face_runs_skip_short_and_stop_on_overrun() {
        let geometry = RawGeometry::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
            vec![3, 0, 1, 2, 2, 0, 1, 3, 0, 1, 9, 3, 1, 2, 3, 5, 0],
        );
        let runs = geometry.face_runs();
        // [0,1,2] kept, [0,1] too short, [0,1,9] out of range, [1,2,3] kept,
        // trailing count 5 overruns.
        assert_eq!(runs, vec![&[0usize, 1, 2][..], &[1usize, 2, 3][..]]);
    }

    #[test]
    fn huge_face_count_stops_parsing() {
        let set = ElementSet::from_json_str(
            r#"{"elements": [{"id": "w1", "type_tag": "IfcWall",
                "geometry": {"vertices": [[0, 0, 0], [1, 0, 0], [1, 1, 0]],
                             "faces": [3, 0, 1, 2, 18446744073709551615, 0]}}]}"#,
        )
        .unwrap();
        let geometry = set.get("w1").unwrap().geometry.as_ref().unwrap();
        assert_eq!(geometry.face_runs(), vec![&[0usize, 1, 2][..]]);

        let overflow = RawGeometry::new(vec![[0.0; 3]], vec![usize::MAX]);
        assert!(overflow.face_runs().is_empty());
    }

    #[test]
    fn cuboid_has_six_quads() {
        let geometry = RawGeometry::cuboid([0.0; 3], [1.0, 2.0, 3.0]);
        assert_eq!(geometry.vertices.len(), 8);
        assert_eq!(geometry.face_runs().len(), 6);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let result = ElementSet::new(vec![
            ElementRecord::new("a", "IfcWall"),
            ElementRecord::new("a", "IfcSlab"),
        ]);
        assert!(matches!(
            result,
            Err(ModelError::DuplicateIdentifier { id }) if id == "a"
        ));
    }

    #[test]
    fn json_round_trip_rebuilds_index() {
        let set = ElementSet::new(vec![
            ElementRecord::new("w1", "IfcWall").with_name("North wall"),
            ElementRecord::new("d1", "IfcDoor").declare(DeclaredKind::FillsOpeningOf, "w1"),
        ])
        .unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back = ElementSet::from_json_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.get("w1").unwrap().display_name(), "North wall");
        assert_eq!(
            back.get("d1")
                .unwrap()
                .declared_targets(DeclaredKind::FillsOpeningOf)
                .count(),
            1
        );
    }

    #[test]
    fn duplicate_ids_rejected_from_json() {
        let json = r#"{"elements":[{"id":"x","type_tag":"IfcWall"},{"id":"x","type_tag":"IfcWall"}]}"#;
        assert!(ElementSet::from_json_str(json).is_err());
    }
}
