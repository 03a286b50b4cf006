//! Polygon-mesh reference kernel.
//!
//! Shapes are plain coordinate structures. Points match when they lie within
//! the tolerance of each other; faces and edges match when their vertex sets
//! match regardless of orientation or starting vertex. Containment is
//! bounding-box containment. This is enough for axis-aligned building
//! models and for exercising the inference pipeline; it makes no attempt at
//! CAD-grade robustness.

use crate::error::KernelError;

use super::{GeometryKernel, KernelResult};

pub type Point = [f64; 3];

/// A shape owned by [`MeshKernel`].
#[derive(Debug, Clone, PartialEq)]
pub enum MeshShape {
    Vertex(Point),
    Edge(Point, Point),
    /// Closed loop; the first point is not repeated.
    Wire(Vec<Point>),
    /// Planar polygon; the first point is not repeated.
    Face(Vec<Point>),
    /// Closed shell of polygon faces.
    Volume(Vec<Vec<Point>>),
    Cluster(Vec<MeshShape>),
}

impl MeshShape {
    fn kind(&self) -> &'static str {
        match self {
            MeshShape::Vertex(_) => "vertex",
            MeshShape::Edge(..) => "edge",
            MeshShape::Wire(_) => "wire",
            MeshShape::Face(_) => "face",
            MeshShape::Volume(_) => "volume",
            MeshShape::Cluster(_) => "cluster",
        }
    }

    fn collect_points(&self, out: &mut Vec<Point>) {
        match self {
            MeshShape::Vertex(p) => out.push(*p),
            MeshShape::Edge(a, b) => out.extend([*a, *b]),
            MeshShape::Wire(points) | MeshShape::Face(points) => out.extend_from_slice(points),
            MeshShape::Volume(faces) => faces.iter().for_each(|f| out.extend_from_slice(f)),
            MeshShape::Cluster(shapes) => shapes.iter().for_each(|s| s.collect_points(out)),
        }
    }

    fn is_finite(&self) -> bool {
        let mut points = Vec::new();
        self.collect_points(&mut points);
        points.iter().flatten().all(|v| v.is_finite())
    }

    /// Axis-aligned bounds, `None` for an empty cluster.
    pub fn bounds(&self) -> Option<Aabb> {
        let mut points = Vec::new();
        self.collect_points(&mut points);
        Aabb::from_points(&points)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point,
    pub max: Point,
}

impl Aabb {
    fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &points[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some(Self { min, max })
    }

    pub fn intersects(&self, other: &Aabb, tolerance: f64) -> bool {
        (0..3).all(|axis| {
            self.min[axis] <= other.max[axis] + tolerance
                && other.min[axis] <= self.max[axis] + tolerance
        })
    }

    pub fn contains(&self, inner: &Aabb, tolerance: f64) -> bool {
        (0..3).all(|axis| {
            inner.min[axis] >= self.min[axis] - tolerance
                && inner.max[axis] <= self.max[axis] + tolerance
        })
    }
}

fn distance_sq(a: &Point, b: &Point) -> f64 {
    (0..3).map(|i| (a[i] - b[i]).powi(2)).sum()
}

fn same_point(a: &Point, b: &Point, tolerance: f64) -> bool {
    distance_sq(a, b) <= tolerance * tolerance
}

fn same_segment(a: (&Point, &Point), b: (&Point, &Point), tolerance: f64) -> bool {
    (same_point(a.0, b.0, tolerance) && same_point(a.1, b.1, tolerance))
        || (same_point(a.0, b.1, tolerance) && same_point(a.1, b.0, tolerance))
}

/// Same point set, each point of `a` matched to a distinct point of `b`.
fn same_loop(a: &[Point], b: &[Point], tolerance: f64) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|p| {
        match (0..b.len()).find(|&j| !used[j] && same_point(p, &b[j], tolerance)) {
            Some(j) => {
                used[j] = true;
                true
            }
            None => false,
        }
    })
}

fn segments(points: &[Point]) -> impl Iterator<Item = (&Point, &Point)> {
    let n = points.len();
    (0..n).map(move |i| (&points[i], &points[(i + 1) % n]))
}

/// Area of a planar polygon by Newell's method.
fn polygon_area(points: &[Point]) -> f64 {
    let mut normal = [0.0; 3];
    for (a, b) in segments(points) {
        normal[0] += (a[1] - b[1]) * (a[2] + b[2]);
        normal[1] += (a[2] - b[2]) * (a[0] + b[0]);
        normal[2] += (a[0] - b[0]) * (a[1] + b[1]);
    }
    0.5 * (normal[0].powi(2) + normal[1].powi(2) + normal[2].powi(2)).sqrt()
}

fn as_point(shape: &MeshShape, operation: &str) -> KernelResult<Point> {
    match shape {
        MeshShape::Vertex(p) => Ok(*p),
        other => Err(KernelError::Unsupported {
            operation: operation.to_string(),
            shape: other.kind().to_string(),
        }),
    }
}

fn dedup_points(points: Vec<Point>, tolerance: f64) -> Vec<Point> {
    let mut unique: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !unique.iter().any(|q| same_point(&p, q, tolerance)) {
            unique.push(p);
        }
    }
    unique
}

/// Tolerance used when navigation has to merge coincident elements.
const MERGE_TOLERANCE: f64 = 1e-9;

/// Reference [`GeometryKernel`] over polygon meshes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshKernel;

impl MeshKernel {
    pub fn new() -> Self {
        Self
    }

    fn prefilter(&self, a: &MeshShape, b: &MeshShape, tolerance: f64, predicate: &str)
    -> KernelResult<bool> {
        if !a.is_finite() || !b.is_finite() {
            return Err(KernelError::Predicate {
                predicate: predicate.to_string(),
                message: "non-finite coordinate".to_string(),
            });
        }
        let (Some(ba), Some(bb)) = (a.bounds(), b.bounds()) else {
            return Ok(false);
        };
        Ok(ba.intersects(&bb, tolerance))
    }

    fn count_matching<F>(&self, left: &[MeshShape], right: &[MeshShape], same: F) -> usize
    where
        F: Fn(&MeshShape, &MeshShape) -> bool,
    {
        left.iter()
            .filter(|l| right.iter().any(|r| same(*l, r)))
            .count()
    }

    fn same_shape(&self, a: &MeshShape, b: &MeshShape, tolerance: f64) -> bool {
        match (a, b) {
            (MeshShape::Vertex(p), MeshShape::Vertex(q)) => same_point(p, q, tolerance),
            (MeshShape::Edge(a0, a1), MeshShape::Edge(b0, b1)) => {
                same_segment((a0, a1), (b0, b1), tolerance)
            }
            (MeshShape::Wire(p), MeshShape::Wire(q)) | (MeshShape::Face(p), MeshShape::Face(q)) => {
                same_loop(p, q, tolerance)
            }
            (MeshShape::Volume(fa), MeshShape::Volume(fb)) => {
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .all(|f| fb.iter().any(|g| same_loop(f, g, tolerance)))
            }
            (MeshShape::Cluster(sa), MeshShape::Cluster(sb)) => {
                sa.len() == sb.len()
                    && sa
                        .iter()
                        .all(|s| sb.iter().any(|t| self.same_shape(s, t, tolerance)))
            }
            _ => false,
        }
    }
}

impl GeometryKernel for MeshKernel {
    type Shape = MeshShape;

    fn vertex(&self, point: [f64; 3]) -> MeshShape {
        MeshShape::Vertex(point)
    }

    fn edge(&self, start: &MeshShape, end: &MeshShape, tolerance: f64) -> KernelResult<MeshShape> {
        let a = as_point(start, "edge")?;
        let b = as_point(end, "edge")?;
        if same_point(&a, &b, tolerance) {
            return Err(KernelError::Degenerate {
                what: "edge of zero length".to_string(),
            });
        }
        Ok(MeshShape::Edge(a, b))
    }

    fn closed_wire(&self, vertices: &[MeshShape], tolerance: f64) -> KernelResult<MeshShape> {
        let points = vertices
            .iter()
            .map(|v| as_point(v, "closed_wire"))
            .collect::<KernelResult<Vec<_>>>()?;
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(KernelError::Degenerate {
                what: "empty wire".to_string(),
            });
        };
        if !same_point(first, last, tolerance) {
            return Err(KernelError::OpenWire {
                gap: distance_sq(first, last).sqrt(),
            });
        }
        let open = &points[..points.len() - 1];
        if open.len() < 3 {
            return Err(KernelError::Degenerate {
                what: format!("wire with {} vertices", open.len()),
            });
        }
        if segments(open).any(|(a, b)| same_point(a, b, tolerance)) {
            return Err(KernelError::Degenerate {
                what: "wire segment of zero length".to_string(),
            });
        }
        Ok(MeshShape::Wire(open.to_vec()))
    }

    fn wire_from_edges(&self, edges: &[MeshShape], tolerance: f64) -> KernelResult<MeshShape> {
        let mut points: Vec<Point> = Vec::with_capacity(edges.len());
        let mut previous_end: Option<Point> = None;
        for edge in edges {
            let MeshShape::Edge(start, end) = edge else {
                return Err(KernelError::Unsupported {
                    operation: "wire_from_edges".to_string(),
                    shape: edge.kind().to_string(),
                });
            };
            if let Some(prev) = previous_end {
                if !same_point(&prev, start, tolerance) {
                    return Err(KernelError::OpenWire {
                        gap: distance_sq(&prev, start).sqrt(),
                    });
                }
            }
            points.push(*start);
            previous_end = Some(*end);
        }
        if points.len() < 3 {
            return Err(KernelError::Degenerate {
                what: format!("wire with {} edges", points.len()),
            });
        }
        if let Some(end) = previous_end {
            if !same_point(&end, &points[0], tolerance) {
                return Err(KernelError::OpenWire {
                    gap: distance_sq(&end, &points[0]).sqrt(),
                });
            }
        }
        Ok(MeshShape::Wire(points))
    }

    fn face(&self, wire: &MeshShape, tolerance: f64) -> KernelResult<MeshShape> {
        let MeshShape::Wire(points) = wire else {
            return Err(KernelError::Unsupported {
                operation: "face".to_string(),
                shape: wire.kind().to_string(),
            });
        };
        if polygon_area(points) <= tolerance * tolerance {
            return Err(KernelError::Degenerate {
                what: "face of zero area".to_string(),
            });
        }
        Ok(MeshShape::Face(points.clone()))
    }

    fn volume(&self, faces: &[MeshShape], tolerance: f64) -> KernelResult<MeshShape> {
        let mut loops = Vec::with_capacity(faces.len());
        for face in faces {
            match face {
                MeshShape::Face(points) => loops.push(points.clone()),
                other => {
                    return Err(KernelError::Unsupported {
                        operation: "volume".to_string(),
                        shape: other.kind().to_string(),
                    });
                }
            }
        }

        // Closed shell: every edge is used by exactly two faces.
        let all_edges: Vec<(&Point, &Point)> =
            loops.iter().flat_map(|l| segments(l)).collect();
        let free_edges = all_edges
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                let uses = all_edges
                    .iter()
                    .enumerate()
                    .filter(|(j, f)| j != i && same_segment(**e, **f, tolerance))
                    .count();
                uses != 1
            })
            .count();
        if free_edges > 0 {
            return Err(KernelError::OpenShell { free_edges });
        }
        Ok(MeshShape::Volume(loops))
    }

    fn cluster(&self, shapes: Vec<MeshShape>) -> MeshShape {
        MeshShape::Cluster(shapes)
    }

    fn faces(&self, shape: &MeshShape) -> Vec<MeshShape> {
        match shape {
            MeshShape::Face(_) => vec![shape.clone()],
            MeshShape::Volume(loops) => loops.iter().cloned().map(MeshShape::Face).collect(),
            MeshShape::Cluster(shapes) => shapes.iter().flat_map(|s| self.faces(s)).collect(),
            _ => Vec::new(),
        }
    }

    fn edges(&self, shape: &MeshShape) -> Vec<MeshShape> {
        let raw: Vec<MeshShape> = match shape {
            MeshShape::Edge(..) => return vec![shape.clone()],
            MeshShape::Wire(points) | MeshShape::Face(points) => segments(points)
                .map(|(a, b)| MeshShape::Edge(*a, *b))
                .collect(),
            MeshShape::Volume(loops) => loops
                .iter()
                .flat_map(|l| segments(l).map(|(a, b)| MeshShape::Edge(*a, *b)))
                .collect(),
            MeshShape::Cluster(shapes) => shapes.iter().flat_map(|s| self.edges(s)).collect(),
            MeshShape::Vertex(_) => return Vec::new(),
        };
        let mut unique: Vec<MeshShape> = Vec::with_capacity(raw.len());
        for edge in raw {
            if !unique
                .iter()
                .any(|u| self.same_shape(u, &edge, MERGE_TOLERANCE))
            {
                unique.push(edge);
            }
        }
        unique
    }

    fn vertices(&self, shape: &MeshShape) -> Vec<MeshShape> {
        let mut points = Vec::new();
        shape.collect_points(&mut points);
        dedup_points(points, MERGE_TOLERANCE)
            .into_iter()
            .map(MeshShape::Vertex)
            .collect()
    }

    fn shared_faces(&self, a: &MeshShape, b: &MeshShape, tolerance: f64) -> KernelResult<usize> {
        if !self.prefilter(a, b, tolerance, "shared_faces")? {
            return Ok(0);
        }
        Ok(self.count_matching(&self.faces(a), &self.faces(b), |l, r| {
            self.same_shape(l, r, tolerance)
        }))
    }

    fn shared_edges(&self, a: &MeshShape, b: &MeshShape, tolerance: f64) -> KernelResult<usize> {
        if !self.prefilter(a, b, tolerance, "shared_edges")? {
            return Ok(0);
        }
        Ok(self.count_matching(&self.edges(a), &self.edges(b), |l, r| {
            self.same_shape(l, r, tolerance)
        }))
    }

    fn shared_vertices(
        &self,
        a: &MeshShape,
        b: &MeshShape,
        tolerance: f64,
    ) -> KernelResult<usize> {
        if !self.prefilter(a, b, tolerance, "shared_vertices")? {
            return Ok(0);
        }
        Ok(self.count_matching(&self.vertices(a), &self.vertices(b), |l, r| {
            self.same_shape(l, r, tolerance)
        }))
    }

    fn is_contained(
        &self,
        inner: &MeshShape,
        outer: &MeshShape,
        tolerance: f64,
    ) -> KernelResult<bool> {
        if !matches!(outer, MeshShape::Volume(_)) {
            return Err(KernelError::Unsupported {
                operation: "is_contained".to_string(),
                shape: outer.kind().to_string(),
            });
        }
        if !self.prefilter(inner, outer, tolerance, "is_contained")? {
            return Ok(false);
        }
        let (Some(bi), Some(bo)) = (inner.bounds(), outer.bounds()) else {
            return Ok(false);
        };
        Ok(bo.contains(&bi, tolerance) && !self.same_shape(inner, outer, tolerance))
    }

    fn is_same(&self, a: &MeshShape, b: &MeshShape, tolerance: f64) -> KernelResult<bool> {
        Ok(self.same_shape(a, b, tolerance))
    }
}
