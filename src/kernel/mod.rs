//! Geometry kernel seam.
//!
//! The inference core never inspects geometry directly: it builds proxies
//! through [`GeometryKernel`] primitives and asks the kernel's predicates
//! whether two proxies share boundary elements or nest. Shapes are opaque
//! kernel-owned values; the core keeps them in a run-scoped handle table and
//! only hands out references.

pub mod mesh;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

pub use mesh::{MeshKernel, MeshShape};

/// Result type for kernel operations.
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Dimensional tier of a topological proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// A closed volume (cell).
    Volume,
    /// A single planar face.
    Surface,
    /// An edge or a cluster of edges.
    Curve,
    /// A cluster of vertices.
    PointCluster,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Volume => "volume",
            Tier::Surface => "surface",
            Tier::Curve => "curve",
            Tier::PointCluster => "point_cluster",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary-representation construction and predicate service.
///
/// Every operation that compares coordinates takes the tolerance to use.
/// Implementations must be callable from several worker threads at once.
pub trait GeometryKernel: Send + Sync {
    /// Opaque kernel shape.
    type Shape: Send + Sync;

    fn vertex(&self, point: [f64; 3]) -> Self::Shape;

    /// Straight edge between two vertices.
    fn edge(&self, start: &Self::Shape, end: &Self::Shape, tolerance: f64)
    -> KernelResult<Self::Shape>;

    /// Closed wire through `vertices`; the last vertex must repeat the first.
    fn closed_wire(&self, vertices: &[Self::Shape], tolerance: f64) -> KernelResult<Self::Shape>;

    /// Closed wire assembled from connected edges.
    fn wire_from_edges(&self, edges: &[Self::Shape], tolerance: f64)
    -> KernelResult<Self::Shape>;

    /// Planar face bounded by a closed wire.
    fn face(&self, wire: &Self::Shape, tolerance: f64) -> KernelResult<Self::Shape>;

    /// Closed volume bounded by faces.
    fn volume(&self, faces: &[Self::Shape], tolerance: f64) -> KernelResult<Self::Shape>;

    /// Unstructured collection of shapes.
    fn cluster(&self, shapes: Vec<Self::Shape>) -> Self::Shape;

    fn faces(&self, shape: &Self::Shape) -> Vec<Self::Shape>;
    fn edges(&self, shape: &Self::Shape) -> Vec<Self::Shape>;
    fn vertices(&self, shape: &Self::Shape) -> Vec<Self::Shape>;

    /// Number of faces of `a` that coincide with a face of `b`.
    fn shared_faces(&self, a: &Self::Shape, b: &Self::Shape, tolerance: f64)
    -> KernelResult<usize>;

    /// Number of edges of `a` that coincide with an edge of `b`.
    fn shared_edges(&self, a: &Self::Shape, b: &Self::Shape, tolerance: f64)
    -> KernelResult<usize>;

    /// Number of vertices of `a` that coincide with a vertex of `b`.
    fn shared_vertices(
        &self,
        a: &Self::Shape,
        b: &Self::Shape,
        tolerance: f64,
    ) -> KernelResult<usize>;

    /// Whether `inner` lies entirely inside the volume `outer`.
    fn is_contained(
        &self,
        inner: &Self::Shape,
        outer: &Self::Shape,
        tolerance: f64,
    ) -> KernelResult<bool>;

    /// Whether two shapes are geometrically identical.
    fn is_same(&self, a: &Self::Shape, b: &Self::Shape, tolerance: f64) -> KernelResult<bool>;
}

/// Whether two proxies share a boundary element, by tier combination.
///
/// Volumes touch through shared faces, surfaces through shared edges and
/// curves through shared vertices. A lower-tier proxy touches a higher-tier
/// one when it coincides with one of its boundary elements. Point clusters
/// touch anything they share a vertex with.
pub fn touches<K: GeometryKernel + ?Sized>(
    kernel: &K,
    a: (&K::Shape, Tier),
    b: (&K::Shape, Tier),
    tolerance: f64,
) -> KernelResult<bool> {
    use Tier::*;

    let ((sa, ta), (sb, tb)) = (a, b);
    match (ta, tb) {
        (Volume, Volume) => Ok(kernel.shared_faces(sa, sb, tolerance)? > 0),
        (Surface, Surface) => Ok(kernel.shared_edges(sa, sb, tolerance)? > 0),
        (Curve, Curve) => Ok(kernel.shared_vertices(sa, sb, tolerance)? > 0),
        (Volume, Surface) => any_same(kernel, &kernel.faces(sa), &[sb], tolerance),
        (Surface, Volume) => any_same(kernel, &kernel.faces(sb), &[sa], tolerance),
        (Curve, Surface | Volume) => {
            any_same(kernel, &kernel.edges(sb), &kernel.edges(sa), tolerance)
        }
        (Surface | Volume, Curve) => {
            any_same(kernel, &kernel.edges(sa), &kernel.edges(sb), tolerance)
        }
        (PointCluster, _) | (_, PointCluster) => {
            Ok(kernel.shared_vertices(sa, sb, tolerance)? > 0)
        }
    }
}

fn any_same<K, A, B>(kernel: &K, left: &[A], right: &[B], tolerance: f64) -> KernelResult<bool>
where
    K: GeometryKernel + ?Sized,
    A: std::borrow::Borrow<K::Shape>,
    B: std::borrow::Borrow<K::Shape>,
{
    for l in left {
        for r in right {
            if kernel.is_same(l.borrow(), r.borrow(), tolerance)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::RawGeometry;

    fn box_volume(kernel: &MeshKernel, min: [f64; 3], max: [f64; 3]) -> MeshShape {
        let geometry = RawGeometry::cuboid(min, max);
        let faces: Vec<MeshShape> = geometry
            .face_runs()
            .iter()
            .map(|run| {
                let mut loop_vertices: Vec<MeshShape> = run
                    .iter()
                    .map(|&i| kernel.vertex(geometry.vertices[i]))
                    .collect();
                loop_vertices.push(kernel.vertex(geometry.vertices[run[0]]));
                let wire = kernel.closed_wire(&loop_vertices, 1e-3).unwrap();
                kernel.face(&wire, 1e-3).unwrap()
            })
            .collect();
        kernel.volume(&faces, 1e-3).unwrap()
    }

    #[test]
    fn volumes_touch_through_shared_face() {
        let k = MeshKernel::new();
        let a = box_volume(&k, [0.0; 3], [1.0, 1.0, 1.0]);
        let b = box_volume(&k, [1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        let c = box_volume(&k, [5.0, 0.0, 0.0], [6.0, 1.0, 1.0]);
        assert!(touches(&k, (&a, Tier::Volume), (&b, Tier::Volume), 1e-3).unwrap());
        assert!(!touches(&k, (&a, Tier::Volume), (&c, Tier::Volume), 1e-3).unwrap());
    }

    #[test]
    fn surface_touches_volume_it_bounds() {
        let k = MeshKernel::new();
        let a = box_volume(&k, [0.0; 3], [1.0, 1.0, 1.0]);
        let faces = k.faces(&a);
        assert!(touches(&k, (&faces[0], Tier::Surface), (&a, Tier::Volume), 1e-3).unwrap());
    }

    #[test]
    fn curve_touches_volume_through_edge() {
        let k = MeshKernel::new();
        let a = box_volume(&k, [0.0; 3], [1.0, 1.0, 1.0]);
        let p = k.vertex([0.0, 0.0, 0.0]);
        let q = k.vertex([1.0, 0.0, 0.0]);
        let edge = k.edge(&p, &q, 1e-3).unwrap();
        assert!(touches(&k, (&edge, Tier::Curve), (&a, Tier::Volume), 1e-3).unwrap());
    }
}
