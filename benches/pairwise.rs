//! Benchmarks for pairwise relationship extraction and path search.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use topograph::config::{ExtractionConfig, ResolverConfig};
use topograph::element::{ElementRecord, ElementSet, RawGeometry};
use topograph::executor::ParallelBatchExecutor;
use topograph::extract::RelationshipExtractor;
use topograph::kernel::MeshKernel;
use topograph::pathfind::{self, KindFilter};
use topograph::resolver::Resolver;
use topograph::run::AnalysisRun;

/// A `side` x `side` grid of unit wall blocks, each sharing faces with its
/// neighbours.
fn wall_grid(side: usize) -> ElementSet {
    let mut walls = Vec::with_capacity(side * side);
    for x in 0..side {
        for y in 0..side {
            let min = [x as f64, y as f64, 0.0];
            let max = [x as f64 + 1.0, y as f64 + 1.0, 3.0];
            walls.push(
                ElementRecord::new(format!("W{x}_{y}"), "IfcWall")
                    .with_geometry(RawGeometry::cuboid(min, max)),
            );
        }
    }
    ElementSet::new(walls).unwrap()
}

fn bench_adjacency(c: &mut Criterion) {
    let kernel = MeshKernel::new();
    let executor = ParallelBatchExecutor::new(0).unwrap();
    let elements = wall_grid(8);

    c.bench_function("adjacency_grid_8x8", |bench| {
        bench.iter(|| {
            let run = AnalysisRun::new();
            Resolver::new(&kernel, ResolverConfig::default())
                .resolve_all(&run, &elements, &executor)
                .unwrap();
            let extractor =
                RelationshipExtractor::new(&kernel, &executor, ExtractionConfig::default());
            black_box(extractor.adjacency(&run, &elements, 0.001).unwrap())
        })
    });
}

fn bench_find_path(c: &mut Criterion) {
    let kernel = MeshKernel::new();
    let executor = ParallelBatchExecutor::new(0).unwrap();
    let elements = wall_grid(12);
    let run = AnalysisRun::new();
    Resolver::new(&kernel, ResolverConfig::default())
        .resolve_all(&run, &elements, &executor)
        .unwrap();
    let maps = RelationshipExtractor::new(&kernel, &executor, ExtractionConfig::default())
        .extract_all(&run, &elements, 0.001)
        .unwrap();
    let graph = topograph::connectivity::ConnectivityGraph::build(
        &elements,
        &maps.adjacency.map,
        &maps.containment.map,
        &maps.boundary.map,
    );
    let filter = KindFilter::all();

    c.bench_function("find_path_grid_12x12", |bench| {
        bench.iter(|| black_box(pathfind::find_path(&graph, "W0_0", "W11_11", &filter, 64)))
    });
}

criterion_group!(benches, bench_adjacency, bench_find_path);
criterion_main!(benches);
