use criterion::{
    BenchmarkId, Criterion, black_box, criterion_group, criterion_main,
};
use nalgebra::{Point3, Vector3};
use volcast::{
    Camera, ControlPoint, LocalGroup, Mesh, OpacityMap, RenderConfig,
    SingleProcess, ThreadPool, VolumeRenderer,
};

fn sphere() -> Mesh {
    Mesh::structured(
        [24, 24, 24],
        Point3::new(-1.0, -1.0, -1.0),
        Point3::new(1.0, 1.0, 1.0),
        |p| 1.0 - p.coords.norm(),
    )
}

fn config<'a>(size: u32, threads: Option<&'a ThreadPool>) -> RenderConfig<'a> {
    RenderConfig {
        camera: Camera {
            world_to_camera: Camera::orbit(Vector3::zeros(), 1.8, 0.4, 0.3),
            width: size,
            height: size,
            samples_per_ray: size,
            ..Camera::default()
        },
        opacity: OpacityMap::new(
            &[
                ControlPoint::new(0.0, [0, 0, 0, 0]),
                ControlPoint::new(0.3, [0, 128, 255, 40]),
                ControlPoint::new(0.8, [255, 200, 0, 200]),
            ],
            (0.0, 1.0),
        )
        .unwrap(),
        threads,
        ..RenderConfig::default()
    }
}

pub fn sphere_size_sweep(c: &mut Criterion) {
    let mesh = &sphere();
    let mut group = c.benchmark_group("speed vs image size (sphere, 1 rank)");
    for size in [64, 128, 256, 512] {
        let cfg = &config(size, Some(&ThreadPool::Global));
        group.bench_function(BenchmarkId::new("global", size), move |b| {
            b.iter(|| {
                let comm = SingleProcess;
                let mut r = VolumeRenderer::new(cfg, &comm);
                black_box(r.render(mesh.cells()).unwrap())
            })
        });
    }
}

pub fn sphere_thread_sweep(c: &mut Criterion) {
    let mesh = &sphere();
    let mut group =
        c.benchmark_group("speed vs threads (sphere, 1 rank) (256 x 256)");
    for threads in [1, 2, 4, 8] {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        let pool = ThreadPool::Custom(pool);
        let cfg = &config(256, Some(&pool));
        group.bench_function(BenchmarkId::new("threads", threads), move |b| {
            b.iter(|| {
                let comm = SingleProcess;
                let mut r = VolumeRenderer::new(cfg, &comm);
                black_box(r.render(mesh.cells()).unwrap())
            })
        });
    }
}

pub fn sphere_rank_sweep(c: &mut Criterion) {
    let mesh = sphere();
    let mut group =
        c.benchmark_group("speed vs ranks (sphere, 1 thread) (256 x 256)");
    for ranks in [1, 2, 4] {
        let parts = &mesh.split(ranks);
        let cfg = &config(256, None);
        group.bench_function(BenchmarkId::new("ranks", ranks), move |b| {
            b.iter(|| {
                std::thread::scope(|s| {
                    let handles = LocalGroup::new(ranks)
                        .into_iter()
                        .zip(parts)
                        .map(|(g, part)| {
                            s.spawn(move || {
                                let mut r = VolumeRenderer::new(cfg, &g);
                                r.render(part.cells()).unwrap()
                            })
                        })
                        .collect::<Vec<_>>();
                    for h in handles {
                        black_box(h.join().unwrap());
                    }
                })
            })
        });
    }
}

criterion_group!(
    benches,
    sphere_size_sweep,
    sphere_thread_sweep,
    sphere_rank_sweep
);
criterion_main!(benches);
