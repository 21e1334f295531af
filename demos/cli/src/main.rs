use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;
use nalgebra::{Point3, Vector3};

use volcast::{
    Background, Camera, CompositeOrder, ControlPoint, LightingModel,
    LocalGroup, Mesh, OpacityMap, RenderConfig, RenderOutput, SingleProcess,
    ThreadPool, VolumeRenderer,
};

/// Renders a synthetic scalar field with the volume ray caster
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Name of a `.png` file to write
    #[clap(short, long)]
    out: Option<PathBuf>,

    /// Scalar field to render
    #[clap(short, long, value_enum, default_value_t = Field::Sphere)]
    field: Field,

    /// Grid points along each axis of the mesh
    #[clap(short, long, default_value_t = 32)]
    grid: usize,

    /// Split every hexahedron into tetrahedra before rendering
    #[clap(long)]
    tetrahedralize: bool,

    /// Image size
    #[clap(short, long, default_value_t = 256)]
    size: u32,

    /// Samples along each ray (defaults to the image size)
    #[clap(long)]
    samples: Option<u32>,

    /// Number of in-process ranks
    #[clap(short, long, default_value_t = NonZeroUsize::new(1).unwrap())]
    ranks: NonZeroUsize,

    /// Number of threads to use within each rank
    #[clap(short, long)]
    threads: Option<NonZeroUsize>,

    /// Compositing order
    #[clap(long, value_enum, default_value_t = Order::FrontToBack)]
    order: Order,

    /// Shade samples with a headlight
    #[clap(long)]
    lit: bool,

    /// Camera rotation about the Z axis, in degrees
    #[clap(long, default_value_t = 30.0)]
    yaw: f32,

    /// Camera rotation about the X axis, in degrees
    #[clap(long, default_value_t = 20.0)]
    pitch: f32,

    /// Number of times to render (for benchmarking)
    #[clap(short = 'N', default_value_t = 1)]
    n: usize,
}

#[derive(ValueEnum, Clone, Copy)]
enum Field {
    /// Distance-based falloff from the origin
    Sphere,
    /// Concentric ripples
    Ripple,
}

#[derive(ValueEnum, Clone, Copy)]
enum Order {
    FrontToBack,
    BackToFront,
}

////////////////////////////////////////////////////////////////////////////////

fn build_mesh(args: &Args) -> Mesh {
    let field: fn(&Point3<f32>) -> f32 = match args.field {
        Field::Sphere => |p| (1.0 - p.coords.norm()).max(0.0),
        Field::Ripple => |p| {
            let r = p.coords.norm();
            ((r * 12.0).cos() * 0.5 + 0.5) * (1.0 - r).max(0.0)
        },
    };
    let mesh = Mesh::structured(
        [args.grid; 3],
        Point3::new(-1.0, -1.0, -1.0),
        Point3::new(1.0, 1.0, 1.0),
        field,
    );
    if args.tetrahedralize {
        mesh.tetrahedralize()
    } else {
        mesh
    }
}

fn render(
    args: &Args,
    cfg: &RenderConfig,
    mesh: &Mesh,
) -> Result<RenderOutput> {
    let ranks = args.ranks.get();
    if ranks == 1 {
        let comm = SingleProcess;
        let mut r = VolumeRenderer::new(cfg, &comm);
        return Ok(r.render(mesh.cells())?);
    }
    let parts = mesh.split(ranks);
    let mut out = std::thread::scope(|s| {
        let handles = LocalGroup::new(ranks)
            .into_iter()
            .zip(&parts)
            .map(|(g, part)| {
                s.spawn(move || {
                    let mut r = VolumeRenderer::new(cfg, &g);
                    r.render(part.cells())
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(r) => r.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow::anyhow!("rank thread panicked")),
            })
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(out.remove(0))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let args = Args::parse();

    let start = Instant::now();
    let mesh = build_mesh(&args);
    info!(
        "built mesh with {} cells in {:?}",
        mesh.cell_count(),
        start.elapsed()
    );

    let pool: Option<ThreadPool>;
    let threads = match args.threads {
        Some(n) if n.get() == 1 => None,
        Some(n) => {
            pool = Some(ThreadPool::Custom(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n.get())
                    .build()?,
            ));
            pool.as_ref()
        }
        None => Some(&ThreadPool::Global),
    };

    info!(
        "using {} thread(s) per rank",
        threads.map(|t| t.thread_count()).unwrap_or(1)
    );

    let opacity = OpacityMap::new(
        &[
            ControlPoint::new(0.0, [0, 0, 0, 0]),
            ControlPoint::new(0.2, [40, 80, 255, 20]),
            ControlPoint::new(0.5, [60, 220, 120, 90]),
            ControlPoint::new(0.9, [255, 230, 80, 220]),
        ],
        (0.0, 1.0),
    )?;
    let cfg = RenderConfig {
        camera: Camera {
            world_to_camera: Camera::orbit(
                Vector3::zeros(),
                1.8,
                args.yaw.to_radians(),
                args.pitch.to_radians(),
            ),
            width: args.size,
            height: args.size,
            samples_per_ray: args.samples.unwrap_or(args.size),
            ..Camera::default()
        },
        opacity,
        order: match args.order {
            Order::FrontToBack => CompositeOrder::FrontToBack,
            Order::BackToFront => CompositeOrder::BackToFront,
        },
        lighting: if args.lit {
            LightingModel::headlight()
        } else {
            LightingModel::Unlit
        },
        background: Background::VerticalGradient {
            top: [40, 40, 48, 255],
            bottom: [0, 0, 0, 255],
        },
        threads,
        ..RenderConfig::default()
    };

    let start = Instant::now();
    let mut out = None;
    for _ in 0..args.n {
        out = Some(render(&args, &cfg, &mesh)?);
    }
    let Some(out) = out else {
        bail!("no renders requested");
    };
    info!(
        "rendered {}x{} with {} rank(s) in {:?} (average)",
        args.size,
        args.size,
        args.ranks,
        start.elapsed() / args.n as u32
    );
    info!("{:?}", out.stats);
    for d in &out.defects {
        log::warn!("scanlines {d:?} are missing");
    }

    if let (Some(path), Some(image)) = (&args.out, out.image) {
        let start = Instant::now();
        image::save_buffer(
            path,
            image.as_bytes(),
            image.width() as u32,
            image.height() as u32,
            image::ExtendedColorType::Rgba8,
        )?;
        info!("wrote {path:?} in {:?}", start.elapsed());
    }
    Ok(())
}
