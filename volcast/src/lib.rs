//! Parallel sample-based volume rendering of unstructured meshes
//!
//! Cells (tetrahedra, hexahedra, wedges, and pyramids) are transformed into a
//! normalized `[-1, 1]³` camera cube, scan-converted into a dense volume of
//! samples along each pixel's ray, and composited front-to-back (or
//! back-to-front) through an opacity transfer function.
//!
//! Rendering can be spread across several ranks which each own part of the
//! mesh; see [`VolumeRenderer`] and the [`comm`] module.
//!
//! ```
//! use volcast::{
//!     Camera, Cell, CellKind, ControlPoint, OpacityMap, RenderConfig,
//!     SingleProcess, VolumeRenderer,
//! };
//! use nalgebra::Point3;
//!
//! // A cube spanning [-0.5, 0.5]³, with a constant field value of 1
//! let corners: [[f32; 3]; 8] = [
//!     [-0.5, -0.5, -0.5],
//!     [0.5, -0.5, -0.5],
//!     [0.5, 0.5, -0.5],
//!     [-0.5, 0.5, -0.5],
//!     [-0.5, -0.5, 0.5],
//!     [0.5, -0.5, 0.5],
//!     [0.5, 0.5, 0.5],
//!     [-0.5, 0.5, 0.5],
//! ];
//! let points = corners.map(Point3::from);
//! let cube = Cell::with_scalars(CellKind::Hexahedron, &points, &[1.0; 8])?;
//!
//! let cfg = RenderConfig {
//!     camera: Camera {
//!         width: 4,
//!         height: 4,
//!         samples_per_ray: 8,
//!         ..Camera::default()
//!     },
//!     opacity: OpacityMap::new(
//!         &[
//!             ControlPoint::new(0.0, [0, 0, 0, 0]),
//!             ControlPoint::new(1.0, [255, 0, 0, 128]),
//!         ],
//!         (0.0, 1.0),
//!     )?,
//!     ..RenderConfig::default()
//! };
//! let comm = SingleProcess;
//! let mut renderer = VolumeRenderer::new(&cfg, &comm);
//! let out = renderer.render([cube])?;
//! let image = out.image.unwrap();
//!
//! // Corner rays miss the cube and show the black background
//! assert_eq!(image[(0, 0)], [0, 0, 0, 255]);
//!
//! // Center rays pass through four semi-transparent red samples
//! assert_eq!(image[(1, 1)], [239, 0, 0, 255]);
//! # Ok::<(), volcast::Error>(())
//! ```
#![warn(missing_docs)]

pub mod arbitrate;
pub mod buffer;
pub mod camera;
pub mod cell;
pub mod comm;
pub mod composite;
pub mod config;
pub mod extract;
pub mod image;
pub mod mesh;
pub mod opacity;
pub mod partition;
pub mod render;
pub mod screen;
pub mod volume;

mod error;

pub use arbitrate::{Arbitrator, MaxValueArbitrator, OpacityMapArbitrator};
pub use camera::Camera;
pub use cell::{Cell, CellKind, MAX_VARIABLES};
pub use comm::{Communicator, LocalGroup, SingleProcess};
pub use composite::{CompositeOrder, LightingModel, RayFunction};
pub use config::{CancelToken, RenderConfig, ThreadPool, TransferVariables};
pub use error::Error;
pub use image::{Background, Image, OpaqueImage, RgbaImage};
pub use mesh::Mesh;
pub use opacity::{ControlPoint, OpacityMap};
pub use render::{RenderOutput, RenderStage, RenderStats, VolumeRenderer};
pub use screen::{Screen, ScreenBounds};
