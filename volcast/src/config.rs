//! Render configuration and the types used in it
use crate::{
    Error,
    arbitrate::Arbitrator,
    camera::Camera,
    cell::MAX_VARIABLES,
    composite::{CompositeOrder, LightingModel, RayFunction},
    image::{Background, OpaqueImage},
    opacity::OpacityMap,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Thread pool to use for multithreaded rendering
///
/// Most users will use the global Rayon pool, but it's possible to provide your
/// own as well.
pub enum ThreadPool {
    /// User-provided pool
    Custom(rayon::ThreadPool),
    /// Global Rayon pool
    Global,
}

impl ThreadPool {
    /// Runs a function across the thread pool
    pub fn run<F: FnOnce() -> V + Send, V: Send>(&self, f: F) -> V {
        match self {
            ThreadPool::Custom(p) => p.install(f),
            ThreadPool::Global => f(),
        }
    }

    /// Returns the number of threads in the pool
    pub fn thread_count(&self) -> usize {
        match self {
            ThreadPool::Custom(p) => p.current_num_threads(),
            ThreadPool::Global => rayon::current_num_threads(),
        }
    }
}

/// Token to cancel an in-progress render
///
/// Clones share the same flag, so one token can be handed to every rank of a
/// distributed render.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Build a new token, which is initialize as "not cancelled"
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this token as cancelled
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Check if the token is cancelled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which per-vertex variables drive the transfer function
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransferVariables {
    /// Variable whose lookup provides RGB
    pub color: usize,
    /// Variable whose lookup provides opacity (and arbitration, and shading)
    pub opacity: usize,
}

impl TransferVariables {
    /// Returns the number of variables each sample must carry
    pub fn required(&self) -> usize {
        self.color.max(self.opacity) + 1
    }
}

/// Settings for a volume render
///
/// The same configuration must be used on every rank of a distributed
/// render.
pub struct RenderConfig<'a> {
    /// Camera and sampling density
    pub camera: Camera,

    /// Transfer function, shared by arbitration and compositing
    pub opacity: OpacityMap,

    /// Variables used for color and opacity
    pub variables: TransferVariables,

    /// Order in which samples are blended along each ray
    pub order: CompositeOrder,

    /// Shading model
    pub lighting: LightingModel,

    /// Front-to-back compositing stops once a ray's opacity reaches this value
    ///
    /// Must be in `(0, 1]`; a value of `1.0` disables early exit.
    pub early_exit: f32,

    /// Fill behind the volume
    pub background: Background,

    /// Optional opaque surfaces, which must match the camera resolution
    pub opaque: Option<OpaqueImage>,

    /// Skip cells whose values all map to zero opacity
    ///
    /// This is ignored when lighting needs gradients, since transparent
    /// samples still shape the gradients of their visible neighbors.
    pub cull_transparent: bool,

    /// Collision policy for the sample volume
    ///
    /// If this is `None`, an
    /// [`OpacityMapArbitrator`](crate::arbitrate::OpacityMapArbitrator) over
    /// the opacity variable is used.
    pub arbitrator: Option<&'a dyn Arbitrator>,

    /// Thread pool to use for extraction and compositing
    ///
    /// If this is `None`, then each stage runs on the calling thread.
    pub threads: Option<&'a ThreadPool>,

    /// Token used to cancel rendering
    pub cancel: CancelToken,
}

impl Default for RenderConfig<'_> {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            opacity: OpacityMap::default(),
            variables: TransferVariables::default(),
            order: CompositeOrder::default(),
            lighting: LightingModel::default(),
            early_exit: 0.99,
            background: Background::default(),
            opaque: None,
            cull_transparent: true,
            arbitrator: None,
            threads: Some(&ThreadPool::Global),
            cancel: CancelToken::new(),
        }
    }
}

impl RenderConfig<'_> {
    /// Checks the configuration before any buffers are allocated
    pub fn validate(&self) -> Result<(), Error> {
        self.camera.validate()?;
        if !(self.early_exit > 0.0 && self.early_exit <= 1.0) {
            return Err(Error::BadEarlyExit(self.early_exit));
        }
        if self.variables.required() > MAX_VARIABLES {
            return Err(Error::BadVariableIndex(
                self.variables.required() - 1,
                MAX_VARIABLES - 1,
            ));
        }
        if let Some(o) = &self.opaque {
            let (w, h) = (self.camera.width, self.camera.height);
            if o.width() != w as usize || o.height() != h as usize {
                return Err(Error::BadOpaqueImage(o.width(), o.height(), w, h));
            }
        }
        Ok(())
    }

    /// Builds the per-ray compositing function for this configuration
    pub fn ray_function(&self) -> RayFunction<'_> {
        RayFunction {
            map: &self.opacity,
            variables: self.variables,
            order: self.order,
            lighting: self.lighting,
            early_exit: self.early_exit,
            background: self.background,
            opaque: self.opaque.as_ref(),
        }
    }
}
