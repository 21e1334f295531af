//! Module containing the volcast universal error type
use crate::cell::CellKind;
use thiserror::Error;

/// Universal error type for volcast
#[derive(Error, Debug)]
pub enum Error {
    /// Image width or height is zero
    #[error("screen resolution must be non-zero (got {0} x {1})")]
    ZeroResolution(u32, u32),

    /// Samples per ray is zero
    #[error("samples per ray must be non-zero")]
    ZeroSamples,

    /// Near and far planes are out of order or not finite
    #[error("bad depth range: near ({0}) must be less than far ({1})")]
    BadDepthRange(f32, f32),

    /// Opacity map value range is empty or not finite
    #[error("bad value range: min ({0}) must be less than max ({1})")]
    BadValueRange(f32, f32),

    /// Opacity map has no control points
    #[error("transfer function must have at least one control point")]
    EmptyTransferFunction,

    /// Opacity map control points are not in non-decreasing value order
    #[error("control point {0} ({1}) is less than its predecessor ({2})")]
    NonMonotonicControlPoints(usize, f32, f32),

    /// Opacity map resolution is too small to interpolate
    #[error("opacity table must have at least 2 entries (got {0})")]
    BadTableSize(usize),

    /// Early-exit opacity threshold is outside of `(0, 1]`
    #[error("early exit threshold ({0}) must be in (0, 1]")]
    BadEarlyExit(f32),

    /// Variable index exceeds the number of per-vertex variables
    #[error("variable index ({0}) exceeds max variable index ({1})")]
    BadVariableIndex(usize, usize),

    /// Too many variables per vertex
    #[error("too many variables per vertex ({0}); the limit is {1}")]
    TooManyVariables(usize, usize),

    /// Vertices in a cell or mesh carry different variable counts
    #[error("vertex {0} has {1} variables, expected {2}")]
    VariableCountMismatch(usize, usize, usize),

    /// A cell was built with the wrong number of vertices for its topology
    #[error("{0} requires {1} vertices (got {2})")]
    WrongVertexCount(CellKind, usize, usize),

    /// Mesh connectivity refers to a point that does not exist
    #[error("cell refers to point {0}, but the mesh only has {1} points")]
    BadPointIndex(usize, usize),

    /// A mesh has a different number of field entries and points
    #[error("mesh has {0} field entries for {1} points")]
    FieldCountMismatch(usize, usize),

    /// Color and depth planes of an opaque image have different sizes
    #[error("opaque color plane is {0} x {1}, but depth plane is {2} x {3}")]
    OpaquePlaneMismatch(usize, usize, usize, usize),

    /// Opaque backdrop image does not match the screen resolution
    #[error("opaque image is {0} x {1}, expected {2} x {3}")]
    BadOpaqueImage(usize, usize, u32, u32),

    /// An allocation for a render buffer failed
    #[error("could not allocate {bytes} bytes for {what}")]
    OutOfMemory {
        /// Name of the buffer being allocated
        what: &'static str,
        /// Requested size in bytes
        bytes: usize,
    },

    /// A serialized cell record failed validation
    #[error("malformed cell record: {0}")]
    MalformedCell(String),

    /// A cell message or image strip could not be framed
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Binary codec error; see inner code for details
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Rendering was cancelled through a [`CancelToken`](crate::CancelToken)
    #[error("render was cancelled")]
    Cancelled,

    /// The message-passing layer lost a peer
    #[error("communication error: {0}")]
    Comm(String),
}
