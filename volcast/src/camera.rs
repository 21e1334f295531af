//! Camera description and the world-to-normalized-cube transform
use crate::{Error, cell::Cell, screen::Screen};
use nalgebra::{Matrix4, Point3, Unit, Vector3};

/// Camera and sampling description
///
/// A world-space point `p` is transformed by `world_to_camera` (as a
/// homogeneous `[p, 1]`, then divided by `w`).  The resulting `x` and `y`
/// should lie in `[-1, 1]` to be visible, and `z` is remapped from
/// `[near, far]` into `[-1, 1]`, with `-1` closest to the viewer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    /// Homogeneous world-to-camera transform
    pub world_to_camera: Matrix4<f32>,
    /// Image width, in pixels
    pub width: u32,
    /// Image height, in pixels
    pub height: u32,
    /// Camera-space depth which maps to the front of the cube
    pub near: f32,
    /// Camera-space depth which maps to the back of the cube
    pub far: f32,
    /// Number of depth bins along each ray
    pub samples_per_ray: u32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            world_to_camera: Matrix4::identity(),
            width: 256,
            height: 256,
            near: -1.0,
            far: 1.0,
            samples_per_ray: 256,
        }
    }
}

impl Camera {
    /// Builds an orthographic transform looking at `center`
    ///
    /// The camera is first rotated by `yaw` (about Z) and then by `pitch`
    /// (about X); a sphere of radius `scale` around `center` then fits within
    /// the normalized cube, given the default `near` and `far` planes.
    pub fn orbit(
        center: Vector3<f32>,
        scale: f32,
        yaw: f32,
        pitch: f32,
    ) -> Matrix4<f32> {
        let rot = Matrix4::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0)),
            yaw,
        ) * Matrix4::from_axis_angle(
            &Unit::new_normalize(Vector3::new(1.0, 0.0, 0.0)),
            pitch,
        );
        Matrix4::new_scaling(1.0 / scale)
            * rot.transpose()
            * Matrix4::new_translation(&-center)
    }

    /// Returns the sample grid for this camera
    pub fn screen(&self) -> Screen {
        Screen::new(self.width, self.height, self.samples_per_ray)
    }

    /// Checks resolution, sampling density, and depth range
    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::ZeroResolution(self.width, self.height));
        }
        if self.samples_per_ray == 0 {
            return Err(Error::ZeroSamples);
        }
        let (near, far) = (self.near, self.far);
        if !(near.is_finite() && far.is_finite() && near < far) {
            return Err(Error::BadDepthRange(self.near, self.far));
        }
        Ok(())
    }

    /// Transforms a world-space point into the normalized cube
    ///
    /// Returns `None` if the point is at or behind the camera's eye plane
    /// (`w <= 0`) or doesn't transform to a finite position.
    pub fn to_normalized(&self, p: &Point3<f32>) -> Option<Point3<f32>> {
        let h = self.world_to_camera * p.to_homogeneous();
        if !(h.w > 0.0) {
            return None;
        }
        let q = h.xyz() / h.w;
        let z = 2.0 * (q.z - self.near) / (self.far - self.near) - 1.0;
        let out = Point3::new(q.x, q.y, z);
        if out.iter().all(|v| v.is_finite()) {
            Some(out)
        } else {
            None
        }
    }

    /// Transforms every vertex of a cell into the normalized cube
    ///
    /// Returns `None` if any vertex can't be transformed, in which case the
    /// cell should be culled.
    pub fn transform_cell(&self, cell: &Cell) -> Option<Cell> {
        cell.map_points(|p| self.to_normalized(p))
    }
}
