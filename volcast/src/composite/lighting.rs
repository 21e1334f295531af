//! Shading models for lit volume rendering
use nalgebra::Vector3;

/// Direction from the scene toward the viewer
///
/// The camera looks down `+Z` in normalized space, so the viewer is at `-Z`.
const VIEW: Vector3<f32> = Vector3::new(0.0, 0.0, -1.0);

/// Lighting applied to each sample's color before compositing
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum LightingModel {
    /// Colors come straight from the transfer function
    #[default]
    Unlit,
    /// Two-sided Blinn-Phong shading, using the field gradient as a normal
    Phong {
        /// Ambient coefficient
        ambient: f32,
        /// Diffuse coefficient
        diffuse: f32,
        /// Specular coefficient
        specular: f32,
        /// Specular exponent
        shininess: f32,
        /// Direction from the scene toward the light, in normalized space
        direction: Vector3<f32>,
    },
}

impl LightingModel {
    /// Builds a headlight (i.e. a light at the viewer) with typical
    /// coefficients
    pub fn headlight() -> Self {
        LightingModel::Phong {
            ambient: 0.3,
            diffuse: 0.7,
            specular: 0.2,
            shininess: 16.0,
            direction: VIEW,
        }
    }

    /// Checks whether this model needs per-sample gradients
    pub fn needs_gradients(&self) -> bool {
        !matches!(self, LightingModel::Unlit)
    }

    /// Shades an RGB color, given the field gradient at the sample
    ///
    /// Samples with a zero (or non-finite) gradient have no meaningful normal,
    /// so their color is returned unchanged.
    pub fn shade(&self, rgb: [f32; 3], gradient: &Vector3<f32>) -> [f32; 3] {
        let LightingModel::Phong {
            ambient,
            diffuse,
            specular,
            shininess,
            direction,
        } = *self
        else {
            return rgb;
        };
        let len = gradient.norm();
        if !(len > f32::EPSILON && len.is_finite()) {
            return rgb;
        }
        let n = gradient / len;
        let Some(light) = direction.try_normalize(f32::EPSILON) else {
            return rgb;
        };
        let half = (light + VIEW)
            .try_normalize(f32::EPSILON)
            .unwrap_or(light);

        // Two-sided: gradients point either way across a boundary
        let d = n.dot(&light).abs();
        let s = n.dot(&half).abs().powf(shininess);
        let k = ambient + diffuse * d;
        rgb.map(|c| (c * k + specular * s).clamp(0.0, 1.0))
    }
}
