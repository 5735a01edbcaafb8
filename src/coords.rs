//! Mapping between rendered (display) pixels and sensor pixels.
//!
//! Shapes are drawn against the snapshot as the operator sees it, but the edge
//! device evaluates them against the native sensor resolution. The rendered
//! size is only known once the image has finished loading, so the mapper is
//! built from an [`ImageGeometry`] that the session records at load time.

use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// A point in display space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// A point in sensor space, serialized as `[x, y]`.
pub type SensorPoint = [i64; 2];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_drawable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Clamp a point into `[0, width] x [0, height]`.
    pub fn clamp(&self, p: Point) -> Point {
        Point {
            x: p.x.clamp(0.0, self.width),
            y: p.y.clamp(0.0, self.height),
        }
    }
}

/// Natural (sensor) and rendered dimensions of the loaded snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageGeometry {
    pub natural: Size,
    pub rendered: Size,
}

impl ImageGeometry {
    pub fn new(natural: Size, rendered: Size) -> Result<Self, ConsoleError> {
        if !natural.is_drawable() || !rendered.is_drawable() {
            return Err(ConsoleError::ImageNotLoaded);
        }
        Ok(Self { natural, rendered })
    }

    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper {
            scale_x: self.natural.width / self.rendered.width,
            scale_y: self.natural.height / self.rendered.height,
        }
    }
}

/// Stateless display -> sensor transform: `(round(x*Wn/Wd), round(y*Hn/Hd))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateMapper {
    pub fn to_sensor(&self, p: Point) -> SensorPoint {
        [
            (p.x * self.scale_x).round() as i64,
            (p.y * self.scale_y).round() as i64,
        ]
    }
}

/// Convenience for one-off conversions; fails when the image is not loaded.
pub fn map_point(geometry: Option<&ImageGeometry>, p: Point) -> Result<SensorPoint, ConsoleError> {
    let geometry = geometry.ok_or(ConsoleError::ImageNotLoaded)?;
    Ok(geometry.mapper().to_sensor(p))
}
