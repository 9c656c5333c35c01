use std::f64::consts::FRAC_PI_2;

use geo::{Area, Coord, LineString, Polygon};

use crate::error::{Error, Result};
use crate::geometry::Extent;

/// Segments per quarter circle when approximating a footprint disc.
pub const QUADRANT_SEGMENTS: usize = 8;

/// Ground footprint of one shot: a disc of fixed diameter around its projected position.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    /// Index of the owning shot.
    pub fid: usize,
    pub center: Coord<f64>,
    pub radius: f64,
    polygon: Polygon<f64>,
}

impl Footprint {
    pub fn new(fid: usize, center: Coord<f64>, diameter: f64) -> Result<Self> {
        if diameter <= 0.0 || !diameter.is_finite() {
            return Err(Error::Geometry(format!(
                "Shot diameter must be positive, got {diameter}"
            )));
        }
        if !center.x.is_finite() || !center.y.is_finite() {
            return Err(Error::Geometry(format!(
                "Shot {fid} has a non-finite position ({}, {})",
                center.x, center.y
            )));
        }

        let radius = diameter * 0.5;
        Ok(Self {
            fid,
            center,
            radius,
            polygon: disc(center, radius),
        })
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Area of the polygonal disc, which is what segments are cut from.
    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    pub fn extent(&self) -> Extent {
        Extent::new(
            self.center.x - self.radius,
            self.center.y - self.radius,
            self.center.x + self.radius,
            self.center.y + self.radius,
        )
    }
}

/// Regular polygon inscribed in the circle, counter-clockwise, starting due east.
fn disc(center: Coord<f64>, radius: f64) -> Polygon<f64> {
    let n = QUADRANT_SEGMENTS * 4;
    let step = FRAC_PI_2 / QUADRANT_SEGMENTS as f64;

    let mut ring: Vec<Coord<f64>> = (0..n)
        .map(|i| {
            let (sin, cos) = (step * i as f64).sin_cos();
            Coord {
                x: center.x + radius * cos,
                y: center.y + radius * sin,
            }
        })
        .collect();
    ring.push(ring[0]);

    Polygon::new(LineString::from(ring), vec![])
}
