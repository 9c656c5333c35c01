//! Planar primitives shared by the aligner, the footprint model and the backends.

use geo::{BoundingRect, Coord, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel coordinates this close to an integer are treated as lying on the pixel edge.
pub const PIXEL_SNAP_TOLERANCE: f64 = 1e-6;

/// Axis-aligned bounds in some coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounds of a set of coordinates. `None` when the iterator is empty.
    pub fn from_coords<I: IntoIterator<Item = Coord<f64>>>(coords: I) -> Option<Self> {
        coords.into_iter().fold(None, |acc, c| {
            Some(match acc {
                None => Extent::new(c.x, c.y, c.x, c.y),
                Some(e) => Extent::new(
                    e.min_x.min(c.x),
                    e.min_y.min(c.y),
                    e.max_x.max(c.x),
                    e.max_y.max(c.y),
                ),
            })
        })
    }

    /// Union of the bounding rectangles of a set of polygons.
    pub fn from_polygons<'a, I: IntoIterator<Item = &'a Polygon<f64>>>(polygons: I) -> Option<Self> {
        polygons
            .into_iter()
            .filter_map(|p| p.bounding_rect())
            .map(|r| Extent::new(r.min().x, r.min().y, r.max().x, r.max().y))
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow every side by `amount`.
    pub fn padded(&self, amount: f64) -> Extent {
        Extent::new(
            self.min_x - amount,
            self.min_y - amount,
            self.max_x + amount,
            self.max_y + amount,
        )
    }

    /// Corners in the order lower-left, lower-right, upper-right, upper-left.
    pub fn corners(&self) -> [Coord<f64>; 4] {
        [
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
            Coord { x: self.min_x, y: self.max_y },
        ]
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Rejects non-finite values and inverted bounds. Zero width or height is allowed.
    pub fn validate(&self) -> Result<()> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(Error::Geometry(format!("Non-finite extent {self:?}")));
        }
        if self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(Error::Geometry(format!("Inverted extent {self:?}")));
        }
        Ok(())
    }
}

/// GDAL-ordered affine transform from pixel (col, row) to geographic (x, y):
///
/// x = gt[0] + col * gt[1] + row * gt[2]
/// y = gt[3] + col * gt[4] + row * gt[5]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    gt: [f64; 6],
}

impl Affine {
    pub const fn from_gdal(gt: [f64; 6]) -> Self {
        Self { gt }
    }

    /// North-up transform with square pixels.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self::from_gdal([origin_x, res_x, 0.0, origin_y, 0.0, -res_y])
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        self.gt
    }

    pub fn pixel_width(&self) -> f64 {
        self.gt[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.gt[5]
    }

    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        Coord {
            x: self.gt[0] + col * self.gt[1] + row * self.gt[2],
            y: self.gt[3] + col * self.gt[4] + row * self.gt[5],
        }
    }

    /// Same linear part, origin moved to pixel (col, row) of this transform.
    pub fn shifted(&self, col: f64, row: f64) -> Affine {
        let origin = self.apply(col, row);
        let mut gt = self.gt;
        gt[0] = origin.x;
        gt[3] = origin.y;
        Affine { gt }
    }

    pub fn inverse(&self) -> Result<Affine> {
        let [c, a, b, f, d, e] = self.gt;
        let det = a * e - b * d;
        if det == 0.0 || !det.is_finite() {
            return Err(Error::Geometry(format!(
                "Affine transform {:?} is not invertible",
                self.gt
            )));
        }

        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;

        Ok(Affine {
            gt: [-c * ia - f * ib, ia, ib, -c * id - f * ie, id, ie],
        })
    }
}

/// Geometry type of a vector layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryKind {
    /// Point layers get their extent padded so data points land on pixel centers.
    pub fn is_point_like(&self) -> bool {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => true,
            GeometryKind::LineString
            | GeometryKind::MultiLineString
            | GeometryKind::Polygon
            | GeometryKind::MultiPolygon => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Shape {
    pub fn to_wkt(&self) -> String {
        match self {
            Shape::Point(c) => format!("POINT ({} {})", c.x, c.y),
            Shape::Polygon(p) => format!("POLYGON {}", polygon_body(p)),
            Shape::MultiPolygon(mp) => {
                if mp.0.is_empty() {
                    return "MULTIPOLYGON EMPTY".to_string();
                }
                let parts: Vec<String> = mp.0.iter().map(polygon_body).collect();
                format!("MULTIPOLYGON ({})", parts.join(", "))
            }
        }
    }
}

fn polygon_body(polygon: &Polygon<f64>) -> String {
    let ring = |ls: &geo::LineString<f64>| {
        let coords: Vec<String> = ls.coords().map(|c| format!("{} {}", c.x, c.y)).collect();
        format!("({})", coords.join(", "))
    };

    let mut rings = vec![ring(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring));
    format!("({})", rings.join(", "))
}
