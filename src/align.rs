//! Pixel-aligned output grids.
//!
//! A grid is derived either from an explicit resolution, or by snapping the source
//! extent onto the pixel lattice of a reference raster.

use geo::{Coord, LineString, Polygon};
use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::geometry::{Affine, Extent, GeometryKind};
use crate::util::{get_raster_size, snap};

/// Converts coordinates in place from one CRS to another.
pub trait CoordTransformer {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()>;
}

/// Used when source and target CRS are the same.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl CoordTransformer for Identity {
    fn transform(&self, _xs: &mut [f64], _ys: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

/// Affine transform and CRS of an existing raster whose pixels the output must line up with.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGrid {
    pub transform: Affine,
    pub crs: String,
}

pub enum AlignMode<'a> {
    Resolution {
        resolution: f64,
        crs: Option<&'a str>,
    },
    Template {
        reference: &'a ReferenceGrid,
        transformer: &'a dyn CoordTransformer,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    pub transform: Affine,
    pub width: usize,
    pub height: usize,
    pub crs: String,
}

impl Grid {
    /// Absolute pixel size along x and y.
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.transform.pixel_width().abs(),
            self.transform.pixel_height().abs(),
        )
    }

    /// Number of cells, saturating at `usize::MAX`. See `checked_len`.
    pub fn len(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    pub fn checked_len(&self) -> Result<usize> {
        self.width.checked_mul(self.height).ok_or_else(|| {
            Error::Geometry(format!(
                "Grid of {}x{} cells is too large",
                self.width, self.height
            ))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geographic bounds of the whole grid.
    pub fn extent(&self) -> Extent {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .map(|(c, r)| self.transform.apply(c, r));
        // Corners always exist, the fallback is unreachable.
        Extent::from_coords(corners).unwrap_or(Extent::new(0.0, 0.0, 0.0, 0.0))
    }

    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        self.transform.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    pub fn cell_polygon(&self, row: usize, col: usize) -> Polygon<f64> {
        let (c, r) = (col as f64, row as f64);
        let ring: Vec<Coord<f64>> = [(c, r), (c + 1.0, r), (c + 1.0, r + 1.0), (c, r + 1.0), (c, r)]
            .into_iter()
            .map(|(c, r)| self.transform.apply(c, r))
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Rows and columns (half-open ranges) of the cells whose interior may overlap `extent`,
    /// clamped to the grid.
    pub fn cell_window(&self, extent: &Extent) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let inv = self.transform.inverse()?;
        let (min, max) = pixel_bounds(&inv, &extent.corners());

        let clamp = |v: f64, upper: usize| v.max(0.0).min(upper as f64) as usize;
        let cols = clamp(snap(min.x).floor(), self.width)..clamp(snap(max.x).ceil(), self.width);
        let rows = clamp(snap(min.y).floor(), self.height)..clamp(snap(max.y).ceil(), self.height);
        Ok((rows, cols))
    }
}

/// Build the output grid for a source extent.
///
/// In resolution mode `extent` is already in the target CRS. Point layers are padded by half a
/// pixel so that the outermost points sit on pixel centers rather than pixel edges.
///
/// In template mode the extent is reprojected into the reference CRS, snapped outwards to whole
/// reference pixels and mapped back through the reference transform.
pub fn align(extent: &Extent, geometry: GeometryKind, mode: AlignMode<'_>) -> Result<Grid> {
    extent.validate()?;

    match mode {
        AlignMode::Resolution { resolution, crs } => {
            let crs = crs.ok_or_else(|| {
                Error::Argument(
                    "An output spatial reference is required together with a resolution".into(),
                )
            })?;
            if resolution <= 0.0 || !resolution.is_finite() {
                return Err(Error::Geometry(format!(
                    "Resolution must be positive, got {resolution}"
                )));
            }

            let extent = if geometry.is_point_like() {
                extent.padded(resolution * 0.5)
            } else {
                *extent
            };
            let (width, height) = get_raster_size(&extent, resolution);
            debug!("Resolution grid {width}x{height} at {resolution} from {extent:?}");

            let grid = Grid {
                transform: Affine::north_up(extent.min_x, extent.max_y, resolution, resolution),
                width,
                height,
                crs: crs.to_string(),
            };
            grid.checked_len()?;
            Ok(grid)
        }
        AlignMode::Template {
            reference,
            transformer,
        } => {
            let inv = reference.transform.inverse()?;

            let corners = extent.corners();
            let mut xs: Vec<f64> = corners.iter().map(|c| c.x).collect();
            let mut ys: Vec<f64> = corners.iter().map(|c| c.y).collect();
            transformer.transform(&mut xs, &mut ys)?;

            let projected: Vec<Coord<f64>> = xs
                .into_iter()
                .zip(ys)
                .map(|(x, y)| Coord { x, y })
                .collect();
            if projected.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(Error::Geometry(
                    "Source extent could not be transformed into the template CRS".into(),
                ));
            }

            let (min, max) = pixel_bounds(&inv, &projected);
            let col0 = snap(min.x).floor();
            let row0 = snap(min.y).floor();
            // A zero-sized extent on a pixel edge still needs one pixel.
            let col1 = snap(max.x).ceil().max(col0 + 1.0);
            let row1 = snap(max.y).ceil().max(row0 + 1.0);

            let grid = Grid {
                transform: reference.transform.shifted(col0, row0),
                width: (col1 - col0) as usize,
                height: (row1 - row0) as usize,
                crs: reference.crs.clone(),
            };
            debug!(
                "Template grid {}x{} at pixel offset ({col0}, {row0})",
                grid.width, grid.height
            );
            grid.checked_len()?;
            Ok(grid)
        }
    }
}

/// Min/max pixel-space coordinates of geographic points.
fn pixel_bounds(inv: &Affine, coords: &[Coord<f64>]) -> (Coord<f64>, Coord<f64>) {
    coords.iter().map(|c| inv.apply(c.x, c.y)).fold(
        (
            Coord { x: f64::MAX, y: f64::MAX },
            Coord { x: f64::MIN, y: f64::MIN },
        ),
        |(min, max), p| {
            (
                Coord { x: min.x.min(p.x), y: min.y.min(p.y) },
                Coord { x: max.x.max(p.x), y: max.y.max(p.y) },
            )
        },
    )
}
