//! Capabilities the pipeline needs from a geospatial engine.

use std::path::Path;

use crate::aggregate::CoverageMask;
use crate::align::{CoordTransformer, ReferenceGrid};
use crate::artifact::ArtifactStore;
use crate::error::Result;
use crate::geometry::{GeometryKind, Shape};
use crate::table::{Column, FieldValue};

/// Geographic CRS of raw LVIS shots.
pub const WGS84: &str = "EPSG:4326";

/// In-memory vector layer, handed to a backend for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayer {
    pub name: String,
    pub crs: String,
    pub geometry: GeometryKind,
    pub fields: Vec<Column>,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Shape,
    pub values: Vec<FieldValue>,
}

pub trait GeoBackend: ArtifactStore {
    /// Transformer between two CRS definitions (EPSG code, WKT, PROJ string...).
    fn transformer(&self, from: &str, to: &str) -> Result<Box<dyn CoordTransformer>>;

    fn is_projected(&self, crs: &str) -> Result<bool>;

    fn read_template(&self, path: &Path) -> Result<ReferenceGrid>;

    fn write_vector(&self, path: &Path, layer: &VectorLayer) -> Result<()>;

    /// Single-band byte raster, 0 marks nodata.
    fn write_mask(&self, path: &Path, mask: &CoverageMask) -> Result<()>;
}
