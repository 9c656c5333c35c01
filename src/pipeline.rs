//! Gridding pipeline: shot table in, one aggregated point per covered grid cell out.
//!
//! Stages run strictly in order. Each one reads earlier products and yields exactly one new
//! product, which is written to disk before the next stage starts. The first failure aborts
//! the run; intermediate files written up to that point are left where they are and listed
//! in the returned error. After a successful run the intermediates are removed unless the
//! caller asked to keep them.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use geo::Coord;

use crate::aggregate::{self, Aggregate, Cell, CoverageMask, Function, Segment};
use crate::align::{self, AlignMode, Grid, ReferenceGrid};
use crate::artifact::{Artifact, ArtifactKind, Intermediates, StageKind};
use crate::backend::{Feature, GeoBackend, VectorLayer, WGS84};
use crate::error::{Error, Result};
use crate::footprint::Footprint;
use crate::geometry::{Extent, GeometryKind, Shape};
use crate::report::Reporter;
use crate::table::{self, Column, ColumnType, FieldValue};

pub const EASTING_FIELD: &str = "geasting";
pub const NORTHING_FIELD: &str = "gnorthing";
/// Parent shot of a segment. Not `fid`, which GeoPackage reserves for the feature id.
pub const SHOT_ID_FIELD: &str = "shot_fid";
pub const DEFAULT_SHOT_DIAMETER: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub enum GridMode {
    Resolution { resolution: f64, out_srs: String },
    Template { path: PathBuf },
}

impl GridMode {
    /// Resolution and template are mutually exclusive, and a resolution needs an output CRS.
    /// An output CRS given alongside a template is ignored.
    pub fn from_options(
        resolution: Option<f64>,
        template: Option<PathBuf>,
        out_srs: Option<String>,
        reporter: &mut Reporter,
    ) -> Result<Self> {
        match (resolution, template, out_srs) {
            (Some(_), Some(_), _) => Err(Error::Argument(
                "A resolution and a template raster cannot be used together".into(),
            )),
            (None, None, _) => Err(Error::Argument(
                "Either a resolution or a template raster is required".into(),
            )),
            (Some(_), None, None) => Err(Error::Argument(
                "When designating a grid resolution rather than a template raster, an output spatial reference must be given".into(),
            )),
            (Some(resolution), None, Some(out_srs)) => Ok(GridMode::Resolution { resolution, out_srs }),
            (None, Some(path), out_srs) => {
                if out_srs.is_some() {
                    reporter.warn(
                        "The output spatial reference is ignored, the template raster's is used",
                    );
                }
                Ok(GridMode::Template { path })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: GridMode,
    pub shot_diameter: f64,
    pub column_types: Option<Vec<ColumnType>>,
    pub columns: Vec<String>,
    pub function: Function,
    pub lon_column: String,
    pub lat_column: String,
    pub dir_intermediate: Option<PathBuf>,
    pub keep_intermediate: bool,
}

impl GridConfig {
    pub fn new(input: PathBuf, output: PathBuf, mode: GridMode, columns: Vec<String>) -> Self {
        Self {
            input,
            output,
            mode,
            shot_diameter: DEFAULT_SHOT_DIAMETER,
            column_types: None,
            columns,
            function: Function::Mean,
            lon_column: "GLON".into(),
            lat_column: "GLAT".into(),
            dir_intermediate: None,
            keep_intermediate: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shot_diameter <= 0.0 || !self.shot_diameter.is_finite() {
            return Err(Error::Argument(format!(
                "Shot diameter must be positive, got {}",
                self.shot_diameter
            )));
        }
        if let GridMode::Resolution { resolution, .. } = self.mode {
            if resolution <= 0.0 || !resolution.is_finite() {
                return Err(Error::Argument(format!(
                    "Resolution must be positive, got {resolution}"
                )));
            }
        }
        if self.columns.is_empty() {
            return Err(Error::Argument("At least one column to grid is required".into()));
        }
        if self.input == self.output {
            return Err(Error::Argument("Input and output are the same file".into()));
        }
        Ok(())
    }

    /// Input file name without its last extension.
    pub fn stem(&self) -> Result<String> {
        self.input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Argument(format!("Cannot derive a name from {}", self.input.display()))
            })
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        match &self.dir_intermediate {
            Some(dir) => dir.clone(),
            None => match self.output.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }
}

/// Output grid definition, resolved before any stage runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Resolution { resolution: f64, crs: String },
    Template { reference: ReferenceGrid },
}

impl Target {
    pub fn resolve(config: &GridConfig, backend: &dyn GeoBackend) -> Result<Self> {
        match &config.mode {
            GridMode::Resolution { resolution, out_srs } => {
                if !backend.is_projected(out_srs)? {
                    return Err(Error::Argument(format!(
                        "'{out_srs}' is not a projected spatial reference"
                    )));
                }
                Ok(Target::Resolution {
                    resolution: *resolution,
                    crs: out_srs.clone(),
                })
            }
            GridMode::Template { path } => Ok(Target::Template {
                reference: backend.read_template(path)?,
            }),
        }
    }

    pub fn crs(&self) -> &str {
        match self {
            Target::Resolution { crs, .. } => crs,
            Target::Template { reference } => &reference.crs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    pub fid: usize,
    pub position: Coord<f64>,
    pub attributes: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotLayer {
    pub crs: String,
    pub columns: Vec<Column>,
    pub shots: Vec<Shot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FootprintLayer {
    pub crs: String,
    pub columns: Vec<Column>,
    pub footprints: Vec<Footprint>,
    /// Attributes of `footprints[i]`'s shot.
    pub attributes: Vec<Vec<FieldValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellLayer {
    pub grid: Grid,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentLayer {
    pub crs: String,
    pub columns: Vec<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateLayer {
    pub crs: String,
    pub resolution: (f64, f64),
    pub columns: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

/// Output of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Product {
    Shots(ShotLayer),
    Footprints(FootprintLayer),
    Coverage(CoverageMask),
    Cells(CellLayer),
    Segments(SegmentLayer),
    Aggregates(AggregateLayer),
}

impl Product {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Product::Coverage(_) => ArtifactKind::Raster,
            Product::Shots(_)
            | Product::Footprints(_)
            | Product::Cells(_)
            | Product::Segments(_)
            | Product::Aggregates(_) => ArtifactKind::Vector,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Product::Shots(_) => "shots",
            Product::Footprints(_) => "footprints",
            Product::Coverage(_) => "coverage",
            Product::Cells(_) => "cells",
            Product::Segments(_) => "segments",
            Product::Aggregates(_) => "aggregates",
        }
    }

    pub fn persist(&self, backend: &dyn GeoBackend, path: &Path) -> Result<()> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(self.name())
            .to_string();

        if let Product::Coverage(mask) = self {
            return backend.write_mask(path, mask);
        }
        let layer = self.to_layer(name).ok_or_else(|| {
            Error::ShouldntHappen(format!("No vector form for {}", self.name()))
        })?;
        backend.write_vector(path, &layer)
    }

    /// Vector form of the product, `None` for the coverage raster.
    pub fn to_layer(&self, name: String) -> Option<VectorLayer> {
        let layer = match self {
            Product::Coverage(_) => return None,
            Product::Shots(l) => VectorLayer {
                name,
                crs: l.crs.clone(),
                geometry: GeometryKind::Point,
                fields: l.columns.clone(),
                features: l
                    .shots
                    .iter()
                    .map(|s| Feature {
                        geometry: Shape::Point(s.position),
                        values: s.attributes.clone(),
                    })
                    .collect(),
            },
            Product::Footprints(l) => VectorLayer {
                name,
                crs: l.crs.clone(),
                geometry: GeometryKind::Polygon,
                fields: l.columns.clone(),
                features: l
                    .footprints
                    .iter()
                    .zip(&l.attributes)
                    .map(|(f, values)| Feature {
                        geometry: Shape::Polygon(f.polygon().clone()),
                        values: values.clone(),
                    })
                    .collect(),
            },
            Product::Cells(l) => VectorLayer {
                name,
                crs: l.grid.crs.clone(),
                geometry: GeometryKind::Polygon,
                fields: vec![
                    Column::new("row", ColumnType::Integer),
                    Column::new("col", ColumnType::Integer),
                ],
                features: l
                    .cells
                    .iter()
                    .map(|c| Feature {
                        geometry: Shape::Polygon(c.polygon.clone()),
                        values: vec![
                            FieldValue::Integer(c.row as i64),
                            FieldValue::Integer(c.col as i64),
                        ],
                    })
                    .collect(),
            },
            Product::Segments(l) => {
                let mut fields = vec![
                    Column::new(SHOT_ID_FIELD, ColumnType::Integer),
                    Column::new("row", ColumnType::Integer),
                    Column::new("col", ColumnType::Integer),
                    Column::new("area", ColumnType::Real),
                ];
                fields.extend(l.columns.iter().map(|c| Column::new(c.as_str(), ColumnType::Real)));

                VectorLayer {
                    name,
                    crs: l.crs.clone(),
                    geometry: GeometryKind::MultiPolygon,
                    fields,
                    features: l
                        .segments
                        .iter()
                        .map(|s| {
                            let mut values = vec![
                                FieldValue::Integer(s.fid as i64),
                                FieldValue::Integer(s.row as i64),
                                FieldValue::Integer(s.col as i64),
                                FieldValue::Real(s.area),
                            ];
                            values.extend(s.values.iter().map(|v| FieldValue::Real(*v)));
                            Feature {
                                geometry: Shape::MultiPolygon(s.geometry.clone()),
                                values,
                            }
                        })
                        .collect(),
                }
            }
            Product::Aggregates(l) => {
                let mut fields = vec![
                    Column::new("row", ColumnType::Integer),
                    Column::new("col", ColumnType::Integer),
                    Column::new(EASTING_FIELD, ColumnType::Real),
                    Column::new(NORTHING_FIELD, ColumnType::Real),
                    Column::new("res_x", ColumnType::Real),
                    Column::new("res_y", ColumnType::Real),
                    Column::new("n_segments", ColumnType::Integer),
                ];
                fields.extend(l.columns.iter().map(|c| Column::new(c.as_str(), ColumnType::Real)));

                VectorLayer {
                    name,
                    crs: l.crs.clone(),
                    geometry: GeometryKind::Point,
                    fields,
                    features: l
                        .aggregates
                        .iter()
                        .map(|a| {
                            let mut values = vec![
                                FieldValue::Integer(a.row as i64),
                                FieldValue::Integer(a.col as i64),
                                FieldValue::Real(a.x),
                                FieldValue::Real(a.y),
                                FieldValue::Real(l.resolution.0),
                                FieldValue::Real(l.resolution.1),
                                FieldValue::Integer(a.segments as i64),
                            ];
                            values.extend(a.values.iter().map(|v| FieldValue::Real(*v)));
                            Feature {
                                geometry: Shape::Point(Coord { x: a.x, y: a.y }),
                                values,
                            }
                        })
                        .collect(),
                }
            }
        };

        Some(layer)
    }
}

/// Products of the completed stages of a run.
#[derive(Debug, Default)]
pub struct Products {
    by_stage: BTreeMap<StageKind, Product>,
}

impl Products {
    pub fn contains(&self, stage: StageKind) -> bool {
        self.by_stage.contains_key(&stage)
    }

    pub fn get(&self, stage: StageKind) -> Result<&Product> {
        self.by_stage.get(&stage).ok_or_else(|| {
            Error::ShouldntHappen(format!("Output of stage '{stage}' is not available"))
        })
    }

    fn insert(&mut self, stage: StageKind, product: Product) {
        self.by_stage.insert(stage, product);
    }

    pub fn take(&mut self, stage: StageKind) -> Option<Product> {
        self.by_stage.remove(&stage)
    }

    pub fn shots(&self, stage: StageKind) -> Result<&ShotLayer> {
        match self.get(stage)? {
            Product::Shots(l) => Ok(l),
            other => Err(mismatch(stage, other)),
        }
    }

    pub fn footprints(&self, stage: StageKind) -> Result<&FootprintLayer> {
        match self.get(stage)? {
            Product::Footprints(l) => Ok(l),
            other => Err(mismatch(stage, other)),
        }
    }

    pub fn coverage(&self, stage: StageKind) -> Result<&CoverageMask> {
        match self.get(stage)? {
            Product::Coverage(m) => Ok(m),
            other => Err(mismatch(stage, other)),
        }
    }

    pub fn cells(&self, stage: StageKind) -> Result<&CellLayer> {
        match self.get(stage)? {
            Product::Cells(l) => Ok(l),
            other => Err(mismatch(stage, other)),
        }
    }

    pub fn segments(&self, stage: StageKind) -> Result<&SegmentLayer> {
        match self.get(stage)? {
            Product::Segments(l) => Ok(l),
            other => Err(mismatch(stage, other)),
        }
    }
}

fn mismatch(stage: StageKind, product: &Product) -> Error {
    Error::ShouldntHappen(format!(
        "Stage '{stage}' produced {} where another product was expected",
        product.name()
    ))
}

pub struct StageContext<'a> {
    pub config: &'a GridConfig,
    pub target: &'a Target,
    pub backend: &'a dyn GeoBackend,
    pub products: &'a Products,
    pub reporter: &'a mut Reporter,
}

pub trait Stage {
    fn kind(&self) -> StageKind;

    /// Stages whose products this one reads.
    fn consumes(&self) -> &'static [StageKind];

    fn output(&self) -> ArtifactKind;

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product>;
}

fn numeric(value: &FieldValue, column: &str, fid: usize) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        Error::Column(format!("Shot {fid} has a non-numeric value in column '{column}'"))
    })
}

/// LVIS longitudes run 0..360 east.
fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

pub struct Vectorize;

impl Stage for Vectorize {
    fn kind(&self) -> StageKind {
        StageKind::Vectorize
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let config = ctx.config;
        let file = File::open(&config.input)?;
        let table = table::read_shot_table(BufReader::new(file), config.column_types.as_deref())?;
        if table.records.is_empty() {
            return Err(Error::Geometry(format!(
                "{} contains no shots",
                config.input.display()
            )));
        }

        let position = table::numeric_columns(
            &table.columns,
            &[config.lon_column.clone(), config.lat_column.clone()],
        )?;
        table::numeric_columns(&table.columns, &config.columns)?;

        let shots = table
            .records
            .into_iter()
            .enumerate()
            .map(|(fid, attributes)| {
                let lon = numeric(&attributes[position[0]], &config.lon_column, fid)?;
                let lat = numeric(&attributes[position[1]], &config.lat_column, fid)?;
                Ok(Shot {
                    fid,
                    position: Coord {
                        x: wrap_longitude(lon),
                        y: lat,
                    },
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ctx.reporter.info(format!("Read {} shots", shots.len()));
        Ok(Product::Shots(ShotLayer {
            crs: WGS84.to_string(),
            columns: table.columns,
            shots,
        }))
    }
}

pub struct Reproject;

impl Stage for Reproject {
    fn kind(&self) -> StageKind {
        StageKind::Reproject
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::Vectorize]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let layer = ctx.products.shots(StageKind::Vectorize)?;
        let crs = ctx.target.crs();
        let transformer = ctx.backend.transformer(&layer.crs, crs)?;

        let mut xs: Vec<f64> = layer.shots.iter().map(|s| s.position.x).collect();
        let mut ys: Vec<f64> = layer.shots.iter().map(|s| s.position.y).collect();
        transformer.transform(&mut xs, &mut ys)?;

        let mut columns = layer.columns.clone();
        columns.push(Column::new(EASTING_FIELD, ColumnType::Real));
        columns.push(Column::new(NORTHING_FIELD, ColumnType::Real));

        let shots = layer
            .shots
            .iter()
            .zip(xs.into_iter().zip(ys))
            .map(|(shot, (x, y))| {
                if !x.is_finite() || !y.is_finite() {
                    return Err(Error::Geometry(format!(
                        "Shot {} could not be projected into {crs}",
                        shot.fid
                    )));
                }
                let mut attributes = shot.attributes.clone();
                attributes.push(FieldValue::Real(x));
                attributes.push(FieldValue::Real(y));
                Ok(Shot {
                    fid: shot.fid,
                    position: Coord { x, y },
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Product::Shots(ShotLayer {
            crs: crs.to_string(),
            columns,
            shots,
        }))
    }
}

pub struct BufferToCircles;

impl Stage for BufferToCircles {
    fn kind(&self) -> StageKind {
        StageKind::BufferToCircles
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::Reproject]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let layer = ctx.products.shots(StageKind::Reproject)?;
        let diameter = ctx.config.shot_diameter;

        let footprints = layer
            .shots
            .iter()
            .map(|s| Footprint::new(s.fid, s.position, diameter))
            .collect::<Result<Vec<_>>>()?;

        Ok(Product::Footprints(FootprintLayer {
            crs: layer.crs.clone(),
            columns: layer.columns.clone(),
            footprints,
            attributes: layer.shots.iter().map(|s| s.attributes.clone()).collect(),
        }))
    }
}

pub struct RasterizeCoverage;

impl Stage for RasterizeCoverage {
    fn kind(&self) -> StageKind {
        StageKind::RasterizeCoverage
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::BufferToCircles]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Raster
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let layer = ctx.products.footprints(StageKind::BufferToCircles)?;
        let extent = Extent::from_polygons(layer.footprints.iter().map(|f| f.polygon()))
            .ok_or_else(|| Error::Geometry("No footprints to rasterize".into()))?;

        let grid = match ctx.target {
            Target::Resolution { resolution, crs } => align::align(
                &extent,
                GeometryKind::Polygon,
                AlignMode::Resolution {
                    resolution: *resolution,
                    crs: Some(crs.as_str()),
                },
            )?,
            Target::Template { reference } => {
                let transformer = ctx.backend.transformer(&layer.crs, &reference.crs)?;
                align::align(
                    &extent,
                    GeometryKind::Polygon,
                    AlignMode::Template {
                        reference,
                        transformer: transformer.as_ref(),
                    },
                )?
            }
        };

        let mask = aggregate::coverage(&grid, &layer.footprints)?;
        if mask.count() == 0 {
            return Err(Error::Geometry("No grid cell is covered by a shot".into()));
        }

        let (rx, ry) = grid.resolution();
        ctx.reporter.info(format!(
            "Grid {}x{} at {rx}x{ry}, {} cells covered",
            grid.width,
            grid.height,
            mask.count()
        ));
        Ok(Product::Coverage(mask))
    }
}

pub struct PolygonizeCoverage;

impl Stage for PolygonizeCoverage {
    fn kind(&self) -> StageKind {
        StageKind::PolygonizeCoverage
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::RasterizeCoverage]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let mask = ctx.products.coverage(StageKind::RasterizeCoverage)?;
        Ok(Product::Cells(CellLayer {
            grid: mask.grid.clone(),
            cells: aggregate::polygonize(mask),
        }))
    }
}

pub struct IntersectSegments;

impl Stage for IntersectSegments {
    fn kind(&self) -> StageKind {
        StageKind::IntersectSegments
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::BufferToCircles, StageKind::PolygonizeCoverage]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let footprints = ctx.products.footprints(StageKind::BufferToCircles)?;
        let cells = ctx.products.cells(StageKind::PolygonizeCoverage)?;
        let columns = &ctx.config.columns;
        let indices = table::numeric_columns(&footprints.columns, columns)?;

        let values = footprints
            .footprints
            .iter()
            .zip(&footprints.attributes)
            .map(|(fp, attributes)| {
                indices
                    .iter()
                    .zip(columns)
                    .map(|(&i, name)| numeric(&attributes[i], name, fp.fid))
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let segments = aggregate::intersect(&cells.grid, &cells.cells, &footprints.footprints, &values)?;
        ctx.reporter.info(format!(
            "{} footprints cut into {} segments",
            footprints.footprints.len(),
            segments.len()
        ));

        Ok(Product::Segments(SegmentLayer {
            crs: footprints.crs.clone(),
            columns: columns.clone(),
            segments,
        }))
    }
}

pub struct AggregateToPoints;

impl Stage for AggregateToPoints {
    fn kind(&self) -> StageKind {
        StageKind::AggregateToPoints
    }

    fn consumes(&self) -> &'static [StageKind] {
        &[StageKind::RasterizeCoverage, StageKind::IntersectSegments]
    }

    fn output(&self) -> ArtifactKind {
        ArtifactKind::Vector
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<Product> {
        let grid = &ctx.products.coverage(StageKind::RasterizeCoverage)?.grid;
        let layer = ctx.products.segments(StageKind::IntersectSegments)?;

        let aggregates = aggregate::aggregate(
            grid,
            &layer.segments,
            layer.columns.len(),
            ctx.config.function,
        )?;
        ctx.reporter
            .info(format!("{} grid cells aggregated", aggregates.len()));

        Ok(Product::Aggregates(AggregateLayer {
            crs: grid.crs.clone(),
            resolution: grid.resolution(),
            columns: layer.columns.clone(),
            aggregates,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub output: PathBuf,
    pub cells: usize,
    /// Intermediates registered during the run, whether or not they were removed.
    pub intermediates: Vec<Artifact>,
    pub removed: Vec<PathBuf>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Vectorize, reproject, buffer, rasterize, polygonize, intersect, aggregate.
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Box::new(Vectorize),
            Box::new(Reproject),
            Box::new(BufferToCircles),
            Box::new(RasterizeCoverage),
            Box::new(PolygonizeCoverage),
            Box::new(IntersectSegments),
            Box::new(AggregateToPoints),
        ])
    }

    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    pub fn run<B: GeoBackend>(
        &self,
        config: &GridConfig,
        backend: &B,
        reporter: &mut Reporter,
    ) -> Result<RunOutcome> {
        config.validate()?;
        let target = Target::resolve(config, backend)?;
        let stem = config.stem()?;
        let dir = config.intermediate_dir();
        fs::create_dir_all(&dir)?;

        let mut intermediates = Intermediates::new(backend, config.keep_intermediate);
        let mut products = Products::default();

        for stage in &self.stages {
            let kind = stage.kind();
            let path = match kind.artifact_suffix() {
                Some(suffix) => dir.join(format!("{stem}{suffix}")),
                None => config.output.clone(),
            };

            reporter.stage_started(kind);
            let started = Instant::now();

            let result = match stage.consumes().iter().find(|s| !products.contains(**s)) {
                Some(missing) => Err(Error::ShouldntHappen(format!(
                    "Stage '{kind}' needs the output of '{missing}', which has not run"
                ))),
                None => {
                    let mut ctx = StageContext {
                        config,
                        target: &target,
                        backend,
                        products: &products,
                        reporter: &mut *reporter,
                    };
                    stage.run(&mut ctx)
                }
            }
            .and_then(|product| {
                if product.kind() != stage.output() {
                    return Err(mismatch(kind, &product));
                }
                product.persist(backend, &path)?;
                Ok(product)
            });

            match result {
                Ok(product) => {
                    reporter.stage_succeeded(kind, &path, started.elapsed());
                    if kind.artifact_suffix().is_some() {
                        intermediates.register(Artifact {
                            path,
                            kind: stage.output(),
                            stage: kind,
                        });
                    }
                    products.insert(kind, product);
                }
                Err(e) => {
                    reporter.stage_failed(kind, e.to_string(), started.elapsed());
                    let mut artifacts = intermediates.paths();
                    // A write that failed part way may still have left its file behind.
                    if path.exists() && !artifacts.contains(&path) {
                        artifacts.push(path);
                    }
                    return Err(Error::StageFailed {
                        stage: kind,
                        artifacts,
                        source: Box::new(e),
                    });
                }
            }
        }

        let cells = match products.take(StageKind::AggregateToPoints) {
            Some(Product::Aggregates(layer)) => layer.aggregates.len(),
            _ => 0,
        };
        let registered = intermediates.artifacts().to_vec();
        let removed = intermediates.finish(reporter)?;
        reporter.removed(removed.clone());

        Ok(RunOutcome {
            output: config.output.clone(),
            cells,
            intermediates: registered,
            removed,
        })
    }
}
