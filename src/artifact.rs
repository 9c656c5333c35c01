//! Stage outputs on disk and their release at the end of a run.

use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::error::Result;
use crate::report::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StageKind {
    Vectorize,
    Reproject,
    BufferToCircles,
    RasterizeCoverage,
    PolygonizeCoverage,
    IntersectSegments,
    AggregateToPoints,
}

impl StageKind {
    pub const ORDER: [StageKind; 7] = [
        StageKind::Vectorize,
        StageKind::Reproject,
        StageKind::BufferToCircles,
        StageKind::RasterizeCoverage,
        StageKind::PolygonizeCoverage,
        StageKind::IntersectSegments,
        StageKind::AggregateToPoints,
    ];

    /// File name suffix of the stage's intermediate artifact. The last stage writes the
    /// user-supplied output instead.
    pub fn artifact_suffix(&self) -> Option<&'static str> {
        match self {
            StageKind::Vectorize => Some("_points.gpkg"),
            StageKind::Reproject => Some("_points_proj.gpkg"),
            StageKind::BufferToCircles => Some("_shot_circles.gpkg"),
            StageKind::RasterizeCoverage => Some("_shot_cover.tif"),
            StageKind::PolygonizeCoverage => Some("_shot_cover.gpkg"),
            StageKind::IntersectSegments => Some("_shot_segments.gpkg"),
            StageKind::AggregateToPoints => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Vectorize => "vectorize",
            StageKind::Reproject => "reproject",
            StageKind::BufferToCircles => "buffer-to-circles",
            StageKind::RasterizeCoverage => "rasterize-coverage",
            StageKind::PolygonizeCoverage => "polygonize-coverage",
            StageKind::IntersectSegments => "intersect-segments",
            StageKind::AggregateToPoints => "aggregate-to-points",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactKind {
    Vector,
    Raster,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub stage: StageKind,
}

/// Removal of datasets by type.
pub trait ArtifactStore {
    fn delete_vector(&self, path: &Path) -> Result<()>;
    fn delete_raster(&self, path: &Path) -> Result<()>;
}

/// Intermediate artifacts of one run.
///
/// `finish` removes them (unless asked to keep them) once the run has succeeded. A set dropped
/// without `finish`, e.g. after a failed stage, leaves every file in place.
pub struct Intermediates<'a> {
    store: &'a dyn ArtifactStore,
    entries: Vec<Artifact>,
    keep: bool,
    finished: bool,
}

impl<'a> Intermediates<'a> {
    pub fn new(store: &'a dyn ArtifactStore, keep: bool) -> Self {
        Self {
            store,
            entries: Vec::new(),
            keep,
            finished: false,
        }
    }

    pub fn register(&mut self, artifact: Artifact) {
        self.entries.push(artifact);
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.entries
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|a| a.path.clone()).collect()
    }

    /// Returns the paths that were deleted.
    pub fn finish(mut self, reporter: &mut Reporter) -> Result<Vec<PathBuf>> {
        self.finished = true;
        if self.keep {
            reporter.info(format!(
                "Keeping {} intermediate files",
                self.entries.len()
            ));
            return Ok(Vec::new());
        }

        let mut deleted = Vec::with_capacity(self.entries.len());
        for artifact in &self.entries {
            match artifact.kind {
                ArtifactKind::Vector => self.store.delete_vector(&artifact.path)?,
                ArtifactKind::Raster => self.store.delete_raster(&artifact.path)?,
            }
            reporter.info(format!("Removed {}", artifact.path.display()));
            deleted.push(artifact.path.clone());
        }
        Ok(deleted)
    }
}

impl Drop for Intermediates<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.entries.is_empty() {
            debug!(
                "Run ended early, {} intermediate files remain",
                self.entries.len()
            );
        }
    }
}
