#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use lvis_grid::aggregate::CoverageMask;
use lvis_grid::align::{CoordTransformer, Identity, ReferenceGrid};
use lvis_grid::artifact::ArtifactStore;
use lvis_grid::backend::{GeoBackend, VectorLayer, WGS84};
use lvis_grid::error::{Error, Result};
use lvis_grid::geometry::Affine;

pub const UTM: &str = "EPSG:32610";

/// Maps lon/lat around (-120, 45) onto metres, 0.001 degree per metre.
pub struct Local;

impl CoordTransformer for Local {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        for x in xs.iter_mut() {
            *x = (*x + 120.0) * 1000.0;
        }
        for y in ys.iter_mut() {
            *y = (*y - 45.0) * 1000.0;
        }
        Ok(())
    }
}

/// Backend keeping every write in memory.
#[derive(Default)]
pub struct MemoryBackend {
    pub template: Option<ReferenceGrid>,
    /// Writes to paths ending with this suffix create an empty file, then fail.
    pub fail_on: Option<String>,
    pub vectors: RefCell<Vec<(PathBuf, VectorLayer)>>,
    pub masks: RefCell<Vec<(PathBuf, CoverageMask)>>,
    pub deleted: RefCell<Vec<PathBuf>>,
}

impl MemoryBackend {
    pub fn with_template() -> Self {
        Self {
            template: Some(ReferenceGrid {
                transform: Affine::north_up(0.0, 100.0, 30.0, 30.0),
                crs: UTM.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.vectors.borrow().iter().map(|(p, _)| p.clone()).collect();
        paths.extend(self.masks.borrow().iter().map(|(p, _)| p.clone()));
        paths
    }

    pub fn vector(&self, path: &Path) -> Option<VectorLayer> {
        self.vectors
            .borrow()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, l)| l.clone())
    }

    fn check(&self, path: &Path) -> Result<()> {
        match &self.fail_on {
            Some(suffix) if path.to_string_lossy().ends_with(suffix.as_str()) => {
                // Leave a partial file behind, as a driver failing mid-write would.
                std::fs::write(path, b"")?;
                Err(Error::Geometry(format!("refusing to write {}", path.display())))
            }
            _ => Ok(()),
        }
    }
}

impl ArtifactStore for MemoryBackend {
    fn delete_vector(&self, path: &Path) -> Result<()> {
        self.deleted.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn delete_raster(&self, path: &Path) -> Result<()> {
        self.deleted.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

impl GeoBackend for MemoryBackend {
    fn transformer(&self, from: &str, to: &str) -> Result<Box<dyn CoordTransformer>> {
        match (from, to) {
            (a, b) if a == b => Ok(Box::new(Identity)),
            (WGS84, UTM) => Ok(Box::new(Local)),
            _ => Err(Error::Argument(format!("no transform from {from} to {to}"))),
        }
    }

    fn is_projected(&self, crs: &str) -> Result<bool> {
        Ok(crs != WGS84)
    }

    fn read_template(&self, path: &Path) -> Result<ReferenceGrid> {
        self.template
            .clone()
            .ok_or_else(|| Error::Argument(format!("{} is not a raster", path.display())))
    }

    fn write_vector(&self, path: &Path, layer: &VectorLayer) -> Result<()> {
        self.check(path)?;
        self.vectors
            .borrow_mut()
            .push((path.to_path_buf(), layer.clone()));
        Ok(())
    }

    fn write_mask(&self, path: &Path, mask: &CoverageMask) -> Result<()> {
        self.check(path)?;
        self.masks.borrow_mut().push((path.to_path_buf(), mask.clone()));
        Ok(())
    }
}

/// Two shots 15 m apart. The first lies inside template pixel (0, 0), the second straddles
/// pixels (0, 0) and (0, 1).
pub const SHOTS: &str = "\
# LVIS L2B subset
# LFID SHOTNUMBER GLON GLAT RH50 RH98
1001 1 240.015 45.085 10.0 20.0
1001 2 240.030 45.085 20.0 30.0
";

pub fn write_shots(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}
