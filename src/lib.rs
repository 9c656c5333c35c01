//! LVIS canopy cover and footprint-aware gridding of shot tables.

pub mod aggregate;
pub mod align;
pub mod artifact;
pub mod backend;
pub mod canopy;
pub mod error;
pub mod footprint;
pub mod gdal_backend;
pub mod geometry;
pub mod pipeline;
pub mod report;
pub mod table;
pub mod util;

pub use error::{Error, Result};
