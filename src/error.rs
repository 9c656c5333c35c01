use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::StageKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("GDAL Error: {0}")]
    GDALError(#[from] gdal::errors::GdalError),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Argument Error: {0}")]
    Argument(String),

    #[error("Input Format Error (line {line}): {message}")]
    InputFormat { line: usize, message: String },

    #[error("Geometry Error: {0}")]
    Geometry(String),

    #[error("Column Error: {0}")]
    Column(String),

    /// A stage aborted the run. Artifacts written by earlier stages are not removed.
    #[error(
        "Stage '{stage}' failed: {source}. Intermediate files left on disk: [{}]",
        list_paths(.artifacts)
    )]
    StageFailed {
        stage: StageKind,
        artifacts: Vec<PathBuf>,
        #[source]
        source: Box<Error>,
    },

    #[error("Something happened that really shouldn't: {0}")]
    ShouldntHappen(String),
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = core::result::Result<T, Error>;
