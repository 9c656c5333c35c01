use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;

use lvis_grid::aggregate::Function;
use lvis_grid::canopy::{self, AnnotateOptions, NoCrossing, DEFAULT_THRESHOLD};
use lvis_grid::error::Error;
use lvis_grid::gdal_backend::GdalBackend;
use lvis_grid::pipeline::{GridConfig, GridMode, Pipeline, DEFAULT_SHOT_DIAMETER};
use lvis_grid::report::Reporter;
use lvis_grid::table::read_column_types;

#[derive(Subcommand)]
enum Commands {
    /// Append a canopy cover percentage column to an LVIS L2B table.
    CanopyCover {
        /// LVIS L2B text file.
        input: PathBuf,

        /// Annotated copy of the input.
        output: PathBuf,

        /// Canopy height threshold in metres.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Fail on column headers that do not match the L2B layout.
        #[arg(long)]
        strict: bool,

        /// Cover assigned to shots whose profile never exceeds the threshold.
        #[arg(long, value_enum, default_value_t = NoCrossing::default())]
        no_crossing: NoCrossing,
    },

    /// Aggregate shot attributes onto a grid, weighting by footprint overlap.
    Grid {
        /// Output resolution in units of the output spatial reference.
        #[arg(
            short,
            long,
            conflicts_with = "template",
            requires = "out_srs",
            required_unless_present = "template"
        )]
        resolution: Option<f64>,

        /// Raster whose pixel grid and spatial reference the output follows.
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Output spatial reference (EPSG code, WKT or PROJ string). Required with --resolution.
        #[arg(long)]
        out_srs: Option<String>,

        /// Footprint diameter in metres.
        #[arg(long, default_value_t = DEFAULT_SHOT_DIAMETER)]
        shot_diameter: f64,

        /// CSVT-style file with one type per input column.
        #[arg(long)]
        column_type: Option<PathBuf>,

        /// Columns to aggregate.
        #[arg(long = "column2grid", num_args = 1.., required = true)]
        columns: Vec<String>,

        /// Reduction applied per cell. Default: mean
        #[arg(long, value_enum)]
        reducer: Option<Function>,

        #[arg(long, default_value = "GLON")]
        lon_column: String,

        #[arg(long, default_value = "GLAT")]
        lat_column: String,

        /// Directory for intermediate files. Default: the output's directory
        #[arg(long)]
        dir_intermediate: Option<PathBuf>,

        #[arg(long)]
        keep_intermediate: bool,

        /// Write a JSON run summary here.
        #[arg(long)]
        summary: Option<PathBuf>,

        /// LVIS shot table.
        input: PathBuf,

        /// Output vector, format chosen by extension.
        output: PathBuf,
    },
}

#[derive(Parser)]
#[command(version, about = "LVIS canopy cover and footprint-aware gridding", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn run_name(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lvis")
        .to_string()
}

fn main() -> Result<(), Error> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CanopyCover {
            input,
            output,
            threshold,
            strict,
            no_crossing,
        } => {
            if input == output {
                return Err(Error::Argument("Input and output are the same file".into()));
            }
            let mut reporter = Reporter::new(run_name(&input));
            let options = AnnotateOptions {
                threshold,
                strict,
                no_crossing,
            };

            let reader = BufReader::new(File::open(&input)?);
            let writer = BufWriter::new(File::create(&output)?);
            let summary = canopy::annotate(reader, writer, &options, &mut reporter)?;
            info!(
                "Annotated {} records into {}",
                summary.records,
                output.display()
            );
        }
        Commands::Grid {
            resolution,
            template,
            out_srs,
            shot_diameter,
            column_type,
            columns,
            reducer,
            lon_column,
            lat_column,
            dir_intermediate,
            keep_intermediate,
            summary,
            input,
            output,
        } => {
            let mut reporter = Reporter::new(run_name(&input));
            let mode = GridMode::from_options(resolution, template, out_srs, &mut reporter)?;

            let mut config = GridConfig::new(input, output, mode, columns);
            config.shot_diameter = shot_diameter;
            config.function = reducer.unwrap_or(Function::Mean);
            config.lon_column = lon_column;
            config.lat_column = lat_column;
            config.dir_intermediate = dir_intermediate;
            config.keep_intermediate = keep_intermediate;
            if let Some(path) = column_type {
                config.column_types = Some(read_column_types(&path)?);
            }

            let result = Pipeline::standard().run(&config, &GdalBackend, &mut reporter);
            if let Some(path) = summary {
                reporter.write_summary(&path)?;
            }
            let outcome = result?;
            info!(
                "Wrote {} grid cells to {}",
                outcome.cells,
                outcome.output.display()
            );
        }
    }

    info!("Done!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(["lvis-grid"].iter().chain(args))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn grid_mode_constraints_are_declared() {
        let both = parse(&[
            "grid", "-r", "30", "--out-srs", "EPSG:32610", "-t", "t.tif", "in.txt", "out.gpkg",
            "--column2grid", "RH50",
        ]);
        assert_eq!(both.err().map(|e| e.kind()), Some(ErrorKind::ArgumentConflict));

        let no_srs = parse(&["grid", "-r", "30", "in.txt", "out.gpkg", "--column2grid", "RH50"]);
        assert_eq!(no_srs.err().map(|e| e.kind()), Some(ErrorKind::MissingRequiredArgument));

        let neither = parse(&["grid", "in.txt", "out.gpkg", "--column2grid", "RH50"]);
        assert_eq!(neither.err().map(|e| e.kind()), Some(ErrorKind::MissingRequiredArgument));

        let template = parse(&["grid", "-t", "t.tif", "in.txt", "out.gpkg", "--column2grid", "RH50"]);
        assert!(template.is_ok());
    }

    #[test]
    fn no_crossing_values() {
        let cli = parse(&["canopy-cover", "in.txt", "out.txt", "--no-crossing", "top-percentile"])
            .unwrap();
        match cli.command {
            Commands::CanopyCover { no_crossing, .. } => assert_eq!(no_crossing, NoCrossing::Top),
            Commands::Grid { .. } => panic!("parsed the wrong subcommand"),
        }
    }
}
