//! Footprint-to-grid aggregation.
//!
//! Footprints mark every grid cell they overlap (all-touched coverage), are cut into one
//! segment per covered cell, and the segments of each cell are reduced to one value per
//! requested attribute.

use std::collections::{BTreeMap, HashMap};

use clap::ValueEnum;
use geo::{Area, BooleanOps, Coord, MultiPolygon, Polygon};
use log::debug;
use serde::Serialize;

use crate::align::Grid;
use crate::error::{Error, Result};
use crate::footprint::Footprint;

pub const NODATA: f64 = -9999.0;

/// Intersections smaller than this fraction of a cell's area count as touching, not overlapping.
const MIN_OVERLAP_FRACTION: f64 = 1e-9;

#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Function {
    Mean,
    /// Mean weighted by segment area.
    WeightedMean,
    Median,

    Min,
    Max,

    Count,
    Sum,
}

/// One attribute value contributed by one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub weight: f64,
}

pub fn collapse_cell(samples: Vec<Sample>, function: Function) -> f64 {
    let samples: Vec<Sample> = samples.into_iter().filter(|s| s.value.is_finite()).collect();
    let len = samples.len();
    if len == 0 {
        return NODATA;
    }

    match function {
        Function::Mean => samples.iter().map(|s| s.value).sum::<f64>() / len as f64,
        Function::WeightedMean => {
            let total: f64 = samples.iter().map(|s| s.weight).sum();
            if total <= 0.0 {
                return NODATA;
            }
            samples.iter().map(|s| s.value * s.weight).sum::<f64>() / total
        }
        Function::Median => {
            let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
            values.sort_by(|a, b| a.total_cmp(b));

            match len % 2 == 0 {
                true => (values[len / 2 - 1] + values[len / 2]) / 2.0,
                false => values[len / 2],
            }
        }
        Function::Min => samples.iter().fold(f64::MAX, |acc, s| acc.min(s.value)),
        Function::Max => samples.iter().fold(f64::MIN, |acc, s| acc.max(s.value)),
        Function::Count => len as f64,
        Function::Sum => samples.iter().map(|s| s.value).sum(),
    }
}

/// Byte mask over a grid, 1 where at least one footprint overlaps the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageMask {
    pub grid: Grid,
    /// Row-major, `grid.width * grid.height` entries.
    pub data: Vec<u8>,
}

impl CoverageMask {
    pub fn is_covered(&self, row: usize, col: usize) -> bool {
        row < self.grid.height && col < self.grid.width && self.data[row * self.grid.width + col] != 0
    }

    /// (row, col) of every covered cell in row-major order.
    pub fn covered(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let width = self.grid.width;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(move |(i, _)| (i / width, i % width))
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub polygon: Polygon<f64>,
}

/// The part of one footprint lying inside one covered cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub fid: usize,
    pub row: usize,
    pub col: usize,
    pub geometry: MultiPolygon<f64>,
    pub area: f64,
    /// Requested attribute values of the parent shot.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub segments: usize,
    /// One reduced value per requested column.
    pub values: Vec<f64>,
}

fn min_overlap(grid: &Grid) -> f64 {
    let (rx, ry) = grid.resolution();
    rx * ry * MIN_OVERLAP_FRACTION
}

fn overlap(footprint: &Footprint, cell: &Polygon<f64>) -> (MultiPolygon<f64>, f64) {
    let piece = footprint.polygon().intersection(cell);
    let area = piece.unsigned_area();
    (piece, area)
}

/// All-touched coverage: a cell is covered when any footprint overlaps it with positive area.
pub fn coverage(grid: &Grid, footprints: &[Footprint]) -> Result<CoverageMask> {
    if grid.is_empty() {
        return Err(Error::Geometry("Output grid has no cells".into()));
    }

    let threshold = min_overlap(grid);
    let mut data = vec![0u8; grid.checked_len()?];

    for footprint in footprints {
        let (rows, cols) = grid.cell_window(&footprint.extent())?;
        for row in rows {
            for col in cols.clone() {
                let i = row * grid.width + col;
                if data[i] != 0 {
                    continue;
                }
                let (_, area) = overlap(footprint, &grid.cell_polygon(row, col));
                if area > threshold {
                    data[i] = 1;
                }
            }
        }
    }

    let mask = CoverageMask {
        grid: grid.clone(),
        data,
    };
    debug!("{} of {} cells covered", mask.count(), grid.len());
    Ok(mask)
}

/// One polygon per covered cell.
pub fn polygonize(mask: &CoverageMask) -> Vec<Cell> {
    mask.covered()
        .map(|(row, col)| Cell {
            row,
            col,
            polygon: mask.grid.cell_polygon(row, col),
        })
        .collect()
}

/// Cut footprints by the covered cells. `values[i]` holds the attribute values of `footprints[i]`.
pub fn intersect(
    grid: &Grid,
    cells: &[Cell],
    footprints: &[Footprint],
    values: &[Vec<f64>],
) -> Result<Vec<Segment>> {
    if footprints.len() != values.len() {
        return Err(Error::ShouldntHappen(format!(
            "{} footprints but {} attribute rows",
            footprints.len(),
            values.len()
        )));
    }

    let index: HashMap<(usize, usize), &Cell> = cells.iter().map(|c| ((c.row, c.col), c)).collect();
    let threshold = min_overlap(grid);
    let mut segments = Vec::new();

    for (footprint, values) in footprints.iter().zip(values) {
        let (rows, cols) = grid.cell_window(&footprint.extent())?;
        for row in rows {
            for col in cols.clone() {
                let Some(cell) = index.get(&(row, col)) else {
                    continue;
                };
                let (geometry, area) = overlap(footprint, &cell.polygon);
                if area > threshold {
                    segments.push(Segment {
                        fid: footprint.fid,
                        row,
                        col,
                        geometry,
                        area,
                        values: values.clone(),
                    });
                }
            }
        }
    }

    Ok(segments)
}

/// Reduce segments to one aggregate per cell, ordered by (row, col).
pub fn aggregate(
    grid: &Grid,
    segments: &[Segment],
    columns: usize,
    function: Function,
) -> Result<Vec<Aggregate>> {
    let mut by_cell: BTreeMap<(usize, usize), Vec<&Segment>> = BTreeMap::new();
    for segment in segments {
        if segment.values.len() != columns {
            return Err(Error::ShouldntHappen(format!(
                "Segment of shot {} carries {} values, expected {columns}",
                segment.fid,
                segment.values.len()
            )));
        }
        by_cell.entry((segment.row, segment.col)).or_default().push(segment);
    }

    Ok(by_cell
        .into_iter()
        .map(|((row, col), members)| {
            let values = (0..columns)
                .map(|c| {
                    let samples = members
                        .iter()
                        .map(|s| Sample {
                            value: s.values[c],
                            weight: s.area,
                        })
                        .collect();
                    collapse_cell(samples, function)
                })
                .collect();
            let Coord { x, y } = grid.cell_center(row, col);

            Aggregate {
                row,
                col,
                x,
                y,
                segments: members.len(),
                values,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Affine;

    fn grid(width: usize, height: usize) -> Grid {
        Grid {
            transform: Affine::north_up(0.0, 30.0 * height as f64, 30.0, 30.0),
            width,
            height,
            crs: "EPSG:3005".into(),
        }
    }

    fn run(grid: &Grid, footprints: &[Footprint], values: &[Vec<f64>]) -> (Vec<Segment>, Vec<Aggregate>) {
        let mask = coverage(grid, footprints).unwrap();
        let cells = polygonize(&mask);
        let segments = intersect(grid, &cells, footprints, values).unwrap();
        let aggregates = aggregate(grid, &segments, values[0].len(), Function::Mean).unwrap();
        (segments, aggregates)
    }

    fn samples(values: &[f64]) -> Vec<Sample> {
        values.iter().map(|&value| Sample { value, weight: 1.0 }).collect()
    }

    #[test]
    fn footprint_inside_one_cell() {
        let grid = grid(3, 3);
        let fp = Footprint::new(0, Coord { x: 45.0, y: 45.0 }, 20.0).unwrap();

        let (segments, aggregates) = run(&grid, &[fp.clone()], &[vec![7.0]]);

        assert_eq!(segments.len(), 1);
        assert!((segments[0].area - fp.area()).abs() < 1e-6 * fp.area());
        assert_eq!(aggregates.len(), 1);
        assert_eq!((aggregates[0].row, aggregates[0].col), (1, 1));
        assert_eq!((aggregates[0].x, aggregates[0].y), (45.0, 45.0));
        assert_eq!(aggregates[0].values, vec![7.0]);
    }

    #[test]
    fn footprint_straddling_two_cells() {
        let grid = grid(3, 3);
        let fp = Footprint::new(0, Coord { x: 32.0, y: 45.0 }, 20.0).unwrap();

        let (segments, aggregates) = run(&grid, &[fp.clone()], &[vec![1.0]]);

        assert_eq!(segments.len(), 2);
        let total: f64 = segments.iter().map(|s| s.area).sum();
        assert!((total - fp.area()).abs() < 1e-6 * fp.area());
        assert!(segments[0].area < segments[1].area);

        assert_eq!(aggregates.len(), 2);
        let cells: Vec<(usize, usize)> = aggregates.iter().map(|a| (a.row, a.col)).collect();
        assert_eq!(cells, vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn shot_on_a_cell_corner_covers_four_cells() {
        let grid = grid(3, 3);
        let fp = Footprint::new(0, Coord { x: 30.0, y: 60.0 }, 20.0).unwrap();

        let mask = coverage(&grid, &[fp]).unwrap();
        let covered: Vec<(usize, usize)> = mask.covered().collect();
        assert_eq!(covered, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn shot_on_a_cell_edge_covers_two_cells() {
        let grid = grid(3, 3);
        let fp = Footprint::new(0, Coord { x: 30.0, y: 45.0 }, 20.0).unwrap();

        let mask = coverage(&grid, &[fp]).unwrap();
        assert_eq!(mask.covered().collect::<Vec<_>>(), vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn empty_cells_are_never_emitted() {
        let grid = grid(5, 5);
        let footprints = vec![
            Footprint::new(0, Coord { x: 15.0, y: 15.0 }, 20.0).unwrap(),
            Footprint::new(1, Coord { x: 135.0, y: 135.0 }, 20.0).unwrap(),
        ];
        let values = vec![vec![1.0], vec![3.0]];

        let mask = coverage(&grid, &footprints).unwrap();
        assert_eq!(mask.count(), 2);

        let (segments, aggregates) = run(&grid, &footprints, &values);
        assert_eq!(segments.len(), 2);
        assert_eq!(aggregates.len(), mask.count());
        for a in &aggregates {
            assert!(mask.is_covered(a.row, a.col));
        }
    }

    #[test]
    fn overlapping_shots_share_a_cell() {
        let grid = grid(3, 3);
        let footprints = vec![
            Footprint::new(0, Coord { x: 42.0, y: 45.0 }, 10.0).unwrap(),
            Footprint::new(1, Coord { x: 48.0, y: 45.0 }, 10.0).unwrap(),
        ];
        let values = vec![vec![2.0, 10.0], vec![4.0, 30.0]];

        let (segments, aggregates) = run(&grid, &footprints, &values);
        assert_eq!(segments.len(), 2);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].segments, 2);
        assert_eq!(aggregates[0].values, vec![3.0, 20.0]);
    }

    #[test]
    fn footprints_outside_the_grid_are_ignored() {
        let grid = grid(2, 2);
        let fp = Footprint::new(0, Coord { x: 500.0, y: 500.0 }, 20.0).unwrap();
        let mask = coverage(&grid, &[fp]).unwrap();
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn collapse_functions() {
        let s = samples(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(collapse_cell(s.clone(), Function::Mean), 2.5);
        assert_eq!(collapse_cell(s.clone(), Function::Median), 2.5);
        assert_eq!(collapse_cell(s.clone(), Function::Min), 1.0);
        assert_eq!(collapse_cell(s.clone(), Function::Max), 4.0);
        assert_eq!(collapse_cell(s.clone(), Function::Count), 4.0);
        assert_eq!(collapse_cell(s, Function::Sum), 10.0);
        assert_eq!(collapse_cell(samples(&[5.0, 1.0, 3.0]), Function::Median), 3.0);
        assert_eq!(collapse_cell(vec![], Function::Mean), NODATA);
    }

    #[test]
    fn weighted_mean_uses_segment_area() {
        let s = vec![
            Sample { value: 10.0, weight: 3.0 },
            Sample { value: 20.0, weight: 1.0 },
        ];
        assert_eq!(collapse_cell(s, Function::WeightedMean), 12.5);
    }

    #[test]
    fn non_finite_values_are_skipped() {
        let s = samples(&[f64::NAN, 2.0]);
        assert_eq!(collapse_cell(s, Function::Mean), 2.0);
    }
}
