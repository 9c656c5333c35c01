//! Canopy cover from LVIS L2B relative-height (RH) percentiles.
//!
//! Cover is the share of the waveform above the canopy/ground separation height:
//! `100 - p` where `p` is the lowest RH percentile whose height exceeds the threshold.

use std::io::{BufRead, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::report::Reporter;

/// RH percentile labels of an LVIS L2B record, in column order.
pub const RH_PERCENTILES: [u8; 23] = [
    10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 65, 70, 75, 80, 85, 90, 95, 96, 97, 98, 99, 100,
];

/// Zero-based column of RH10 in an L2B record.
pub const RH_FIRST_COLUMN: usize = 9;

/// Canopy/ground separation height in meters.
pub const DEFAULT_THRESHOLD: f64 = 1.37;

pub const CC_FIELD: &str = "CC_PERCENT";

/// The only header line that gets a `CC_PERCENT` label appended.
pub const LVIS_L2B_HEADER: &str = "# LFID SHOTNUMBER TIME GLON GLAT ZG TLON TLAT ZT RH10 RH15 RH20 RH25 RH30 RH35 RH40 RH45 RH50 RH55 RH60 RH65 RH70 RH75 RH80 RH85 RH90 RH95 RH96 RH97 RH98 RH99 RH100 AZIMUTH INCIDENTANGLE RANGE COMPLEXITY CHANNEL_ZT CHANNEL_ZG CHANNEL_RH";

/// Which percentile to report when no RH height exceeds the threshold.
///
/// `SecondToLast` is the default: the percentile at index N-2 (RH99), giving a cover of 1%.
/// It stays the default until the intended value is confirmed. `Top` uses RH100 and reports 0%.
#[derive(Debug, Default, ValueEnum, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoCrossing {
    #[default]
    #[value(name = "second-to-last")]
    SecondToLast,
    #[value(name = "top-percentile")]
    Top,
}

impl NoCrossing {
    fn index(&self) -> usize {
        match self {
            NoCrossing::SecondToLast => RH_PERCENTILES.len() - 2,
            NoCrossing::Top => RH_PERCENTILES.len() - 1,
        }
    }
}

/// Heights at the fixed `RH_PERCENTILES`. Heights need not be monotonic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileProfile {
    heights: [f64; 23],
}

impl PercentileProfile {
    pub fn new(heights: [f64; 23]) -> Self {
        Self { heights }
    }

    /// Build from the whitespace-split fields of an L2B data line.
    pub fn from_fields(fields: &[&str], line: usize) -> Result<Self> {
        let end = RH_FIRST_COLUMN + RH_PERCENTILES.len();
        if fields.len() < end {
            return Err(Error::InputFormat {
                line,
                message: format!(
                    "Expected at least {end} fields for RH10..RH100, found {}",
                    fields.len()
                ),
            });
        }

        let mut heights = [0.0; 23];
        for (h, token) in heights.iter_mut().zip(&fields[RH_FIRST_COLUMN..end]) {
            *h = token.parse().map_err(|_| Error::InputFormat {
                line,
                message: format!("'{token}' is not a valid RH height"),
            })?;
        }
        Ok(Self { heights })
    }

    pub fn heights(&self) -> &[f64; 23] {
        &self.heights
    }
}

/// Canopy cover in percent with the default no-crossing fallback.
pub fn estimate_canopy_cover(profile: &PercentileProfile, threshold: f64) -> f64 {
    estimate_canopy_cover_with(profile, threshold, NoCrossing::default())
}

pub fn estimate_canopy_cover_with(
    profile: &PercentileProfile,
    threshold: f64,
    no_crossing: NoCrossing,
) -> f64 {
    let i = profile
        .heights
        .iter()
        .position(|h| *h > threshold)
        .unwrap_or_else(|| no_crossing.index());

    100.0 - RH_PERCENTILES[i] as f64
}

#[derive(Debug, Clone, Copy)]
pub struct AnnotateOptions {
    pub threshold: f64,
    /// Fail on header-like lines that do not match the expected L2B layout.
    pub strict: bool,
    pub no_crossing: NoCrossing,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            strict: false,
            no_crossing: NoCrossing::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct AnnotateSummary {
    pub records: usize,
    pub header_matched: bool,
    /// Line numbers of column headers that were passed through unlabelled.
    pub mismatched_headers: Vec<usize>,
}

/// Copy an L2B table, appending a `CC_PERCENT` column.
///
/// Data lines get the cover rounded to an integer. The exact L2B header gets the column label.
/// Other comment lines are copied verbatim; a copied line that looks like a column header
/// (first token `LFID`) leaves header and data out of step, so it is reported, or rejected
/// in strict mode.
pub fn annotate<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    options: &AnnotateOptions,
    reporter: &mut Reporter,
) -> Result<AnnotateSummary> {
    let mut summary = AnnotateSummary::default();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        let line_no = i + 1;

        if line.starts_with('#') {
            if line == LVIS_L2B_HEADER {
                writeln!(writer, "{line}\t{CC_FIELD}")?;
                summary.header_matched = true;
                continue;
            }

            if is_header_like(line) {
                let message = format!(
                    "Column header does not match the LVIS L2B layout, {CC_FIELD} label not added"
                );
                if options.strict {
                    return Err(Error::InputFormat {
                        line: line_no,
                        message,
                    });
                }
                reporter.warn(format!("line {line_no}: {message}"));
                summary.mismatched_headers.push(line_no);
            }
            writeln!(writer, "{line}")?;
            continue;
        }

        if line.trim().is_empty() {
            writeln!(writer, "{line}")?;
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let profile = PercentileProfile::from_fields(&fields, line_no)?;
        let cover = estimate_canopy_cover_with(&profile, options.threshold, options.no_crossing);
        writeln!(writer, "{line}\t{cover:.0}")?;
        summary.records += 1;
    }
    writer.flush()?;

    if summary.records > 0 && !summary.header_matched {
        reporter.warn(format!(
            "No LVIS L2B header found, {} records carry an unlabelled {CC_FIELD} column",
            summary.records
        ));
    }
    Ok(summary)
}

fn is_header_like(line: &str) -> bool {
    line.trim_start_matches('#').split_whitespace().next() == Some("LFID")
}
