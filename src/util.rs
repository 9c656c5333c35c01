use crate::geometry::{Extent, PIXEL_SNAP_TOLERANCE};

/// (width, height) in pixels needed to cover `extent` at `res`. Never less than one pixel.
pub fn get_raster_size(extent: &Extent, res: f64) -> (usize, usize) {
    let cells = |span: f64| ((span / res) - PIXEL_SNAP_TOLERANCE).ceil().max(1.0) as usize;

    (cells(extent.width()), cells(extent.height()))
}

/// Round `v` to the nearest integer when it is within the snap tolerance of one.
pub fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < PIXEL_SNAP_TOLERANCE {
        r
    } else {
        v
    }
}
