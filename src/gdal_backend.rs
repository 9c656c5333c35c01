use std::path::Path;

use gdal::raster::Buffer;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::{
    FieldValue as OgrValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType,
};
use gdal::{Dataset, DriverManager};
use log::debug;

use crate::aggregate::CoverageMask;
use crate::align::{CoordTransformer, ReferenceGrid};
use crate::artifact::ArtifactStore;
use crate::backend::{GeoBackend, VectorLayer};
use crate::error::{Error, Result};
use crate::geometry::{Affine, GeometryKind};
use crate::table::{ColumnType, FieldValue};

/// Backend writing GeoPackage/SQLite vectors and GeoTIFF rasters through GDAL.
#[derive(Debug, Default)]
pub struct GdalBackend;

struct GdalTransformer(CoordTransform);

impl CoordTransformer for GdalTransformer {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        let mut zs = vec![0.0; xs.len()];
        self.0.transform_coords(xs, ys, &mut zs)?;
        Ok(())
    }
}

/// Parse a user CRS definition with x/y (lon/lat) axis order.
fn spatial_ref(definition: &str) -> Result<SpatialRef> {
    let mut srs = SpatialRef::from_definition(definition)?;
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// OGR driver for a vector path, chosen by extension.
pub fn vector_driver(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("sqlite") | Some("db") => "SQLite",
        Some("shp") => "ESRI Shapefile",
        Some("geojson") | Some("json") => "GeoJSON",
        _ => "GPKG",
    }
}

fn ogr_geometry(kind: GeometryKind) -> OGRwkbGeometryType::Type {
    match kind {
        GeometryKind::Point => OGRwkbGeometryType::wkbPoint,
        GeometryKind::MultiPoint => OGRwkbGeometryType::wkbMultiPoint,
        GeometryKind::LineString => OGRwkbGeometryType::wkbLineString,
        GeometryKind::MultiLineString => OGRwkbGeometryType::wkbMultiLineString,
        GeometryKind::Polygon => OGRwkbGeometryType::wkbPolygon,
        GeometryKind::MultiPolygon => OGRwkbGeometryType::wkbMultiPolygon,
    }
}

fn ogr_field(ty: ColumnType) -> OGRFieldType::Type {
    match ty {
        ColumnType::Real => OGRFieldType::OFTReal,
        ColumnType::Integer => OGRFieldType::OFTInteger64,
        ColumnType::String => OGRFieldType::OFTString,
    }
}

fn ogr_value(value: &FieldValue) -> OgrValue {
    match value {
        FieldValue::Real(v) => OgrValue::RealValue(*v),
        FieldValue::Integer(v) => OgrValue::Integer64Value(*v),
        FieldValue::Text(s) => OgrValue::StringValue(s.clone()),
    }
}

impl ArtifactStore for GdalBackend {
    fn delete_vector(&self, path: &Path) -> Result<()> {
        DriverManager::get_driver_by_name(vector_driver(path))?.delete(path)?;
        Ok(())
    }

    fn delete_raster(&self, path: &Path) -> Result<()> {
        DriverManager::get_driver_by_name("GTiff")?.delete(path)?;
        Ok(())
    }
}

impl GeoBackend for GdalBackend {
    fn transformer(&self, from: &str, to: &str) -> Result<Box<dyn CoordTransformer>> {
        let source = spatial_ref(from)?;
        let target = spatial_ref(to)?;
        Ok(Box::new(GdalTransformer(CoordTransform::new(&source, &target)?)))
    }

    fn is_projected(&self, crs: &str) -> Result<bool> {
        Ok(spatial_ref(crs)?.is_projected())
    }

    fn read_template(&self, path: &Path) -> Result<ReferenceGrid> {
        let ds = Dataset::open(path)?;
        let transform = Affine::from_gdal(ds.geo_transform()?);
        transform.inverse()?;

        let crs = ds.projection();
        if crs.trim().is_empty() {
            return Err(Error::Geometry(format!(
                "Template raster {} has no spatial reference",
                path.display()
            )));
        }
        Ok(ReferenceGrid { transform, crs })
    }

    fn write_vector(&self, path: &Path, layer: &VectorLayer) -> Result<()> {
        if path.exists() {
            self.delete_vector(path)?;
        }

        let driver = DriverManager::get_driver_by_name(vector_driver(path))?;
        let mut ds = driver.create_vector_only(path)?;
        let srs = spatial_ref(&layer.crs)?;

        let mut out = ds.create_layer(LayerOptions {
            name: &layer.name,
            srs: Some(&srs),
            ty: ogr_geometry(layer.geometry),
            ..Default::default()
        })?;

        let defs: Vec<(&str, OGRFieldType::Type)> = layer
            .fields
            .iter()
            .map(|c| (c.name.as_str(), ogr_field(c.ty)))
            .collect();
        out.create_defn_fields(&defs)?;

        let names: Vec<&str> = layer.fields.iter().map(|c| c.name.as_str()).collect();
        for feature in &layer.features {
            let geometry = Geometry::from_wkt(&feature.geometry.to_wkt())?;
            let values: Vec<OgrValue> = feature.values.iter().map(ogr_value).collect();
            out.create_feature_fields(geometry, &names, &values)?;
        }

        debug!(
            "Wrote {} features to {} ({})",
            layer.features.len(),
            path.display(),
            vector_driver(path)
        );
        Ok(())
    }

    fn write_mask(&self, path: &Path, mask: &CoverageMask) -> Result<()> {
        let (width, height) = (mask.grid.width, mask.grid.height);

        let mut ds = DriverManager::get_driver_by_name("GTiff")?
            .create_with_band_type::<u8, _>(path, width, height, 1)?;
        ds.set_geo_transform(&mask.grid.transform.to_gdal())?;
        ds.set_spatial_ref(&spatial_ref(&mask.grid.crs)?)?;

        let mut rb = ds.rasterband(1)?;
        rb.set_no_data_value(Some(0.0))?;
        rb.write(
            (0, 0),
            (width, height),
            &mut Buffer::new((width, height), mask.data.clone()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, LineString, MultiPolygon, Polygon};

    use crate::aggregate::Segment;
    use crate::align::Grid;
    use crate::backend::{Feature, WGS84};
    use crate::geometry::Shape;
    use crate::pipeline::{Product, SegmentLayer, SHOT_ID_FIELD};
    use crate::table::Column;

    const UTM: &str = "EPSG:32610";

    fn square(x: f64, y: f64) -> Polygon<f64> {
        let ring = vec![(x, y), (x + 10.0, y), (x + 10.0, y + 10.0), (x, y + 10.0), (x, y)];
        Polygon::new(LineString::from(ring), vec![])
    }

    fn shots_layer() -> VectorLayer {
        let shot = |x: f64, rh: f64, number: i64, label: &str| Feature {
            geometry: Shape::Point(Coord { x, y: 4_980_000.0 }),
            values: vec![
                FieldValue::Real(rh),
                FieldValue::Integer(number),
                FieldValue::Text(label.into()),
            ],
        };

        VectorLayer {
            name: "shots".into(),
            crs: UTM.into(),
            geometry: GeometryKind::Point,
            fields: vec![
                Column::new("RH50", ColumnType::Real),
                Column::new("SHOTNUMBER", ColumnType::Integer),
                Column::new("LABEL", ColumnType::String),
            ],
            features: vec![
                shot(500_000.0, 12.5, 9_000_000_001, "a"),
                shot(500_030.0, 3.0, 9_000_000_002, "b"),
            ],
        }
    }

    #[test]
    fn drivers_by_extension() {
        assert_eq!(vector_driver(Path::new("out/grid.sqlite")), "SQLite");
        assert_eq!(vector_driver(Path::new("grid.SHP")), "ESRI Shapefile");
        assert_eq!(vector_driver(Path::new("grid.geojson")), "GeoJSON");
        assert_eq!(vector_driver(Path::new("grid.gpkg")), "GPKG");
        assert_eq!(vector_driver(Path::new("grid")), "GPKG");
    }

    #[test]
    fn vector_layers_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        for name in ["shots.gpkg", "shots.sqlite"] {
            let path = dir.path().join(name);
            GdalBackend.write_vector(&path, &shots_layer()).unwrap();
            // Existing files are replaced.
            GdalBackend.write_vector(&path, &shots_layer()).unwrap();

            {
                let ds = Dataset::open(&path).unwrap();
                let mut layer = ds.layer(0).unwrap();
                assert_eq!(layer.feature_count(), 2);

                let feature = layer.features().next().unwrap();
                assert_eq!(feature.field_as_double_by_name("RH50").unwrap(), Some(12.5));
                assert_eq!(
                    feature.field_as_integer64_by_name("SHOTNUMBER").unwrap(),
                    Some(9_000_000_001)
                );
                assert_eq!(
                    feature.field_as_string_by_name("LABEL").unwrap(),
                    Some("a".to_string())
                );
                let (x, y, _) = feature.geometry().unwrap().get_point(0);
                assert_eq!((x, y), (500_000.0, 4_980_000.0));
            }

            GdalBackend.delete_vector(&path).unwrap();
            assert!(!path.exists(), "{name} was not deleted");
        }
    }

    #[test]
    fn segments_of_one_shot_share_a_gpkg_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots_shot_segments.gpkg");

        let segment = |col: usize, x: f64| Segment {
            fid: 3,
            row: 0,
            col,
            geometry: MultiPolygon::new(vec![square(x, 0.0)]),
            area: 100.0,
            values: vec![4.0],
        };
        let product = Product::Segments(SegmentLayer {
            crs: UTM.into(),
            columns: vec!["RH50".into()],
            segments: vec![segment(0, 20.0), segment(1, 30.0)],
        });
        product.persist(&GdalBackend, &path).unwrap();

        let ds = Dataset::open(&path).unwrap();
        let mut layer = ds.layer(0).unwrap();
        assert_eq!(layer.feature_count(), 2);

        let mut fids = Vec::new();
        for feature in layer.features() {
            assert_eq!(feature.field_as_integer64_by_name(SHOT_ID_FIELD).unwrap(), Some(3));
            fids.push(feature.fid());
        }
        assert_ne!(fids[0], fids[1]);
    }

    #[test]
    fn mask_round_trips_as_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots_shot_cover.tif");
        let mask = CoverageMask {
            grid: Grid {
                transform: Affine::north_up(500_000.0, 4_980_000.0, 30.0, 30.0),
                width: 3,
                height: 2,
                crs: UTM.into(),
            },
            data: vec![1, 0, 1, 0, 1, 0],
        };
        GdalBackend.write_mask(&path, &mask).unwrap();

        {
            let ds = Dataset::open(&path).unwrap();
            assert_eq!(ds.raster_size(), (3, 2));
            assert_eq!(ds.geo_transform().unwrap(), mask.grid.transform.to_gdal());

            let rb = ds.rasterband(1).unwrap();
            assert_eq!(rb.no_data_value(), Some(0.0));
            let buffer = rb.read_as::<u8>((0, 0), (3, 2), (3, 2), None).unwrap();
            assert_eq!(buffer.data(), &mask.data[..]);
        }

        let reference = GdalBackend.read_template(&path).unwrap();
        assert_eq!(reference.transform, mask.grid.transform);
        assert!(GdalBackend.is_projected(&reference.crs).unwrap());

        GdalBackend.delete_raster(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn transforms_lon_lat_order() {
        let transformer = GdalBackend.transformer(WGS84, UTM).unwrap();
        let mut xs = vec![-123.0];
        let mut ys = vec![45.0];
        transformer.transform(&mut xs, &mut ys).unwrap();

        // Central meridian of zone 10.
        assert!((xs[0] - 500_000.0).abs() < 1e-3, "easting {}", xs[0]);
        assert!((ys[0] - 4_982_950.4).abs() < 1.0, "northing {}", ys[0]);

        assert!(!GdalBackend.is_projected(WGS84).unwrap());
        assert!(GdalBackend.is_projected(UTM).unwrap());
    }
}
