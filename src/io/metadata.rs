use crate::io::raw_binary::publish_atomically;
use crate::types::{
    AlbersParams, BandRef, CommonGrid, DataType, Extent, Projection, SceneDescriptor, StackError,
    StackResult,
};
use chrono::NaiveDate;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Scene metadata document (ESPA internal format).
/// Every element the reader depends on is optional here so that an absent
/// field surfaces as a named missing-field error rather than a parse failure.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename = "espa_metadata")]
pub struct EspaMetadataDoc {
    #[serde(rename = "@version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_metadata: Option<GlobalMetadataDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands: Option<BandsDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GlobalMetadataDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_information: Option<ProjectionInformationDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProjectionInformationDoc {
    #[serde(rename = "@projection", default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    #[serde(rename = "@datum", default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<String>,
    #[serde(rename = "@units", default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(rename = "corner_point", default)]
    pub corner_points: Vec<CornerPointDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_proj_params: Option<UtmParamsDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub albers_proj_params: Option<AlbersParamsDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CornerPointDoc {
    #[serde(rename = "@location", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "@x", default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(rename = "@y", default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UtmParamsDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_code: Option<i32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AlbersParamsDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_parallel1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_parallel2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_meridian: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_easting: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_northing: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BandsDoc {
    #[serde(rename = "band", default)]
    pub bands: Vec<BandDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BandDoc {
    #[serde(rename = "@product", default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "@category", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "@data_type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(rename = "@nlines", default, skip_serializing_if = "Option::is_none")]
    pub nlines: Option<usize>,
    #[serde(rename = "@nsamps", default, skip_serializing_if = "Option::is_none")]
    pub nsamps: Option<usize>,
    #[serde(rename = "@fill_value", default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<f64>,
    /// Plane index inside a band-sequential file (absent for single-band files)
    #[serde(rename = "@band_index", default, skip_serializing_if = "Option::is_none")]
    pub band_index: Option<usize>,
    #[serde(rename = "@bands_in_file", default, skip_serializing_if = "Option::is_none")]
    pub bands_in_file: Option<usize>,
    /// Comma separated ids of the scenes that contributed pixels
    #[serde(rename = "@contributors", default, skip_serializing_if = "Option::is_none")]
    pub contributors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<PixelSizeDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PixelSizeDoc {
    #[serde(rename = "@x", default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(rename = "@y", default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(rename = "@units", default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// Provenance block of an assembled product
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProvenanceDoc {
    #[serde(rename = "@extent_policy", default, skip_serializing_if = "Option::is_none")]
    pub extent_policy: Option<String>,
    #[serde(rename = "@overlap_priority", default, skip_serializing_if = "Option::is_none")]
    pub overlap_priority: Option<String>,
    #[serde(rename = "source_scene", default)]
    pub scenes: Vec<SourceSceneDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourceSceneDoc {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(rename = "@acquisition_date", default, skip_serializing_if = "Option::is_none")]
    pub acquisition_date: Option<String>,
    #[serde(rename = "@row_offset", default, skip_serializing_if = "Option::is_none")]
    pub row_offset: Option<usize>,
    #[serde(rename = "@col_offset", default, skip_serializing_if = "Option::is_none")]
    pub col_offset: Option<usize>,
    #[serde(rename = "@window_row", default, skip_serializing_if = "Option::is_none")]
    pub window_row: Option<usize>,
    #[serde(rename = "@window_col", default, skip_serializing_if = "Option::is_none")]
    pub window_col: Option<usize>,
    #[serde(rename = "@window_rows", default, skip_serializing_if = "Option::is_none")]
    pub window_rows: Option<usize>,
    #[serde(rename = "@window_cols", default, skip_serializing_if = "Option::is_none")]
    pub window_cols: Option<usize>,
}

/// Persisted result of an extent computation
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename = "extent_report")]
pub struct ExtentReportDoc {
    #[serde(rename = "@policy", default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_information: Option<ProjectionInformationDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<PixelSizeDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<ExtentDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceDoc>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GridDoc {
    #[serde(rename = "@rows", default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(rename = "@cols", default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExtentDoc {
    #[serde(rename = "@min_x", default, skip_serializing_if = "Option::is_none")]
    pub min_x: Option<f64>,
    #[serde(rename = "@max_x", default, skip_serializing_if = "Option::is_none")]
    pub max_x: Option<f64>,
    #[serde(rename = "@min_y", default, skip_serializing_if = "Option::is_none")]
    pub min_y: Option<f64>,
    #[serde(rename = "@max_y", default, skip_serializing_if = "Option::is_none")]
    pub max_y: Option<f64>,
}

impl ProjectionInformationDoc {
    /// Projection block for a grid whose corner points reference pixel corners
    pub fn for_grid(projection: &Projection, grid: &CommonGrid) -> Self {
        let lr_x = grid.origin_x + grid.cols.saturating_sub(1) as f64 * grid.pixel_size_x;
        let lr_y = grid.origin_y - grid.rows.saturating_sub(1) as f64 * grid.pixel_size_y;
        Self {
            projection: Some(projection.name.clone()),
            datum: projection.datum.clone(),
            units: projection.units.clone(),
            corner_points: vec![
                CornerPointDoc {
                    location: Some("UL".to_string()),
                    x: Some(grid.origin_x),
                    y: Some(grid.origin_y),
                },
                CornerPointDoc {
                    location: Some("LR".to_string()),
                    x: Some(lr_x),
                    y: Some(lr_y),
                },
            ],
            grid_origin: Some("UL".to_string()),
            utm_proj_params: projection.utm_zone.map(|zone| UtmParamsDoc {
                zone_code: Some(zone),
            }),
            albers_proj_params: projection.albers.as_ref().map(|aea| AlbersParamsDoc {
                standard_parallel1: Some(aea.standard_parallel1),
                standard_parallel2: Some(aea.standard_parallel2),
                central_meridian: Some(aea.central_meridian),
                origin_latitude: Some(aea.origin_latitude),
                false_easting: Some(aea.false_easting),
                false_northing: Some(aea.false_northing),
            }),
        }
    }

    fn corner(&self, location: &str) -> Option<&CornerPointDoc> {
        self.corner_points.iter().find(|c| {
            c.location
                .as_deref()
                .map_or(false, |l| l.trim().eq_ignore_ascii_case(location))
        })
    }
}

/// Upper-left geometry of a document, as pixel-corner coordinates
struct GridCorner {
    ul_x: f64,
    ul_y: f64,
    /// Offset from the document's corner convention to pixel corners
    shift_x: f64,
    shift_y: f64,
}

/// Converts parsed documents into domain types, tagging failures with the source path
struct DocContext<'a> {
    path: &'a Path,
}

impl<'a> DocContext<'a> {
    fn missing(&self, field: &str) -> StackError {
        StackError::MetadataMissingField {
            path: self.path.to_path_buf(),
            field: field.to_string(),
        }
    }

    fn invalid(&self, message: String) -> StackError {
        StackError::MetadataParse {
            path: self.path.to_path_buf(),
            message,
        }
    }

    fn require<T>(&self, value: Option<T>, field: &str) -> StackResult<T> {
        value.ok_or_else(|| self.missing(field))
    }

    fn projection(&self, info: &ProjectionInformationDoc) -> StackResult<Projection> {
        let name = self.require(
            info.projection.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            "projection_information/@projection",
        )?;

        let utm_zone = match &info.utm_proj_params {
            Some(utm) => Some(self.require(utm.zone_code, "utm_proj_params/zone_code")?),
            None => None,
        };
        if name.eq_ignore_ascii_case("UTM") && utm_zone.is_none() {
            return Err(self.missing("utm_proj_params/zone_code"));
        }

        let albers = match &info.albers_proj_params {
            Some(aea) => Some(AlbersParams {
                standard_parallel1: self.require(aea.standard_parallel1, "albers_proj_params/standard_parallel1")?,
                standard_parallel2: self.require(aea.standard_parallel2, "albers_proj_params/standard_parallel2")?,
                central_meridian: self.require(aea.central_meridian, "albers_proj_params/central_meridian")?,
                origin_latitude: self.require(aea.origin_latitude, "albers_proj_params/origin_latitude")?,
                false_easting: self.require(aea.false_easting, "albers_proj_params/false_easting")?,
                false_northing: self.require(aea.false_northing, "albers_proj_params/false_northing")?,
            }),
            None => None,
        };
        if name.eq_ignore_ascii_case("AEA") && albers.is_none() {
            return Err(self.missing("albers_proj_params"));
        }

        Ok(Projection {
            name: name.to_string(),
            datum: info.datum.clone(),
            units: info.units.clone(),
            utm_zone,
            albers,
        })
    }

    fn corner_xy(&self, info: &ProjectionInformationDoc, location: &str) -> StackResult<(f64, f64)> {
        let field = format!("corner_point[@location='{}']", location);
        let corner = self.require(info.corner(location), &field)?;
        let x = self.require(corner.x, &format!("{}/@x", field))?;
        let y = self.require(corner.y, &format!("{}/@y", field))?;
        Ok((x, y))
    }

    fn grid_corner(
        &self,
        info: &ProjectionInformationDoc,
        pixel_size_x: f64,
        pixel_size_y: f64,
    ) -> StackResult<GridCorner> {
        let (x, y) = self.corner_xy(info, "UL")?;
        let origin = self.require(info.grid_origin.as_deref(), "projection_information/grid_origin")?;
        let (shift_x, shift_y) = match origin.trim().to_uppercase().as_str() {
            "UL" => (0.0, 0.0),
            // Corner points reference pixel centers
            "CENTER" => (-pixel_size_x / 2.0, pixel_size_y / 2.0),
            other => return Err(self.invalid(format!("unsupported grid_origin '{}'", other))),
        };
        Ok(GridCorner {
            ul_x: x + shift_x,
            ul_y: y + shift_y,
            shift_x,
            shift_y,
        })
    }

    fn pixel_size(&self, pixel_size: Option<&PixelSizeDoc>, field: &str) -> StackResult<(f64, f64)> {
        let pixel_size = self.require(pixel_size, field)?;
        let x = self.require(pixel_size.x, &format!("{}/@x", field))?;
        let y = self.require(pixel_size.y, &format!("{}/@y", field))?;
        if !(x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0) {
            return Err(self.invalid(format!("pixel size ({}, {}) must be positive", x, y)));
        }
        Ok((x, y))
    }

    fn band(&self, doc: &BandDoc, index: usize) -> StackResult<(BandRef, (f64, f64))> {
        let name = self.require(doc.name.clone(), &format!("band[{}]/@name", index))?;
        let field = |attr: &str| format!("band[@name='{}']/{}", name, attr);

        let tag = self.require(doc.data_type.as_deref(), &field("@data_type"))?;
        let data_type = DataType::from_tag(tag)
            .ok_or_else(|| self.invalid(format!("band {} has unsupported data_type '{}'", name, tag)))?;
        let rows = self.require(doc.nlines, &field("@nlines"))?;
        let cols = self.require(doc.nsamps, &field("@nsamps"))?;
        let file_name = self.require(
            doc.file_name.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            &field("file_name"),
        )?;
        let pixel_size = self.pixel_size(doc.pixel_size.as_ref(), &field("pixel_size"))?;

        let bands_in_file = doc.bands_in_file.unwrap_or(1).max(1);
        let band_index = doc.band_index.unwrap_or(0);
        if band_index >= bands_in_file {
            return Err(self.invalid(format!(
                "band {} has band_index {} but the file holds {} band(s)",
                name, band_index, bands_in_file
            )));
        }

        let base_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let band = BandRef {
            name,
            data_type,
            fill_value: doc.fill_value,
            path: base_dir.join(file_name),
            rows,
            cols,
            band_index,
            bands_in_file,
        };
        Ok((band, pixel_size))
    }

    fn scene(&self, doc: EspaMetadataDoc) -> StackResult<SceneDescriptor> {
        let global = self.require(doc.global_metadata, "global_metadata")?;
        let info = self.require(
            global.projection_information.as_ref(),
            "global_metadata/projection_information",
        )?;
        let projection = self.projection(info)?;

        let band_docs = self.require(doc.bands, "bands")?.bands;
        if band_docs.is_empty() {
            return Err(self.missing("bands/band"));
        }

        let mut bands: Vec<BandRef> = Vec::with_capacity(band_docs.len());
        let mut pixel_size = None;
        let mut seen = HashSet::new();
        for (index, band_doc) in band_docs.iter().enumerate() {
            let (band, size) = self.band(band_doc, index)?;
            if !seen.insert(band.name.clone()) {
                return Err(self.invalid(format!("band {} is listed twice", band.name)));
            }
            match (pixel_size, bands.first()) {
                (Some((px, py)), Some(first)) => {
                    if !same_size(px, size.0) || !same_size(py, size.1) {
                        return Err(self.invalid(format!(
                            "band {} pixel size ({}, {}) differs from scene pixel size ({}, {})",
                            band.name, size.0, size.1, px, py
                        )));
                    }
                    if band.rows != first.rows || band.cols != first.cols {
                        return Err(self.invalid(format!(
                            "band {} is {}x{} but band {} is {}x{}",
                            band.name, band.rows, band.cols, first.name, first.rows, first.cols
                        )));
                    }
                }
                _ => pixel_size = Some(size),
            }
            bands.push(band);
        }

        let (pixel_size_x, pixel_size_y) = pixel_size.ok_or_else(|| self.missing("bands/band"))?;
        let rows = bands[0].rows;
        let cols = bands[0].cols;
        let corner = self.grid_corner(info, pixel_size_x, pixel_size_y)?;
        self.check_lower_right(info, &corner, pixel_size_x, pixel_size_y, rows, cols);

        let acquisition_date = match global.acquisition_date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => Some(
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|e| self.invalid(format!("invalid acquisition_date '{}': {}", date, e)))?,
            ),
            _ => None,
        };

        let id = match global.product_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self
                .path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| self.missing("global_metadata/product_id"))?,
        };

        Ok(SceneDescriptor {
            id,
            metadata_path: self.path.to_path_buf(),
            projection,
            ul_x: corner.ul_x,
            ul_y: corner.ul_y,
            pixel_size_x,
            pixel_size_y,
            rows,
            cols,
            acquisition_date,
            satellite: global.satellite,
            instrument: global.instrument,
            bands,
        })
    }

    /// A lower-right corner that disagrees with the dimensions is suspicious but not fatal
    fn check_lower_right(
        &self,
        info: &ProjectionInformationDoc,
        corner: &GridCorner,
        pixel_size_x: f64,
        pixel_size_y: f64,
        rows: usize,
        cols: usize,
    ) {
        let Ok((lr_x, lr_y)) = self.corner_xy(info, "LR") else {
            log::debug!("No LR corner in {}", self.path.display());
            return;
        };
        let expected_x = corner.ul_x - corner.shift_x + cols.saturating_sub(1) as f64 * pixel_size_x;
        let expected_y = corner.ul_y - corner.shift_y - rows.saturating_sub(1) as f64 * pixel_size_y;
        if (lr_x - expected_x).abs() > pixel_size_x / 2.0 || (lr_y - expected_y).abs() > pixel_size_y / 2.0 {
            log::warn!(
                "LR corner ({}, {}) in {} disagrees with the {}x{} grid (expected ({}, {}))",
                lr_x,
                lr_y,
                self.path.display(),
                rows,
                cols,
                expected_x,
                expected_y
            );
        }
    }
}

fn same_size(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Parsed extent report, see [`MetadataWriter::write_extent_report`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentReportData {
    pub policy: Option<String>,
    pub projection: Projection,
    pub grid: CommonGrid,
    pub extent: Extent,
    pub scene_ids: Vec<String>,
}

/// Reader for scene metadata documents
pub struct MetadataReader;

impl MetadataReader {
    /// Read one scene's metadata document
    pub fn read_scene<P: AsRef<Path>>(path: P) -> StackResult<SceneDescriptor> {
        let path = path.as_ref();
        log::info!("Reading scene metadata: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| StackError::MetadataIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let scene = Self::parse_scene(&content, path)?;

        log::debug!(
            "Scene {}: {}x{} pixels of {}x{} at ({}, {}), {} band(s)",
            scene.id,
            scene.rows,
            scene.cols,
            scene.pixel_size_x,
            scene.pixel_size_y,
            scene.ul_x,
            scene.ul_y,
            scene.bands.len()
        );
        Ok(scene)
    }

    /// Parse metadata XML; `path` names the document and anchors relative band file names
    pub fn parse_scene(xml_content: &str, path: &Path) -> StackResult<SceneDescriptor> {
        let doc = from_str::<EspaMetadataDoc>(xml_content).map_err(|e| StackError::MetadataParse {
            path: path.to_path_buf(),
            message: format!("Failed to parse metadata XML: {}", e),
        })?;
        DocContext { path }.scene(doc)
    }

    /// Read several scenes; scene ids must be unique within a run
    pub fn read_scenes<P: AsRef<Path>>(paths: &[P]) -> StackResult<Vec<SceneDescriptor>> {
        if paths.is_empty() {
            return Err(StackError::Config("No input scenes given".to_string()));
        }

        let mut scenes = Vec::with_capacity(paths.len());
        let mut ids = HashSet::new();
        for path in paths {
            let scene = Self::read_scene(path)?;
            if !ids.insert(scene.id.clone()) {
                return Err(StackError::Config(format!(
                    "Scene id {} appears more than once ({})",
                    scene.id,
                    scene.metadata_path.display()
                )));
            }
            scenes.push(scene);
        }

        log::info!("Read metadata for {} scenes", scenes.len());
        Ok(scenes)
    }

    /// Read a list file naming one metadata document per line.
    /// Blank lines and `#` comments are skipped; relative paths are anchored at the list's directory.
    pub fn read_scene_list<P: AsRef<Path>>(list_path: P) -> StackResult<Vec<PathBuf>> {
        let list_path = list_path.as_ref();
        let content = std::fs::read_to_string(list_path).map_err(|e| StackError::MetadataIo {
            path: list_path.to_path_buf(),
            source: e,
        })?;
        let base_dir = list_path.parent().unwrap_or_else(|| Path::new("."));

        let paths: Vec<PathBuf> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| base_dir.join(line))
            .collect();

        if paths.is_empty() {
            return Err(StackError::Config(format!(
                "Scene list {} names no scenes",
                list_path.display()
            )));
        }

        log::info!("Scene list {} names {} scenes", list_path.display(), paths.len());
        Ok(paths)
    }

    /// Read an extent report written by [`MetadataWriter::write_extent_report`]
    pub fn read_extent_report<P: AsRef<Path>>(path: P) -> StackResult<ExtentReportData> {
        let path = path.as_ref();
        log::info!("Reading extent report: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| StackError::MetadataIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let doc = from_str::<ExtentReportDoc>(&content).map_err(|e| StackError::MetadataParse {
            path: path.to_path_buf(),
            message: format!("Failed to parse extent report: {}", e),
        })?;

        let ctx = DocContext { path };
        let info = ctx.require(doc.projection_information.as_ref(), "projection_information")?;
        let projection = ctx.projection(info)?;
        let (pixel_size_x, pixel_size_y) = ctx.pixel_size(doc.pixel_size.as_ref(), "pixel_size")?;
        let corner = ctx.grid_corner(info, pixel_size_x, pixel_size_y)?;
        let grid_doc = ctx.require(doc.grid.as_ref(), "grid")?;
        let grid = CommonGrid {
            origin_x: corner.ul_x,
            origin_y: corner.ul_y,
            pixel_size_x,
            pixel_size_y,
            rows: ctx.require(grid_doc.rows, "grid/@rows")?,
            cols: ctx.require(grid_doc.cols, "grid/@cols")?,
        };
        let extent = match &doc.extent {
            Some(e) => Extent {
                min_x: ctx.require(e.min_x, "extent/@min_x")?,
                max_x: ctx.require(e.max_x, "extent/@max_x")?,
                min_y: ctx.require(e.min_y, "extent/@min_y")?,
                max_y: ctx.require(e.max_y, "extent/@max_y")?,
            },
            None => grid.extent(),
        };
        let scene_ids = doc
            .provenance
            .map(|p| p.scenes.into_iter().filter_map(|s| s.id).collect())
            .unwrap_or_default();

        Ok(ExtentReportData {
            policy: doc.policy,
            projection,
            grid,
            extent,
            scene_ids,
        })
    }
}

/// Writer for product metadata documents and extent reports
pub struct MetadataWriter;

impl MetadataWriter {
    /// Serialize a metadata document and publish it atomically
    pub fn write_document<P: AsRef<Path>>(path: P, doc: &EspaMetadataDoc) -> StackResult<()> {
        Self::write_xml(path.as_ref(), doc)
    }

    /// Serialize an extent report and publish it atomically
    pub fn write_extent_report<P: AsRef<Path>>(path: P, doc: &ExtentReportDoc) -> StackResult<()> {
        Self::write_xml(path.as_ref(), doc)
    }

    fn write_xml<T: Serialize>(path: &Path, doc: &T) -> StackResult<()> {
        let body = quick_xml::se::to_string(doc).map_err(|e| StackError::MetadataWrite {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        log::debug!("Writing metadata document {}", path.display());
        publish_atomically(path, |writer| {
            writer.write_all(XML_DECLARATION.as_bytes())?;
            writer.write_all(body.as_bytes())?;
            writer.write_all(b"\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<espa_metadata version="2.0" xmlns="http://espa.cr.usgs.gov/v2">
    <global_metadata>
        <data_provider>USGS/EROS</data_provider>
        <satellite>LANDSAT_8</satellite>
        <instrument>OLI_TIRS</instrument>
        <acquisition_date>2014-05-01</acquisition_date>
        <product_id>LC08_L1TP_034033_20140501</product_id>
        <projection_information projection="UTM" datum="WGS84" units="meters">
            <corner_point location="UL" x="300015.000000" y="4000005.000000"/>
            <corner_point location="LR" x="300075.000000" y="3999975.000000"/>
            <grid_origin>CENTER</grid_origin>
            <utm_proj_params>
                <zone_code>13</zone_code>
            </utm_proj_params>
        </projection_information>
    </global_metadata>
    <bands>
        <band product="sr_refl" name="sr_band1" category="image" data_type="INT16" nlines="2" nsamps="3" fill_value="-9999">
            <short_name>LC8SRB1</short_name>
            <long_name>band 1 surface reflectance</long_name>
            <file_name>scene_sr_band1.img</file_name>
            <pixel_size x="30" y="30" units="meters"/>
        </band>
        <band product="level1" name="bqa" category="qa" data_type="UINT16" nlines="2" nsamps="3">
            <file_name>scene_bqa.img</file_name>
            <pixel_size x="30" y="30" units="meters"/>
        </band>
    </bands>
</espa_metadata>"#;

    #[test]
    fn test_parse_center_origin_scene() {
        let scene = MetadataReader::parse_scene(SCENE_XML, Path::new("/data/scene.xml")).unwrap();

        assert_eq!(scene.id, "LC08_L1TP_034033_20140501");
        assert_eq!(scene.projection.utm_zone, Some(13));
        // Pixel-center corner shifted half a pixel up-left
        assert_eq!(scene.ul_x, 300000.0);
        assert_eq!(scene.ul_y, 4000020.0);
        assert_eq!((scene.rows, scene.cols), (2, 3));
        assert_eq!(scene.acquisition_date, NaiveDate::from_ymd_opt(2014, 5, 1));
        assert_eq!(scene.bands.len(), 2);
        assert_eq!(scene.bands[0].path, PathBuf::from("/data/scene_sr_band1.img"));
        assert_eq!(scene.bands[0].fill_value, Some(-9999.0));
        assert_eq!(scene.bands[1].data_type, DataType::UInt16);
        assert_eq!(scene.bands[1].fill_value, None);
    }

    #[test]
    fn test_missing_grid_origin_is_named() {
        let xml = SCENE_XML.replace("<grid_origin>CENTER</grid_origin>", "");
        let err = MetadataReader::parse_scene(&xml, Path::new("scene.xml")).unwrap_err();
        match err {
            StackError::MetadataMissingField { field, .. } => {
                assert_eq!(field, "projection_information/grid_origin")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_band_grid_disagreement_is_parse_error() {
        let xml = SCENE_XML.replace(
            r#"name="bqa" category="qa" data_type="UINT16" nlines="2""#,
            r#"name="bqa" category="qa" data_type="UINT16" nlines="4""#,
        );
        let err = MetadataReader::parse_scene(&xml, Path::new("scene.xml")).unwrap_err();
        assert!(matches!(err, StackError::MetadataParse { .. }));
    }

    #[test]
    fn test_product_document_round_trip() {
        let projection = Projection {
            name: "UTM".to_string(),
            datum: Some("WGS84".to_string()),
            units: Some("meters".to_string()),
            utm_zone: Some(13),
            albers: None,
        };
        let grid = CommonGrid {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_size_x: 30.0,
            pixel_size_y: 30.0,
            rows: 3,
            cols: 3,
        };
        let doc = EspaMetadataDoc {
            version: Some("2.0".to_string()),
            global_metadata: Some(GlobalMetadataDoc {
                product_id: Some("stack".to_string()),
                projection_information: Some(ProjectionInformationDoc::for_grid(&projection, &grid)),
                ..Default::default()
            }),
            bands: Some(BandsDoc {
                bands: vec![BandDoc {
                    name: Some("sr_band1".to_string()),
                    data_type: Some("INT16".to_string()),
                    nlines: Some(3),
                    nsamps: Some(3),
                    fill_value: Some(-9999.0),
                    file_name: Some("stack_sr_band1.img".to_string()),
                    pixel_size: Some(PixelSizeDoc {
                        x: Some(30.0),
                        y: Some(30.0),
                        units: Some("meters".to_string()),
                    }),
                    ..Default::default()
                }],
            }),
            provenance: None,
        };

        let xml = quick_xml::se::to_string(&doc).unwrap();
        let scene = MetadataReader::parse_scene(&xml, Path::new("/out/stack.xml")).unwrap();
        assert_eq!(scene.id, "stack");
        assert_eq!((scene.ul_x, scene.ul_y), (0.0, 0.0));
        assert_eq!((scene.rows, scene.cols), (3, 3));
        assert_eq!(scene.projection, projection);
    }
}
