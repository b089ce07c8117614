#![allow(dead_code)]

use scenestack::{BandRef, DataType, Projection, SceneDescriptor};
use std::path::{Path, PathBuf};

pub const PIXEL: f64 = 30.0;
pub const FILL: i16 = -9999;

/// A small INT16 scene on a 30 m UTM zone 13 grid
pub struct TestScene<'a> {
    pub id: &'a str,
    pub ul_x: f64,
    pub ul_y: f64,
    pub rows: usize,
    pub cols: usize,
    pub date: Option<&'a str>,
    pub bands: Vec<TestBand<'a>>,
}

/// Raw pixels of one fixture band
pub struct TestBand<'a> {
    pub name: &'a str,
    pub data_type: &'a str,
    pub fill_value: Option<f64>,
    pub bytes: Vec<u8>,
}

impl<'a> TestScene<'a> {
    pub fn new(id: &'a str, ul_x: f64, ul_y: f64, rows: usize, cols: usize) -> Self {
        Self {
            id,
            ul_x,
            ul_y,
            rows,
            cols,
            date: None,
            bands: Vec::new(),
        }
    }

    pub fn dated(mut self, date: &'a str) -> Self {
        self.date = Some(date);
        self
    }

    pub fn band(mut self, name: &'a str, pixels: Vec<i16>) -> Self {
        assert_eq!(pixels.len(), self.rows * self.cols, "band {} has the wrong pixel count", name);
        self.bands.push(TestBand {
            name,
            data_type: "INT16",
            fill_value: Some(FILL as f64),
            bytes: pixels.iter().flat_map(|v| v.to_le_bytes()).collect(),
        });
        self
    }

    /// UINT8 band without a declared fill value, like an ESPA QA band
    pub fn qa_band(mut self, name: &'a str, pixels: Vec<u8>) -> Self {
        assert_eq!(pixels.len(), self.rows * self.cols, "band {} has the wrong pixel count", name);
        self.bands.push(TestBand {
            name,
            data_type: "UINT8",
            fill_value: None,
            bytes: pixels,
        });
        self
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write the scene's band files and metadata document into `dir`, returning the document path
pub fn write_scene(dir: &Path, scene: &TestScene) -> PathBuf {
    let mut band_xml = String::new();
    for band in &scene.bands {
        let name = band.name;
        let file_name = format!("{}_{}.img", scene.id, name);
        std::fs::write(dir.join(&file_name), &band.bytes).expect("Failed to write band file");

        let fill = band
            .fill_value
            .map(|v| format!(r#" fill_value="{}""#, v))
            .unwrap_or_default();
        band_xml.push_str(&format!(
            r#"        <band product="sr_refl" name="{name}" category="image" data_type="{data_type}" nlines="{rows}" nsamps="{cols}"{fill}>
            <short_name>{name}</short_name>
            <long_name>{name} surface reflectance</long_name>
            <file_name>{file_name}</file_name>
            <pixel_size x="{px}" y="{px}" units="meters"/>
        </band>
"#,
            name = name,
            data_type = band.data_type,
            rows = scene.rows,
            cols = scene.cols,
            fill = fill,
            file_name = file_name,
            px = PIXEL,
        ));
    }

    let date = scene
        .date
        .map(|d| format!("        <acquisition_date>{}</acquisition_date>\n", d))
        .unwrap_or_default();
    let lr_x = scene.ul_x + (scene.cols - 1) as f64 * PIXEL;
    let lr_y = scene.ul_y - (scene.rows - 1) as f64 * PIXEL;

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<espa_metadata version="2.0">
    <global_metadata>
        <data_provider>USGS/EROS</data_provider>
        <satellite>LANDSAT_8</satellite>
        <instrument>OLI_TIRS</instrument>
{date}        <product_id>{id}</product_id>
        <projection_information projection="UTM" datum="WGS84" units="meters">
            <corner_point location="UL" x="{ul_x}" y="{ul_y}"/>
            <corner_point location="LR" x="{lr_x}" y="{lr_y}"/>
            <grid_origin>UL</grid_origin>
            <utm_proj_params>
                <zone_code>13</zone_code>
            </utm_proj_params>
        </projection_information>
    </global_metadata>
    <bands>
{bands}    </bands>
</espa_metadata>
"#,
        date = date,
        id = scene.id,
        ul_x = scene.ul_x,
        ul_y = scene.ul_y,
        lr_x = lr_x,
        lr_y = lr_y,
        bands = band_xml,
    );

    let path = dir.join(format!("{}.xml", scene.id));
    std::fs::write(&path, xml).expect("Failed to write metadata document");
    path
}

pub fn utm13() -> Projection {
    Projection {
        name: "UTM".to_string(),
        datum: Some("WGS84".to_string()),
        units: Some("meters".to_string()),
        utm_zone: Some(13),
        albers: None,
    }
}

/// In-memory descriptor with one INT16 band and no files behind it
pub fn descriptor(id: &str, ul_x: f64, ul_y: f64, rows: usize, cols: usize) -> SceneDescriptor {
    SceneDescriptor {
        id: id.to_string(),
        metadata_path: PathBuf::from(format!("{}.xml", id)),
        projection: utm13(),
        ul_x,
        ul_y,
        pixel_size_x: PIXEL,
        pixel_size_y: PIXEL,
        rows,
        cols,
        acquisition_date: None,
        satellite: None,
        instrument: None,
        bands: vec![BandRef {
            name: "sr_band1".to_string(),
            data_type: DataType::Int16,
            fill_value: Some(FILL as f64),
            path: PathBuf::from(format!("{}_sr_band1.img", id)),
            rows,
            cols,
            band_index: 0,
            bands_in_file: 1,
        }],
    }
}

/// Decode a raw little-endian INT16 file
pub fn read_i16(path: &Path) -> Vec<i16> {
    let bytes = std::fs::read(path).expect("Failed to read raw file");
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
