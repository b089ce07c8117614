use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pixel data types a raw band file may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one pixel in bytes
    pub fn size_of(self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// ENVI header `data type` code
    pub fn envi_code(self) -> u8 {
        match self {
            DataType::UInt8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 3,
            DataType::Float32 => 4,
            DataType::Float64 => 5,
            DataType::UInt16 => 12,
            DataType::UInt32 => 13,
        }
    }

    /// Parse the `data_type` tag used in scene metadata documents
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_uppercase().as_str() {
            "UINT8" => Some(DataType::UInt8),
            "INT16" => Some(DataType::Int16),
            "UINT16" => Some(DataType::UInt16),
            "INT32" => Some(DataType::Int32),
            "UINT32" => Some(DataType::UInt32),
            "FLOAT32" => Some(DataType::Float32),
            "FLOAT64" => Some(DataType::Float64),
            _ => None,
        }
    }

    /// Largest value of an unsigned integer type, the usual no-data value of QA bands
    pub fn unsigned_max(self) -> Option<f64> {
        match self {
            DataType::UInt8 => Some(u8::MAX as f64),
            DataType::UInt16 => Some(u16::MAX as f64),
            DataType::UInt32 => Some(u32::MAX as f64),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            DataType::UInt8 => "UINT8",
            DataType::Int16 => "INT16",
            DataType::UInt16 => "UINT16",
            DataType::Int32 => "INT32",
            DataType::UInt32 => "UINT32",
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Albers Equal Area projection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbersParams {
    pub standard_parallel1: f64,
    pub standard_parallel2: f64,
    pub central_meridian: f64,
    pub origin_latitude: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// Map projection of a scene grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Projection name as declared by the metadata (UTM, AEA, PS, GEO)
    pub name: String,
    pub datum: Option<String>,
    pub units: Option<String>,
    /// UTM zone; negative for the southern hemisphere
    pub utm_zone: Option<i32>,
    pub albers: Option<AlbersParams>,
}

impl Projection {
    /// Canonical identifier; two grids are in the same projection iff their identifiers match
    pub fn identifier(&self) -> String {
        let mut id = self.name.to_uppercase();
        if let Some(datum) = &self.datum {
            id.push('|');
            id.push_str(&datum.to_uppercase());
        }
        if let Some(units) = &self.units {
            id.push('|');
            id.push_str(&units.to_lowercase());
        }
        if let Some(zone) = self.utm_zone {
            id.push_str(&format!("|zone={}", zone));
        }
        if let Some(aea) = &self.albers {
            id.push_str(&format!(
                "|sp1={},sp2={},cm={},lat0={},fe={},fn={}",
                aea.standard_parallel1,
                aea.standard_parallel2,
                aea.central_meridian,
                aea.origin_latitude,
                aea.false_easting,
                aea.false_northing
            ));
        }
        id
    }
}

/// Reference to one band's raw binary file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandRef {
    pub name: String,
    pub data_type: DataType,
    /// No-data value; `None` when the metadata declares none
    pub fill_value: Option<f64>,
    pub path: PathBuf,
    pub rows: usize,
    pub cols: usize,
    /// Position of this band inside a band-sequential file
    pub band_index: usize,
    /// Number of bands stored back to back in `path`
    pub bands_in_file: usize,
}

impl BandRef {
    /// Bytes occupied by one band plane
    pub fn plane_bytes(&self) -> u64 {
        (self.rows as u64) * (self.cols as u64) * (self.data_type.size_of() as u64)
    }
}

/// One input scene as described by its metadata document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub id: String,
    pub metadata_path: PathBuf,
    pub projection: Projection,
    /// Upper-left corner of the upper-left pixel, projected units
    pub ul_x: f64,
    pub ul_y: f64,
    /// Pixel size magnitudes; y grows downwards
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub rows: usize,
    pub cols: usize,
    pub acquisition_date: Option<NaiveDate>,
    pub satellite: Option<String>,
    pub instrument: Option<String>,
    pub bands: Vec<BandRef>,
}

impl SceneDescriptor {
    pub fn extent(&self) -> Extent {
        Extent {
            min_x: self.ul_x,
            max_x: self.ul_x + self.cols as f64 * self.pixel_size_x,
            min_y: self.ul_y - self.rows as f64 * self.pixel_size_y,
            max_y: self.ul_y,
        }
    }

    pub fn band(&self, name: &str) -> Option<&BandRef> {
        self.bands.iter().find(|b| b.name == name)
    }
}

/// Bounding rectangle in projected coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Overlapping rectangle, `None` when the two only touch or are disjoint
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let result = Extent {
            min_x: self.min_x.max(other.min_x),
            max_x: self.max_x.min(other.max_x),
            min_y: self.min_y.max(other.min_y),
            max_y: self.max_y.min(other.max_y),
        };
        if result.width() > 0.0 && result.height() > 0.0 {
            Some(result)
        } else {
            None
        }
    }
}

/// Reconciled output geometry shared by every assembled band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommonGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub rows: usize,
    pub cols: usize,
}

impl CommonGrid {
    /// Area actually covered by the grid's pixels
    pub fn extent(&self) -> Extent {
        Extent {
            min_x: self.origin_x,
            max_x: self.origin_x + self.cols as f64 * self.pixel_size_x,
            min_y: self.origin_y - self.rows as f64 * self.pixel_size_y,
            max_y: self.origin_y,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }
}

/// Location of a scene's first placed pixel inside the common grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SceneOffset {
    pub row: usize,
    pub col: usize,
}

/// Region of a scene's own raster that lands on the common grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceWindow {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

/// Where and what part of one scene is placed on the common grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePlacement {
    pub scene_id: String,
    pub offset: SceneOffset,
    pub window: SourceWindow,
}

impl ScenePlacement {
    /// True when the whole scene lands on the grid
    pub fn is_complete(&self, scene: &SceneDescriptor) -> bool {
        self.window.row == 0
            && self.window.col == 0
            && self.window.rows == scene.rows
            && self.window.cols == scene.cols
    }
}

/// Error types for extent reconciliation and stack assembly
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Metadata parse error in {}: {message}", .path.display())]
    MetadataParse { path: PathBuf, message: String },

    #[error("Metadata field `{field}` missing in {}", .path.display())]
    MetadataMissingField { path: PathBuf, field: String },

    #[error("Cannot read metadata {}: {source}", .path.display())]
    MetadataIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write metadata {}: {message}", .path.display())]
    MetadataWrite { path: PathBuf, message: String },

    #[error("Inconsistent grid for scene {scene}: {message}")]
    InconsistentGrid { scene: String, message: String },

    #[error("Scene {scene} is misaligned with the common grid: {axis} offset {offset:.6} pixels is not an integer")]
    MisalignedScene {
        scene: String,
        axis: &'static str,
        offset: f64,
    },

    #[error(
        "Region of {rows}x{cols} pixels at row {row}, col {col} exceeds {band_rows}x{band_cols} raster {}",
        .path.display()
    )]
    RegionOutOfBounds {
        path: PathBuf,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
        band_rows: usize,
        band_cols: usize,
    },

    #[error("Type mismatch for {}: {message}", .path.display())]
    TypeMismatch { path: PathBuf, message: String },

    #[error("Raster I/O error on {}: {source}", .path.display())]
    RasterIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Band {band} not found in scene {scene}")]
    BandNotFound { scene: String, band: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scene {scene}, band {band}: {source}")]
    Band {
        scene: String,
        band: String,
        #[source]
        source: Box<StackError>,
    },
}

impl StackError {
    /// Attach scene/band context to an error raised while handling one band
    pub fn in_band(self, scene: &str, band: &str) -> Self {
        StackError::Band {
            scene: scene.to_string(),
            band: band.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping scene/band context wrappers
    pub fn root(&self) -> &StackError {
        match self {
            StackError::Band { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for stacking operations
pub type StackResult<T> = Result<T, StackError>;
