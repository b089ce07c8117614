use crate::types::{AlbersParams, BandRef, DataType, SourceWindow, StackError, StackResult};
use ndarray::Array2;
use num_traits::NumCast;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A pixel type that can be stored in a raw little-endian band file
pub trait RasterElement: Copy + PartialEq + Send + Sync + NumCast + std::fmt::Debug + 'static {
    const DATA_TYPE: DataType;

    fn decode_le(bytes: &[u8]) -> Self;

    fn encode_le(self, out: &mut Vec<u8>);

    fn into_buffer(pixels: Array2<Self>) -> RasterBuffer;

    fn from_buffer(buffer: RasterBuffer) -> Option<Array2<Self>>;
}

macro_rules! raster_element {
    ($t:ty, $variant:ident) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = DataType::$variant;

            fn decode_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn encode_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn into_buffer(pixels: Array2<Self>) -> RasterBuffer {
                RasterBuffer::$variant(pixels)
            }

            fn from_buffer(buffer: RasterBuffer) -> Option<Array2<Self>> {
                match buffer {
                    RasterBuffer::$variant(pixels) => Some(pixels),
                    _ => None,
                }
            }
        }
    };
}

raster_element!(u8, UInt8);
raster_element!(i16, Int16);
raster_element!(u16, UInt16);
raster_element!(i32, Int32);
raster_element!(u32, UInt32);
raster_element!(f32, Float32);
raster_element!(f64, Float64);

/// Typed, row-major pixel buffer of one band
#[derive(Debug, Clone, PartialEq)]
pub enum RasterBuffer {
    UInt8(Array2<u8>),
    Int16(Array2<i16>),
    UInt16(Array2<u16>),
    Int32(Array2<i32>),
    UInt32(Array2<u32>),
    Float32(Array2<f32>),
    Float64(Array2<f64>),
}

macro_rules! with_pixels {
    ($buffer:expr, $pixels:ident => $body:expr) => {
        match $buffer {
            RasterBuffer::UInt8($pixels) => $body,
            RasterBuffer::Int16($pixels) => $body,
            RasterBuffer::UInt16($pixels) => $body,
            RasterBuffer::Int32($pixels) => $body,
            RasterBuffer::UInt32($pixels) => $body,
            RasterBuffer::Float32($pixels) => $body,
            RasterBuffer::Float64($pixels) => $body,
        }
    };
}

impl RasterBuffer {
    pub fn data_type(&self) -> DataType {
        match self {
            RasterBuffer::UInt8(_) => DataType::UInt8,
            RasterBuffer::Int16(_) => DataType::Int16,
            RasterBuffer::UInt16(_) => DataType::UInt16,
            RasterBuffer::Int32(_) => DataType::Int32,
            RasterBuffer::UInt32(_) => DataType::UInt32,
            RasterBuffer::Float32(_) => DataType::Float32,
            RasterBuffer::Float64(_) => DataType::Float64,
        }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        with_pixels!(self, pixels => pixels.dim())
    }

    fn decode(data_type: DataType, rows: usize, cols: usize, bytes: &[u8]) -> StackResult<Self> {
        Ok(match data_type {
            DataType::UInt8 => RasterBuffer::UInt8(decode_pixels(rows, cols, bytes)?),
            DataType::Int16 => RasterBuffer::Int16(decode_pixels(rows, cols, bytes)?),
            DataType::UInt16 => RasterBuffer::UInt16(decode_pixels(rows, cols, bytes)?),
            DataType::Int32 => RasterBuffer::Int32(decode_pixels(rows, cols, bytes)?),
            DataType::UInt32 => RasterBuffer::UInt32(decode_pixels(rows, cols, bytes)?),
            DataType::Float32 => RasterBuffer::Float32(decode_pixels(rows, cols, bytes)?),
            DataType::Float64 => RasterBuffer::Float64(decode_pixels(rows, cols, bytes)?),
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        with_pixels!(self, pixels => encode_pixels(pixels, writer))
    }
}

/// Convert a fill value into a pixel type, failing when it does not fit
pub fn cast_fill<T: RasterElement>(fill: f64, data_type: DataType) -> StackResult<T> {
    <T as NumCast>::from(fill).ok_or_else(|| {
        StackError::Config(format!("Fill value {} cannot be represented as {}", fill, data_type))
    })
}

/// Whether `fill` can be stored in pixels of `data_type`
pub fn fill_fits(fill: f64, data_type: DataType) -> bool {
    match data_type {
        DataType::UInt8 => cast_fill::<u8>(fill, data_type).is_ok(),
        DataType::Int16 => cast_fill::<i16>(fill, data_type).is_ok(),
        DataType::UInt16 => cast_fill::<u16>(fill, data_type).is_ok(),
        DataType::Int32 => cast_fill::<i32>(fill, data_type).is_ok(),
        DataType::UInt32 => cast_fill::<u32>(fill, data_type).is_ok(),
        DataType::Float32 => cast_fill::<f32>(fill, data_type).is_ok(),
        DataType::Float64 => cast_fill::<f64>(fill, data_type).is_ok(),
    }
}

fn decode_pixels<T: RasterElement>(rows: usize, cols: usize, bytes: &[u8]) -> StackResult<Array2<T>> {
    let size = T::DATA_TYPE.size_of();
    let pixels: Vec<T> = bytes.chunks_exact(size).map(T::decode_le).collect();
    Array2::from_shape_vec((rows, cols), pixels)
        .map_err(|e| StackError::Config(format!("Failed to shape decoded pixels: {}", e)))
}

fn encode_pixels<T: RasterElement, W: Write>(pixels: &Array2<T>, writer: &mut W) -> std::io::Result<()> {
    let mut line = Vec::with_capacity(pixels.ncols() * T::DATA_TYPE.size_of());
    for row in pixels.rows() {
        line.clear();
        for &value in row.iter() {
            value.encode_le(&mut line);
        }
        writer.write_all(&line)?;
    }
    Ok(())
}

fn raster_io(path: &Path) -> impl Fn(std::io::Error) -> StackError + '_ {
    move |source| StackError::RasterIo {
        path: path.to_path_buf(),
        source,
    }
}

/// Write through a temporary file in the destination directory, then rename into place.
/// Nothing is ever visible at `path` unless the write completed.
pub(crate) fn publish_atomically<F>(path: &Path, write: F) -> StackResult<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let temp = NamedTempFile::new_in(&dir).map_err(raster_io(path))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer).map_err(raster_io(path))?;
        writer.flush().map_err(raster_io(path))?;
    }
    temp.as_file().sync_all().map_err(raster_io(path))?;
    temp.persist(path).map_err(|e| StackError::RasterIo {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Reader for flat, row-major band files
pub struct RawRasterReader;

impl RawRasterReader {
    /// Read a rectangular region of a band into a buffer of the band's data type
    pub fn read_region(
        band: &BandRef,
        row_offset: usize,
        col_offset: usize,
        row_count: usize,
        col_count: usize,
    ) -> StackResult<RasterBuffer> {
        let out_of_bounds = || StackError::RegionOutOfBounds {
            path: band.path.clone(),
            row: row_offset,
            col: col_offset,
            rows: row_count,
            cols: col_count,
            band_rows: band.rows,
            band_cols: band.cols,
        };
        let row_end = row_offset.checked_add(row_count).ok_or_else(out_of_bounds)?;
        let col_end = col_offset.checked_add(col_count).ok_or_else(out_of_bounds)?;
        if row_end > band.rows || col_end > band.cols {
            return Err(out_of_bounds());
        }

        Self::check_file_size(band)?;

        log::debug!(
            "Reading {}x{} region at ({}, {}) from {}",
            row_count,
            col_count,
            row_offset,
            col_offset,
            band.path.display()
        );

        let size = band.data_type.size_of();
        let mut bytes = vec![0u8; row_count * col_count * size];
        if !bytes.is_empty() {
            let file = File::open(&band.path).map_err(raster_io(&band.path))?;
            let mut reader = BufReader::new(file);
            let plane_start = band.band_index as u64 * band.plane_bytes();
            let row_bytes = col_count * size;

            if col_offset == 0 && col_count == band.cols {
                // Full-width rows are contiguous on disk
                let start = plane_start + (row_offset * band.cols * size) as u64;
                reader.seek(SeekFrom::Start(start)).map_err(raster_io(&band.path))?;
                reader.read_exact(&mut bytes).map_err(raster_io(&band.path))?;
            } else {
                for (r, chunk) in bytes.chunks_exact_mut(row_bytes).enumerate() {
                    let start = plane_start + (((row_offset + r) * band.cols + col_offset) * size) as u64;
                    reader.seek(SeekFrom::Start(start)).map_err(raster_io(&band.path))?;
                    reader.read_exact(chunk).map_err(raster_io(&band.path))?;
                }
            }
        }

        RasterBuffer::decode(band.data_type, row_count, col_count, &bytes)
    }

    /// Read the part of a band described by a source window
    pub fn read_window(band: &BandRef, window: &SourceWindow) -> StackResult<RasterBuffer> {
        Self::read_region(band, window.row, window.col, window.rows, window.cols)
    }

    /// Read the whole band
    pub fn read_band(band: &BandRef) -> StackResult<RasterBuffer> {
        Self::read_region(band, 0, 0, band.rows, band.cols)
    }

    /// The file must hold exactly `bands_in_file` planes of the declared type and dimensions
    fn check_file_size(band: &BandRef) -> StackResult<()> {
        let actual = std::fs::metadata(&band.path)
            .map_err(raster_io(&band.path))?
            .len();
        let expected = band.plane_bytes() * band.bands_in_file.max(1) as u64;
        if actual != expected {
            return Err(StackError::TypeMismatch {
                path: band.path.clone(),
                message: format!(
                    "file holds {} bytes but {} band(s) of {}x{} {} need {} bytes",
                    actual,
                    band.bands_in_file.max(1),
                    band.rows,
                    band.cols,
                    band.data_type,
                    expected
                ),
            });
        }
        Ok(())
    }
}

/// Writer for raw band files and their ENVI headers
pub struct RawRasterWriter;

impl RawRasterWriter {
    /// Write a buffer as a new raw band file of exactly rows x cols x sizeof(type) bytes
    pub fn write_band<P: AsRef<Path>>(
        output_path: P,
        buffer: &RasterBuffer,
        data_type: DataType,
        row_count: usize,
        col_count: usize,
    ) -> StackResult<()> {
        let path = output_path.as_ref();
        Self::check_buffer(path, buffer, data_type, row_count, col_count)?;

        log::debug!(
            "Writing {}x{} {} band to {}",
            row_count,
            col_count,
            data_type,
            path.display()
        );
        publish_atomically(path, |writer| buffer.write_to(writer))
    }

    /// Concatenate same-sized single-band files into one band-sequential file
    pub fn concatenate_bands<P: AsRef<Path>>(output_path: P, parts: &[PathBuf]) -> StackResult<()> {
        let path = output_path.as_ref();
        log::debug!("Concatenating {} bands into {}", parts.len(), path.display());
        publish_atomically(path, |writer| {
            for part in parts {
                let mut input = File::open(part)?;
                std::io::copy(&mut input, writer)?;
            }
            Ok(())
        })
    }

    /// Write the ENVI header companion of a raw file
    pub fn write_header<P: AsRef<Path>>(header_path: P, header: &EnviHeader) -> StackResult<()> {
        let text = header.render();
        publish_atomically(header_path.as_ref(), |writer| writer.write_all(text.as_bytes()))
    }

    fn check_buffer(
        path: &Path,
        buffer: &RasterBuffer,
        data_type: DataType,
        row_count: usize,
        col_count: usize,
    ) -> StackResult<()> {
        if buffer.data_type() != data_type {
            return Err(StackError::TypeMismatch {
                path: path.to_path_buf(),
                message: format!("buffer holds {} but {} was requested", buffer.data_type(), data_type),
            });
        }
        if buffer.dim() != (row_count, col_count) {
            let (rows, cols) = buffer.dim();
            return Err(StackError::TypeMismatch {
                path: path.to_path_buf(),
                message: format!(
                    "buffer is {}x{} but {}x{} was requested",
                    rows, cols, row_count, col_count
                ),
            });
        }
        Ok(())
    }
}

/// Geolocation line of an ENVI header
#[derive(Debug, Clone, PartialEq)]
pub struct MapInfo {
    pub projection: String,
    pub ul_x: f64,
    pub ul_y: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub utm_zone: Option<i32>,
    pub datum: Option<String>,
    pub albers: Option<AlbersParams>,
}

impl MapInfo {
    fn envi_datum(&self) -> &str {
        match self.datum.as_deref() {
            Some(d) if d.eq_ignore_ascii_case("WGS84") => "WGS-84",
            Some(d) if d.eq_ignore_ascii_case("NAD83") => "North America 1983",
            Some(d) => d,
            None => "WGS-84",
        }
    }

    /// Semi-major and semi-minor axes of the datum's ellipsoid
    fn ellipsoid_axes(&self) -> (f64, f64) {
        match self.datum.as_deref() {
            // GRS 1980
            Some(d) if d.eq_ignore_ascii_case("NAD83") => (6378137.0, 6356752.314140356),
            _ => (6378137.0, 6356752.314245179),
        }
    }

    /// `map info` line, plus `projection info` where ENVI needs projection parameters.
    /// `None` for projections ENVI cannot name this way.
    fn envi_lines(&self) -> Option<String> {
        let tie_point = format!(
            "1.000, 1.000, {}, {}, {}, {}",
            self.ul_x, self.ul_y, self.pixel_size_x, self.pixel_size_y
        );
        let datum = self.envi_datum();

        match self.projection.to_uppercase().as_str() {
            "UTM" => {
                let zone = self.utm_zone?;
                let hemisphere = if zone < 0 { "South" } else { "North" };
                Some(format!(
                    "map info = {{UTM, {}, {}, {}, {}}}\n",
                    tie_point,
                    zone.abs(),
                    hemisphere,
                    datum
                ))
            }
            "GEO" => Some(format!("map info = {{Geographic Lat/Lon, {}, {}}}\n", tie_point, datum)),
            "AEA" => {
                let aea = self.albers.as_ref()?;
                let (a, b) = self.ellipsoid_axes();
                Some(format!(
                    "map info = {{Albers Conical Equal Area, {}, {}, units=Meters}}\n\
                     projection info = {{9, {}, {}, {}, {}, {}, {}, {}, {}, {}, Albers Conical Equal Area}}\n",
                    tie_point,
                    datum,
                    a,
                    b,
                    aea.origin_latitude,
                    aea.central_meridian,
                    aea.false_easting,
                    aea.false_northing,
                    aea.standard_parallel1,
                    aea.standard_parallel2,
                    datum
                ))
            }
            _ => None,
        }
    }
}

/// ENVI header describing a band-sequential raw file
#[derive(Debug, Clone, PartialEq)]
pub struct EnviHeader {
    pub description: String,
    pub samples: usize,
    pub lines: usize,
    pub data_type: DataType,
    pub band_names: Vec<String>,
    pub map_info: Option<MapInfo>,
    pub data_ignore_value: Option<f64>,
}

impl EnviHeader {
    /// `scene_band.img` -> `scene_band.hdr`
    pub fn header_path(raw_path: &Path) -> PathBuf {
        raw_path.with_extension("hdr")
    }

    pub fn render(&self) -> String {
        let mut text = String::from("ENVI\n");
        text.push_str(&format!("description = {{{}}}\n", self.description));
        text.push_str(&format!("samples = {}\n", self.samples));
        text.push_str(&format!("lines = {}\n", self.lines));
        text.push_str(&format!("bands = {}\n", self.band_names.len().max(1)));
        text.push_str("header offset = 0\n");
        text.push_str("file type = ENVI Standard\n");
        text.push_str(&format!("data type = {}\n", self.data_type.envi_code()));
        text.push_str("interleave = bsq\n");
        text.push_str("byte order = 0\n");

        if let Some(map) = &self.map_info {
            match map.envi_lines() {
                Some(lines) => text.push_str(&lines),
                None => log::debug!("No ENVI map info for {} projection", map.projection),
            }
        }

        if let Some(fill) = self.data_ignore_value {
            text.push_str(&format!("data ignore value = {}\n", fill));
        }
        if !self.band_names.is_empty() {
            text.push_str(&format!("band names = {{{}}}\n", self.band_names.join(", ")));
        }
        text
    }
}
