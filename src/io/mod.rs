//! I/O modules for scene metadata documents and raw band files

pub mod metadata;
pub mod raw_binary;

pub use metadata::{ExtentReportData, MetadataReader, MetadataWriter};
pub use raw_binary::{EnviHeader, MapInfo, RasterBuffer, RasterElement, RawRasterReader, RawRasterWriter};
