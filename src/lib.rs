//! scenestack: extent reconciliation and pixel-aligned stacking of co-registered raster scenes
//!
//! Scenes described by ESPA metadata documents and raw band files are placed on one common
//! pixel grid and written out as an analysis-ready stack with updated geolocation metadata.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandRef, CommonGrid, DataType, Extent, Projection, SceneDescriptor, SceneOffset, ScenePlacement,
    SourceWindow, StackError, StackResult,
};

pub use io::{MetadataReader, MetadataWriter, RasterBuffer, RawRasterReader, RawRasterWriter};

pub use crate::core::{
    AssemblyParams, BandSelection, ExtentPolicy, ExtentReconciler, OverlapPriority, ReconcileParams,
    Reconciliation, StackAssembler, StackLayout, StackProduct,
};

/// Read scenes, reconcile their extents and assemble the stack into `output_dir`
pub fn reconcile_and_stack<P, Q>(
    metadata_paths: &[P],
    reconcile: ReconcileParams,
    assembly: AssemblyParams,
    output_dir: Q,
) -> StackResult<StackProduct>
where
    P: AsRef<std::path::Path>,
    Q: AsRef<std::path::Path>,
{
    let scenes = MetadataReader::read_scenes(metadata_paths)?;
    let reconciliation = ExtentReconciler::with_params(reconcile).reconcile(&scenes)?;
    StackAssembler::with_params(assembly).assemble(&reconciliation, &scenes, output_dir)
}
