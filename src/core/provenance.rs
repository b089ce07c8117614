//! Metadata documents describing reconciled grids and assembled stacks

use crate::core::extent::Reconciliation;
use crate::core::stack::{AssembledBand, AssemblyParams};
use crate::io::metadata::{
    BandDoc, BandsDoc, EspaMetadataDoc, ExtentDoc, ExtentReportDoc, GlobalMetadataDoc, GridDoc,
    PixelSizeDoc, ProjectionInformationDoc, ProvenanceDoc, SourceSceneDoc,
};
use crate::types::{SceneDescriptor, ScenePlacement};
use std::collections::HashSet;

const DOCUMENT_VERSION: &str = "2.0";
const DATA_PROVIDER: &str = "scenestack";

fn pixel_size_doc(reconciliation: &Reconciliation) -> PixelSizeDoc {
    PixelSizeDoc {
        x: Some(reconciliation.grid.pixel_size_x),
        y: Some(reconciliation.grid.pixel_size_y),
        units: reconciliation.projection.units.clone(),
    }
}

fn source_scene_doc(scene: &SceneDescriptor, placement: Option<&ScenePlacement>) -> SourceSceneDoc {
    SourceSceneDoc {
        id: Some(scene.id.clone()),
        metadata: Some(scene.metadata_path.display().to_string()),
        acquisition_date: scene.acquisition_date.map(|d| d.format("%Y-%m-%d").to_string()),
        row_offset: placement.map(|p| p.offset.row),
        col_offset: placement.map(|p| p.offset.col),
        window_row: placement.map(|p| p.window.row),
        window_col: placement.map(|p| p.window.col),
        window_rows: placement.map(|p| p.window.rows),
        window_cols: placement.map(|p| p.window.cols),
    }
}

/// The value every item shares, if any
fn shared<'a, I: Iterator<Item = Option<&'a String>>>(mut values: I) -> Option<String> {
    let first = values.next()??;
    values
        .all(|v| v == Some(first))
        .then(|| first.clone())
}

/// Extent report for a reconciliation, readable by [`crate::io::MetadataReader::read_extent_report`]
pub fn extent_report_document(reconciliation: &Reconciliation, scenes: &[SceneDescriptor]) -> ExtentReportDoc {
    let extent = &reconciliation.extent;
    ExtentReportDoc {
        policy: Some(reconciliation.policy.as_str().to_string()),
        projection_information: Some(ProjectionInformationDoc::for_grid(
            &reconciliation.projection,
            &reconciliation.grid,
        )),
        pixel_size: Some(pixel_size_doc(reconciliation)),
        grid: Some(GridDoc {
            rows: Some(reconciliation.grid.rows),
            cols: Some(reconciliation.grid.cols),
        }),
        extent: Some(ExtentDoc {
            min_x: Some(extent.min_x),
            max_x: Some(extent.max_x),
            min_y: Some(extent.min_y),
            max_y: Some(extent.max_y),
        }),
        provenance: Some(ProvenanceDoc {
            extent_policy: Some(reconciliation.policy.as_str().to_string()),
            overlap_priority: None,
            scenes: scenes
                .iter()
                .map(|scene| source_scene_doc(scene, reconciliation.placement(&scene.id)))
                .collect(),
        }),
    }
}

/// Metadata document of an assembled stack. It reads back through
/// [`crate::io::MetadataReader::read_scene`] as a scene on the common grid.
pub fn product_document(
    reconciliation: &Reconciliation,
    scenes: &[SceneDescriptor],
    bands: &[AssembledBand],
    params: &AssemblyParams,
) -> EspaMetadataDoc {
    let contributing: HashSet<&str> = bands
        .iter()
        .flat_map(|band| band.contributors.iter().map(String::as_str))
        .collect();
    let sources: Vec<&SceneDescriptor> = scenes
        .iter()
        .filter(|scene| contributing.contains(scene.id.as_str()))
        .collect();

    let acquisition_dates: Vec<Option<String>> = sources
        .iter()
        .map(|scene| scene.acquisition_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .collect();

    let global = GlobalMetadataDoc {
        data_provider: Some(DATA_PROVIDER.to_string()),
        satellite: shared(sources.iter().map(|s| s.satellite.as_ref())),
        instrument: shared(sources.iter().map(|s| s.instrument.as_ref())),
        acquisition_date: shared(acquisition_dates.iter().map(Option::as_ref)),
        product_id: Some(params.product_name.clone()),
        projection_information: Some(ProjectionInformationDoc::for_grid(
            &reconciliation.projection,
            &reconciliation.grid,
        )),
    };

    let band_docs = bands
        .iter()
        .map(|band| BandDoc {
            product: Some(params.product_name.clone()),
            name: Some(band.name.clone()),
            category: Some("image".to_string()),
            data_type: Some(band.data_type.tag().to_string()),
            nlines: Some(reconciliation.grid.rows),
            nsamps: Some(reconciliation.grid.cols),
            fill_value: Some(band.fill_value),
            band_index: (band.bands_in_file > 1).then_some(band.band_index),
            bands_in_file: (band.bands_in_file > 1).then_some(band.bands_in_file),
            contributors: Some(band.contributors.join(",")),
            short_name: Some(band.source_band.clone()),
            long_name: Some(format!(
                "{} on the common grid from {} scene(s)",
                band.source_band,
                band.contributors.len()
            )),
            file_name: Some(band.file_name.clone()),
            pixel_size: Some(pixel_size_doc(reconciliation)),
        })
        .collect();

    EspaMetadataDoc {
        version: Some(DOCUMENT_VERSION.to_string()),
        global_metadata: Some(global),
        bands: Some(BandsDoc { bands: band_docs }),
        provenance: Some(ProvenanceDoc {
            extent_policy: Some(reconciliation.policy.as_str().to_string()),
            overlap_priority: Some(params.overlap_priority.as_str().to_string()),
            scenes: sources
                .iter()
                .map(|scene| source_scene_doc(scene, reconciliation.placement(&scene.id)))
                .collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_value() {
        let a = "LANDSAT_8".to_string();
        let b = "LANDSAT_7".to_string();
        assert_eq!(shared([Some(&a), Some(&a)].into_iter()), Some(a.clone()));
        assert_eq!(shared([Some(&a), Some(&b)].into_iter()), None);
        assert_eq!(shared([Some(&a), None].into_iter()), None);
        assert_eq!(shared(std::iter::empty::<Option<&String>>()), None);
    }
}
