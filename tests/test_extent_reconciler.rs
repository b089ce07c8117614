mod common;

use approx::assert_relative_eq;
use common::{descriptor, PIXEL};
use scenestack::core::extent_report_document;
use scenestack::{
    ExtentPolicy, ExtentReconciler, MetadataReader, MetadataWriter, ReconcileParams, SceneOffset,
    SourceWindow, StackError,
};
use tempfile::TempDir;

fn intersection() -> ExtentReconciler {
    ExtentReconciler::with_params(ReconcileParams {
        policy: ExtentPolicy::Intersection,
        ..Default::default()
    })
}

#[test]
fn test_two_offset_scenes_reconcile_to_union_grid() {
    common::init_logging();
    let scenes = vec![
        descriptor("A", 0.0, 0.0, 2, 2),
        descriptor("B", 30.0, -30.0, 2, 2),
    ];

    let result = ExtentReconciler::new().reconcile(&scenes).expect("Reconciliation failed");

    assert_eq!((result.grid.origin_x, result.grid.origin_y), (0.0, 0.0));
    assert_eq!((result.grid.rows, result.grid.cols), (3, 3));
    assert_eq!(result.grid.pixel_size_x, PIXEL);
    assert_eq!(result.placements[0].offset, SceneOffset { row: 0, col: 0 });
    assert_eq!(result.placements[1].offset, SceneOffset { row: 1, col: 1 });
    assert!(result.placements.iter().zip(&scenes).all(|(p, s)| p.is_complete(s)));
}

#[test]
fn test_union_grid_is_independent_of_input_order() {
    let scenes = vec![
        descriptor("A", 300000.0, 4000020.0, 10, 12),
        descriptor("B", 300090.0, 3999930.0, 7, 9),
        descriptor("C", 299910.0, 4000050.0, 4, 5),
    ];
    let reversed: Vec<_> = scenes.iter().rev().cloned().collect();

    let forward = ExtentReconciler::new().reconcile(&scenes).unwrap();
    let backward = ExtentReconciler::new().reconcile(&reversed).unwrap();

    assert_eq!(forward.grid, backward.grid);
    assert_eq!(forward.extent.min_x, 299910.0);
    assert_eq!(forward.extent.max_y, 4000050.0);
    for placement in &forward.placements {
        let other = backward.placement(&placement.scene_id).expect("placement missing");
        assert_eq!(placement, other);
    }
}

#[test]
fn test_grid_pixel_size_is_independent_of_input_order() {
    let a = descriptor("A", 0.0, 0.0, 2, 2);
    let mut b = descriptor("B", 30.0, -30.0, 2, 2);
    b.pixel_size_x = 30.000_000_1;
    b.pixel_size_y = 30.000_000_1;

    let forward = ExtentReconciler::new().reconcile(&[a.clone(), b.clone()]).unwrap();
    let backward = ExtentReconciler::new().reconcile(&[b, a]).unwrap();

    assert_eq!(forward.grid, backward.grid);
    assert_eq!((forward.grid.pixel_size_x, forward.grid.pixel_size_y), (PIXEL, PIXEL));
    assert_eq!((forward.grid.rows, forward.grid.cols), (3, 3));
    assert_eq!(
        forward.placement("B").unwrap().offset,
        backward.placement("B").unwrap().offset
    );
}

#[test]
fn test_placement_reproduces_each_scene_extent() {
    let scenes = vec![
        descriptor("A", 300000.0, 4000020.0, 10, 12),
        descriptor("B", 300090.0, 3999930.0, 7, 9),
    ];
    let result = ExtentReconciler::new().reconcile(&scenes).unwrap();
    let grid = result.grid;

    for (scene, placement) in scenes.iter().zip(&result.placements) {
        let ul_x = grid.origin_x + placement.offset.col as f64 * grid.pixel_size_x;
        let ul_y = grid.origin_y - placement.offset.row as f64 * grid.pixel_size_y;
        assert_relative_eq!(ul_x, scene.ul_x);
        assert_relative_eq!(ul_y, scene.ul_y);
        assert!(placement.offset.row + scene.rows <= grid.rows);
        assert!(placement.offset.col + scene.cols <= grid.cols);
    }
}

#[test]
fn test_single_scene_reconciles_to_its_own_grid() {
    let scene = descriptor("A", 300000.0, 4000020.0, 4, 5);
    let result = ExtentReconciler::new().reconcile(std::slice::from_ref(&scene)).unwrap();

    assert_eq!(result.extent, scene.extent());
    assert_eq!((result.grid.origin_x, result.grid.origin_y), (scene.ul_x, scene.ul_y));
    assert_eq!((result.grid.rows, result.grid.cols), (4, 5));
    assert_eq!(result.placements[0].offset, SceneOffset::default());
}

#[test]
fn test_float_noise_does_not_grow_the_grid() {
    let scenes = vec![
        descriptor("A", 0.1 + 0.2, 0.0, 2, 2),
        descriptor("B", 30.3, -30.0, 2, 2),
    ];
    let result = ExtentReconciler::new().reconcile(&scenes).unwrap();
    assert_eq!((result.grid.rows, result.grid.cols), (3, 3));
    assert_eq!(result.placements[1].offset, SceneOffset { row: 1, col: 1 });
}

#[test]
fn test_half_pixel_shift_is_misaligned() {
    let scenes = vec![
        descriptor("A", 0.0, 0.0, 2, 2),
        descriptor("B", 45.0, -30.0, 2, 2),
    ];
    match ExtentReconciler::new().reconcile(&scenes).unwrap_err() {
        StackError::MisalignedScene { scene, axis, offset } => {
            assert_eq!(scene, "B");
            assert_eq!(axis, "column");
            assert_relative_eq!(offset, 1.5);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_inconsistent_projection_or_pixel_size() {
    let a = descriptor("A", 0.0, 0.0, 2, 2);

    let mut other_zone = descriptor("B", 30.0, 0.0, 2, 2);
    other_zone.projection.utm_zone = Some(14);
    let err = ExtentReconciler::new().reconcile(&[a.clone(), other_zone]).unwrap_err();
    assert!(matches!(err, StackError::InconsistentGrid { ref scene, .. } if scene == "B"));

    let mut coarse = descriptor("C", 60.0, 0.0, 2, 2);
    coarse.pixel_size_x = 60.0;
    let err = ExtentReconciler::new().reconcile(&[a, coarse]).unwrap_err();
    assert!(matches!(err, StackError::InconsistentGrid { ref scene, .. } if scene == "C"));
}

#[test]
fn test_empty_scene_list_is_config_error() {
    let err = ExtentReconciler::new().reconcile(&[]).unwrap_err();
    assert!(matches!(err, StackError::Config(_)));
}

#[test]
fn test_intersection_clips_scenes_to_shared_area() {
    let scenes = vec![
        descriptor("A", 0.0, 0.0, 2, 2),
        descriptor("B", 30.0, -30.0, 2, 2),
    ];
    let result = intersection().reconcile(&scenes).unwrap();

    assert_eq!((result.grid.origin_x, result.grid.origin_y), (30.0, -30.0));
    assert_eq!((result.grid.rows, result.grid.cols), (1, 1));

    let a = result.placement("A").unwrap();
    assert_eq!(a.offset, SceneOffset { row: 0, col: 0 });
    assert_eq!(a.window, SourceWindow { row: 1, col: 1, rows: 1, cols: 1 });
    let b = result.placement("B").unwrap();
    assert_eq!(b.window, SourceWindow { row: 0, col: 0, rows: 1, cols: 1 });
}

#[test]
fn test_disjoint_intersection_is_inconsistent() {
    let scenes = vec![
        descriptor("A", 0.0, 0.0, 2, 2),
        descriptor("B", 90.0, 0.0, 2, 2),
    ];
    let err = intersection().reconcile(&scenes).unwrap_err();
    assert!(matches!(err, StackError::InconsistentGrid { .. }));
}

#[test]
fn test_extent_report_round_trip_and_reuse() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let scenes = vec![
        descriptor("A", 0.0, 0.0, 2, 2),
        descriptor("B", 30.0, -30.0, 2, 2),
    ];
    let reconciler = ExtentReconciler::new();
    let result = reconciler.reconcile(&scenes).unwrap();

    let report_path = dir.path().join("extent.xml");
    MetadataWriter::write_extent_report(&report_path, &extent_report_document(&result, &scenes))
        .expect("Failed to write extent report");
    let report = MetadataReader::read_extent_report(&report_path).expect("Failed to read extent report");

    assert_eq!(report.grid, result.grid);
    assert_eq!(report.extent, result.extent);
    assert_eq!(report.projection, result.projection);
    assert_eq!(report.scene_ids, vec!["A".to_string(), "B".to_string()]);

    let placed = reconciler.place_on_grid(&report, &scenes).unwrap();
    assert_eq!(placed.placements, result.placements);
    assert_eq!(placed.policy, ExtentPolicy::Union);

    // A later scene partly outside the stored grid is clipped
    let late = descriptor("C", 60.0, 0.0, 2, 2);
    let placed = reconciler.place_on_grid(&report, std::slice::from_ref(&late)).unwrap();
    assert_eq!(placed.placements[0].offset, SceneOffset { row: 0, col: 2 });
    assert_eq!(placed.placements[0].window, SourceWindow { row: 0, col: 0, rows: 2, cols: 1 });

    // One entirely outside has nothing to contribute
    let far = descriptor("D", 900.0, 0.0, 2, 2);
    let err = reconciler.place_on_grid(&report, &[far]).unwrap_err();
    assert!(matches!(err, StackError::InconsistentGrid { .. }));
}
