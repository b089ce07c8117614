use crate::io::ExtentReportData;
use crate::types::{
    CommonGrid, Extent, Projection, SceneDescriptor, SceneOffset, ScenePlacement, SourceWindow,
    StackError, StackResult,
};
use serde::{Deserialize, Serialize};

/// How scene extents combine into the common extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtentPolicy {
    /// Cover every pixel of every scene
    #[default]
    Union,
    /// Keep only the area all scenes share
    Intersection,
}

impl ExtentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtentPolicy::Union => "union",
            ExtentPolicy::Intersection => "intersection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "union" => Some(ExtentPolicy::Union),
            "intersection" => Some(ExtentPolicy::Intersection),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Extent reconciliation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileParams {
    /// Relative tolerance for pixel sizes, and allowed deviation in pixels for offsets and counts
    pub tolerance: f64,
    pub policy: ExtentPolicy,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            policy: ExtentPolicy::Union,
        }
    }
}

/// Common grid plus the placement of every input scene on it
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub projection: Projection,
    pub policy: ExtentPolicy,
    /// Reconciled extent before conversion to whole pixels
    pub extent: Extent,
    pub grid: CommonGrid,
    /// One placement per scene, in input order
    pub placements: Vec<ScenePlacement>,
}

impl Reconciliation {
    pub fn placement(&self, scene_id: &str) -> Option<&ScenePlacement> {
        self.placements.iter().find(|p| p.scene_id == scene_id)
    }
}

/// Computes the common pixel grid of a set of co-registered scenes
pub struct ExtentReconciler {
    params: ReconcileParams,
}

impl ExtentReconciler {
    /// Create a reconciler with default parameters
    pub fn new() -> Self {
        Self {
            params: ReconcileParams::default(),
        }
    }

    /// Create a reconciler with custom parameters
    pub fn with_params(params: ReconcileParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReconcileParams {
        &self.params
    }

    /// Compute the common grid and each scene's placement
    pub fn reconcile(&self, scenes: &[SceneDescriptor]) -> StackResult<Reconciliation> {
        let reference = scenes
            .first()
            .ok_or_else(|| StackError::Config("Extent reconciliation needs at least one scene".to_string()))?;

        log::info!(
            "🧭 Reconciling extents of {} scenes ({} policy)",
            scenes.len(),
            self.params.policy
        );

        // Smallest pixel size, so the grid does not depend on which scene comes first
        let smallest = |size: fn(&SceneDescriptor) -> f64| {
            scenes
                .iter()
                .map(size)
                .filter(|v| v.is_finite() && *v > 0.0)
                .fold(f64::INFINITY, f64::min)
        };
        let pixel_size_x = smallest(|scene| scene.pixel_size_x);
        let pixel_size_y = smallest(|scene| scene.pixel_size_y);

        self.validate_scenes(scenes, &reference.projection, pixel_size_x, pixel_size_y)?;

        let extent = self.reconcile_extent(scenes)?;
        let grid = self.grid_for_extent(&extent, pixel_size_x, pixel_size_y);
        log::debug!("Reconciled extent: {:?}", extent);

        let allow_clip = self.params.policy == ExtentPolicy::Intersection;
        let placements = scenes
            .iter()
            .map(|scene| self.place_scene(&grid, scene, allow_clip))
            .collect::<StackResult<Vec<_>>>()?;

        log::info!(
            "✅ Common grid: {} rows x {} cols at ({}, {}), pixel size {} x {}",
            grid.rows,
            grid.cols,
            grid.origin_x,
            grid.origin_y,
            grid.pixel_size_x,
            grid.pixel_size_y
        );

        Ok(Reconciliation {
            projection: reference.projection.clone(),
            policy: self.params.policy,
            extent,
            grid,
            placements,
        })
    }

    /// Place scenes on a previously computed grid. Scenes reaching past the grid are
    /// clipped to it; a scene with no pixel on the grid is an error.
    pub fn place_on_grid(
        &self,
        report: &ExtentReportData,
        scenes: &[SceneDescriptor],
    ) -> StackResult<Reconciliation> {
        if scenes.is_empty() {
            return Err(StackError::Config("No scenes to place on the grid".to_string()));
        }

        log::info!(
            "Placing {} scenes on a supplied {}x{} grid",
            scenes.len(),
            report.grid.rows,
            report.grid.cols
        );

        self.validate_scenes(
            scenes,
            &report.projection,
            report.grid.pixel_size_x,
            report.grid.pixel_size_y,
        )?;

        let placements = scenes
            .iter()
            .map(|scene| self.place_scene(&report.grid, scene, true))
            .collect::<StackResult<Vec<_>>>()?;

        for (scene, placement) in scenes.iter().zip(&placements) {
            if !placement.is_complete(scene) {
                log::warn!(
                    "Scene {} reaches past the supplied grid; using {}x{} of its {}x{} pixels",
                    scene.id,
                    placement.window.rows,
                    placement.window.cols,
                    scene.rows,
                    scene.cols
                );
            }
        }

        let policy = report
            .policy
            .as_deref()
            .and_then(ExtentPolicy::parse)
            .unwrap_or_default();

        Ok(Reconciliation {
            projection: report.projection.clone(),
            policy,
            extent: report.extent,
            grid: report.grid,
            placements,
        })
    }

    /// Every scene must share the projection and pixel size
    fn validate_scenes(
        &self,
        scenes: &[SceneDescriptor],
        projection: &Projection,
        pixel_size_x: f64,
        pixel_size_y: f64,
    ) -> StackResult<()> {
        let projection_id = projection.identifier();

        for scene in scenes {
            let scene_projection = scene.projection.identifier();
            if scene_projection != projection_id {
                return Err(StackError::InconsistentGrid {
                    scene: scene.id.clone(),
                    message: format!(
                        "projection {} differs from {}",
                        scene_projection, projection_id
                    ),
                });
            }

            let positive = |v: f64| v.is_finite() && v > 0.0;
            if !positive(scene.pixel_size_x) || !positive(scene.pixel_size_y) {
                return Err(StackError::InconsistentGrid {
                    scene: scene.id.clone(),
                    message: format!(
                        "pixel size ({}, {}) must be positive",
                        scene.pixel_size_x, scene.pixel_size_y
                    ),
                });
            }

            if !self.same_pixel_size(scene.pixel_size_x, pixel_size_x)
                || !self.same_pixel_size(scene.pixel_size_y, pixel_size_y)
            {
                return Err(StackError::InconsistentGrid {
                    scene: scene.id.clone(),
                    message: format!(
                        "pixel size ({}, {}) differs from ({}, {})",
                        scene.pixel_size_x, scene.pixel_size_y, pixel_size_x, pixel_size_y
                    ),
                });
            }
        }

        Ok(())
    }

    fn reconcile_extent(&self, scenes: &[SceneDescriptor]) -> StackResult<Extent> {
        let mut extent = scenes[0].extent();

        for scene in &scenes[1..] {
            extent = match self.params.policy {
                ExtentPolicy::Union => extent.union(&scene.extent()),
                ExtentPolicy::Intersection => {
                    extent.intersection(&scene.extent()).ok_or_else(|| StackError::InconsistentGrid {
                        scene: scene.id.clone(),
                        message: "scene shares no area with the preceding scenes".to_string(),
                    })?
                }
            };
        }

        Ok(extent)
    }

    /// The reconciled corners are always some scene's own corners, so the origin is already
    /// the nearest lattice point inside the box; offsets are checked per scene afterwards.
    fn grid_for_extent(&self, extent: &Extent, pixel_size_x: f64, pixel_size_y: f64) -> CommonGrid {
        CommonGrid {
            origin_x: extent.min_x,
            origin_y: extent.max_y,
            pixel_size_x,
            pixel_size_y,
            rows: pixel_count(extent.height(), pixel_size_y, self.params.tolerance),
            cols: pixel_count(extent.width(), pixel_size_x, self.params.tolerance),
        }
    }

    fn place_scene(
        &self,
        grid: &CommonGrid,
        scene: &SceneDescriptor,
        allow_clip: bool,
    ) -> StackResult<ScenePlacement> {
        let col = self.pixel_offset(scene, "column", (scene.ul_x - grid.origin_x) / grid.pixel_size_x)?;
        let row = self.pixel_offset(scene, "row", (grid.origin_y - scene.ul_y) / grid.pixel_size_y)?;

        let (dest_row, src_row, rows) = clip_axis(row, scene.rows, grid.rows);
        let (dest_col, src_col, cols) = clip_axis(col, scene.cols, grid.cols);
        if rows == 0 || cols == 0 {
            return Err(StackError::InconsistentGrid {
                scene: scene.id.clone(),
                message: format!(
                    "scene at pixel offset ({}, {}) does not overlap the {}x{} common grid",
                    row, col, grid.rows, grid.cols
                ),
            });
        }

        let placement = ScenePlacement {
            scene_id: scene.id.clone(),
            offset: SceneOffset {
                row: dest_row,
                col: dest_col,
            },
            window: SourceWindow {
                row: src_row,
                col: src_col,
                rows,
                cols,
            },
        };

        if !allow_clip && !placement.is_complete(scene) {
            return Err(StackError::InconsistentGrid {
                scene: scene.id.clone(),
                message: format!(
                    "scene at pixel offset ({}, {}) extends beyond the {}x{} common grid",
                    row, col, grid.rows, grid.cols
                ),
            });
        }

        log::debug!(
            "Scene {} placed at ({}, {}) using window {:?}",
            scene.id,
            placement.offset.row,
            placement.offset.col,
            placement.window
        );
        Ok(placement)
    }

    /// Whole-pixel offset; never rounds away a sub-pixel misalignment
    fn pixel_offset(&self, scene: &SceneDescriptor, axis: &'static str, exact: f64) -> StackResult<i64> {
        let nearest = exact.round();
        if !exact.is_finite() || (exact - nearest).abs() > self.params.tolerance {
            return Err(StackError::MisalignedScene {
                scene: scene.id.clone(),
                axis,
                offset: exact,
            });
        }
        Ok(nearest as i64)
    }

    fn same_pixel_size(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.params.tolerance * a.abs().max(b.abs())
    }
}

impl Default for ExtentReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest pixel count covering `span`, ignoring float noise within `tolerance` pixels
fn pixel_count(span: f64, pixel_size: f64, tolerance: f64) -> usize {
    let pixels = span / pixel_size;
    let nearest = pixels.round();
    let count = if (pixels - nearest).abs() <= tolerance {
        nearest
    } else {
        pixels.ceil()
    };
    count.max(0.0) as usize
}

/// Clip a scene axis starting at `offset` against a grid axis of `grid_len` pixels.
/// Returns (grid start, scene start, length).
fn clip_axis(offset: i64, len: usize, grid_len: usize) -> (usize, usize, usize) {
    let start = offset.max(0);
    let end = (offset + len as i64).min(grid_len as i64);
    if end <= start {
        return (0, 0, 0);
    }
    (start as usize, (start - offset) as usize, (end - start) as usize)
}
