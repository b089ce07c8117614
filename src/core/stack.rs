use crate::core::extent::Reconciliation;
use crate::core::provenance;
use crate::io::raw_binary::{cast_fill, fill_fits};
use crate::io::{
    EnviHeader, MapInfo, MetadataWriter, RasterBuffer, RasterElement, RawRasterReader, RawRasterWriter,
};
use crate::types::{
    BandRef, CommonGrid, DataType, SceneDescriptor, SceneOffset, ScenePlacement, StackError,
    StackResult,
};
use ndarray::{s, Array2, Zip};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Which output bands are assembled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BandSelection {
    /// One output band per (scene, band): each scene placed alone on the common grid.
    /// `None` selects every band of every scene.
    PerScene { bands: Option<Vec<String>> },
    /// One output band per distinct band name, combined across scenes.
    /// `None` selects every band name found in any scene.
    Mosaic { bands: Option<Vec<String>> },
}

impl Default for BandSelection {
    fn default() -> Self {
        BandSelection::PerScene { bands: None }
    }
}

/// Which scene owns a pixel covered by more than one scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapPriority {
    /// Earliest-listed scene wins
    #[default]
    FirstWins,
    /// Latest-listed scene wins
    LastWins,
    /// Latest acquisition date wins; undated scenes rank oldest, ties keep input order
    MostRecentWins,
}

impl OverlapPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPriority::FirstWins => "first_wins",
            OverlapPriority::LastWins => "last_wins",
            OverlapPriority::MostRecentWins => "most_recent_wins",
        }
    }
}

/// Physical layout of the written stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StackLayout {
    /// One raw file plus header per output band
    #[default]
    BandFiles,
    /// All output bands back to back in one band-sequential file
    Bsq,
}

/// Stack assembly parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyParams {
    pub band_selection: BandSelection,
    pub overlap_priority: OverlapPriority,
    pub layout: StackLayout,
    /// Base name of the metadata document, mosaic bands and BSQ stack file
    pub product_name: String,
    /// Fill value for bands whose metadata declares none
    pub default_fill_value: f64,
    /// Worker threads for band assembly; 0 lets rayon decide
    pub num_threads: usize,
    /// Remove the source band files after the stack is published
    pub delete_source: bool,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            band_selection: BandSelection::default(),
            overlap_priority: OverlapPriority::FirstWins,
            layout: StackLayout::BandFiles,
            product_name: "stack".to_string(),
            default_fill_value: -9999.0,
            num_threads: 0,
            delete_source: false,
        }
    }
}

/// One scene band feeding an output band
#[derive(Debug, Clone)]
pub struct BandSource {
    pub scene_id: String,
    pub band: BandRef,
    pub placement: ScenePlacement,
}

/// One output band to assemble; `sources` are in priority order
#[derive(Debug, Clone)]
pub struct BandJob {
    pub output_name: String,
    pub source_band: String,
    pub data_type: DataType,
    pub fill_value: f64,
    pub sources: Vec<BandSource>,
}

impl BandJob {
    fn scene_label(&self) -> String {
        self.sources
            .iter()
            .map(|s| s.scene_id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// An output band that has been written
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBand {
    pub name: String,
    pub source_band: String,
    pub file_name: String,
    pub data_type: DataType,
    pub fill_value: f64,
    pub band_index: usize,
    pub bands_in_file: usize,
    /// Pixels holding a scene value rather than fill
    pub valid_pixels: usize,
    /// Scenes that contributed at least one pixel
    pub contributors: Vec<String>,
}

/// One output band assembled in memory
#[derive(Debug, Clone)]
pub struct PaintedBand {
    pub buffer: RasterBuffer,
    pub valid_pixels: usize,
    /// Scenes that claimed at least one pixel, in priority order
    pub contributors: Vec<String>,
}

/// Published stack
#[derive(Debug, Clone)]
pub struct StackProduct {
    pub metadata_path: PathBuf,
    pub raster_paths: Vec<PathBuf>,
    pub grid: CommonGrid,
    pub bands: Vec<AssembledBand>,
}

/// Places scene bands on the common grid and writes the stack
pub struct StackAssembler {
    params: AssemblyParams,
}

impl StackAssembler {
    /// Create an assembler with default parameters
    pub fn new() -> Self {
        Self {
            params: AssemblyParams::default(),
        }
    }

    /// Create an assembler with custom parameters
    pub fn with_params(params: AssemblyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AssemblyParams {
        &self.params
    }

    /// Work out the output bands and their contributing scenes
    pub fn plan(
        &self,
        reconciliation: &Reconciliation,
        scenes: &[SceneDescriptor],
    ) -> StackResult<Vec<BandJob>> {
        let jobs = match &self.params.band_selection {
            BandSelection::PerScene { bands } => self.plan_per_scene(reconciliation, scenes, bands.as_deref())?,
            BandSelection::Mosaic { bands } => self.plan_mosaic(reconciliation, scenes, bands.as_deref())?,
        };

        if jobs.is_empty() {
            return Err(StackError::Config("No output bands selected".to_string()));
        }

        let mut names = HashSet::new();
        for job in &jobs {
            if !names.insert(job.output_name.as_str()) {
                return Err(StackError::Config(format!(
                    "Output band {} would be written twice",
                    job.output_name
                )));
            }
        }

        Ok(jobs)
    }

    fn plan_per_scene(
        &self,
        reconciliation: &Reconciliation,
        scenes: &[SceneDescriptor],
        selected: Option<&[String]>,
    ) -> StackResult<Vec<BandJob>> {
        let mut jobs = Vec::new();

        for scene in scenes {
            let names: Vec<&str> = match selected {
                Some(list) => list.iter().map(String::as_str).collect(),
                None => scene.bands.iter().map(|b| b.name.as_str()).collect(),
            };

            for name in names {
                let band = scene.band(name).ok_or_else(|| StackError::BandNotFound {
                    scene: scene.id.clone(),
                    band: name.to_string(),
                })?;
                jobs.push(BandJob {
                    output_name: format!("{}_{}", scene.id, band.name),
                    source_band: band.name.clone(),
                    data_type: band.data_type,
                    fill_value: self.fill_for(band),
                    sources: vec![source_for(reconciliation, scene, band)?],
                });
            }
        }

        Ok(jobs)
    }

    fn plan_mosaic(
        &self,
        reconciliation: &Reconciliation,
        scenes: &[SceneDescriptor],
        selected: Option<&[String]>,
    ) -> StackResult<Vec<BandJob>> {
        let names: Vec<String> = match selected {
            Some(list) => list.to_vec(),
            None => {
                let mut seen = HashSet::new();
                scenes
                    .iter()
                    .flat_map(|scene| scene.bands.iter())
                    .filter(|band| seen.insert(band.name.clone()))
                    .map(|band| band.name.clone())
                    .collect()
            }
        };

        let ordered = self.priority_order(scenes);
        let mut jobs = Vec::with_capacity(names.len());

        for name in &names {
            let contributors: Vec<(&SceneDescriptor, &BandRef)> = ordered
                .iter()
                .filter_map(|scene| scene.band(name).map(|band| (*scene, band)))
                .collect();

            let (_, first_band) = contributors.first().ok_or_else(|| StackError::BandNotFound {
                scene: "any input scene".to_string(),
                band: name.clone(),
            })?;

            for (scene, band) in &contributors[1..] {
                if band.data_type != first_band.data_type {
                    return Err(StackError::TypeMismatch {
                        path: band.path.clone(),
                        message: format!(
                            "band {} is {} in scene {} but {} elsewhere in the mosaic",
                            name, band.data_type, scene.id, first_band.data_type
                        ),
                    });
                }
            }

            if contributors.len() < scenes.len() {
                log::debug!(
                    "Band {} present in {} of {} scenes",
                    name,
                    contributors.len(),
                    scenes.len()
                );
            }

            let sources = contributors
                .iter()
                .map(|(scene, band)| source_for(reconciliation, scene, band))
                .collect::<StackResult<Vec<_>>>()?;

            jobs.push(BandJob {
                output_name: format!("{}_{}", self.params.product_name, name),
                source_band: name.clone(),
                data_type: first_band.data_type,
                fill_value: self.fill_for(first_band),
                sources,
            });
        }

        Ok(jobs)
    }

    /// Fill of an output band built from `band`. Without a declared fill the configured
    /// default is used, or the type's maximum when the default does not fit an unsigned band.
    fn fill_for(&self, band: &BandRef) -> f64 {
        let default = self.params.default_fill_value;
        match (band.fill_value, band.data_type.unsigned_max()) {
            (Some(fill), _) => fill,
            (None, Some(max)) if !fill_fits(default, band.data_type) => {
                log::warn!(
                    "Band {} ({}) declares no fill value and {} does not fit; using {}",
                    band.name,
                    band.data_type,
                    default,
                    max
                );
                max
            }
            (None, _) => default,
        }
    }

    /// Scenes ordered from highest to lowest overlap priority
    fn priority_order<'a>(&self, scenes: &'a [SceneDescriptor]) -> Vec<&'a SceneDescriptor> {
        let mut ordered: Vec<&SceneDescriptor> = scenes.iter().collect();
        match self.params.overlap_priority {
            OverlapPriority::FirstWins => {}
            OverlapPriority::LastWins => ordered.reverse(),
            // Stable sort keeps input order among equal dates; None sorts last
            OverlapPriority::MostRecentWins => {
                ordered.sort_by_key(|scene| std::cmp::Reverse(scene.acquisition_date))
            }
        }
        ordered
    }

    /// Build one output band in memory
    pub fn assemble_band(&self, grid: &CommonGrid, job: &BandJob) -> StackResult<PaintedBand> {
        match job.data_type {
            DataType::UInt8 => self.paint::<u8>(grid, job),
            DataType::Int16 => self.paint::<i16>(grid, job),
            DataType::UInt16 => self.paint::<u16>(grid, job),
            DataType::Int32 => self.paint::<i32>(grid, job),
            DataType::UInt32 => self.paint::<u32>(grid, job),
            DataType::Float32 => self.paint::<f32>(grid, job),
            DataType::Float64 => self.paint::<f64>(grid, job),
        }
    }

    /// Sources are visited in priority order and only claim pixels nobody claimed yet.
    /// A source pixel equal to its own band's fill value never claims.
    fn paint<T: RasterElement>(&self, grid: &CommonGrid, job: &BandJob) -> StackResult<PaintedBand> {
        let fill: T = cast_fill(job.fill_value, job.data_type)?;
        let mut pixels = Array2::from_elem((grid.rows, grid.cols), fill);
        let mut claimed = Array2::from_elem((grid.rows, grid.cols), false);
        let mut contributors = Vec::new();

        for source in &job.sources {
            let context = |e: StackError| e.in_band(&source.scene_id, &source.band.name);

            let buffer = RawRasterReader::read_window(&source.band, &source.placement.window).map_err(context)?;
            let data = T::from_buffer(buffer).ok_or_else(|| {
                context(StackError::TypeMismatch {
                    path: source.band.path.clone(),
                    message: format!("expected {} pixels", job.data_type),
                })
            })?;

            let SceneOffset { row, col } = source.placement.offset;
            let (rows, cols) = data.dim();
            if row + rows > grid.rows || col + cols > grid.cols {
                return Err(context(StackError::InconsistentGrid {
                    scene: source.scene_id.clone(),
                    message: format!(
                        "{}x{} window at ({}, {}) exceeds the {}x{} common grid",
                        rows, cols, row, col, grid.rows, grid.cols
                    ),
                }));
            }

            let source_fill: Option<T> = source.band.fill_value.and_then(|v| <T as NumCast>::from(v));
            let mut target = pixels.slice_mut(s![row..row + rows, col..col + cols]);
            let mut target_claimed = claimed.slice_mut(s![row..row + rows, col..col + cols]);

            let mut newly_claimed = 0usize;
            Zip::from(&mut target)
                .and(&mut target_claimed)
                .and(&data)
                .for_each(|out, taken, &value| {
                    if !*taken && !is_fill(value, source_fill) {
                        *out = value;
                        *taken = true;
                        newly_claimed += 1;
                    }
                });

            if newly_claimed > 0 {
                contributors.push(source.scene_id.clone());
            } else {
                log::debug!(
                    "Scene {} contributes no pixels to {}",
                    source.scene_id,
                    job.output_name
                );
            }
        }

        Ok(PaintedBand {
            buffer: T::into_buffer(pixels),
            valid_pixels: claimed.iter().filter(|&&c| c).count(),
            contributors,
        })
    }

    /// Assemble every selected band and publish the stack into `output_dir`.
    /// Outputs are staged in a temporary directory and moved into place only after every
    /// band succeeded; the metadata document is published last. Targets that are directories
    /// or files of the input scenes are refused before any band is assembled.
    pub fn assemble<P: AsRef<Path>>(
        &self,
        reconciliation: &Reconciliation,
        scenes: &[SceneDescriptor],
        output_dir: P,
    ) -> StackResult<StackProduct> {
        let output_dir = output_dir.as_ref();
        let grid = reconciliation.grid;
        let jobs = self.plan(reconciliation, scenes)?;

        log::info!(
            "🔗 Assembling {} output band(s) on a {}x{} grid into {}",
            jobs.len(),
            grid.rows,
            grid.cols,
            output_dir.display()
        );

        let stack_name = format!("{}.img", self.params.product_name);
        if self.params.layout == StackLayout::Bsq {
            let data_type = jobs[0].data_type;
            if let Some(job) = jobs.iter().find(|job| job.data_type != data_type) {
                return Err(StackError::TypeMismatch {
                    path: output_dir.join(&stack_name),
                    message: format!(
                        "a band-sequential stack needs one data type, but {} is {} and {} is {}",
                        jobs[0].output_name, data_type, job.output_name, job.data_type
                    ),
                });
            }
        }

        std::fs::create_dir_all(output_dir).map_err(|e| StackError::RasterIo {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        check_targets(output_dir, &self.output_file_names(&jobs), scenes)?;

        let staging = tempfile::Builder::new()
            .prefix(".scenestack-")
            .tempdir_in(output_dir)
            .map_err(|e| StackError::RasterIo {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let mut bands = self.run_jobs(&grid, &jobs, staging.path())?;
        let map_info = map_info(reconciliation);

        let mut published = Vec::new();
        match self.params.layout {
            StackLayout::BandFiles => {
                for band in &bands {
                    let raw_path = staging.path().join(&band.file_name);
                    let header = EnviHeader {
                        description: format!("{} assembled from {}", band.name, band.contributors.join(", ")),
                        samples: grid.cols,
                        lines: grid.rows,
                        data_type: band.data_type,
                        band_names: vec![band.name.clone()],
                        map_info: Some(map_info.clone()),
                        data_ignore_value: Some(band.fill_value),
                    };
                    let header_path = EnviHeader::header_path(&raw_path);
                    RawRasterWriter::write_header(&header_path, &header)?;
                    published.push(raw_path);
                    published.push(header_path);
                }
            }
            StackLayout::Bsq => {
                let stack_path = staging.path().join(&stack_name);
                let parts: Vec<PathBuf> = bands.iter().map(|b| staging.path().join(&b.file_name)).collect();
                RawRasterWriter::concatenate_bands(&stack_path, &parts)?;

                let band_count = bands.len();
                for (index, band) in bands.iter_mut().enumerate() {
                    band.file_name = stack_name.clone();
                    band.band_index = index;
                    band.bands_in_file = band_count;
                }

                let header = EnviHeader {
                    description: format!("{} band-sequential stack", self.params.product_name),
                    samples: grid.cols,
                    lines: grid.rows,
                    data_type: jobs[0].data_type,
                    band_names: bands.iter().map(|b| b.name.clone()).collect(),
                    map_info: Some(map_info),
                    data_ignore_value: Some(jobs[0].fill_value),
                };
                let header_path = EnviHeader::header_path(&stack_path);
                RawRasterWriter::write_header(&header_path, &header)?;
                published.push(stack_path);
                published.push(header_path);
            }
        }

        let metadata_name = format!("{}.xml", self.params.product_name);
        let staged_metadata = staging.path().join(&metadata_name);
        let doc = provenance::product_document(reconciliation, scenes, &bands, &self.params);
        MetadataWriter::write_document(&staged_metadata, &doc)?;

        published.push(staged_metadata);
        let mut raster_paths = publish_all(&published, staging.path(), output_dir)?;
        raster_paths.pop();
        let metadata_path = output_dir.join(&metadata_name);

        log::info!(
            "✅ Stack published: {} band(s), metadata {}",
            bands.len(),
            metadata_path.display()
        );

        if self.params.delete_source {
            let mut outputs = raster_paths.clone();
            outputs.push(metadata_path.clone());
            delete_sources(&jobs, &outputs);
        }

        Ok(StackProduct {
            metadata_path,
            raster_paths,
            grid,
            bands,
        })
    }

    /// Every file name the run publishes
    fn output_file_names(&self, jobs: &[BandJob]) -> Vec<String> {
        let rasters: Vec<String> = match self.params.layout {
            StackLayout::BandFiles => jobs.iter().map(|job| format!("{}.img", job.output_name)).collect(),
            StackLayout::Bsq => vec![format!("{}.img", self.params.product_name)],
        };

        let mut names = Vec::with_capacity(rasters.len() * 2 + 1);
        for raster in rasters {
            let header = EnviHeader::header_path(Path::new(&raster));
            names.push(header.to_string_lossy().into_owned());
            names.push(raster);
        }
        names.push(format!("{}.xml", self.params.product_name));
        names
    }

    fn run_jobs(&self, grid: &CommonGrid, jobs: &[BandJob], staging: &Path) -> StackResult<Vec<AssembledBand>> {
        #[cfg(feature = "parallel")]
        let bands = {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.num_threads)
                .build()
                .map_err(|e| StackError::Config(format!("Failed to build worker pool: {}", e)))?;
            log::debug!("Assembling bands on {} worker thread(s)", pool.current_num_threads());
            pool.install(|| {
                jobs.par_iter()
                    .map(|job| self.run_job(grid, job, staging))
                    .collect::<StackResult<Vec<_>>>()
            })
        };

        #[cfg(not(feature = "parallel"))]
        let bands = jobs
            .iter()
            .map(|job| self.run_job(grid, job, staging))
            .collect::<StackResult<Vec<_>>>();

        bands
    }

    /// Assemble one band and write it to the staging directory
    fn run_job(&self, grid: &CommonGrid, job: &BandJob, staging: &Path) -> StackResult<AssembledBand> {
        log::info!(
            "Assembling band {} from {} scene(s)",
            job.output_name,
            job.sources.len()
        );

        let PaintedBand {
            buffer,
            valid_pixels,
            contributors,
        } = self.assemble_band(grid, job)?;
        let file_name = format!("{}.img", job.output_name);
        RawRasterWriter::write_band(
            staging.join(&file_name),
            &buffer,
            job.data_type,
            grid.rows,
            grid.cols,
        )
        .map_err(|e| e.in_band(&job.scene_label(), &job.output_name))?;

        let coverage = if grid.pixel_count() > 0 {
            valid_pixels as f64 / grid.pixel_count() as f64 * 100.0
        } else {
            0.0
        };
        log::info!("Band {} written: {:.1}% coverage", job.output_name, coverage);

        Ok(AssembledBand {
            name: job.output_name.clone(),
            source_band: job.source_band.clone(),
            file_name,
            data_type: job.data_type,
            fill_value: job.fill_value,
            band_index: 0,
            bands_in_file: 1,
            valid_pixels,
            contributors,
        })
    }
}

impl Default for StackAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn source_for(
    reconciliation: &Reconciliation,
    scene: &SceneDescriptor,
    band: &BandRef,
) -> StackResult<BandSource> {
    let placement = reconciliation
        .placement(&scene.id)
        .ok_or_else(|| StackError::InconsistentGrid {
            scene: scene.id.clone(),
            message: "scene has no placement on the common grid".to_string(),
        })?;

    if band.rows != scene.rows || band.cols != scene.cols {
        return Err(StackError::InconsistentGrid {
            scene: scene.id.clone(),
            message: format!(
                "band {} is {}x{} but the scene grid is {}x{}",
                band.name, band.rows, band.cols, scene.rows, scene.cols
            ),
        });
    }

    Ok(BandSource {
        scene_id: scene.id.clone(),
        band: band.clone(),
        placement: placement.clone(),
    })
}

fn is_fill<T: RasterElement>(value: T, fill: Option<T>) -> bool {
    match fill {
        Some(fill) => {
            value == fill
                || (value.to_f64().map_or(false, f64::is_nan) && fill.to_f64().map_or(false, f64::is_nan))
        }
        None => false,
    }
}

fn map_info(reconciliation: &Reconciliation) -> MapInfo {
    let grid = &reconciliation.grid;
    MapInfo {
        projection: reconciliation.projection.name.clone(),
        ul_x: grid.origin_x,
        ul_y: grid.origin_y,
        pixel_size_x: grid.pixel_size_x,
        pixel_size_y: grid.pixel_size_y,
        utm_zone: reconciliation.projection.utm_zone,
        datum: reconciliation.projection.datum.clone(),
        albers: reconciliation.projection.albers.clone(),
    }
}

/// Path with symlinks and relative parts resolved, also for files that do not exist yet
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Outputs may neither land on a directory nor replace a file of an input scene
fn check_targets(output_dir: &Path, names: &[String], scenes: &[SceneDescriptor]) -> StackResult<()> {
    let mut inputs = HashSet::new();
    for scene in scenes {
        inputs.insert(canonical(&scene.metadata_path));
        for band in &scene.bands {
            inputs.insert(canonical(&band.path));
            let header = EnviHeader::header_path(&band.path);
            if header.exists() {
                inputs.insert(canonical(&header));
            }
        }
    }

    for name in names {
        let target = output_dir.join(name);
        if target.is_dir() {
            return Err(StackError::Config(format!(
                "Output {} is an existing directory",
                target.display()
            )));
        }
        if inputs.contains(&canonical(&target)) {
            return Err(StackError::Config(format!(
                "Output {} would replace an input file; use another output directory or product name",
                target.display()
            )));
        }
    }
    Ok(())
}

/// Move staged files into `output_dir` in order. Nothing moves unless every target can take
/// a file. A replaced output is parked in the staging directory until the run succeeds, and
/// a failed rename undoes every earlier one.
fn publish_all(staged: &[PathBuf], staging: &Path, output_dir: &Path) -> StackResult<Vec<PathBuf>> {
    let mut moves = Vec::with_capacity(staged.len());
    for path in staged {
        let file_name = path.file_name().ok_or_else(|| {
            StackError::Config(format!("Staged path {} has no file name", path.display()))
        })?;
        let target = output_dir.join(file_name);
        if target.is_dir() {
            return Err(StackError::Config(format!(
                "Output {} is an existing directory",
                target.display()
            )));
        }
        let parked = staging.join(format!(".replaced-{}", file_name.to_string_lossy()));
        moves.push((path.as_path(), target, parked));
    }

    let mut done: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(moves.len());
    for (source, target, parked) in moves {
        match publish_one(source, &target, parked) {
            Ok(replaced) => done.push((target, replaced)),
            Err(e) => {
                roll_back(&done);
                return Err(e);
            }
        }
    }

    for (target, replaced) in &done {
        if replaced.is_some() {
            log::warn!("Replaced existing output {}", target.display());
        }
    }
    Ok(done.into_iter().map(|(target, _)| target).collect())
}

/// Rename one staged file into place, returning where a replaced file was parked
fn publish_one(staged: &Path, target: &Path, parked: PathBuf) -> StackResult<Option<PathBuf>> {
    let io_error = |source: std::io::Error| StackError::RasterIo {
        path: target.to_path_buf(),
        source,
    };

    let replaced = if target.exists() {
        std::fs::rename(target, &parked).map_err(io_error)?;
        Some(parked)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staged, target) {
        if let Some(parked) = &replaced {
            if let Err(restore) = std::fs::rename(parked, target) {
                log::warn!("Could not restore {}: {}", target.display(), restore);
            }
        }
        return Err(io_error(e));
    }
    Ok(replaced)
}

fn roll_back(done: &[(PathBuf, Option<PathBuf>)]) {
    for (target, replaced) in done.iter().rev() {
        let result = match replaced {
            Some(parked) => std::fs::rename(parked, target),
            None => std::fs::remove_file(target),
        };
        match result {
            Ok(()) => log::debug!("Rolled back {}", target.display()),
            Err(e) => log::warn!("Could not roll back {}: {}", target.display(), e),
        }
    }
}

/// Source removal happens after publication, so a failure here only warns.
/// A source that is also a published output is kept.
fn delete_sources(jobs: &[BandJob], published: &[PathBuf]) {
    let outputs: HashSet<PathBuf> = published.iter().map(|path| canonical(path)).collect();
    let mut seen = HashSet::new();
    let mut removed = 0usize;

    for source in jobs.iter().flat_map(|job| job.sources.iter()) {
        let path = &source.band.path;
        if !seen.insert(path.clone()) {
            continue;
        }
        if outputs.contains(&canonical(path)) {
            log::warn!("Keeping {}: it is also a published output", path.display());
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                removed += 1;
                log::debug!("Removed source band {}", path.display());
            }
            Err(e) => log::warn!("Could not remove source band {}: {}", path.display(), e),
        }
        let header = EnviHeader::header_path(path);
        if header.exists() && !outputs.contains(&canonical(&header)) {
            if let Err(e) = std::fs::remove_file(&header) {
                log::warn!("Could not remove source header {}: {}", header.display(), e);
            }
        }
    }
    log::info!("Removed {} source band file(s)", removed);
}
