//! Ray-march pipeline creation and shader hot reload
//!
//! The compute shader is read from disk, its output format placeholder is
//! filled in from the swapchain, and the result is validated with naga before
//! it reaches the backend. A failed reload leaves the running pipeline alone.
//!
//! Changes are picked up from filesystem notifications on the shader's
//! directory, so editors that save by renaming a temporary file are seen too.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::backend::{
    BackendError, BackendResult, BindGroupLayoutEntry, BindGroupLayoutHandle, BindingType,
    ComputePipelineDescriptor, ComputePipelineHandle, GraphicsBackend, ShaderStageFlags,
    TextureFormat, TextureSampleType,
};
use crate::frame::{bindings, AccumulationPair};

/// Shader compiled into the binary, used when no file is on disk
pub const EMBEDDED_SHADER: &str = include_str!("../shaders/raymarch.wgsl");

/// Replaced with the swapchain's WGSL storage format name
pub const OUTPUT_FORMAT_PLACEHOLDER: &str = "__OUTPUT_FORMAT__";

pub const ENTRY_POINT: &str = "raymarch";
pub const ENTRY_POINT_ACCUMULATE: &str = "raymarch_accumulate";

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WGSL parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entry point '{0}' not found")]
    MissingEntryPoint(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result of polling the shader file
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Nothing on disk changed
    Unchanged,
    /// A new pipeline is ready; the previous one is now owned by the caller
    Succeeded(ComputePipelineHandle),
    /// The new source was rejected and the previous pipeline stays active
    Failed(ShaderError),
}

/// Fill in the output format and validate the shader.
///
/// Returns the source ready for the backend.
pub fn prepare_source(
    raw: &str,
    output_format: TextureFormat,
    entry_point: &str,
) -> Result<String, ShaderError> {
    let source = raw.replace(OUTPUT_FORMAT_PLACEHOLDER, output_format.wgsl_name());

    let module = naga::front::wgsl::parse_str(&source)
        .map_err(|e| ShaderError::Parse(e.emit_to_string(&source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| ShaderError::Validation(format!("{e}")))?;

    module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
        .then_some(source)
        .ok_or_else(|| ShaderError::MissingEntryPoint(entry_point.to_string()))
}

/// Layout of the ray-march bind group.
///
/// The accumulation images are only bound when accumulation is on.
pub fn layout_entries(
    output_format: TextureFormat,
    accumulation: bool,
) -> Vec<BindGroupLayoutEntry> {
    let entry = |binding, ty| BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::COMPUTE,
        ty,
    };

    let mut entries = vec![
        entry(bindings::FRAME_CONSTANTS, BindingType::UniformBuffer),
        entry(bindings::CAMERA, BindingType::UniformBuffer),
        entry(bindings::VOXELS, BindingType::StorageBuffer { read_only: true }),
        entry(
            bindings::OUTPUT,
            BindingType::StorageTexture {
                format: output_format,
            },
        ),
    ];
    if accumulation {
        entries.push(entry(
            bindings::ACCUM_PREVIOUS,
            BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
            },
        ));
        entries.push(entry(
            bindings::ACCUM_CURRENT,
            BindingType::StorageTexture {
                format: AccumulationPair::FORMAT,
            },
        ));
    }
    entries
}

/// Filesystem notifications for a single shader file.
pub struct ShaderWatcher {
    /// Kept alive for as long as events are wanted
    _watcher: RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Event>,
    file_name: OsString,
}

impl ShaderWatcher {
    /// Watch the directory holding `path`.
    ///
    /// The directory is watched rather than the file, which keeps working
    /// when the file is replaced or does not exist yet.
    pub fn new(path: &Path) -> notify::Result<Self> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::path_not_found().add_path(path.to_path_buf()))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let (tx, rx) = mpsc::channel::<notify::Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;
        watcher.watch(directory, RecursiveMode::NonRecursive)?;
        log::info!("Watching shader {:?} in {:?}", file_name, directory);

        Ok(Self {
            _watcher: watcher,
            event_rx: rx,
            file_name,
        })
    }

    /// Drain pending events; true if any of them touched the shader file
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.event_rx.try_recv() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            changed |= event
                .paths
                .iter()
                .any(|path| path.file_name() == Some(self.file_name.as_os_str()));
        }
        changed
    }
}

impl std::fmt::Debug for ShaderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderWatcher")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Builds the ray-march pipeline and rebuilds it when the shader file changes.
///
/// The bind group layout is created here but owned by the
/// [`FrameOrchestrator`](crate::frame::FrameOrchestrator), which destroys it
/// at shutdown.
#[derive(Debug)]
pub struct PipelineManager {
    shader_path: Option<PathBuf>,
    watcher: Option<ShaderWatcher>,
    /// Source of the last build attempt, successful or not
    last_source: Option<String>,
    output_format: TextureFormat,
    accumulation: bool,
    layout: BindGroupLayoutHandle,
}

impl PipelineManager {
    /// Create the bind group layout and the initial pipeline.
    ///
    /// Falls back to [`EMBEDDED_SHADER`] when `shader_path` is `None` or
    /// cannot be read. A source that fails validation is an error here.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        shader_path: Option<PathBuf>,
        accumulation: bool,
    ) -> BackendResult<(Self, BindGroupLayoutHandle, ComputePipelineHandle)> {
        let output_format = backend.swapchain_format();
        let layout =
            backend.create_bind_group_layout(&layout_entries(output_format, accumulation))?;

        let watcher = shader_path
            .as_deref()
            .and_then(|path| match ShaderWatcher::new(path) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    log::warn!("Shader hot reload disabled for {}: {}", path.display(), err);
                    None
                }
            });

        let mut manager = Self {
            shader_path,
            watcher,
            last_source: None,
            output_format,
            accumulation,
            layout,
        };

        let raw = match manager.read_source() {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("{}; using the embedded shader", err);
                EMBEDDED_SHADER.to_string()
            }
        };

        let built = manager.build(backend, &raw);
        manager.last_source = Some(raw);
        match built {
            Ok(pipeline) => {
                log::info!(
                    "Ray-march pipeline created (entry point '{}', output {:?})",
                    manager.entry_point(),
                    output_format
                );
                Ok((manager, layout, pipeline))
            }
            Err(err) => {
                backend.destroy_bind_group_layout(layout);
                Err(BackendError::ShaderCreationFailed(err.to_string()))
            }
        }
    }

    pub fn entry_point(&self) -> &'static str {
        if self.accumulation {
            ENTRY_POINT_ACCUMULATE
        } else {
            ENTRY_POINT
        }
    }

    pub fn shader_path(&self) -> Option<&Path> {
        self.shader_path.as_deref()
    }

    /// Rebuild the pipeline if the shader file was written since the last call.
    ///
    /// A source identical to the previous attempt is skipped, so one save
    /// arriving as several events builds once and a rejected source is
    /// reported once.
    pub fn reload_all<B: GraphicsBackend>(&mut self, backend: &mut B) -> ReloadOutcome {
        let Some(watcher) = &self.watcher else {
            return ReloadOutcome::Unchanged;
        };
        if !watcher.poll_changed() {
            return ReloadOutcome::Unchanged;
        }

        let raw = match self.read_source() {
            Ok(raw) => raw,
            Err(err) => return ReloadOutcome::Failed(err),
        };
        if self.last_source.as_deref() == Some(raw.as_str()) {
            return ReloadOutcome::Unchanged;
        }

        if let Some(path) = self.shader_path.as_deref() {
            log::info!("Shader changed, rebuilding: {}", path.display());
        }
        let built = self.build(backend, &raw);
        self.last_source = Some(raw);
        match built {
            Ok(pipeline) => ReloadOutcome::Succeeded(pipeline),
            Err(err) => ReloadOutcome::Failed(err),
        }
    }

    fn read_source(&self) -> Result<String, ShaderError> {
        let Some(path) = self.shader_path.as_deref() else {
            return Ok(EMBEDDED_SHADER.to_string());
        };
        std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn build<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        raw: &str,
    ) -> Result<ComputePipelineHandle, ShaderError> {
        let entry_point = self.entry_point();
        let shader = prepare_source(raw, self.output_format, entry_point)?;
        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(entry_point.to_string()),
            shader,
            entry_point: entry_point.to_string(),
            bind_group_layouts: vec![self.layout],
        })?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use rstest::rstest;
    use std::time::{Duration, Instant, SystemTime};

    fn temp_shader(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vox_dda_pipeline_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Replace a file the way editors do: write a sibling, then rename it over.
    ///
    /// With `modified` set, the new file carries that timestamp.
    fn replace(path: &Path, contents: &str, modified: Option<SystemTime>) {
        let staged = path.with_extension("wgsl.staged");
        std::fs::write(&staged, contents).unwrap();
        if let Some(modified) = modified {
            let file = std::fs::File::options().write(true).open(&staged).unwrap();
            file.set_modified(modified).unwrap();
        }
        std::fs::rename(&staged, path).unwrap();
    }

    /// Poll until the watcher delivers something other than `Unchanged`
    fn next_reload(manager: &mut PipelineManager, backend: &mut DummyBackend) -> ReloadOutcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let outcome = manager.reload_all(backend);
            if !matches!(outcome, ReloadOutcome::Unchanged) || Instant::now() > deadline {
                return outcome;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Let straggling events for the same write arrive, then poll them away
    fn settle(manager: &mut PipelineManager, backend: &mut DummyBackend) -> ReloadOutcome {
        std::thread::sleep(Duration::from_millis(200));
        manager.reload_all(backend)
    }

    #[rstest]
    #[case::rgba(TextureFormat::Rgba8Unorm, ENTRY_POINT)]
    #[case::bgra(TextureFormat::Bgra8Unorm, ENTRY_POINT)]
    #[case::accumulate(TextureFormat::Rgba8Unorm, ENTRY_POINT_ACCUMULATE)]
    fn test_embedded_shader_validates(#[case] format: TextureFormat, #[case] entry_point: &str) {
        let source = prepare_source(EMBEDDED_SHADER, format, entry_point).unwrap();
        assert!(!source.contains(OUTPUT_FORMAT_PLACEHOLDER));
        assert!(source.contains(format.wgsl_name()));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = prepare_source(EMBEDDED_SHADER, TextureFormat::Rgba8Unorm, "main").unwrap_err();
        assert!(matches!(err, ShaderError::MissingEntryPoint(name) if name == "main"));
    }

    #[test]
    fn test_parse_error_reported() {
        let err =
            prepare_source("fn broken( {", TextureFormat::Rgba8Unorm, ENTRY_POINT).unwrap_err();
        assert!(matches!(err, ShaderError::Parse(_)));
    }

    #[test]
    fn test_layout_depends_on_accumulation() {
        let plain = layout_entries(TextureFormat::Rgba8Unorm, false);
        let accumulating = layout_entries(TextureFormat::Rgba8Unorm, true);
        assert_eq!(plain.len(), 4);
        assert_eq!(accumulating.len(), 6);
        assert_eq!(
            accumulating[5].ty,
            BindingType::StorageTexture {
                format: TextureFormat::Rgba16Float
            }
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_embedded() {
        let mut backend = DummyBackend::default();
        let path = std::env::temp_dir().join("vox_dda_pipeline_tests/does_not_exist.wgsl");
        let (mut manager, _, _) = PipelineManager::new(&mut backend, Some(path), false).unwrap();
        assert_eq!(backend.live_compute_pipelines(), 1);
        assert!(matches!(manager.reload_all(&mut backend), ReloadOutcome::Unchanged));
    }

    #[test]
    fn test_invalid_initial_shader_is_an_error() {
        let mut backend = DummyBackend::default();
        let path = temp_shader("invalid_initial.wgsl", "not wgsl");
        let result = PipelineManager::new(&mut backend, Some(path), false);
        assert!(matches!(result, Err(BackendError::ShaderCreationFailed(_))));
        assert_eq!(backend.invalid_destroys(), 0);
    }

    #[test]
    fn test_reload_cycle() {
        let mut backend = DummyBackend::default();
        let path = temp_shader("reload_cycle.wgsl", EMBEDDED_SHADER);
        let (mut manager, _, initial) =
            PipelineManager::new(&mut backend, Some(path.clone()), true).unwrap();

        assert!(matches!(manager.reload_all(&mut backend), ReloadOutcome::Unchanged));

        replace(&path, "broken", None);
        assert!(matches!(
            next_reload(&mut manager, &mut backend),
            ReloadOutcome::Failed(ShaderError::Parse(_))
        ));
        // Reported once per change
        assert!(matches!(settle(&mut manager, &mut backend), ReloadOutcome::Unchanged));

        replace(&path, EMBEDDED_SHADER, None);
        match next_reload(&mut manager, &mut backend) {
            ReloadOutcome::Succeeded(pipeline) => assert_ne!(pipeline, initial),
            other => panic!("expected a new pipeline, got {:?}", other),
        }
        assert!(matches!(settle(&mut manager, &mut backend), ReloadOutcome::Unchanged));
    }

    #[test]
    fn test_edit_keeping_the_timestamp_is_seen() {
        let mut backend = DummyBackend::default();
        let path = temp_shader("same_timestamp.wgsl", EMBEDDED_SHADER);
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        let (mut manager, _, _) =
            PipelineManager::new(&mut backend, Some(path.clone()), false).unwrap();

        replace(&path, "this is not wgsl", Some(modified));
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
        assert!(matches!(
            next_reload(&mut manager, &mut backend),
            ReloadOutcome::Failed(ShaderError::Parse(_))
        ));
    }

    #[test]
    fn test_shader_created_after_startup_is_picked_up() {
        let mut backend = DummyBackend::default();
        let dir = std::env::temp_dir().join("vox_dda_pipeline_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("created_later.wgsl");
        let _ = std::fs::remove_file(&path);

        let (mut manager, _, initial) =
            PipelineManager::new(&mut backend, Some(path.clone()), false).unwrap();
        assert!(matches!(manager.reload_all(&mut backend), ReloadOutcome::Unchanged));

        let edited = format!("{}\n// tweaked\n", EMBEDDED_SHADER);
        replace(&path, &edited, None);
        match next_reload(&mut manager, &mut backend) {
            ReloadOutcome::Succeeded(pipeline) => assert_ne!(pipeline, initial),
            other => panic!("expected a new pipeline, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_rejection_keeps_old_pipeline() {
        let mut backend = DummyBackend::default();
        let path = temp_shader("backend_rejection.wgsl", EMBEDDED_SHADER);
        let (mut manager, _, _) =
            PipelineManager::new(&mut backend, Some(path.clone()), false).unwrap();

        backend.script_pipeline_failures(1);
        replace(&path, &format!("{}\n// touched\n", EMBEDDED_SHADER), None);
        assert!(matches!(
            next_reload(&mut manager, &mut backend),
            ReloadOutcome::Failed(ShaderError::Backend(_))
        ));
        assert_eq!(backend.live_compute_pipelines(), 1);
    }
}
