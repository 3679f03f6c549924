//! Camera capability, the external-command camera and the capture lock.

use std::future::Future;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use pisentry_core::capture::{format_timestamp, image_path};
use pisentry_core::motion::parse_vector_line;
use pisentry_core::{CaptureArtifact, CaptureMode, CaptureRequest, MotionThresholds, MotionTrigger};

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("{0} command is empty")]
    EmptyCommand(&'static str),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exit code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("capture produced no file at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Camera driver. Calls may block; async callers use the blocking pool.
pub trait Camera: Send + Sync {
    /// Begin motion analysis. `trigger` is fired on every motion frame.
    fn start_motion_analysis(&self, trigger: MotionTrigger) -> Result<(), CameraError>;

    /// Stop motion analysis. Stopping when not running is a no-op.
    fn stop_motion_analysis(&self) -> Result<(), CameraError>;

    fn capture_photo(&self, request: &CaptureRequest) -> Result<Vec<PathBuf>, CameraError>;

    fn capture_gif(&self, request: &CaptureRequest) -> Result<PathBuf, CameraError>;

    fn capture(&self, request: &CaptureRequest) -> Result<CaptureArtifact, CameraError> {
        let paths = match request.mode {
            CaptureMode::Photo => self.capture_photo(request)?,
            CaptureMode::Gif => vec![self.capture_gif(request)?],
        };
        Ok(CaptureArtifact::new(paths, request.requested_at, request.mode))
    }
}

// ─── CommandCamera ───────────────────────────────────────────────

/// Settings for [`CommandCamera`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCameraConfig {
    pub save_path: PathBuf,
    pub photo_size: (u32, u32),
    pub gif_size: (u32, u32),
    pub photo_command: Vec<String>,
    pub gif_command: Vec<String>,
    pub motion_command: Vec<String>,
    pub thresholds: MotionThresholds,
}

struct MotionProcess {
    child: Child,
    reader: Option<JoinHandle<()>>,
}

/// Camera backed by external helper programs.
///
/// Each command is an argv template; `{path}`, `{count}`, `{width}` and
/// `{height}` are substituted before running. The motion helper runs until
/// stopped and prints one line of `x,y` vectors per analysed frame.
pub struct CommandCamera {
    config: CommandCameraConfig,
    motion: Mutex<Option<MotionProcess>>,
}

impl CommandCamera {
    pub fn new(config: CommandCameraConfig) -> Self {
        Self {
            config,
            motion: Mutex::new(None),
        }
    }

    fn stop_locked(slot: &mut Option<MotionProcess>) -> Result<(), CameraError> {
        let Some(mut process) = slot.take() else {
            return Ok(());
        };
        // Already exited is fine.
        let _ = process.child.kill();
        process.child.wait()?;
        if let Some(reader) = process.reader.take() {
            let _ = reader.join();
        }
        tracing::debug!("motion analysis stopped");
        Ok(())
    }
}

impl Drop for CommandCamera {
    fn drop(&mut self) {
        let mut slot = self.motion.lock().unwrap_or_else(|e| e.into_inner());
        let _ = Self::stop_locked(&mut slot);
    }
}

impl Camera for CommandCamera {
    fn start_motion_analysis(&self, trigger: MotionTrigger) -> Result<(), CameraError> {
        let mut slot = self.motion.lock().unwrap_or_else(|e| e.into_inner());
        Self::stop_locked(&mut slot)?;

        let argv = render("motion", &self.config.motion_command, &[])?;
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CameraError::Spawn {
                program: argv[0].clone(),
                source,
            })?;

        let thresholds = self.config.thresholds;
        let reader = child.stdout.take().map(|stdout| {
            std::thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if let Some(count) = thresholds.detect(&parse_vector_line(&line)) {
                        tracing::debug!("motion frame: {count} vectors above threshold");
                        trigger.fire();
                    }
                }
            })
        });

        tracing::debug!("motion analysis started");
        *slot = Some(MotionProcess { child, reader });
        Ok(())
    }

    fn stop_motion_analysis(&self) -> Result<(), CameraError> {
        let mut slot = self.motion.lock().unwrap_or_else(|e| e.into_inner());
        Self::stop_locked(&mut slot)
    }

    fn capture_photo(&self, request: &CaptureRequest) -> Result<Vec<PathBuf>, CameraError> {
        let ts = format_timestamp(request.requested_at);
        let (width, height) = self.config.photo_size;
        (1..=request.count.max(1))
            .map(|n| {
                let path = image_path(&self.config.save_path, &ts, Some(&n.to_string()), ".jpeg");
                run_capture(
                    "photo",
                    &self.config.photo_command,
                    &path,
                    &[
                        ("{count}", "1".to_string()),
                        ("{width}", width.to_string()),
                        ("{height}", height.to_string()),
                    ],
                )?;
                tracing::debug!("captured photo {}", path.display());
                Ok(path)
            })
            .collect()
    }

    fn capture_gif(&self, request: &CaptureRequest) -> Result<PathBuf, CameraError> {
        let ts = format_timestamp(request.requested_at);
        let (width, height) = self.config.gif_size;
        let path = image_path(&self.config.save_path, &ts, None, ".gif");
        run_capture(
            "gif",
            &self.config.gif_command,
            &path,
            &[
                ("{count}", request.count.to_string()),
                ("{width}", width.to_string()),
                ("{height}", height.to_string()),
            ],
        )?;
        tracing::debug!("captured gif {}", path.display());
        Ok(path)
    }
}

/// Substitute placeholders in every argument. The program must be non-empty.
fn render(
    kind: &'static str,
    template: &[String],
    vars: &[(&str, String)],
) -> Result<Vec<String>, CameraError> {
    let argv: Vec<String> = template
        .iter()
        .map(|arg| {
            vars.iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect();
    match argv.first() {
        Some(program) if !program.is_empty() => Ok(argv),
        _ => Err(CameraError::EmptyCommand(kind)),
    }
}

fn run_capture(
    kind: &'static str,
    template: &[String],
    path: &std::path::Path,
    vars: &[(&str, String)],
) -> Result<(), CameraError> {
    let mut vars = vars.to_vec();
    vars.push(("{path}", path.display().to_string()));
    let argv = render(kind, template, &vars)?;

    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CameraError::Spawn {
            program: argv[0].clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(CameraError::Failed {
            program: argv[0].clone(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    if !path.exists() {
        return Err(CameraError::MissingOutput(path.to_path_buf()));
    }
    Ok(())
}

/// Build the request a capture task sends to the camera.
pub fn capture_request(at: DateTime<Utc>, mode: CaptureMode, count: u32) -> CaptureRequest {
    CaptureRequest {
        requested_at: at,
        mode,
        count,
    }
}

/// Run a camera call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, CameraError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CameraError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CameraError::Io(std::io::Error::other(e)))?
}

// ─── CaptureLock ─────────────────────────────────────────────────

/// Mutual exclusion between motion analysis and captures.
///
/// Every acquisition bumps an epoch so a holder of a previous epoch (the
/// supervisor while watching) can tell that someone else captured in the
/// meantime and stopped analysis.
#[derive(Clone, Default)]
pub struct CaptureLock {
    inner: Arc<AsyncMutex<()>>,
    epoch: Arc<AtomicU64>,
}

/// Held while the camera is reserved.
pub struct CaptureGuard {
    _guard: OwnedMutexGuard<()>,
    epoch: u64,
}

impl CaptureGuard {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl CaptureLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, guard: OwnedMutexGuard<()>) -> CaptureGuard {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        CaptureGuard {
            _guard: guard,
            epoch,
        }
    }

    pub fn try_acquire(&self) -> Option<CaptureGuard> {
        let guard = Arc::clone(&self.inner).try_lock_owned().ok()?;
        Some(self.stamp(guard))
    }

    pub async fn acquire(&self) -> CaptureGuard {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        self.stamp(guard)
    }

    /// Epoch of the most recent acquisition.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Run `f` with the camera reserved.
    pub async fn exclusive<F, T>(&self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        f.await
    }
}
