//! Audio/video inspection through ffprobe and ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

/// Inspects timed media stored on disk.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Duration in seconds, `None` when unknown.
    async fn duration(&self, path: &Path) -> Option<f64>;

    /// A JPEG still from a video, `None` when unavailable.
    async fn thumbnail(&self, path: &Path) -> Option<Vec<u8>>;
}

/// Probe that knows nothing. Used when ffprobe is not installed.
#[derive(Debug, Default)]
pub struct NoopProbe;

#[async_trait]
impl MediaProbe for NoopProbe {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn duration(&self, _path: &Path) -> Option<f64> {
        None
    }

    async fn thumbnail(&self, _path: &Path) -> Option<Vec<u8>> {
        None
    }
}

/// Probe backed by the ffprobe/ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffprobe: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl FfmpegProbe {
    /// Locate the binaries in `PATH`. Returns `None` without ffprobe.
    pub fn locate() -> Option<Self> {
        let ffprobe = which::which("ffprobe").ok()?;
        let ffmpeg = which::which("ffmpeg").ok();
        Some(Self { ffprobe, ffmpeg })
    }
}

/// Best available probe for this machine.
pub fn detect_probe() -> Arc<dyn MediaProbe> {
    match FfmpegProbe::locate() {
        Some(probe) => {
            tracing::debug!("Using ffprobe at {}", probe.ffprobe.display());
            Arc::new(probe)
        }
        None => {
            tracing::debug!("ffprobe not found, media duration checks disabled");
            Arc::new(NoopProbe)
        }
    }
}

#[async_trait]
impl MediaProbe for FfmpegProbe {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            tracing::debug!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn thumbnail(&self, path: &Path) -> Option<Vec<u8>> {
        let ffmpeg = self.ffmpeg.as_ref()?;
        let output = Command::new(ffmpeg)
            .args(["-v", "error", "-ss", "1", "-i"])
            .arg(path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .ok()?;

        if !output.status.success() || output.stdout.is_empty() {
            return None;
        }
        Some(output.stdout)
    }
}

fn parse_duration(text: &str) -> Option<f64> {
    text.lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("612.345000\n"), Some(612.345));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[tokio::test]
    async fn test_noop_probe() {
        let probe = NoopProbe;
        assert_eq!(probe.duration(Path::new("/nope.mp3")).await, None);
        assert!(probe.thumbnail(Path::new("/nope.mp4")).await.is_none());
    }
}
