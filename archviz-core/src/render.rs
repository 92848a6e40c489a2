//! Invokes the external Graphviz renderer on an exported DOT file

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

/// External renderer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    /// Program to run (`dot` by default)
    pub program: String,
    /// Output format passed as `-T<format>`; also the image extension
    pub format: String,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            program: "dot".to_string(),
            format: "png".to_string(),
        }
    }
}

/// What the rendering step observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The image exists after the renderer ran
    Generated { image: PathBuf },
    /// No image was produced; the renderer is probably missing
    Unavailable { image: PathBuf, program: String },
}

impl RenderOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, RenderOutcome::Generated { .. })
    }
}

impl Renderer {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Run the renderer and check for the image.
    ///
    /// The outcome is `Generated` when `image` exists afterwards and either
    /// the renderer succeeded or the file was created or modified by this
    /// run. An older image is left in place but not reported.
    pub fn render(&self, dot: &Path, image: &Path) -> RenderOutcome {
        let before = modified(image);

        tracing::debug!(program = %self.program, format = %self.format, "running renderer");
        let status = Command::new(&self.program)
            .arg(format!("-T{}", self.format))
            .arg(dot)
            .arg("-o")
            .arg(image)
            .status();
        let succeeded = match status {
            Ok(status) if status.success() => {
                tracing::debug!(%status, "renderer finished");
                true
            }
            Ok(status) => {
                tracing::warn!(program = %self.program, %status, "renderer exited with failure");
                false
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "failed to run renderer");
                false
            }
        };

        // Timestamps can be too coarse to tell a quick rewrite apart
        let after = modified(image);
        if after.is_some() && (succeeded || after != before) {
            RenderOutcome::Generated {
                image: image.to_path_buf(),
            }
        } else {
            RenderOutcome::Unavailable {
                image: image.to_path_buf(),
                program: self.program.clone(),
            }
        }
    }
}

/// Modification time, `None` when the file is missing
fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Command that opens a file on this platform, with the platform label
pub fn open_hint() -> (&'static str, &'static str) {
    if cfg!(target_os = "macos") {
        ("open", "macOS")
    } else if cfg!(target_os = "windows") {
        ("start", "Windows")
    } else {
        ("xdg-open", "Linux")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let dot = dir.path().join("model.dot");
        let image = dir.path().join("model.png");
        fs::write(&dot, "digraph model {}\n").unwrap();

        let renderer = Renderer::default().with_program("archviz-no-such-renderer");
        let outcome = renderer.render(&dot, &image);

        assert_eq!(
            outcome,
            RenderOutcome::Unavailable {
                image: image.clone(),
                program: "archviz-no-such-renderer".to_string(),
            }
        );
        assert!(!image.exists());
    }

    #[test]
    fn test_previous_image_survives_missing_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let dot = dir.path().join("model.dot");
        let image = dir.path().join("model.png");
        fs::write(&dot, "digraph model {}\n").unwrap();
        fs::write(&image, "previous diagram").unwrap();

        let outcome = Renderer::default()
            .with_program("archviz-no-such-renderer")
            .render(&dot, &image);

        assert!(!outcome.is_generated());
        assert_eq!(fs::read_to_string(&image).unwrap(), "previous diagram");
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_with_fake_renderer() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-dot");
        // Arguments: -T<fmt> <input> -o <output>
        fs::write(&script, "#!/bin/sh\ncp \"$2\" \"$4\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let dot = dir.path().join("model.dot");
        let image = dir.path().join("model.svg");
        fs::write(&dot, "digraph model {}\n").unwrap();

        let renderer = Renderer::default()
            .with_program(script.to_string_lossy())
            .with_format("svg");
        // A parallel test forking while the script is still open makes exec fail with ETXTBSY
        let mut outcome = renderer.render(&dot, &image);
        for _ in 0..5 {
            if outcome.is_generated() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
            outcome = renderer.render(&dot, &image);
        }

        assert_eq!(outcome, RenderOutcome::Generated { image: image.clone() });
        assert_eq!(fs::read_to_string(&image).unwrap(), "digraph model {}\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_image_after_failed_render() {
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let dot = dir.path().join("model.dot");
        let image = dir.path().join("model.png");
        fs::write(&dot, "digraph model {}\n").unwrap();
        fs::write(&image, "previous diagram").unwrap();
        fs::File::options()
            .write(true)
            .open(&image)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(3600))
            .unwrap();

        let outcome = Renderer::default().with_program("false").render(&dot, &image);

        assert!(!outcome.is_generated());
        assert_eq!(fs::read_to_string(&image).unwrap(), "previous diagram");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_renderer_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let dot = dir.path().join("model.dot");
        let image = dir.path().join("model.png");
        fs::write(&dot, "digraph model {}\n").unwrap();

        let outcome = Renderer::default().with_program("false").render(&dot, &image);
        assert!(!outcome.is_generated());
    }

    #[test]
    fn test_open_hint() {
        let (command, platform) = open_hint();
        assert!(!command.is_empty());
        assert!(!platform.is_empty());
    }
}
