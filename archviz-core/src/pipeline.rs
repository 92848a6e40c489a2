//! The load, export and render pipeline

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::export;
use crate::metamodel::Metamodel;
use crate::model::Model;
use crate::render::{open_hint, RenderOutcome, Renderer};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Grammar definition file
    pub grammar: PathBuf,
    /// Model instance file
    pub model: PathBuf,
    /// Base name of the generated files, without extension
    pub output: PathBuf,
    /// External renderer
    pub renderer: Renderer,
    /// Also write the grammar's class diagram here
    pub metamodel_dot: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grammar: PathBuf::from("metamodel.tx"),
            model: PathBuf::from("rts.arch"),
            output: PathBuf::from("modelo"),
            renderer: Renderer::default(),
            metamodel_dot: None,
        }
    }
}

impl Config {
    pub fn with_grammar(mut self, path: impl Into<PathBuf>) -> Self {
        self.grammar = path.into();
        self
    }

    pub fn with_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model = path.into();
        self
    }

    pub fn with_output(mut self, base: impl Into<PathBuf>) -> Self {
        self.output = base.into();
        self
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_metamodel_dot(mut self, path: impl Into<PathBuf>) -> Self {
        self.metamodel_dot = Some(path.into());
        self
    }

    /// `<output>.dot`
    pub fn dot_path(&self) -> PathBuf {
        with_suffix(&self.output, "dot")
    }

    /// `<output>.<format>`
    pub fn image_path(&self) -> PathBuf {
        with_suffix(&self.output, &self.renderer.format)
    }
}

/// Append an extension without replacing one already in the base name
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Run the pipeline, writing status lines to `out`
pub fn run(config: &Config, out: &mut impl Write) -> Result<RenderOutcome, Error> {
    tracing::info!(path = %config.grammar.display(), "loading grammar");
    let metamodel = Metamodel::from_file(&config.grammar).map_err(|source| Error::Parse {
        path: config.grammar.clone(),
        source,
    })?;
    tracing::debug!(rules = metamodel.rules().len(), root = %metamodel.root().name, "grammar loaded");

    if let Some(path) = &config.metamodel_dot {
        export::write_metamodel_dot(&metamodel, path).map_err(|source| Error::Export {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "grammar diagram exported");
    }

    tracing::info!(path = %config.model.display(), "loading model");
    let model = Model::from_file(&metamodel, &config.model).map_err(|source| Error::Parse {
        path: config.model.clone(),
        source,
    })?;
    status(out, format_args!("Model loaded: {}", model));

    let dot = config.dot_path();
    export::write_model_dot(&model, &dot).map_err(|source| Error::Export {
        path: dot.clone(),
        source,
    })?;
    tracing::info!(path = %dot.display(), "model exported");
    status(out, format_args!("Model exported to '{}'", dot.display()));

    let image = config.image_path();
    let outcome = config.renderer.render(&dot, &image);
    match &outcome {
        RenderOutcome::Generated { image } => {
            let (open, platform) = open_hint();
            status(out, format_args!("Image generated: {}", image.display()));
            status(
                out,
                format_args!("{} {}  # ({})", open, image.display(), platform),
            );
        }
        RenderOutcome::Unavailable { program, .. } => {
            tracing::warn!(image = %image.display(), "no image produced");
            status(
                out,
                format_args!(
                    "Could not generate the image. Is Graphviz ('{}') installed?",
                    program
                ),
            );
        }
    }

    Ok(outcome)
}

/// Console output failures are not pipeline failures
fn status(out: &mut impl Write, line: std::fmt::Arguments<'_>) {
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() != io::ErrorKind::BrokenPipe {
            tracing::warn!(error = %e, "could not write status line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.grammar, PathBuf::from("metamodel.tx"));
        assert_eq!(config.model, PathBuf::from("rts.arch"));
        assert_eq!(config.dot_path(), PathBuf::from("modelo.dot"));
        assert_eq!(config.image_path(), PathBuf::from("modelo.png"));
    }

    #[test]
    fn test_output_base_keeps_dots() {
        let config = Config::default()
            .with_output("out/model.v1")
            .with_renderer(Renderer::default().with_format("svg"));
        assert_eq!(config.dot_path(), PathBuf::from("out/model.v1.dot"));
        assert_eq!(config.image_path(), PathBuf::from("out/model.v1.svg"));
    }
}
