use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use archviz_core::{run, Config, Renderer};
use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "archviz",
    version,
    about = "Parse an architecture model against a grammar and render it with Graphviz"
)]
struct Cli {
    /// Grammar definition file
    #[arg(long, env = "ARCHVIZ_GRAMMAR", default_value = "metamodel.tx")]
    grammar: PathBuf,

    /// Model file to load
    #[arg(long, env = "ARCHVIZ_MODEL", default_value = "rts.arch")]
    model: PathBuf,

    /// Base name of the generated .dot and image files
    #[arg(long, short, env = "ARCHVIZ_OUTPUT", default_value = "modelo")]
    output: PathBuf,

    /// Graphviz program used to render the image
    #[arg(long, env = "ARCHVIZ_RENDERER", default_value = "dot")]
    renderer: String,

    /// Image format passed to the renderer
    #[arg(long, short = 'T', env = "ARCHVIZ_FORMAT", default_value = "png")]
    format: String,

    /// Also export the grammar's class diagram to this DOT file
    #[arg(long, env = "ARCHVIZ_METAMODEL_DOT")]
    metamodel_dot: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> Config {
        let renderer = Renderer::default()
            .with_program(&self.renderer)
            .with_format(&self.format);
        let config = Config::default()
            .with_grammar(&self.grammar)
            .with_model(&self.model)
            .with_output(&self.output)
            .with_renderer(renderer);
        match &self.metamodel_dot {
            Some(path) => config.with_metamodel_dot(path),
            None => config,
        }
    }

    fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let config = cli.config();
    tracing::debug!(?config, "starting");

    let stdout = io::stdout();
    match run(&config, &mut stdout.lock()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_VARS: [&str; 6] = [
        "ARCHVIZ_GRAMMAR",
        "ARCHVIZ_MODEL",
        "ARCHVIZ_OUTPUT",
        "ARCHVIZ_RENDERER",
        "ARCHVIZ_FORMAT",
        "ARCHVIZ_METAMODEL_DOT",
    ];

    #[test]
    fn test_defaults() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
        let cli = Cli::parse_from(["archviz"]);
        let config = cli.config();
        assert_eq!(config, Config::default());
        assert_eq!(cli.log_level(), Level::WARN);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "archviz",
            "--grammar",
            "g.tx",
            "--model",
            "m.arch",
            "-o",
            "out/diagram",
            "--renderer",
            "neato",
            "-T",
            "svg",
            "--metamodel-dot",
            "grammar.dot",
            "-vv",
        ]);
        let config = cli.config();
        assert_eq!(config.grammar, PathBuf::from("g.tx"));
        assert_eq!(config.model, PathBuf::from("m.arch"));
        assert_eq!(config.renderer.program, "neato");
        assert_eq!(config.image_path(), PathBuf::from("out/diagram.svg"));
        assert_eq!(config.metamodel_dot, Some(PathBuf::from("grammar.dot")));
        assert_eq!(cli.log_level(), Level::DEBUG);
    }
}
