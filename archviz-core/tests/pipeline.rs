use std::fs;
use std::path::{Path, PathBuf};

use archviz_core::{run, Config, Error, ParseError, RenderOutcome, Renderer};
use pretty_assertions::assert_eq;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn config(dir: &Path) -> Config {
    Config::default()
        .with_grammar(fixture("metamodel.tx"))
        .with_model(fixture("rts.arch"))
        .with_output(dir.join("modelo"))
        .with_renderer(Renderer::default().with_program("archviz-no-such-renderer"))
}

fn run_captured(config: &Config) -> (Result<RenderOutcome, Error>, String) {
    let mut out = Vec::new();
    let result = run(config, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn exports_model_without_renderer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let (result, output) = run_captured(&config);
    let outcome = result.unwrap();

    assert!(!outcome.is_generated());
    let dot = fs::read_to_string(config.dot_path()).unwrap();
    assert!(dot.starts_with("digraph model {"));
    assert!(dot.contains("{rts:System|}"));
    assert!(dot.contains("{sensor:Component|period:int=10\\lcritical:bool=false\\l}"));
    assert!(dot.contains("[label=\"from\" dir=forward]"));

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        [
            "Model loaded: System 'rts' (10 objects)".to_string(),
            format!("Model exported to '{}'", config.dot_path().display()),
            "Could not generate the image. Is Graphviz ('archviz-no-such-renderer') installed?"
                .to_string(),
        ]
    );
}

#[test]
fn repeated_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let (first, first_output) = run_captured(&config);
    let first_dot = fs::read_to_string(config.dot_path()).unwrap();
    let (second, second_output) = run_captured(&config);
    let second_dot = fs::read_to_string(config.dot_path()).unwrap();

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(first_output, second_output);
    assert_eq!(first_dot, second_dot);
}

#[test]
fn minimal_box_model() {
    let dir = tempfile::tempdir().unwrap();
    let grammar = dir.path().join("box.tx");
    let model = dir.path().join("box.model");
    fs::write(&grammar, "Box: 'Box' name=ID;\n").unwrap();
    fs::write(&model, "Box A\n").unwrap();

    let config = config(dir.path()).with_grammar(&grammar).with_model(&model);
    let (result, output) = run_captured(&config);
    result.unwrap();

    assert!(output.starts_with("Model loaded: Box 'A' (1 object)\n"));
    let dot = fs::read_to_string(config.dot_path()).unwrap();
    assert!(dot.contains("0[label=\"{A:Box|}\"]"));
}

#[test]
fn nonconforming_model_stops_before_export() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("broken.arch");
    fs::write(&model, "system rts {\n    component sensor period ten ms { }\n}\n").unwrap();

    let config = config(dir.path()).with_model(&model);
    let (result, output) = run_captured(&config);

    match result {
        Err(Error::Parse {
            path,
            source: ParseError::SyntaxError { line, .. },
        }) => {
            assert_eq!(path, model);
            assert_eq!(line, 2);
        }
        other => panic!("Expected syntax error, got {other:?}"),
    }
    assert!(output.is_empty());
    assert!(!config.dot_path().exists());
}

#[test]
fn unresolved_reference_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("dangling.arch");
    fs::write(
        &model,
        "system rts {\n    component a { out x: \"int\"; }\n    connect a.x -> b.y;\n}\n",
    )
    .unwrap();

    let config = config(dir.path()).with_model(&model);
    let (result, _) = run_captured(&config);

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        Error::Parse {
            source: ParseError::SemanticError { line: 3, .. },
            ..
        }
    ));
    assert!(err.to_string().contains("unknown object 'b.y'"), "{err}");
    assert!(!config.dot_path().exists());
}

#[test]
fn missing_grammar_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_grammar(dir.path().join("missing.tx"));

    let (result, output) = run_captured(&config);
    assert!(matches!(
        result,
        Err(Error::Parse {
            source: ParseError::Read(_),
            ..
        })
    ));
    assert!(output.is_empty());
}

#[test]
fn invalid_grammar() {
    let dir = tempfile::tempdir().unwrap();
    let grammar = dir.path().join("bad.tx");
    fs::write(&grammar, "System: 'system' parts*=Part;\n").unwrap();

    let config = config(dir.path()).with_grammar(&grammar);
    let (result, _) = run_captured(&config);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("undefined"), "{err}");
}

#[test]
fn metamodel_diagram_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let diagram = dir.path().join("metamodel.dot");
    let config = config(dir.path()).with_metamodel_dot(&diagram);

    let (result, _) = run_captured(&config);
    result.unwrap();

    let dot = fs::read_to_string(&diagram).unwrap();
    assert!(dot.starts_with("digraph metamodel {"));
    assert!(dot.contains("System -> Component [headlabel=\"components 0..*\""));
    assert!(dot.contains("Connection -> Port [headlabel=\"from 1\" dir=forward]"));
}

#[test]
fn unwritable_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_output(dir.path().join("no/such/dir/modelo"));

    let (result, output) = run_captured(&config);
    assert!(matches!(result, Err(Error::Export { .. })));
    assert!(output.starts_with("Model loaded:"));
    assert!(!output.contains("Model exported"));
}

/// Shell script standing in for `dot`: copies the input to the `-o` path
#[cfg(unix)]
fn fake_renderer(dir: &Path) -> Renderer {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-dot");
    fs::write(&script, "#!/bin/sh\ncp \"$2\" \"$4\"\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    Renderer::default().with_program(script.to_string_lossy())
}

/// exec can fail with ETXTBSY while a parallel test still holds a script open
#[cfg(unix)]
fn run_until_generated(config: &Config) -> (Result<RenderOutcome, Error>, String) {
    let mut attempt = run_captured(config);
    for _ in 0..5 {
        if matches!(attempt.0, Ok(ref outcome) if outcome.is_generated()) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        attempt = run_captured(config);
    }
    attempt
}

#[cfg(unix)]
#[test]
fn image_generated_with_renderer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_renderer(fake_renderer(dir.path()));

    let (result, output) = run_until_generated(&config);

    let image = config.image_path();
    assert_eq!(result.unwrap(), RenderOutcome::Generated { image: image.clone() });
    assert!(image.exists());

    let (open, platform) = archviz_core::open_hint();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[2], format!("Image generated: {}", image.display()));
    assert_eq!(lines[3], format!("{} {}  # ({})", open, image.display(), platform));
}

#[cfg(unix)]
#[test]
fn box_model_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let grammar = dir.path().join("box.tx");
    let model = dir.path().join("box.model");
    fs::write(&grammar, "Box: 'Box' name=ID;\n").unwrap();
    fs::write(&model, "Box A\n").unwrap();

    let config = config(dir.path())
        .with_grammar(&grammar)
        .with_model(&model)
        .with_renderer(fake_renderer(dir.path()));
    let (result, output) = run_until_generated(&config);

    assert!(result.unwrap().is_generated());
    let image = dir.path().join("modelo.png");
    let dot = fs::read_to_string(dir.path().join("modelo.dot")).unwrap();
    assert!(dot.contains("0[label=\"{A:Box|}\"]"));
    // The fake renderer copies the DOT text into the image
    assert_eq!(fs::read_to_string(&image).unwrap(), dot);

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "Model loaded: Box 'A' (1 object)");
    assert_eq!(lines[2], format!("Image generated: {}", image.display()));
    assert!(lines[3].ends_with(&format!("modelo.png  # ({})", archviz_core::open_hint().1)));
}
