//! archviz-core: loads a textual grammar, parses architecture models against it
//! and exports them as Graphviz diagrams
//!
//! # Example
//!
//! ```
//! use archviz_core::{model_to_dot, Metamodel, Model};
//!
//! let grammar = r#"
//! Box: 'Box' name=ID;
//! "#;
//!
//! let metamodel = Metamodel::from_str(grammar).unwrap();
//! let model = Model::from_str(&metamodel, "Box A").unwrap();
//! let dot = model_to_dot(&model);
//! assert!(dot.contains("{A:Box|}"));
//! ```
//!
//! # Full pipeline
//!
//! ```no_run
//! use archviz_core::{run, Config};
//!
//! let config = Config::default().with_output("out/architecture");
//! let outcome = run(&config, &mut std::io::stdout()).unwrap();
//! if !outcome.is_generated() {
//!     eprintln!("no image");
//! }
//! ```

pub mod error;
pub mod export;
mod grammar;
mod loader;
pub mod metamodel;
pub mod model;
pub mod pipeline;
pub mod render;

pub use error::{Error, ParseError};
pub use export::{metamodel_to_dot, model_to_dot, write_metamodel_dot, write_model_dot};
pub use metamodel::{Attribute, AttributeKind, Metamodel, Multiplicity, Rule, RuleKind};
pub use model::{Model, Object, ObjectId, Value};
pub use pipeline::{run, Config};
pub use render::{open_hint, RenderOutcome, Renderer};
