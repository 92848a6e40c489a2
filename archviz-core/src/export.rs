//! Graphviz DOT export for models and metamodels

use std::collections::HashSet;
use std::fmt::Write;
use std::fs;
use std::io;
use std::path::Path;

use crate::metamodel::{AttributeKind, Metamodel, RuleKind};
use crate::model::{Model, ObjectId, Value};

const HEADER: &str = r#"fontname = "Bitstream Vera Sans"
fontsize = 8
node[
    shape=record,
    style=filled,
    fillcolor=aliceblue
]
nodesep = 0.3
edge[dir=back,arrowtail=empty]

"#;

const CONTAINMENT: &str = "arrowtail=diamond dir=both";
const REFERENCE: &str = "dir=forward";

/// Render a model as DOT text
pub fn model_to_dot(model: &Model) -> String {
    let mut out = String::new();
    out.push_str("digraph model {\n");
    out.push_str(HEADER);

    let mut visited = HashSet::new();
    export_object(model, model.root(), &mut visited, &mut out);

    out.push_str("}\n");
    out
}

/// Write a model as DOT to `path`, replacing any existing file
pub fn write_model_dot(model: &Model, path: impl AsRef<Path>) -> io::Result<()> {
    fs::write(path, model_to_dot(model))
}

/// Depth-first, edges first, then the node record itself
fn export_object(model: &Model, id: ObjectId, visited: &mut HashSet<ObjectId>, out: &mut String) {
    if !visited.insert(id) {
        return;
    }

    let object = model.object(id);
    let rule = model.metamodel().rule(&object.class);
    let mut attrs = String::new();

    for (name, value) in &object.attributes {
        let required = rule
            .and_then(|r| r.attribute(name))
            .map(|a| a.multiplicity.is_required())
            .unwrap_or(false);
        let marker = if required { "+" } else { "" };

        match value {
            Value::List(items) if items.iter().all(Value::is_primitive) => {
                let joined: Vec<String> = items.iter().map(dot_repr).collect();
                let _ = write!(attrs, "{}{}:list=[{}]\\l", marker, name, joined.join(","));
            }
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    let label = format!("{}:{}", name, i);
                    export_link(model, id, &label, item, visited, out);
                }
            }
            Value::Object(_) | Value::Ref(_) => {
                export_link(model, id, name, value, visited, out);
            }
            // Shown in the record title
            Value::Str(_) if name == "name" => {}
            primitive => {
                let _ = write!(
                    attrs,
                    "{}{}:{}={}\\l",
                    marker,
                    name,
                    primitive.type_name(),
                    dot_repr(primitive)
                );
            }
        }
    }

    let title = format!("{}:{}", object.name().map(dot_escape).unwrap_or_default(), object.class);
    let _ = writeln!(out, "{}[label=\"{{{}|{}}}\"]", id.index(), title, attrs);
}

fn export_link(
    model: &Model,
    owner: ObjectId,
    label: &str,
    value: &Value,
    visited: &mut HashSet<ObjectId>,
    out: &mut String,
) {
    match value {
        Value::Object(child) => {
            let _ = writeln!(
                out,
                "{} -> {} [label=\"{}\" {}]",
                owner.index(),
                child.index(),
                label,
                CONTAINMENT
            );
            export_object(model, *child, visited, out);
        }
        Value::Ref(target) => {
            let _ = writeln!(
                out,
                "{} -> {} [label=\"{}\" {}]",
                owner.index(),
                target.index(),
                label,
                REFERENCE
            );
        }
        primitive => {
            let _ = writeln!(
                out,
                "{} -> \"{}:{}\" [label=\"{}\" {}]",
                owner.index(),
                dot_escape(&primitive.to_string()),
                primitive.type_name(),
                label,
                CONTAINMENT
            );
        }
    }
}

/// Render a metamodel's class diagram as DOT text
pub fn metamodel_to_dot(mm: &Metamodel) -> String {
    let mut out = String::new();
    out.push_str("digraph metamodel {\n");
    out.push_str(HEADER);

    for rule in mm.rules() {
        match rule.kind {
            RuleKind::Common => {
                let mut attrs = String::new();
                for attr in &rule.attributes {
                    let marker = if attr.multiplicity.is_required() { "+" } else { "" };
                    let ty = attr.kind.type_name();
                    let ty = if attr.multiplicity.is_many() {
                        format!("list[{}]", ty)
                    } else {
                        ty.to_string()
                    };
                    let _ = write!(attrs, "{}{}:{}\\l", marker, attr.name, ty);
                }
                let _ = writeln!(out, "{}[label=\"{{{}|{}}}\"]", rule.name, rule.name, attrs);
            }
            RuleKind::Abstract => {
                let _ = writeln!(out, "{}[label=\"{{*{}|}}\"]", rule.name, rule.name);
            }
            RuleKind::Match => {}
        }
    }

    for rule in mm.rules() {
        for sub in mm.subclasses(&rule.name) {
            let _ = writeln!(out, "{} -> {} [dir=back]", rule.name, sub);
        }
        for attr in &rule.attributes {
            let (target, style) = match &attr.kind {
                AttributeKind::Contained(t) => (t, CONTAINMENT),
                AttributeKind::Reference(t) => (t, REFERENCE),
                AttributeKind::Bool | AttributeKind::Primitive(_) => continue,
            };
            let _ = writeln!(
                out,
                "{} -> {} [headlabel=\"{} {}\" {}]",
                rule.name, target, attr.name, attr.multiplicity, style
            );
        }
    }

    out.push_str("}\n");
    out
}

/// Write a metamodel diagram to `path`
pub fn write_metamodel_dot(mm: &Metamodel, path: impl AsRef<Path>) -> io::Result<()> {
    fs::write(path, metamodel_to_dot(mm))
}

/// Value as shown inside a record label
fn dot_repr(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("'{}'", dot_escape(s)),
        other => dot_escape(&other.to_string()),
    }
}

/// Escape characters that are special inside record labels
fn dot_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\\' | '"' | '|' | '{' | '}' | '<' | '>' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
