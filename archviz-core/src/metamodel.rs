//! Metamodel: the compiled form of a grammar definition

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::ParseError;
use crate::grammar;

/// Name of the rule used to skip comments in model files
pub const COMMENT_RULE: &str = "Comment";

/// A compiled grammar: ordered rules, the first one being the root
#[derive(Debug, Clone)]
pub struct Metamodel {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
}

/// A grammar rule
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule name, also the class name of the objects it creates
    pub name: String,
    /// Rule body
    pub expr: Expr,
    /// Kind, derived from the body
    pub kind: RuleKind,
    /// Attributes of a common rule, in order of first assignment
    pub attributes: Vec<Attribute>,
}

impl Rule {
    /// Look up an attribute by name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Kind of rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Has assignments; creates an object
    Common,
    /// No assignments; returns the object of one of its alternatives
    Abstract,
    /// Matches text only
    Match,
}

/// Rule body expression
#[derive(Debug, Clone)]
pub enum Expr {
    Sequence(Vec<Expr>),
    Choice(Vec<Expr>),
    Repeat {
        expr: Box<Expr>,
        op: RepeatOp,
        separator: Option<Box<Expr>>,
    },
    Literal(String),
    Pattern(Pattern),
    RuleRef(String),
    /// Cross reference: `[Class]` or `[Class:NameRule]`
    ObjRef {
        class: String,
        name_rule: Option<String>,
    },
    Assign {
        attr: String,
        op: AssignOp,
        rhs: Box<Expr>,
        separator: Option<Box<Expr>>,
    },
    /// Negative lookahead `!expr`
    Not(Box<Expr>),
    /// Positive lookahead `&expr`
    And(Box<Expr>),
}

/// Repetition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatOp {
    ZeroOrMore,
    OneOrMore,
    Optional,
}

/// Assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Plain,
    /// `?=`
    Bool,
    /// `+=`
    OneOrMore,
    /// `*=`
    ZeroOrMore,
}

/// A `/.../` match, anchored at the current position
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let regex = Regex::new(&format!(r"(?m)\A(?:{source})"))
            .map_err(|e| ParseError::grammar(format!("invalid regex /{source}/: {e}")))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Source text between the slashes
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Length of the match at the start of `input`, if any
    pub fn match_len(&self, input: &str) -> Option<usize> {
        self.regex.find(input).map(|m| m.end())
    }
}

/// Built-in match rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Id,
    Int,
    Float,
    Number,
    Bool,
    String,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ID" => Some(Builtin::Id),
            "INT" => Some(Builtin::Int),
            "FLOAT" => Some(Builtin::Float),
            "NUMBER" => Some(Builtin::Number),
            "BOOL" => Some(Builtin::Bool),
            "STRING" => Some(Builtin::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Id => "ID",
            Builtin::Int => "INT",
            Builtin::Float => "FLOAT",
            Builtin::Number => "NUMBER",
            Builtin::Bool => "BOOL",
            Builtin::String => "STRING",
        }
    }
}

/// Attribute of a common rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub multiplicity: Multiplicity,
    pub kind: AttributeKind,
}

/// How many values an attribute holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Multiplicity {
    pub fn is_many(self) -> bool {
        matches!(self, Multiplicity::ZeroOrMore | Multiplicity::OneOrMore)
    }

    pub fn is_required(self) -> bool {
        matches!(self, Multiplicity::One | Multiplicity::OneOrMore)
    }

    fn relaxed(self) -> Self {
        match self {
            Multiplicity::One => Multiplicity::Optional,
            Multiplicity::OneOrMore => Multiplicity::ZeroOrMore,
            other => other,
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Multiplicity::One => "1",
            Multiplicity::Optional => "0..1",
            Multiplicity::ZeroOrMore => "0..*",
            Multiplicity::OneOrMore => "1..*",
        };
        f.write_str(s)
    }
}

/// What an attribute points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    /// `?=` flag
    Bool,
    /// Text or typed value; holds the matching rule name, or `str` for inline matches
    Primitive(String),
    /// Object owned by this one
    Contained(String),
    /// Object owned elsewhere, resolved by name
    Reference(String),
}

impl AttributeKind {
    /// Class or rule name shown in diagrams
    pub fn type_name(&self) -> &str {
        match self {
            AttributeKind::Bool => "BOOL",
            AttributeKind::Primitive(t)
            | AttributeKind::Contained(t)
            | AttributeKind::Reference(t) => t,
        }
    }
}

impl Metamodel {
    /// Load a grammar file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let source = fs::read_to_string(path.as_ref())?;
        Self::from_str(&source)
    }

    /// Parse grammar text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(source: &str) -> Result<Self, ParseError> {
        let rules = grammar::parse(source)?;
        Self::new(rules)
    }

    /// Build a metamodel from parsed `(name, body)` pairs
    pub(crate) fn new(raw: Vec<(String, Expr)>) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::grammar("grammar defines no rules"));
        }

        let mut index = HashMap::new();
        for (i, (name, _)) in raw.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(ParseError::grammar(format!("duplicate rule '{}'", name)));
            }
        }

        let mut rules: Vec<Rule> = raw
            .into_iter()
            .map(|(name, expr)| Rule {
                name,
                expr,
                kind: RuleKind::Match,
                attributes: Vec::new(),
            })
            .collect();

        for rule in &rules {
            check_refs(&rule.name, &rule.expr, &index)?;
        }

        classify(&mut rules, &index);

        let mut mm = Metamodel { rules, index };
        for i in 0..mm.rules.len() {
            if mm.rules[i].kind == RuleKind::Common {
                let mut attributes = Vec::new();
                collect_attributes(&mm, &mm.rules[i].expr, Context::default(), &mut attributes);
                mm.rules[i].attributes = attributes;
            }
        }

        if mm.root().kind == RuleKind::Match {
            return Err(ParseError::grammar(format!(
                "root rule '{}' must create objects",
                mm.root().name
            )));
        }

        Ok(mm)
    }

    /// All rules in definition order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The root rule
    pub fn root(&self) -> &Rule {
        &self.rules[0]
    }

    /// Look up a user rule by name
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub(crate) fn rule_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of the comment rule, if the grammar defines one
    pub(crate) fn comment_rule(&self) -> Option<usize> {
        self.rule_index(COMMENT_RULE)
    }

    /// Whether a rule name yields objects (common or abstract)
    pub fn is_class(&self, name: &str) -> bool {
        self.rule(name)
            .map(|r| r.kind != RuleKind::Match)
            .unwrap_or(false)
    }

    /// Direct subclasses of an abstract rule
    pub fn subclasses(&self, name: &str) -> Vec<&str> {
        let Some(rule) = self.rule(name) else {
            return Vec::new();
        };
        if rule.kind != RuleKind::Abstract {
            return Vec::new();
        }
        let mut refs = Vec::new();
        rule_refs(&rule.expr, &mut refs);
        let mut seen = HashSet::new();
        refs.into_iter()
            .filter(|r| self.is_class(r) && seen.insert(*r))
            .collect()
    }

    /// Whether objects of class `class` can stand where `target` is expected
    pub fn is_instance(&self, class: &str, target: &str) -> bool {
        let mut stack = vec![target];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == class {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.subclasses(current));
            }
        }
        false
    }
}

/// Rule names referenced by an expression, not following into other rules
fn rule_refs<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Sequence(items) | Expr::Choice(items) => {
            for item in items {
                rule_refs(item, out);
            }
        }
        Expr::Repeat { expr, separator, .. } => {
            rule_refs(expr, out);
            if let Some(sep) = separator {
                rule_refs(sep, out);
            }
        }
        Expr::Assign { rhs, separator, .. } => {
            rule_refs(rhs, out);
            if let Some(sep) = separator {
                rule_refs(sep, out);
            }
        }
        Expr::RuleRef(name) => out.push(name),
        Expr::Not(_) | Expr::And(_) => {}
        Expr::Literal(_) | Expr::Pattern(_) | Expr::ObjRef { .. } => {}
    }
}

fn has_assignment(expr: &Expr) -> bool {
    match expr {
        Expr::Assign { .. } => true,
        Expr::Sequence(items) | Expr::Choice(items) => items.iter().any(has_assignment),
        Expr::Repeat { expr, .. } => has_assignment(expr),
        Expr::Not(inner) | Expr::And(inner) => has_assignment(inner),
        _ => false,
    }
}

fn check_refs(rule: &str, expr: &Expr, index: &HashMap<String, usize>) -> Result<(), ParseError> {
    let known = |name: &str| index.contains_key(name) || Builtin::from_name(name).is_some();
    match expr {
        Expr::Sequence(items) | Expr::Choice(items) => {
            for item in items {
                check_refs(rule, item, index)?;
            }
        }
        Expr::Repeat { expr, separator, .. } => {
            check_refs(rule, expr, index)?;
            if let Some(sep) = separator {
                check_refs(rule, sep, index)?;
            }
        }
        Expr::Assign { rhs, separator, .. } => {
            check_refs(rule, rhs, index)?;
            if let Some(sep) = separator {
                check_refs(rule, sep, index)?;
            }
        }
        Expr::Not(inner) | Expr::And(inner) => check_refs(rule, inner, index)?,
        Expr::RuleRef(name) => {
            if !known(name) {
                return Err(ParseError::grammar(format!(
                    "rule '{}' references undefined rule '{}'",
                    rule, name
                )));
            }
        }
        Expr::ObjRef { class, name_rule } => {
            if !index.contains_key(class) {
                return Err(ParseError::grammar(format!(
                    "rule '{}' references undefined class '{}'",
                    rule, class
                )));
            }
            if let Some(name_rule) = name_rule {
                if !known(name_rule) {
                    return Err(ParseError::grammar(format!(
                        "rule '{}' references undefined rule '{}'",
                        rule, name_rule
                    )));
                }
            }
        }
        Expr::Literal(_) | Expr::Pattern(_) => {}
    }
    Ok(())
}

/// Assign rule kinds; abstractness propagates until nothing changes
fn classify(rules: &mut [Rule], index: &HashMap<String, usize>) {
    for rule in rules.iter_mut() {
        if has_assignment(&rule.expr) {
            rule.kind = RuleKind::Common;
        }
    }

    loop {
        let mut changed = false;
        for i in 0..rules.len() {
            if rules[i].kind != RuleKind::Match {
                continue;
            }
            let mut refs = Vec::new();
            rule_refs(&rules[i].expr, &mut refs);
            let yields_objects = refs.iter().any(|r| {
                index
                    .get(*r)
                    .map(|&j| rules[j].kind != RuleKind::Match)
                    .unwrap_or(false)
            });
            if yields_objects {
                rules[i].kind = RuleKind::Abstract;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    optional: bool,
    repeated: bool,
}

fn collect_attributes(mm: &Metamodel, expr: &Expr, ctx: Context, out: &mut Vec<Attribute>) {
    match expr {
        Expr::Sequence(items) => {
            for item in items {
                collect_attributes(mm, item, ctx, out);
            }
        }
        Expr::Choice(alts) => {
            let ctx = Context {
                optional: ctx.optional || alts.len() > 1,
                ..ctx
            };
            for alt in alts {
                collect_attributes(mm, alt, ctx, out);
            }
        }
        Expr::Repeat { expr, op, .. } => {
            let ctx = Context {
                optional: ctx.optional || *op != RepeatOp::OneOrMore,
                repeated: ctx.repeated || *op != RepeatOp::Optional,
            };
            collect_attributes(mm, expr, ctx, out);
        }
        Expr::Assign { attr, op, rhs, .. } => {
            let multiplicity = match op {
                AssignOp::Bool => Multiplicity::Optional,
                AssignOp::ZeroOrMore => Multiplicity::ZeroOrMore,
                AssignOp::OneOrMore => Multiplicity::OneOrMore,
                AssignOp::Plain if ctx.repeated => Multiplicity::OneOrMore,
                AssignOp::Plain => Multiplicity::One,
            };
            let multiplicity = if ctx.optional {
                multiplicity.relaxed()
            } else {
                multiplicity
            };
            let kind = match (op, rhs.as_ref()) {
                (AssignOp::Bool, _) => AttributeKind::Bool,
                (_, Expr::ObjRef { class, .. }) => AttributeKind::Reference(class.clone()),
                (_, Expr::RuleRef(name)) if mm.is_class(name) => {
                    AttributeKind::Contained(name.clone())
                }
                (_, Expr::RuleRef(name)) => AttributeKind::Primitive(name.clone()),
                _ => AttributeKind::Primitive("str".to_string()),
            };
            merge_attribute(
                out,
                Attribute {
                    name: attr.clone(),
                    multiplicity,
                    kind,
                },
            );
        }
        Expr::Not(_) | Expr::And(_) => {}
        Expr::Literal(_) | Expr::Pattern(_) | Expr::RuleRef(_) | Expr::ObjRef { .. } => {}
    }
}

/// An attribute assigned in several places keeps its first kind and
/// becomes many-valued if any of the assignments is
fn merge_attribute(out: &mut Vec<Attribute>, attr: Attribute) {
    match out.iter_mut().find(|a| a.name == attr.name) {
        Some(existing) => {
            let many = existing.multiplicity.is_many() || attr.multiplicity.is_many();
            let required =
                existing.multiplicity.is_required() && attr.multiplicity.is_required();
            existing.multiplicity = match (many, required) {
                (true, true) => Multiplicity::OneOrMore,
                (true, false) => Multiplicity::ZeroOrMore,
                (false, true) => Multiplicity::One,
                (false, false) => Multiplicity::Optional,
            };
        }
        None => out.push(attr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: &str = r#"
        Model: 'system' name=ID '{' elements*=Element '}';
        Element: Component | Link;
        Component: 'component' name=ID ('rate' rate=INT)? active?='active';
        Link: 'link' source=[Component] '->' target=[Component];
        Kind: 'hard' | 'soft';
    "#;

    #[test]
    fn test_rule_kinds() {
        let mm = Metamodel::from_str(GRAMMAR).unwrap();
        assert_eq!(mm.root().name, "Model");
        assert_eq!(mm.rule("Model").unwrap().kind, RuleKind::Common);
        assert_eq!(mm.rule("Element").unwrap().kind, RuleKind::Abstract);
        assert_eq!(mm.rule("Kind").unwrap().kind, RuleKind::Match);
    }

    #[test]
    fn test_attributes() {
        let mm = Metamodel::from_str(GRAMMAR).unwrap();
        let model = mm.rule("Model").unwrap();
        let names: Vec<_> = model.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["name", "elements"]);

        let elements = model.attribute("elements").unwrap();
        assert_eq!(elements.multiplicity, Multiplicity::ZeroOrMore);
        assert_eq!(elements.kind, AttributeKind::Contained("Element".into()));

        let component = mm.rule("Component").unwrap();
        let rate = component.attribute("rate").unwrap();
        assert_eq!(rate.multiplicity, Multiplicity::Optional);
        assert_eq!(rate.kind, AttributeKind::Primitive("INT".into()));
        assert_eq!(component.attribute("active").unwrap().kind, AttributeKind::Bool);

        let link = mm.rule("Link").unwrap();
        assert_eq!(
            link.attribute("source").unwrap().kind,
            AttributeKind::Reference("Component".into())
        );
        assert_eq!(link.attribute("source").unwrap().multiplicity, Multiplicity::One);
    }

    #[test]
    fn test_repeated_plain_assignment_is_many() {
        let mm = Metamodel::from_str("A: ('x' items=ID)+;").unwrap();
        let attr = mm.root().attribute("items").unwrap();
        assert_eq!(attr.multiplicity, Multiplicity::OneOrMore);
    }

    #[test]
    fn test_subclasses_and_instances() {
        let mm = Metamodel::from_str(GRAMMAR).unwrap();
        assert_eq!(mm.subclasses("Element"), ["Component", "Link"]);
        assert!(mm.is_instance("Component", "Element"));
        assert!(mm.is_instance("Link", "Link"));
        assert!(!mm.is_instance("Model", "Element"));
    }

    #[test]
    fn test_undefined_rule() {
        let err = Metamodel::from_str("A: name=Missing;").unwrap_err();
        assert!(err.to_string().contains("undefined rule 'Missing'"));
    }

    #[test]
    fn test_undefined_class() {
        let err = Metamodel::from_str("A: other=[Nope];").unwrap_err();
        assert!(err.to_string().contains("undefined class 'Nope'"));
    }

    #[test]
    fn test_duplicate_rule() {
        let err = Metamodel::from_str("A: name=ID; A: 'x';").unwrap_err();
        assert!(matches!(err, ParseError::GrammarError { .. }));
    }

    #[test]
    fn test_match_root_rejected() {
        let err = Metamodel::from_str("Kind: 'a' | 'b';").unwrap_err();
        assert!(err.to_string().contains("root rule 'Kind'"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = Metamodel::from_str("A: name=/[a-/;").unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }
}
