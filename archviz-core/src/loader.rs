//! Model parser: runs the rules of a metamodel over model text
//!
//! Rules are interpreted with PEG semantics (ordered choice, greedy
//! repetition, backtracking). Objects are built as pending trees first and
//! flattened into the model arena once the whole input has matched, so a
//! failed alternative never leaves objects behind. Cross references are
//! resolved last.

use std::collections::HashSet;

use crate::error::ParseError;
use crate::metamodel::{AssignOp, AttributeKind, Builtin, Expr, Metamodel, RepeatOp, RuleKind};
use crate::model::{Model, Object, ObjectId, Value};

/// Result of matching an expression
#[derive(Debug, Clone)]
enum Parsed {
    Text(String),
    Scalar(Value),
    Object(PendingObject),
    Ref(PendingRef),
}

impl Parsed {
    fn text(&self) -> String {
        match self {
            Parsed::Text(s) => s.clone(),
            Parsed::Scalar(v) => v.to_string(),
            Parsed::Ref(r) => r.name.clone(),
            Parsed::Object(_) => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingObject {
    rule: usize,
    /// Assignment log; truncated when an alternative backtracks
    assignments: Vec<(String, Parsed)>,
}

#[derive(Debug, Clone)]
struct PendingRef {
    class: String,
    name: String,
    offset: usize,
}

enum Halt {
    /// Expression did not match; the caller may try something else
    NoMatch,
    Fatal(ParseError),
}

type Step = Result<(usize, Option<Parsed>), Halt>;

/// Parse model text against a metamodel
pub(crate) fn parse<'mm>(mm: &'mm Metamodel, input: &str) -> Result<Model<'mm>, ParseError> {
    let mut interp = Interpreter::new(mm, input);

    let root = match interp.call(0, 0) {
        Ok((end, value)) => {
            let end = interp.skip(end);
            if end < input.len() {
                interp.expect(end, "end of input");
                return Err(interp.syntax_error());
            }
            value
        }
        Err(Halt::NoMatch) => return Err(interp.syntax_error()),
        Err(Halt::Fatal(e)) => return Err(e),
    };

    match root {
        Some(Parsed::Object(root)) => Builder::new(mm, input).build(root),
        _ => Err(ParseError::semantic(
            input,
            0,
            format!("root rule '{}' produced no object", mm.root().name),
        )),
    }
}

struct Interpreter<'mm, 'src> {
    mm: &'mm Metamodel,
    input: &'src str,
    frames: Vec<PendingObject>,
    /// (rule, offset) pairs currently being matched
    active: HashSet<(usize, usize)>,
    furthest: usize,
    expected: Vec<String>,
    skipping: bool,
}

impl<'mm, 'src> Interpreter<'mm, 'src> {
    fn new(mm: &'mm Metamodel, input: &'src str) -> Self {
        Self {
            mm,
            input,
            frames: Vec::new(),
            active: HashSet::new(),
            furthest: 0,
            expected: Vec::new(),
            skipping: false,
        }
    }

    fn mark(&self) -> usize {
        self.frames.last().map_or(0, |f| f.assignments.len())
    }

    fn reset(&mut self, mark: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.assignments.truncate(mark);
        }
    }

    /// Record what was expected at `offset`; only the furthest offset is kept
    fn expect(&mut self, offset: usize, what: impl Into<String>) {
        if self.skipping {
            return;
        }
        if offset > self.furthest {
            self.furthest = offset;
            self.expected.clear();
        }
        if offset == self.furthest {
            let what = what.into();
            if !self.expected.contains(&what) {
                self.expected.push(what);
            }
        }
    }

    fn syntax_error(&self) -> ParseError {
        let rest = &self.input[self.furthest..];
        let found = if rest.is_empty() {
            "end of input".to_string()
        } else {
            let line: String = rest.chars().take_while(|c| *c != '\n').take(20).collect();
            format!("'{}'", line)
        };
        let message = if self.expected.is_empty() {
            format!("unexpected {}", found)
        } else {
            format!("expected {} but found {}", self.expected.join(" or "), found)
        };
        ParseError::syntax(self.input, self.furthest, message)
    }

    /// Skip whitespace and comments
    fn skip(&mut self, offset: usize) -> usize {
        if self.skipping {
            return offset;
        }
        let input = self.input;
        let mut pos = offset;
        loop {
            let rest = &input[pos..];
            pos += rest.len() - rest.trim_start().len();

            let Some(comment) = self.mm.comment_rule() else {
                break;
            };
            self.skipping = true;
            let result = self.call(comment, pos);
            self.skipping = false;
            match result {
                Ok((end, _)) if end > pos => pos = end,
                _ => break,
            }
        }
        pos
    }

    fn call_named(&mut self, name: &str, pos: usize) -> Step {
        match self.mm.rule_index(name) {
            Some(index) => self.call(index, pos),
            None => match Builtin::from_name(name) {
                Some(builtin) => self.builtin(builtin, pos),
                None => Err(Halt::Fatal(ParseError::grammar(format!(
                    "undefined rule '{}'",
                    name
                )))),
            },
        }
    }

    fn call(&mut self, index: usize, pos: usize) -> Step {
        let mm = self.mm;
        let rule = &mm.rules()[index];
        if !self.active.insert((index, pos)) {
            return Err(Halt::Fatal(ParseError::grammar(format!(
                "left recursion in rule '{}'",
                rule.name
            ))));
        }

        let result = match rule.kind {
            RuleKind::Common => {
                self.frames.push(PendingObject {
                    rule: index,
                    assignments: Vec::new(),
                });
                let body = self.eval(&rule.expr, pos);
                let frame = self.frames.pop();
                match (body, frame) {
                    (Ok((end, _)), Some(frame)) => Ok((end, Some(Parsed::Object(frame)))),
                    (Ok(_), None) => Err(Halt::NoMatch),
                    (Err(e), _) => Err(e),
                }
            }
            RuleKind::Abstract => self.eval(&rule.expr, pos),
            RuleKind::Match => self.eval(&rule.expr, pos).map(|(end, value)| {
                let value = match value {
                    Some(Parsed::Scalar(v)) => Parsed::Scalar(v),
                    Some(other) => Parsed::Text(other.text()),
                    None => Parsed::Text(String::new()),
                };
                (end, Some(value))
            }),
        };

        self.active.remove(&(index, pos));
        result
    }

    fn eval(&mut self, expr: &'mm Expr, pos: usize) -> Step {
        match expr {
            Expr::Sequence(items) => {
                let mut values = Vec::new();
                let mut pos = pos;
                for item in items {
                    let (next, value) = self.eval(item, pos)?;
                    pos = next;
                    values.extend(value);
                }
                Ok((pos, combine(values)))
            }
            Expr::Choice(alts) => {
                let mark = self.mark();
                for alt in alts {
                    match self.eval(alt, pos) {
                        Err(Halt::NoMatch) => self.reset(mark),
                        other => return other,
                    }
                }
                Err(Halt::NoMatch)
            }
            Expr::Repeat {
                expr,
                op,
                separator,
            } => {
                let (end, values) = self.repeat(expr, *op, separator.as_deref(), pos)?;
                Ok((end, combine(values.into_iter().flatten().collect())))
            }
            Expr::Literal(text) => self.literal(text, pos),
            Expr::Pattern(pattern) => {
                let start = self.skip(pos);
                let input = self.input;
                match pattern.match_len(&input[start..]) {
                    Some(len) => Ok((
                        start + len,
                        Some(Parsed::Text(input[start..start + len].to_string())),
                    )),
                    None => {
                        self.expect(start, format!("/{}/", pattern.source()));
                        Err(Halt::NoMatch)
                    }
                }
            }
            Expr::RuleRef(name) => self.call_named(name, pos),
            Expr::ObjRef { class, name_rule } => {
                let start = self.skip(pos);
                let (end, value) = match name_rule {
                    Some(rule) => self.call_named(rule, start)?,
                    None => self.builtin(Builtin::Id, start)?,
                };
                let name = value.map(|v| v.text()).unwrap_or_default();
                Ok((
                    end,
                    Some(Parsed::Ref(PendingRef {
                        class: class.clone(),
                        name,
                        offset: start,
                    })),
                ))
            }
            Expr::Assign {
                attr,
                op,
                rhs,
                separator,
            } => self.assign(attr, *op, rhs, separator.as_deref(), pos),
            Expr::Not(inner) => match self.lookahead(inner, pos) {
                Ok(_) => Err(Halt::NoMatch),
                Err(Halt::NoMatch) => Ok((pos, None)),
                Err(e) => Err(e),
            },
            Expr::And(inner) => self.lookahead(inner, pos).map(|_| (pos, None)),
        }
    }

    /// Match without consuming input, assigning, or reporting expectations
    fn lookahead(&mut self, expr: &'mm Expr, pos: usize) -> Step {
        let mark = self.mark();
        let furthest = self.furthest;
        let expected = std::mem::take(&mut self.expected);
        let result = self.eval(expr, pos);
        self.reset(mark);
        self.furthest = furthest;
        self.expected = expected;
        result
    }

    fn literal(&mut self, text: &str, pos: usize) -> Step {
        let start = self.skip(pos);
        let input = self.input;
        let rest = &input[start..];
        let matched = rest.starts_with(text)
            && !(ends_with_word_char(text) && rest[text.len()..].starts_with(is_word_char));
        if matched {
            Ok((start + text.len(), Some(Parsed::Text(text.to_string()))))
        } else {
            self.expect(start, format!("'{}'", text));
            Err(Halt::NoMatch)
        }
    }

    fn builtin(&mut self, builtin: Builtin, pos: usize) -> Step {
        let start = self.skip(pos);
        let input = self.input;
        let rest = &input[start..];
        let matched = match builtin {
            Builtin::Id => scan_id(rest).map(|n| (n, Value::Str(rest[..n].to_string()))),
            Builtin::Int => self.int_value(rest, start)?,
            Builtin::Float => scan_float(rest),
            Builtin::Number => match scan_float(rest) {
                Some(float) => Some(float),
                None => self.int_value(rest, start)?,
            },
            Builtin::Bool => scan_bool(rest),
            Builtin::String => scan_string(rest).map(|(n, s)| (n, Value::Str(s))),
        };
        match matched {
            Some((len, value)) => Ok((start + len, Some(Parsed::Scalar(value)))),
            None => {
                self.expect(start, builtin.name());
                Err(Halt::NoMatch)
            }
        }
    }

    /// A well-formed INT token that does not fit an i64 is a semantic error
    fn int_value(&self, rest: &str, start: usize) -> Result<Option<(usize, Value)>, Halt> {
        let Some(len) = scan_int(rest) else {
            return Ok(None);
        };
        match rest[..len].parse() {
            Ok(v) => Ok(Some((len, Value::Int(v)))),
            Err(_) => Err(Halt::Fatal(ParseError::semantic(
                self.input,
                start,
                format!("integer out of range: {}", &rest[..len]),
            ))),
        }
    }

    fn assign(
        &mut self,
        attr: &'mm str,
        op: AssignOp,
        rhs: &'mm Expr,
        separator: Option<&'mm Expr>,
        pos: usize,
    ) -> Step {
        match op {
            AssignOp::Plain => {
                let (end, value) = self.eval(rhs, pos)?;
                self.record(attr, value);
                Ok((end, None))
            }
            AssignOp::Bool => match self.eval(rhs, pos) {
                Ok((end, _)) => {
                    self.record(attr, Some(Parsed::Scalar(Value::Bool(true))));
                    Ok((end, None))
                }
                Err(Halt::NoMatch) => Ok((pos, None)),
                Err(e) => Err(e),
            },
            AssignOp::OneOrMore | AssignOp::ZeroOrMore => {
                let repeat = if op == AssignOp::OneOrMore {
                    RepeatOp::OneOrMore
                } else {
                    RepeatOp::ZeroOrMore
                };
                let (end, values) = self.repeat(rhs, repeat, separator, pos)?;
                for value in values {
                    self.record(attr, value);
                }
                Ok((end, None))
            }
        }
    }

    fn record(&mut self, attr: &str, value: Option<Parsed>) {
        let value = value.unwrap_or_else(|| Parsed::Text(String::new()));
        if let Some(frame) = self.frames.last_mut() {
            frame.assignments.push((attr.to_string(), value));
        }
    }

    fn repeat(
        &mut self,
        expr: &'mm Expr,
        op: RepeatOp,
        separator: Option<&'mm Expr>,
        pos: usize,
    ) -> Result<(usize, Vec<Option<Parsed>>), Halt> {
        let mut values = Vec::new();
        let mut pos = pos;
        loop {
            let mark = self.mark();
            let mut start = pos;
            if !values.is_empty() {
                if let Some(sep) = separator {
                    match self.eval(sep, pos) {
                        Ok((next, _)) => start = next,
                        Err(Halt::NoMatch) => {
                            self.reset(mark);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            match self.eval(expr, start) {
                // An empty match ends a repetition without adding an item,
                // unless it is the one item `+` requires
                Ok((next, _))
                    if next <= pos
                        && op != RepeatOp::Optional
                        && !(op == RepeatOp::OneOrMore && values.is_empty()) =>
                {
                    self.reset(mark);
                    break;
                }
                Ok((next, value)) => {
                    values.push(value);
                    let progressed = next > pos;
                    pos = next;
                    if op == RepeatOp::Optional || !progressed {
                        break;
                    }
                }
                Err(Halt::NoMatch) => {
                    self.reset(mark);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if op == RepeatOp::OneOrMore && values.is_empty() {
            return Err(Halt::NoMatch);
        }
        Ok((pos, values))
    }
}

/// Value of a sequence: a single part passes through, an object wins over
/// text, otherwise the parts are joined
fn combine(mut values: Vec<Parsed>) -> Option<Parsed> {
    if values.len() <= 1 {
        return values.pop();
    }
    if let Some(i) = values
        .iter()
        .rposition(|v| matches!(v, Parsed::Object(_) | Parsed::Ref(_)))
    {
        return Some(values.swap_remove(i));
    }
    Some(Parsed::Text(values.iter().map(Parsed::text).collect()))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn ends_with_word_char(s: &str) -> bool {
    s.chars().last().map_or(false, is_word_char)
}

fn sign_len(s: &str) -> usize {
    if s.starts_with('+') || s.starts_with('-') {
        1
    } else {
        0
    }
}

fn digits_len(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

fn scan_id(s: &str) -> Option<usize> {
    let first = s.chars().next()?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    Some(
        s.char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map_or(s.len(), |(i, _)| i),
    )
}

/// Length of an INT token
fn scan_int(s: &str) -> Option<usize> {
    let sign = sign_len(s);
    let digits = digits_len(&s[sign..]);
    if digits == 0 {
        return None;
    }
    let end = sign + digits;
    if s[end..].starts_with(is_word_char) {
        return None;
    }
    Some(end)
}

/// Floats need a fraction dot or an exponent
fn scan_float(s: &str) -> Option<(usize, Value)> {
    let mut end = sign_len(s);
    let int_digits = digits_len(&s[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    let dotted = s[end..].starts_with('.');
    if dotted {
        frac_digits = digits_len(&s[end + 1..]);
        end += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    let mut exponent = false;
    if s[end..].starts_with(|c: char| c == 'e' || c == 'E') {
        let exp_start = end + 1;
        let sign = sign_len(&s[exp_start..]);
        let digits = digits_len(&s[exp_start + sign..]);
        if digits > 0 {
            end = exp_start + sign + digits;
            exponent = true;
        }
    }

    if !(dotted || exponent) || s[end..].starts_with(|c: char| is_word_char(c) || c == '.') {
        return None;
    }
    s[..end].parse().ok().map(|v| (end, Value::Float(v)))
}

fn scan_bool(s: &str) -> Option<(usize, Value)> {
    [("true", true), ("false", false), ("1", true), ("0", false)]
        .into_iter()
        .find(|(text, _)| s.starts_with(text) && !s[text.len()..].starts_with(is_word_char))
        .map(|(text, value)| (text.len(), Value::Bool(value)))
}

fn scan_string(s: &str) -> Option<(usize, String)> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Some((i + c.len_utf8(), out)),
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c => out.push(c),
        }
    }
    None
}

/// Pending reference to patch once every object has an id
struct Fixup {
    object: ObjectId,
    attribute: usize,
    item: Option<usize>,
    target: PendingRef,
}

/// Flattens pending objects into the arena and resolves references
struct Builder<'mm, 'src> {
    mm: &'mm Metamodel,
    input: &'src str,
    objects: Vec<Object>,
    fixups: Vec<Fixup>,
}

impl<'mm, 'src> Builder<'mm, 'src> {
    fn new(mm: &'mm Metamodel, input: &'src str) -> Self {
        Self {
            mm,
            input,
            objects: Vec::new(),
            fixups: Vec::new(),
        }
    }

    fn build(mut self, root: PendingObject) -> Result<Model<'mm>, ParseError> {
        self.flatten(root, None);

        let input = self.input;
        let mut model = Model {
            metamodel: self.mm,
            objects: self.objects,
        };
        for fixup in self.fixups {
            let target = model
                .find(&fixup.target.class, &fixup.target.name)
                .ok_or_else(|| {
                    ParseError::semantic(
                        input,
                        fixup.target.offset,
                        format!(
                            "unknown object '{}' of class '{}'",
                            fixup.target.name, fixup.target.class
                        ),
                    )
                })?;
            let value = &mut model.objects[fixup.object.0].attributes[fixup.attribute].1;
            let value = match fixup.item {
                Some(i) => match value {
                    Value::List(items) => &mut items[i],
                    other => other,
                },
                None => value,
            };
            *value = Value::Ref(target);
        }

        tracing::debug!(objects = model.len(), "model built");
        Ok(model)
    }

    /// Give `pending` and its children ids in document order
    fn flatten(&mut self, pending: PendingObject, parent: Option<ObjectId>) -> ObjectId {
        let mm = self.mm;
        let rule = &mm.rules()[pending.rule];
        let id = ObjectId(self.objects.len());
        self.objects.push(Object {
            class: rule.name.clone(),
            parent,
            attributes: Vec::new(),
        });

        let mut grouped: Vec<Vec<Parsed>> = rule.attributes.iter().map(|_| Vec::new()).collect();
        for (name, value) in pending.assignments {
            if let Some(i) = rule.attributes.iter().position(|a| a.name == name) {
                grouped[i].push(value);
            }
        }

        let mut attributes = Vec::new();
        for (attribute, values) in rule.attributes.iter().zip(grouped) {
            let slot = attributes.len();
            if attribute.kind == AttributeKind::Bool {
                attributes.push((attribute.name.clone(), Value::Bool(!values.is_empty())));
            } else if attribute.multiplicity.is_many() {
                let mut items = Vec::with_capacity(values.len());
                for (i, value) in values.into_iter().enumerate() {
                    items.push(self.convert(value, id, slot, Some(i)));
                }
                attributes.push((attribute.name.clone(), Value::List(items)));
            } else if let Some(value) = values.into_iter().last() {
                let value = self.convert(value, id, slot, None);
                attributes.push((attribute.name.clone(), value));
            }
        }

        self.objects[id.0].attributes = attributes;
        id
    }

    fn convert(&mut self, value: Parsed, owner: ObjectId, slot: usize, item: Option<usize>) -> Value {
        match value {
            Parsed::Text(s) => Value::Str(s),
            Parsed::Scalar(v) => v,
            Parsed::Object(child) => Value::Object(self.flatten(child, Some(owner))),
            Parsed::Ref(target) => {
                self.fixups.push(Fixup {
                    object: owner,
                    attribute: slot,
                    item,
                    target,
                });
                // Patched in `build`
                Value::Ref(owner)
            }
        }
    }
}
