//! Parser for the grammar definition language

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_until},
    character::complete::{anychar, char, multispace1, none_of, satisfy},
    combinator::{cut, map, not, opt, recognize, value},
    error::ErrorKind,
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use crate::error::ParseError;
use crate::metamodel::{AssignOp, Expr, Pattern, RepeatOp};

/// nom error that can carry a semantic error found mid-parse
#[derive(Debug)]
struct GrammarError<'a> {
    input: &'a str,
    external: Option<ParseError>,
}

impl<'a> nom::error::ParseError<&'a str> for GrammarError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Self {
            input,
            external: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type Res<'a, T> = IResult<&'a str, T, GrammarError<'a>>;

/// Parse a complete grammar into `(rule name, body)` pairs
pub(crate) fn parse(input: &str) -> Result<Vec<(String, Expr)>, ParseError> {
    match terminated(many1(parse_rule), ws).parse(input) {
        Ok((rest, rules)) if rest.is_empty() => Ok(rules),
        Ok((rest, _)) => Err(ParseError::syntax(
            input,
            input.len() - rest.len(),
            format!("expected rule definition, found '{}'", snippet(rest)),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if let Some(external) = e.external {
                return Err(external);
            }
            let offset = input.len() - e.input.len();
            Err(ParseError::syntax(
                input,
                offset,
                format!("unexpected '{}'", snippet(e.input)),
            ))
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError::syntax(
            input,
            input.len(),
            "unexpected end of grammar",
        )),
    }
}

fn snippet(input: &str) -> String {
    input
        .trim_start()
        .chars()
        .take_while(|c| *c != '\n')
        .take(20)
        .collect()
}

/// Whitespace and comments
fn ws(input: &str) -> Res<'_, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), opt(is_not("\n\r")))),
            value((), (tag("/*"), take_until("*/"), tag("*/"))),
        ))),
    )
    .parse(input)
}

/// Skip whitespace, then match a single character
fn sym<'a>(c: char) -> impl Parser<&'a str, Output = char, Error = GrammarError<'a>> {
    preceded(ws, char(c))
}

/// Skip whitespace, then match a tag
fn punct<'a>(t: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = GrammarError<'a>> {
    preceded(ws, tag(t))
}

/// Parse an identifier
fn parse_identifier(input: &str) -> Res<'_, String> {
    map(
        preceded(
            ws,
            recognize(pair(
                satisfy(|c: char| c.is_alphabetic() || c == '_'),
                many0(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
            )),
        ),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

/// Parse a rule: `Name: body;`
fn parse_rule(input: &str) -> Res<'_, (String, Expr)> {
    let (input, name) = parse_identifier(input)?;
    let (input, _) = sym(':').parse(input)?;
    let (input, body) = cut(parse_choice).parse(input)?;
    let (input, _) = cut(sym(';')).parse(input)?;
    Ok((input, (name, body)))
}

/// Parse ordered choice: `a | b | c`
fn parse_choice(input: &str) -> Res<'_, Expr> {
    map(separated_list1(sym('|'), parse_sequence), |mut alts| {
        if alts.len() == 1 {
            alts.remove(0)
        } else {
            Expr::Choice(alts)
        }
    })
    .parse(input)
}

/// Parse a sequence of one or more prefixed expressions
fn parse_sequence(input: &str) -> Res<'_, Expr> {
    map(many1(parse_prefixed), |mut items| {
        if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Sequence(items)
        }
    })
    .parse(input)
}

/// Parse syntactic predicates: `!expr`, `&expr`
fn parse_prefixed(input: &str) -> Res<'_, Expr> {
    alt((
        map(preceded(sym('!'), parse_repeatable), |e| Expr::Not(Box::new(e))),
        map(preceded(sym('&'), parse_repeatable), |e| Expr::And(Box::new(e))),
        parse_repeatable,
    ))
    .parse(input)
}

fn parse_repeatable(input: &str) -> Res<'_, Expr> {
    alt((parse_assignment, parse_repeated_primary)).parse(input)
}

/// Parse a primary with an optional repetition operator
fn parse_repeated_primary(input: &str) -> Res<'_, Expr> {
    let (input, expr) = parse_primary(input)?;
    let (input, repeat) = opt(alt((
        value(RepeatOp::ZeroOrMore, sym('*')),
        value(RepeatOp::OneOrMore, sym('+')),
        value(RepeatOp::Optional, sym('?')),
    )))
    .parse(input)?;

    let Some(op) = repeat else {
        return Ok((input, expr));
    };
    let (input, separator) = opt(parse_separator).parse(input)?;
    Ok((
        input,
        Expr::Repeat {
            expr: Box::new(expr),
            op,
            separator: separator.map(Box::new),
        },
    ))
}

/// Parse a repetition separator: `[',']`
fn parse_separator(input: &str) -> Res<'_, Expr> {
    delimited(sym('['), parse_primary, sym(']')).parse(input)
}

/// Parse an assignment: `attr=Rule`, `attr+=Rule[',']`, `attr?='kw'`
fn parse_assignment(input: &str) -> Res<'_, Expr> {
    let (input, attr) = parse_identifier(input)?;
    let (input, op) = alt((
        value(AssignOp::OneOrMore, punct("+=")),
        value(AssignOp::ZeroOrMore, punct("*=")),
        value(AssignOp::Bool, punct("?=")),
        value(AssignOp::Plain, punct("=")),
    ))
    .parse(input)?;
    let (input, rhs) = cut(alt((
        parse_string_literal,
        parse_regex,
        parse_obj_ref,
        map(parse_identifier, Expr::RuleRef),
    )))
    .parse(input)?;
    let (input, separator) = match op {
        AssignOp::OneOrMore | AssignOp::ZeroOrMore => opt(parse_separator).parse(input)?,
        _ => (input, None),
    };

    Ok((
        input,
        Expr::Assign {
            attr,
            op,
            rhs: Box::new(rhs),
            separator: separator.map(Box::new),
        },
    ))
}

fn parse_primary(input: &str) -> Res<'_, Expr> {
    alt((
        delimited(sym('('), parse_choice, cut(sym(')'))),
        parse_string_literal,
        parse_regex,
        parse_obj_ref,
        // A name followed by ':' starts the next rule
        map(
            terminated(parse_identifier, not(sym(':'))),
            Expr::RuleRef,
        ),
    ))
    .parse(input)
}

/// Parse a cross reference: `[Class]` or `[Class:NameRule]`
fn parse_obj_ref(input: &str) -> Res<'_, Expr> {
    let (input, _) = sym('[').parse(input)?;
    let (input, class) = parse_identifier(input)?;
    let (input, name_rule) = opt(preceded(sym(':'), parse_identifier)).parse(input)?;
    let (input, _) = sym(']').parse(input)?;
    Ok((input, Expr::ObjRef { class, name_rule }))
}

/// Parse a quoted string literal
fn parse_string_literal(input: &str) -> Res<'_, Expr> {
    map(
        preceded(ws, alt((quoted('\''), quoted('"')))),
        Expr::Literal,
    )
    .parse(input)
}

fn quoted<'a>(q: char) -> impl Parser<&'a str, Output = String, Error = GrammarError<'a>> {
    move |input: &'a str| -> Res<'a, String> {
        let (mut rest, _) = char(q).parse(input)?;
        let mut out = String::new();
        loop {
            let (next, c) = anychar.parse(rest)?;
            rest = next;
            match c {
                c if c == q => return Ok((rest, out)),
                '\\' => {
                    let (next, e) = anychar.parse(rest)?;
                    rest = next;
                    out.push(match e {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c => out.push(c),
            }
        }
    }
}

/// Parse a regex match: `/[a-z]+/`
fn parse_regex(input: &str) -> Res<'_, Expr> {
    let (rest, src) = preceded(
        ws,
        delimited(
            char('/'),
            escaped(none_of("\\/\n"), '\\', anychar),
            char('/'),
        ),
    )
    .parse(input)?;

    match Pattern::new(&src.replace("\\/", "/")) {
        Ok(pattern) => Ok((rest, Expr::Pattern(pattern))),
        Err(e) => Err(nom::Err::Failure(GrammarError {
            input,
            external: Some(e),
        })),
    }
}
