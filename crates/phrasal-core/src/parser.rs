//! Grammar text to syntax tree
//!
//! The format is line oriented. Headers start at column 0, the sentences of a
//! definition are the indented lines that follow it:
//!
//! ```text
//! %[book_flight]('training': '20', 'testing': '5')
//!     ~[please?] book a flight to @[city]
//!     *[30%] fly me to @[city#capital] ?[today]
//!
//! @[city]
//!     paris
//!     ~[nyc]
//! ```
//!
//! Lines starting with `//` or `#` at column 0 are comments. Parsing never
//! drops content: anything it does not understand is a [`SyntaxError`].
//!
//! Headers and sentences are parsed with `nom` over a [`LocatedSpan`] of the
//! whole source, so every failure knows its line and column.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_till, take_while1};
use nom::character::complete::{anychar, char, one_of, space0, space1};
use nom::combinator::{map, not, opt, recognize};
use nom::error::{ErrorKind, ParseError};
use nom::multi::{many0, many1, separated_list0};
use nom::sequence::{delimited, terminated};
use nom::{IResult, Slice};
use nom_locate::LocatedSpan;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Result, SyntaxError};
use crate::grammar::{Alternative, Definition, DefinitionKey, DefinitionKind, Element, Grammar, Reference};
use crate::weights::Distribution;

type Span<'a> = LocatedSpan<&'a str>;
type PResult<'a, T> = IResult<Span<'a>, T, GrammarError<'a>>;

/// Parser for `.phrasal` grammar text
#[derive(Debug, Clone, Default)]
pub struct Parser {}

impl Parser {
    /// Create a new parser
    pub fn new() -> Self {
        Self {}
    }

    /// Parse a grammar file
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Grammar> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.parse_str(&content)
    }

    /// Parse grammar text
    pub fn parse_str(&self, source: &str) -> Result<Grammar> {
        let mut definitions = Vec::new();
        let mut seen = HashSet::new();
        let mut current: Option<Definition> = None;

        let mut input = Span::new(source);
        while !input.fragment().is_empty() {
            let (rest, raw) = source_line(input).map_err(syntax_error)?;
            input = rest;

            let text = raw.slice(..raw.fragment().trim_end().len());
            if text.fragment().trim().is_empty() {
                continue;
            }
            let line = text.location_line() as usize;

            if let Ok((sentence, _)) = space1::<_, GrammarError<'_>>(text) {
                if sentence.fragment().starts_with("//") {
                    continue;
                }
                let definition = current.as_mut().ok_or_else(|| {
                    SyntaxError::new(
                        "indented sentence without a definition header above it",
                        line,
                        sentence.get_utf8_column(),
                    )
                })?;
                let (_, alternative) = alternative(sentence).map_err(syntax_error)?;
                definition.alternatives.push(alternative);
                continue;
            }

            if text.fragment().starts_with("//") || text.fragment().starts_with('#') {
                continue;
            }

            if let Some(done) = current.take() {
                definitions.push(close_definition(done)?);
            }
            let (_, definition) = header(text).map_err(syntax_error)?;
            validate_args(&definition.key, &definition.args, line)?;
            if !seen.insert(definition.key.clone()) {
                return Err(SyntaxError::new(
                    format!("duplicate definition {}", definition.key),
                    line,
                    1,
                )
                .into());
            }
            current = Some(definition);
        }

        if let Some(done) = current.take() {
            definitions.push(close_definition(done)?);
        }

        tracing::debug!(definitions = definitions.len(), "parsed grammar");
        Ok(Grammar::new(definitions, source))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A parse failure and the position it was raised at
#[derive(Debug)]
struct GrammarError<'a> {
    at: Span<'a>,
    message: String,
}

impl<'a> GrammarError<'a> {
    fn new(at: Span<'a>, message: impl Into<String>) -> Self {
        Self {
            at,
            message: message.into(),
        }
    }
}

impl<'a> ParseError<Span<'a>> for GrammarError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, format!("unexpected input ({})", kind.description()))
    }

    fn append(_: Span<'a>, _: ErrorKind, other: Self) -> Self {
        other
    }
}

fn failure<'a>(at: Span<'a>, message: impl Into<String>) -> nom::Err<GrammarError<'a>> {
    nom::Err::Failure(GrammarError::new(at, message))
}

fn fail<'a, T>(at: Span<'a>, message: impl Into<String>) -> PResult<'a, T> {
    Err(failure(at, message))
}

/// Turn a recoverable error into a failure reported at `at`
fn expect<'a, T>(result: PResult<'a, T>, at: Span<'a>, message: &str) -> PResult<'a, T> {
    match result {
        Err(nom::Err::Error(_)) => fail(at, message),
        other => other,
    }
}

fn syntax_error(err: nom::Err<GrammarError<'_>>) -> SyntaxError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => SyntaxError::new(
            e.message,
            e.at.location_line() as usize,
            e.at.get_utf8_column(),
        ),
        nom::Err::Incomplete(_) => SyntaxError::new("unexpected end of input", 1, 1),
    }
}

fn close_definition(definition: Definition) -> std::result::Result<Definition, SyntaxError> {
    if definition.alternatives.is_empty() {
        return Err(SyntaxError::new(
            format!("{} has no sentences", definition.key),
            definition.line,
            1,
        ));
    }
    Ok(definition)
}

// ============================================================================
// Lines and brackets
// ============================================================================

/// One line without its `\n`
fn source_line<'a>(input: Span<'a>) -> PResult<'a, Span<'a>> {
    terminated(take_till(|c: char| c == '\n'), opt(char('\n')))(input)
}

/// Text up to the `]` closing the bracket opened at `open`
fn bracket_body<'a>(open: Span<'a>, input: Span<'a>) -> PResult<'a, Span<'a>> {
    let (input, body) = take_till(|c: char| c == '[' || c == ']')(input)?;
    match input.fragment().chars().next() {
        Some(']') => {
            let (input, _) = char(']')(input)?;
            Ok((input, body))
        }
        Some(_) => fail(input, "unexpected '[' inside brackets"),
        None => fail(open, "unterminated '['"),
    }
}

// ============================================================================
// Headers
// ============================================================================

fn header<'a>(input: Span<'a>) -> PResult<'a, Definition> {
    let start = input;
    let line = start.location_line() as usize;

    let (input, sigil) = anychar(input)?;
    let open = input;
    let (input, _) = expect(
        char('[')(input),
        start,
        "expected a definition header (%[intent], @[slot] or ~[alias]) or an indented sentence",
    )?;
    let kind = DefinitionKind::from_sigil(sigil).ok_or_else(|| {
        failure(start, format!("unknown sigil '{}'; expected '%', '@' or '~'", sigil))
    })?;

    let (input, body) = bracket_body(open, input)?;
    let (name, variation, optional) = split_reference(body.fragment()).map_err(|m| failure(open, m))?;
    if optional {
        return fail(open, "a definition header cannot be optional");
    }
    if kind == DefinitionKind::Intent && variation.is_some() {
        return fail(open, "intents cannot declare a '#' variation");
    }

    let (input, _) = space0(input)?;
    let (input, args) = opt(args)(input)?;
    let (input, _) = space0(input)?;
    if !input.fragment().is_empty() {
        return fail(input, "unexpected text after definition header");
    }

    Ok((
        input,
        Definition {
            key: DefinitionKey {
                kind,
                name,
                variation,
            },
            args: args.unwrap_or_default(),
            alternatives: Vec::new(),
            line,
        },
    ))
}

/// `('k': 'v', "k2": v2)`, a trailing comma is allowed
fn args<'a>(input: Span<'a>) -> PResult<'a, BTreeMap<String, String>> {
    let open = input;
    let (input, _) = char('(')(input)?;
    let (input, _) = space0(input)?;
    let (input, pairs) = separated_list0(delimited(space0, char(','), space0), arg_pair)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = opt(char(','))(input)?;
    let (input, _) = space0(input)?;

    let input = match input.fragment().chars().next() {
        Some(')') => char(')')(input)?.0,
        Some(c) => return fail(input, format!("expected ',' or ')', found '{}'", c)),
        None => return fail(open, "unterminated '('"),
    };

    let mut args = BTreeMap::new();
    for (at, key, value) in pairs {
        if args.insert(key.clone(), value).is_some() {
            return fail(at, format!("duplicate argument '{}'", key));
        }
    }
    Ok((input, args))
}

fn arg_pair<'a>(input: Span<'a>) -> PResult<'a, (Span<'a>, String, String)> {
    let at = input;
    let (input, key) = arg_value(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = expect(char(':')(input), input, "expected ':' after argument name")?;
    let (input, _) = space0(input)?;
    let (input, value) = expect(arg_value(input), input, "expected a quoted string")?;
    Ok((input, (at, key, value)))
}

/// A quoted string (`'..'` or `".."`) or a bare word
fn arg_value<'a>(input: Span<'a>) -> PResult<'a, String> {
    alt((
        quoted('\''),
        quoted('"'),
        map(
            take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.')),
            |word: Span<'a>| word.fragment().to_string(),
        ),
    ))(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(Span<'a>) -> PResult<'a, String> {
    move |input: Span<'a>| {
        let start = input;
        let (input, _) = char(quote)(input)?;
        let (input, body) = take_till(|c: char| c == quote)(input)?;
        let (input, _) = expect(char(quote)(input), start, "unterminated string")?;
        Ok((input, body.fragment().to_string()))
    }
}

fn validate_args(
    key: &DefinitionKey,
    args: &BTreeMap<String, String>,
    line: usize,
) -> std::result::Result<(), SyntaxError> {
    if let Some(value) = args.get("distribution") {
        value.parse::<Distribution>().map_err(|_| {
            SyntaxError::new(
                format!("unknown distribution '{}'; expected 'even' or 'regular'", value),
                line,
                1,
            )
        })?;
    }
    for name in ["training", "testing"] {
        let Some(value) = args.get(name) else {
            continue;
        };
        if key.kind != DefinitionKind::Intent {
            return Err(SyntaxError::new(
                format!("'{}' is only allowed on intents, not on {}", name, key),
                line,
                1,
            ));
        }
        value.trim().parse::<usize>().map_err(|_| {
            SyntaxError::new(
                format!("'{}' must be a non-negative integer, found '{}'", name, value),
                line,
                1,
            )
        })?;
    }
    Ok(())
}

// ============================================================================
// Sentences
// ============================================================================

enum Piece<'a> {
    Text(&'a str),
    Optional(String),
    Reference(Reference),
}

fn alternative<'a>(input: Span<'a>) -> PResult<'a, Alternative> {
    let start = input;
    let (input, weight) = opt(weight)(input)?;
    let (input, pieces) = many0(piece(start))(input)?;

    let mut elements = Vec::new();
    let mut literal = String::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => literal.push_str(text),
            Piece::Optional(text) => {
                flush_literal(&mut literal, &mut elements);
                elements.push(Element::Literal { text, optional: true });
            }
            Piece::Reference(reference) => {
                flush_literal(&mut literal, &mut elements);
                elements.push(Element::Reference(reference));
            }
        }
    }
    flush_literal(&mut literal, &mut elements);

    if elements.is_empty() {
        return fail(start, "empty sentence");
    }
    Ok((
        input,
        Alternative {
            elements,
            weight,
            line: start.location_line() as usize,
        },
    ))
}

/// `*[NN%]` prefix
fn weight<'a>(input: Span<'a>) -> PResult<'a, f64> {
    let start = input;
    let (input, _) = tag("*[")(input)?;
    let (input, body) = bracket_body(start, input)?;
    let value = parse_weight(body.fragment()).map_err(|m| failure(start, m))?;
    let (input, _) = space0(input)?;
    Ok((input, value))
}

fn piece<'a>(sentence: Span<'a>) -> impl FnMut(Span<'a>) -> PResult<'a, Piece<'a>> {
    move |input: Span<'a>| {
        alt((
            map(literal_run, |text: Span<'a>| Piece::Text(*text.fragment())),
            map(reference('~', DefinitionKind::Alias), Piece::Reference),
            map(reference('@', DefinitionKind::Slot), Piece::Reference),
            optional_segment,
            misplaced(sentence),
        ))(input)
    }
}

/// Plain text. A sigil character is text unless a `[` follows it.
fn literal_run<'a>(input: Span<'a>) -> PResult<'a, Span<'a>> {
    recognize(many1(alt((
        is_not("~@%*?[]"),
        recognize(terminated(one_of("~@%*?"), not(char('[')))),
    ))))(input)
}

fn reference<'a>(sigil: char, kind: DefinitionKind) -> impl FnMut(Span<'a>) -> PResult<'a, Reference> {
    move |input: Span<'a>| {
        let start = input;
        let (input, _) = char(sigil)(input)?;
        let (input, _) = char('[')(input)?;
        let (input, body) = bracket_body(start, input)?;
        let (name, argument, optional) =
            split_reference(body.fragment()).map_err(|m| failure(start, m))?;
        Ok((
            input,
            Reference {
                kind,
                name,
                argument,
                optional,
                column: start.get_utf8_column(),
            },
        ))
    }
}

/// `?[some words]`
fn optional_segment<'a>(input: Span<'a>) -> PResult<'a, Piece<'a>> {
    let start = input;
    let (input, _) = tag("?[")(input)?;
    let (input, body) = bracket_body(start, input)?;
    let text = body.fragment().trim();
    if text.is_empty() {
        return fail(start, "empty optional segment");
    }
    Ok((input, Piece::Optional(text.to_string())))
}

/// Brackets that cannot start an element at this position
fn misplaced<'a>(sentence: Span<'a>) -> impl FnMut(Span<'a>) -> PResult<'a, Piece<'a>> {
    move |input: Span<'a>| {
        let mut chars = input.fragment().chars();
        match (chars.next(), chars.next()) {
            (Some('%'), Some('[')) => fail(input, "intents cannot be referenced from a sentence"),
            (Some('*'), Some('[')) => fail(input, "a weight must be the first thing in a sentence"),
            (Some(']'), _) => fail(input, "unmatched ']'"),
            (Some('['), _) => {
                let text: &str = sentence.fragment();
                let before = &text[..input.location_offset() - sentence.location_offset()];
                let message = match before.chars().last() {
                    Some(prev) if !prev.is_whitespace() => {
                        format!("unknown sigil '{}' before '['", prev)
                    }
                    _ => "'[' must follow a sigil ('~', '@' or '?')".to_string(),
                };
                fail(input, message)
            }
            _ => Err(nom::Err::Error(GrammarError::from_error_kind(input, ErrorKind::Char))),
        }
    }
}

fn flush_literal(literal: &mut String, elements: &mut Vec<Element>) {
    let text = literal.trim();
    if !text.is_empty() {
        elements.push(Element::Literal {
            text: text.to_string(),
            optional: false,
        });
    }
    literal.clear();
}

/// Split `name#argument?` into its parts.
fn split_reference(body: &str) -> std::result::Result<(String, Option<String>, bool), String> {
    let mut text = body.trim();
    let optional = text.ends_with('?');
    if optional {
        text = text[..text.len() - 1].trim_end();
    }
    if text.contains('?') {
        return Err("'?' is only allowed at the end of a reference".to_string());
    }

    let (name, argument) = match text.split_once('#') {
        Some((name, argument)) => (name.trim(), Some(argument.trim())),
        None => (text, None),
    };
    if name.is_empty() {
        return Err("empty name".to_string());
    }
    match argument {
        Some("") => Err("empty argument after '#'".to_string()),
        Some(argument) if argument.contains('#') => Err("only one '#' argument is allowed".to_string()),
        _ => Ok((name.to_string(), argument.map(str::to_string), optional)),
    }
}

fn parse_weight(body: &str) -> std::result::Result<f64, String> {
    let body = body.trim();
    let number = body
        .strip_suffix('%')
        .ok_or_else(|| format!("weight '{}' must be a percentage such as *[20%]", body))?
        .trim();
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid weight '{}'", body))?;
    if !(value > 0.0 && value <= 100.0) {
        return Err(format!(
            "weight {}% must be greater than 0 and at most 100",
            number
        ));
    }
    Ok(value)
}
