//! Source text to expressions.
//!
//! The reader recognises bracket pairs (`()`, `[]`, `{}`), the quote-family
//! sigils, double-quoted strings, `;` line comments and bare atoms. Sigils
//! expand to two-element lists (`'x` reads as `(quote x)`); a `.` only acts
//! as a sigil at the start of a token, so `1.5` and `a.b` stay atoms.
//!
//! String literals keep their source escapes verbatim. Turning `\n` into a
//! newline is left to [`crate::printer::show`].

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace1, not_line_ending},
    combinator::{recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::preceded,
};

use crate::ast::{Expr, QUOTE_SIGILS};
use crate::number::Number;
use crate::printer::escape_controls;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Failure carried through the nom parsers, positioned at the remaining input
#[derive(Debug)]
struct ReadFailure<'a> {
    input: &'a str,
    kind: ParseErrorKind,
    message: String,
    found: Option<String>,
}

impl<'a> nom::error::ParseError<&'a str> for ReadFailure<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        let near: String = input.chars().take(10).collect();
        ReadFailure {
            input,
            kind: ParseErrorKind::InvalidSyntax,
            message: format!("invalid syntax near '{near}' ({kind:?})"),
            found: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type ReadResult<'a, T> = IResult<&'a str, T, ReadFailure<'a>>;

fn fail<'a, T>(
    input: &'a str,
    kind: ParseErrorKind,
    message: impl Into<String>,
    found: Option<char>,
) -> ReadResult<'a, T> {
    Err(nom::Err::Failure(ReadFailure {
        input,
        kind,
        message: message.into(),
        found: found.map(String::from),
    }))
}

fn unexpected_eof<T>(input: &str) -> ReadResult<'_, T> {
    fail(input, ParseErrorKind::Incomplete, "unexpected 'EOF'", None)
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "()[]{}'\"`,;".contains(c)
}

fn closer_for(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

fn is_closer(c: char) -> bool {
    matches!(c, ')' | ']' | '}')
}

/// Expansion symbol of a sigil at the start of `input`, if there is one
fn sigil_at(input: &str) -> Option<(char, &'static str)> {
    let c = input.chars().next()?;
    QUOTE_SIGILS.iter().find(|(sigil, _)| *sigil == c).copied()
}

/// Skip whitespace and `;` comments
fn skip_trivia(input: &str) -> ReadResult<'_, ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize(preceded(char(';'), not_line_ending)),
        ))),
    )
    .parse(input)
}

/// Bare token: a number if it reads as one, else a symbol
fn parse_atom(input: &str) -> ReadResult<'_, Expr> {
    let (rest, token) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;
    let atom = Number::parse(token).map_or_else(|| Expr::Symbol(token.to_owned()), Expr::Number);
    Ok((rest, atom))
}

/// Parse a string literal, keeping escape sequences as written
fn parse_string(input: &str) -> ReadResult<'_, Expr> {
    let (remaining, _) = char('"').parse(input)?;
    let mut chars = remaining.char_indices();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '"' => {
                let contents = &remaining[..pos];
                return Ok((
                    &remaining[pos + 1..],
                    Expr::String(escape_controls(contents)),
                ));
            }
            '\\' => {
                // the escaped character belongs to the literal, even a quote
                if chars.next().is_none() {
                    break;
                }
            }
            _ => {}
        }
    }

    fail(
        input,
        ParseErrorKind::Incomplete,
        "unterminated string",
        Some('"'),
    )
}

/// Parse a bracketed list up to its matching closer
fn parse_list(input: &str, open: char, depth: usize) -> ReadResult<'_, Expr> {
    let (mut input, _) = char(open).parse(input)?;
    let Some(closer) = closer_for(open) else {
        return fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("unexpected '{open}'"),
            Some(open),
        );
    };

    let mut elements = Vec::new();
    loop {
        let (rest, ()) = skip_trivia(input)?;
        match rest.chars().next() {
            None => return unexpected_eof(rest),
            Some(c) if c == closer => return Ok((&rest[c.len_utf8()..], Expr::List(elements))),
            Some(c) if is_closer(c) => {
                return fail(
                    rest,
                    ParseErrorKind::MismatchedCloser,
                    format!("unexpected '{c}', expected '{closer}'"),
                    Some(c),
                );
            }
            Some(_) => {
                let (rest, element) = parse_form(rest, depth + 1)?;
                elements.push(element);
                input = rest;
            }
        }
    }
}

/// Parse a sigil and the form it applies to
fn parse_quoted<'a>(
    input: &'a str,
    sigil: char,
    name: &'static str,
    depth: usize,
) -> ReadResult<'a, Expr> {
    let (rest, _) = char(sigil).parse(input)?;
    let (rest, ()) = skip_trivia(rest)?;
    if rest.chars().next().is_none_or(is_closer) {
        return fail(
            rest,
            ParseErrorKind::DanglingSigil,
            format!("expected 'Xpr' after '{sigil}'"),
            Some(sigil),
        );
    }
    let (rest, quoted) = parse_form(rest, depth + 1)?;
    Ok((rest, Expr::List(vec![Expr::Symbol(name.to_owned()), quoted])))
}

/// Parse one form, with a depth limit to prevent stack overflow
fn parse_form(input: &str, depth: usize) -> ReadResult<'_, Expr> {
    if depth >= MAX_PARSE_DEPTH {
        return fail(
            input,
            ParseErrorKind::TooDeeplyNested,
            format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            None,
        );
    }

    let (input, ()) = skip_trivia(input)?;
    if let Some((sigil, name)) = sigil_at(input) {
        return parse_quoted(input, sigil, name, depth);
    }
    match input.chars().next() {
        None => unexpected_eof(input),
        Some(c @ ('(' | '[' | '{')) => parse_list(input, c, depth),
        Some(c) if is_closer(c) => fail(
            input,
            ParseErrorKind::UnexpectedCloser,
            format!("unexpected '{c}'"),
            Some(c),
        ),
        Some('"') => parse_string(input),
        Some(_) => parse_atom(input),
    }
}

/// Convert a nom failure into a positioned [`ParseError`]
fn to_error(source: &str, error: nom::Err<ReadFailure<'_>>) -> Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len().saturating_sub(e.input.len());
            ParseError::with_context(e.kind, e.message, source, offset, e.found).into()
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "unexpected 'EOF'").into()
        }
    }
}

/// Read the next form and return it with the unconsumed remainder.
///
/// Returns `Ok(None)` when only whitespace and comments remain.
pub fn read_next(text: &str) -> Result<Option<(Expr, &str)>, Error> {
    let (rest, ()) = skip_trivia(text).map_err(|e| to_error(text, e))?;
    if rest.is_empty() {
        return Ok(None);
    }
    let (rest, expr) = parse_form(rest, 0).map_err(|e| to_error(text, e))?;
    Ok(Some((expr, rest)))
}

/// Read the first form of `text`
pub fn read(text: &str) -> Result<Option<Expr>, Error> {
    Ok(read_next(text)?.map(|(expr, _)| expr))
}

/// Read every form of `text`
pub fn read_all(text: &str) -> Result<Vec<Expr>, Error> {
    let mut forms = Vec::new();
    let mut rest = text;
    while let Some((expr, remaining)) = read_next(rest)? {
        forms.push(expr);
        rest = remaining;
    }
    Ok(forms)
}
