//! Serialization of expressions back to source text.
//!
//! [`print`], [`show`] and [`cprint`] share one traversal and differ only in
//! how atoms are rendered. All three invert the reader's quote sugar, so a
//! two-element list headed by `quote` prints as `'x` again.
//!
//! | Style    | Strings             | Use                         |
//! |----------|---------------------|-----------------------------|
//! | `print`  | quoted, escapes kept | re-readable source         |
//! | `show`   | unquoted, unescaped  | human display, `<<`, `fmt` |
//! | `cprint` | as `print`, coloured | REPL echo                  |

use crate::ast::{Expr, sigil_for};
use crate::number::Number;

const RESET: &str = "\x1b[0m";
const BLUE: &str = "\x1b[34m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const MAGENTA: &str = "\x1b[35m";
const WHITE: &str = "\x1b[37m";
const YELLOW: &str = "\x1b[33m";

/// Control characters and the letter of their backslash escape
const CONTROL_ESCAPES: [(char, char); 7] = [
    ('\n', 'n'),
    ('\t', 't'),
    ('\r', 'r'),
    ('\u{7}', 'a'),
    ('\u{8}', 'b'),
    ('\u{c}', 'f'),
    ('\u{b}', 'v'),
];

/// Characters escaped as themselves behind a backslash
const LITERAL_ESCAPES: [char; 3] = ['?', '"', '\\'];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Style {
    Plain,
    Display,
    Color,
}

struct Printer {
    style: Style,
    out: String,
}

impl Printer {
    fn new(style: Style) -> Self {
        Printer {
            style,
            out: String::new(),
        }
    }

    fn paint(&mut self, color: &str, text: &str) {
        if self.style == Style::Color {
            self.out.push_str(color);
            self.out.push_str(text);
            self.out.push_str(RESET);
        } else {
            self.out.push_str(text);
        }
    }

    fn number(&mut self, n: &Number) {
        match n {
            Number::Rat(r) if self.style == Style::Color => {
                self.paint(YELLOW, &r.numer().to_string());
                self.paint(WHITE, "/");
                self.paint(YELLOW, &r.denom().to_string());
            }
            other => self.paint(YELLOW, &other.to_string()),
        }
    }

    fn string(&mut self, s: &str) {
        match self.style {
            Style::Display => self.out.push_str(&unescape(s)),
            Style::Plain | Style::Color => self.paint(GREEN, &format!("\"{s}\"")),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(n) => self.number(n),
            Expr::Symbol(s) => self.paint(MAGENTA, s),
            Expr::String(s) => self.string(s),
            Expr::Function(_) => self.paint(BLUE, "#<Fn>"),
            Expr::List(items) => self.list(items),
        }
    }

    fn list(&mut self, items: &[Expr]) {
        if let [Expr::Symbol(head), quoted] = items
            && let Some(sigil) = sigil_for(head)
        {
            self.paint(CYAN, sigil.encode_utf8(&mut [0; 4]));
            self.expr(quoted);
            return;
        }

        self.paint(WHITE, "(");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push(' ');
            }
            self.expr(item);
        }
        self.paint(WHITE, ")");
    }
}

fn render(expr: &Expr, style: Style) -> String {
    let mut printer = Printer::new(style);
    printer.expr(expr);
    printer.out
}

/// Source form: strings quoted with their stored escapes, re-readable
pub fn print(expr: &Expr) -> String {
    render(expr, Style::Plain)
}

/// Display form: strings unescaped and unquoted
pub fn show(expr: &Expr) -> String {
    render(expr, Style::Display)
}

/// [`print`] with ANSI colours
pub fn cprint(expr: &Expr) -> String {
    render(expr, Style::Color)
}

/// Turn raw text into string storage form
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if let Some((_, letter)) = CONTROL_ESCAPES.iter().find(|(raw, _)| *raw == c) {
            out.push('\\');
            out.push(*letter);
        } else if LITERAL_ESCAPES.contains(&c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape only control characters, leaving existing backslash sequences alone
pub(crate) fn escape_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match CONTROL_ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, letter)) => {
                out.push('\\');
                out.push(*letter);
            }
            None => out.push(c),
        }
    }
    out
}

/// Turn string storage form into raw text; unknown escapes are kept as written
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) => {
                if let Some((raw, _)) = CONTROL_ESCAPES.iter().find(|(_, letter)| *letter == next) {
                    out.push(*raw);
                } else if LITERAL_ESCAPES.contains(&next) {
                    out.push(next);
                } else {
                    out.push('\\');
                    out.push(next);
                }
            }
            None => out.push('\\'),
        }
    }
    out
}
