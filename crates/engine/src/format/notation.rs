//! LaTeX-ish math markup to plain Unicode.
//!
//! Providers like to answer with `\frac{a}{b}`, `x^{2}` or `\alpha`, which
//! chat clients show verbatim. Each rule removes at least one `\`, `^` or `_`
//! marker, and a pass is repeated until nothing changes, so the result is a
//! fixed point: normalizing it again is a no-op. Fenced code and inline code
//! are left untouched.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

use super::fence::{Segment, for_each_inline, segments};

/// Named commands and their symbols. Matching is on the whole command name,
/// so `\in` never fires inside `\infty`.
const SYMBOLS: &[(&str, &str)] = &[
    ("pm", "±"),
    ("mp", "∓"),
    ("times", "×"),
    ("div", "÷"),
    ("cdot", "·"),
    ("neq", "≠"),
    ("leq", "≤"),
    ("geq", "≥"),
    ("le", "≤"),
    ("ge", "≥"),
    ("approx", "≈"),
    ("equiv", "≡"),
    ("infty", "∞"),
    ("pi", "π"),
    ("theta", "θ"),
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("Delta", "Δ"),
    ("epsilon", "ε"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("sigma", "σ"),
    ("phi", "φ"),
    ("omega", "ω"),
    ("Omega", "Ω"),
    ("sum", "Σ"),
    ("prod", "∏"),
    ("int", "∫"),
    ("partial", "∂"),
    ("nabla", "∇"),
    ("forall", "∀"),
    ("exists", "∃"),
    ("in", "∈"),
    ("notin", "∉"),
    ("subset", "⊂"),
    ("subseteq", "⊆"),
    ("supset", "⊃"),
    ("supseteq", "⊇"),
    ("cup", "∪"),
    ("cap", "∩"),
    ("emptyset", "∅"),
    ("to", "→"),
    ("rightarrow", "→"),
    ("leftarrow", "←"),
    ("Rightarrow", "⇒"),
    ("Leftrightarrow", "⇔"),
    ("land", "∧"),
    ("lor", "∨"),
    ("neg", "¬"),
    ("angle", "∠"),
    ("perp", "⊥"),
    ("parallel", "∥"),
    ("nparallel", "∦"),
    ("therefore", "∴"),
    ("because", "∵"),
    ("degree", "°"),
    ("ldots", "…"),
    ("cdots", "⋯"),
];

/// Functions written as commands; `\sin x` reads as `sin x`.
const FUNCTIONS: &[&str] = &["sin", "cos", "tan", "cot", "log", "ln", "exp", "lim", "max", "min"];

static FRAC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\frac\{([^{}`]+)\}\{([^{}`]+)\}").expect("frac regex is valid")
});
static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(sin|cos|tan|cot|log|ln|exp)\{([^{}`]+)\}").expect("function regex is valid")
});
static SQRT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\sqrt(?:\{([^{}`]+)\}|\s*([0-9A-Za-z]+))").expect("sqrt regex is valid")
});
static TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\text\{([^{}`]+)\}").expect("text regex is valid"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([A-Za-z]+)").expect("command regex is valid"));
static SUPERSCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\^(?:\{([^{}`]+)\}|([0-9]+))").expect("superscript regex is valid")
});
static SUBSCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(?:\{([^{}`]+)\}|([0-9]+))").expect("subscript regex is valid")
});

fn superscript(c: char) -> char {
    match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        '+' => '⁺',
        '-' => '⁻',
        '=' => '⁼',
        '(' => '⁽',
        ')' => '⁾',
        'n' => 'ⁿ',
        'i' => 'ⁱ',
        other => other,
    }
}

fn subscript(c: char) -> char {
    match c {
        '0' => '₀',
        '1' => '₁',
        '2' => '₂',
        '3' => '₃',
        '4' => '₄',
        '5' => '₅',
        '6' => '₆',
        '7' => '₇',
        '8' => '₈',
        '9' => '₉',
        '+' => '₊',
        '-' => '₋',
        '=' => '₌',
        '(' => '₍',
        ')' => '₎',
        other => other,
    }
}

/// Braced group or bare digits, whichever alternative matched.
fn operand<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str())
}

fn command(name: &str) -> Option<&'static str> {
    SYMBOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, symbol)| *symbol)
        .or_else(|| FUNCTIONS.iter().find(|f| **f == name).copied())
}

/// One sweep of every rule.
fn pass(text: &str) -> String {
    let text = FRAC.replace_all(text, "(${1})/(${2})");
    let text = FUNCTION_CALL.replace_all(&text, "${1}(${2})");
    let text = SQRT.replace_all(&text, |caps: &Captures<'_>| format!("√({})", operand(caps)));
    let text = TEXT.replace_all(&text, "[${1}]");
    let text = COMMAND.replace_all(&text, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let name = caps.get(1).map_or("", |m| m.as_str());
        command(name).unwrap_or(whole).to_string()
    });
    let text = SUPERSCRIPT.replace_all(&text, |caps: &Captures<'_>| {
        operand(caps).chars().map(superscript).collect::<String>()
    });
    let text = SUBSCRIPT.replace_all(&text, |caps: &Captures<'_>| {
        operand(caps).chars().map(subscript).collect::<String>()
    });
    match text {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

fn to_fixed_point(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Replace math markup outside code with Unicode notation.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in segments(text) {
        match segment {
            Segment::Fence { text, .. } => out.push_str(text),
            Segment::Prose(prose) => for_each_inline(prose, |part, is_code| {
                if is_code {
                    out.push_str(part);
                } else {
                    out.push_str(&to_fixed_point(part));
                }
            }),
        }
    }
    out
}
