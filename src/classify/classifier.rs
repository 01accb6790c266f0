//! Line classifier over the dialect table

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::dialect::{rules_for, Dialect, MessageForm, Rule};
use crate::records::{Diagnostic, DiagnosticKind};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

/// Remove terminal colour sequences (gcc/clang `-fdiagnostics-color`)
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    if line.contains('\x1b') {
        ANSI_ESCAPE.replace_all(line, "")
    } else {
        Cow::Borrowed(line)
    }
}

/// Classify one line of tool output.
///
/// With a hint the hinted dialect is tried first, then every dialect in
/// [`Dialect::FALLBACK_ORDER`]. Lines matching no rule yield `None`.
pub fn classify(line: &str, hint: Option<Dialect>) -> Option<Diagnostic> {
    let clean = strip_ansi(line);
    let text = clean.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return None;
    }

    if let Some(dialect) = hint {
        if let Some(diagnostic) = match_dialect(dialect, text) {
            return Some(diagnostic);
        }
    }

    Dialect::FALLBACK_ORDER
        .into_iter()
        .filter(|d| Some(*d) != hint)
        .find_map(|d| match_dialect(d, text))
}

fn match_dialect(dialect: Dialect, text: &str) -> Option<Diagnostic> {
    rules_for(dialect).find_map(|rule| {
        let caps = rule.regex.captures(text)?;
        build_diagnostic(rule, &caps, text)
    })
}

fn build_diagnostic(rule: &Rule, caps: &Captures<'_>, text: &str) -> Option<Diagnostic> {
    let kind = DiagnosticKind::from_keyword(caps.name("kind")?.as_str())?;

    let file = caps
        .name("file")
        .map(|m| m.as_str().trim().to_string())
        .filter(|f| !f.is_empty());
    let line = caps.name("line").and_then(|m| m.as_str().parse().ok());
    let column = caps.name("col").and_then(|m| m.as_str().parse().ok());
    let code = caps.name("code").map(|m| m.as_str().to_string());

    let raw_message = caps
        .name("msg")
        .map(|m| m.as_str().trim())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| text.trim());

    let message = match (rule.message, &code) {
        (MessageForm::CodePrefixed, Some(code)) => format!("{}: {}", code, raw_message),
        _ => raw_message.to_string(),
    };

    Some(Diagnostic {
        kind,
        file,
        line,
        column,
        message,
        code,
        dialect: rule.dialect,
    })
}

/// Drop repeated diagnostics, keeping the first occurrence of each
pub fn dedup(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}
