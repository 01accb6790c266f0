//! Declarative table of diagnostic formats
//!
//! Each row binds a regular expression to the dialect it belongs to. Supporting
//! a new compiler means appending rows here; the classifier has no per-compiler
//! branches. Rows use these named groups:
//!
//! - `kind` (required): `warning`/`error` keyword
//! - `file`, `line`, `col`: location, each optional
//! - `msg`: message text
//! - `code`: compiler specific code (`-W` flag name, MSVC `C2065`)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Family of diagnostic text formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Gnu,
    Clang,
    Msvc,
    /// Messages printed by the build system itself (`CMake Warning at ...`)
    Meta,
}

impl Dialect {
    /// Order tried when no hint is given or the hinted dialect does not match.
    /// Also the tie-break for lines several dialects accept.
    pub const FALLBACK_ORDER: [Dialect; 4] =
        [Dialect::Gnu, Dialect::Clang, Dialect::Msvc, Dialect::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Gnu => "gnu",
            Dialect::Clang => "clang",
            Dialect::Msvc => "msvc",
            Dialect::Meta => "meta",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gnu" => Some(Dialect::Gnu),
            "clang" => Some(Dialect::Clang),
            "msvc" => Some(Dialect::Msvc),
            "meta" => Some(Dialect::Meta),
            _ => None,
        }
    }

    /// Map a cmake compiler id (`GNU`, `AppleClang`, `MSVC`, ...) to a dialect hint
    pub fn from_compiler_id(id: &str) -> Option<Self> {
        match id {
            "GNU" => Some(Dialect::Gnu),
            "Clang" | "AppleClang" | "ARMClang" | "IntelLLVM" => Some(Dialect::Clang),
            "MSVC" => Some(Dialect::Msvc),
            _ => None,
        }
    }
}

/// How the stored message is assembled from the captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageForm {
    /// `msg` as captured
    Plain,
    /// `code: msg`, the way MSVC prints it
    CodePrefixed,
}

struct RuleSpec {
    dialect: Dialect,
    name: &'static str,
    message: MessageForm,
    pattern: &'static str,
}

/// `file:line[:col]: [fatal] warning|error: msg [-Wflag]`
const GNU_LOCATION: &str = r"^(?P<file>(?:[A-Za-z]:)?[^:\s][^:]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s+(?:fatal\s+)?(?P<kind>warning|error):\s+(?P<msg>.*?)(?:\s+\[-W(?P<code>[\w+=-]+)\])?\s*$";

const RULE_SPECS: &[RuleSpec] = &[
    RuleSpec {
        dialect: Dialect::Gnu,
        name: "gnu-location",
        message: MessageForm::Plain,
        pattern: GNU_LOCATION,
    },
    RuleSpec {
        dialect: Dialect::Gnu,
        name: "gnu-tool",
        message: MessageForm::Plain,
        pattern: r"^(?:\S*/)?(?:gcc|g\+\+|cc|c\+\+|cc1|cc1plus|collect2|ld|ld\.bfd|ld\.gold|as)(?:-[\d.]+)?:\s+(?:fatal\s+)?(?P<kind>warning|error):\s+(?P<msg>.+?)\s*$",
    },
    RuleSpec {
        dialect: Dialect::Gnu,
        name: "gnu-bare",
        message: MessageForm::Plain,
        pattern: r"^(?:fatal\s+)?(?P<kind>warning|error):\s+(?P<msg>.+?)\s*$",
    },
    RuleSpec {
        dialect: Dialect::Clang,
        name: "clang-location",
        message: MessageForm::Plain,
        pattern: GNU_LOCATION,
    },
    RuleSpec {
        dialect: Dialect::Clang,
        name: "clang-driver",
        message: MessageForm::Plain,
        pattern: r"^(?:\S*/)?(?:clang|clang\+\+|clang-cl|ld\.lld|ld64\.lld|lld)(?:-\d+)?:\s+(?:fatal\s+)?(?P<kind>warning|error):\s+(?P<msg>.+?)\s*$",
    },
    RuleSpec {
        dialect: Dialect::Msvc,
        name: "msvc-location",
        message: MessageForm::CodePrefixed,
        pattern: r"^\s*(?P<file>[^\s(][^(]*?)\((?P<line>\d+)(?:,(?P<col>\d+))?\)\s*:\s+(?:fatal\s+)?(?P<kind>warning|error)\s+(?P<code>[A-Z]+\d+)\s*:\s*(?P<msg>.*?)(?:\s+\[[^\]]*\.vcxproj\])?\s*$",
    },
    RuleSpec {
        dialect: Dialect::Msvc,
        name: "msvc-tool",
        message: MessageForm::CodePrefixed,
        pattern: r"^\s*(?:LINK|(?P<file>[^\s:(][^:(]*?))\s+:\s+(?:fatal\s+)?(?P<kind>warning|error)\s+(?P<code>(?:LNK|CVT|RC|MSB|D)\d+)\s*:\s*(?P<msg>.*?)(?:\s+\[[^\]]*\.vcxproj\])?\s*$",
    },
    RuleSpec {
        dialect: Dialect::Meta,
        name: "meta-location",
        message: MessageForm::Plain,
        pattern: r"^(?:CMake|CPack|CTest) (?P<kind>Error|Warning|Deprecation Warning|Deprecation Error)(?: \(dev\))? at (?P<file>[^:]+):(?P<line>\d+)(?: \((?P<msg>[^)]*)\))?:?\s*$",
    },
    RuleSpec {
        dialect: Dialect::Meta,
        name: "meta-plain",
        message: MessageForm::Plain,
        pattern: r"^(?:CMake|CPack|CTest) (?P<kind>Error|Warning)(?: \(dev\))?:\s*(?P<msg>.+?)\s*$",
    },
];

/// A compiled row of the dialect table
pub struct Rule {
    pub dialect: Dialect,
    pub name: &'static str,
    pub message: MessageForm,
    pub regex: Regex,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULE_SPECS
        .iter()
        .map(|spec| Rule {
            dialect: spec.dialect,
            name: spec.name,
            message: spec.message,
            regex: Regex::new(spec.pattern).unwrap(),
        })
        .collect()
});

/// Rules of one dialect in declared order
pub fn rules_for(dialect: Dialect) -> impl Iterator<Item = &'static Rule> {
    RULES.iter().filter(move |r| r.dialect == dialect)
}

/// Every rule, in declared order
pub fn all_rules() -> &'static [Rule] {
    &RULES
}
