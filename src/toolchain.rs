//! Toolchain detection from configure output
//!
//! Detection never guesses: a missing marker, or several markers that
//! disagree, leave the field at [`UNKNOWN`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::LazyLock;

use crate::classify::Dialect;
use crate::records::UNKNOWN;

static C_COMPILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--\s+The C compiler identification is\s+(\S+)(?:\s+(\S+))?\s*$").unwrap()
});
static CXX_COMPILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--\s+The CXX compiler identification is\s+(\S+)(?:\s+(\S+))?\s*$").unwrap()
});
static GENERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--\s+(?:Generator|Building for):\s+(.+?)\s*$").unwrap()
});
static TOOL_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^(?:--\s+CMake version:|cmake version)\s+(\d+(?:\.\d+)*(?:-[\w.]+)?)\s*$").unwrap()
});
static BUILD_FILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--\s+Build files have been written to:\s+(.+?)\s*$").unwrap()
});
static BUILD_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s+Build type:\s+(\w+)\s*$").unwrap());
static SYSTEM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s+System:\s+(\S+)\s*$").unwrap());
static SYSTEM_PROCESSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s+Processor:\s+(\S+)\s*$").unwrap());
static FOUND_PACKAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--\s+Found\s+([\w.+-]+):").unwrap());

/// Generator, compilers and cmake version used by a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    pub generator: String,
    /// `<Id> <Version>`, e.g. `GNU 11.4.0`
    pub compiler_c: String,
    pub compiler_cxx: String,
    pub tool_version: String,
    pub build_files_dir: Option<String>,
    pub build_type: Option<String>,
    pub found_packages: Vec<String>,
    pub system_name: Option<String>,
    pub system_processor: Option<String>,
}

impl Default for ToolchainInfo {
    fn default() -> Self {
        Self {
            generator: UNKNOWN.to_string(),
            compiler_c: UNKNOWN.to_string(),
            compiler_cxx: UNKNOWN.to_string(),
            tool_version: UNKNOWN.to_string(),
            build_files_dir: None,
            build_type: None,
            found_packages: Vec::new(),
            system_name: None,
            system_processor: None,
        }
    }
}

impl ToolchainInfo {
    /// Dialect hint for the classifier, taken from the C++ compiler id, else the C one
    pub fn dialect_hint(&self) -> Option<Dialect> {
        [&self.compiler_cxx, &self.compiler_c]
            .into_iter()
            .filter(|c| c.as_str() != UNKNOWN)
            .find_map(|c| c.split_whitespace().next().and_then(Dialect::from_compiler_id))
    }
}

/// Scan configure output for toolchain markers
pub fn detect(configure_output: &str) -> ToolchainInfo {
    ToolchainInfo {
        generator: single_value(&GENERATOR, configure_output, |c| c[1].to_string()),
        compiler_c: single_value(&C_COMPILER, configure_output, compiler_label),
        compiler_cxx: single_value(&CXX_COMPILER, configure_output, compiler_label),
        tool_version: single_value(&TOOL_VERSION, configure_output, |c| c[1].to_string()),
        build_files_dir: optional_value(&BUILD_FILES, configure_output),
        build_type: optional_value(&BUILD_TYPE, configure_output),
        found_packages: found_packages(configure_output),
        system_name: optional_value(&SYSTEM_NAME, configure_output),
        system_processor: optional_value(&SYSTEM_PROCESSOR, configure_output),
    }
}

fn compiler_label(caps: &regex::Captures<'_>) -> String {
    match caps.get(2) {
        Some(version) => format!("{} {}", &caps[1], version.as_str()),
        None => caps[1].to_string(),
    }
}

/// The value every match agrees on, or `UNKNOWN` when absent or conflicting
fn single_value<F>(re: &Regex, text: &str, extract: F) -> String
where
    F: Fn(&regex::Captures<'_>) -> String,
{
    let mut found: Option<String> = None;
    for caps in re.captures_iter(text) {
        let value = extract(&caps);
        match &found {
            None => found = Some(value),
            Some(existing) if *existing == value => {}
            Some(_) => return UNKNOWN.to_string(),
        }
    }
    found.unwrap_or_else(|| UNKNOWN.to_string())
}

fn optional_value(re: &Regex, text: &str) -> Option<String> {
    match single_value(re, text, |c| c[1].to_string()) {
        v if v == UNKNOWN => None,
        v => Some(v),
    }
}

/// Unique package names in first-seen order
fn found_packages(text: &str) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for caps in FOUND_PACKAGE.captures_iter(text) {
        let name = &caps[1];
        if !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    }
    packages
}

/// Parse `cmake --version` output
pub fn parse_version_output(output: &str) -> Option<String> {
    TOOL_VERSION
        .captures(output)
        .map(|c| c[1].to_string())
}

/// Compare dotted versions numerically, ignoring any `-suffix`
///
/// Missing components count as zero, so `3.20` equals `3.20.0`. `None` when
/// either side is not a version.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let a = version_parts(a)?;
    let b = version_parts(b)?;
    let len = a.len().max(b.len());
    let component = |parts: &[u64], i: usize| parts.get(i).copied().unwrap_or(0);
    Some(
        (0..len)
            .map(|i| component(&a, i).cmp(&component(&b, i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal),
    )
}

/// `installed >= required`; false when either cannot be parsed
pub fn meets_minimum_version(installed: &str, required: &str) -> bool {
    matches!(
        compare_versions(installed, required),
        Some(Ordering::Greater | Ordering::Equal)
    )
}

fn version_parts(version: &str) -> Option<Vec<u64>> {
    let core = version.trim().split('-').next()?;
    core.split('.').map(|p| p.parse().ok()).collect()
}

/// Read `KEY:TYPE=value` from `<build_dir>/CMakeCache.txt`
pub fn read_cache_value(build_dir: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(build_dir.join("CMakeCache.txt")).ok()?;
    content.lines().find_map(|line| {
        let (name, value) = line.split_once('=')?;
        let (name, _ty) = name.split_once(':')?;
        (name == key && !value.trim().is_empty()).then(|| value.trim().to_string())
    })
}
