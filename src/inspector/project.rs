use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::toolchain::read_cache_value;

static PROJECT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bproject\s*\(\s*(?:"([^"]+)"|'([^']+)'|([^\s)]+))"#).unwrap()
});

/// Name from the first `project()` call in a CMakeLists.txt
pub fn detect_project_name(cmakelists: &Path) -> Option<String> {
    let content = std::fs::read_to_string(cmakelists).ok()?;
    let stripped: String = content
        .lines()
        .map(strip_comment)
        .collect::<Vec<_>>()
        .join("\n");

    let caps = PROJECT_CALL.captures(&stripped)?;
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// `line` up to a `#` that is not inside a quoted argument
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Name recorded by a previous configure of `build_dir`
pub fn project_from_cache(build_dir: &Path) -> Option<String> {
    read_cache_value(build_dir, "CMAKE_PROJECT_NAME")
}
