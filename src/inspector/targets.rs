//! Built-target extraction from generator progress lines

use regex::Regex;
use std::sync::LazyLock;

use crate::classify::strip_ansi;
use crate::records::{BuildTarget, TargetType};

/// Ninja `[n/N]` or Make `[ p%]` followed by a cmake link step
static LINKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:\[(?P<step>\d+)/(?P<total>\d+)\]|\[\s*\d+%\])\s+Linking\s+\S+\s+(?P<kind>executable|static library|shared library|shared module)\s+(?P<name>\S+)",
    )
    .unwrap()
});

static BUILT_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[\s*\d+%\]\s+)?Built target\s+(?P<name>\S+)\s*$").unwrap()
});

static MSBUILD_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\S+\.vcxproj\s+->\s+(?P<path>.+?)\s*$").unwrap()
});

static COMPILE_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Building \w+ object\s+\S+").unwrap());

/// Accumulates targets in the order the build tool completes them
#[derive(Debug, Default)]
pub struct TargetCollector {
    targets: Vec<BuildTarget>,
    files_compiled: u32,
}

impl TargetCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &str) {
        let clean = strip_ansi(line);
        let line = clean.as_ref();

        if COMPILE_STEP.is_match(line) {
            self.files_compiled += 1;
            return;
        }

        if let Some(caps) = LINKING.captures(line) {
            self.push(
                file_name(&caps["name"]).to_string(),
                TargetType::from_link_phrase(&caps["kind"]),
                caps.name("step").and_then(|m| m.as_str().parse().ok()),
                caps.name("total").and_then(|m| m.as_str().parse().ok()),
            );
            return;
        }

        if let Some(caps) = BUILT_TARGET.captures(line) {
            let name = &caps["name"];
            // Make prints this after the Linking line for the same target
            if !self.targets.iter().any(|t| artifact_stem(&t.name) == name) {
                self.push(name.to_string(), TargetType::Utility, None, None);
            }
            return;
        }

        if let Some(caps) = MSBUILD_OUTPUT.captures(line) {
            let name = file_name(&caps["path"]).to_string();
            let target_type = TargetType::from_artifact(&name);
            self.push(name, target_type, None, None);
        }
    }

    fn push(
        &mut self,
        name: String,
        target_type: TargetType,
        completion_step: Option<u32>,
        total_steps: Option<u32>,
    ) {
        let build_order = self.targets.len() as u32 + 1;
        self.targets.push(BuildTarget {
            name,
            target_type,
            build_order,
            completion_step,
            total_steps,
        });
    }

    pub fn files_compiled(&self) -> u32 {
        self.files_compiled
    }

    pub fn into_targets(self) -> Vec<BuildTarget> {
        self.targets
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// `libfoo.so.1` -> `foo`, `app.exe` -> `app`
fn artifact_stem(name: &str) -> &str {
    let base = name.strip_prefix("lib").filter(|s| !s.is_empty()).unwrap_or(name);
    base.split('.').next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(output: &str) -> TargetCollector {
        let mut collector = TargetCollector::new();
        for line in output.lines() {
            collector.observe(line);
        }
        collector
    }

    #[test]
    fn test_ninja_targets_with_steps() {
        let collector = collect(
            "[1/20] Building CXX object src/CMakeFiles/utils.dir/utils.cpp.o\n\
             [5/20] Linking CXX static library libutils.a\n\
             [6/20] Building CXX object CMakeFiles/myapp.dir/main.cpp.o\n\
             [20/20] Linking CXX executable bin/myapp",
        );
        assert_eq!(collector.files_compiled(), 2);
        let targets = collector.into_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "libutils.a");
        assert_eq!(targets[0].target_type, TargetType::StaticLibrary);
        assert_eq!(targets[0].completion_step, Some(5));
        assert_eq!(targets[0].total_steps, Some(20));
        assert_eq!(targets[1].name, "myapp");
        assert_eq!(targets[1].target_type, TargetType::Executable);
        assert_eq!(targets[1].build_order, 2);
    }

    #[test]
    fn test_make_linking_and_built_target_counted_once() {
        let targets = collect(
            "[ 80%] Linking CXX static library libmylib.a\n\
             [ 80%] Built target mylib\n\
             [ 90%] Linking CXX shared library libshared.so\n\
             [ 90%] Built target shared\n\
             [100%] Linking CXX executable myapp\n\
             [100%] Built target myapp",
        )
        .into_targets();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["libmylib.a", "libshared.so", "myapp"]);
        assert_eq!(targets[1].target_type, TargetType::SharedLibrary);
        assert_eq!(targets[2].completion_step, None);
    }

    #[test]
    fn test_make_built_target_only() {
        let targets = collect(
            "[ 33%] Built target utils\n[ 66%] Built target core\n[100%] Built target myapp",
        )
        .into_targets();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["utils", "core", "myapp"]);
        assert!(targets.iter().all(|t| t.target_type == TargetType::Utility));
        assert_eq!(targets[2].build_order, 3);
    }

    #[test]
    fn test_msbuild_outputs() {
        let targets = collect(
            "  utils.vcxproj -> C:\\build\\Debug\\utils.lib\n\
             \x20 shared.vcxproj -> C:\\build\\Debug\\shared.dll\n\
             \x20 myapp.vcxproj -> C:\\build\\Debug\\myapp.exe",
        )
        .into_targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].target_type, TargetType::StaticLibrary);
        assert_eq!(targets[1].target_type, TargetType::SharedLibrary);
        assert_eq!(targets[2].name, "myapp.exe");
        assert_eq!(targets[2].target_type, TargetType::Executable);
    }

    #[test]
    fn test_shared_module_and_dylib() {
        let targets = collect(
            "[3/4] Linking CXX shared module plugin.so\n[4/4] Linking CXX shared library libshared.dylib",
        )
        .into_targets();
        assert_eq!(targets[0].target_type, TargetType::ModuleLibrary);
        assert_eq!(targets[1].target_type, TargetType::SharedLibrary);
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let collector = collect(
            "main.cpp:10:5: warning: unused variable 'x'\n\
             ninja: build stopped: subcommand failed.\n\
             Linking is mentioned here without a progress prefix",
        );
        assert_eq!(collector.files_compiled(), 0);
        assert!(collector.into_targets().is_empty());
    }

    #[test]
    fn test_artifact_stem() {
        assert_eq!(artifact_stem("libfoo.a"), "foo");
        assert_eq!(artifact_stem("libshared.so.1"), "shared");
        assert_eq!(artifact_stem("app"), "app");
        assert_eq!(artifact_stem("lib"), "lib");
    }
}
