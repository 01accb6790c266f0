//! Persisted record types for configure and build invocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::Dialect;

/// Sentinel stored when a value could not be detected
pub const UNKNOWN: &str = "unknown";

/// Severity of a classified diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Warning,
    Error,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Error => "error",
        }
    }

    /// Parse the keyword used by compilers and cmake ("warning", "Error", ...)
    pub fn from_keyword(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        if lower.contains("error") {
            Some(DiagnosticKind::Error)
        } else if lower.contains("warning") {
            Some(DiagnosticKind::Warning)
        } else {
            None
        }
    }
}

/// A warning or error extracted from build tool output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Source file, absent for tool-level messages like `ld: warning: ...`
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    /// Compiler specific code: `-W` flag name or MSVC code such as `C2065`
    pub code: Option<String>,
    /// Dialect whose rule matched the line
    pub dialect: Dialect,
}

/// Kind of artifact a target produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Executable,
    StaticLibrary,
    SharedLibrary,
    ModuleLibrary,
    Utility,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Executable => "executable",
            TargetType::StaticLibrary => "static_library",
            TargetType::SharedLibrary => "shared_library",
            TargetType::ModuleLibrary => "module_library",
            TargetType::Utility => "utility",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "executable" => TargetType::Executable,
            "static_library" => TargetType::StaticLibrary,
            "shared_library" => TargetType::SharedLibrary,
            "module_library" => TargetType::ModuleLibrary,
            _ => TargetType::Utility,
        }
    }

    /// Map the phrase cmake prints after `Linking <LANG>`
    pub fn from_link_phrase(phrase: &str) -> Self {
        match phrase {
            "executable" => TargetType::Executable,
            "static library" => TargetType::StaticLibrary,
            "shared library" => TargetType::SharedLibrary,
            "shared module" => TargetType::ModuleLibrary,
            _ => TargetType::Utility,
        }
    }

    /// Guess from an artifact file name (MSBuild `proj -> path` lines)
    pub fn from_artifact(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".exe") {
            TargetType::Executable
        } else if lower.ends_with(".lib") || lower.ends_with(".a") {
            TargetType::StaticLibrary
        } else if lower.ends_with(".dll") || lower.ends_with(".so") || lower.ends_with(".dylib") {
            TargetType::SharedLibrary
        } else {
            TargetType::Utility
        }
    }
}

/// A target reported as completed by the build tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub name: String,
    pub target_type: TargetType,
    /// 1-based position in the order the tool reported completion
    pub build_order: u32,
    /// `n` of a Ninja `[n/N]` prefix
    pub completion_step: Option<u32>,
    /// `N` of a Ninja `[n/N]` prefix
    pub total_steps: Option<u32>,
}

/// One configure invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    /// Row id, set once the record is persisted
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub source_dir: String,
    pub build_dir: String,
    pub cmake_version: String,
    pub generator: String,
    pub compiler_c: String,
    pub compiler_cxx: String,
    pub build_type: Option<String>,
    pub cmake_args: Vec<String>,
    pub duration_secs: f64,
    pub exit_code: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub found_packages: Vec<String>,
    pub build_files_dir: Option<String>,
    /// `-- System:` value, e.g. `Linux`
    pub system_name: Option<String>,
    /// `-- Processor:` value, e.g. `x86_64`
    pub system_processor: Option<String>,
}

/// One build invocation with everything extracted from its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Row id, set once the record is persisted
    pub id: Option<i64>,
    /// Configuration this build ran against, if it was configured in the same invocation
    pub configuration_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub build_dir: String,
    pub build_args: Vec<String>,
    pub duration_secs: f64,
    pub exit_code: i32,
    pub success: bool,
    pub parallel_jobs: Option<u32>,
    pub files_compiled: u32,
    pub stdout: String,
    pub stderr: String,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    /// Completion order as reported by the tool
    pub targets_built: Vec<BuildTarget>,
}

impl BuildRecord {
    pub fn warnings_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn errors_count(&self) -> usize {
        self.errors.len()
    }
}

/// Aggregates over the `builds` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Percentage in 0..=100
    pub success_rate: f64,
    pub avg_duration_secs: f64,
    pub total_warnings: u64,
    pub total_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_kind_from_keyword() {
        assert_eq!(DiagnosticKind::from_keyword("warning"), Some(DiagnosticKind::Warning));
        assert_eq!(DiagnosticKind::from_keyword("Error"), Some(DiagnosticKind::Error));
        assert_eq!(
            DiagnosticKind::from_keyword("Deprecation Warning"),
            Some(DiagnosticKind::Warning)
        );
        assert_eq!(DiagnosticKind::from_keyword("note"), None);
    }

    #[test]
    fn test_target_type_from_artifact() {
        assert_eq!(TargetType::from_artifact("myapp.exe"), TargetType::Executable);
        assert_eq!(TargetType::from_artifact("mylib.lib"), TargetType::StaticLibrary);
        assert_eq!(TargetType::from_artifact("shared.DLL"), TargetType::SharedLibrary);
        assert_eq!(TargetType::from_artifact("docs"), TargetType::Utility);
    }

    #[test]
    fn test_target_type_string_mapping() {
        for t in [
            TargetType::Executable,
            TargetType::StaticLibrary,
            TargetType::SharedLibrary,
            TargetType::ModuleLibrary,
            TargetType::Utility,
        ] {
            assert_eq!(TargetType::from_str(t.as_str()), t);
        }
    }
}
