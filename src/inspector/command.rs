//! Command lines for the configure and build steps

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const BUILD_TYPE_VAR: &str = "CMAKE_BUILD_TYPE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureParams {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub generator: Option<String>,
    pub build_type: Option<String>,
    /// Passed through verbatim after the generated arguments
    pub cmake_args: Vec<String>,
}

impl ConfigureParams {
    pub fn new(source_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            build_dir: build_dir.into(),
            generator: None,
            build_type: None,
            cmake_args: Vec::new(),
        }
    }

    /// Build type cmake will actually use; a `-DCMAKE_BUILD_TYPE` in the
    /// pass-through arguments wins over `build_type`
    pub fn effective_build_type(&self) -> Option<String> {
        explicit_build_type(&self.cmake_args).or_else(|| self.build_type.clone())
    }

    /// Arguments after the cmake executable
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.source_dir.display().to_string(),
            "-B".to_string(),
            self.build_dir.display().to_string(),
        ];
        if let Some(generator) = &self.generator {
            args.push("-G".to_string());
            args.push(generator.clone());
        }
        if explicit_build_type(&self.cmake_args).is_none() {
            if let Some(build_type) = &self.build_type {
                args.push(format!("-D{}={}", BUILD_TYPE_VAR, build_type));
            }
        }
        args.extend(self.cmake_args.iter().cloned());
        args
    }
}

/// Last `CMAKE_BUILD_TYPE` definition, in `-DVAR=x`, `-DVAR:TYPE=x` or `-D VAR=x` form
fn explicit_build_type(args: &[String]) -> Option<String> {
    let mut found = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let definition = match arg.strip_prefix("-D") {
            Some("") => iter.next().map(String::as_str),
            Some(rest) => Some(rest),
            None => None,
        };
        if let Some((name, value)) = definition.and_then(|d| d.split_once('=')) {
            let var = name.split(':').next().unwrap_or(name);
            if var == BUILD_TYPE_VAR {
                found = Some(value.to_string());
            }
        }
    }
    found
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    pub build_dir: PathBuf,
    pub targets: Vec<String>,
    pub parallel_jobs: Option<u32>,
}

impl BuildParams {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            targets: Vec::new(),
            parallel_jobs: None,
        }
    }

    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec!["--build".to_string(), self.build_dir.display().to_string()];
        for target in &self.targets {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        if let Some(jobs) = self.parallel_jobs {
            args.push("--parallel".to_string());
            args.push(jobs.to_string());
        }
        args
    }
}
