//! Configure/build orchestration
//!
//! [`BuildInspector`] drives one configure and/or build invocation through
//! [`InspectorState`], runs the tool via [`ProcessExecutor`], and persists a
//! record before reporting any failure so a caller can always query what
//! happened.

mod collector;
mod command;
mod project;
mod state;
mod targets;

pub use collector::{BuildObserver, Collected};
pub use command::{BuildParams, ConfigureParams};
pub use project::{detect_project_name, project_from_cache};
pub use state::InspectorState;
pub use targets::TargetCollector;

use std::path::Path;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::classify::Dialect;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{CancelHandle, CommandSpec, ExecutionResult, NullObserver, ProcessExecutor};
use crate::records::{BuildRecord, ConfigurationRecord, UNKNOWN};
use crate::storage::BuildStore;
use crate::toolchain::{self, ToolchainInfo};

pub struct BuildInspector {
    store: BuildStore,
    executor: ProcessExecutor,
    cmake: String,
    dedup: bool,
    state: InspectorState,
    hint: Option<Dialect>,
    project_name: Option<String>,
}

impl BuildInspector {
    pub fn new(store: BuildStore, executor: ProcessExecutor) -> Self {
        Self {
            store,
            executor,
            cmake: "cmake".to_string(),
            dedup: false,
            state: InspectorState::Idle,
            hint: None,
            project_name: None,
        }
    }

    /// Inspector backed by the configured database and tool
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = BuildStore::open(&config.database_path, &config.store)?;
        info!(database = %store.path().display(), cmake = %config.cmake_command, "Inspector ready");
        Ok(Self::new(store, ProcessExecutor::new(config.echo_output))
            .with_cmake(config.cmake_command.clone())
            .with_dedup(config.deduplicate_diagnostics))
    }

    pub fn with_cmake(mut self, program: impl Into<String>) -> Self {
        self.cmake = program.into();
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn state(&self) -> InspectorState {
        self.state
    }

    pub fn store(&self) -> &BuildStore {
        &self.store
    }

    /// Kills the running tool; the partial record is still persisted
    pub fn cancel_handle(&self) -> CancelHandle {
        self.executor.cancel_handle()
    }

    /// Back to `Idle` for another invocation
    ///
    /// Also recovers an inspector whose run future was dropped mid-step.
    pub fn reset(&mut self) {
        if self.state != InspectorState::Idle && !self.state.is_terminal() {
            warn!(state = %self.state, "Resetting an unfinished invocation");
        }
        self.state = InspectorState::Idle;
        self.hint = None;
        self.project_name = None;
    }

    /// Run the configure step and persist its record
    ///
    /// On a non-zero exit the record is saved with `success = false` and
    /// returned inside [`Error::ConfigurationFailed`].
    pub async fn run_configure(&mut self, params: &ConfigureParams) -> Result<ConfigurationRecord> {
        let previous = self.state;
        self.state = previous.begin_configure()?;

        let args = params.command_args();
        let spec = CommandSpec::new(&self.cmake).args(args.iter().cloned());
        info!(command = %spec.display(), "Configuring");

        let result = match self.executor.execute(&spec, Arc::new(NullObserver)).await {
            Ok(result) => result,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };

        let toolchain = self.resolve_toolchain(&result, params).await;
        let project_name = detect_project_name(&params.source_dir.join("CMakeLists.txt"))
            .or_else(|| project_from_cache(&params.build_dir))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let build_type = params
            .effective_build_type()
            .or_else(|| toolchain.build_type.clone())
            .or_else(|| toolchain::read_cache_value(&params.build_dir, "CMAKE_BUILD_TYPE"));

        let mut record = ConfigurationRecord {
            id: None,
            timestamp: result.started_at,
            project_name,
            source_dir: params.source_dir.display().to_string(),
            build_dir: params.build_dir.display().to_string(),
            cmake_version: toolchain.tool_version.clone(),
            generator: toolchain.generator.clone(),
            compiler_c: toolchain.compiler_c.clone(),
            compiler_cxx: toolchain.compiler_cxx.clone(),
            build_type,
            cmake_args: params.cmake_args.clone(),
            duration_secs: result.duration.as_secs_f64(),
            exit_code: result.exit_code,
            success: result.success(),
            stdout: result.stdout_text,
            stderr: result.stderr_text,
            found_packages: toolchain.found_packages.clone(),
            build_files_dir: toolchain.build_files_dir.clone(),
            system_name: toolchain.system_name.clone(),
            system_processor: toolchain.system_processor.clone(),
        };

        let store = &mut self.store;
        let id = match blocking(|| store.save_configuration(&record)) {
            Ok(id) => id,
            Err(e) => {
                self.state = InspectorState::Failed;
                return Err(e.into());
            }
        };
        record.id = Some(id);

        info!(
            configuration_id = id,
            exit_code = record.exit_code,
            generator = %record.generator,
            compiler = %record.compiler_cxx,
            "Configure finished"
        );

        if record.success {
            self.state = InspectorState::Configured { configuration_id: id };
            self.hint = toolchain.dialect_hint();
            self.project_name = Some(record.project_name.clone());
            Ok(record)
        } else {
            self.state = InspectorState::Failed;
            Err(Error::ConfigurationFailed(Box::new(record)))
        }
    }

    /// Run the build step, classifying output as it streams, and persist the record
    ///
    /// Allowed from `Idle` (an existing build directory) or after a
    /// successful configure. A non-zero exit or an interrupt still persists
    /// everything gathered and is returned inside [`Error::BuildFailed`].
    pub async fn run_build(&mut self, params: &BuildParams) -> Result<BuildRecord> {
        let previous = self.state;
        let configuration_id = previous.begin_build()?;
        self.state = InspectorState::Building;

        let hint = self.hint.or_else(|| cached_dialect_hint(&params.build_dir));
        let project_name = self
            .project_name
            .clone()
            .or_else(|| project_from_cache(&params.build_dir))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let args = params.command_args();
        let spec = CommandSpec::new(&self.cmake).args(args.iter().cloned());
        info!(command = %spec.display(), hint = ?hint, "Building");

        let observer = Arc::new(BuildObserver::new(hint, self.dedup));
        let result = match self.executor.execute(&spec, observer.clone()).await {
            Ok(result) => result,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        let collected = observer.take();

        if result.interrupted {
            warn!("Build interrupted, saving partial results");
        }

        let mut record = BuildRecord {
            id: None,
            configuration_id,
            timestamp: result.started_at,
            project_name,
            build_dir: params.build_dir.display().to_string(),
            build_args: args,
            duration_secs: result.duration.as_secs_f64(),
            exit_code: result.exit_code,
            success: result.success(),
            parallel_jobs: params.parallel_jobs,
            files_compiled: collected.files_compiled,
            stdout: result.stdout_text,
            stderr: result.stderr_text,
            warnings: collected.warnings,
            errors: collected.errors,
            targets_built: collected.targets,
        };

        let store = &mut self.store;
        let id = match blocking(|| store.save_build(&record)) {
            Ok(id) => id,
            Err(e) => {
                self.state = InspectorState::Failed;
                return Err(e.into());
            }
        };
        record.id = Some(id);

        info!(
            build_id = id,
            exit_code = record.exit_code,
            warnings = record.warnings_count(),
            errors = record.errors_count(),
            targets = record.targets_built.len(),
            "Build finished"
        );

        if record.success {
            self.state = InspectorState::Complete;
            Ok(record)
        } else {
            self.state = InspectorState::Failed;
            Err(Error::BuildFailed(Box::new(record)))
        }
    }

    /// Configure then build; the build is skipped when configure fails
    pub async fn run(
        &mut self,
        configure: &ConfigureParams,
        build: &BuildParams,
    ) -> Result<(ConfigurationRecord, BuildRecord)> {
        let configuration = self.run_configure(configure).await?;
        let build = self.run_build(build).await?;
        Ok((configuration, build))
    }

    /// Version reported by `<cmake> --version`
    pub async fn tool_version(&self) -> Option<String> {
        self.probe_tool_version().await
    }

    /// Whether the installed cmake is at least `required`
    ///
    /// False when the version cannot be determined.
    pub async fn check_minimum_version(&self, required: &str) -> bool {
        match self.probe_tool_version().await {
            Some(installed) => toolchain::meets_minimum_version(&installed, required),
            None => false,
        }
    }

    async fn resolve_toolchain(
        &self,
        result: &ExecutionResult,
        params: &ConfigureParams,
    ) -> ToolchainInfo {
        let output = format!("{}\n{}", result.stdout_text, result.stderr_text);
        let mut info = toolchain::detect(&output);

        if info.generator == UNKNOWN {
            if let Some(generator) = params
                .generator
                .clone()
                .or_else(|| toolchain::read_cache_value(&params.build_dir, "CMAKE_GENERATOR"))
            {
                info.generator = generator;
            }
        }

        if info.tool_version == UNKNOWN {
            if let Some(version) = self.probe_tool_version().await {
                info.tool_version = version;
            }
        }

        debug!(?info, "Resolved toolchain");
        info
    }

    /// `<cmake> --version`, silently
    async fn probe_tool_version(&self) -> Option<String> {
        let output = tokio::process::Command::new(&self.cmake)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        toolchain::parse_version_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Run a store write off the async worker when the runtime allows it
///
/// The write may sleep in SQLite's busy handler or between retries.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Dialect from the compiler recorded in an existing build directory
fn cached_dialect_hint(build_dir: &Path) -> Option<Dialect> {
    ["CMAKE_CXX_COMPILER_ID", "CMAKE_C_COMPILER_ID"]
        .into_iter()
        .filter_map(|key| toolchain::read_cache_value(build_dir, key))
        .find_map(|id| Dialect::from_compiler_id(&id))
}
