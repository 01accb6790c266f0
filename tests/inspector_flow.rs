//! End-to-end runs of BuildInspector against a scripted stand-in for cmake

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use forge::executor::ProcessExecutor;
use forge::{
    BuildInspector, BuildParams, BuildStore, ConfigureParams, DiagnosticKind, Error,
    InspectorState, StoreConfig, TargetType, UNKNOWN,
};
use tempfile::TempDir;

const CONFIGURE_OUTPUT: &str = r#"echo "-- System: Linux"
echo "-- Processor: x86_64"
echo "-- The C compiler identification is GNU 11.4.0"
echo "-- The CXX compiler identification is GNU 11.4.0"
echo "-- Found ZLIB: /usr/lib/libz.so (found version \"1.2.11\")"
echo "-- Configuring done (0.2s)"
echo "-- Generating done (0.0s)"
echo "-- Build files have been written to: $BUILD_DIR""#;

const BUILD_OUTPUT: &str = r#"echo "[1/4] Building CXX object CMakeFiles/core.dir/core.cpp.o"
echo "core.cpp:10:5: warning: unused variable 'x' [-Wunused-variable]" >&2
echo "    int x = 5;" >&2
echo "        ^" >&2
echo "[2/4] Linking CXX static library libcore.a"
echo "[3/4] Building CXX object CMakeFiles/app.dir/main.cpp.o"
echo "[4/4] Linking CXX executable app""#;

struct Fixture {
    dir: TempDir,
    cmake: PathBuf,
    db: PathBuf,
}

impl Fixture {
    fn new(configure: &str, configure_exit: i32, build: &str, build_exit: i32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(
            source.join("CMakeLists.txt"),
            "cmake_minimum_required(VERSION 3.20)\nproject(demo VERSION 1.0 LANGUAGES CXX)\n",
        )
        .unwrap();

        let marker = dir.path().join("build-invoked");
        let script = format!(
            "#!/bin/sh\n\
             BUILD_DIR=\"$4\"\n\
             case \"$1\" in\n\
             --version)\n  echo \"cmake version 3.28.1\"\n  exit 0 ;;\n\
             --build)\n  touch \"{marker}\"\n{build}\n  exit {build_exit} ;;\n\
             *)\n{configure}\n  exit {configure_exit} ;;\n\
             esac\n",
            marker = marker.display(),
        );
        let cmake = dir.path().join("fake-cmake");
        std::fs::write(&cmake, script).unwrap();
        std::fs::set_permissions(&cmake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let db = dir.path().join("forge.db");
        Self { dir, cmake, db }
    }

    fn source_dir(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    fn build_dir(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    fn build_invoked(&self) -> bool {
        self.dir.path().join("build-invoked").exists()
    }

    fn inspector(&self) -> BuildInspector {
        let store = BuildStore::open(&self.db, &StoreConfig::default()).unwrap();
        BuildInspector::new(store, ProcessExecutor::new(false))
            .with_cmake(self.cmake.display().to_string())
    }

    fn configure_params(&self) -> ConfigureParams {
        ConfigureParams {
            generator: Some("Ninja".to_string()),
            build_type: Some("Debug".to_string()),
            cmake_args: vec!["-DFOO=ON".to_string()],
            ..ConfigureParams::new(self.source_dir(), self.build_dir())
        }
    }

    fn build_params(&self) -> BuildParams {
        BuildParams {
            parallel_jobs: Some(4),
            ..BuildParams::new(self.build_dir())
        }
    }
}

fn write_cache(build_dir: &Path, content: &str) {
    std::fs::create_dir_all(build_dir).unwrap();
    std::fs::write(build_dir.join("CMakeCache.txt"), content).unwrap();
}

#[tokio::test]
async fn test_configure_and_build_are_recorded() {
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, BUILD_OUTPUT, 0);
    let mut inspector = fx.inspector();

    let (configuration, build) = inspector
        .run(&fx.configure_params(), &fx.build_params())
        .await
        .unwrap();
    assert_eq!(inspector.state(), InspectorState::Complete);

    assert!(configuration.success);
    assert_eq!(configuration.project_name, "demo");
    assert_eq!(configuration.compiler_cxx, "GNU 11.4.0");
    assert_eq!(configuration.generator, "Ninja");
    assert_eq!(configuration.cmake_version, "3.28.1");
    assert_eq!(configuration.build_type.as_deref(), Some("Debug"));
    assert_eq!(configuration.cmake_args, vec!["-DFOO=ON"]);
    assert_eq!(configuration.found_packages, vec!["ZLIB"]);
    assert_eq!(configuration.system_name.as_deref(), Some("Linux"));
    assert_eq!(configuration.system_processor.as_deref(), Some("x86_64"));
    assert_eq!(
        configuration.build_files_dir.as_deref(),
        Some(fx.build_dir().display().to_string().as_str())
    );

    assert!(build.success);
    assert_eq!(build.configuration_id, configuration.id);
    assert_eq!(build.project_name, "demo");
    assert_eq!(build.parallel_jobs, Some(4));
    assert_eq!(build.files_compiled, 2);
    assert_eq!(build.warnings_count(), 1);
    assert_eq!(build.errors_count(), 0);
    let warning = &build.warnings[0];
    assert_eq!(warning.kind, DiagnosticKind::Warning);
    assert_eq!(warning.file.as_deref(), Some("core.cpp"));
    assert_eq!(warning.code.as_deref(), Some("unused-variable"));

    let names: Vec<_> = build.targets_built.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["libcore.a", "app"]);
    assert_eq!(build.targets_built[0].target_type, TargetType::StaticLibrary);
    assert_eq!(build.targets_built[1].completion_step, Some(4));

    let store = inspector.store();
    let stored_build = store.get_build_by_id(build.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored_build, build);
    let stored_config = store
        .get_configuration_by_id(configuration.id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(stored_config, configuration);
}

#[tokio::test]
async fn test_failed_configure_skips_build() {
    let configure = r#"echo "CMake Error at CMakeLists.txt:2 (project):" >&2
echo "  No CMAKE_CXX_COMPILER could be found." >&2"#;
    let fx = Fixture::new(configure, 1, BUILD_OUTPUT, 0);
    let mut inspector = fx.inspector();

    let err = inspector
        .run(&fx.configure_params(), &fx.build_params())
        .await
        .unwrap_err();

    let record = match err {
        Error::ConfigurationFailed(record) => record,
        other => panic!("unexpected error: {:?}", other),
    };
    assert!(!record.success);
    assert_eq!(record.exit_code, 1);
    assert_eq!(record.compiler_cxx, UNKNOWN);
    assert!(record.stderr.contains("No CMAKE_CXX_COMPILER"));
    assert_eq!(inspector.state(), InspectorState::Failed);
    assert!(!fx.build_invoked());

    let store = inspector.store();
    let saved = store.get_configuration_by_id(record.id.unwrap()).unwrap().unwrap();
    assert!(!saved.success);
    assert!(store.get_recent_builds(10, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_build_keeps_partial_results() {
    let build = r#"echo "[1/2] Building CXX object CMakeFiles/app.dir/main.cpp.o"
echo "main.cpp:12:1: error: expected ';' before '}' token" >&2
echo "ninja: build stopped: subcommand failed.""#;
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, build, 1);
    let mut inspector = fx.inspector();

    inspector.run_configure(&fx.configure_params()).await.unwrap();
    let err = inspector.run_build(&fx.build_params()).await.unwrap_err();

    let record = match err {
        Error::BuildFailed(record) => record,
        other => panic!("unexpected error: {:?}", other),
    };
    assert!(!record.success);
    assert_eq!(record.exit_code, 1);
    assert_eq!(record.errors_count(), 1);
    assert_eq!(record.errors[0].line, Some(12));
    assert!(record.targets_built.is_empty());
    assert_eq!(inspector.state(), InspectorState::Failed);

    let stored = inspector.store().get_build_by_id(record.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored, *record);
    let stats = inspector.store().get_build_statistics(None).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_errors, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_build_keeps_partial_results() {
    let build = r#"echo "core.cpp:10:5: warning: unused variable 'x' [-Wunused-variable]" >&2
echo "[1/3] Linking CXX static library libcore.a"
exec sleep 30"#;
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, build, 0);
    let mut inspector = fx.inspector();

    let cancel = inspector.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        while !cancel.cancel() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    let err = inspector.run_build(&fx.build_params()).await.unwrap_err();
    let record = match err {
        Error::BuildFailed(record) => record,
        other => panic!("unexpected error: {:?}", other),
    };
    assert_eq!(record.exit_code, 130);
    assert!(!record.success);
    assert_eq!(inspector.state(), InspectorState::Failed);

    let stored = inspector.store().get_build_by_id(record.id.unwrap()).unwrap().unwrap();
    assert!(!stored.success);
    assert_eq!(stored.exit_code, 130);
    assert_eq!(stored.warnings.len(), 1);
    assert_eq!(stored.warnings[0].message, "unused variable 'x'");
    assert_eq!(stored.targets_built.len(), 1);
    assert_eq!(stored.targets_built[0].name, "libcore.a");
}

#[tokio::test]
async fn test_cancel_before_run_does_not_interrupt() {
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, BUILD_OUTPUT, 0);
    let mut inspector = fx.inspector();
    assert!(!inspector.cancel_handle().cancel());

    let record = inspector.run_build(&fx.build_params()).await.unwrap();
    assert!(record.success);
    assert_eq!(record.exit_code, 0);
}

#[tokio::test]
async fn test_minimum_version_check() {
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, BUILD_OUTPUT, 0);
    let inspector = fx.inspector();
    assert_eq!(inspector.tool_version().await.as_deref(), Some("3.28.1"));
    assert!(inspector.check_minimum_version("3.20").await);
    assert!(inspector.check_minimum_version("3.28.1").await);
    assert!(!inspector.check_minimum_version("3.30").await);
}

#[tokio::test]
async fn test_build_only_uses_existing_build_dir() {
    let build = r#"echo "foo.cpp(12): error C2065: 'bar': undeclared identifier"
printf '%s\n' '  app.vcxproj -> C:\build\Debug\app.exe'"#;
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, build, 0);
    write_cache(
        &fx.build_dir(),
        "CMAKE_PROJECT_NAME:STATIC=cached-project\nCMAKE_CXX_COMPILER_ID:STRING=MSVC\n",
    );
    let mut inspector = fx.inspector();

    let record = inspector.run_build(&BuildParams::new(fx.build_dir())).await.unwrap();
    assert_eq!(record.configuration_id, None);
    assert_eq!(record.project_name, "cached-project");
    // Diagnostics never override the exit code
    assert!(record.success);
    assert_eq!(record.errors_count(), 1);
    assert!(record.errors[0].message.contains("C2065"));
    assert_eq!(record.targets_built.len(), 1);
    assert_eq!(record.targets_built[0].target_type, TargetType::Executable);
}

#[tokio::test]
async fn test_empty_output() {
    let fx = Fixture::new(":", 0, ":", 0);
    let mut inspector = fx.inspector();

    let (configuration, build) = inspector
        .run(
            &ConfigureParams::new(fx.source_dir(), fx.build_dir()),
            &BuildParams::new(fx.build_dir()),
        )
        .await
        .unwrap();

    assert_eq!(configuration.compiler_c, UNKNOWN);
    assert_eq!(configuration.generator, UNKNOWN);
    // Probed through `--version` when configure output lacks it
    assert_eq!(configuration.cmake_version, "3.28.1");
    assert!(build.success);
    assert!(build.warnings.is_empty());
    assert!(build.errors.is_empty());
    assert!(build.targets_built.is_empty());
    assert_eq!(build.stdout, "");
}

#[tokio::test]
async fn test_recent_builds_are_stable() {
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, BUILD_OUTPUT, 0);
    let mut inspector = fx.inspector();
    for _ in 0..3 {
        inspector.run_build(&fx.build_params()).await.unwrap();
        inspector.reset();
    }

    let first = inspector.store().get_recent_builds(2, None).unwrap();
    let second = inspector.store().get_recent_builds(2, None).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert!(first[0].timestamp >= first[1].timestamp);
}

#[test]
fn test_concurrent_inspectors_share_one_store() {
    let fx = Fixture::new(CONFIGURE_OUTPUT, 0, BUILD_OUTPUT, 0);
    BuildStore::open(&fx.db, &StoreConfig::default()).unwrap();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let mut inspector = fx.inspector();
            let params = fx.build_params();
            std::thread::spawn(move || {
                let runtime = tokio::runtime::Runtime::new().unwrap();
                runtime.block_on(async {
                    let mut ids = Vec::new();
                    for _ in 0..5 {
                        let record = inspector.run_build(&params).await.unwrap();
                        ids.push(record.id.unwrap());
                        inspector.reset();
                    }
                    ids
                })
            })
        })
        .collect();

    let mut ids: Vec<i64> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);

    let store = BuildStore::open(&fx.db, &StoreConfig::default()).unwrap();
    let stats = store.get_build_statistics(None).unwrap();
    assert_eq!(stats.total, 10);
    assert_eq!(stats.total_warnings, 10);
    for id in ids {
        assert_eq!(store.get_targets(id).unwrap().len(), 2);
    }
}
