use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::schema::{CREATE_TABLES, PRAGMAS, SCHEMA_VERSION};
use super::{DatabaseError, DbResult, StoreConfig};
use crate::classify::Dialect;
use crate::records::{
    BuildRecord, BuildStatistics, BuildTarget, ConfigurationRecord, Diagnostic, DiagnosticKind,
    TargetType,
};

const CONFIGURATION_COLUMNS: &str = "id, timestamp, project_name, source_dir, build_dir, \
    cmake_version, generator, compiler_c, compiler_cxx, build_type, cmake_args, duration_secs, \
    exit_code, success, stdout, stderr, found_packages, build_files_dir, system_name, \
    system_processor";

const BUILD_COLUMNS: &str = "id, configuration_id, timestamp, project_name, build_dir, \
    build_args, duration_secs, exit_code, success, parallel_jobs, files_compiled, stdout, stderr";

/// Handle on the build history database
///
/// One connection per handle; open a separate store per thread or process.
pub struct BuildStore {
    conn: Connection,
    path: PathBuf,
    config: StoreConfig,
}

impl BuildStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        let store = Self {
            conn,
            path,
            config: config.clone(),
        };
        store.init()?;
        debug!(path = %store.path.display(), "Opened build store");
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
            config: StoreConfig::default(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self) -> DbResult<()> {
        self.conn
            .busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        self.conn.execute_batch(PRAGMAS)?;
        self.conn.execute_batch(CREATE_TABLES)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, Utc::now()],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> DbResult<i64> {
        let version: Option<i64> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    /// Run `op` in a `BEGIN IMMEDIATE` transaction, retrying on lock contention
    fn write<T, F>(&mut self, what: &str, mut op: F) -> DbResult<T>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match run_immediate(&mut self.conn, &mut op) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    if attempt >= self.config.max_retries {
                        warn!(what, attempts = attempt + 1, "Database still locked, giving up");
                        return Err(DatabaseError::Busy {
                            attempts: attempt + 1,
                            source: e,
                        });
                    }
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        "Database locked, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Insert a configuration record, returning its id
    pub fn save_configuration(&mut self, record: &ConfigurationRecord) -> DbResult<i64> {
        let cmake_args = serde_json::to_string(&record.cmake_args)?;
        let found_packages = serde_json::to_string(&record.found_packages)?;

        let id = self.write("save_configuration", |tx| {
            tx.execute(
                "INSERT INTO configurations (timestamp, project_name, source_dir, build_dir,
                    cmake_version, generator, compiler_c, compiler_cxx, build_type, cmake_args,
                    duration_secs, exit_code, success, stdout, stderr, found_packages,
                    build_files_dir, system_name, system_processor)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19)",
                params![
                    record.timestamp,
                    record.project_name,
                    record.source_dir,
                    record.build_dir,
                    record.cmake_version,
                    record.generator,
                    record.compiler_c,
                    record.compiler_cxx,
                    record.build_type,
                    cmake_args,
                    record.duration_secs,
                    record.exit_code,
                    record.success,
                    record.stdout,
                    record.stderr,
                    found_packages,
                    record.build_files_dir,
                    record.system_name,
                    record.system_processor,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        debug!(configuration_id = id, project = %record.project_name, "Saved configuration");
        Ok(id)
    }

    /// Insert a build with its diagnostics and targets in one transaction
    ///
    /// The stored counts are the lengths of the diagnostic lists.
    pub fn save_build(&mut self, record: &BuildRecord) -> DbResult<i64> {
        let build_args = serde_json::to_string(&record.build_args)?;

        let id = self.write("save_build", |tx| {
            tx.execute(
                "INSERT INTO builds (configuration_id, timestamp, project_name, build_dir,
                    build_args, duration_secs, exit_code, success, warnings_count, errors_count,
                    parallel_jobs, files_compiled, stdout, stderr)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.configuration_id,
                    record.timestamp,
                    record.project_name,
                    record.build_dir,
                    build_args,
                    record.duration_secs,
                    record.exit_code,
                    record.success,
                    record.warnings_count() as i64,
                    record.errors_count() as i64,
                    record.parallel_jobs,
                    record.files_compiled,
                    record.stdout,
                    record.stderr,
                ],
            )?;
            let build_id = tx.last_insert_rowid();

            insert_diagnostics(tx, "warnings", build_id, &record.warnings)?;
            insert_diagnostics(tx, "errors", build_id, &record.errors)?;

            let mut stmt = tx.prepare(
                "INSERT INTO build_targets (build_id, target_name, target_type, build_order,
                    completion_step, total_steps)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for target in &record.targets_built {
                stmt.execute(params![
                    build_id,
                    target.name,
                    target.target_type.as_str(),
                    target.build_order,
                    target.completion_step,
                    target.total_steps,
                ])?;
            }

            Ok(build_id)
        })?;

        debug!(
            build_id = id,
            warnings = record.warnings_count(),
            errors = record.errors_count(),
            targets = record.targets_built.len(),
            "Saved build"
        );
        Ok(id)
    }

    pub fn get_configuration_by_id(&self, id: i64) -> DbResult<Option<ConfigurationRecord>> {
        let sql = format!("SELECT {} FROM configurations WHERE id = ?1", CONFIGURATION_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], configuration_from_row)
            .optional()?)
    }

    pub fn get_recent_configurations(&self, limit: usize) -> DbResult<Vec<ConfigurationRecord>> {
        let sql = format!(
            "SELECT {} FROM configurations ORDER BY timestamp DESC, id DESC LIMIT ?1",
            CONFIGURATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], configuration_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Build with its diagnostics and targets
    pub fn get_build_by_id(&self, id: i64) -> DbResult<Option<BuildRecord>> {
        let sql = format!("SELECT {} FROM builds WHERE id = ?1", BUILD_COLUMNS);
        let build = self
            .conn
            .query_row(&sql, params![id], build_from_row)
            .optional()?;
        match build {
            Some(build) => Ok(Some(self.with_children(build)?)),
            None => Ok(None),
        }
    }

    /// Newest first, optionally for one project; equal timestamps fall back to insertion order
    pub fn get_recent_builds(
        &self,
        limit: usize,
        project: Option<&str>,
    ) -> DbResult<Vec<BuildRecord>> {
        let sql = format!(
            "SELECT {} FROM builds WHERE ?2 IS NULL OR project_name = ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
            BUILD_COLUMNS
        );
        self.query_builds(&sql, params![limit as i64, project])
    }

    /// Builds started at or after `since`, newest first
    pub fn get_builds_since(&self, since: DateTime<Utc>) -> DbResult<Vec<BuildRecord>> {
        let sql = format!(
            "SELECT {} FROM builds WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC",
            BUILD_COLUMNS
        );
        self.query_builds(&sql, params![since])
    }

    pub fn get_warnings(&self, build_id: i64) -> DbResult<Vec<Diagnostic>> {
        self.query_diagnostics("warnings", DiagnosticKind::Warning, build_id)
    }

    pub fn get_errors(&self, build_id: i64) -> DbResult<Vec<Diagnostic>> {
        self.query_diagnostics("errors", DiagnosticKind::Error, build_id)
    }

    /// Targets in the order the tool reported them
    pub fn get_targets(&self, build_id: i64) -> DbResult<Vec<BuildTarget>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_name, target_type, build_order, completion_step, total_steps
             FROM build_targets WHERE build_id = ?1 ORDER BY build_order, id",
        )?;
        let rows = stmt.query_map(params![build_id], |row| {
            let target_type: String = row.get(1)?;
            Ok(BuildTarget {
                name: row.get(0)?,
                target_type: TargetType::from_str(&target_type),
                build_order: row.get(2)?,
                completion_step: row.get(3)?,
                total_steps: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Aggregates over all builds, or over one project's builds
    pub fn get_build_statistics(&self, project: Option<&str>) -> DbResult<BuildStatistics> {
        let (total, successful, avg_duration, warnings, errors): (i64, i64, f64, i64, i64) =
            self.conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(success), 0),
                        COALESCE(AVG(duration_secs), 0.0),
                        COALESCE(SUM(warnings_count), 0),
                        COALESCE(SUM(errors_count), 0)
                 FROM builds
                 WHERE ?1 IS NULL OR project_name = ?1",
                params![project],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(BuildStatistics {
            total: total as u64,
            successful: successful as u64,
            failed: (total - successful) as u64,
            success_rate,
            avg_duration_secs: avg_duration,
            total_warnings: warnings as u64,
            total_errors: errors as u64,
        })
    }

    fn query_builds(&self, sql: &str, params: impl rusqlite::Params) -> DbResult<Vec<BuildRecord>> {
        let builds = {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt.query_map(params, build_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        builds
            .into_iter()
            .map(|build| self.with_children(build))
            .collect()
    }

    fn with_children(&self, mut build: BuildRecord) -> DbResult<BuildRecord> {
        if let Some(id) = build.id {
            build.warnings = self.get_warnings(id)?;
            build.errors = self.get_errors(id)?;
            build.targets_built = self.get_targets(id)?;
        }
        Ok(build)
    }

    fn query_diagnostics(
        &self,
        table: &str,
        kind: DiagnosticKind,
        build_id: i64,
    ) -> DbResult<Vec<Diagnostic>> {
        let sql = format!(
            "SELECT file, line_number, column_number, message, code, dialect
             FROM {} WHERE build_id = ?1 ORDER BY id",
            table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![build_id], |row| {
            let dialect: String = row.get(5)?;
            Ok(Diagnostic {
                kind,
                file: row.get(0)?,
                line: row.get(1)?,
                column: row.get(2)?,
                message: row.get(3)?,
                code: row.get(4)?,
                dialect: Dialect::from_str(&dialect).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        Type::Text,
                        format!("unknown dialect {:?}", dialect).into(),
                    )
                })?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn run_immediate<T, F>(conn: &mut Connection, op: &mut F) -> rusqlite::Result<T>
where
    F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = op(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn insert_diagnostics(
    tx: &Transaction<'_>,
    table: &str,
    build_id: i64,
    diagnostics: &[Diagnostic],
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} (build_id, file, line_number, column_number, message, code, dialect)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        table
    ))?;
    for d in diagnostics {
        stmt.execute(params![
            build_id,
            d.file,
            d.line,
            d.column,
            d.message,
            d.code,
            d.dialect.as_str(),
        ])?;
    }
    Ok(())
}

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn configuration_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigurationRecord> {
    Ok(ConfigurationRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        project_name: row.get(2)?,
        source_dir: row.get(3)?,
        build_dir: row.get(4)?,
        cmake_version: row.get(5)?,
        generator: row.get(6)?,
        compiler_c: row.get(7)?,
        compiler_cxx: row.get(8)?,
        build_type: row.get(9)?,
        cmake_args: json_list(row, 10)?,
        duration_secs: row.get(11)?,
        exit_code: row.get(12)?,
        success: row.get(13)?,
        stdout: row.get(14)?,
        stderr: row.get(15)?,
        found_packages: json_list(row, 16)?,
        build_files_dir: row.get(17)?,
        system_name: row.get(18)?,
        system_processor: row.get(19)?,
    })
}

/// Build row without children; see [`BuildStore::with_children`]
fn build_from_row(row: &Row<'_>) -> rusqlite::Result<BuildRecord> {
    Ok(BuildRecord {
        id: row.get(0)?,
        configuration_id: row.get(1)?,
        timestamp: row.get(2)?,
        project_name: row.get(3)?,
        build_dir: row.get(4)?,
        build_args: json_list(row, 5)?,
        duration_secs: row.get(6)?,
        exit_code: row.get(7)?,
        success: row.get(8)?,
        parallel_jobs: row.get(9)?,
        files_compiled: row.get(10)?,
        stdout: row.get(11)?,
        stderr: row.get(12)?,
        warnings: Vec::new(),
        errors: Vec::new(),
        targets_built: Vec::new(),
    })
}
