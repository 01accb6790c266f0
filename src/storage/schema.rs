//! Fixed relational schema

pub const SCHEMA_VERSION: i64 = 1;

pub(crate) const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
";

pub(crate) const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS configurations (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        TEXT NOT NULL,
    project_name     TEXT NOT NULL,
    source_dir       TEXT NOT NULL,
    build_dir        TEXT NOT NULL,
    cmake_version    TEXT NOT NULL,
    generator        TEXT NOT NULL,
    compiler_c       TEXT NOT NULL,
    compiler_cxx     TEXT NOT NULL,
    build_type       TEXT,
    cmake_args       TEXT NOT NULL DEFAULT '[]',
    duration_secs    REAL NOT NULL,
    exit_code        INTEGER NOT NULL,
    success          INTEGER NOT NULL,
    stdout           TEXT NOT NULL DEFAULT '',
    stderr           TEXT NOT NULL DEFAULT '',
    found_packages   TEXT NOT NULL DEFAULT '[]',
    build_files_dir  TEXT,
    system_name      TEXT,
    system_processor TEXT
);

CREATE TABLE IF NOT EXISTS builds (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    configuration_id  INTEGER REFERENCES configurations(id) ON DELETE SET NULL,
    timestamp         TEXT NOT NULL,
    project_name      TEXT NOT NULL,
    build_dir         TEXT NOT NULL,
    build_args        TEXT NOT NULL DEFAULT '[]',
    duration_secs     REAL NOT NULL,
    exit_code         INTEGER NOT NULL,
    success           INTEGER NOT NULL,
    warnings_count    INTEGER NOT NULL DEFAULT 0,
    errors_count      INTEGER NOT NULL DEFAULT 0,
    parallel_jobs     INTEGER,
    files_compiled    INTEGER NOT NULL DEFAULT 0,
    stdout            TEXT NOT NULL DEFAULT '',
    stderr            TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS warnings (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    build_id     INTEGER NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
    file         TEXT,
    line_number   INTEGER,
    column_number INTEGER,
    message      TEXT NOT NULL,
    code         TEXT,
    dialect      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS errors (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    build_id     INTEGER NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
    file         TEXT,
    line_number   INTEGER,
    column_number INTEGER,
    message      TEXT NOT NULL,
    code         TEXT,
    dialect      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS build_targets (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    build_id         INTEGER NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
    target_name      TEXT NOT NULL,
    target_type      TEXT NOT NULL,
    build_order      INTEGER NOT NULL,
    completion_step  INTEGER,
    total_steps      INTEGER
);

CREATE INDEX IF NOT EXISTS idx_configurations_project ON configurations(project_name);
CREATE INDEX IF NOT EXISTS idx_configurations_timestamp ON configurations(timestamp);
CREATE INDEX IF NOT EXISTS idx_configurations_success ON configurations(success);
CREATE INDEX IF NOT EXISTS idx_builds_project ON builds(project_name);
CREATE INDEX IF NOT EXISTS idx_builds_timestamp ON builds(timestamp);
CREATE INDEX IF NOT EXISTS idx_builds_success ON builds(success);
CREATE INDEX IF NOT EXISTS idx_builds_configuration ON builds(configuration_id);
CREATE INDEX IF NOT EXISTS idx_warnings_build ON warnings(build_id);
CREATE INDEX IF NOT EXISTS idx_errors_build ON errors(build_id);
CREATE INDEX IF NOT EXISTS idx_targets_build ON build_targets(build_id);
";
