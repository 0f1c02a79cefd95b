use thiserror::Error;

/// Top-level error for anything that isn't captured as a per-request
/// diagnostic. Maps 1:1 onto `WorkerError::RunnerError` at the session
/// boundary (see [`crate::session`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Config(#[from] shadowcheck_config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while loading or replaying migrations (C3 / C5).
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read migrations directory {dir}: {source}")]
    ReadDir {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration file {name} does not match the V<n>__<desc>.sql naming convention")]
    BadFileName { name: String },

    #[error("migration rank {expected} is missing (found rank {found} next)")]
    RankGap { expected: u64, found: u64 },

    #[error("duplicate migration rank {rank} ({first} and {second})")]
    DuplicateRank {
        rank: u64,
        first: String,
        second: String,
    },

    #[error("migration {file} failed at byte {position:?}: {source}")]
    Apply {
        file: String,
        position: Option<u32>,
        #[source]
        source: tokio_postgres::Error,
    },
}

/// Errors raised while resolving the view dependency graph (C4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("view {0} depends on itself")]
    SelfDependency(String),

    #[error("view {view} references undefined view {dependency}")]
    MissingDependency { view: String, dependency: String },

    #[error("view dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Errors raised managing the embedded cluster (C5).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("initdb failed: {0}")]
    InitDb(String),

    #[error("postmaster failed to start within the timeout")]
    StartTimeout,

    #[error("postmaster exited unexpectedly: {0}")]
    Exited(String),

    #[error("failed to read postmaster.pid at {path}: {source}")]
    PidFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error driving cluster process: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
