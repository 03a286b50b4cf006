//! Rich diagnostic error types for the topograph engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.
//!
//! Most of these never abort an analysis run: unresolvable geometry, failing
//! kernel predicates and failing write batches are recorded and counted by the
//! component that hit them. Only the variants that reach [`TopoError`] through a
//! public API are fatal to the call that returned them.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the topograph engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum TopoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("duplicate element identifier: {id}")]
    #[diagnostic(
        code(topo::model::duplicate_id),
        help(
            "Element identifiers must be globally unique within one element set. \
             Check the parser output for repeated GlobalIds."
        )
    )]
    DuplicateIdentifier { id: String },

    #[error("empty element identifier at position {index}")]
    #[diagnostic(
        code(topo::model::empty_id),
        help("Every element record needs a non-empty identifier.")
    )]
    EmptyIdentifier { index: usize },

    #[error("failed to read element set from {path}")]
    #[diagnostic(
        code(topo::model::read),
        help("Ensure the element set file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse element set: {message}")]
    #[diagnostic(
        code(topo::model::parse),
        help("The element set must be the JSON interchange written by the parser.")
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Geometry (proxy construction) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GeometryError {
    #[error("element {id} carries no geometry")]
    #[diagnostic(
        code(topo::geometry::no_geometry),
        help(
            "The element has an empty vertex or face array. It can still take part \
             in declared relationships."
        )
    )]
    NoGeometry { id: String },

    #[error("only {found} valid faces, a volume needs at least {required}")]
    #[diagnostic(
        code(topo::geometry::not_enough_faces),
        help("The face runs did not describe a closed body; a lower tier will be tried.")
    )]
    NotEnoughFaces { found: usize, required: usize },

    #[error("no valid face could be built from {runs} face runs")]
    #[diagnostic(
        code(topo::geometry::no_face),
        help("Every face run was too short, out of range or degenerate.")
    )]
    NoValidFace { runs: usize },

    #[error("no curve could be built from {vertices} vertices")]
    #[diagnostic(
        code(topo::geometry::no_curve),
        help("A curve proxy needs at least two distinct vertices.")
    )]
    NoCurve { vertices: usize },

    #[error("element {id} could not be resolved after {attempts} attempts")]
    #[diagnostic(
        code(topo::geometry::unresolvable),
        help(
            "All proxy tiers failed. The element is excluded from geometric inference \
             but still participates through declared relationships."
        )
    )]
    Unresolvable { id: String, attempts: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kernel(#[from] KernelError),
}

// ---------------------------------------------------------------------------
// Geometry kernel errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error("degenerate {what}")]
    #[diagnostic(
        code(topo::kernel::degenerate),
        help("The input collapses within the tolerance (zero length or zero area).")
    )]
    Degenerate { what: String },

    #[error("wire is not closed: first and last vertex differ by {gap:.6}")]
    #[diagnostic(
        code(topo::kernel::open_wire),
        help("Close the loop by repeating the first vertex, or build it from edges.")
    )]
    OpenWire { gap: f64 },

    #[error("shell is not closed: {free_edges} free edges")]
    #[diagnostic(
        code(topo::kernel::open_shell),
        help(
            "A volume needs every edge shared by two faces. A larger tolerance can \
             stitch nearly coincident vertices."
        )
    )]
    OpenShell { free_edges: usize },

    #[error("{operation} does not accept a {shape}")]
    #[diagnostic(
        code(topo::kernel::unsupported),
        help("The operation was called with a shape of the wrong dimension.")
    )]
    Unsupported { operation: String, shape: String },

    #[error("predicate {predicate} failed: {message}")]
    #[diagnostic(
        code(topo::kernel::predicate),
        help("The pair is counted as indeterminate and skipped.")
    )]
    Predicate { predicate: String, message: String },
}

// ---------------------------------------------------------------------------
// Graph store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(topo::store::io),
        help(
            "A filesystem operation failed. Check that the store directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(topo::store::redb),
        help(
            "The embedded graph store encountered a transaction error. \
             The batch is counted as failed; rerun the import to retry it."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(topo::store::serde),
        help("Failed to encode or decode a stored node or relationship.")
    )]
    Serialization { message: String },

    #[error("write rejected: {message}")]
    #[diagnostic(
        code(topo::store::rejected),
        help("The database refused this batch. Other batches are unaffected.")
    )]
    Rejected { message: String },

    #[error("write timed out after {elapsed_ms} ms")]
    #[diagnostic(
        code(topo::store::timeout),
        help("Raise `import.write_timeout_ms` or reduce `import.batch_size`.")
    )]
    Timeout { elapsed_ms: u64 },

    #[error("no session became available within {waited_ms} ms")]
    #[diagnostic(
        code(topo::store::pool_exhausted),
        help("Raise `import.max_sessions` or `import.acquire_timeout_ms`.")
    )]
    PoolExhausted { waited_ms: u64 },

    #[error("connection to the graph database lost: {message}")]
    #[diagnostic(
        code(topo::store::connection_lost),
        help("Check that the database is reachable, then rerun the import.")
    )]
    ConnectionLost { message: String },
}

impl StoreError {
    /// Whether this error means no further batch can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::ConnectionLost { .. })
    }
}

// ---------------------------------------------------------------------------
// Import pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("graph database connection lost after {batches_done} batches")]
    #[diagnostic(
        code(topo::import::connection_lost),
        help("No further batch could succeed. Writes already committed are kept.")
    )]
    ConnectionLost {
        batches_done: usize,
        #[source]
        source: StoreError,
    },

    #[error("invalid batch size {batch_size}")]
    #[diagnostic(
        code(topo::import::batch_size),
        help("The batch size must be at least 1.")
    )]
    InvalidBatchSize { batch_size: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),
}

// ---------------------------------------------------------------------------
// Executor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("failed to build worker pool: {message}")]
    #[diagnostic(
        code(topo::executor::pool_build),
        help("Check `executor.workers`; the OS may refuse to spawn more threads.")
    )]
    PoolBuild { message: String },

    #[error("invalid batch size {batch_size}")]
    #[diagnostic(
        code(topo::executor::batch_size),
        help("The batch size must be at least 1.")
    )]
    InvalidBatchSize { batch_size: usize },

    #[error("batch {batch_index} failed: {message}")]
    #[diagnostic(
        code(topo::executor::batch_failed),
        help("Sibling batches ran to completion; inspect the batch report for partial results.")
    )]
    BatchFailed { batch_index: usize, message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(topo::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(topo::config::parse),
        help("Check the TOML syntax in the config file. {message}")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(topo::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(topo::config::invalid), help("Check the EngineConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning topograph results.
pub type TopoResult<T> = std::result::Result<T, TopoError>;
