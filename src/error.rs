//! Rich diagnostic error types for the chunking engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text.
//!
//! Note that ordinary chunk-build outcomes (no grounds, budget exhausted,
//! duplicate rule, ...) are *not* errors: they are reported through
//! [`ChunkOutcome`](crate::chunker::ChunkOutcome). Errors here mean the caller
//! handed the engine something it cannot use.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the chunking engine.
#[derive(Debug, Error, Diagnostic)]
pub enum EbcError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Symbol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SymbolError {
    #[error("symbol allocator exhausted: cannot allocate more than u64::MAX symbols")]
    #[diagnostic(
        code(akh::ebc::symbol::exhausted),
        help(
            "The symbol ID space is exhausted. This requires 2^64 allocations; \
             check for an allocation loop."
        )
    )]
    AllocatorExhausted,

    #[error("symbol {label} cannot be interned")]
    #[diagnostic(
        code(akh::ebc::symbol::not_internable),
        help("Identifiers are always fresh. Use `SymbolTable::make_identifier` instead.")
    )]
    NotInternable { label: String },
}

// ---------------------------------------------------------------------------
// Causal graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("instantiation i{id} not found")]
    #[diagnostic(
        code(akh::ebc::graph::unknown_instantiation),
        help(
            "The instantiation was never added to the causal graph or has \
             already been retracted."
        )
    )]
    UnknownInstantiation { id: u64 },

    #[error("preference p{id} not found")]
    #[diagnostic(
        code(akh::ebc::graph::unknown_preference),
        help("The preference was never added or its instantiation has been retracted.")
    )]
    UnknownPreference { id: u64 },

    #[error("working-memory element w{id} not found")]
    #[diagnostic(
        code(akh::ebc::graph::unknown_wme),
        help("The element was never added or has been removed with its supporting preference.")
    )]
    UnknownWme { id: u64 },

    #[error("{label} is not a goal")]
    #[diagnostic(
        code(akh::ebc::graph::not_a_goal),
        help("An instantiation's match goal must be a state created with `CausalGraph::add_goal`.")
    )]
    NotAGoal { label: String },

    #[error("{label} is not a working-memory identifier")]
    #[diagnostic(
        code(akh::ebc::graph::not_an_identifier),
        help(
            "Working-memory elements and preferences must hang off an identifier \
             created with `CausalGraph::add_identifier` or `add_goal`."
        )
    )]
    NotAnIdentifier { label: String },

    #[error("binary preference {kind} requires a referent")]
    #[diagnostic(
        code(akh::ebc::graph::missing_referent),
        help("Better, worse and unary-indifferent-with preferences compare two values.")
    )]
    MissingReferent { kind: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read chunker config {path}")]
    #[diagnostic(
        code(akh::ebc::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write chunker config {path}")]
    #[diagnostic(
        code(akh::ebc::config::write),
        help("Check that the parent directory is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid chunker config {path}: {message}")]
    #[diagnostic(
        code(akh::ebc::config::parse),
        help("The file must be TOML with the fields of `ChunkerConfig`.")
    )]
    Parse { path: String, message: String },

    #[error("unknown chunking option: {option}")]
    #[diagnostic(
        code(akh::ebc::config::unknown_option),
        help(
            "Recognized options: learning, bottom-only, max-chunks, max-dupes, \
             allow-local-negations, interrupt, interrupt-on-watched, \
             interrupt-on-warning, dont-add-bad-justifications, watch, flag, unflag."
        )
    )]
    UnknownOption { option: String },

    #[error("invalid value {value:?} for option {option}")]
    #[diagnostic(
        code(akh::ebc::config::invalid_value),
        help("Booleans accept on/off/true/false; limits must be positive integers.")
    )]
    InvalidValue { option: String, value: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(akh::ebc::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning chunking-engine results.
pub type EbcResult<T> = std::result::Result<T, EbcError>;
