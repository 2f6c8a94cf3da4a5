//! Error kinds shared by every component of the engine.

use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while inspecting, comparing, or rebuilding
/// an ELF object. Every variant is fatal to the current subcommand: callers
/// are expected to print it and exit nonzero, not retry.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not a well-formed relocatable ELF64 object: a required
    /// table is missing, a section index is out of range, or a relocation
    /// entry is corrupt.
    #[error("malformed ELF: {reason}{}", offset.map(|o| format!(" (index {})", o)).unwrap_or_default())]
    MalformedElf {
        /// Human-readable description of the failing check.
        reason: &'static str,
        /// Section or symbol index implicated, if any.
        offset: Option<usize>,
    },

    /// `extract`/`disassemble`/`changeCallSymbol` named a symbol that has
    /// no definition in the input object.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A `__jump_table` entry points at bytes that are neither a recognized
    /// NOP placeholder nor an already-patched jump.
    #[error("unrecognized static key pattern in {function} at offset {offset:#x}")]
    UnrecognizedStaticKey {
        /// Function the jump table entry falls inside.
        function: String,
        /// Byte offset within the function.
        offset: usize,
    },

    /// A control-flow target inside a copied function could not be
    /// resolved to any symbol, so it cannot be made relocatable.
    #[error("unresolved call target in {function} at offset {offset:#x}")]
    UnresolvedCallTarget {
        /// Function containing the unresolved instruction.
        function: String,
        /// Byte offset within the function.
        offset: usize,
    },

    /// File open/read/write failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for the common "missing table" family of malformed-ELF
    /// errors.
    pub fn malformed(reason: &'static str) -> Error {
        Error::MalformedElf { reason, offset: None }
    }

    /// Shorthand for a malformed-ELF error tied to a specific index.
    pub fn malformed_at(reason: &'static str, offset: usize) -> Error {
        Error::MalformedElf { reason, offset: Some(offset) }
    }
}
