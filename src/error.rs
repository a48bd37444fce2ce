//! Crate-local error kinds.
//!
//! A typed, crate-local error returned from the hot-path operation instead
//! of a boxed `dyn Error`, covering this crate's four fatal conditions.

use thiserror::Error;

/// Result alias used throughout the LCD and signal modules.
pub type SimResult<T> = Result<T, SimError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A non-`FunctionSet` instruction arrived before the third `FunctionSet`.
    #[error("LCD received an instruction before the init sequence completed")]
    NotInitialised,

    /// `FunctionSet` selected 8-bit mode.
    #[error("LCD 8-bit mode is not supported")]
    UnsupportedMode,

    /// A DDRAM/CGRAM address counter exceeded its valid range.
    #[error("address {addr:#04x} exceeds the valid range (limit {limit:#04x})")]
    AddressOutOfBounds { addr: u8, limit: u8 },

    /// Invalid port letter, invalid pin index, or rewiring an already-bound
    /// endpoint slot. Implementation-defined; not user-recoverable.
    #[error("programming error: {0}")]
    ProgrammingError(String),
}
