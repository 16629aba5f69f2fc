//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! All failure modes of the debugger funnel into [`DebuggerError`], defined
//! with the [thiserror] crate: operating system errors from tracing
//! syscalls, parse errors from user input, and misses in the debug
//! information. The command loop downgrades these to user-facing messages;
//! none of them end the session.

use thiserror::Error;

use crate::Addr;

/// Type alias for Results returned by minidbg functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Could not parse string: {0}")]
    ParseStr(String),
    #[error("Error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
    #[error("Error while reading information from the executable file: {0}")]
    Object(#[from] object::Error),
    #[error("Error while working with the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("No register is named '{0}'")]
    UnknownRegister(String),
    #[error("No register maps to DWARF register number {0}")]
    UnknownDwarfRegister(i32),
    #[error("No function in the debug information covers address {0}")]
    NotInFunction(Addr),
    #[error("No function is named '{0}'")]
    FunctionNotFound(String),
    #[error("No line table entry covers address {0}")]
    NoLineEntry(Addr),
    #[error("No statement found for {0}:{1}")]
    SourceLineNotFound(String, u64),
    #[error("The process map of the debuggee is empty")]
    EmptyProcessMap,
    #[error("The debuggee has exited")]
    TargetExited,
}
