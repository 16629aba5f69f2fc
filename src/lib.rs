use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::Result;

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod dbginfo;
pub mod debugger;
pub mod errors;
pub mod feedback;
pub mod memorymap;
pub mod regs;
pub mod ui;

pub use addr::Addr;
pub use regs::Register;

/// One tracee memory word, as [`ptrace`] hands it out.
pub type Word = i64;
pub type RawPointer = *mut std::ffi::c_void;

pub(crate) fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    Ok(ptrace::write(pid, addr.raw_pointer(), value)?)
}

pub(crate) fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.raw_pointer())?)
}
