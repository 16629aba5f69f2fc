//! `si_code` values delivered with SIGTRAP. These live deep in the libc
//! headers and are not exposed by nix or the libc crate.
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

/// Sent by the kernel; this is what an int3 patched into the text segment
/// produces
pub const SI_KERNEL: i32 = 0x80;

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap, the stop after `PTRACE_SINGLESTEP`
pub const TRAP_TRACE: i32 = 0x2;
