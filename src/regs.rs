//! The x86-64 register file as ptrace exposes it.
//!
//! [`REGISTERS`] is the single source of truth: one descriptor per slot of
//! [`user_regs_struct`], in the exact order of its fields, carrying the
//! DWARF register number and the canonical textual name. Every lookup
//! (name, DWARF number, dump order, slot offset) goes through this table.

use std::fmt::{self, Display};
use std::str::FromStr;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};

/// The general purpose, segment and control registers of x86-64.
///
/// Floating point and vector registers are omitted.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    r15,
    r14,
    r13,
    r12,
    rbp,
    rbx,
    r11,
    r10,
    r9,
    r8,
    rax,
    rcx,
    rdx,
    rsi,
    rdi,
    orig_rax,
    rip,
    cs,
    eflags,
    rsp,
    ss,
    fs_base,
    gs_base,
    ds,
    es,
    fs,
    gs,
}

#[derive(Debug, Clone, Copy)]
pub struct RegDescriptor {
    pub reg: Register,
    /// DWARF register number per the System V AMD64 ABI, -1 where DWARF
    /// defines none
    pub dwarf: i32,
    pub name: &'static str,
}

/// Ordered exactly like the fields of [`user_regs_struct`]: the table index
/// of a register doubles as its slot in the kernel register dump.
pub const REGISTERS: [RegDescriptor; 27] = [
    RegDescriptor { reg: Register::r15, dwarf: 15, name: "r15" },
    RegDescriptor { reg: Register::r14, dwarf: 14, name: "r14" },
    RegDescriptor { reg: Register::r13, dwarf: 13, name: "r13" },
    RegDescriptor { reg: Register::r12, dwarf: 12, name: "r12" },
    RegDescriptor { reg: Register::rbp, dwarf: 6, name: "rbp" },
    RegDescriptor { reg: Register::rbx, dwarf: 3, name: "rbx" },
    RegDescriptor { reg: Register::r11, dwarf: 11, name: "r11" },
    RegDescriptor { reg: Register::r10, dwarf: 10, name: "r10" },
    RegDescriptor { reg: Register::r9, dwarf: 9, name: "r9" },
    RegDescriptor { reg: Register::r8, dwarf: 8, name: "r8" },
    RegDescriptor { reg: Register::rax, dwarf: 0, name: "rax" },
    RegDescriptor { reg: Register::rcx, dwarf: 2, name: "rcx" },
    RegDescriptor { reg: Register::rdx, dwarf: 1, name: "rdx" },
    RegDescriptor { reg: Register::rsi, dwarf: 4, name: "rsi" },
    RegDescriptor { reg: Register::rdi, dwarf: 5, name: "rdi" },
    RegDescriptor { reg: Register::orig_rax, dwarf: -1, name: "orig_rax" },
    RegDescriptor { reg: Register::rip, dwarf: -1, name: "rip" },
    RegDescriptor { reg: Register::cs, dwarf: 51, name: "cs" },
    RegDescriptor { reg: Register::eflags, dwarf: 49, name: "eflags" },
    RegDescriptor { reg: Register::rsp, dwarf: 7, name: "rsp" },
    RegDescriptor { reg: Register::ss, dwarf: 52, name: "ss" },
    RegDescriptor { reg: Register::fs_base, dwarf: 58, name: "fs_base" },
    RegDescriptor { reg: Register::gs_base, dwarf: 59, name: "gs_base" },
    RegDescriptor { reg: Register::ds, dwarf: 53, name: "ds" },
    RegDescriptor { reg: Register::es, dwarf: 50, name: "es" },
    RegDescriptor { reg: Register::fs, dwarf: 54, name: "fs" },
    RegDescriptor { reg: Register::gs, dwarf: 55, name: "gs" },
];

// the slot indexing below is only sound while the kernel dump is exactly one
// u64 per table entry
const _: () = assert!(
    std::mem::size_of::<user_regs_struct>() == REGISTERS.len() * std::mem::size_of::<u64>()
);

fn slot(r: Register) -> usize {
    REGISTERS
        .iter()
        .position(|d| d.reg == r)
        .expect("the register descriptor table covers every register")
}

fn regs_as_words(regs: &user_regs_struct) -> &[u64; REGISTERS.len()] {
    unsafe { &*std::ptr::from_ref(regs).cast() }
}

fn regs_as_words_mut(regs: &mut user_regs_struct) -> &mut [u64; REGISTERS.len()] {
    unsafe { &mut *std::ptr::from_mut(regs).cast() }
}

/// Fetch the register file of the stopped tracee and return one slot.
pub fn read_register(pid: Pid, r: Register) -> Result<u64> {
    let regs = ptrace::getregs(pid)?;
    Ok(regs_as_words(&regs)[slot(r)])
}

/// Fetch the register file, change one slot, write the file back.
pub fn write_register(pid: Pid, r: Register, value: u64) -> Result<()> {
    let mut regs = ptrace::getregs(pid)?;
    regs_as_words_mut(&mut regs)[slot(r)] = value;
    Ok(ptrace::setregs(pid, regs)?)
}

pub fn get_pc(pid: Pid) -> Result<u64> {
    read_register(pid, Register::rip)
}

pub fn set_pc(pid: Pid, pc: u64) -> Result<()> {
    write_register(pid, Register::rip, pc)
}

pub fn name_of(r: Register) -> &'static str {
    REGISTERS[slot(r)].name
}

/// Look a register up by its DWARF number. Registers without a DWARF
/// mapping carry -1 in the table and can never be found this way.
pub fn register_from_dwarf(dwarf: i32) -> Result<Register> {
    if dwarf < 0 {
        return Err(DebuggerError::UnknownDwarfRegister(dwarf));
    }
    REGISTERS
        .iter()
        .find(|d| d.dwarf == dwarf)
        .map(|d| d.reg)
        .ok_or(DebuggerError::UnknownDwarfRegister(dwarf))
}

impl FromStr for Register {
    type Err = DebuggerError;

    // exact and case sensitive
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        REGISTERS
            .iter()
            .find(|d| d.name == s)
            .map(|d| d.reg)
            .ok_or_else(|| DebuggerError::UnknownRegister(s.to_string()))
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", name_of(*self))
    }
}

/// All register values of the tracee, in dump order.
#[derive(Debug)]
pub struct RegisterDump(Vec<(&'static str, u64)>);

impl Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            writeln!(f, "{name:<8} {value:#018x}")?;
        }
        Ok(())
    }
}

/// Read the whole register file for display, in the canonical table order.
pub fn dump_registers(pid: Pid) -> Result<RegisterDump> {
    let regs = ptrace::getregs(pid)?;
    let words = regs_as_words(&regs);
    Ok(RegisterDump(
        REGISTERS
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.name, words[idx]))
            .collect(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_table_matches_kernel_layout() {
        assert_eq!(REGISTERS.len(), 27);
        // spot check the slots that the engine depends on
        assert_eq!(slot(Register::rip), 16);
        assert_eq!(REGISTERS[16].name, "rip");
        assert_eq!(slot(Register::r15), 0);
        assert_eq!(slot(Register::gs), 26);
        assert_eq!(slot(Register::rbp), 4);
    }

    #[test]
    fn test_register_from_name() {
        assert_eq!(Register::from_str("rax").unwrap(), Register::rax);
        assert_eq!(Register::from_str("eflags").unwrap(), Register::eflags);
        assert!(Register::from_str("RAX").is_err());
        assert!(Register::from_str("xyz").is_err());
        assert!(Register::from_str("").is_err());
    }

    #[test]
    fn test_register_from_dwarf() {
        assert_eq!(register_from_dwarf(0).unwrap(), Register::rax);
        assert_eq!(register_from_dwarf(6).unwrap(), Register::rbp);
        assert_eq!(register_from_dwarf(59).unwrap(), Register::gs_base);
        // rip and orig_rax have no DWARF number
        assert!(register_from_dwarf(-1).is_err());
        assert!(register_from_dwarf(1000).is_err());
    }

    #[test]
    fn test_register_names_round_trip() {
        for d in &REGISTERS {
            assert_eq!(Register::from_str(d.name).unwrap(), d.reg);
            assert_eq!(name_of(d.reg), d.name);
        }
    }

    #[test]
    fn test_dump_format() {
        let dump = RegisterDump(vec![("rax", 0xdeadbeef), ("rip", 0x401130)]);
        let rendered = format!("{dump}");
        assert_eq!(rendered, "rax      0x00000000deadbeef\nrip      0x0000000000401130\n");
    }
}
