//! # The debugger control engine
//!
//! Owns the traced child, the breakpoint table and the debug information,
//! and turns [`Status`] values coming from the UI into tracing syscalls.
//!
//! Two rules keep the whole thing honest:
//!
//! - every operation that resumes the child blocks in [`Debugger::wait_signal`]
//!   until the child is stopped again or gone, so the engine only ever
//!   inspects a stopped process;
//! - when a trap fires, the CPU has already executed the int3 and the PC
//!   points one past the patched byte. [`Debugger::handle_sigtrap`] rewinds
//!   it before anything else looks at the registers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, error, info, trace, warn};

use crate::breakpoint::Breakpoint;
use crate::consts::{SI_KERNEL, TRAP_BRKPT, TRAP_TRACE};
use crate::dbginfo::{DebugInfo, FunctionDie, LineEntry};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::memorymap::AddressSpace;
use crate::regs::{self, Register};
use crate::ui::{BreakpointTarget, DebuggerUI, Status};
use crate::{mem_read_word, mem_write_word, Addr, Word};

pub struct Debugger<UI: DebuggerUI> {
    pid: Pid,
    ui: UI,
    dbginfo: DebugInfo,
    addrspace: AddressSpace,
    breakpoints: HashMap<Addr, Breakpoint>,
    exit_status: Option<i32>,
}

impl<UI: DebuggerUI> Debugger<UI> {
    /// Build an engine for a child that the launcher has already forked
    /// with a pending traceme/exec.
    pub fn build(program: impl AsRef<Path>, pid: Pid, ui: UI) -> Result<Self> {
        let dbginfo = DebugInfo::build(program)?;
        Ok(Debugger {
            pid,
            ui,
            dbginfo,
            addrspace: AddressSpace::default(),
            breakpoints: HashMap::new(),
            exit_status: None,
        })
    }

    /// Reap the stop that exec delivers, work out where the debuggee got
    /// mapped, then hand control to the UI until the user quits.
    pub fn run(&mut self) -> Result<()> {
        waitpid(self.pid, None)?;
        self.addrspace = AddressSpace::detect(self.pid, self.dbginfo.is_pie())?;
        info!("debugging process {}", self.pid);

        let mut feedback = Feedback::Ok;
        loop {
            let status = match self.ui.process(feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(status) => status,
            };
            feedback = match status {
                Status::DebuggerQuit => break,
                Status::Continue => self.cont(),
                Status::SetBreakpoint(target) => self.set_breakpoint(target),
                Status::DumpRegisters => self.dump_regs(),
                Status::ReadRegister(r) => self.read_reg(r),
                Status::WriteRegister(r, v) => self.write_reg(r, v),
                Status::ReadMem(addr) => self.read_mem(addr),
                Status::WriteMem(addr, value) => self.write_mem(addr, value),
                Status::StepIn => self.step_in(),
                Status::StepOver => self.step_over(),
                Status::StepOut => self.step_out(),
                Status::LookupSymbol(name) => self.lookup_symbol(&name),
            }
            .into();
        }
        Ok(())
    }

    /// Kill a child that is still around. Called by the launcher once the
    /// command loop is done.
    pub fn cleanup(&self) -> Result<()> {
        if self.exit_status.is_none() {
            ptrace::kill(self.pid)?;
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.exit_status.is_some() {
            return Err(DebuggerError::TargetExited);
        }
        Ok(())
    }

    /// Resume the child and block until the next stop. Steps over a
    /// breakpoint sitting at the current PC first, so the original
    /// instruction is not skipped.
    pub fn cont(&mut self) -> Result<Feedback> {
        self.ensure_alive()?;
        self.step_over_breakpoint()?;
        if let Some(code) = self.exit_status {
            return Ok(Feedback::Exit(code));
        }
        ptrace::cont(self.pid, None)?;
        self.wait_signal()
    }

    pub fn set_breakpoint(&mut self, target: BreakpointTarget) -> Result<Feedback> {
        self.ensure_alive()?;
        match target {
            BreakpointTarget::Address(addr) => self.set_bp(addr),
            BreakpointTarget::Function(name) => self.set_bp_at_function(&name),
            BreakpointTarget::SourceLine(file, line) => self.set_bp_at_line(&file, line),
        }
    }

    /// Insert and arm a breakpoint at a runtime address. Arming an address
    /// that already has one is a no-op.
    fn set_bp(&mut self, addr: Addr) -> Result<Feedback> {
        info!("Set breakpoint at address {addr}");
        let bp = self
            .breakpoints
            .entry(addr)
            .or_insert_with(|| Breakpoint::new(self.pid, addr));
        bp.enable()?;
        Ok(Feedback::Ok)
    }

    /// A function entry row in the line table points at the prologue; the
    /// row after it is where the body starts and where the user expects to
    /// land.
    fn set_bp_at_function(&mut self, name: &str) -> Result<Feedback> {
        let funcs = self.dbginfo.functions_by_name(name)?;
        if funcs.is_empty() {
            return Err(DebuggerError::FunctionNotFound(name.to_string()));
        }
        for func in funcs {
            let entry = self.dbginfo.line_for(func.low_pc)?;
            let body = self.dbginfo.line_entry_after(&entry)?;
            self.set_bp(self.addrspace.dwarf_to_runtime(body.address))?;
        }
        Ok(Feedback::Ok)
    }

    fn set_bp_at_line(&mut self, file: &str, line: u64) -> Result<Feedback> {
        let entry = self.dbginfo.line_for_source(file, line)?;
        self.set_bp(self.addrspace.dwarf_to_runtime(entry.address))
    }

    /// Disarm and forget the breakpoint at `addr`, if there is one.
    pub fn remove_breakpoint(&mut self, addr: Addr) -> Result<Feedback> {
        if let Some(bp) = self.breakpoints.get_mut(&addr) {
            bp.disable()?;
            self.breakpoints.remove(&addr);
        } else {
            warn!("no breakpoint at {addr}");
        }
        Ok(Feedback::Ok)
    }

    /// Step source lines, descending into calls: single-step instructions
    /// until the line table reports a different line.
    pub fn step_in(&mut self) -> Result<Feedback> {
        self.ensure_alive()?;
        let start = self.current_line()?.line;
        loop {
            self.single_step_checked()?;
            if let Some(code) = self.exit_status {
                return Ok(Feedback::Exit(code));
            }
            let entry = self.current_line()?;
            if entry.line != start {
                self.print_source(&entry)?;
                return Ok(Feedback::Ok);
            }
        }
    }

    /// Step one source line without descending into calls. Plants
    /// temporary breakpoints on every other statement of the enclosing
    /// function plus the return address, continues, then removes them.
    pub fn step_over(&mut self) -> Result<Feedback> {
        self.ensure_alive()?;
        let pc = self.offset_pc()?;
        let func = self.dbginfo.function_containing(pc)?;
        let start = self.dbginfo.line_for(pc)?;

        let mut temporaries = Vec::new();
        let result = self
            .plant_step_over_breakpoints(&func, &start, &mut temporaries)
            .and_then(|()| self.cont());

        // the temporaries must go away even when the continue failed
        for addr in temporaries {
            self.drop_breakpoint(addr);
        }
        result
    }

    fn plant_step_over_breakpoints(
        &mut self,
        func: &FunctionDie,
        start: &LineEntry,
        temporaries: &mut Vec<Addr>,
    ) -> Result<()> {
        let entries = self.dbginfo.line_table_covering(func.low_pc)?;
        for entry in entries {
            if !entry.is_stmt
                || !func.contains(entry.address)
                || entry.address == start.address
            {
                continue;
            }
            let runtime = self.addrspace.dwarf_to_runtime(entry.address);
            if !self.breakpoints.contains_key(&runtime) {
                self.set_bp(runtime)?;
                temporaries.push(runtime);
            }
        }

        let return_addr = self.return_address()?;
        if !self.breakpoints.contains_key(&return_addr) {
            self.set_bp(return_addr)?;
            temporaries.push(return_addr);
        }
        Ok(())
    }

    /// Run until the current function returns: a temporary breakpoint at
    /// the return address, then continue. A breakpoint the user already
    /// placed there is left untouched.
    pub fn step_out(&mut self) -> Result<Feedback> {
        self.ensure_alive()?;
        let return_addr = self.return_address()?;

        let transient = !self.breakpoints.contains_key(&return_addr);
        if transient {
            self.set_bp(return_addr)?;
        }
        let result = self.cont();
        if transient {
            self.drop_breakpoint(return_addr);
        }
        result
    }

    /// The return address of the current frame, read from `[rbp + 8]`.
    /// Only valid for functions with a frame pointer prologue; with
    /// `-fomit-frame-pointer` this reads garbage.
    fn return_address(&self) -> Result<Addr> {
        let frame_pointer = Addr::from(regs::read_register(self.pid, Register::rbp)?);
        Ok(mem_read_word(self.pid, frame_pointer + 8usize)?.into())
    }

    fn single_step(&mut self) -> Result<Feedback> {
        ptrace::step(self.pid, None)?;
        self.wait_signal()
    }

    /// One instruction forward, going through the breakpoint dance if the
    /// current PC has one.
    fn single_step_checked(&mut self) -> Result<Feedback> {
        let pc = Addr::from(regs::get_pc(self.pid)?);
        if self.breakpoints.contains_key(&pc) {
            self.step_over_breakpoint()?;
            Ok(Feedback::Ok)
        } else {
            self.single_step()
        }
    }

    /// Execute the original instruction under an armed breakpoint at the
    /// current PC: disarm, single-step, re-arm.
    fn step_over_breakpoint(&mut self) -> Result<()> {
        let pc = Addr::from(regs::get_pc(self.pid)?);
        match self.breakpoints.get_mut(&pc) {
            Some(bp) if bp.is_enabled() => bp.disable()?,
            _ => return Ok(()),
        }
        trace!("stepping over the breakpoint at {pc}");
        ptrace::step(self.pid, None)?;
        self.wait_signal()?;
        if self.exit_status.is_none() {
            if let Some(bp) = self.breakpoints.get_mut(&pc) {
                bp.enable()?;
            }
        }
        Ok(())
    }

    /// Block until the debuggee stops or exits, then dispatch on what
    /// stopped it.
    fn wait_signal(&mut self) -> Result<Feedback> {
        match waitpid(self.pid, None)? {
            WaitStatus::Exited(_, code) => {
                info!("debuggee exited with code {code}");
                self.exit_status = Some(code);
                Ok(Feedback::Exit(code))
            }
            WaitStatus::Signaled(_, signal, _) => {
                info!("debuggee terminated by {}", signal.as_str());
                self.exit_status = Some(-1);
                Ok(Feedback::Exit(-1))
            }
            _ => {
                let siginfo = ptrace::getsiginfo(self.pid)?;
                let signal = Signal::try_from(siginfo.si_signo)?;
                match signal {
                    Signal::SIGTRAP => self.handle_sigtrap(&siginfo)?,
                    Signal::SIGSEGV => {
                        info!("debuggee got SIGSEGV, reason {}", siginfo.si_code);
                    }
                    other => info!("debuggee got {}", other.as_str()),
                }
                Ok(Feedback::Ok)
            }
        }
    }

    fn handle_sigtrap(&mut self, siginfo: &nix::libc::siginfo_t) -> Result<()> {
        match siginfo.si_code {
            SI_KERNEL | TRAP_BRKPT => {
                // the CPU is one past the int3 byte
                let pc = Addr::from(regs::get_pc(self.pid)?) - 1usize;
                regs::set_pc(self.pid, pc.u64())?;
                info!("Hit breakpoint at address {pc}");
                let entry = self.dbginfo.line_for(self.addrspace.runtime_to_dwarf(pc))?;
                self.print_source(&entry)?;
            }
            TRAP_TRACE => trace!("single step done"),
            code => warn!("unhandled SIGTRAP code {code}"),
        }
        Ok(())
    }

    fn current_line(&self) -> Result<LineEntry> {
        self.dbginfo.line_for(self.offset_pc()?)
    }

    /// The current PC as a link-time address.
    fn offset_pc(&self) -> Result<Addr> {
        Ok(self
            .addrspace
            .runtime_to_dwarf(Addr::from(regs::get_pc(self.pid)?)))
    }

    fn print_source(&self, entry: &LineEntry) -> Result<()> {
        let listing = render_source_context(&entry.file, entry.line, 2)?;
        info!("{}:{}\n{listing}", entry.file.display(), entry.line);
        Ok(())
    }

    /// Best-effort removal for temporary breakpoints: the table entry goes
    /// away even when the tracee is already gone and the disarm failed.
    fn drop_breakpoint(&mut self, addr: Addr) {
        if let Err(e) = self.remove_breakpoint(addr) {
            debug!("could not disarm temporary breakpoint at {addr}: {e}");
            self.breakpoints.remove(&addr);
        }
    }

    pub fn dump_regs(&self) -> Result<Feedback> {
        self.ensure_alive()?;
        Ok(Feedback::Registers(regs::dump_registers(self.pid)?))
    }

    pub fn read_reg(&self, r: Register) -> Result<Feedback> {
        self.ensure_alive()?;
        Ok(Feedback::Register(regs::read_register(self.pid, r)?))
    }

    pub fn write_reg(&self, r: Register, value: u64) -> Result<Feedback> {
        self.ensure_alive()?;
        regs::write_register(self.pid, r, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_mem(&self, addr: Addr) -> Result<Feedback> {
        self.ensure_alive()?;
        Ok(Feedback::Word(mem_read_word(self.pid, addr)?))
    }

    pub fn write_mem(&self, addr: Addr, value: Word) -> Result<Feedback> {
        self.ensure_alive()?;
        mem_write_word(self.pid, addr, value)?;
        Ok(Feedback::Ok)
    }

    pub fn lookup_symbol(&self, name: &str) -> Result<Feedback> {
        Ok(Feedback::Symbols(self.dbginfo.lookup_symbol(name)))
    }
}

/// Render `context` lines around `line` of the source file at `path`, the
/// target line marked with `> `. Near the top of the file the window is
/// clipped to start at line 1.
fn render_source_context(path: &Path, line: u64, context: u64) -> Result<String> {
    let file = File::open(path)?;
    let start = line.saturating_sub(context).max(1);
    let end = line + context;

    let mut out = String::new();
    for (idx, text) in BufReader::new(file).lines().enumerate() {
        let current = idx as u64 + 1;
        if current < start {
            continue;
        }
        if current > end {
            break;
        }
        out.push_str(if current == line { "> " } else { "  " });
        out.push_str(&text?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn source_fixture() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("could not create temp file");
        for n in 1..=9 {
            writeln!(file, "line {n}").expect("could not write temp file");
        }
        file
    }

    #[test]
    fn test_source_window_marks_target() {
        let file = source_fixture();
        let listing = render_source_context(file.path(), 5, 2).unwrap();
        assert_eq!(
            listing,
            "  line 3\n  line 4\n> line 5\n  line 6\n  line 7\n"
        );
    }

    #[test]
    fn test_source_window_clips_at_file_start() {
        let file = source_fixture();
        let listing = render_source_context(file.path(), 1, 2).unwrap();
        assert_eq!(listing, "> line 1\n  line 2\n  line 3\n");
    }

    #[test]
    fn test_source_window_clips_at_file_end() {
        let file = source_fixture();
        let listing = render_source_context(file.path(), 9, 2).unwrap();
        assert_eq!(listing, "  line 7\n  line 8\n> line 9\n");
    }

    #[test]
    fn test_source_window_missing_file() {
        assert!(render_source_context(Path::new("/nonexistent/spot.c"), 1, 2).is_err());
    }
}
