use nix::unistd::Pid;
use tracing::debug;

use crate::errors::{DebuggerError, Result};
use crate::Addr;

/// Translation between the runtime address space of the debuggee and the
/// link-time addresses recorded in its DWARF data.
///
/// A position independent executable is mapped wherever the kernel felt
/// like putting it; the difference is the start of its first entry in
/// `/proc/<pid>/maps`. Everything else sits exactly where the ELF says, so
/// the load base is zero and both translations are the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressSpace {
    load_base: Addr,
}

impl AddressSpace {
    /// Read the load base of the stopped debuggee from its process map.
    /// Must run after exec, the map does not exist before.
    pub fn detect(pid: Pid, pie: bool) -> Result<Self> {
        if !pie {
            return Ok(Self::default());
        }
        let maps = proc_maps::get_process_maps(pid.as_raw())?;
        let first = maps.first().ok_or(DebuggerError::EmptyProcessMap)?;
        debug!("load base of pid {pid} is {:#x}", first.start());
        Ok(AddressSpace {
            load_base: first.start().into(),
        })
    }

    pub fn load_base(&self) -> Addr {
        self.load_base
    }

    pub fn dwarf_to_runtime(&self, addr: Addr) -> Addr {
        addr + self.load_base
    }

    pub fn runtime_to_dwarf(&self, addr: Addr) -> Addr {
        addr - self.load_base
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_translation_round_trip() {
        let space = AddressSpace {
            load_base: Addr::from(0x55f1a0000000usize),
        };
        let addr = Addr::from(0x1139usize);
        assert_eq!(
            space.dwarf_to_runtime(addr),
            Addr::from(0x55f1a0001139usize)
        );
        assert_eq!(space.runtime_to_dwarf(space.dwarf_to_runtime(addr)), addr);
    }

    #[test]
    fn test_non_pie_is_identity() {
        let space = AddressSpace::default();
        let addr = Addr::from(0x401130usize);
        assert_eq!(space.dwarf_to_runtime(addr), addr);
        assert_eq!(space.runtime_to_dwarf(addr), addr);
    }
}
