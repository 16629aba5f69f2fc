use nix::unistd::Pid;

use crate::errors::Result;
use crate::{mem_read_word, mem_write_word, Addr, Word};

/// The int3 opcode: a single byte that raises SIGTRAP when executed.
pub const INT3: Word = 0xcc;
pub const WORD_MASK: Word = 0xff;

/// A software breakpoint at one virtual address of the debuggee.
///
/// Arming the breakpoint patches the low byte of the memory word at the
/// address with int3 and remembers the byte that was there; disarming puts
/// the byte back. The other seven bytes of the word are never touched.
#[derive(Debug)]
pub struct Breakpoint {
    addr: Addr,
    pid: Pid,
    saved_data: Option<u8>,
}

fn arm_word(word: Word) -> (Word, u8) {
    let saved = (word & WORD_MASK) as u8;
    ((word & !WORD_MASK) | INT3, saved)
}

fn restore_word(word: Word, saved: u8) -> Word {
    (word & !WORD_MASK) | Word::from(saved)
}

impl Breakpoint {
    pub fn new(pid: Pid, addr: Addr) -> Self {
        Self {
            pid,
            addr,
            saved_data: None,
        }
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn is_enabled(&self) -> bool {
        self.saved_data.is_some()
    }

    /// Patch the trap opcode in, saving the original low byte. Does nothing
    /// if the breakpoint is already armed.
    pub fn enable(&mut self) -> Result<()> {
        if self.saved_data.is_some() {
            return Ok(());
        }

        let word = mem_read_word(self.pid, self.addr)?;
        let (patched, saved) = arm_word(word);
        mem_write_word(self.pid, self.addr, patched)?;
        self.saved_data = Some(saved);

        Ok(())
    }

    /// Restore the saved byte. Does nothing if the breakpoint is already
    /// disarmed.
    pub fn disable(&mut self) -> Result<()> {
        let Some(saved) = self.saved_data else {
            return Ok(());
        };

        let word = mem_read_word(self.pid, self.addr)?;
        mem_write_word(self.pid, self.addr, restore_word(word, saved))?;
        self.saved_data = None;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_arm_word_patches_only_low_byte() {
        let word: Word = 0x1122334455667788;
        let (patched, saved) = arm_word(word);
        assert_eq!(saved, 0x88);
        assert_eq!(patched, 0x11223344556677cc);
    }

    #[test]
    fn test_restore_word_round_trip() {
        for word in [
            0x1122334455667788 as Word,
            0,
            -1,
            Word::MIN,
            0x00000000000000ff,
        ] {
            let (patched, saved) = arm_word(word);
            assert_eq!(patched & WORD_MASK, INT3);
            assert_eq!(restore_word(patched, saved), word);
        }
    }

    #[test]
    fn test_restore_survives_upper_byte_changes() {
        // the rest of the word may legitimately change while the trap is
        // armed (e.g. a neighbouring breakpoint); only the low byte belongs
        // to this breakpoint
        let (patched, saved) = arm_word(0x1122334455667788);
        let drifted = (patched & WORD_MASK) | 0x2122334455667700;
        assert_eq!(restore_word(drifted, saved), 0x2122334455667788);
    }
}
