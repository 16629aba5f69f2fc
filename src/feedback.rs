use std::fmt::Display;

use crate::dbginfo::Sym;
use crate::errors::DebuggerError;
use crate::regs::RegisterDump;
use crate::Word;

/// What an engine operation produced, handed back to the UI for display.
#[derive(Debug)]
pub enum Feedback {
    Ok,
    Exit(i32),
    Registers(RegisterDump),
    Register(u64),
    Word(Word),
    Symbols(Vec<Sym>),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Exit(code) => write!(f, "Debuggee exited with code {code}")?,
            Feedback::Registers(dump) => write!(f, "\n{dump}")?,
            Feedback::Register(value) => write!(f, "{value:#018x}")?,
            Feedback::Word(word) => write!(f, "{:#018x}", *word as u64)?,
            Feedback::Symbols(syms) if syms.is_empty() => write!(f, "No symbols found")?,
            Feedback::Symbols(syms) => {
                for sym in syms {
                    writeln!(f, "{sym}")?;
                }
            }
            Feedback::Error(e) => write!(f, "Error: {e}")?,
        }

        Ok(())
    }
}

impl From<crate::errors::Result<Feedback>> for Feedback {
    fn from(result: crate::errors::Result<Feedback>) -> Self {
        match result {
            Ok(feedback) => feedback,
            Err(e) => Feedback::Error(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dbginfo::SymbolKind;
    use crate::Addr;

    #[test]
    fn test_register_value_format() {
        let feedback = Feedback::Register(0xdeadbeef);
        assert_eq!(format!("{feedback}"), "0x00000000deadbeef");
    }

    #[test]
    fn test_word_format_is_unsigned() {
        let feedback = Feedback::Word(-1);
        assert_eq!(format!("{feedback}"), "0xffffffffffffffff");
    }

    #[test]
    fn test_symbols_format() {
        let feedback = Feedback::Symbols(vec![Sym {
            name: "main".to_string(),
            kind: SymbolKind::Func,
            addr: Addr::from(0x401130usize),
        }]);
        assert_eq!(format!("{feedback}"), "main func 0x0000000000401130\n");
    }
}
