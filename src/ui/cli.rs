use std::str::FromStr;

use dialoguer::theme::ColorfulTheme;
use dialoguer::BasicHistory;
use tracing::{debug, error, info, trace, warn};

use super::{BreakpointTarget, DebuggerUI, Status};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::{Addr, Word};

/// The canonical command verbs. User input selects a verb by prefix, the
/// first match in this order wins.
const VERBS: [&str; 8] = [
    "continue", "break", "register", "memory", "step", "next", "finish", "symbol",
];

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        let ui = CliUi {
            buf_preparsed: Vec::new(),
            buf: String::new(),
            history: BasicHistory::new(),
        };
        Ok(ui)
    }

    fn get_input(&mut self) -> Result<()> {
        self.buf = dialoguer::Input::with_theme(&ColorfulTheme::default())
            .with_prompt("miniDebugger>")
            .history_with(&mut self.history)
            .interact_text()?;
        trace!("processing '{}'", self.buf);
        self.buf_preparsed = self.buf.split_whitespace().map(|a| a.to_string()).collect();
        Ok(())
    }

    fn arg(&self, index: usize) -> Option<&str> {
        self.buf_preparsed.get(index).map(String::as_str)
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        match &feedback {
            Feedback::Ok => (),
            Feedback::Error(e) => warn!("{e}"),
            other => info!("{other}"),
        }

        loop {
            if let Err(e) = self.get_input() {
                // stdin is gone, the session is over
                debug!("could not read more input: {e}");
                return Ok(Status::DebuggerQuit);
            }
            let Some(verb) = self.arg(0) else {
                continue;
            };

            match resolve_verb(verb) {
                Some("continue") => return Ok(Status::Continue),
                Some("break") => {
                    let Some(arg) = self.arg(1) else {
                        error!("break ADDRESS|FILE:LINE|FUNCTION");
                        continue;
                    };
                    match parse_breakpoint_target(arg) {
                        Ok(target) => return Ok(Status::SetBreakpoint(target)),
                        Err(e) => error!("{e}"),
                    }
                }
                Some("register") => match self.parse_register_command() {
                    Ok(status) => return Ok(status),
                    Err(e) => error!("{e}"),
                },
                Some("memory") => match self.parse_memory_command() {
                    Ok(status) => return Ok(status),
                    Err(e) => error!("{e}"),
                },
                Some("step") => return Ok(Status::StepIn),
                Some("next") => return Ok(Status::StepOver),
                Some("finish") => return Ok(Status::StepOut),
                Some("symbol") => {
                    let Some(name) = self.arg(1) else {
                        error!("symbol NAME");
                        continue;
                    };
                    return Ok(Status::LookupSymbol(name.to_string()));
                }
                _ => error!("unknown command '{verb}'"),
            }
        }
    }
}

impl CliUi {
    fn parse_register_command(&self) -> Result<Status> {
        match self.arg(1) {
            Some("dump") => Ok(Status::DumpRegisters),
            Some("read") => {
                let name = self
                    .arg(2)
                    .ok_or_else(|| usage("register read REGISTER"))?;
                Ok(Status::ReadRegister(Register::from_str(name)?))
            }
            Some("write") => {
                let name = self
                    .arg(2)
                    .ok_or_else(|| usage("register write REGISTER VALUE"))?;
                let value = self
                    .arg(3)
                    .ok_or_else(|| usage("register write REGISTER VALUE"))?;
                Ok(Status::WriteRegister(
                    Register::from_str(name)?,
                    parse_hex(value)?,
                ))
            }
            _ => Err(usage("register dump|read REGISTER|write REGISTER VALUE")),
        }
    }

    fn parse_memory_command(&self) -> Result<Status> {
        match self.arg(1) {
            Some("read") => {
                let addr = self.arg(2).ok_or_else(|| usage("memory read ADDRESS"))?;
                Ok(Status::ReadMem(parse_hex(addr)?.into()))
            }
            Some("write") => {
                let addr = self
                    .arg(2)
                    .ok_or_else(|| usage("memory write ADDRESS VALUE"))?;
                let value = self
                    .arg(3)
                    .ok_or_else(|| usage("memory write ADDRESS VALUE"))?;
                Ok(Status::WriteMem(
                    parse_hex(addr)?.into(),
                    parse_hex(value)? as Word,
                ))
            }
            _ => Err(usage("memory read ADDRESS|write ADDRESS VALUE")),
        }
    }
}

fn usage(text: &str) -> DebuggerError {
    DebuggerError::ParseStr(format!("usage: {text}"))
}

/// Match `input` against the canonical verbs by prefix; first match wins,
/// so `s` means `step` and never `symbol`.
fn resolve_verb(input: &str) -> Option<&'static str> {
    if input.is_empty() {
        return None;
    }
    VERBS.iter().find(|verb| verb.starts_with(input)).copied()
}

/// Parse a `0x`-prefixed hex number. Anything else, including plain
/// decimals, is rejected.
fn parse_hex(raw: &str) -> Result<u64> {
    let digits = raw.strip_prefix("0x").ok_or_else(|| {
        DebuggerError::ParseStr(format!("expected a 0x-prefixed hex number, got '{raw}'"))
    })?;
    Ok(u64::from_str_radix(digits, 16)?)
}

/// A breakpoint argument is an address when it starts with `0x`, a source
/// spot when it contains a colon, and a function name otherwise.
fn parse_breakpoint_target(arg: &str) -> Result<BreakpointTarget> {
    if arg.starts_with("0x") {
        return Ok(BreakpointTarget::Address(Addr::from(parse_hex(arg)?)));
    }
    if let Some((file, line)) = arg.rsplit_once(':') {
        return Ok(BreakpointTarget::SourceLine(
            file.to_string(),
            line.parse()?,
        ));
    }
    Ok(BreakpointTarget::Function(arg.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_verb_by_prefix() {
        assert_eq!(resolve_verb("continue"), Some("continue"));
        assert_eq!(resolve_verb("cont"), Some("continue"));
        assert_eq!(resolve_verb("c"), Some("continue"));
        assert_eq!(resolve_verb("b"), Some("break"));
        assert_eq!(resolve_verb("reg"), Some("register"));
        assert_eq!(resolve_verb("mem"), Some("memory"));
        // "s" is ambiguous between step and symbol; step is declared first
        assert_eq!(resolve_verb("s"), Some("step"));
        assert_eq!(resolve_verb("sy"), Some("symbol"));
        assert_eq!(resolve_verb("n"), Some("next"));
        assert_eq!(resolve_verb("f"), Some("finish"));
        assert_eq!(resolve_verb(""), None);
        assert_eq!(resolve_verb("quit"), None);
        assert_eq!(resolve_verb("continues"), None);
    }

    #[test]
    fn test_parse_hex_requires_prefix() {
        assert_eq!(parse_hex("0x19").unwrap(), 0x19);
        assert_eq!(parse_hex("0x0000401130").unwrap(), 0x401130);
        assert!(parse_hex("19").is_err());
        assert!(parse_hex("401130").is_err());
        assert!(parse_hex("0xzz").is_err());
        assert!(parse_hex("").is_err());
    }

    #[test]
    fn test_breakpoint_target_by_address() {
        assert_eq!(
            parse_breakpoint_target("0x401130").unwrap(),
            BreakpointTarget::Address(Addr::from(0x401130usize))
        );
    }

    #[test]
    fn test_breakpoint_target_by_source_line() {
        assert_eq!(
            parse_breakpoint_target("hello.c:7").unwrap(),
            BreakpointTarget::SourceLine("hello.c".to_string(), 7)
        );
        assert!(parse_breakpoint_target("hello.c:seven").is_err());
    }

    #[test]
    fn test_breakpoint_target_by_function() {
        assert_eq!(
            parse_breakpoint_target("main").unwrap(),
            BreakpointTarget::Function("main".to_string())
        );
    }
}
