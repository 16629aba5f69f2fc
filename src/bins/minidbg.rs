use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use nix::sys::ptrace;
use nix::unistd::{execv, fork, ForkResult, Pid};
use tracing::{debug, error};

use minidbg::debugger::Debugger;
use minidbg::errors::{DebuggerError, Result};
use minidbg::ui::cli::CliUi;

/// Launch an executable under the debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to debug
    target: PathBuf,
}

fn main() {
    setup_logger();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            exit(-1);
        }
    };

    if let Err(e) = launch(&args.target) {
        error!("{e}");
        exit(-1);
    }
}

/// Fork off the debuggee: the child asks to be traced and execs the
/// target, the parent runs the command loop on it.
fn launch(target: &Path) -> Result<()> {
    if !target.exists() {
        return Err(DebuggerError::ExecutableDoesNotExist(
            target.to_string_lossy().to_string(),
        ));
    }
    if !target.is_file() {
        return Err(DebuggerError::ExecutableIsNotAFile(
            target.to_string_lossy().to_string(),
        ));
    }

    match unsafe { fork() }? {
        ForkResult::Parent { child } => run_debugger(target, child),
        ForkResult::Child => {
            let path = CString::new(target.to_string_lossy().to_string())?;
            ptrace::traceme().inspect_err(|e| eprintln!("error while doing traceme: {e}"))?;
            execv(&path, &[path.clone()])?;
            unreachable!()
        }
    }
}

fn run_debugger(target: &Path, child: Pid) -> Result<()> {
    debug!("debuggee has pid {child}");
    let ui = CliUi::build()?;
    let mut debugger = Debugger::build(target, child, ui)?;
    let result = debugger.run();
    debugger.cleanup()?;
    result
}

fn setup_logger() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
