use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

use skooma::object;
use skooma::std_lib;
use skooma::vm::{LogLevel, VirtualMachine};

#[derive(Parser)]
#[command(name = "skooma")]
#[command(version = "0.1")]
#[command(about = "Skooma: a small bytecode-compiled scripting language", long_about = None)]
struct Cli {
    /// Script to run. Omit to start a REPL.
    path: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    log_level: LogLevel,
}

/// Prints final heap stats when it drops, in `trace` mode -- a `Drop`-based
/// diagnostic dump that fires whether `run`/`interpret` returned normally or
/// the process is unwinding past an early `exit`.
struct TraceGuard {
    log_level: LogLevel,
    vm_ptr: *const VirtualMachine,
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if self.log_level == LogLevel::Trace {
            let vm = unsafe { &*self.vm_ptr };
            eprintln!("skooma: trace: {} global(s) defined", vm.globals.values.len());
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let mut vm = VirtualMachine::new(cli.log_level);
    std_lib::install(&mut vm);

    match cli.path {
        Some(path) => run_file(&mut vm, &path),
        None => run_repl(&mut vm),
    }
}

fn run_file(vm: &mut VirtualMachine, path: &PathBuf) {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("skooma: can't open '{}': {e}", path.display());
            std::process::exit(74);
        }
    };
    run_source(vm, &source, true);
}

/// Compiles and runs `source`, disassembling the top-level chunk first in
/// `trace` mode, and exiting the process with `InterpretError::exit_code()`
/// on failure when `exit_on_error` is set (the REPL keeps going instead).
fn run_source(vm: &mut VirtualMachine, source: &str, exit_on_error: bool) {
    let _guard = TraceGuard { log_level: vm.log_level, vm_ptr: vm as *const VirtualMachine };
    let function = match vm.compile(source) {
        Ok(f) => f,
        Err(errors) => {
            for e in &errors {
                eprintln!("{e}");
            }
            if exit_on_error {
                std::process::exit(65);
            }
            return;
        }
    };
    if vm.log_level == LogLevel::Trace {
        let chunk = unsafe { &object::as_function(function).data.chunk };
        eprint!("{}", chunk.disassemble(&object::function_display_name(function)));
    }
    if let Err(err) = vm.interpret_function(function) {
        eprintln!("{err}");
        if exit_on_error {
            std::process::exit(err.exit_code());
        }
    }
}

/// Reads one line at a time, per `spec.md` §6 ("Without an argument, start a
/// REPL reading one line at a time"); each line is compiled and run against
/// the same `VirtualMachine`, so globals accumulate across the session.
fn run_repl(vm: &mut VirtualMachine) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("skooma> ");
        if io::stdout().flush().is_err() {
            return;
        }
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => run_source(vm, &line, false),
            Err(e) => {
                eprintln!("skooma: error reading stdin: {e}");
                return;
            }
        }
    }
}
