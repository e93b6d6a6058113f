//! CLI embedding: run a script file, an inline statement, or stdin.
//!
//! Exit codes: 0 success, 1 runtime error, 2 initialization/usage error.

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};

use lumo::{Interpreter, LuaError};

fn usage(program: &str) {
    eprintln!("usage: {} [options] [script [args]]", program);
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -         execute stdin");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("lumo")
        .to_string();

    let (source, chunk_name, script_args) = match read_input(&args) {
        Ok(Some(input)) => input,
        Ok(None) => {
            usage(&program);
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("{}: {:#}", program, e);
            return ExitCode::from(2);
        }
    };

    let mut interp = Interpreter::new();
    let chunk = match interp.load_source(&source, &chunk_name, None) {
        Ok(c) => c,
        Err(e) => {
            report_error(&program, &e);
            return ExitCode::from(1);
        }
    };
    // Script arguments arrive as the chunk's `...`.
    let argv: Vec<lumo::Value> = script_args
        .into_iter()
        .map(lumo::Value::string)
        .collect();
    match interp.call_value(chunk, argv) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&program, &e);
            ExitCode::from(1)
        }
    }
}

/// Resolves the CLI arguments to (source bytes, chunk name, script args).
fn read_input(args: &[String]) -> Result<Option<(Vec<u8>, String, Vec<String>)>> {
    match args.get(1).map(String::as_str) {
        Some("-e") => {
            let stat = args.get(2).context("'-e' needs argument")?;
            Ok(Some((
                stat.clone().into_bytes(),
                "=(command line)".to_string(),
                args.get(3..).unwrap_or_default().to_vec(),
            )))
        }
        Some("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("cannot read stdin")?;
            Ok(Some((
                buf,
                "=stdin".to_string(),
                args.get(2..).unwrap_or_default().to_vec(),
            )))
        }
        Some(path) if !path.starts_with('-') => {
            let source =
                std::fs::read(path).with_context(|| format!("cannot open {}", path))?;
            Ok(Some((
                source,
                format!("@{}", path),
                args.get(2..).unwrap_or_default().to_vec(),
            )))
        }
        _ => Ok(None),
    }
}

fn report_error(program: &str, e: &LuaError) {
    eprintln!("{}: {}", program, e.message());
    let trace = e.traceback();
    if !trace.is_empty() {
        eprintln!("stack traceback:");
        for frame in trace {
            eprintln!("{}", frame);
        }
    }
}
