mod chunk;
mod cli_reporter;
mod compiler;
mod debug;
mod operators;
mod reporter;
mod token;
mod tokenizer;
mod value;
mod vm;

use cli_reporter::CliReporter;
use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use vm::{RunOutcome, Vm};

/// Runs the full pipeline against already-read source, writing program output to
/// `out`. Split out from `main` so tests can inject a buffer instead of stdout.
fn run_source<W: Write>(source: &str, reporter: &mut CliReporter, out: W) -> Result<(), ()> {
    let (chunk, interner) = compiler::compile(source, reporter)?;
    match Vm::new(&chunk, interner, out).run() {
        RunOutcome::Success => Ok(()),
        RunOutcome::Failure(err) => {
            eprintln!("error: {}", err.0);
            Err(())
        }
    }
}

fn main() -> ExitCode {
    let mut args = env::args();
    let _binary = args.next();
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: qjlang <path>");
            return ExitCode::from(exitcode::USAGE as u8);
        }
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read '{path}': {e}");
            return ExitCode::from(exitcode::IOERR as u8);
        }
    };

    let mut reporter = CliReporter::new();
    let stdout = io::stdout();
    match run_source(&source, &mut reporter, stdout.lock()) {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(()) => ExitCode::from(exitcode::USAGE as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(source: &str) -> (Result<(), ()>, String) {
        let mut reporter = CliReporter::new();
        let mut buf = Vec::new();
        let result = run_source(source, &mut reporter, &mut buf);
        (result, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn scenario_arithmetic_precedence() {
        let (result, out) = capture("print 1 + 2 * 3;");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "7");
    }

    #[test]
    fn scenario_function_call_with_global_capture() {
        let (result, out) =
            capture("Global x = 10; def inc(a){ return a + x; } lprint inc(5);");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "15\n");
    }

    #[test]
    fn scenario_string_compound_assign() {
        let (result, out) = capture(r#"Global s = "hi"; s += " there"; print s;"#);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "hi there");
    }

    #[test]
    fn scenario_while_loop() {
        let (result, out) = capture("Global n = 0; while (n < 3) { n += 1; lprint n; }");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "1\n2\n3\n");
    }

    #[test]
    fn scenario_recursive_fibonacci() {
        let (result, out) = capture(
            "def fib(n){ if (n<2) { return n; } return fib(n-1)+fib(n-2); } lprint fib(7);",
        );
        assert_eq!(result, Ok(()));
        assert_eq!(out, "13\n");
    }

    #[test]
    fn scenario_groups_do_not_scope() {
        let (result, out) = capture("Global x = 1; if (True) { Global x = 2; } lprint x;");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "2\n");
    }

    #[test]
    fn compile_failure_is_reported_as_error() {
        let (result, _out) = capture("print 1 +;");
        assert_eq!(result, Err(()));
    }
}
