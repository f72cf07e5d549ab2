#![forbid(unsafe_code)]

//! replsync: periodic one-way directory mirror, CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout with success; usage errors are user errors.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    if let Err(e) = cli_app::run(&args) {
        eprintln!("replsync: {e}");
        std::process::exit(e.exit_code());
    }
}
