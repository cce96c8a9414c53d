/// Tempo CLI
///
/// Runs and inspects tempo scripts from the command line.

use tempo_core::cli;

fn main() {
    match cli::run_cli() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
