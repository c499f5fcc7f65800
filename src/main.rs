use azure_audit::cli::Cli;
use clap::Parser;
use colored::Colorize;
use std::process;

/// Exit code for invalid arguments, shared with validation errors.
const USAGE_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // help and version go to stdout and exit 0
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            if let Err(io_err) = e.print() {
                eprintln!("{} {} ({})", "error:".red().bold(), e, io_err);
            }
            process::exit(USAGE_EXIT_CODE);
        }
    };

    cli.init_logging();

    match azure_audit::run_command(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process::exit(e.exit_code());
        }
    }
}
