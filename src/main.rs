use std::process::ExitCode;

fn main() -> ExitCode {
    match threatsmith::cli::run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(threatsmith::errors::get_exit_code(&e))
        }
    }
}
