use std::process::ExitCode;

fn main() -> ExitCode {
    match crucibled::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("crucibled: {error}");
            ExitCode::FAILURE
        }
    }
}
