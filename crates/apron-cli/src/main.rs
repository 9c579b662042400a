use std::process::ExitCode;

fn main() -> ExitCode {
    match apron_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("apron: {err:#}");
            ExitCode::FAILURE
        }
    }
}
