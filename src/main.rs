use std::process::ExitCode;

fn main() -> ExitCode {
    worktime_client::run()
}
