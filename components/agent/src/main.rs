//! Binary entry point of the edge stream supervisor.

fn main() -> Result<(), courtstream_agent::cli::Failure> {
    courtstream_agent::run()
}
