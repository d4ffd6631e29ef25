use std::process::ExitCode;

use credhub_cli::{commands, config};

#[tokio::main]
async fn main() -> ExitCode {
    let (config, command) = match config::Config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(6);
        }
    };

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(
        config_dir = %config.config_dir.display(),
        interactive = config.interactive,
        "Configuration loaded"
    );

    match commands::execute(&config, command).await {
        Ok(output) => {
            println!("{}", output.render());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!(exit_code = e.exit_code(), "Command failed");
            eprintln!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
