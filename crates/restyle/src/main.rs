use env_logger::Env;
use log::error;
use restyle::config::RestyleConfig;
use restyle::orchestrator;
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RestyleConfig::from_env(env::args().nth(1)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    let default_filter = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    if !config.project_root.is_dir() {
        error!("project root {} does not exist", config.project_root.display());
        return ExitCode::from(1);
    }

    match orchestrator::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}
