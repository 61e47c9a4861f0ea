use clap::Parser;
use mr_coverage_lib::config::Config;
use simplelog::{ColorChoice, TermLogger, TerminalMode};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let level = match config.log_level_filter() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    if let Err(e) = config.validate() {
        log::error!("[startup] Invalid configuration: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = mr_coverage_lib::run(config).await {
        log::error!("[startup] {}", e);
        std::process::exit(1);
    }
}
