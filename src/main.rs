//
//  repo-migrator
//  main.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo_migrator::api::ApiError;
use repo_migrator::cli::{Cli, Commands};
use repo_migrator::exit_codes;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.global.verbose);

    // Execute command
    let result = run(cli).await;

    // Handle result and exit
    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(exit_code(&e));
        }
    }
}

/// Initialize logging based on environment
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("RMIG_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<ApiError>() {
        Some(ApiError::AuthFailed(_)) => exit_codes::AUTH_ERROR,
        Some(ApiError::SecondaryRateLimitExhausted { .. }) => exit_codes::RATE_LIMIT,
        _ => exit_codes::ERROR,
    }
}

/// Main command dispatcher
async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Api(cmd) => cmd.run(&cli.global).await,
        Commands::Count(cmd) => cmd.run(&cli.global).await,
        Commands::Upload(cmd) => cmd.run(&cli.global).await,
        Commands::Version => {
            println!("rmig version {}", repo_migrator::VERSION);
            Ok(())
        }
    }
}
