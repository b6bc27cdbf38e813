use std::io;
use std::process;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::error;

use concierge::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    let log_level = match &args.command {
        Commands::Prepare(opts) => opts.common.effective_log_level(),
        Commands::Restore(opts) => opts.common.effective_log_level(),
        Commands::Status(opts) => opts.log_level,
        Commands::Completions(_) => cli::LogLevel::Error,
    };
    concierge::init_logging(log_level)?;

    let result = match args.command {
        Commands::Prepare(opts) => concierge::run_prepare(opts),
        Commands::Restore(opts) => concierge::run_restore(opts),
        Commands::Status(_) => concierge::run_status(),
        Commands::Completions(opts) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(opts.shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
