use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_cli::commands::{aggregate, import, ingest, regenerate, rules, status, summary, util};
use tally_cli::{AliasAction, Cli, Commands, Config, MappingAction};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init: tests may have installed a subscriber already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    let engine = util::open_engine(&config)?;

    match command {
        Commands::Ingest { user } => {
            ingest::run(&engine, user).await?;
        }
        Commands::Import { user, file, origin } => {
            import::run(&engine, &user, &file, &origin).await?;
        }
        Commands::Summary(args) => {
            summary::run(&mut io::stdout().lock(), &engine, &args).await?;
        }
        Commands::Aggregate => {
            aggregate::run(&engine).await?;
        }
        Commands::Serve => aggregate::serve(&engine).await?,
        Commands::Regenerate { user } => {
            regenerate::run(&engine, &user).await?;
        }
        Commands::Alias(AliasAction::Add {
            user,
            category,
            key,
            value,
        }) => rules::add_alias(&engine, user, category, &key, &value).await?,
        Commands::Mapping(MappingAction::Add {
            user,
            extension,
            language,
            backfill,
        }) => rules::add_mapping(&engine, user, &extension, &language, backfill).await?,
        Commands::BackfillLanguage { user } => {
            rules::backfill(&engine, &user).await?;
        }
        Commands::DeleteUser { user } => {
            regenerate::delete_user(&engine, &user).await?;
        }
        Commands::Status => {
            status::run(&mut io::stdout().lock(), &engine, &config).await?;
        }
    }

    Ok(())
}
