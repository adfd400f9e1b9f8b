use clap::{Parser, Subcommand};
use std::path::PathBuf;

use claimwatch::{awake, config, consumer, producer, supervisor, ticket};

#[derive(Parser)]
#[command(name = "claimwatch")]
#[command(about = "Background service suite for the claim intake pipeline", long_about = None)]
struct Cli {
    /// Settings file (YAML). Defaults to ./claimwatch.yaml when present.
    #[arg(long, global = true, value_name = "CONFIG_YAML")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the supervisor and every background service in one console")]
    Run,
    #[command(about = "Watch the mail store and queue tickets (the conditional worker)")]
    Watch,
    #[command(about = "Drain the ticket queue and run the downstream job once per ticket")]
    Read,
    #[command(about = "Hold the system awake while running")]
    Awake,
    #[command(about = "Drop one ticket into the queue by hand")]
    Ticket,
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let settings = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => supervisor::entry(settings, cli.config),
        Commands::Watch => producer::entry(settings),
        Commands::Read => consumer::entry(settings),
        Commands::Awake => awake::entry(settings),
        Commands::Ticket => {
            let path = ticket::create(&settings.queue_dir)?;
            println!("queued {}", path.display());
            Ok(())
        }
    }
}
