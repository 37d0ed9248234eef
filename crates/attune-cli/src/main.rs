use clap::{Parser, Subcommand};

mod views;

use views::App;

#[derive(Parser)]
#[command(
    name = "attune",
    about = "A conversational wellness companion — text chat, live voice sessions, and a session-note journal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Text conversation with the companion
    Chat,

    /// Start a live voice session
    Voice,

    /// Browse the session-note journal
    Journal {
        #[command(subcommand)]
        action: Option<JournalAction>,
    },

    /// Choose the companion's voice
    Settings,

    /// Toggle specialist attunement modules
    Attunements,

    /// Ambient atmosphere player
    Ambient {
        #[command(subcommand)]
        action: Option<AmbientAction>,
    },

    /// Show configuration and profile status
    Status,
}

#[derive(Subcommand)]
enum JournalAction {
    /// List archived notes, newest first
    List,
    /// Delete one note by its listed number
    Delete { number: usize },
    /// Delete every note
    Clear,
}

#[derive(Subcommand)]
enum AmbientAction {
    /// List available tracks
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(attune_core::config::Config::config_path);

    let config = attune_core::config::Config::load(&config_path)?;
    let mut app = App::open(config).await?;

    match cli.command {
        None => app.home().await?,
        Some(Commands::Chat) => app.chat().await?,
        Some(Commands::Voice) => app.voice().await?,
        Some(Commands::Journal { action }) => match action {
            None => app.journal().await?,
            Some(JournalAction::List) => app.journal_list().await?,
            Some(JournalAction::Delete { number }) => app.journal_delete(number).await?,
            Some(JournalAction::Clear) => app.journal_clear().await?,
        },
        Some(Commands::Settings) => app.settings().await?,
        Some(Commands::Attunements) => app.attunements().await?,
        Some(Commands::Ambient { action }) => match action {
            None => app.ambient().await?,
            Some(AmbientAction::List) => App::ambient_list(),
        },
        Some(Commands::Status) => {
            println!("Attune v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            app.status().await;
        }
    }

    Ok(())
}
