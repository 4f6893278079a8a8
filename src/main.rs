use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use planboard::assistant::AssistantClient;
use planboard::cli::{Cli, Context};
use planboard::{BlobStore, Config, EventStore, MemoryBlobStore, NoteStore, Profile, SqliteBlobStore, TaskStore};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .wrap_err_with(|| format!("loading config from {}", path.display()))?,
        None => Config::load_with_profile(profile)?,
    };

    if let Err(e) = planboard::logging::init(&config.log_level) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    // One connection per store
    let open_backend = |ephemeral: bool| -> Result<Box<dyn BlobStore>> {
        if ephemeral {
            return Ok(Box::new(MemoryBlobStore::new()));
        }
        let db_path = config.get_database_path();
        let db_path = db_path
            .to_str()
            .ok_or_else(|| eyre!("Database path contains invalid UTF-8"))?;
        Ok(Box::new(SqliteBlobStore::new(db_path)?))
    };
    if cli.ephemeral {
        tracing::info!("using in-memory storage");
    }
    let task_backend = open_backend(cli.ephemeral)?;
    let event_backend = open_backend(cli.ephemeral)?;
    let note_backend = open_backend(cli.ephemeral)?;

    let assistant = AssistantClient::new(&config.assistant)?;
    let mut ctx = Context {
        tasks: TaskStore::open(task_backend),
        events: EventStore::open(event_backend),
        notes: NoteStore::open(note_backend),
        assistant,
        config,
        tz: chrono::Local,
    };

    planboard::cli::run(cli.command, &mut ctx)?;

    Ok(())
}
