use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    Authenticator, DefaultCredentialPolicy, HttpNotesBackend, MissingAuthenticator,
    MissingNoteSynchronizer, NoteSynchronizer, SignInDependencies, SignInEvent,
    SignInOrchestrator, SignInState, StoredSessionIdentity, UiEffect, SESSION_NAMESPACE,
};
use futures::StreamExt;
use shared::domain::{Note, NoteColor, NoteId, QueryParameters, SortOrder};
use storage::{MemoryStateStore, NoteCache, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, Settings};

#[derive(Parser, Debug)]
#[command(name = "notes", about = "Personal notes with account sync")]
struct Args {
    /// Notes backend base URL; without one the client works offline.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// Print note lists as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in, pull remote notes, and print the note list.
    SignIn {
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        password: String,
    },
    SignOut,
    List {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, value_enum, default_value_t = SortArg::Descending)]
        sort: SortArg,
    },
    /// Print the list again every time it changes, until interrupted.
    Watch {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, value_enum, default_value_t = SortArg::Descending)]
        sort: SortArg,
    },
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value = "yellow")]
        color: String,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Ascending,
    Descending,
}

impl From<SortArg> for SortOrder {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Ascending => SortOrder::Ascending,
            SortArg::Descending => SortOrder::Descending,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = load_settings()?;
    if let Some(server_url) = args.server_url {
        settings.server_url = Some(server_url);
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await?;
    storage.health_check().await?;
    let cache = storage.note_cache();

    match args.command {
        Command::SignIn { email, password } => {
            sign_in(&settings, &storage, email, password).await?;
            print_notes(&cache, &QueryParameters::default(), args.json).await?;
        }
        Command::SignOut => {
            backend(&settings, &storage)?
                .context("sign-out needs a server url")?
                .sign_out()
                .await?;
            println!("Signed out");
        }
        Command::List { search, sort } => {
            print_notes(&cache, &QueryParameters::new(search, sort.into()), args.json).await?;
        }
        Command::Watch { search, sort } => {
            watch_notes(&cache, QueryParameters::new(search, sort.into()), args.json).await?;
        }
        Command::Add {
            title,
            content,
            color,
        } => {
            let color: NoteColor = color.parse()?;
            let id = cache.insert(&Note::new(title, content, color)).await?;
            println!("Added note {id}");
        }
        Command::Edit {
            id,
            title,
            content,
            color,
        } => {
            let mut note = cache
                .get(NoteId(id))
                .await?
                .with_context(|| format!("note {id} not found"))?;
            if let Some(title) = title {
                note.title = title;
            }
            if let Some(content) = content {
                note.content = content;
            }
            if let Some(color) = color {
                note.color = color.parse()?;
            }
            note.touch();
            cache.update(&note).await?;
            println!("Updated note {id}");
        }
        Command::Delete { id } => match cache.get(NoteId(id)).await? {
            Some(note) => {
                cache.delete(&note).await?;
                println!("Deleted note {id}");
            }
            None => println!("Note {id} does not exist"),
        },
    }

    Ok(())
}

fn backend(settings: &Settings, storage: &Storage) -> Result<Option<HttpNotesBackend>> {
    let Some(server_url) = settings.server_url.as_deref() else {
        return Ok(None);
    };
    let backend = HttpNotesBackend::new(
        server_url,
        Arc::new(storage.state_store(SESSION_NAMESPACE)),
        storage.note_cache(),
    )?;
    Ok(Some(backend))
}

/// Drives the sign-in screen the way an interactive front end would.
async fn sign_in(
    settings: &Settings,
    storage: &Storage,
    email: String,
    password: String,
) -> Result<()> {
    let remote = backend(settings, storage)?;
    if remote.is_none() {
        info!("no server url configured; sign-in will fail offline");
    }
    let authenticator: Arc<dyn Authenticator> = match &remote {
        Some(remote) => Arc::new(remote.clone()),
        None => Arc::new(MissingAuthenticator),
    };
    let synchronizer: Arc<dyn NoteSynchronizer> = match remote {
        Some(remote) => Arc::new(remote),
        None => Arc::new(MissingNoteSynchronizer),
    };

    let (orchestrator, mut effects) = SignInOrchestrator::start(SignInDependencies {
        validator: Arc::new(DefaultCredentialPolicy::new(settings.min_password_len)),
        authenticator,
        synchronizer,
        session: Arc::new(StoredSessionIdentity::new(Arc::new(
            storage.state_store(SESSION_NAMESPACE),
        ))),
        // Credentials come from flags each run; never write them to the database.
        saved_state: Arc::new(MemoryStateStore::new()),
    })
    .await;

    if orchestrator.state().await == SignInState::Idle {
        if !email.is_empty() {
            orchestrator.on_event(SignInEvent::EmailChanged(email)).await;
        }
        if !password.is_empty() {
            orchestrator
                .on_event(SignInEvent::PasswordChanged(password))
                .await;
        }
        orchestrator.on_event(SignInEvent::SubmitRequested).await;
        orchestrator.wait_idle().await;
    }

    while let Some(effect) = effects.try_recv() {
        match effect {
            UiEffect::ShowProgress(true) => eprintln!("Signing in..."),
            UiEffect::ShowProgress(false) => {}
            UiEffect::ShowSnackbar(message) => eprintln!("{message}"),
            UiEffect::NavigateToNoteList => info!("showing note list"),
            UiEffect::NavigateToRegister => eprintln!("Create an account first"),
        }
    }

    let state = orchestrator.state().await;
    orchestrator.close().await;
    if state != SignInState::Ready {
        bail!("sign-in did not complete");
    }
    Ok(())
}

async fn print_notes(cache: &NoteCache, query: &QueryParameters, json: bool) -> Result<()> {
    let notes = cache.snapshot(query).await?;
    render(&notes, json)
}

async fn watch_notes(cache: &NoteCache, query: QueryParameters, json: bool) -> Result<()> {
    let mut updates = cache.observe_fixed(query);
    loop {
        tokio::select! {
            next = updates.next() => {
                let Some(notes) = next else {
                    return Ok(());
                };
                render(&notes?, json)?;
                println!("---");
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn render(notes: &[Note], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(notes)?);
        return Ok(());
    }
    if notes.is_empty() {
        println!("(no notes)");
    }
    for note in notes {
        let id = note.id.map(|id| id.to_string()).unwrap_or_default();
        println!("#{id:<4} [{:<6}] {}", note.color.as_str(), note.title);
    }
    Ok(())
}
