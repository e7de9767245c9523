mod config;
mod connectivity;
mod contact;
mod db;
mod detail;
mod error;
mod remote;
mod search;
mod sync;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use connectivity::ConnectivitySignal;
use contact::{Contact, PageEnvelope};
use db::{ContactStore, Database};
use remote::RandomUserRemote;
use sync::{ContactSyncController, SyncEvent};

#[derive(Parser, Debug)]
#[command(name = "rcontacts", version, about = "Browse randomuser.me contacts with an offline cache")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Never touch the network; serve everything from the cache
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Debug logging (overridden by RCONTACTS_LOG)
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load contacts and print them (name<TAB>email)
    List(PagesArgs),
    /// Load contacts, then print those matching TERM
    Search(SearchArgs),
    /// Drop the in-memory list and reload from page 0
    Refresh,
    /// Show one cached contact
    Show(ShowArgs),
    /// Import a saved page envelope (JSON) into the cache
    Import(ImportArgs),
    /// Remove every cached contact
    ClearCache,
    /// Keep a session open, reloading when connectivity comes back
    Watch,
}

#[derive(Args, Debug)]
struct PagesArgs {
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: u32,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Search term (matches full name or email)
    term: String,

    /// Search the whole cache instead of the loaded pages
    #[arg(long, default_value_t = false)]
    cached: bool,

    #[command(flatten)]
    pages: PagesArgs,
}

#[derive(Args, Debug)]
struct ShowArgs {
    email: String,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(value_name = "PATH")]
    input: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::load(cli.config.as_deref())?;
    info!(config = %config.config_path.display(), "configuration loaded");

    match cli.command {
        Command::List(args) => {
            let mut session = Session::start(&config, cli.offline).await?;
            session.load_pages(args.pages).await;
            print_contacts(session.controller.filtered_contacts());
        }
        Command::Search(args) if args.cached => {
            let db = Database::open(&config.cache.db_path)?;
            let hits = db.search(&args.term)?;
            if hits.is_empty() {
                println!("No matches for \"{}\"", args.term);
            } else {
                print_contacts(&hits);
            }
        }
        Command::Search(args) => {
            let mut session = Session::start(&config, cli.offline).await?;
            session.load_pages(args.pages.pages).await;
            session.controller.filter(&args.term);
            session.drain_events();
            let hits = session.controller.filtered_contacts();
            if hits.is_empty() {
                println!("No matches for \"{}\"", args.term);
            } else {
                print_contacts(hits);
            }
        }
        Command::Refresh => {
            let mut session = Session::start(&config, cli.offline).await?;
            session.controller.refresh();
            session.settle().await;
            print_contacts(session.controller.filtered_contacts());
        }
        Command::Show(args) => {
            let db = Database::open(&config.cache.db_path)?;
            match db.get_contact(&args.email)? {
                Some(cached) => print!("{}", detail::render(&cached.contact, Some(cached.last_updated))),
                None => anyhow::bail!("no cached contact with email {}", args.email),
            }
        }
        Command::Import(args) => {
            let raw = fs::read(&args.input)
                .with_context(|| format!("failed to read {}", args.input.display()))?;
            let page: PageEnvelope = serde_json::from_slice(&raw)
                .map_err(|e| error::SyncError::decode(&e))
                .with_context(|| format!("failed to parse {}", args.input.display()))?;
            let mut db = Database::open(&config.cache.db_path)?;
            let imported = db.import(&page.results)?;
            println!("Imported {} contacts.", imported);
        }
        Command::ClearCache => {
            let mut db = Database::open(&config.cache.db_path)?;
            let count = db.count()?;
            db.clear_all()?;
            println!("Removed {} cached contacts.", count);
        }
        Command::Watch => {
            let mut session = Session::start(&config, cli.offline).await?;
            session.watch(&config, cli.offline).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rcontacts=debug" } else { "rcontacts=info" };
    let filter = EnvFilter::try_from_env("RCONTACTS_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_contacts(contacts: &[Contact]) {
    for c in contacts {
        println!("{}\t{}", c.full_name(), c.email);
    }
}

/// CLI stand-in for the presentation layer: owns the controller and reports
/// its events.
struct Session {
    controller: ContactSyncController,
    events: UnboundedReceiver<SyncEvent>,
    signal: ConnectivitySignal,
}

impl Session {
    async fn start(config: &Config, offline: bool) -> Result<Self> {
        let online = if offline {
            false
        } else {
            match remote::probe_target(&config.api.base_url) {
                Some(target) => connectivity::probe(&target, config.connectivity.probe_timeout).await,
                None => false,
            }
        };
        if !online && !offline {
            warn!("{} is unreachable, working from the cache", config.api.base_url);
        }
        let signal = ConnectivitySignal::new(online);

        let fetcher = Arc::new(RandomUserRemote::new(&config.api)?);
        let store = Database::open(&config.cache.db_path)?;
        let mut controller = ContactSyncController::new(
            fetcher,
            Box::new(store),
            Arc::new(signal.clone()),
            config.sync,
        );
        let events = controller.subscribe();

        Ok(Self {
            controller,
            events,
            signal,
        })
    }

    /// Load the first page, then keep scrolling to the end until `pages`
    /// pages are loaded or nothing new arrives.
    async fn load_pages(&mut self, pages: u32) {
        self.controller.load_initial();
        self.settle().await;

        for _ in 1..pages.max(1) {
            if !self.controller.has_more_data() {
                break;
            }
            let before = self.controller.contacts().len();
            let last = self.controller.filtered_contacts().len().saturating_sub(1);
            self.controller.load_more_if_needed(last);
            self.settle().await;
            if self.controller.contacts().len() == before {
                break;
            }
        }
        info!(
            next_page = self.controller.current_page(),
            contacts = self.controller.contacts().len(),
            "loading finished"
        );
    }

    async fn settle(&mut self) {
        self.controller.settle().await;
        self.drain_events();
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            report(&event);
        }
    }

    async fn watch(&mut self, config: &Config, offline: bool) -> Result<()> {
        let mut restored = self.signal.restored();
        let probe = if offline {
            None
        } else {
            remote::probe_target(&config.api.base_url).map(|target| {
                connectivity::spawn_probe(
                    self.signal.clone(),
                    target,
                    config.connectivity.probe_interval,
                    config.connectivity.probe_timeout,
                )
            })
        };

        self.controller.load_initial();
        self.drain_events();

        loop {
            tokio::select! {
                Some(completion) = self.controller.next_completion() => {
                    self.controller.handle_completion(completion);
                    self.drain_events();
                    if !self.controller.is_loading() {
                        println!("{} contacts loaded", self.controller.contacts().len());
                    }
                }
                Some(()) = restored.recv() => {
                    self.controller.on_connectivity_restored();
                    self.drain_events();
                }
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for Ctrl-C")?;
                    break;
                }
            }
        }

        if let Some(handle) = probe {
            handle.abort();
        }
        Ok(())
    }
}

fn report(event: &SyncEvent) {
    match event {
        SyncEvent::DataChanged | SyncEvent::LoadingChanged(_) => {
            tracing::debug!(?event, "sync event");
        }
        SyncEvent::Error(err) => eprintln!("warning: {}", err),
    }
}
