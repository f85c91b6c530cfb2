//! calview: watch and edit a Google Calendar schedule through the calendar backend
//!
//! Usage:
//!   calview watch                       # Live schedule, refreshed in the background
//!   calview list --filter appointments  # One-shot listing
//!   calview calendars                   # Calendars and profile
//!   calview create --title ... --start ... --end ...
//!   calview delete <id>...              # Delete one or more items
//!   calview config                      # Show resolved configuration

use anyhow::{Context, Result};
use calview::classifier::parse_timestamp;
use calview::config::{self, SyncConfig};
use calview::gateway::{DynGateway, HttpGateway};
use calview::model::{CalendarItem, FilterKind, ItemKind, ItemPatch, ItemSpec, Timestamp};
use calview::projector::ScheduleGroup;
use calview::session::{SessionMessage, SessionOptions, SyncSession};
use calview::SyncError;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "calview")]
#[command(about = "Watch and edit Google Calendar events and tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Signed-in user (overrides user_email from the config)
    #[arg(short, long, global = true)]
    email: Option<String>,

    /// Calendar to scope events to (overrides calendar_id from the config)
    #[arg(short, long, global = true)]
    calendar: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    debuglogfile: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schedule and keep it up to date until Ctrl-C
    Watch {
        #[arg(short, long, default_value_t = FilterKind::All)]
        filter: FilterKind,
    },

    /// Fetch once and print the schedule and tasks
    List {
        #[arg(short, long, default_value_t = FilterKind::All)]
        filter: FilterKind,

        /// Skip the task list
        #[arg(long)]
        no_tasks: bool,
    },

    /// List calendars and the signed-in profile
    Calendars,

    /// Create an event, appointment or task
    Create {
        #[arg(short, long, default_value_t = ItemKind::Event)]
        kind: ItemKind,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Start time (RFC 3339, or YYYY-MM-DDTHH:MM in UTC)
        #[arg(long, value_parser = parse_time)]
        start: Option<Timestamp>,

        #[arg(long, value_parser = parse_time)]
        end: Option<Timestamp>,

        /// Due date of a task (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,

        /// Attach a video conference link
        #[arg(long)]
        meet: bool,

        /// Invite an attendee (repeatable)
        #[arg(short, long = "attendee")]
        attendees: Vec<String>,
    },

    /// Change fields of an existing event
    Update {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long, value_parser = parse_time)]
        start: Option<Timestamp>,

        #[arg(long, value_parser = parse_time)]
        end: Option<Timestamp>,

        /// Replace the attendee list (repeatable)
        #[arg(short, long = "attendee")]
        attendees: Vec<String>,
    },

    /// Delete events or tasks by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show current configuration
    Config,
}

fn parse_time(value: &str) -> std::result::Result<Timestamp, String> {
    parse_timestamp(value).ok_or_else(|| format!("cannot parse '{}' as a time", value))
}

fn init_logger(filter_level: log::LevelFilter, logfile: Option<PathBuf>) -> Result<()> {
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        filter_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )];
    if let Some(filename) = logfile {
        let file = File::create(&filename)
            .with_context(|| format!("cannot create log file {}", filename.display()))?;
        loggers.push(simplelog::WriteLogger::new(
            filter_level,
            simplelog::Config::default(),
            file,
        ));
    }
    simplelog::CombinedLogger::init(loggers)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose.log_level_filter(), cli.debuglogfile.clone())?;

    let loaded = config::load_config()?;
    let mut sync_config = loaded.config;
    if let Some(calendar) = &cli.calendar {
        sync_config.calendar_id = calendar.clone();
    }

    let email = cli.email.clone();
    let connect = || -> Result<(Arc<DynGateway>, SessionOptions)> {
        let email = email
            .clone()
            .or_else(|| sync_config.user_email.clone())
            .context("no user e-mail: pass --email or set user_email under [sync] in calview.toml")?;
        let gateway: Arc<DynGateway> = Arc::new(HttpGateway::new(&sync_config)?);
        Ok((gateway, SessionOptions::from_config(&sync_config, email)))
    };

    match cli.command {
        Commands::Config => print_config(&sync_config, loaded.path),

        Commands::Watch { filter } => {
            let (gateway, options) = connect()?;
            watch(gateway, options.with_filter(filter)).await?
        }

        Commands::List { filter, no_tasks } => {
            let (gateway, options) = connect()?;
            let session = SyncSession::new(gateway, options.with_filter(filter));
            report_refresh(session.refresh(false).await)?;
            print_schedule(&session.schedule());
            if !no_tasks {
                print_tasks(&session);
            }
        }

        Commands::Calendars => {
            let (gateway, options) = connect()?;
            let session = SyncSession::new(gateway, options);
            report_refresh(session.refresh_all(false).await)?;
            if let Some(profile) = session.profile() {
                println!("👤 {} <{}>", profile.display_name, profile.email);
                println!();
            }
            let active = session.active_calendar_id();
            for calendar in session.calendars() {
                let marker = if calendar.id == active { "*" } else { " " };
                let primary = if calendar.is_primary { " (primary)" } else { "" };
                println!("{} {}{}  [{}]", marker, calendar.display_name, primary, calendar.id);
            }
        }

        Commands::Create {
            kind,
            title,
            description,
            start,
            end,
            due,
            meet,
            attendees,
        } => {
            let spec = ItemSpec {
                description,
                start_at: start,
                end_at: end,
                due_at: due,
                add_meet: meet,
                attendees,
                ..ItemSpec::new(kind, title)
            };
            let (gateway, options) = connect()?;
            let session = SyncSession::new(gateway, options);
            let item = session.create_item(spec).await?;
            println!("✅ Created {} {}", kind, item.id());
            print_item(&item);
        }

        Commands::Update {
            id,
            title,
            description,
            start,
            end,
            attendees,
        } => {
            let patch = ItemPatch {
                title,
                description,
                start_at: start,
                end_at: end,
                attendees: (!attendees.is_empty()).then_some(attendees),
            };
            let (gateway, options) = connect()?;
            let session = SyncSession::new(gateway, options);
            match session.update_item(&id, patch).await? {
                Some(item) => {
                    println!("🔄 Updated {}", id);
                    print_item(&item);
                }
                None => println!("⏭️  {} no longer exists", id),
            }
        }

        Commands::Delete { ids } => {
            let (gateway, options) = connect()?;
            let session = SyncSession::new(gateway, options);
            delete(&session, ids).await?;
        }
    }

    Ok(())
}

async fn watch(gateway: Arc<DynGateway>, options: SessionOptions) -> Result<()> {
    let session = SyncSession::new(gateway, options);
    let mut messages = session.subscribe();
    if let Err(err) = session.refresh(false).await {
        log::warn!("initial refresh failed: {}", err);
    }
    session.start_polling();
    let mut shown = session.schedule();
    print_schedule(&shown);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = messages.recv() => match message {
                Ok(SessionMessage::ScheduleChanged) => {
                    // every poll reprojects; only print real changes
                    let schedule = session.schedule();
                    if schedule != shown {
                        println!();
                        print_schedule(&schedule);
                        shown = schedule;
                    }
                }
                Ok(SessionMessage::RefreshFailed { epoch, failures }) => {
                    for failure in failures {
                        eprintln!("⚠️  refresh #{}: {}", epoch, failure);
                    }
                }
                Ok(SessionMessage::TornDown) | Err(RecvError::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("skipped {} session messages", skipped);
                }
            },
        }
    }

    session.teardown().await;
    Ok(())
}

async fn delete(session: &SyncSession, ids: Vec<String>) -> Result<()> {
    if let [id] = ids.as_slice() {
        session.delete_item(id).await?;
        println!("🗑️  Deleted {}", id);
        return Ok(());
    }

    // only scheduled events are selectable; anything else goes one by one
    report_refresh(session.refresh(false).await)?;
    let mut singles = Vec::new();
    for id in ids {
        if !session.toggle_selection(&id)? {
            singles.push(id);
        }
    }

    let mut failed = 0;
    match session.delete_selected().await {
        Ok(report) if report.total > 0 => println!("🗑️  Deleted {} selected items", report.deleted),
        Ok(_) => {}
        Err(SyncError::BulkDelete { failed: ids, total }) => {
            println!("⚠️  {} of {} deletions failed:", ids.len(), total);
            for id in &ids {
                println!("  - {}", id);
            }
            failed += ids.len();
        }
        Err(err) => return Err(err.into()),
    }
    for id in singles {
        match session.delete_item(&id).await {
            Ok(()) => println!("🗑️  Deleted {}", id),
            Err(err) => {
                println!("⚠️  {}: {}", id, err);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} deletions failed", failed);
    }
    Ok(())
}

/// Partial refresh failures are printed, not fatal.
fn report_refresh<T>(result: calview::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(SyncError::PartialRefresh { failures, .. }) => {
            for failure in failures {
                eprintln!("⚠️  {}", failure);
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_schedule(groups: &[ScheduleGroup]) {
    if groups.is_empty() {
        println!("📭 Nothing scheduled");
        return;
    }
    for group in groups {
        println!("📅 {}", group.date_key);
        for item in &group.items {
            print_item(item);
        }
    }
}

fn print_item(item: &CalendarItem) {
    match item {
        CalendarItem::Event(event) => {
            let when = match (event.start_at, event.end_at) {
                _ if event.is_all_day => "all day".to_string(),
                (Some(start), Some(end)) => {
                    format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"))
                }
                _ => "?".to_string(),
            };
            let badge = if event.is_appointment() { " 👥" } else { "" };
            println!("  {:<13} {}{}  [{}]", when, event.title, badge, event.id);
            if let Some(link) = &event.conference_link {
                println!("  {:<13} {}", "", link);
            }
        }
        CalendarItem::Task(task) => {
            let due = task
                .due_at
                .map(|due| format!("due {}", due.format("%Y-%m-%d")))
                .unwrap_or_else(|| "no due date".to_string());
            println!("  {:<13} {}  [{}]", due, task.title, task.id);
        }
    }
}

fn print_tasks(session: &SyncSession) {
    let tasks = session.tasks();
    if tasks.is_empty() {
        return;
    }
    println!();
    println!("✅ Tasks");
    for task in tasks {
        print_item(&CalendarItem::Task(task));
    }
}

fn print_config(config: &SyncConfig, path: Option<PathBuf>) {
    println!("📋 Current configuration:");
    println!();
    match path {
        Some(path) => println!("Config file: {:?}", path),
        None => match config::resolve_config_path() {
            Ok(path) => println!("Config file: {:?} (not found, using defaults)", path),
            Err(err) => println!("Config file: ({})", err),
        },
    }
    println!();
    println!("[sync]");
    println!("backend_url = \"{}\"", config.backend_url);
    println!(
        "user_email = {}",
        config.user_email.as_deref().unwrap_or("(not set)")
    );
    println!("calendar_id = \"{}\"", config.calendar_id);
    println!("poll_interval_ms = {}", config.poll_interval_ms);
    println!("request_timeout_secs = {}", config.request_timeout_secs);
    println!(
        "timezone = {:?}",
        config.timezone.as_deref().unwrap_or("(backend default)")
    );
}
