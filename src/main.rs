use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskdash::auth::{AuthProvider, StaticAuth};
use taskdash::backend::{DataStore, MemoryDataStore, RestDataStore};
use taskdash::bus::Bus;
use taskdash::config::{self, Config};
use taskdash::coordinator::MutationOutcome;
use taskdash::logging;
use taskdash::model::{Role, Status, Task};
use taskdash::notifications::{Notification, NotificationQueue};
use taskdash::permissions::Viewer;
use taskdash::realtime::JsonLinesFeed;
use taskdash::storage::{FileSlot, KeyValueSlot, MemorySlot};
use taskdash::view::{self, ListFilter};
use taskdash::{SessionOptions, SyncSession};

#[derive(Parser, Debug)]
#[command(name = "taskdash")]
#[command(version = env!("TASKDASH_VERSION"))]
#[command(about = "Realtime task dashboard client")]
struct Args {
    /// Write debug lines to the log file
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the visible tasks and print them with stats
    Tasks {
        /// Only tasks with this status (todo, in_progress, done)
        #[arg(long)]
        status: Option<String>,

        /// Case-insensitive match on title and description
        #[arg(long)]
        search: Option<String>,

        /// Only tasks assigned to this user id
        #[arg(long)]
        assignee: Option<String>,
    },

    /// Feed recorded change events (one JSON object per line) through a session
    Replay {
        file: PathBuf,

        /// Viewer id (defaults to the configured user)
        #[arg(long)]
        user: Option<String>,

        #[arg(long, value_enum, default_value = "employee")]
        role: RoleArg,

        /// Keep the resulting notifications in the persisted queue
        #[arg(long)]
        persist: bool,
    },

    /// Show the persisted notification queue
    Notifications,

    /// Dismiss one notification
    Dismiss { id: String },

    /// Mark every notification for a task as read
    Read { task_id: String },

    /// Change a task's status
    Status { task_id: String, status: String },

    /// Flag or unflag a task as urgent
    Urgent { task_id: String, flag: Toggle },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Employee,
    Manager,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Employee => Role::Employee,
            RoleArg::Manager => Role::Manager,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.trace {
        // SAFETY: still single-threaded; the runtime is built below.
        unsafe { std::env::set_var("TASKDASH_TRACE", "1") };
    }

    logging::init();
    logging::cleanup_old_logs();
    logging::info("taskdash starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    if let Err(e) = runtime.block_on(run_main(args)) {
        logging::error(&format!("{:?}", e));
        return Err(e);
    }
    Ok(())
}

async fn run_main(args: Args) -> Result<()> {
    let cfg = config::config();

    match args.command {
        Command::Tasks {
            status,
            search,
            assignee,
        } => {
            let status = status
                .map(|s| s.parse::<Status>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let filter = ListFilter {
                status,
                assignee,
                search,
            };
            run_tasks(cfg, &filter).await?;
        }
        Command::Replay {
            file,
            user,
            role,
            persist,
        } => {
            run_replay(cfg, &file, user, role.into(), persist).await?;
        }
        Command::Notifications => {
            let queue = open_queue(cfg)?;
            print_notifications(queue.visible(), queue.queued());
        }
        Command::Dismiss { id } => {
            let mut queue = open_queue(cfg)?;
            if !queue.dismiss(&id) {
                anyhow::bail!("No notification with id {}", id);
            }
            println!("Dismissed {}", id);
        }
        Command::Read { task_id } => {
            let mut queue = open_queue(cfg)?;
            let marked = queue.mark_task_read(&task_id);
            println!("Marked {} notification(s) read", marked);
        }
        Command::Status { task_id, status } => {
            let status = status.parse::<Status>().map_err(anyhow::Error::msg)?;
            let session = connect(cfg).await?;
            session.load().await?;
            let outcome = session.set_status(&task_id, status).await?;
            report(&task_id, outcome);
        }
        Command::Urgent { task_id, flag } => {
            let session = connect(cfg).await?;
            session.load().await?;
            let outcome = session
                .set_urgent(&task_id, matches!(flag, Toggle::On))
                .await?;
            report(&task_id, outcome);
        }
        Command::Config { init } => {
            if init {
                let path = Config::create_default_config_file()?;
                println!("Config file: {}", path.display());
            }
            println!("{}", cfg.display_string());
        }
    }

    Ok(())
}

fn open_queue(cfg: &Config) -> Result<NotificationQueue> {
    let slot = FileSlot::in_home(&cfg.notifications.store_file)?;
    Ok(NotificationQueue::restore(
        cfg.notifications.max_visible,
        Box::new(slot),
    ))
}

async fn connect(cfg: &Config) -> Result<SyncSession> {
    let auth = Arc::new(StaticAuth::from_config(&cfg.backend));
    let backend = Arc::new(RestDataStore::new(&cfg.backend, auth.clone())?);
    let slot = FileSlot::in_home(&cfg.notifications.store_file)?;
    SyncSession::connect(
        auth.as_ref(),
        backend,
        Box::new(slot),
        SessionOptions::from_config(cfg),
        Bus::default(),
    )
    .await
}

async fn run_tasks(cfg: &Config, filter: &ListFilter) -> Result<()> {
    let session = connect(cfg).await?;
    session.load().await?;

    let tasks = session.sorted_tasks(filter);
    if tasks.is_empty() {
        println!("No tasks.");
    }
    for task in &tasks {
        println!("{}", task_line(task, session.is_busy(&task.id)));
    }

    let stats = session.stats(Local::now().date_naive());
    println!();
    println!(
        "{} total | {} to do | {} in progress | {} done | {} overdue | {} urgent",
        stats.total, stats.todo, stats.in_progress, stats.done, stats.overdue, stats.urgent_active
    );

    let unread = session.unread_task_ids();
    if !unread.is_empty() {
        println!("{} task(s) with unread notifications", unread.len());
    }
    Ok(())
}

async fn run_replay(
    cfg: &Config,
    file: &Path,
    user: Option<String>,
    role: Role,
    persist: bool,
) -> Result<()> {
    let user = user
        .or_else(|| cfg.backend.user_id.clone())
        .context("No viewer: pass --user or set TASKDASH_USER_ID")?;
    let viewer = Viewer::new(&user, role);

    let backend: Arc<dyn DataStore> = if cfg.backend.url.is_some() {
        let auth: Arc<dyn AuthProvider> = Arc::new(StaticAuth::from_config(&cfg.backend));
        Arc::new(RestDataStore::new(&cfg.backend, auth)?)
    } else {
        logging::info("No backend configured; replaying against an empty store");
        Arc::new(MemoryDataStore::default())
    };
    let slot: Box<dyn KeyValueSlot> = if persist {
        Box::new(FileSlot::in_home(&cfg.notifications.store_file)?)
    } else {
        Box::new(MemorySlot::new())
    };

    let session = SyncSession::new(
        viewer,
        backend,
        slot,
        SessionOptions::from_config(cfg),
        Bus::default(),
    );
    if let Err(e) = session.load().await {
        eprintln!("Initial load failed, continuing with an empty store: {}", e);
    }

    let mut feed = JsonLinesFeed::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let processed = session.run_feed(&mut feed).await;
    println!("Replayed {} event(s)", processed);

    print_notifications(
        session.visible_notifications().iter(),
        session.queued_notifications().iter(),
    );
    Ok(())
}

fn report(task_id: &str, outcome: MutationOutcome) {
    match outcome {
        MutationOutcome::Applied => println!("Updated {}", task_id),
        MutationOutcome::Skipped => println!("Nothing to do for {}", task_id),
        MutationOutcome::Busy => println!("{} has a write in flight; try again", task_id),
    }
}

fn task_line(task: &Task, busy: bool) -> String {
    let flag = if view::is_urgent_highlighted(task) {
        "!"
    } else {
        " "
    };
    let due = task
        .due_date
        .map(|d| format!(" due {}", d))
        .unwrap_or_default();
    let assignee = task.assigned_to_name.as_deref().unwrap_or(&task.assigned_to);
    format!(
        "{} {:<36} {:<12} {}{} ({}){}",
        flag,
        task.id,
        task.status.label(),
        task.title,
        due,
        assignee,
        if busy { " [saving]" } else { "" }
    )
}

fn print_notifications<'a>(
    visible: impl Iterator<Item = &'a Notification>,
    queued: impl Iterator<Item = &'a Notification>,
) {
    let mut any = false;
    for n in visible {
        any = true;
        println!("{}", notification_line(n));
    }
    let queued: Vec<&Notification> = queued.collect();
    if !queued.is_empty() {
        println!("-- {} queued --", queued.len());
        for n in queued {
            println!("{}", notification_line(n));
        }
    }
    if !any {
        println!("No notifications.");
    }
}

fn notification_line(n: &Notification) -> String {
    let time: DateTime<Local> = n.timestamp.with_timezone(&Local);
    format!(
        "{} {} [{}] {} ({})",
        if n.read { " " } else { "*" },
        n.id,
        n.kind.label(),
        n.message,
        time.format("%H:%M:%S")
    )
}
