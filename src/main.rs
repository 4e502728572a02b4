//! factory-tasks - command-line front end
//!
//! Every subcommand restores the session and task list from the local cache,
//! applies one action, and waits for any resulting upload before exiting.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use factory_tasks::cache::LocalCache;
use factory_tasks::config::Config;
use factory_tasks::models::{NewTask, Priority, SyncStatus, Task, TaskStatus, User};
use factory_tasks::poller;
use factory_tasks::remote::RemoteClient;
use factory_tasks::session::Session;
use factory_tasks::store::StoreError;
use factory_tasks::sync::{ConnectOutcome, SyncCoordinator};

#[derive(Parser)]
#[command(name = "factory-tasks")]
#[command(about = "Maintenance task tracker with shared factory-code sync")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the people on the roster
    Users,

    /// Log in as a user from the roster
    Login {
        /// User id
        user: String,
    },

    /// Forget the logged-in user
    Logout,

    /// Show the logged-in user
    Whoami,

    /// List tasks
    Tasks {
        /// Only tasks assigned to me
        #[arg(long)]
        mine: bool,
    },

    /// Create a task (managers)
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Machine the work is for
        #[arg(short, long)]
        machine: String,

        /// Technician user id
        #[arg(short, long)]
        assignee: String,

        #[arg(short, long, default_value = "medium")]
        priority: Priority,

        /// Image reference (URL or data URI)
        #[arg(long)]
        image: Option<String>,
    },

    /// Mark a task as in progress
    Start { id: String },

    /// Mark a task as completed
    Complete { id: String },

    /// Set any status directly
    SetStatus { id: String, status: TaskStatus },

    /// Set or clear the manager note (managers)
    Note { id: String, text: String },

    /// Rate finished work from 1 to 5 (managers)
    Rate { id: String, rating: u8 },

    /// Delete a task (managers)
    Delete { id: String },

    /// Share the task list under a factory code
    Connect {
        code: String,

        /// Replace local tasks with the shared list without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Stop sharing; local tasks are kept
    Disconnect,

    /// Show sync status
    Status,

    /// Keep polling the shared list and report changes until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("factory_tasks=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { output } = &cli.command {
        let path = output.clone().unwrap_or_else(|| PathBuf::from("config.toml"));
        Config::default().save_to(&path)?;
        println!("Created config file: {}", path.display());
        println!("Set remote.base_url and the [[users]] roster, then run 'factory-tasks login <id>'.");
        return Ok(());
    }

    // Explicit --config wins over the default search path
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let mut app = App::open(config)?;
    app.run(cli.command).await
}

struct App {
    config: Config,
    session: Session,
    sync: SyncCoordinator,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let cache = Arc::new(
            LocalCache::open(&config.storage.path).context("Failed to open local cache")?,
        );
        let remote = RemoteClient::new(&config.remote.base_url, config.request_timeout())
            .context("Failed to build HTTP client")?;

        Ok(Self {
            session: Session::restore(cache.clone()),
            sync: SyncCoordinator::restore(remote, cache),
            config,
        })
    }

    async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => Ok(()),

            Commands::Users => {
                for user in &self.config.users {
                    println!("  {:<12} {:<24} {}", user.id, user.name, user.role);
                }
                Ok(())
            }

            Commands::Login { user } => {
                let Some(found) = self.config.find_user(&user).cloned() else {
                    bail!("No user '{}' on the roster (see 'factory-tasks users')", user);
                };
                println!("Logged in as {} ({})", found.name, found.role);
                self.session.login(found)
            }

            Commands::Logout => {
                self.session.logout()?;
                println!("Logged out.");
                Ok(())
            }

            Commands::Whoami => {
                match self.session.current() {
                    Some(user) => println!("{} ({}, {})", user.name, user.id, user.role),
                    None => println!("Not logged in."),
                }
                Ok(())
            }

            Commands::Tasks { mine } => {
                let user = self.user()?.clone();
                self.refresh().await;
                let tasks: Vec<Task> = self
                    .sync
                    .tasks()
                    .into_iter()
                    .filter(|t| !mine || t.assigned_to == user.id)
                    .collect();
                self.print_tasks(&tasks);
                Ok(())
            }

            Commands::Create {
                title,
                description,
                machine,
                assignee,
                priority,
                image,
            } => {
                let user = self.manager()?.clone();
                if self.config.find_user(&assignee).is_none() {
                    bail!("No user '{}' on the roster", assignee);
                }
                self.refresh().await;

                let fields = NewTask {
                    title,
                    description,
                    image,
                    machine,
                    assigned_to: assignee,
                    priority,
                };
                let task = self
                    .sync
                    .update(|store| store.create(fields, &user.id))?
                    .settle()
                    .await;
                println!("Created task {}", task.id);
                self.report_push();
                Ok(())
            }

            Commands::Start { id } => self.change_status(&id, TaskStatus::InProgress).await,
            Commands::Complete { id } => self.change_status(&id, TaskStatus::Completed).await,
            Commands::SetStatus { id, status } => self.change_status(&id, status).await,

            Commands::Note { id, text } => {
                self.manager()?;
                self.refresh().await;
                self.sync
                    .update(|store| store.set_note(&id, &text))?
                    .settle()
                    .await;
                println!("Updated note on {}", id);
                self.report_push();
                Ok(())
            }

            Commands::Rate { id, rating } => {
                self.manager()?;
                self.refresh().await;
                self.sync
                    .update(|store| store.rate(&id, rating))?
                    .settle()
                    .await;
                println!("Rated {} with {}/5", id, rating);
                self.report_push();
                Ok(())
            }

            Commands::Delete { id } => {
                self.manager()?;
                self.refresh().await;
                let removed = self
                    .sync
                    .update(|store| store.remove(&id))?
                    .settle()
                    .await;
                println!("Deleted '{}'", removed.title);
                self.report_push();
                Ok(())
            }

            Commands::Connect { code, yes } => {
                let local = self.sync.tasks().len();
                let outcome = self
                    .sync
                    .connect(&code, |remote| {
                        yes || confirm(&format!(
                            "Factory code already holds {} task(s). Replace your {} local task(s) with them?",
                            remote.len(),
                            local
                        ))
                    })
                    .await?;

                match outcome {
                    ConnectOutcome::Created { pushed } => {
                        println!("Created new factory code and uploaded {} task(s).", pushed)
                    }
                    ConnectOutcome::Joined { replaced: true } => {
                        println!("Joined factory code; {} task(s) loaded.", self.sync.tasks().len())
                    }
                    ConnectOutcome::Joined { replaced: false } => {
                        println!("Joined factory code; the shared list is empty.")
                    }
                    ConnectOutcome::Declined => println!("Kept local tasks; not connected."),
                }
                Ok(())
            }

            Commands::Disconnect => {
                self.sync.disconnect();
                println!("Sync disabled. Local tasks are kept.");
                Ok(())
            }

            Commands::Status => {
                // Check the remote so the status reflects it, not the last run
                self.sync.poll().await;

                let snapshot = self.sync.snapshot();
                match &snapshot.bucket {
                    Some(code) => println!("Factory code: {}", code),
                    None => println!("Factory code: (none)"),
                }
                println!("Sync:         {}", snapshot.status);
                match snapshot.last_sync {
                    Some(at) => println!(
                        "Last sync:    {}",
                        at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
                    ),
                    None => println!("Last sync:    never"),
                }
                if let Some(error) = &snapshot.last_error {
                    println!("Last error:   {}", error);
                }
                println!("Remote:       {}", self.config.remote.base_url);
                println!("Tasks:        {}", snapshot.tasks);
                if let Some(user) = self.session.current() {
                    println!("User:         {} ({})", user.name, user.role);
                }
                Ok(())
            }

            Commands::Watch => self.watch().await,
        }
    }

    fn user(&self) -> Result<&User> {
        self.session
            .current()
            .context("Not logged in (run 'factory-tasks login <user-id>')")
    }

    fn manager(&self) -> Result<&User> {
        let user = self.user()?;
        if !user.role.manages_tasks() {
            bail!("Only managers can do that");
        }
        Ok(user)
    }

    async fn change_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let user = self.user()?.clone();
        self.refresh().await;
        let task = self
            .sync
            .task(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !user.role.manages_tasks() && task.assigned_to != user.id {
            bail!("Task {} is assigned to someone else", id);
        }

        let task = self
            .sync
            .update(|store| store.set_status(id, status))?
            .settle()
            .await;
        println!("{} is now {}", task.title, task.status);
        self.report_push();
        Ok(())
    }

    /// Pick up other devices' changes before editing, so the upload that
    /// follows does not drop them
    async fn refresh(&self) {
        if !self.sync.refresh().await {
            println!("Could not reach the factory code; working from local tasks.");
        }
    }

    fn report_push(&self) {
        let snapshot = self.sync.snapshot();
        if snapshot.status == SyncStatus::Error {
            let reason = snapshot.last_error.unwrap_or_default();
            println!("Saved locally, but sync failed: {}", reason);
        }
    }

    async fn watch(&self) -> Result<()> {
        let Some(code) = self.sync.active_bucket() else {
            bail!("Not connected (run 'factory-tasks connect <code>')");
        };

        let mut updates = self.sync.subscribe();
        let handle = poller::spawn(self.sync.clone(), self.config.poll_interval());
        println!(
            "Watching factory code '{}' every {} ms. Ctrl-C to stop.",
            code, self.config.sync.poll_interval_ms
        );

        let mut last = updates.borrow().clone();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    if snapshot.status != last.status {
                        println!("[{}] sync {}", chrono::Local::now().format("%H:%M:%S"), snapshot.status);
                    }
                    if snapshot.last_sync != last.last_sync && snapshot.status == SyncStatus::Online {
                        println!("Task list updated from factory code:");
                        self.print_tasks(&self.sync.tasks());
                    }
                    last = snapshot;
                }
            }
        }

        handle.stop().await;
        Ok(())
    }

    fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.config
            .find_user(id)
            .map(|u| u.name.as_str())
            .unwrap_or(id)
    }

    fn print_tasks(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            println!("No tasks.");
            return;
        }

        for task in tasks {
            println!(
                "{}  [{:<11}] {:<6} {} @ {} -> {}",
                task.id,
                task.status.to_string(),
                task.priority.to_string(),
                task.title,
                task.machine,
                self.display_name(&task.assigned_to),
            );
            if let Some(note) = &task.manager_note {
                println!("          note: {}", note);
            }
            if let Some(rating) = task.rating {
                println!("          rating: {}/5", rating);
            }
        }
    }
}

fn confirm(question: &str) -> bool {
    print!("{} [y/N] ", question);
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
