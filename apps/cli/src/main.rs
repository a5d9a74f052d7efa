use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use client_core::{
    config::{load_settings, Settings},
    BoardController, BoardScope, BoardState, BoardStatus, DragEvent, DragLocation, DragOutcome,
    HttpTaskStore, Session,
};
use shared::{
    domain::{Priority, ProjectId, ProjectStatus, StatusKey, Task, TaskId},
    protocol::{ProjectInput, TaskInput, TaskQuery},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "taskboard", about = "Task board client")]
struct Cli {
    /// Overrides `api_url` from taskboard.toml / the environment.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long, env = "TASKBOARD_USERNAME")]
    username: String,
    #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
    password: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the board columns.
    Board {
        #[arg(long)]
        project: Option<i64>,
    },
    /// Move a task to another column, the way a drag-and-drop would.
    Move {
        #[arg(long)]
        task: i64,
        #[arg(long)]
        to: String,
        /// Position in the destination column; defaults to the end.
        #[arg(long)]
        index: Option<usize>,
        #[arg(long)]
        project: Option<i64>,
    },
    /// List tasks filtered by status and ordered by a field.
    Tasks {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        sort: Option<String>,
    },
    /// Change a task's status and print the refreshed list.
    SetStatus {
        #[arg(long)]
        task: i64,
        #[arg(long)]
        to: String,
        /// Status filter of the printed list.
        #[arg(long)]
        status: Option<String>,
    },
    #[command(subcommand)]
    Task(TaskCommand),
    #[command(subcommand)]
    Project(ProjectCommand),
    /// List projects and task counters.
    Projects,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Create(TaskFields),
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        fields: TaskFields,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    Create(ProjectFields),
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        fields: ProjectFields,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Create a task inside the project.
    AddTask {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        fields: TaskFields,
    },
}

#[derive(Args, Debug)]
struct TaskFields {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value = StatusKey::TODO)]
    status: String,
    #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
    priority: PriorityArg,
    /// RFC 3339 timestamp, e.g. 2024-06-01T17:00:00Z.
    #[arg(long)]
    due: Option<DateTime<Utc>>,
    #[arg(long)]
    project: Option<i64>,
}

impl TaskFields {
    fn into_input(self) -> TaskInput {
        TaskInput {
            title: self.title,
            description: self.description,
            status: StatusKey::new(self.status),
            priority: self.priority.into(),
            due_date: self.due,
            project: self.project.map(ProjectId),
        }
    }
}

#[derive(Args, Debug)]
struct ProjectFields {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_enum, default_value_t = ProjectStatusArg::Active)]
    status: ProjectStatusArg,
}

impl ProjectFields {
    fn into_input(self) -> ProjectInput {
        ProjectInput {
            name: self.name,
            description: self.description,
            status: self.status.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProjectStatusArg {
    Active,
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl From<ProjectStatusArg> for ProjectStatus {
    fn from(value: ProjectStatusArg) -> Self {
        match value {
            ProjectStatusArg::Active => ProjectStatus::Active,
            ProjectStatusArg::Planning => ProjectStatus::Planning,
            ProjectStatusArg::InProgress => ProjectStatus::InProgress,
            ProjectStatusArg::OnHold => ProjectStatus::OnHold,
            ProjectStatusArg::Completed => ProjectStatus::Completed,
            ProjectStatusArg::Cancelled => ProjectStatus::Cancelled,
        }
    }
}

fn scope_for(project: Option<i64>) -> BoardScope {
    project.map_or(BoardScope::AllTasks, |id| BoardScope::Project(ProjectId(id)))
}

fn print_board(board: &BoardState) {
    for column in board.columns() {
        println!("{} ({})", column.title, column.len());
        for id in &column.items {
            match board.task(*id) {
                Some(task) => println!("  #{} [{:?}] {}", id, task.priority, task.title),
                None => println!("  #{id}"),
            }
        }
    }
}

fn print_tasks(tasks: &[Task]) {
    for task in tasks {
        println!("#{} [{}] [{:?}] {}", task.id, task.status, task.priority, task.title);
    }
}

/// Where a `move` without `--index` lands: after the last card of another
/// column, or in the last slot of the task's own column.
fn drop_index(
    board: &BoardState,
    from_column: &StatusKey,
    to_column: &StatusKey,
    requested: Option<usize>,
) -> Result<usize> {
    if let Some(index) = requested {
        return Ok(index);
    }
    let len = board
        .column(to_column)
        .map(|column| column.len())
        .ok_or_else(|| anyhow!("unknown column {to_column}"))?;
    if to_column == from_column {
        Ok(len.saturating_sub(1))
    } else {
        Ok(len)
    }
}

async fn run(command: Command, store: &Arc<HttpTaskStore>, settings: &Settings) -> Result<()> {
    match command {
        Command::Board { project } => {
            if let Some(project_id) = project {
                let details = store
                    .get_project(ProjectId(project_id))
                    .await
                    .context("failed to load project")?;
                println!("Project #{} {} [{:?}]", details.id, details.name, details.status);
            }
            let controller = BoardController::new(
                store.clone(),
                scope_for(project),
                settings.layout.clone(),
                settings.event_buffer,
            );
            controller.mount().await.context("failed to load board")?;
            if let Some(board) = controller.snapshot().await.board {
                print_board(&board);
            }
        }
        Command::Move {
            task,
            to,
            index,
            project,
        } => {
            let controller = BoardController::new(
                store.clone(),
                scope_for(project),
                settings.layout.clone(),
                settings.event_buffer,
            );
            controller.mount().await.context("failed to load board")?;
            let mut events = controller.subscribe_events();

            let board = controller
                .snapshot()
                .await
                .board
                .ok_or_else(|| anyhow!("board is not loaded"))?;
            let task_id = TaskId(task);
            let from_column = board
                .column_of(task_id)
                .cloned()
                .ok_or_else(|| anyhow!("task {task} is not on this board"))?;
            let from_index = board
                .column(&from_column)
                .and_then(|column| column.items.iter().position(|id| *id == task_id))
                .ok_or_else(|| anyhow!("task {task} is not on this board"))?;
            let to_column = StatusKey::new(to);
            let to_index = drop_index(&board, &from_column, &to_column, index)?;

            let event = DragEvent {
                source: DragLocation::new(from_column, from_index),
                destination: Some(DragLocation::new(to_column, to_index)),
                item_id: task_id.to_string(),
            };
            match controller.on_drag_end(event).await {
                DragOutcome::NoOp => println!("Nothing to do"),
                DragOutcome::Reordered { column, .. } => {
                    println!("Reordered within {column} (display order only)")
                }
                DragOutcome::Committing { task_id, handle } => {
                    let phase = handle.await.context("commit task panicked")?;
                    println!("Task {task_id}: {phase:?}");
                }
                DragOutcome::Rejected(err) => bail!("move rejected: {err}"),
            }

            while let Ok(event) = events.try_recv() {
                tracing::debug!(?event, "board event");
            }
            let snapshot = controller.snapshot().await;
            match (snapshot.board, snapshot.status) {
                (Some(board), _) => print_board(&board),
                (None, BoardStatus::Error(message)) => bail!("board unavailable: {message}"),
                (None, _) => {}
            }
        }
        Command::Tasks { status, sort } => {
            let query = TaskQuery {
                status: status.map(StatusKey::new),
                sort,
            };
            let tasks = store
                .fetch_tasks_filtered(&query)
                .await
                .context("failed to list tasks")?;
            print_tasks(&tasks);
        }
        Command::SetStatus { task, to, status } => {
            let query = TaskQuery {
                status: status.map(StatusKey::new),
                sort: None,
            };
            let tasks = store
                .change_status(TaskId(task), &StatusKey::new(to), &query)
                .await
                .context("failed to change task status")?;
            print_tasks(&tasks);
        }
        Command::Task(TaskCommand::Create(fields)) => {
            let task = store
                .create_task(&fields.into_input())
                .await
                .context("failed to create task")?;
            print_tasks(std::slice::from_ref(&task));
        }
        Command::Task(TaskCommand::Update { id, fields }) => {
            let task = store
                .update_task(TaskId(id), &fields.into_input())
                .await
                .context("failed to update task")?;
            print_tasks(std::slice::from_ref(&task));
        }
        Command::Task(TaskCommand::Delete { id }) => {
            store
                .delete_task(TaskId(id))
                .await
                .context("failed to delete task")?;
            println!("Deleted task #{id}");
        }
        Command::Project(ProjectCommand::Create(fields)) => {
            let project = store
                .create_project(&fields.into_input())
                .await
                .context("failed to create project")?;
            println!("Created project #{} {}", project.id, project.name);
        }
        Command::Project(ProjectCommand::Update { id, fields }) => {
            let project = store
                .update_project(ProjectId(id), &fields.into_input())
                .await
                .context("failed to update project")?;
            println!("Updated project #{} {} [{:?}]", project.id, project.name, project.status);
        }
        Command::Project(ProjectCommand::Delete { id }) => {
            store
                .delete_project(ProjectId(id))
                .await
                .context("failed to delete project")?;
            println!("Deleted project #{id}");
        }
        Command::Project(ProjectCommand::AddTask { id, fields }) => {
            let task = store
                .add_project_task(ProjectId(id), &fields.into_input())
                .await
                .context("failed to add task to project")?;
            print_tasks(std::slice::from_ref(&task));
        }
        Command::Projects => {
            for project in store.list_projects().await.context("failed to list projects")? {
                println!(
                    "#{} {} [{:?}] tasks={}",
                    project.id,
                    project.name,
                    project.status,
                    project.task_count.unwrap_or_default()
                );
            }
            let stats = store.task_stats().await.context("failed to load task stats")?;
            println!(
                "tasks: total={} todo={} in_progress={} completed={} overdue={}",
                stats.total, stats.todo, stats.in_progress, stats.completed, stats.overdue
            );
        }
    }
    Ok(())
}

/// Logs in, runs the command and logs out again whether or not it succeeded.
async fn execute(cli: Cli, mut settings: Settings) -> Result<()> {
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }

    let session = Session::shared();
    let store = Arc::new(
        HttpTaskStore::new(&settings, session.clone()).context("failed to build task store")?,
    );
    let user = store
        .auth()
        .login(&cli.username, &cli.password)
        .await
        .context("login failed")?;
    println!("Logged in as {} (user_id={})", user.username, user.id);

    let result = run(cli.command, &store, &settings).await;
    store.auth().logout().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    execute(cli, load_settings()).await
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod main_tests;
