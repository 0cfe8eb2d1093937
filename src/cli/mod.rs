use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tracing::error;

use crate::{
    arming::ArmAction,
    board::{Board, BoardConfig},
    coordinator::{ApplyOutcome, OpKind, Settled},
    drag::{DropOutcome, NoOpReason},
    events::ChangeChannel,
    present::LogPresenter,
    settings::Settings,
    store::{StoreError, TaskStore},
    types::{Priority, Task, TaskDraft, TaskFilter, TaskId, TaskStatus},
};

const SCHEMA_VERSION: &str = "cli.v1";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    /// List tasks, optionally filtered.
    List(ListArgs),
    Create(CreateArgs),
    Edit(EditArgs),
    /// Move a task to another column.
    Move(MoveArgs),
    Delete(DeleteArgs),
    /// Show the effective settings, optionally changing and saving them.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[arg(long, value_name = "STATUS")]
    pub status: Option<TaskStatus>,

    #[arg(long, value_name = "PRIORITY")]
    pub priority: Option<Priority>,

    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[arg(long, value_name = "TEXT")]
    pub title: String,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    #[arg(long, value_name = "STATUS", default_value = "todo")]
    pub status: TaskStatus,

    #[arg(long, value_name = "PRIORITY")]
    pub priority: Option<Priority>,

    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<NaiveDate>,

    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EditArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    #[arg(long, value_name = "PRIORITY")]
    pub priority: Option<Priority>,

    #[arg(long, value_name = "YYYY-MM-DD")]
    pub due: Option<NaiveDate>,

    /// Replaces every tag when given at least once.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct MoveArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "STATUS")]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[arg(long, value_name = "MS")]
    pub request_timeout_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    pub arm_window_ms: Option<u64>,

    #[arg(long, value_name = "PX")]
    pub drag_activation_distance: Option<f64>,

    #[arg(long, value_name = "PX")]
    pub keyboard_step: Option<f64>,

    #[arg(long, value_name = "THEME")]
    pub theme: Option<String>,

    /// Write the result to settings.toml.
    #[arg(long)]
    pub save: bool,
}

pub async fn run(
    store: Arc<dyn TaskStore>,
    settings: &Settings,
    command: RootCommand,
    json_output: bool,
    quiet: bool,
) -> i32 {
    let result = match command {
        RootCommand::Config(args) => {
            configure(settings, &args, Settings::config_path().as_deref())
        }
        command => execute(store, BoardConfig::from(settings), command).await,
    };

    match result {
        Ok(output) => {
            print_success(output, json_output, quiet);
            0
        }
        Err(err) => {
            print_error(&err, json_output);
            err.exit_code
        }
    }
}

#[derive(Debug)]
struct CommandOutput {
    command: &'static str,
    data: Value,
    text: String,
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

type CliResult<T> = Result<T, CliError>;

async fn execute(
    store: Arc<dyn TaskStore>,
    config: BoardConfig,
    command: RootCommand,
) -> CliResult<CommandOutput> {
    let mut board = Board::new(
        store,
        Box::new(LogPresenter),
        ChangeChannel::default(),
        config,
    );

    let output = match command {
        RootCommand::List(args) => task_list(&mut board, args).await,
        RootCommand::Create(args) => task_create(&mut board, args).await,
        RootCommand::Edit(args) => task_edit(&mut board, args).await,
        RootCommand::Move(args) => task_move(&mut board, args).await,
        RootCommand::Delete(args) => task_delete(&mut board, args).await,
        RootCommand::Config(_) => Err(usage_error(
            "NOT_A_BOARD_COMMAND",
            "config does not operate on tasks",
        )),
    };
    board.unmount();
    output
}

fn configure(
    settings: &Settings,
    args: &ConfigArgs,
    path: Option<&Path>,
) -> CliResult<CommandOutput> {
    let mut updated = settings.clone();
    if let Some(value) = args.request_timeout_ms {
        updated.request_timeout_ms = value;
    }
    if let Some(value) = args.arm_window_ms {
        updated.arm_window_ms = value;
    }
    if let Some(value) = args.drag_activation_distance {
        updated.drag_activation_distance = value;
    }
    if let Some(value) = args.keyboard_step {
        updated.keyboard_step = value;
    }
    if let Some(theme) = &args.theme {
        updated.theme = theme.clone();
    }
    let updated = updated.validated();

    let saved_to = if args.save {
        let path = path.ok_or_else(|| runtime_error("unable to determine config path"))?;
        updated
            .save_to_path(path)
            .map_err(|err| runtime_error(format!("{err:#}")))?;
        Some(path.display().to_string())
    } else {
        None
    };

    let rows = vec![
        vec!["api_url".to_string(), updated.api_url.clone()],
        vec!["request_timeout_ms".to_string(), updated.request_timeout_ms.to_string()],
        vec!["arm_window_ms".to_string(), updated.arm_window_ms.to_string()],
        vec![
            "drag_activation_distance".to_string(),
            updated.drag_activation_distance.to_string(),
        ],
        vec!["keyboard_step".to_string(), updated.keyboard_step.to_string()],
        vec!["theme".to_string(), updated.theme().as_str().to_string()],
    ];
    let mut text = render_text_table(&["KEY", "VALUE"], &rows);
    if let Some(path) = &saved_to {
        text.push_str(&format!("\nSaved to {path}"));
    }

    let settings_json = serde_json::to_value(&updated).map_err(runtime_error)?;
    Ok(CommandOutput {
        command: "config",
        data: json!({
            "settings": settings_json,
            "saved_to": saved_to,
        }),
        text,
    })
}

async fn task_list(board: &mut Board, args: ListArgs) -> CliResult<CommandOutput> {
    let mut filter = TaskFilter::new();
    if let Some(status) = args.status {
        filter = filter.with_status(status);
    }
    if let Some(priority) = args.priority {
        filter = filter.with_priority(priority);
    }
    if let Some(search) = args.search {
        filter = filter.with_search(search);
    }

    board.mount_filtered(filter).await.map_err(store_error)?;

    let tasks = board.tasks().clone();
    let counts: serde_json::Map<String, Value> = board
        .counts()
        .iter()
        .map(|(status, count)| (status.as_str().to_string(), json!(count)))
        .collect();
    let task_values = tasks.iter().map(task_json).collect::<CliResult<Vec<_>>>()?;
    let data = json!({
        "tasks": task_values,
        "counts": counts,
    });

    Ok(CommandOutput {
        command: "list",
        data,
        text: render_task_list_text(board),
    })
}

fn render_task_list_text(board: &Board) -> String {
    if board.tasks().is_empty() {
        return "No tasks found.".to_string();
    }

    let headers = ["ID", "Status", "Priority", "Due", "Title"];
    let rows = board
        .columns()
        .iter()
        .flat_map(|(_, column)| column.iter())
        .map(|task| {
            let short_id = task.id.as_str().chars().take(8).collect::<String>();
            let due = task
                .due_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "-".to_string());
            let title = task.title.replace('\n', " ");

            vec![
                short_id,
                task.status.title().to_string(),
                task.priority.to_string(),
                due,
                title,
            ]
        })
        .collect::<Vec<_>>();

    render_text_table(&headers, &rows)
}

fn render_text_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            let width = cell.chars().count();
            if width > widths[index] {
                widths[index] = width;
            }
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|width| "-".repeat(*width + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let render_row = |cells: Vec<&str>| {
        format!(
            "| {} |",
            cells
                .iter()
                .enumerate()
                .map(|(index, cell)| format!("{cell:<width$}", width = widths[index]))
                .collect::<Vec<_>>()
                .join(" | ")
        )
    };

    let mut lines = vec![border.clone(), render_row(headers.to_vec()), border.clone()];
    for row in rows {
        lines.push(render_row(row.iter().map(String::as_str).collect()));
    }
    lines.push(border);
    lines.join("\n")
}

async fn task_create(board: &mut Board, args: CreateArgs) -> CliResult<CommandOutput> {
    if args.title.trim().is_empty() {
        return Err(usage_error("TITLE_REQUIRED", "--title cannot be empty"));
    }

    let mut draft = TaskDraft::new(args.title.trim()).with_status(args.status);
    draft.description = args.description.filter(|text| !text.trim().is_empty());
    draft.priority = args.priority.unwrap_or_default();
    draft.due_date = args.due;
    draft.tags = args.tags.into_iter().collect();

    board.create(draft);
    let settled = board.run_until_idle().await;
    fail_on_error(&settled, OpKind::Create)?;

    let created_id = settled
        .iter()
        .find(|entry| entry.kind == OpKind::Create)
        .and_then(|entry| entry.task_id.clone())
        .ok_or_else(|| runtime_error("store did not confirm the created task"))?;
    let created = find_task(board, &created_id)?;

    Ok(CommandOutput {
        command: "create",
        data: json!({ "task": task_json(&created)? }),
        text: format!("created task {} ({})", created.title, created.id),
    })
}

async fn task_edit(board: &mut Board, args: EditArgs) -> CliResult<CommandOutput> {
    board.mount().await.map_err(store_error)?;
    let id = TaskId::new(args.id);
    let mut task = find_task(board, &id)?;

    if let Some(title) = args.title {
        if title.trim().is_empty() {
            return Err(usage_error("TITLE_REQUIRED", "--title cannot be empty"));
        }
        task.title = title.trim().to_string();
    }
    if let Some(description) = args.description {
        task.description = Some(description).filter(|text| !text.trim().is_empty());
    }
    if let Some(priority) = args.priority {
        task.priority = priority;
    }
    if let Some(due) = args.due {
        task.due_date = Some(due);
    }
    if !args.tags.is_empty() {
        task.tags = args.tags.into_iter().collect::<BTreeSet<_>>();
    }

    if board.edit(task.clone()) == ApplyOutcome::Unchanged {
        return Ok(CommandOutput {
            command: "edit",
            data: json!({ "task": task_json(&task)?, "changed": false }),
            text: format!("task {id} unchanged"),
        });
    }

    let settled = board.run_until_idle().await;
    fail_on_error(&settled, OpKind::Update)?;
    let updated = find_task(board, &id)?;

    Ok(CommandOutput {
        command: "edit",
        data: json!({ "task": task_json(&updated)?, "changed": true }),
        text: format!("updated task {id}"),
    })
}

async fn task_move(board: &mut Board, args: MoveArgs) -> CliResult<CommandOutput> {
    board.mount().await.map_err(store_error)?;
    let id = TaskId::new(args.id);

    match board.move_task(&id, args.status) {
        DropOutcome::NoOp(NoOpReason::UnknownItem | NoOpReason::NoTarget) => Err(not_found_error(
            "TASK_NOT_FOUND",
            format!("task {id} not found"),
        )),
        DropOutcome::NoOp(NoOpReason::SameColumn) => Ok(CommandOutput {
            command: "move",
            data: json!({ "task_id": id, "status": args.status, "moved": false }),
            text: format!("task {id} is already in {}", args.status.title()),
        }),
        DropOutcome::Move { task_id, from, to } => {
            let settled = board.run_until_idle().await;
            fail_on_error(&settled, OpKind::Move)?;
            Ok(CommandOutput {
                command: "move",
                data: json!({ "task_id": task_id, "from": from, "status": to, "moved": true }),
                text: format!("moved task {task_id} from {} to {}", from.title(), to.title()),
            })
        }
    }
}

async fn task_delete(board: &mut Board, args: DeleteArgs) -> CliResult<CommandOutput> {
    board.mount().await.map_err(store_error)?;
    let id = TaskId::new(args.id);
    find_task(board, &id)?;

    // The command line is itself the confirmation, so arm and confirm at once.
    let now = Instant::now();
    board.activate_delete(&id, now);
    if board.activate_delete(&id, now) != ArmAction::Confirm {
        return Err(runtime_error(format!("delete of task {id} was not confirmed")));
    }

    let settled = board.run_until_idle().await;
    fail_on_error(&settled, OpKind::ConfirmDelete)?;

    Ok(CommandOutput {
        command: "delete",
        data: json!({ "deleted": true, "task_id": id }),
        text: format!("deleted task {id}"),
    })
}

fn find_task(board: &Board, id: &TaskId) -> CliResult<Task> {
    board
        .coordinator()
        .task(id)
        .cloned()
        .ok_or_else(|| not_found_error("TASK_NOT_FOUND", format!("task {id} not found")))
}

fn fail_on_error(settled: &[Settled], kind: OpKind) -> CliResult<()> {
    match settled
        .iter()
        .find(|entry| entry.kind == kind)
        .and_then(|entry| entry.error.clone())
    {
        Some(err) => Err(store_error(err)),
        None => Ok(()),
    }
}

fn task_json(task: &Task) -> CliResult<Value> {
    serde_json::to_value(task).map_err(runtime_error)
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
        details: None,
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
        details: None,
    }
}

fn runtime_error(err: impl std::fmt::Display) -> CliError {
    CliError {
        exit_code: 5,
        code: "RUNTIME_ERROR",
        message: err.to_string(),
        details: None,
    }
}

fn store_error(err: StoreError) -> CliError {
    let message = err.to_string();
    match err {
        StoreError::NotFound(_) => not_found_error("TASK_NOT_FOUND", message),
        StoreError::InvalidStatus(_) => usage_error("INVALID_STATUS", message),
        StoreError::Validation(_) => usage_error("VALIDATION_FAILED", message),
        StoreError::Rejected { status, .. } => CliError {
            exit_code: 5,
            code: "REMOTE_REJECTED",
            message,
            details: Some(json!({ "http_status": status })),
        },
        StoreError::Unavailable(_) | StoreError::Decode(_) => CliError {
            exit_code: 5,
            code: "REMOTE_UNAVAILABLE",
            message,
            details: None,
        },
    }
}

fn print_success(output: CommandOutput, json_output: bool, quiet: bool) {
    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "command": output.command,
            "data": output.data
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => println!("{value}"),
            Err(_) => println!("{}", payload),
        }
        return;
    }

    if quiet {
        return;
    }

    if output.text.is_empty() {
        println!("ok");
    } else {
        println!("{}", output.text);
    }
}

fn print_error(err: &CliError, json_output: bool) {
    error!(
        code = err.code,
        message = %err.message,
        details = ?err.details,
        "cli command failed"
    );

    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "error": {
                "code": err.code,
                "message": err.message,
                "details": err.details
            }
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => eprintln!("{value}"),
            Err(_) => eprintln!("{}", payload),
        }
        return;
    }

    eprintln!("error[{}]: {}", err.code, err.message);
}
