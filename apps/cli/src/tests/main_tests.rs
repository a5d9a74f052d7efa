use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::BoardLayout;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

fn task(id: i64, status: &str) -> Task {
    Task {
        id: TaskId(id),
        title: format!("task {id}"),
        description: None,
        status: StatusKey::new(status),
        priority: Priority::Medium,
        due_date: None,
        project: None,
    }
}

async fn spawn_backend(logouts: Arc<Mutex<Vec<String>>>) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route(
            "/api/auth/login/",
            post(|| async {
                Json(json!({
                    "tokens": {"access": "access-1", "refresh": "refresh-1"},
                    "user": {"id": 1, "username": "alice"},
                }))
            }),
        )
        .route(
            "/api/tasks/",
            get(|| async { Json(json!([task(1, "todo")])) }),
        )
        .route(
            "/api/auth/logout/",
            post(move |Json(body): Json<Value>| {
                let logouts = Arc::clone(&logouts);
                async move {
                    let token = body["refresh_token"].as_str().unwrap_or_default().to_string();
                    logouts.lock().await.push(token);
                    Json(json!({}))
                }
            }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/api"))
}

#[test]
fn omitted_index_targets_end_of_other_column_and_last_slot_of_own_column() {
    let board = BoardState::load(
        BoardLayout::default(),
        vec![task(1, "todo"), task(2, "todo"), task(3, "completed")],
    );
    let todo = StatusKey::todo();
    let completed = StatusKey::completed();

    assert_eq!(drop_index(&board, &todo, &completed, None).expect("index"), 1);
    assert_eq!(drop_index(&board, &todo, &todo, None).expect("index"), 1);
    assert_eq!(drop_index(&board, &todo, &completed, Some(0)).expect("index"), 0);
    assert!(drop_index(&board, &todo, &StatusKey::new("archived"), None).is_err());
}

#[test]
fn task_fields_build_the_request_body() {
    let cli = Cli::try_parse_from([
        "taskboard",
        "--username",
        "alice",
        "--password",
        "pw",
        "task",
        "create",
        "--title",
        "Ship it",
        "--priority",
        "high",
        "--project",
        "4",
    ])
    .expect("parse");

    let Command::Task(TaskCommand::Create(fields)) = cli.command else {
        panic!("expected task create");
    };
    let input = fields.into_input();
    assert_eq!(input.title, "Ship it");
    assert_eq!(input.status, StatusKey::todo());
    assert_eq!(input.priority, Priority::High);
    assert_eq!(input.project, Some(ProjectId(4)));
}

#[tokio::test]
async fn failing_command_still_logs_out() {
    let logouts = Arc::new(Mutex::new(Vec::new()));
    let base = spawn_backend(logouts.clone()).await.expect("server");
    let cli = Cli::try_parse_from([
        "taskboard",
        "--api-url",
        base.as_str(),
        "--username",
        "alice",
        "--password",
        "pw",
        "move",
        "--task",
        "99",
        "--to",
        "completed",
    ])
    .expect("parse");

    let err = execute(cli, Settings::default())
        .await
        .expect_err("task 99 is not on the board");

    assert!(err.to_string().contains("not on this board"), "{err:#}");
    assert_eq!(*logouts.lock().await, ["refresh-1".to_string()]);
}
