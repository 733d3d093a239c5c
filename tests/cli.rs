//! End-to-end tests that run the built `survey-chat` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use uuid::Uuid;

use survey_chat::config::load_config;
use survey_chat::db;
use survey_chat::sqlite_store::SqliteStore;
use survey_chat_core::models::{DataType, Survey, SurveyQuestion};
use survey_chat_core::store::SurveyStore;

fn survey_chat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("survey-chat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Embeddings configured but never called: only dry-run paths are exercised.
    let config_content = format!(
        r#"[db]
path = "{}/data/surveys.sqlite"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[llm]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("survey-chat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = survey_chat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run survey-chat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Write one survey with two questions, as the ingestion tool would.
fn seed_survey(config_path: &Path) -> (Survey, SurveyQuestion) {
    let config = load_config(config_path).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let store = SqliteStore::new(db::connect(&config).await.unwrap());
        let survey = Survey {
            id: Uuid::new_v4(),
            filename: "q3-nps.csv".to_string(),
            version: "2".to_string(),
        };
        store.upsert_survey(&survey).await.unwrap();
        let nps = SurveyQuestion::new(
            survey.id,
            "NPS Score",
            DataType::Numeric,
            Some("0-10".to_string()),
        );
        store.upsert_question(&nps).await.unwrap();
        store
            .upsert_question(&SurveyQuestion::new(
                survey.id,
                "Comments",
                DataType::String,
                None,
            ))
            .await
            .unwrap();
        store.pool().close().await;
        (survey, nps)
    })
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cli(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, stderr, success) = run_cli(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_surveys_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let (stdout, _, success) = run_cli(&config_path, &["surveys"]);
    assert!(success);
    assert!(stdout.contains("No surveys."));
}

#[test]
fn test_schema_lists_survey_tables_only() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let (stdout, _, success) = run_cli(&config_path, &["schema"]);
    assert!(success);
    assert!(stdout.contains("Table: Survey\n"));
    assert!(stdout.contains("Table: SurveyQuestionAnswer"));
    assert!(!stdout.contains("conversation_history"));
}

#[test]
fn test_seeded_survey_listing() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);
    let (survey, nps) = seed_survey(&config_path);
    let survey_id = survey.id.to_string();

    let (stdout, _, success) = run_cli(&config_path, &["surveys"]);
    assert!(success);
    assert!(stdout.contains(&survey_id));
    assert!(stdout.contains("q3-nps.csv"));

    let (stdout, _, success) = run_cli(&config_path, &["questions", &survey_id]);
    assert!(success);
    // Ordered by question text
    let comments_at = stdout.find("Comments").unwrap();
    let nps_at = stdout.find("NPS Score").unwrap();
    assert!(comments_at < nps_at);
    assert!(stdout.contains("pending"));

    let (stdout, _, success) = run_cli(&config_path, &["metadata", &survey_id]);
    assert!(success);
    assert!(stdout.contains(&format!("{}|NPS Score|numeric|0-10", nps.id)));

    let (stdout, _, success) = run_cli(&config_path, &["embed", "pending", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("questions needing embeddings: 2"));
}

#[test]
fn test_metadata_of_unknown_survey_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let id = Uuid::new_v4().to_string();
    let (stdout, _, success) = run_cli(&config_path, &["metadata", &id]);
    assert!(success);
    assert!(stdout.is_empty());
}

#[test]
fn test_questions_of_unknown_survey_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let id = Uuid::new_v4().to_string();
    let (_, stderr, success) = run_cli(&config_path, &["questions", &id]);
    assert!(!success);
    assert!(stderr.contains("survey not found"));

    let (_, stderr, success) = run_cli(&config_path, &["questions", "not-a-uuid"]);
    assert!(!success);
    assert!(stderr.contains("invalid survey id"));
}

#[test]
fn test_ask_requires_llm() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let id = Uuid::new_v4().to_string();
    let (_, stderr, success) = run_cli(&config_path, &["ask", &id, "What is the average NPS?"]);
    assert!(!success);
    assert!(stderr.contains("LLM provider is disabled"));
}

#[test]
fn test_history_of_unknown_conversation_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let (_, stderr, success) = run_cli(&config_path, &["history", "conv-404"]);
    assert!(!success);
    assert!(stderr.contains("conversation not found"));
}

#[test]
fn test_conversations_listing_and_delete() {
    let (_tmp, config_path) = setup_test_env();
    run_cli(&config_path, &["init"]);

    let (stdout, _, success) = run_cli(&config_path, &["conversations", "--user", "alice"]);
    assert!(success);
    assert!(stdout.contains("No conversations."));

    let (_, stderr, success) = run_cli(&config_path, &["delete", "conv-404", "--user", "alice"]);
    assert!(!success);
    assert!(stderr.contains("conversation not found"));

    let (stdout, _, success) = run_cli(&config_path, &["delete", "--all", "--user", "alice"]);
    assert!(success);
    assert!(stdout.contains("deleted 0 conversations of alice"));

    // Neither an id nor --all
    let (_, _, success) = run_cli(&config_path, &["delete"]);
    assert!(!success);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_cli(&missing, &["surveys"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
