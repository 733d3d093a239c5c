//! Integration tests for the SQLite store, history and orchestrator wiring.
//!
//! Every test runs against a fresh database file in a temp directory with
//! the real migrations applied.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use survey_chat::config::{Config, DbConfig};
use survey_chat::sqlite_history::SqliteHistoryStore;
use survey_chat::sqlite_store::SqliteStore;
use survey_chat::{db, embed_cmd, migrate};
use survey_chat_core::conversation::{ConversationMessage, Role};
use survey_chat_core::embedding::Embedder;
use survey_chat_core::error::{CoreError, Result};
use survey_chat_core::history::{Conversation, HistoryStore};
use survey_chat_core::introspect::{describe_schema, describe_survey_metadata};
use survey_chat_core::llm::{CompletionRequest, LanguageModel};
use survey_chat_core::models::{
    AnswerValue, DataType, SentimentScores, Survey, SurveyQuestion, SurveyQuestionAnswer,
};
use survey_chat_core::orchestrator::{Orchestrator, OrchestratorConfig};
use survey_chat_core::retrieval::{find_relevant_answers, find_relevant_questions};
use survey_chat_core::store::{
    AnswerColumn, AnswerFilter, FilterOperator, FilterValue, SurveyStore,
};

// ─── Test doubles ───────────────────────────────────────────────────

/// Maps any text mentioning NPS close to the NPS axis.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "test-embedder"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.to_lowercase().contains("nps") {
            Ok(vec![0.9, 0.1])
        } else {
            Ok(vec![0.1, 0.9])
        }
    }
}

/// Replies with queued responses in order and records every request.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::LanguageModel("no scripted reply".to_string()))
    }
}

// ─── Fixture ────────────────────────────────────────────────────────

struct Fixture {
    _tmp: TempDir,
    store: Arc<SqliteStore>,
    survey: Survey,
    other_survey: Survey,
    nps: SurveyQuestion,
    comments: SurveyQuestion,
}

fn test_config(tmp: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("data").join("surveys.sqlite"),
        },
        retrieval: Default::default(),
        embedding: Default::default(),
        llm: Default::default(),
        orchestrator: Default::default(),
    }
}

async fn empty_store() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&test_config(&tmp)).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn survey(filename: &str) -> Survey {
    Survey {
        id: Uuid::new_v4(),
        filename: filename.to_string(),
        version: "1".to_string(),
    }
}

async fn fixture() -> Fixture {
    let (tmp, store) = empty_store().await;

    let survey = survey("q3-nps.csv");
    let other_survey = self::survey("q2-nps.csv");
    store.upsert_survey(&survey).await.unwrap();
    store.upsert_survey(&other_survey).await.unwrap();

    let nps = SurveyQuestion::new(
        survey.id,
        "NPS Score",
        DataType::Numeric,
        Some("How likely are you to recommend us, 0-10".to_string()),
    )
    .with_embedding(vec![1.0, 0.0]);
    let comments = SurveyQuestion::new(
        survey.id,
        "Comments",
        DataType::String,
        Some("Anything else you want to tell us".to_string()),
    )
    .with_embedding(vec![0.0, 1.0]);
    let other_nps = SurveyQuestion::new(other_survey.id, "NPS Score", DataType::Numeric, None)
        .with_embedding(vec![1.0, 0.0]);
    for q in [&nps, &comments, &other_nps] {
        store.upsert_question(q).await.unwrap();
    }

    for score in [9.0, 8.0, -1.0] {
        let answer =
            SurveyQuestionAnswer::for_question(&nps, Uuid::new_v4(), AnswerValue::Numeric(score))
                .unwrap();
        store.upsert_answer(&answer).await.unwrap();
    }
    let other_answer = SurveyQuestionAnswer::for_question(
        &other_nps,
        Uuid::new_v4(),
        AnswerValue::Numeric(2.0),
    )
    .unwrap();
    store.upsert_answer(&other_answer).await.unwrap();

    let texts = [
        ("Great support team", vec![0.2, 0.8], 0.9, 0.05, 0.05),
        ("Slow shipping", vec![0.1, 0.9], 0.1, 0.1, 0.8),
    ];
    for (text, embedding, positive, neutral, negative) in texts {
        let answer = SurveyQuestionAnswer::for_question(
            &comments,
            Uuid::new_v4(),
            AnswerValue::Text(text.to_string()),
        )
        .unwrap()
        .with_sentiment(SentimentScores {
            positive: Some(positive),
            neutral: Some(neutral),
            negative: Some(negative),
        })
        .with_embedding(embedding);
        store.upsert_answer(&answer).await.unwrap();
    }

    Fixture {
        _tmp: tmp,
        store,
        survey,
        other_survey,
        nps,
        comments,
    }
}

// ─── Store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let f = fixture().await;
    migrate::apply(f.store.pool()).await.unwrap();
    let questions = f.store.list_questions(f.survey.id).await.unwrap();
    assert_eq!(questions.len(), 2);
}

#[tokio::test]
async fn test_question_search_is_scoped_to_survey() {
    let f = fixture().await;

    let results = find_relevant_questions(
        f.store.as_ref(),
        f.survey.id,
        "What is the average NPS score?",
        &[0.9, 0.1],
        3,
    )
    .await
    .unwrap();

    assert_eq!(results[0].id, f.nps.id);
    assert_eq!(results[0].semantic_rank, Some(1));
    assert_eq!(results[0].keyword_rank, Some(1));
    assert!(results.iter().all(|r| r.item.survey_id == f.survey.id));
    assert!(results.iter().all(|r| r.id != Uuid::nil()));
}

#[tokio::test]
async fn test_keyword_only_fallback_without_embeddings() {
    let (_tmp, store) = empty_store().await;
    let survey = survey("fresh.csv");
    store.upsert_survey(&survey).await.unwrap();
    let comments = SurveyQuestion::new(survey.id, "Comments", DataType::String, None);
    let region = SurveyQuestion::new(survey.id, "Region", DataType::String, None);
    store.upsert_question(&comments).await.unwrap();
    store.upsert_question(&region).await.unwrap();

    let results = find_relevant_questions(store.as_ref(), survey.id, "comments", &[1.0, 0.0], 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, comments.id);
    assert_eq!(results[0].semantic_rank, None);
    assert_eq!(results[0].keyword_rank, Some(1));
}

#[tokio::test]
async fn test_embeddings_of_another_dimension_are_skipped() {
    let (_tmp, store) = empty_store().await;
    let survey = survey("dims.csv");
    store.upsert_survey(&survey).await.unwrap();
    let age = SurveyQuestion::new(survey.id, "Age", DataType::Numeric, None)
        .with_embedding(vec![1.0, 0.0, 0.0]);
    let region = SurveyQuestion::new(survey.id, "Region", DataType::String, None)
        .with_embedding(vec![0.0, 1.0, 0.0]);
    store.upsert_question(&age).await.unwrap();
    store.upsert_question(&region).await.unwrap();

    let results = find_relevant_questions(store.as_ref(), survey.id, "age", &[1.0, 0.0], 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, age.id);
    assert_eq!(results[0].semantic_rank, None);
    assert_eq!(results[0].keyword_rank, Some(1));
}

async fn set_raw_embedding(store: &SqliteStore, question: &SurveyQuestion, sql_value: &str) {
    sqlx::query(&format!(
        "UPDATE SurveyQuestion SET Embedding = {} WHERE Id = ?",
        sql_value
    ))
    .bind(question.id.to_string())
    .execute(store.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn test_json_text_embeddings_are_decoded() {
    let (_tmp, store) = empty_store().await;
    let survey = survey("uploaded.csv");
    store.upsert_survey(&survey).await.unwrap();
    let nps = SurveyQuestion::new(survey.id, "NPS Score", DataType::Numeric, None);
    let region = SurveyQuestion::new(survey.id, "Region", DataType::String, None);
    store.upsert_question(&nps).await.unwrap();
    store.upsert_question(&region).await.unwrap();
    set_raw_embedding(&store, &nps, "'[1.0,0.0]'").await;
    set_raw_embedding(&store, &region, "'[0.0,1.0]'").await;

    let questions = store.list_questions(survey.id).await.unwrap();
    assert_eq!(questions[0].embedding, Some(vec![1.0, 0.0]));

    let results =
        find_relevant_questions(store.as_ref(), survey.id, "region", &[0.0, 1.0], 3)
            .await
            .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, region.id);
    assert_eq!(results[0].semantic_rank, Some(1));
    assert_eq!(results[1].id, nps.id);
    assert_eq!(results[1].semantic_rank, Some(2));
    assert_eq!(results[1].keyword_rank, None);
}

#[tokio::test]
async fn test_undecodable_embeddings_are_store_errors() {
    let (_tmp, store) = empty_store().await;
    let survey = survey("broken.csv");
    store.upsert_survey(&survey).await.unwrap();
    let nps = SurveyQuestion::new(survey.id, "NPS Score", DataType::Numeric, None);
    store.upsert_question(&nps).await.unwrap();

    for value in ["'not a vector'", "42", "x'0102'"] {
        set_raw_embedding(&store, &nps, value).await;
        let err = find_relevant_questions(store.as_ref(), survey.id, "nps", &[1.0, 0.0], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Store(_)), "{}: {:?}", value, err);
    }
}

#[tokio::test]
async fn test_unknown_survey_is_not_found() {
    let f = fixture().await;
    let err = find_relevant_questions(f.store.as_ref(), Uuid::new_v4(), "nps", &[1.0, 0.0], 3)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_answer_search_applies_filters() {
    let f = fixture().await;

    let all = find_relevant_answers(f.store.as_ref(), f.survey.id, &[0.1, 0.9], &[], &[], 10)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].item.text_answer(), Some("Slow shipping"));

    let positive = AnswerFilter::new(
        AnswerColumn::PositiveSentimentConfidenceScore,
        FilterOperator::Ge,
        FilterValue::Number(0.5),
    );
    let by_question = AnswerFilter::new(
        AnswerColumn::SurveyQuestionId,
        FilterOperator::Eq,
        FilterValue::Text(f.comments.id.to_string().to_uppercase()),
    );
    let filtered = find_relevant_answers(
        f.store.as_ref(),
        f.survey.id,
        &[0.1, 0.9],
        &[positive, by_question],
        &[],
        10,
    )
    .await
    .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].item.text_answer(), Some("Great support team"));
}

#[tokio::test]
async fn test_describe_schema_hides_internal_tables() {
    let f = fixture().await;
    let schema = describe_schema(f.store.as_ref()).await.unwrap();

    assert!(schema.contains("Table: SurveyQuestionAnswer"));
    assert!(schema.contains("- NumericAnswer (REAL, nullable)"));
    assert!(!schema.contains("survey_question_fts"));
    assert!(!schema.contains("conversation_history"));
}

#[tokio::test]
async fn test_survey_metadata() {
    let f = fixture().await;
    let metadata = describe_survey_metadata(f.store.as_ref(), f.survey.id)
        .await
        .unwrap();
    assert!(metadata.contains(&format!("{}|NPS Score|numeric|", f.nps.id)));
    assert_eq!(metadata.lines().count(), 2);

    let empty = describe_survey_metadata(f.store.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(empty, "");
}

#[tokio::test]
async fn test_execute_query_keeps_backend_message() {
    let f = fixture().await;
    let err = f
        .store
        .execute_query("SELECT * FROM NoSuchTable")
        .await
        .unwrap_err();
    match err {
        CoreError::QueryExecution { query, message } => {
            assert_eq!(query, "SELECT * FROM NoSuchTable");
            assert!(message.contains("no such table"), "{}", message);
        }
        other => panic!("expected QueryExecution, got {:?}", other),
    }
}

#[tokio::test]
async fn test_embed_pending_backfills_sqlite() {
    let (_tmp, store) = empty_store().await;
    let survey = survey("fresh.csv");
    store.upsert_survey(&survey).await.unwrap();
    store
        .upsert_question(&SurveyQuestion::new(
            survey.id,
            "NPS Score",
            DataType::Numeric,
            None,
        ))
        .await
        .unwrap();

    let stats = embed_cmd::embed_pending(store.as_ref(), &KeywordEmbedder, None, 16)
        .await
        .unwrap();
    assert_eq!(stats.embedded, 1);

    let questions = store.list_questions(survey.id).await.unwrap();
    assert_eq!(questions[0].embedding.as_deref(), Some(&[0.9f32, 0.1][..]));
}

// ─── Orchestrator over SQLite ───────────────────────────────────────

#[tokio::test]
async fn test_average_nps_turn_runs_real_sql() {
    let f = fixture().await;
    let query = format!(
        "SELECT AVG(NumericAnswer) AS AverageNps FROM SurveyQuestionAnswer \
         WHERE SurveyQuestionId = '{}' AND SurveyId = '{}' AND NumericAnswer >= 0",
        f.nps.id, f.survey.id
    );
    let model = ScriptedModel::new(&[query.as_str()]);
    let orchestrator = Orchestrator::new(
        f.store.clone(),
        Arc::new(KeywordEmbedder),
        model.clone(),
        OrchestratorConfig::default(),
    );

    let incoming = vec![ConversationMessage::user("What is the average NPS score?")];
    let messages = orchestrator.turn(f.survey.id, &incoming).await.unwrap();

    let answers: Vec<&ConversationMessage> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].content, "8.5");

    let requests = model.requests.lock().unwrap();
    assert!(requests[0].system.contains(&f.nps.id.to_string()));
    assert!(requests[0].system.contains(&f.survey.id.to_string()));
    assert!(!requests[0].system.contains(&f.other_survey.id.to_string()));
}

#[tokio::test]
async fn test_failed_query_discards_turn() {
    let f = fixture().await;
    let model = ScriptedModel::new(&["SELECT AVG(Score) FROM Missing"]);
    let orchestrator = Orchestrator::new(
        f.store.clone(),
        Arc::new(KeywordEmbedder),
        model,
        OrchestratorConfig::default(),
    );

    let incoming = vec![ConversationMessage::user("What is the average NPS score?")];
    let err = orchestrator.turn(f.survey.id, &incoming).await.unwrap_err();
    assert!(matches!(err, CoreError::QueryExecution { .. }));
}

// ─── History ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_upsert_and_title() {
    let (_tmp, store) = empty_store().await;
    let history = SqliteHistoryStore::new(store.pool().clone());

    let mut conversation = Conversation::new("conv-1", "alice");
    conversation
        .messages
        .push(ConversationMessage::user("What is the average NPS score?"));
    history.save(&conversation).await.unwrap();
    history.save(&conversation).await.unwrap();

    conversation
        .messages
        .push(ConversationMessage::new(Role::Assistant, "8.5"));
    history.save(&conversation).await.unwrap();

    let loaded = history.load("alice", "conv-1").await.unwrap().unwrap();
    assert_eq!(loaded.user_id, "alice");
    assert_eq!(loaded.messages, conversation.messages);
    assert!(loaded.title.is_none());

    history
        .set_title("alice", "conv-1", "Average NPS")
        .await
        .unwrap();
    let titled = history.load("alice", "conv-1").await.unwrap().unwrap();
    assert_eq!(titled.title.as_deref(), Some("Average NPS"));

    assert!(history.load("alice", "missing").await.unwrap().is_none());
    let err = history.set_title("alice", "missing", "x").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_history_reads_unknown_roles_as_user() {
    let (_tmp, store) = empty_store().await;
    let history = SqliteHistoryStore::new(store.pool().clone());

    let messages = r#"[
        {"id":"","role":"bot","content":"hello","timestamp":"2024-05-01T10:00:00Z"},
        {"id":"6f1c7a52-3f1e-4a8b-9d2c-0e5b8f7a1c33","role":"Assistant","content":"8.5","timestamp":"2024-05-01T10:00:05Z"}
    ]"#;
    sqlx::query(
        "INSERT INTO conversation_history (id, user_id, title, messages_json, updated_at) VALUES ('c9', 'alice', NULL, ?, 0)",
    )
    .bind(messages)
    .execute(store.pool())
    .await
    .unwrap();

    let loaded = history.load("alice", "c9").await.unwrap().unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[0].role, Role::User);
    assert_eq!(loaded.messages[0].id, None);
    assert_eq!(loaded.messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_history_is_scoped_to_its_owner() {
    let (_tmp, store) = empty_store().await;
    let history = SqliteHistoryStore::new(store.pool().clone());

    let mut alices = Conversation::new("c1", "alice");
    alices
        .messages
        .push(ConversationMessage::user("What is the average NPS score?"));
    history.save(&alices).await.unwrap();

    assert!(history.load("bob", "c1").await.unwrap().is_none());
    let err = history.set_title("bob", "c1", "mine").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let mut bobs = Conversation::new("c1", "bob");
    bobs.messages.push(ConversationMessage::user("hijack"));
    let err = history.save(&bobs).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    assert!(!history.delete("bob", "c1").await.unwrap());
    assert_eq!(history.delete_all("bob").await.unwrap(), 0);

    let kept = history.load("alice", "c1").await.unwrap().unwrap();
    assert_eq!(kept.user_id, "alice");
    assert_eq!(kept.messages, alices.messages);
    assert!(kept.title.is_none());
}

#[tokio::test]
async fn test_history_list_and_delete() {
    let (_tmp, store) = empty_store().await;
    let history = SqliteHistoryStore::new(store.pool().clone());

    let base = chrono::Utc::now();
    for (i, id) in ["c1", "c2", "c3"].iter().enumerate() {
        let mut conversation = Conversation::new(*id, "alice");
        conversation.updated_at = base + chrono::Duration::seconds(i as i64 * 10);
        history.save(&conversation).await.unwrap();
    }
    history.save(&Conversation::new("b1", "bob")).await.unwrap();

    let ids = |cs: Vec<Conversation>| cs.into_iter().map(|c| c.id).collect::<Vec<_>>();
    assert_eq!(
        ids(history.list("alice", None, 0).await.unwrap()),
        vec!["c3", "c2", "c1"]
    );
    assert_eq!(
        ids(history.list("alice", Some(2), 1).await.unwrap()),
        vec!["c2", "c1"]
    );
    assert!(history.list("carol", None, 0).await.unwrap().is_empty());

    assert!(history.delete("alice", "c2").await.unwrap());
    assert!(!history.delete("alice", "c2").await.unwrap());
    assert_eq!(history.delete_all("alice").await.unwrap(), 2);
    assert!(history.list("alice", None, 0).await.unwrap().is_empty());
    assert_eq!(ids(history.list("bob", None, 0).await.unwrap()), vec!["b1"]);
}
