use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use kbchat_backend::core::config::{AppConfig, AppPaths};
use kbchat_backend::core::errors::ChatError;
use kbchat_backend::llm::{ChatRequest, GenerationEngine, StreamEvent};
use kbchat_backend::rag::{Document, DocumentMetadata, Embedder, QueryReformulator, SqliteVectorStore};
use kbchat_backend::server::router::router;
use kbchat_backend::state::AppState;

struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        Ok(inputs
            .iter()
            .map(|text| {
                if text.contains("门派") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }
}

struct TwoTokenEngine;

#[async_trait]
impl GenerationEngine for TwoTokenEngine {
    async fn generate(
        &self,
        _request: ChatRequest,
        tokens: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ChatError> {
        for token in ["少林", "寺"] {
            let _ = tokens.send(StreamEvent::Token(token.to_string())).await;
        }
        let _ = tokens.send(StreamEvent::Done).await;
        Ok(())
    }
}

/// Streams part of an answer, then fails the generation.
struct RejectingEngine;

#[async_trait]
impl GenerationEngine for RejectingEngine {
    async fn generate(
        &self,
        _request: ChatRequest,
        tokens: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ChatError> {
        let _ = tokens.send(StreamEvent::Token("少林".to_string())).await;
        let _ = tokens.send(StreamEvent::Done).await;
        Err(ChatError::Generation("moderation rejected".to_string()))
    }
}

struct NoReformulation;

#[async_trait]
impl QueryReformulator for NoReformulation {
    async fn reformulate(&self, query: &str, _count: usize) -> Result<Vec<String>, ChatError> {
        Ok(vec![query.to_string()])
    }
}

async fn app(dir: &tempfile::TempDir, settings: AppConfig) -> Router {
    app_with_engine(dir, settings, Arc::new(TwoTokenEngine)).await
}

async fn app_with_engine(
    dir: &tempfile::TempDir,
    settings: AppConfig,
    engine: Arc<dyn GenerationEngine>,
) -> Router {
    let paths = Arc::new(AppPaths::with_data_dir(
        dir.path().to_path_buf(),
        dir.path().to_path_buf(),
    ));
    let store = Arc::new(
        SqliteVectorStore::with_path(paths.db_path.clone(), Arc::new(KeywordEmbedder))
            .await
            .unwrap(),
    );
    store.create_knowledge_base("samples", "test").await.unwrap();
    store
        .add_documents(
            "samples",
            &[Document::new(
                "天龙八部的门派有少林寺",
                DocumentMetadata::from_source("/kb/samples/content/门派.md"),
            )],
        )
        .await
        .unwrap();

    let state = AppState::assemble(
        paths,
        settings,
        store,
        engine,
        Arc::new(NoReformulation),
    );
    router(Arc::new(state))
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/knowledge_base_chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn unknown_knowledge_base_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;

    let response = app
        .oneshot(chat_request(json!({"query": "你好", "knowledge_base_name": "missing"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "Knowledge base not found: missing");
}

#[tokio::test]
async fn non_streaming_chat_returns_answer_and_citations() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;

    let response = app
        .oneshot(chat_request(json!({
            "query": "有哪些门派",
            "knowledge_base_name": "samples",
            "score_threshold": 0.5
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["answer"], "少林寺");
    let docs = body["docs"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    let citation = docs[0].as_str().unwrap();
    assert!(citation.starts_with("出处 [1] [门派.md](/knowledge_base/download_doc?knowledge_base_name=samples&file_name=%E9%97%A8%E6%B4%BE.md)"));
    assert!(citation.contains("天龙八部的门派有少林寺"));
}

#[tokio::test]
async fn streaming_chat_sends_tokens_then_docs() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;

    let response = app
        .oneshot(chat_request(json!({
            "query": "有哪些门派",
            "knowledge_base_name": "samples",
            "stream": true
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_text(response).await;
    let first = body.find(r#"{"answer":"少林"}"#).unwrap();
    let second = body.find(r#"{"answer":"寺"}"#).unwrap();
    let docs = body.find(r#"{"docs":["#).unwrap();
    assert!(first < second && second < docs);
}

#[tokio::test]
async fn failed_generation_ends_stream_with_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(&dir, AppConfig::default(), Arc::new(RejectingEngine)).await;

    let response = app
        .oneshot(chat_request(json!({
            "query": "有哪些门派",
            "knowledge_base_name": "samples",
            "stream": true
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    let answer = body.find(r#"{"answer":"少林"}"#).unwrap();
    let error_event = body.find("event:").unwrap();
    let error = body
        .find(r#"{"error":"generation failed: moderation rejected"}"#)
        .unwrap();
    assert!(answer < error_event && error_event < error);
    assert!(body[error_event..].trim_start_matches("event:").trim_start().starts_with("error"));
    assert!(!body.contains(r#"{"docs":"#));
}

#[tokio::test]
async fn no_match_fallback_answers_directly() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = AppConfig::default();
    settings.kb.no_match_fallback_enabled = true;
    let app = app(&dir, settings).await;

    let response = app
        .oneshot(chat_request(json!({
            "query": "xyz-unmatched",
            "knowledge_base_name": "samples",
            "score_threshold": 0.5
        })))
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({"answer": "未找到匹配答案", "docs": []}));
}

#[tokio::test]
async fn invalid_request_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;

    let response = app
        .oneshot(chat_request(json!({
            "query": "q",
            "knowledge_base_name": "samples",
            "top_k": 0
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_doc_serves_content_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;
    let content_dir = dir.path().join("knowledge_base/samples/content");
    std::fs::create_dir_all(&content_dir).unwrap();
    std::fs::write(content_dir.join("门派.md"), "# 门派").unwrap();

    let response = app
        .clone()
        .oneshot(get(
            "/knowledge_base/download_doc?knowledge_base_name=samples&file_name=%E9%97%A8%E6%B4%BE.md",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "# 门派");

    let response = app
        .clone()
        .oneshot(get(
            "/knowledge_base/download_doc?knowledge_base_name=samples&file_name=..%2Fkb.db",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get(
            "/knowledge_base/download_doc?knowledge_base_name=samples&file_name=absent.md",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn imported_faq_is_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;
    let content_dir = dir.path().join("knowledge_base/faq/content");
    std::fs::create_dir_all(&content_dir).unwrap();
    std::fs::write(
        content_dir.join("faq.txt"),
        "Question: 门派怎么加入?\nAnswer: 找掌门。\n=====\nQuestion: 如何升级?\nAnswer: 做任务。\n",
    )
    .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/knowledge_base/import_faq")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"knowledge_base_name": "faq", "file_name": "faq.txt"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["count"], 4);

    let response = app
        .clone()
        .oneshot(get("/knowledge_base/list_knowledge_bases"))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["data"], json!(["faq", "samples"]));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn deleted_knowledge_base_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir, AppConfig::default()).await;
    let content_dir = dir.path().join("knowledge_base/samples/content");
    std::fs::create_dir_all(&content_dir).unwrap();
    std::fs::write(content_dir.join("门派.md"), "# 门派").unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/knowledge_base/delete_knowledge_base",
            json!({"knowledge_base_name": "samples"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!dir.path().join("knowledge_base/samples").exists());

    let response = app
        .clone()
        .oneshot(get("/knowledge_base/list_knowledge_bases"))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["data"], json!([]));

    let response = app
        .clone()
        .oneshot(chat_request(json!({"query": "门派", "knowledge_base_name": "samples"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json(
            "/knowledge_base/delete_knowledge_base",
            json!({"knowledge_base_name": "samples"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
