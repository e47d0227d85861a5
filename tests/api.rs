//! End-to-end tests against a real gateway bound to a local port.
//!
//! Every engine is replaced with an in-process fake implementing the
//! service trait, so the pipelines, persistence and media staging run for
//! real while nothing leaves the test process.

use ai_gateway::config::Config;
use ai_gateway::embedding::Embedder;
use ai_gateway::error::{GatewayError, GatewayResult};
use ai_gateway::generation::{Generator, TextStream};
use ai_gateway::models::GenerationMessage;
use ai_gateway::server::{router, AppState, Services};
use ai_gateway::synthesis::{Synthesizer, Waveform};
use ai_gateway::transcription::{DisabledTranscriber, Transcriber, Transcript};
use async_trait::async_trait;
use futures::stream;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Replies with `echo: <last content>` and remembers every prompt it saw,
/// along with the images attached to the last message.
#[derive(Default)]
struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<Vec<u8>>>,
}

impl EchoGenerator {
    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn last_images(&self) -> Vec<Vec<u8>> {
        self.images.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn chat(&self, _model: &str, messages: &[GenerationMessage]) -> GatewayResult<String> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(last.clone());
        *self.images.lock().unwrap() = messages.last().map(|m| m.images.clone()).unwrap_or_default();
        Ok(format!("echo: {}", last))
    }

    async fn chat_stream(
        &self,
        _model: &str,
        messages: &[GenerationMessage],
    ) -> GatewayResult<TextStream> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(last);
        let deltas = vec![
            Ok("Hello".to_string()),
            Ok(", ".to_string()),
            Ok("world".to_string()),
        ];
        Ok(Box::pin(stream::iter(deltas)))
    }

    async fn list_models(&self) -> GatewayResult<Value> {
        Ok(json!({ "models": [{ "name": "fake:latest" }] }))
    }
}

struct FixedTranscriber {
    text: String,
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn transcribe(&self, _audio: Vec<u8>, _filename: &str) -> GatewayResult<Transcript> {
        Ok(Transcript {
            text: self.text.clone(),
            language: Some("en".to_string()),
            language_probability: Some(0.98),
        })
    }
}

/// Emits a short silent mono WAV for any input.
struct SilentSynthesizer;

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn synthesize(&self, _text: &str, _voice: &str, _speed: f64) -> GatewayResult<Waveform> {
        Ok(Waveform {
            bytes: silent_wav(2400),
        })
    }

    fn voices(&self) -> Vec<String> {
        vec!["af_sarah".to_string(), "am_adam".to_string()]
    }

    fn default_voice(&self) -> &str {
        "af_sarah"
    }
}

struct CrashingSynthesizer;

#[async_trait]
impl Synthesizer for CrashingSynthesizer {
    fn availability(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn synthesize(&self, _text: &str, _voice: &str, _speed: f64) -> GatewayResult<Waveform> {
        Err(GatewayError::upstream("synthesis", "engine crashed"))
    }

    fn voices(&self) -> Vec<String> {
        vec!["af_sarah".to_string()]
    }

    fn default_voice(&self) -> &str {
        "af_sarah"
    }
}

/// Streams one delta, then fails.
struct BrokenStreamGenerator;

#[async_trait]
impl Generator for BrokenStreamGenerator {
    async fn chat(&self, _model: &str, _messages: &[GenerationMessage]) -> GatewayResult<String> {
        Ok("unused".to_string())
    }

    async fn chat_stream(
        &self,
        _model: &str,
        _messages: &[GenerationMessage],
    ) -> GatewayResult<TextStream> {
        let items = vec![
            Ok("partial".to_string()),
            Err(GatewayError::upstream("generation", "model crashed")),
        ];
        Ok(Box::pin(stream::iter(items)))
    }

    async fn list_models(&self) -> GatewayResult<Value> {
        Ok(json!({ "models": [] }))
    }
}

/// 26-dimensional letter-frequency vectors.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, texts: &[String]) -> GatewayResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.chars().filter(|c| c.is_ascii_alphabetic()) {
                    v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn silent_wav(frames: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf.into_inner()
}

// ─── Harness ────────────────────────────────────────────────────────

struct TestGateway {
    base: String,
    client: reqwest::Client,
    generator: Arc<EchoGenerator>,
    pool: SqlitePool,
    media_dir: PathBuf,
    _dir: TempDir,
}

impl TestGateway {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post_form(&self, path: &str, form: Form) -> (StatusCode, Value) {
        let resp = self.client.post(self.url(path)).multipart(form).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(&self.media_dir).unwrap().count()
    }
}

/// Engines for a test gateway. Anything left as `None` falls back to the
/// echo generator, the fixed transcriber or the silent synthesizer.
#[derive(Default)]
struct Engines {
    generator: Option<Arc<dyn Generator>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

async fn start_with(engines: Engines) -> TestGateway {
    let dir = TempDir::new().unwrap();
    let config = Config::rooted_at(dir.path());
    let echo = Arc::new(EchoGenerator::default());

    let generator: Arc<dyn Generator> = match engines.generator {
        Some(g) => g,
        None => echo.clone(),
    };
    let transcriber: Arc<dyn Transcriber> = match engines.transcriber {
        Some(t) => t,
        None => Arc::new(FixedTranscriber {
            text: "what time is it".to_string(),
        }),
    };
    let synthesizer: Arc<dyn Synthesizer> = match engines.synthesizer {
        Some(s) => s,
        None => Arc::new(SilentSynthesizer),
    };

    let services = Services {
        generator,
        transcriber,
        synthesizer,
        embedder: Arc::new(LetterEmbedder),
    };
    let state = AppState::new(&config, services).await.unwrap();
    let pool = state.pool.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        generator: echo,
        pool,
        media_dir: config.media.dir.clone(),
        _dir: dir,
    }
}

async fn start(transcriber: Arc<dyn Transcriber>) -> TestGateway {
    start_with(Engines {
        transcriber: Some(transcriber),
        ..Engines::default()
    })
    .await
}

async fn start_default() -> TestGateway {
    start_with(Engines::default()).await
}

fn audio_form(field: &str) -> Form {
    Form::new().part(field.to_string(), Part::bytes(silent_wav(800)).file_name("input.wav"))
}

// ─── Health ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_models() {
    let gw = start_default().await;

    let (status, body) = gw.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = gw.get_json("/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"][0]["name"], "fake:latest");
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sessionless_chat_announces_new_session() {
    let gw = start_default().await;

    let resp = gw
        .client
        .post(gw.url("/chat"))
        .json(&json!({ "messages": [{ "role": "user", "content": "hi there" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.text().await.unwrap();

    let (first, rest) = body.split_once('\n').unwrap();
    let announced: Value = serde_json::from_str(first).unwrap();
    let session_id = announced["session_id"].as_i64().unwrap();
    assert_eq!(rest, "Hello, world");

    let (_, sessions) = gw.get_json("/chat/sessions").await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["id"], session_id);
    assert_eq!(sessions[0]["title"], "hi there");

    // The assistant reply is stored after the stream ends.
    let mut messages = Vec::new();
    for _ in 0..50 {
        let (_, detail) = gw.get_json(&format!("/chat/sessions/{}", session_id)).await;
        messages = detail["messages"].as_array().cloned().unwrap_or_default();
        if messages.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello, world");
}

#[tokio::test]
async fn test_chat_with_existing_session_has_no_header_line() {
    let gw = start_default().await;

    let (status, session) = gw.post_json("/chat/sessions", json!({ "title": "Mine" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = session["id"].as_i64().unwrap();

    let body = gw
        .client
        .post(gw.url("/chat"))
        .json(&json!({
            "session_id": id,
            "messages": [{ "role": "user", "content": "again" }]
        }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Hello, world");

    let (_, detail) = gw.get_json(&format!("/chat/sessions/{}", id)).await;
    assert_eq!(detail["title"], "Mine");
}

#[tokio::test]
async fn test_chat_unknown_session_is_404() {
    let gw = start_default().await;
    let (status, body) = gw
        .post_json(
            "/chat",
            json!({ "session_id": 999, "messages": [{ "role": "user", "content": "x" }] }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_deleted_chat_session_is_gone() {
    let gw = start_default().await;
    let (_, session) = gw.post_json("/chat/sessions", json!({})).await;
    let id = session["id"].as_i64().unwrap();
    assert_eq!(session["title"], "New Chat");

    let resp = gw
        .client
        .delete(gw.url(&format!("/chat/sessions/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = gw.get_json(&format!("/chat/sessions/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── Voice ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_voice_turn_records_one_message_with_two_artifacts() {
    let gw = start_default().await;

    let (status, turn) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turn["user_text"], "what time is it");
    assert_eq!(turn["ai_text"], "echo: what time is it");
    assert_eq!(turn["language"], "en");

    let user_url = turn["user_audio_url"].as_str().unwrap().to_string();
    let reply_url = turn["audio_url"].as_str().unwrap().to_string();
    assert_ne!(user_url, reply_url);
    for url in [&user_url, &reply_url] {
        assert!(url.starts_with("/static/"));
        let resp = gw.client.get(gw.url(url)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.bytes().await.unwrap().is_empty());
    }

    let session_id = turn["session_id"].as_i64().unwrap();
    let (_, detail) = gw.get_json(&format!("/voice/sessions/{}", session_id)).await;
    assert_eq!(detail["title"], "what time is it");
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["user_audio_path"], user_url.as_str());
    assert_eq!(messages[0]["ai_audio_path"], reply_url.as_str());
}

#[tokio::test]
async fn test_voice_empty_transcript_is_rejected() {
    let gw = start(Arc::new(FixedTranscriber {
        text: "   ".to_string(),
    }))
    .await;

    let (status, body) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Could not understand audio");
    assert!(gw.generator.last_prompt().is_none());

    let (_, sessions) = gw.get_json("/voice/sessions").await;
    for s in sessions.as_array().unwrap() {
        let (_, detail) = gw.get_json(&format!("/voice/sessions/{}", s["id"])).await;
        assert!(detail["messages"].as_array().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_voice_unknown_session_is_404() {
    let gw = start_default().await;
    let form = audio_form("audio_file").text("session_id", "4242");
    let (status, body) = gw.post_form("/voice/chat", form).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_deleted_voice_session_removes_media() {
    let gw = start_default().await;
    let (_, turn) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    let id = turn["session_id"].as_i64().unwrap();
    let reply_url = turn["audio_url"].as_str().unwrap().to_string();

    let resp = gw
        .client
        .delete(gw.url(&format!("/voice/sessions/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = gw.get_json(&format!("/voice/sessions/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let resp = gw.client.get(gw.url(&reply_url)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ─── Speech ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disabled_transcriber_is_503() {
    let gw = start(Arc::new(DisabledTranscriber)).await;

    let (status, body) = gw.post_form("/stt", audio_form("file")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");

    let (status, _) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_transcription_writes_history() {
    let gw = start_default().await;
    let (status, body) = gw.post_form("/stt", audio_form("file")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "what time is it");

    let (_, history) = gw.get_json("/stt/history").await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["transcript"], "what time is it");
}

#[tokio::test]
async fn test_tts_returns_wav_with_audio_url() {
    let gw = start_default().await;
    let resp = gw
        .client
        .post(gw.url("/tts"))
        .json(&json!({ "text": "good morning" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "audio/wav");
    let url = resp.headers()["x-audio-url"].to_str().unwrap().to_string();
    assert_eq!(resp.headers()["x-audio-duration-secs"], "0.10");
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..4], b"RIFF");

    let staged = gw.client.get(gw.url(&url)).send().await.unwrap();
    assert_eq!(staged.status(), StatusCode::OK);

    let (_, history) = gw.get_json("/tts/history").await;
    assert_eq!(history[0]["voice"], "af_sarah");
    assert_eq!(history[0]["audio_path"], url.as_str());
}

#[tokio::test]
async fn test_voice_rejects_bad_speed_before_any_work() {
    let gw = start_default().await;
    for speed in ["-1", "0", "NaN"] {
        let form = audio_form("audio_file").text("speed", speed);
        let (status, body) = gw.post_form("/voice/chat", form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "speed {}", speed);
        assert_eq!(body["error"]["code"], "bad_request");
    }
    assert_eq!(gw.count("voice_sessions").await, 0);
    assert_eq!(gw.staged_files(), 0);
}

// ─── Vision ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_vision_forwards_image_and_records_history() {
    let gw = start_default().await;
    let image = b"\x89PNG\r\n\x1a\nnot really pixels".to_vec();
    let form = Form::new()
        .part("file", Part::bytes(image.clone()).file_name("photo.png"))
        .text("prompt", "What is in the picture?");

    let (status, body) = gw.post_form("/vision", form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "llama3.2-vision:latest");
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["content"], "echo: What is in the picture?");
    assert_eq!(gw.generator.last_images(), vec![image.clone()]);

    let (_, history) = gw.get_json("/vision/history").await;
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["prompt"], "What is in the picture?");
    let image_path = rows[0]["image_path"].as_str().unwrap();
    assert!(image_path.starts_with("/static/") && image_path.ends_with(".png"));

    let staged = gw.client.get(gw.url(image_path)).send().await.unwrap();
    assert_eq!(staged.status(), StatusCode::OK);
    assert_eq!(staged.bytes().await.unwrap().to_vec(), image);
}

#[tokio::test]
async fn test_vision_models_matches_models() {
    let gw = start_default().await;
    let (status, body) = gw.get_json("/vision/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, gw.get_json("/models").await.1);
}

// ─── Translation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_translate_records_history() {
    let gw = start_default().await;
    let (status, body) = gw
        .post_json("/translate", json!({ "text": "hello", "target_lang": "French" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let reply = body["message"]["content"].as_str().unwrap().to_string();
    assert!(reply.starts_with("echo: Translate the following text to French."));

    let (_, history) = gw.get_json("/translate/history").await;
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["source_text"], "hello");
    assert_eq!(rows[0]["target_language"], "French");
    assert_eq!(rows[0]["translated_text"], reply.as_str());

    let id = rows[0]["id"].as_i64().unwrap();
    let resp = gw
        .client
        .delete(gw.url(&format!("/translate/history/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let (status, _) = gw.get_json(&format!("/translate/history/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── RAG ────────────────────────────────────────────────────────────

fn text_upload(filename: &str, text: String) -> Form {
    Form::new().part("file", Part::bytes(text.into_bytes()).file_name(filename.to_string()))
}

#[tokio::test]
async fn test_rag_upload_then_query_and_delete() {
    let gw = start_default().await;

    let (status, report) = gw
        .post_form("/rag/upload", text_upload("notes.txt", "abcdefghij".repeat(240)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["chunks_created"], 3);
    let doc_id = report["doc_id"].as_str().unwrap().to_string();

    let (_, listing) = gw.get_json("/rag/documents").await;
    assert_eq!(listing["documents"][0]["doc_id"], doc_id.as_str());
    assert_eq!(listing["documents"][0]["chunk_count"], 3);

    let (status, answer) = gw.post_json("/rag/chat", json!({ "message": "what is inside" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["context_used"], true);
    assert_eq!(answer["num_chunks"], 3);
    let prompt = gw.generator.last_prompt().unwrap();
    assert!(prompt.contains("Context 1: "));
    assert!(prompt.contains("User Question: what is inside"));

    let resp = gw
        .client
        .delete(gw.url(&format!("/rag/documents/{}", doc_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, answer) = gw
        .post_json("/rag/chat", json!({ "message": "anything left", "doc_id": doc_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["context_used"], false);
    assert_eq!(answer["num_chunks"], 0);
    assert_eq!(gw.generator.last_prompt().unwrap(), "anything left");
}

#[tokio::test]
async fn test_rag_unsupported_file_type() {
    let gw = start_default().await;
    let (status, body) = gw
        .post_form("/rag/upload", text_upload("sheet.xlsx", "cells".to_string()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (_, listing) = gw.get_json("/rag/documents").await;
    assert!(listing["documents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rag_delete_unknown_document_is_404() {
    let gw = start_default().await;
    let resp = gw
        .client
        .delete(gw.url("/rag/documents/doc_missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ─── Upstream failures ──────────────────────────────────────────────

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn chat(&self, _model: &str, _messages: &[GenerationMessage]) -> GatewayResult<String> {
        Err(GatewayError::unavailable("generation server is down"))
    }

    async fn chat_stream(
        &self,
        _model: &str,
        _messages: &[GenerationMessage],
    ) -> GatewayResult<TextStream> {
        Err(GatewayError::unavailable("generation server is down"))
    }

    async fn list_models(&self) -> GatewayResult<Value> {
        Err(GatewayError::unavailable("generation server is down"))
    }
}

#[tokio::test]
async fn test_unreachable_generator_fails_before_stream_starts() {
    let gw = start_with(Engines {
        generator: Some(Arc::new(FailingGenerator)),
        ..Engines::default()
    })
    .await;

    let (status, body) = gw
        .post_json("/chat", json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");
    assert_eq!(gw.count("chat_sessions").await, 0);
}

#[tokio::test]
async fn test_chat_stream_failure_midway_stores_no_reply() {
    let gw = start_with(Engines {
        generator: Some(Arc::new(BrokenStreamGenerator)),
        ..Engines::default()
    })
    .await;

    let body = gw
        .client
        .post(gw.url("/chat"))
        .json(&json!({ "messages": [{ "role": "user", "content": "tell me" }] }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let lines: Vec<&str> = body.lines().collect();
    let session_id = serde_json::from_str::<Value>(lines[0]).unwrap()["session_id"]
        .as_i64()
        .unwrap();
    assert_eq!(lines[1], "partial");
    let trailer: Value = serde_json::from_str(lines.last().unwrap()).unwrap();
    assert!(trailer["error"].as_str().unwrap().contains("model crashed"));

    let (_, detail) = gw.get_json(&format!("/chat/sessions/{}", session_id)).await;
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn test_voice_synthesis_failure_leaves_no_message() {
    let gw = start_with(Engines {
        synthesizer: Some(Arc::new(CrashingSynthesizer)),
        ..Engines::default()
    })
    .await;

    let (status, body) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "upstream_error");

    assert_eq!(gw.count("voice_messages").await, 0);
    assert_eq!(gw.count("voice_sessions").await, 1);
    // Only the staged input audio; no reply was produced.
    assert_eq!(gw.staged_files(), 1);
}

#[tokio::test]
async fn test_voice_generation_failure_leaves_no_message() {
    let gw = start_with(Engines {
        generator: Some(Arc::new(FailingGenerator)),
        ..Engines::default()
    })
    .await;

    let (status, _) = gw.post_form("/voice/chat", audio_form("audio_file")).await;
    assert!(status.is_server_error());

    assert_eq!(gw.count("voice_messages").await, 0);
    let (_, sessions) = gw.get_json("/voice/sessions").await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["title"], "Voice Conversation");
    assert_eq!(gw.staged_files(), 1);
}
