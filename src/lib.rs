//! # AI Gateway
//!
//! An HTTP gateway in front of local inference runtimes: chat, vision,
//! text-to-speech, speech-to-text, translation, retrieval-augmented
//! generation and a combined voice-chat pipeline.
//!
//! Conversations, history and the RAG document registry live in SQLite;
//! uploaded and generated media are staged in one directory and served
//! under a URL prefix.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────────────┐
//! │  HTTP    │──▶│ Orchestrators │──▶│ Engines                  │
//! │  (axum)  │   │ voice / rag   │   │ Ollama · STT · TTS ·     │
//! └────┬─────┘   └───────┬───────┘   │ embeddings · Chroma      │
//!      │                 │           └──────────────────────────┘
//!      ▼                 ▼
//! ┌──────────┐   ┌───────────────┐
//! │  SQLite  │   │ Media staging │
//! └──────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! aigw init                     # create database and media directory
//! aigw models                   # check the generation server
//! aigw serve                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`models`] | Persisted rows and generation messages |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sessions`] | Chat and voice sessions |
//! | [`history`] | Vision, TTS, STT and translation history |
//! | [`documents`] | RAG document registry |
//! | [`media`] | Media artifact staging |
//! | [`generation`] | Ollama chat client |
//! | [`transcription`] | Speech-to-text client |
//! | [`synthesis`] | Text-to-speech client |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`vector_store`] | SQLite and Chroma retrieval backends |
//! | [`extract`] | PDF/TXT/MD text extraction |
//! | [`chunk`] | Overlapping character windows |
//! | [`rag`] | Ingestion and retrieval-augmented answers |
//! | [`voice`] | Voice-chat pipeline |
//! | [`server`] | HTTP server and router |
//! | [`api`] | Route handlers |

pub mod api;
pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod history;
pub mod media;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod server;
pub mod sessions;
pub mod synthesis;
pub mod transcription;
pub mod vector_store;
pub mod voice;
