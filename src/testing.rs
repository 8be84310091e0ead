//! Test infrastructure: MockGenerator, ScriptedScreenSource, and TestHarness.
//!
//! Provides a fully wired Orchestrator with a scripted model and temp-file
//! store, suitable for tests that exercise the real turn pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::capture::CaptureStore;
use crate::error::CoreError;
use crate::memory::SqliteMemoryStore;
use crate::orchestrator::Orchestrator;
use crate::traits::{ChunkStream, Generator, ScreenSource};
use crate::types::{ChatMessage, GenerationStatus, SamplingOverrides};

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Scripted generation backend. Blocking replies and stream scripts are
/// FIFO queues; an exhausted queue falls back to a fixed default reply.
pub struct MockGenerator {
    replies: Mutex<Vec<Result<String, CoreError>>>,
    stream_scripts: Mutex<Vec<Vec<Result<String, CoreError>>>>,
    pub call_log: Mutex<Vec<Vec<ChatMessage>>>,
}

const DEFAULT_REPLY: &str = "Mock reply";

impl MockGenerator {
    /// A generator that always answers with the default reply.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            stream_scripts: Mutex::new(Vec::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// A generator with a FIFO queue of successful replies.
    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            stream_scripts: Mutex::new(Vec::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// A generator whose next two blocking calls fail with a generation
    /// error; the queue depth matters because an exhausted queue falls
    /// back to a successful default reply.
    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(vec![
                Err(CoreError::generation(message.to_string())),
                Err(CoreError::generation(message.to_string())),
            ]),
            stream_scripts: Mutex::new(Vec::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Queue one streaming script; each call to `generate_stream` consumes
    /// one script.
    pub async fn push_stream(&self, chunks: Vec<Result<String, CoreError>>) {
        self.stream_scripts.lock().await.push(chunks);
    }

    /// How many generation calls (blocking or streaming) were made.
    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    /// The wire messages of every recorded call.
    pub async fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.call_log.lock().await.clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _overrides: Option<&SamplingOverrides>,
    ) -> Result<String, CoreError> {
        self.call_log.lock().await.push(messages.to_vec());

        let mut replies = self.replies.lock().await;
        if replies.is_empty() {
            Ok(DEFAULT_REPLY.to_string())
        } else {
            replies.remove(0)
        }
    }

    async fn generate_stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CoreError> {
        self.call_log.lock().await.push(messages.to_vec());

        let mut scripts = self.stream_scripts.lock().await;
        let script = if scripts.is_empty() {
            vec![Ok(DEFAULT_REPLY.to_string())]
        } else {
            scripts.remove(0)
        };
        Ok(futures::stream::iter(script).boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>, CoreError> {
        Ok(vec!["mock-model".to_string()])
    }

    fn status(&self) -> GenerationStatus {
        GenerationStatus {
            ready: true,
            model: "mock-model".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedScreenSource
// ---------------------------------------------------------------------------

/// Screen source that plays back scripted frames. An exhausted queue
/// returns a small fixed PNG, so captures always succeed unless a failure
/// was scripted.
pub struct ScriptedScreenSource {
    frames: Mutex<Vec<Result<Vec<u8>, String>>>,
}

impl ScriptedScreenSource {
    pub fn new(frames: Vec<Result<Vec<u8>, String>>) -> Self {
        Self {
            frames: Mutex::new(frames),
        }
    }
}

#[async_trait]
impl ScreenSource for ScriptedScreenSource {
    async fn grab(&self) -> Result<Vec<u8>, CoreError> {
        let mut frames = self.frames.lock().await;
        if frames.is_empty() {
            return Ok(fake_png(2, 2));
        }
        match frames.remove(0) {
            Ok(bytes) => Ok(bytes),
            Err(message) => Err(CoreError::capture(message)),
        }
    }
}

/// A byte buffer with a valid PNG signature and IHDR header. Enough for
/// hashing and header parsing; not a decodable image.
pub fn fake_png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    // bit depth, color type, compression, filter, interlace
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    // CRC is never verified by the header parser
    bytes.extend_from_slice(&[0; 4]);
    bytes
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Everything needed to run tests against the turn pipeline.
#[allow(dead_code)]
pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SqliteMemoryStore>,
    pub generator: Arc<MockGenerator>,
    pub captures: Arc<CaptureStore>,
    /// Keep the temp file alive; the DB is deleted when this drops.
    _db_file: tempfile::NamedTempFile,
    /// Keep the capture temp dir alive.
    _capture_dir: tempfile::TempDir,
}

/// Build a fully-wired orchestrator with a scripted generator, a seeded
/// temp-file SQLite store, and a temp capture directory.
///
/// Each call creates an isolated database, so tests can run in parallel.
pub async fn setup_test_harness(generator: MockGenerator) -> anyhow::Result<TestHarness> {
    // Temp file for SQLite (pool needs a real file, not :memory:)
    let db_file = tempfile::NamedTempFile::new()?;
    let db_path = db_file.path().to_str().unwrap().to_string();

    let store = Arc::new(SqliteMemoryStore::new(&db_path).await?);
    store.seed_defaults().await?;

    let capture_dir = tempfile::TempDir::new()?;
    let captures = Arc::new(CaptureStore::new(
        capture_dir.path(),
        Arc::new(ScriptedScreenSource::new(Vec::new())),
    ));

    let generator = Arc::new(generator);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        generator.clone(),
        captures.clone(),
    ));

    Ok(TestHarness {
        orchestrator,
        store,
        generator,
        captures,
        _db_file: db_file,
        _capture_dir: capture_dir,
    })
}
