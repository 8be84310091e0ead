use std::sync::Arc;

use tracing::info;

use crate::capture::{CaptureStore, CommandScreenSource};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::daemon;
use crate::generation::OllamaClient;
use crate::memory::SqliteMemoryStore;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;
use crate::shell::Shell;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. Memory store
    let store = Arc::new(SqliteMemoryStore::new(&config.memory.db_path).await?);
    store.seed_defaults().await?;
    info!("Memory store initialized ({})", config.memory.db_path);

    // 2. Capture store
    let source = Arc::new(CommandScreenSource::new(config.capture.command.clone()));
    let captures = Arc::new(CaptureStore::new(config.capture.dir.clone(), source));

    // 3. Generation client; an unreachable endpoint is fatal at start-up
    let generator = Arc::new(OllamaClient::new(&config.generation)?);
    generator.initialize().await?;

    // 4. Turn pipeline and shell boundary
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        generator.clone(),
        captures.clone(),
    ));
    let shell = Shell::new(orchestrator, captures.clone());

    let context = Arc::new(AppContext {
        config,
        store,
        generator,
        captures,
        shell,
    });

    // 5. Background capture and retention loops
    Arc::new(Scheduler::new(
        context.store.clone(),
        context.captures.clone(),
        context.config.capture.clone(),
    ))
    .spawn();

    // 6. Shell endpoint (blocks)
    info!("Starting companiond v{}", env!("CARGO_PKG_VERSION"));
    daemon::start_daemon(context).await?;

    Ok(())
}
