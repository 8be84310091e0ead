//! Process-wide wiring, built once at start-up and passed down explicitly.
//! No globals; every component reaches its collaborators through here.

use std::sync::Arc;

use crate::capture::CaptureStore;
use crate::config::AppConfig;
use crate::shell::Shell;
use crate::traits::{Generator, MemoryStore};

#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<dyn MemoryStore>,
    pub generator: Arc<dyn Generator>,
    pub captures: Arc<CaptureStore>,
    pub shell: Shell,
}
