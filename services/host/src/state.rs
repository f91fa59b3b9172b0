use std::sync::Arc;

use pepper_core::CoordinatorSnapshot;
use tokio::sync::{mpsc, watch};

use crate::audio::AudioHub;
use crate::config::Config;
use crate::session::HostCommand;
use crate::touch::TouchDebouncer;

/// Shared application state for the control surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub commands: mpsc::UnboundedSender<HostCommand>,
    pub snapshot: Arc<watch::Sender<CoordinatorSnapshot>>,
    pub touch: Arc<TouchDebouncer>,
    pub audio: AudioHub,
}
