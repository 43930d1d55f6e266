use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use yard_control::{CrewController, SimHost};
use yard_core::{EngineContext, EventEnvelope, YardContent};

/// Engine, host and crew behind one lock. A reclamation phase or crew step
/// holds it for its whole duration.
pub struct YardState {
    pub ctx: EngineContext,
    pub content: YardContent,
    pub host: SimHost,
    pub crew: CrewController,
    pub rng: ChaCha8Rng,
    pub seed: u64,
    pub cycles_run: u64,
}

pub type SharedYard = Arc<Mutex<YardState>>;
pub type EventTx = broadcast::Sender<Vec<EventEnvelope>>;

#[derive(Clone)]
pub struct AppState {
    pub yard: SharedYard,
    pub event_tx: EventTx,
    /// Where `POST /api/v1/save` writes; `None` disables saving.
    pub save_path: Option<PathBuf>,
}
