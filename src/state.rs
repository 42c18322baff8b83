use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::models::OutreachCandidate;
use crate::services::channels::ChannelRegistry;
use crate::services::drafting::MessageDrafter;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub drafter: Box<dyn MessageDrafter>,
    pub channels: ChannelRegistry,
    pub paused: AtomicBool,
    pub candidate_tx: broadcast::Sender<OutreachCandidate>,
}
