// AppState: the composition root's handle bundle, injected into every axum
// handler via `State<Arc<AppState>>`. Grounded on
// `auth_server::interface_adapters::state::AppState`'s thin bundle-of-handles
// shape, generalized to this service's richer set of collaborators.

use std::sync::Arc;

use crate::domain::ports::Persistence;
use crate::frameworks::config::Config;
use crate::interface_adapters::socket_hub::SocketHub;
use crate::use_cases::lobby_engine::LobbyEngine;
use crate::use_cases::matchmaking_service::MatchmakingService;

pub struct AppState {
    pub matchmaking: Arc<MatchmakingService>,
    pub lobby_engine: Arc<LobbyEngine>,
    pub persistence: Arc<dyn Persistence>,
    pub socket_hub: Arc<SocketHub>,
    pub config: Config,
}
