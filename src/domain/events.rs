// Cross-cutting event payloads emitted by use cases and fanned out by
// SocketHub. Kept here (rather than in interface_adapters) so
// MatchmakingService/LobbyEngine can depend on a port instead of reaching
// into the adapter layer -- Design Note "circular Service<->Service
// requires ... resolved by injecting interfaces at construction."

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingStatusKind {
    Searching,
    Matched,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchmakingStatusEvent {
    pub request_id: Uuid,
    pub status: MatchmakingStatusKind,
    pub search_time_ms: u64,
    pub estimated_time_ms: Option<u64>,
    pub potential_matches: Option<usize>,
    pub match_id: Option<Uuid>,
    pub lobby_id: Option<Uuid>,
    pub participants: Option<Vec<Uuid>>,
    pub timestamp: u64,
}
