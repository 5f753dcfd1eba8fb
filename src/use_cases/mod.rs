// Use-case layer: orchestration and business rules over domain ports.
// Depends only on `domain`; never on interface_adapters or frameworks.

pub mod lobby_engine;
pub mod lock_manager;
pub mod match_algorithm;
pub mod matchmaking_service;
pub mod notification_trigger;
pub mod pagination;
pub mod queue_manager;
