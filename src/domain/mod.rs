// Domain layer: explicit entity types, error kinds, and the capability
// interfaces (ports) that use cases depend on. Dependencies point inwards;
// nothing here depends on interface_adapters or frameworks.

pub mod chat;
pub mod criteria;
pub mod errors;
pub mod events;
pub mod lobby;
pub mod match_history;
pub mod match_request;
pub mod notification;
pub mod ports;
pub mod user;

pub use chat::*;
pub use criteria::*;
pub use errors::*;
pub use events::*;
pub use lobby::*;
pub use match_history::*;
pub use match_request::*;
pub use notification::*;
pub use ports::*;
pub use user::*;
