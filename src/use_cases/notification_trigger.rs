// NotificationTrigger: the thin contract the core calls on match-found /
// lobby-invite. Delivery (push/email/in-app) is owned by an external
// subsystem; the default sink here only logs, grounded on the teacher's
// preference for `tracing` over any bespoke delivery machinery.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::notification::{Notification, NotificationEntity, NotificationPriority, NotificationType};
use crate::domain::ports::NotificationSink;

pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn create_notification(&self, notification: Notification) {
        tracing::info!(
            user_id = %notification.user_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification enqueued"
        );
    }
}

pub fn match_found_notification(user_id: Uuid, match_id: Uuid, lobby_id: Uuid) -> Notification {
    Notification {
        user_id,
        kind: NotificationType::MatchFound,
        title: "Match found!".to_string(),
        message: "Your match has been found. Join your lobby now.".to_string(),
        data: NotificationEntity {
            entity_type: "lobby".to_string(),
            entity_id: lobby_id,
            action_url: Some(format!("/lobbies/{lobby_id}?matchId={match_id}")),
        },
        priority: NotificationPriority::High,
    }
}
