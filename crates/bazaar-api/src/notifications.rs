use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::debug;

use bazaar_db::Database;
use bazaar_gateway::bus::EventBus;
use bazaar_types::api::{ApiResponse, Claims, MarkAllReadResponse, NotificationFeed};
use bazaar_types::events::ChatEvent;
use bazaar_types::models::Notification;

use crate::error::{ApiError, PersistenceExt};
use crate::run_blocking;
use crate::state::AppState;

/// Persists feed entries and pushes them to the owner's open streams.
#[derive(Clone)]
pub struct Notifier {
    db: Arc<Database>,
    bus: EventBus,
}

impl Notifier {
    pub fn new(db: Arc<Database>, bus: EventBus) -> Self {
        Self { db, bus }
    }

    pub async fn notify(&self, user_id: i64, message: impl Into<String>) -> Result<Notification, ApiError> {
        let message = message.into();
        let db = self.db.clone();
        let notification = run_blocking(move || db.insert_notification(user_id, &message)?.into_model())
            .await
            .or_persistence("Failed to create notification")?;

        let reached = self.bus.publish(
            user_id,
            &ChatEvent::Notification {
                id: notification.id,
                message: notification.message.clone(),
                created_at: notification.created_at,
            },
        );
        debug!("Notification {} for user {} pushed to {} streams", notification.id, user_id, reached);

        Ok(notification)
    }

    pub async fn feed(&self, user_id: i64, unread_only: bool) -> Result<NotificationFeed, ApiError> {
        let db = self.db.clone();
        run_blocking(move || {
            let notifications = db
                .list_notifications(user_id, unread_only)?
                .into_iter()
                .map(|row| row.into_model())
                .collect::<anyhow::Result<Vec<_>>>()?;
            let unread_count = db.count_unread_notifications(user_id)?;
            Ok(NotificationFeed {
                notifications,
                unread_count,
            })
        })
        .await
        .or_persistence("Failed to get notifications")
    }

    pub async fn mark_read(&self, user_id: i64, id: i64) -> Result<(), ApiError> {
        let db = self.db.clone();
        let found = run_blocking(move || db.mark_notification_read(user_id, id))
            .await
            .or_persistence("Failed to update notification")?;
        found.then_some(()).ok_or(ApiError::NotFound("Notification not found"))
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<usize, ApiError> {
        let db = self.db.clone();
        run_blocking(move || db.mark_all_notifications_read(user_id))
            .await
            .or_persistence("Failed to update notifications")
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), ApiError> {
        let db = self.db.clone();
        let found = run_blocking(move || db.delete_notification(user_id, id))
            .await
            .or_persistence("Failed to delete notification")?;
        found.then_some(()).ok_or(ApiError::NotFound("Notification not found"))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub unread: bool,
}

/// GET /notifications
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<FeedQuery>, ApiError>,
) -> Result<Json<ApiResponse<NotificationFeed>>, ApiError> {
    let feed = state.notifier.feed(claims.sub, query.unread).await?;
    Ok(Json(ApiResponse::ok(feed)))
}

/// POST /notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.notifier.mark_read(claims.sub, id).await?;
    Ok(Json(ApiResponse::empty()))
}

/// POST /notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<MarkAllReadResponse>>, ApiError> {
    let updated = state.notifier.mark_all_read(claims.sub).await?;
    Ok(Json(ApiResponse::ok(MarkAllReadResponse { updated })))
}

/// DELETE /notifications/{id}
pub async fn remove(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.notifier.delete(claims.sub, id).await?;
    Ok(Json(ApiResponse::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> (Notifier, EventBus) {
        let bus = EventBus::default();
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Notifier::new(db, bus.clone()), bus)
    }

    #[tokio::test]
    async fn notify_persists_and_pushes() {
        let (notifier, bus) = notifier();
        let mut sub = bus.register(4);

        let n = notifier.notify(4, "Your listing sold").await.unwrap();
        assert!(!n.is_read);

        let payload = sub.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["message"], "Your listing sold");
        assert_eq!(value["data"]["id"], n.id);

        let feed = notifier.feed(4, false).await.unwrap();
        assert_eq!(feed.unread_count, 1);
        assert_eq!(feed.notifications, vec![n]);
    }

    #[tokio::test]
    async fn foreign_notification_looks_missing() {
        let (notifier, _bus) = notifier();
        let n = notifier.notify(4, "hello").await.unwrap();

        assert!(matches!(notifier.mark_read(5, n.id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(notifier.delete(5, n.id).await, Err(ApiError::NotFound(_))));

        notifier.mark_read(4, n.id).await.unwrap();
        assert_eq!(notifier.feed(4, true).await.unwrap().notifications.len(), 0);
        assert_eq!(notifier.mark_all_read(4).await.unwrap(), 0);
        notifier.delete(4, n.id).await.unwrap();
    }
}
