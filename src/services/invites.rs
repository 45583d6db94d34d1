use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::InviteConfig;
use crate::db::CalendarRepository;
use crate::error::{AppError, AppResult};
use crate::services::access::{ensure_write, AccessPolicy};
use crate::AppState;

pub const MAX_RECIPIENTS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(alias = "starts_at")]
    pub starts_at: DateTime<Utc>,
    #[serde(alias = "ends_at")]
    pub ends_at: DateTime<Utc>,
    #[serde(default, alias = "time_zone")]
    pub time_zone: Option<String>,
    pub recipients: Vec<String>,
}

impl InviteRequest {
    fn validate(&self) -> AppResult<()> {
        if self.summary.trim().is_empty() {
            return Err(AppError::Validation("summary is required".to_string()));
        }
        if self.ends_at <= self.starts_at {
            return Err(AppError::Validation(
                "endsAt must be after startsAt".to_string(),
            ));
        }
        if self.recipients.is_empty() || self.recipients.len() > MAX_RECIPIENTS {
            return Err(AppError::Validation(format!(
                "between 1 and {} recipients are required",
                MAX_RECIPIENTS
            )));
        }
        if let Some(bad) = self.recipients.iter().find(|r| !r.contains('@')) {
            return Err(AppError::Validation(format!("invalid recipient: {}", bad)));
        }
        Ok(())
    }
}

/// Structured event handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteEvent {
    pub uid: String,
    pub organizer_user_id: String,
    pub calendar_id: Option<String>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub time_zone: Option<String>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteOutcome {
    pub delivered: bool,
    pub uid: String,
}

/// Delivers an assembled invite. Formatting and transport are up to the implementor.
#[async_trait]
pub trait InviteSender: Send + Sync {
    async fn send(&self, event: &InviteEvent) -> AppResult<()>;
}

/// Posts invites as JSON to a configured endpoint.
pub struct WebhookInviteSender {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookInviteSender {
    pub fn new(webhook_url: String, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    /// Build a sender from config, or `None` when invites are disabled.
    pub fn from_config(config: &InviteConfig) -> AppResult<Option<Arc<dyn InviteSender>>> {
        match &config.webhook_url {
            Some(url) => {
                let sender = Self::new(url.clone(), Duration::from_secs(config.timeout_seconds))?;
                Ok(Some(Arc::new(sender)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl InviteSender for WebhookInviteSender {
    async fn send(&self, event: &InviteEvent) -> AppResult<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ServiceUnavailable(format!(
                "Invite delivery error ({}): {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

pub struct InviteService;

impl InviteService {
    /// Assemble an invite for `owner_id` and hand it to the configured sender.
    ///
    /// With no sender configured the invite is assembled but reported undelivered.
    pub async fn send_invite(
        state: &Arc<AppState>,
        access: &dyn AccessPolicy,
        owner_id: &str,
        request: InviteRequest,
    ) -> AppResult<InviteOutcome> {
        ensure_write(access, owner_id).await?;
        request.validate()?;

        let calendar_id = {
            let mut conn = state.db.acquire().await.map_err(AppError::Database)?;
            CalendarRepository::find_default_write(&mut conn, owner_id)
                .await?
                .map(|c| c.id)
        };

        let event = InviteEvent {
            uid: format!("{}@calendar-integrations", Uuid::new_v4()),
            organizer_user_id: owner_id.to_string(),
            calendar_id,
            summary: request.summary.trim().to_string(),
            description: request.description,
            location: request.location,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            time_zone: request.time_zone,
            recipients: request.recipients,
        };

        let Some(sender) = &state.invites else {
            tracing::warn!(user_id = owner_id, uid = %event.uid, "Invite delivery is not configured");
            return Ok(InviteOutcome {
                delivered: false,
                uid: event.uid,
            });
        };

        sender.send(&event).await?;
        tracing::info!(
            user_id = owner_id,
            uid = %event.uid,
            recipients = event.recipients.len(),
            "Invite delivered"
        );

        Ok(InviteOutcome {
            delivered: true,
            uid: event.uid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;

    use crate::config::Config;
    use crate::services::calendar_integrations::tests::AllowAll;
    use crate::services::calendar_integrations::CalendarIntegrationService;
    use crate::services::init::test_pool;
    use crate::services::locks::UserLocks;
    use crate::services::reconcile::DesiredCalendar;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<InviteEvent>>,
    }

    #[async_trait]
    impl InviteSender for RecordingSender {
        async fn send(&self, event: &InviteEvent) -> AppResult<()> {
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl InviteSender for FailingSender {
        async fn send(&self, _event: &InviteEvent) -> AppResult<()> {
            Err(AppError::ServiceUnavailable("down".to_string()))
        }
    }

    async fn state_with(sender: Option<Arc<dyn InviteSender>>) -> Arc<AppState> {
        Arc::new(AppState {
            db: test_pool().await,
            config: Config::default(),
            locks: UserLocks::new(),
            invites: sender,
        })
    }

    fn request() -> InviteRequest {
        InviteRequest {
            summary: "Planning".to_string(),
            description: None,
            location: Some("Room 1".to_string()),
            starts_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            time_zone: Some("Europe/Berlin".to_string()),
            recipients: vec!["a@example.com".to_string()],
        }
    }

    #[tokio::test]
    async fn assembles_event_with_default_calendar() {
        let sender = Arc::new(RecordingSender::default());
        let state = state_with(Some(sender.clone())).await;

        let replaced = CalendarIntegrationService::replace(
            &state,
            &AllowAll,
            "u1",
            vec![DesiredCalendar {
                provider: "google".to_string(),
                external_calendar_id: Some("primary".to_string()),
                is_default_write: Some(true),
                ..Default::default()
            }],
        )
        .await
        .unwrap();
        let calendar_id = replaced.summary.default_write_calendar_id.unwrap();

        let outcome = InviteService::send_invite(&state, &AllowAll, "u1", request())
            .await
            .unwrap();
        assert!(outcome.delivered);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].uid, outcome.uid);
        assert_eq!(sent[0].organizer_user_id, "u1");
        assert_eq!(sent[0].calendar_id.as_deref(), Some(calendar_id.as_str()));
    }

    #[tokio::test]
    async fn reports_undelivered_without_sender() {
        let state = state_with(None).await;
        let outcome = InviteService::send_invite(&state, &AllowAll, "u1", request())
            .await
            .unwrap();
        assert!(!outcome.delivered);
        assert!(!outcome.uid.is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_is_propagated() {
        let state = state_with(Some(Arc::new(FailingSender))).await;
        let err = InviteService::send_invite(&state, &AllowAll, "u1", request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_a_request_error() {
        let sender =
            WebhookInviteSender::new("http://127.0.0.1:1/invites".to_string(), Duration::from_secs(2))
                .unwrap();
        let state = state_with(Some(Arc::new(sender))).await;
        let err = InviteService::send_invite(&state, &AllowAll, "u1", request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Request(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let state = state_with(None).await;

        let mut bad_time = request();
        bad_time.ends_at = bad_time.starts_at;
        let mut no_recipients = request();
        no_recipients.recipients.clear();
        let mut bad_recipient = request();
        bad_recipient.recipients = vec!["nobody".to_string()];
        let mut blank = request();
        blank.summary = "  ".to_string();

        for req in [bad_time, no_recipients, bad_recipient, blank] {
            let err = InviteService::send_invite(&state, &AllowAll, "u1", req)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }
}
