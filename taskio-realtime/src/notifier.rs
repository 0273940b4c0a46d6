//! Notification assembly: resolve the audience for a mutation and fan out.
//!
//! The assembler sits between the collaborator façades and the session
//! registry. Audience resolution always queries the membership service
//! directly, never the cache, so a membership change and the event that
//! announces it cannot observe each other out of order. Every entry point
//! returns `()`: a failed notification is logged and dropped, it must never
//! fail or delay the mutating request that triggered it.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use taskio_core::directory::ProjectDirectory;
use taskio_core::metrics;
use taskio_core::models::{ProjectId, ProjectMember, UserId};
use taskio_core::Result;

use crate::broker::MessageHandler;
use crate::events::{Event, EventPayload, PushMessage};
use crate::registry::SessionRegistry;

/// Resolves audiences and pushes events through the session registry.
///
/// Also serves as the broker bridge's [`MessageHandler`]: messages consumed
/// off the stream carry a precomputed audience and go straight to
/// [`Notifier::notify_users`].
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn ProjectDirectory>,
}

impl Notifier {
    pub fn new(registry: Arc<SessionRegistry>, directory: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// Deliver `event` to every current member of the project.
    ///
    /// Membership is fetched fresh from the collaborator service. If the
    /// lookup fails the notification is dropped with a warning; clients
    /// recover on their next refetch.
    pub async fn notify_project_participants(&self, project_id: &ProjectId, event: Event) {
        let members = match self.directory.project_members(project_id).await {
            Ok(members) => members,
            Err(e) => {
                metrics::sessions::EVENTS_DROPPED
                    .with_label_values(&["membership_lookup_failed"])
                    .inc();
                warn!(
                    project_id = %project_id.as_str(),
                    event_type = %event.event_type,
                    error = %e,
                    "Membership lookup failed, dropping notification"
                );
                return;
            }
        };

        let mut delivered = 0;
        for member in &members {
            delivered += self.registry.send_to_user(&member.user_id, &event);
        }
        debug!(
            project_id = %project_id.as_str(),
            event_type = %event.event_type,
            members = members.len(),
            delivered = delivered,
            "Notified project participants"
        );
    }

    /// Compare two membership lists and tell each affected user about their
    /// own change.
    ///
    /// Added users receive `project_user_added`, removed users receive
    /// `project_user_removed`, and nobody else is contacted. Unchanged
    /// members learn about roster changes from their next membership read.
    pub fn notify_membership_delta(
        &self,
        project_id: &ProjectId,
        old_members: &[ProjectMember],
        new_members: &[ProjectMember],
    ) {
        let old_ids: HashSet<&UserId> = old_members.iter().map(|m| &m.user_id).collect();
        let new_ids: HashSet<&UserId> = new_members.iter().map(|m| &m.user_id).collect();

        let mut added = 0;
        for user_id in new_ids.difference(&old_ids).copied() {
            let event = Event::member_added(project_id, user_id);
            self.registry.send_to_user(user_id, &event);
            added += 1;
        }

        let mut removed = 0;
        for user_id in old_ids.difference(&new_ids).copied() {
            let event = Event::member_removed(project_id, user_id);
            self.registry.send_to_user(user_id, &event);
            removed += 1;
        }

        if added > 0 || removed > 0 {
            debug!(
                project_id = %project_id.as_str(),
                added = added,
                removed = removed,
                "Notified membership delta"
            );
        }
    }

    /// Shape a create/update/delete event for a sprint, epic or task and
    /// deliver it to the owning project's members.
    pub async fn notify_entity_event<T>(&self, event_type: &str, entity: &T)
    where
        T: EventPayload + Sync,
    {
        let project_id = entity.project_id().clone();
        let event = match Event::entity(event_type, entity) {
            Ok(event) => event,
            Err(e) => {
                metrics::sessions::EVENTS_DROPPED
                    .with_label_values(&["payload_shape_failed"])
                    .inc();
                warn!(
                    event_type = event_type,
                    project_id = %project_id.as_str(),
                    error = %e,
                    "Failed to shape entity event, dropping notification"
                );
                return;
            }
        };
        self.notify_project_participants(&project_id, event).await;
    }

    /// Fan out to an explicit, already-resolved audience.
    pub fn notify_users(&self, users: &[UserId], event: &Event) {
        let mut delivered = 0;
        for user_id in users {
            delivered += self.registry.send_to_user(user_id, event);
        }
        debug!(
            event_type = %event.event_type,
            audience = users.len(),
            delivered = delivered,
            "Fanned out to explicit audience"
        );
    }
}

#[async_trait]
impl MessageHandler for Notifier {
    async fn handle(&self, message: PushMessage) -> Result<()> {
        self.notify_users(&message.users, &message.event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types;
    use mockall::mock;
    use serde_json::Map;
    use taskio_core::models::{MemberRole, Sprint, SprintId};
    use taskio_core::Error;
    use tokio::sync::mpsc::error::TryRecvError;

    mock! {
        Directory {}

        #[async_trait]
        impl ProjectDirectory for Directory {
            async fn project_members(&self, project_id: &ProjectId) -> Result<Vec<ProjectMember>>;
        }
    }

    fn user(id: &str) -> UserId {
        UserId::from_string(id.to_string())
    }

    fn member(id: &str) -> ProjectMember {
        ProjectMember::with_role(user(id), MemberRole::Assignee)
    }

    fn project() -> ProjectId {
        ProjectId::from_string("p1".to_string())
    }

    fn test_event() -> Event {
        Event::for_project(types::TASK_UPDATED, project(), Map::new())
    }

    fn notifier_with(directory: MockDirectory) -> (Notifier, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let notifier = Notifier::new(registry.clone(), Arc::new(directory));
        (notifier, registry)
    }

    #[tokio::test]
    async fn test_participants_receive_event() {
        let mut directory = MockDirectory::new();
        directory
            .expect_project_members()
            .returning(|_| Ok(vec![member("alice"), member("bob")]));
        let (notifier, registry) = notifier_with(directory);

        let (_, mut alice_rx) = registry.connect(user("alice"));
        let (_, mut bob_rx) = registry.connect(user("bob"));
        let (_, mut carol_rx) = registry.connect(user("carol"));

        notifier
            .notify_project_participants(&project(), test_event())
            .await;

        assert_eq!(alice_rx.try_recv().unwrap().event_type, types::TASK_UPDATED);
        assert_eq!(bob_rx.try_recv().unwrap().event_type, types::TASK_UPDATED);
        // Not a member, gets nothing.
        assert_eq!(carol_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_lookup_failure_drops_notification() {
        let mut directory = MockDirectory::new();
        directory
            .expect_project_members()
            .returning(|_| Err(Error::Upstream("membership service unreachable".to_string())));
        let (notifier, registry) = notifier_with(directory);

        let (_, mut alice_rx) = registry.connect(user("alice"));

        // Returns without error; nobody receives a push.
        notifier
            .notify_project_participants(&project(), test_event())
            .await;

        assert_eq!(alice_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_membership_delta_reaches_only_affected_users() {
        let (notifier, registry) = notifier_with(MockDirectory::new());

        let (_, mut alice_rx) = registry.connect(user("alice"));
        let (_, mut bob_rx) = registry.connect(user("bob"));
        let (_, mut carol_rx) = registry.connect(user("carol"));

        let old_members = vec![member("alice"), member("bob")];
        let new_members = vec![member("bob"), member("carol")];
        notifier.notify_membership_delta(&project(), &old_members, &new_members);

        let removed = alice_rx.try_recv().unwrap();
        assert_eq!(removed.event_type, types::PROJECT_USER_REMOVED);
        assert_eq!(removed.project_id, Some(project()));
        assert_eq!(
            removed.payload.get("user_id").and_then(|v| v.as_str()),
            Some("alice")
        );
        assert_eq!(alice_rx.try_recv().unwrap_err(), TryRecvError::Empty);

        let added = carol_rx.try_recv().unwrap();
        assert_eq!(added.event_type, types::PROJECT_USER_ADDED);
        assert_eq!(
            added.payload.get("user_id").and_then(|v| v.as_str()),
            Some("carol")
        );
        assert_eq!(carol_rx.try_recv().unwrap_err(), TryRecvError::Empty);

        // Present in both lists, hears nothing.
        assert_eq!(bob_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_unchanged_membership_emits_nothing() {
        let (notifier, registry) = notifier_with(MockDirectory::new());
        let (_, mut alice_rx) = registry.connect(user("alice"));

        let members = vec![member("alice")];
        notifier.notify_membership_delta(&project(), &members, &members);

        assert_eq!(alice_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_entity_event_is_shaped_and_fanned_out() {
        let mut directory = MockDirectory::new();
        directory
            .expect_project_members()
            .returning(|_| Ok(vec![member("alice")]));
        let (notifier, registry) = notifier_with(directory);

        let (_, mut alice_rx) = registry.connect(user("alice"));

        let sprint = Sprint {
            id: SprintId::from_string("s1".to_string()),
            project_id: project(),
            name: "Sprint 1".to_string(),
            description: None,
            start_date: None,
            end_date: None,
            is_started: false,
        };
        notifier
            .notify_entity_event(types::SPRINT_CREATED, &sprint)
            .await;

        let event = alice_rx.try_recv().unwrap();
        assert_eq!(event.event_type, types::SPRINT_CREATED);
        assert_eq!(event.project_id, Some(project()));
        let nested = event.payload.get("sprint").unwrap();
        assert_eq!(nested.get("name").and_then(|v| v.as_str()), Some("Sprint 1"));
        assert!(nested.get("project_id").is_none());
    }

    #[tokio::test]
    async fn test_notify_users_targets_exact_audience() {
        let (notifier, registry) = notifier_with(MockDirectory::new());

        let (_, mut alice_rx) = registry.connect(user("alice"));
        let (_, mut bob_rx) = registry.connect(user("bob"));

        notifier.notify_users(&[user("alice")], &test_event());

        assert!(alice_rx.try_recv().is_ok());
        assert_eq!(bob_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_handle_delivers_to_local_sessions() {
        let (notifier, registry) = notifier_with(MockDirectory::new());
        let (_, mut alice_rx) = registry.connect(user("alice"));

        let message = PushMessage::new(vec![user("alice")], test_event());
        notifier.handle(message).await.unwrap();

        assert_eq!(alice_rx.try_recv().unwrap().event_type, types::TASK_UPDATED);
    }
}
