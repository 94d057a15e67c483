use std::sync::Arc;

use tracing::{info, warn};

use bazaar_db::Database;
use bazaar_gateway::bus::EventBus;
use bazaar_types::events::ChatEvent;
use bazaar_types::models::{ChatMessage, Conversation};

use crate::error::{ApiError, PersistenceExt};
use crate::notifications::Notifier;
use crate::participants::{ParticipantResolver, Participants};
use crate::run_blocking;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Conversation and message commands: persist first, then push live
/// events to the participants' open streams.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    resolver: Arc<dyn ParticipantResolver>,
    bus: EventBus,
    notifier: Notifier,
}

impl ChatService {
    pub fn new(db: Arc<Database>, bus: EventBus, notifier: Notifier) -> Self {
        Self {
            resolver: db.clone(),
            db,
            bus,
            notifier,
        }
    }

    /// Replace the participant lookup (the database by default).
    pub fn with_resolver(mut self, resolver: Arc<dyn ParticipantResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    async fn participants(&self, conversation_id: i64) -> Result<Participants, ApiError> {
        let resolver = self.resolver.clone();
        run_blocking(move || resolver.participants(conversation_id))
            .await
            .or_persistence("Failed to load conversation")?
            .ok_or(ApiError::NotFound("Conversation not found"))
    }

    /// Return the conversation for this product/buyer/seller, creating it
    /// on first contact. The seller is notified when a new one is opened.
    pub async fn ensure_conversation(
        &self,
        caller: i64,
        product_id: i64,
        buyer_id: i64,
        seller_id: i64,
    ) -> Result<i64, ApiError> {
        if product_id <= 0 || buyer_id <= 0 || seller_id <= 0 {
            return Err(ApiError::Validation("product_id, buyer_id and seller_id are required"));
        }
        if buyer_id == seller_id {
            return Err(ApiError::Validation("Buyer and seller must be different users"));
        }
        if caller != buyer_id && caller != seller_id {
            return Err(ApiError::Forbidden);
        }

        let db = self.db.clone();
        let (conversation_id, created) =
            run_blocking(move || db.ensure_conversation(product_id, buyer_id, seller_id))
                .await
                .or_persistence("Failed to start conversation")?;

        if created {
            info!(
                "Conversation {} opened for product {} (buyer {}, seller {})",
                conversation_id, product_id, buyer_id, seller_id
            );
            // The conversation exists either way; a lost notification is not
            // worth failing the request over.
            if let Err(e) = self
                .notifier
                .notify(seller_id, format!("New inquiry about product #{}", product_id))
                .await
            {
                warn!("Could not notify seller {}: {}", seller_id, e);
            }
        }

        Ok(conversation_id)
    }

    /// Persist a message and push it to every participant, the sender
    /// included so their other open streams update too.
    pub async fn send_message(
        &self,
        sender_id: i64,
        conversation_id: i64,
        content: String,
    ) -> Result<ChatMessage, ApiError> {
        if conversation_id <= 0 {
            return Err(ApiError::Validation("conversation_id is required"));
        }
        if content.trim().is_empty() {
            return Err(ApiError::Validation("content is required"));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ApiError::Validation("Message is too long"));
        }

        let participants = self.participants(conversation_id).await?;
        if !participants.contains(sender_id) {
            return Err(ApiError::Forbidden);
        }

        let db = self.db.clone();
        let message = run_blocking(move || {
            db.insert_message(conversation_id, sender_id, &content)?.into_model()
        })
        .await
        .or_persistence("Failed to send message")?;

        self.bus.publish_to(
            participants.iter(),
            &ChatEvent::Message {
                id: message.id,
                conversation_id,
                sender_id,
                content: message.content.clone(),
                created_at: message.created_at,
            },
        );

        Ok(message)
    }

    /// Tell the other participant that `user_id` is typing. Never echoed
    /// back to the typist.
    pub async fn typing(&self, user_id: i64, conversation_id: i64) -> Result<(), ApiError> {
        if conversation_id <= 0 {
            return Err(ApiError::Validation("conversation_id is required"));
        }

        let participants = self.participants(conversation_id).await?;
        if !participants.contains(user_id) {
            return Err(ApiError::Forbidden);
        }

        self.bus.publish_to(
            participants.others(user_id),
            &ChatEvent::Typing {
                conversation_id,
                user_id,
            },
        );
        Ok(())
    }

    /// Conversations the user is buyer or seller in, most recently active first.
    pub async fn conversations(&self, user_id: i64) -> Result<Vec<Conversation>, ApiError> {
        let db = self.db.clone();
        run_blocking(move || {
            db.list_conversations_for_user(user_id)?
                .into_iter()
                .map(|row| row.into_model())
                .collect()
        })
        .await
        .or_persistence("Failed to get conversations")
    }

    /// A page of a conversation's messages, oldest first. Only participants
    /// may read them.
    pub async fn messages(
        &self,
        user_id: i64,
        conversation_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let participants = self.participants(conversation_id).await?;
        if !participants.contains(user_id) {
            return Err(ApiError::Forbidden);
        }

        let db = self.db.clone();
        run_blocking(move || {
            db.list_messages(conversation_id, limit, before)?
                .into_iter()
                .map(|row| row.into_model())
                .collect()
        })
        .await
        .or_persistence("Failed to get messages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_gateway::bus::Subscription;

    struct Fixture {
        chat: ChatService,
        bus: EventBus,
        db: Arc<Database>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let bus = EventBus::default();
        let notifier = Notifier::new(db.clone(), bus.clone());
        Fixture {
            chat: ChatService::new(db.clone(), bus.clone(), notifier),
            bus,
            db,
        }
    }

    fn next_event(sub: &mut Subscription) -> Option<serde_json::Value> {
        sub.try_recv().map(|p| serde_json::from_str(&p).unwrap())
    }

    #[tokio::test]
    async fn ensure_conversation_returns_same_id_twice() {
        let f = fixture();
        let first = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        let second = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn new_conversation_notifies_seller_once() {
        let f = fixture();
        let mut seller = f.bus.register(2);

        f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        f.chat.ensure_conversation(2, 5, 1, 2).await.unwrap();

        let event = next_event(&mut seller).unwrap();
        assert_eq!(event["type"], "notification");
        assert_eq!(event["data"]["message"], "New inquiry about product #5");
        assert!(next_event(&mut seller).is_none());
        assert_eq!(f.db.count_unread_notifications(2).unwrap(), 1);
    }

    #[tokio::test]
    async fn ensure_conversation_validates_input() {
        let f = fixture();
        assert!(matches!(
            f.chat.ensure_conversation(1, 0, 1, 2).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            f.chat.ensure_conversation(1, 5, 1, 1).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            f.chat.ensure_conversation(3, 5, 1, 2).await,
            Err(ApiError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn send_message_reaches_both_participants_and_all_sender_tabs() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        let mut buyer_tab_a = f.bus.register(1);
        let mut buyer_tab_b = f.bus.register(1);
        let mut seller = f.bus.register(2);
        let mut stranger = f.bus.register(3);

        let msg = f.chat.send_message(1, conv, "Is this still available?".into()).await.unwrap();
        assert_eq!(msg.sender_id, 1);

        for sub in [&mut buyer_tab_a, &mut buyer_tab_b, &mut seller] {
            let event = next_event(sub).unwrap();
            assert_eq!(event["type"], "message");
            assert_eq!(event["data"]["id"], msg.id);
            assert_eq!(event["data"]["conversation_id"], conv);
            assert_eq!(event["data"]["sender_id"], 1);
            assert_eq!(event["data"]["content"], "Is this still available?");
        }
        assert!(next_event(&mut stranger).is_none());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_and_not_persisted() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();

        for content in ["", "   \n"] {
            let err = f.chat.send_message(1, conv, content.into()).await.unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)));
        }
        assert!(matches!(
            f.chat.send_message(1, 0, "hi".into()).await,
            Err(ApiError::Validation(_))
        ));
        assert!(f.db.list_messages(conv, 100, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_participant_cannot_send() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        assert!(matches!(
            f.chat.send_message(3, conv, "hi".into()).await,
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            f.chat.send_message(1, conv + 100, "hi".into()).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(f.db.list_messages(conv, 100, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_goes_to_seller_and_never_back_to_buyer() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        let mut buyer = f.bus.register(1);
        let mut seller = f.bus.register(2);

        f.chat.typing(1, conv).await.unwrap();

        let event = next_event(&mut seller).unwrap();
        assert_eq!(event["type"], "typing");
        assert_eq!(event["data"]["user_id"], 1);
        assert_eq!(event["data"]["conversation_id"], conv);
        assert!(next_event(&mut buyer).is_none());
    }

    #[tokio::test]
    async fn typing_requires_known_conversation_and_membership() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        assert!(matches!(f.chat.typing(1, 0).await, Err(ApiError::Validation(_))));
        assert!(matches!(f.chat.typing(1, conv + 1).await, Err(ApiError::NotFound(_))));
        assert!(matches!(f.chat.typing(3, conv).await, Err(ApiError::Forbidden)));
    }

    #[tokio::test]
    async fn messages_are_only_visible_to_participants() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        f.chat.send_message(1, conv, "secret price".into()).await.unwrap();
        f.chat.send_message(2, conv, "counter offer".into()).await.unwrap();

        let seen = f.chat.messages(2, conv, 100, None).await.unwrap();
        assert_eq!(
            seen.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["secret price", "counter offer"]
        );

        assert!(matches!(f.chat.messages(3, conv, 100, None).await, Err(ApiError::Forbidden)));
        assert!(matches!(
            f.chat.messages(1, conv + 1, 100, None).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn conversations_are_scoped_to_user() {
        let f = fixture();
        let a = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        let b = f.chat.ensure_conversation(3, 6, 3, 2).await.unwrap();

        let mine: Vec<i64> = f.chat.conversations(1).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(mine, vec![a]);

        let mut sellers: Vec<i64> = f.chat.conversations(2).await.unwrap().iter().map(|c| c.id).collect();
        sellers.sort();
        assert_eq!(sellers, vec![a, b]);
    }

    struct Unreachable;

    impl ParticipantResolver for Unreachable {
        fn participants(&self, _conversation_id: i64) -> anyhow::Result<Option<Participants>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn resolver_failure_is_a_generic_persistence_error() {
        let f = fixture();
        let conv = f.chat.ensure_conversation(1, 5, 1, 2).await.unwrap();
        let chat = f.chat.clone().with_resolver(Arc::new(Unreachable));

        let err = chat.send_message(1, conv, "hi".into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Persistence(_)));
        assert!(!err.to_string().contains("refused"));
        assert!(f.db.list_messages(conv, 100, None).unwrap().is_empty());
    }
}
