use anyhow::Result;

use bazaar_db::Database;

/// The two sides of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    pub buyer_id: i64,
    pub seller_id: i64,
}

impl Participants {
    pub fn contains(&self, user_id: i64) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + use<> {
        let seller = (self.seller_id != self.buyer_id).then_some(self.seller_id);
        std::iter::once(self.buyer_id).chain(seller)
    }

    /// Everyone except `user_id`.
    pub fn others(&self, user_id: i64) -> impl Iterator<Item = i64> + use<> {
        self.iter().filter(move |id| *id != user_id)
    }
}

/// Answers who may receive events for a conversation.
pub trait ParticipantResolver: Send + Sync {
    /// `None` if the conversation does not exist.
    fn participants(&self, conversation_id: i64) -> Result<Option<Participants>>;
}

impl ParticipantResolver for Database {
    fn participants(&self, conversation_id: i64) -> Result<Option<Participants>> {
        Ok(self
            .get_conversation_participants(conversation_id)?
            .map(|(buyer_id, seller_id)| Participants { buyer_id, seller_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn others_excludes_the_caller() {
        let p = Participants { buyer_id: 1, seller_id: 2 };
        assert_eq!(p.iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(p.others(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(p.others(3).collect::<Vec<_>>(), vec![1, 2]);
        assert!(p.contains(2));
        assert!(!p.contains(3));
    }

    #[test]
    fn database_resolves_buyer_and_seller() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_conversation(5, 1, 2).unwrap();
        assert_eq!(
            db.participants(id).unwrap(),
            Some(Participants { buyer_id: 1, seller_id: 2 })
        );
        assert_eq!(db.participants(id + 1).unwrap(), None);
    }
}
