//! Toggles/records a three-valued vote per assistant message (C12, spec
//! §4.12).

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Vote;

pub struct FeedbackService {
    votes: Mutex<HashMap<String, Vote>>,
}

impl FeedbackService {
    pub fn new() -> Self {
        Self { votes: Mutex::new(HashMap::new()) }
    }

    /// Registers a message as eligible for feedback once the assistant has
    /// answered it, defaulting its vote to `NotVoted`.
    pub async fn register_message(&self, message_id: &str) {
        let mut votes = self.votes.lock().await;
        votes.entry(message_id.to_string()).or_insert(Vote::NotVoted);
    }

    pub async fn submit(&self, message_id: &str, vote: Vote) -> Result<Vote> {
        let mut votes = self.votes.lock().await;
        let current = votes
            .get(message_id)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))?;

        let new_vote = current.toggle(vote);
        votes.insert(message_id.to_string(), new_vote);
        Ok(new_vote)
    }
}

impl Default for FeedbackService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn toggle_upvote_resets_to_not_voted() {
        let svc = FeedbackService::new();
        svc.register_message("100").await;
        assert_eq!(svc.submit("100", Vote::Upvoted).await.unwrap(), Vote::Upvoted);
        assert_eq!(svc.submit("100", Vote::Upvoted).await.unwrap(), Vote::NotVoted);
    }

    #[tokio::test]
    async fn switching_vote_replaces_it() {
        let svc = FeedbackService::new();
        svc.register_message("100").await;
        assert_eq!(svc.submit("100", Vote::Upvoted).await.unwrap(), Vote::Upvoted);
        assert_eq!(svc.submit("100", Vote::Downvoted).await.unwrap(), Vote::Downvoted);
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let svc = FeedbackService::new();
        assert!(svc.submit("missing", Vote::Upvoted).await.is_err());
    }
}
