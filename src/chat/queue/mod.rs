
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

/// A question that could not be answered yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedQuestion {
    pub conversation_id: String,
    pub user_id: String,
    pub text: String,
}

impl SavedQuestion {
    #[inline]
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            text: text.into(),
        }
    }
}

/// Pending questions, at most one per user.
///
/// Saving a question for a user who already has one waiting replaces the older one.
#[derive(Debug, Default)]
pub struct QuestionQueue {
    questions: Mutex<HashMap<String, SavedQuestion>>,
}

impl QuestionQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `question`, returning the question it displaced, if any
    pub async fn save(&self, question: SavedQuestion) -> Option<SavedQuestion> {
        let mut questions = self.questions.lock().await;
        let replaced = questions.insert(question.user_id.clone(), question);
        if let Some(old) = &replaced {
            debug!("Dropped older queued question of user {}", old.user_id);
        }
        replaced
    }

    /// Copy of every pending question, ordered by user id
    pub async fn snapshot(&self) -> Vec<SavedQuestion> {
        let questions = self.questions.lock().await;
        let mut snapshot: Vec<SavedQuestion> = questions.values().cloned().collect();
        snapshot.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        snapshot
    }

    /// Remove `delivered` unless a newer question replaced it in the meantime
    pub async fn remove_delivered(&self, delivered: &SavedQuestion) -> bool {
        let mut questions = self.questions.lock().await;
        if questions.get(&delivered.user_id) == Some(delivered) {
            questions.remove(&delivered.user_id);
            true
        } else {
            false
        }
    }

    #[inline]
    pub async fn get(&self, user_id: &str) -> Option<SavedQuestion> {
        self.questions.lock().await.get(user_id).cloned()
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.questions.lock().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.questions.lock().await.is_empty()
    }
}

/// Run `tick` every `interval` until `shutdown` turns true.
///
/// The first tick happens one interval after start.
pub async fn run_every<F, Fut>(interval: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!("Retry loop started, interval {:?}", interval);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("Shutdown sender dropped");
                }
                break;
            }
        }

        tick().await;
    }

    info!("Retry loop stopped");
}
