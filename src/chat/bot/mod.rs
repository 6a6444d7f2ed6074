//! Credential-bound bots and the pool that routes users to them.
//!
//! Every bot owns one completion client and lets a single request through at a time.
//! A user sticks to the bot that answered them first unless that bot goes on standby.
//! Requests that belong to no user go to the bot with the fewest requests in flight.


use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::completion::ChatCompletion;

pub struct Bot {
    name: String,
    client: Arc<dyn ChatCompletion>,
    gate: Mutex<()>,
    standby: AtomicBool,
    users: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
}

/// A bot's request slot, held until the request is done
pub struct BotSlot<'a> {
    _gate: MutexGuard<'a, ()>,
    _in_flight: InFlight<'a>,
}

/// Counts a request from the moment it starts waiting for the gate
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("name", &self.name)
            .field("standby", &self.is_standby())
            .finish_non_exhaustive()
    }
}

impl Bot {
    #[inline]
    pub fn new(name: impl Into<String>, client: Arc<dyn ChatCompletion>) -> Self {
        Self {
            name: name.into(),
            client,
            gate: Mutex::new(()),
            standby: AtomicBool::new(false),
            users: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn client(&self) -> &dyn ChatCompletion {
        self.client.as_ref()
    }

    #[inline]
    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::Acquire)
    }

    /// A bot on standby takes no new or returning users
    #[inline]
    pub fn set_standby(&self, standby: bool) {
        self.standby.store(standby, Ordering::Release);
    }

    #[inline]
    pub async fn pinned_user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    #[inline]
    pub async fn has_user(&self, user_id: &str) -> bool {
        self.users.lock().await.contains(user_id)
    }

    /// Record that this bot serves `user_id` from now on
    #[inline]
    pub async fn pin_user(&self, user_id: &str) {
        if self.users.lock().await.insert(user_id.to_string()) {
            debug!("Pinned user {} to bot {}", user_id, self.name);
        }
    }

    /// Requests holding or waiting for the slot
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for the bot's single request slot
    pub async fn acquire(&self) -> BotSlot<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = InFlight(&self.in_flight);
        let gate = self.gate.lock().await;
        BotSlot {
            _gate: gate,
            _in_flight: in_flight,
        }
    }

    #[inline]
    pub async fn close(&self) {
        info!("Closing bot {}", self.name);
        self.client.close().await;
    }
}

#[derive(Debug, Default)]
pub struct BotPool {
    bots: Vec<Arc<Bot>>,
    rotation: AtomicUsize,
}

impl BotPool {
    #[inline]
    pub fn new(bots: Vec<Arc<Bot>>) -> Self {
        Self {
            bots,
            rotation: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    #[inline]
    pub fn bots(&self) -> &[Arc<Bot>] {
        &self.bots
    }

    /// Pick the bot for `user_id`.
    ///
    /// Standby bots are skipped. A bot already serving the user wins; otherwise the bot
    /// with the fewest pinned users is chosen, the earliest one on a tie. `None` means no
    /// bot can take the request right now.
    pub async fn choose_bot(&self, user_id: &str) -> Option<Arc<Bot>> {
        let mut least_loaded: Option<(usize, &Arc<Bot>)> = None;

        for bot in self.bots.iter().filter(|bot| !bot.is_standby()) {
            if bot.has_user(user_id).await {
                return Some(Arc::clone(bot));
            }
            let count = bot.pinned_user_count().await;
            if least_loaded.is_none_or(|(best, _)| count < best) {
                least_loaded = Some((count, bot));
            }
        }

        least_loaded.map(|(_, bot)| Arc::clone(bot))
    }

    /// Pick `user_id`'s bot and pin the user to it right away, so users still waiting
    /// for a busy bot count towards its load
    pub async fn assign(&self, user_id: &str) -> Option<Arc<Bot>> {
        let bot = self.choose_bot(user_id).await?;
        bot.pin_user(user_id).await;
        Some(bot)
    }

    /// Pick a bot for a request that belongs to no user.
    ///
    /// Standby bots are skipped. The bot with the fewest requests in flight wins, and
    /// ties rotate so that idle bots take turns.
    pub fn choose_least_busy(&self) -> Option<Arc<Bot>> {
        let active: Vec<&Arc<Bot>> = self.bots.iter().filter(|bot| !bot.is_standby()).collect();
        if active.is_empty() {
            return None;
        }

        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % active.len();
        active
            .iter()
            .copied()
            .cycle()
            .skip(start)
            .take(active.len())
            .min_by_key(|bot| bot.in_flight())
            .map(Arc::clone)
    }

    /// Close every bot's client
    pub async fn close(&self) {
        join_all(self.bots.iter().map(|bot| bot.close())).await;
    }
}
