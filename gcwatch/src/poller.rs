//! Broadcast-list poller.
//!
//! Each poll requests the pages at offsets `0, 10, ..., 90`, staggered
//! 50 ms apart per offset step, and collects matches until the terminal page
//! comes back. Pages are paired with their requests by id, so arrival order
//! does not matter for the termination check. The collected matches are
//! deduplicated, normalized and written to the sink as one batch.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gcwatch_sdk::client::SessionHandle;
use gcwatch_sdk::types::{BroadcastGame, BroadcastPage};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::session::{ConnectionState, Readiness};
use crate::store::{BulkWriteResult, MatchRecord, MatchSink, PlayerRecord, UpsertOp};

pub const PAGE_SIZE: u32 = 10;
pub const LAST_OFFSET: u32 = 90;
/// Dispatch delay per unit of offset.
pub const STAGGER: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    /// Upper bound on one poll's page collection.
    pub collect_timeout: Duration,
    pub collection: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotReady,
    /// Another poll is still collecting.
    AlreadyRunning,
    /// The terminal page never arrived; nothing was written.
    Incomplete,
    Empty,
    Written(BulkWriteResult),
    WriteFailed,
}

pub struct GamePoller {
    handle: SessionHandle,
    readiness: Readiness,
    sink: Arc<dyn MatchSink>,
    options: PollerOptions,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GamePoller {
    pub fn new(
        handle: SessionHandle,
        readiness: Readiness,
        sink: Arc<dyn MatchSink>,
        options: PollerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            readiness,
            sink,
            options,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Run one poll cycle.
    pub async fn poll_once(&self) -> PollOutcome {
        if !self.readiness.is_ready() {
            return PollOutcome::NotReady;
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            tracing::debug!("Previous poll still collecting, skipping");
            return PollOutcome::AlreadyRunning;
        };

        let games = match tokio::time::timeout(self.options.collect_timeout, self.collect()).await {
            Ok(Some(games)) => games,
            Ok(None) => {
                tracing::warn!("Broadcast list ended without its final page");
                return PollOutcome::Incomplete;
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.options.collect_timeout, "Broadcast list collection timed out");
                return PollOutcome::Incomplete;
            }
        };

        let records = normalize(dedup_by_lobby(games), Utc::now());
        if records.is_empty() {
            tracing::debug!("No live matches");
            return PollOutcome::Empty;
        }

        let ops = upsert_ops(&records);
        match self.sink.bulk_upsert(&self.options.collection, &ops) {
            Ok(result) => {
                tracing::info!(
                    count = ops.len(),
                    inserted = result.inserted,
                    updated = result.updated,
                    "Stored live matches"
                );
                PollOutcome::Written(result)
            }
            Err(e) => {
                tracing::error!(error = %e, count = ops.len(), "Failed to store live matches");
                PollOutcome::WriteFailed
            }
        }
    }

    /// Poll whenever the coordinator becomes ready, then on every interval
    /// tick. Returns when the session shuts down.
    pub async fn run(self: Arc<Self>) {
        let mut readiness = self.readiness.clone();
        let mut ticker = None;

        if readiness.current() == ConnectionState::CoordinatorReady {
            self.spawn_poll();
            ticker = Some(self.ticker());
        }

        loop {
            let mut became_ready = false;
            tokio::select! {
                state = readiness.changed() => match state {
                    ConnectionState::ShutDown => break,
                    ConnectionState::CoordinatorReady => {
                        self.spawn_poll();
                        became_ready = true;
                    }
                    _ => {}
                },
                _ = tick(&mut ticker) => self.spawn_poll(),
            }
            if became_ready && ticker.is_none() {
                ticker = Some(self.ticker());
            }
        }
        tracing::debug!("Poller stopped");
    }

    fn ticker(&self) -> tokio::time::Interval {
        let period = self.options.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn spawn_poll(self: &Arc<Self>) {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = poller.poll_once().await;
            tracing::debug!(?outcome, "Poll finished");
        });
    }

    /// Fire the page requests and gather matches with players until the
    /// terminal page arrives. `None` if every request finished without it.
    async fn collect(&self) -> Option<Vec<BroadcastGame>> {
        let mut pages = JoinSet::new();
        for start_game in (0..=LAST_OFFSET).step_by(PAGE_SIZE as usize) {
            let handle = self.handle.clone();
            pages.spawn(async move {
                tokio::time::sleep(STAGGER * start_game).await;
                (start_game, handle.request_source_tv_games(start_game).await)
            });
        }

        let mut games = Vec::new();
        while let Some(joined) = pages.join_next().await {
            let Ok((start_game, result)) = joined else {
                continue;
            };
            match result {
                Ok(page) => {
                    let terminal = is_terminal_page(&page);
                    games.extend(page.game_list.into_iter().filter(|g| !g.players.is_empty()));
                    if terminal {
                        return Some(games);
                    }
                }
                Err(e) => tracing::debug!(start_game, error = %e, "Broadcast page failed"),
            }
        }
        None
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The page that ends a collection: the last offset, not league-scoped.
pub fn is_terminal_page(page: &BroadcastPage) -> bool {
    page.start_game == LAST_OFFSET && page.league_id == 0
}

/// Keep the first match seen for each lobby.
pub fn dedup_by_lobby(games: Vec<BroadcastGame>) -> Vec<BroadcastGame> {
    let mut seen = HashSet::new();
    games.into_iter().filter(|g| seen.insert(g.lobby_id)).collect()
}

/// Convert to stored records sharing one `created_at`, keeping the first
/// record for each match id.
pub fn normalize(games: Vec<BroadcastGame>, created_at: DateTime<Utc>) -> Vec<MatchRecord> {
    let mut seen = HashSet::new();
    games
        .into_iter()
        .filter(|g| seen.insert(g.match_id))
        .map(|g| MatchRecord {
            match_id: g.match_id.to_string(),
            players: g
                .players
                .into_iter()
                .map(|p| PlayerRecord {
                    account_id: p.account_id,
                    hero_id: p.hero_id,
                })
                .collect(),
            server_steam_id: g.server_steam_id.to_string(),
            game_mode: g.game_mode,
            lobby_type: g.lobby_type,
            spectators: g.spectators,
            average_mmr: g.average_mmr,
            created_at,
        })
        .collect()
}

pub fn upsert_ops(records: &[MatchRecord]) -> Vec<UpsertOp> {
    records.iter().map(UpsertOp::from).collect()
}
