use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use poise::serenity_prelude::Http;
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tracing::{error, info, warn};

use crate::config::WarConfig;
use crate::database::models::TournamentStatus;
use crate::database::{PgDatabase, TournamentDatabase};
use crate::error::{ErrorClass, WarError};
use crate::log::discord_log_error;
use crate::presentation::DiscordPresenter;
use crate::scheduler::{RoundScheduler, TickOutcome};

/// Calls the scheduler for every open tournament whenever it asks to be woken up.
pub struct Ticker {
    http: Arc<Http>,
    database: PgDatabase,
    presenter: DiscordPresenter,
    config: WarConfig,
}

/// A tick that just finished.
struct TickDone {
    tournament_id: i64,
    /// When the tournament wants to be ticked again. `None` releases it.
    next: Option<i64>,
    /// Why the tick was refused, when it broke a bracket rule.
    refusal: Option<String>,
}

/// The tournaments the ticker is responsible for.
///
/// A claimed tournament is either waiting in `wakeups` or has exactly one tick in flight, so
/// ticks of one tournament never overlap.
struct Claims {
    wakeups: DelayQueue<i64>,
    claimed: HashSet<i64>,
    /// Tournaments whose ongoing refusal has already been reported.
    reported: HashSet<i64>,
}

impl Claims {
    fn new() -> Self {
        Self {
            wakeups: DelayQueue::new(),
            claimed: HashSet::new(),
            reported: HashSet::new(),
        }
    }

    /// Queues an immediate tick, unless the tournament is already claimed.
    fn track(&mut self, tournament_id: i64) -> bool {
        if !self.claimed.insert(tournament_id) {
            return false;
        }
        self.wakeups.insert(tournament_id, Duration::ZERO);
        true
    }

    /// Books the next tick of a tournament whose tick just finished.
    ///
    /// Returns the refusal to report, the first time a tournament is refused in a row.
    fn settle(&mut self, done: TickDone, now: i64, min_tick_secs: i64) -> Option<String> {
        match done.next {
            Some(until) => {
                let delay = (until - now).max(min_tick_secs);
                self.wakeups
                    .insert(done.tournament_id, Duration::from_secs(delay as u64));
            }
            None => {
                self.claimed.remove(&done.tournament_id);
            }
        }

        match done.refusal {
            Some(refusal) => self.reported.insert(done.tournament_id).then_some(refusal),
            None => {
                self.reported.remove(&done.tournament_id);
                None
            }
        }
    }
}

/// Waits for a spawned tick. A tick that crashed releases its tournament, so the next poll
/// picks it up again.
async fn join_tick(tournament_id: i64, tick: JoinHandle<TickDone>) -> TickDone {
    match tick.await {
        Ok(done) => done,
        Err(e) => {
            error!("Tick of tournament {} crashed: {}", tournament_id, e);
            TickDone {
                tournament_id,
                next: None,
                refusal: None,
            }
        }
    }
}

impl Ticker {
    pub fn new(http: Arc<Http>, database: PgDatabase, config: WarConfig) -> Self {
        let presenter = DiscordPresenter::new(http.clone(), database.clone());
        Self {
            http,
            database,
            presenter,
            config,
        }
    }

    /// Runs forever. Tournaments are picked up from the database on every poll interval, so a
    /// restart simply resumes them.
    pub async fn run(self) {
        let mut claims = Claims::new();
        let mut ticks: FuturesUnordered<BoxFuture<'static, TickDone>> = FuturesUnordered::new();
        let mut poll = tokio::time::interval(self.config.poll_interval);

        info!("War ticker started");
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let open = match self.database.get_open_tournaments().await {
                        Ok(open) => open,
                        Err(e) => {
                            warn!("Could not look up open tournaments: {:#}", e);
                            continue;
                        }
                    };
                    for tournament in open {
                        if claims.track(tournament.tournament_id) {
                            info!("Tracking tournament {}", tournament.tournament_id);
                        }
                    }
                }
                Some(expired) = claims.wakeups.next() => {
                    let tournament_id = expired.into_inner();
                    ticks.push(join_tick(tournament_id, self.spawn_tick(tournament_id)).boxed());
                }
                Some(done) = ticks.next() => {
                    let tournament_id = done.tournament_id;
                    let now = Utc::now().timestamp();
                    if let Some(refusal) = claims.settle(done, now, self.config.min_tick_secs()) {
                        let http = self.http.clone();
                        let database = self.database.clone();
                        tokio::spawn(async move {
                            report(&http, &database, tournament_id, "War tick refused", &refusal)
                                .await;
                        });
                    }
                }
            }
        }
    }

    fn spawn_tick(&self, tournament_id: i64) -> JoinHandle<TickDone> {
        let http = self.http.clone();
        let database = self.database.clone();
        let presenter = self.presenter.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let now = Utc::now().timestamp();
            let scheduler = RoundScheduler::new(&database, &database, &presenter, &config);
            let (next, refusal) = match scheduler.tick(tournament_id, now).await {
                Ok(TickOutcome::Sleep { until }) => (Some(until), None),
                Ok(TickOutcome::Finished { status, champion }) => {
                    info!(
                        "Tournament {} finished as {}, champion: {:?}",
                        tournament_id, status, champion
                    );
                    if status == TournamentStatus::Aborted {
                        report(&http, &database, tournament_id, "War aborted", "The bracket data is inconsistent. No champion was declared.").await;
                    }
                    (None, None)
                }
                Err(error) => {
                    let refusal = (WarError::classify(&error) == ErrorClass::StateViolation)
                        .then(|| format!("{:#}", error));
                    (Some(now + config.min_tick_secs()), refusal)
                }
            };

            TickDone {
                tournament_id,
                next,
                refusal,
            }
        })
    }
}

/// Posts a problem with a tournament to its guild's log channel.
async fn report(http: &Http, database: &PgDatabase, tournament_id: i64, title: &str, cause: &str) {
    let guild_id = match database.get_tournament(tournament_id).await {
        Ok(Some(tournament)) => tournament.guild_id,
        Ok(None) => return,
        Err(e) => {
            error!("Could not look up tournament {}: {:#}", tournament_id, e);
            return;
        }
    };
    let tournament_field = tournament_id.to_string();
    let fields = vec![
        ("Cause", cause, false),
        ("Tournament", tournament_field.as_str(), false),
    ];

    discord_log_error(http, database, &guild_id, title, fields)
        .await
        .unwrap_or_else(|e| error!("Error sending error message to log channel: {:?}", e));
}
