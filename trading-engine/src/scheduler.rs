//! Scheduler - fires trading sessions and housekeeping jobs on the clock
//!
//! Session triggers are registered twice, once per DST regime of the US
//! market, in the schedule timezone. Whichever trigger fires while its regime
//! is in force runs; a once-per-day guard keyed by (session, market date)
//! stops a second run on the same market day.
//!
//! The scheduler keeps no session state: each job is a fresh task calling
//! into the `TradingEngine`.

use crate::config::{parse_clock, SchedulerConfig};
use crate::engine::{SessionReport, TradingEngine};
use anyhow::{anyhow, Context, Result};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use common::{DecisionRecord, DecisionType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use portfolio_risk::RiskLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Upper bound on one sleep of the main loop, so wall-clock jumps are noticed
const MAX_WAIT: std::time::Duration = std::time::Duration::from_secs(60);

/// Guard entries older than this many days are dropped
const GUARD_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DstRegime {
    Winter,
    Summer,
}

impl DstRegime {
    /// Regime in force in `tz` at `instant`.
    ///
    /// Summer when the UTC offset is ahead of the zone's standard offset, the
    /// smaller of its January and July offsets.
    pub fn at(tz: Tz, instant: DateTime<Utc>) -> Self {
        let offset = tz.offset_from_utc_datetime(&instant.naive_utc()).fix().local_minus_utc();
        let offset_in = |month: u32| {
            NaiveDate::from_ymd_opt(instant.year(), month, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .map(|n| tz.offset_from_utc_datetime(&n).fix().local_minus_utc())
                .unwrap_or(offset)
        };
        let standard = offset_in(1).min(offset_in(7));

        if offset > standard {
            DstRegime::Summer
        } else {
            DstRegime::Winter
        }
    }
}

impl fmt::Display for DstRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DstRegime::Winter => f.write_str("winter"),
            DstRegime::Summer => f.write_str("summer"),
        }
    }
}

/// A parsed session trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTrigger {
    pub decision_type: DecisionType,
    pub regime: DstRegime,
    /// Local time in the schedule timezone
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Session(SessionTrigger),
    StopLossSweep,
    DailySnapshot,
    TokenRefresh,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Session(t) => write!(
                f,
                "{}/{} {}",
                t.decision_type,
                t.regime,
                t.time.format("%H:%M")
            ),
            JobKind::StopLossSweep => f.write_str("stop_loss_sweep"),
            JobKind::DailySnapshot => f.write_str("daily_snapshot"),
            JobKind::TokenRefresh => f.write_str("token_refresh"),
        }
    }
}

/// Why a fired session trigger did or did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Run { market_date: NaiveDate },
    WrongRegime,
    MarketClosed,
    AlreadyRan,
}

/// Once-per-day claims keyed by (session type, market date)
#[derive(Debug, Default)]
pub struct DailyGuard {
    claimed: DashMap<(DecisionType, NaiveDate), DateTime<Utc>>,
}

impl DailyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first claim of the pair, false afterwards.
    pub fn claim(&self, decision_type: DecisionType, market_date: NaiveDate) -> bool {
        match self.claimed.entry((decision_type, market_date)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
        }
    }

    pub fn prune_before(&self, date: NaiveDate) {
        self.claimed.retain(|(_, claimed_date), _| *claimed_date >= date);
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Calendar rules derived from `SchedulerConfig`
#[derive(Debug, Clone)]
pub struct Schedule {
    schedule_tz: Tz,
    market_tz: Tz,
    triggers: Vec<SessionTrigger>,
    sweep_slots: Vec<NaiveTime>,
    snapshot_time: NaiveTime,
    token_refresh: Duration,
    weekdays_only: bool,
}

impl Schedule {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let triggers = config
            .triggers
            .iter()
            .map(|spec| {
                Ok(SessionTrigger {
                    decision_type: spec.session,
                    regime: spec.regime,
                    time: parse_clock(&spec.time)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let open = parse_clock(&config.market_open)?;
        let close = parse_clock(&config.market_close)?;

        Ok(Self {
            schedule_tz: config.schedule_tz,
            market_tz: config.market_tz,
            triggers,
            sweep_slots: sweep_slots(open, close, config.stop_loss_interval_minutes),
            snapshot_time: parse_clock(&config.snapshot_time)?,
            token_refresh: Duration::hours(i64::from(config.token_refresh_hours)),
            weekdays_only: config.weekdays_only,
        })
    }

    pub fn jobs(&self) -> Vec<JobKind> {
        let mut jobs: Vec<JobKind> = self.triggers.iter().copied().map(JobKind::Session).collect();
        jobs.push(JobKind::StopLossSweep);
        jobs.push(JobKind::DailySnapshot);
        jobs.push(JobKind::TokenRefresh);
        jobs
    }

    pub fn market_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.market_tz).date_naive()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.weekdays_only || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// First run of `job` strictly after `after`.
    pub fn next_run(&self, job: &JobKind, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match job {
            JobKind::Session(trigger) => {
                next_local(self.schedule_tz, &[trigger.time], after, |_| true)
            }
            JobKind::StopLossSweep => {
                next_local(self.market_tz, &self.sweep_slots, after, |d| self.is_trading_day(d))
            }
            JobKind::DailySnapshot => {
                next_local(self.market_tz, &[self.snapshot_time], after, |d| self.is_trading_day(d))
            }
            JobKind::TokenRefresh => Some(after + self.token_refresh),
        }
    }

    /// Decide whether a trigger that fired at `fired_at` runs, claiming the
    /// daily guard when it does.
    pub fn admit(
        &self,
        trigger: &SessionTrigger,
        fired_at: DateTime<Utc>,
        guard: &DailyGuard,
    ) -> Admission {
        if DstRegime::at(self.market_tz, fired_at) != trigger.regime {
            return Admission::WrongRegime;
        }
        let market_date = self.market_date(fired_at);
        if !self.is_trading_day(market_date) {
            return Admission::MarketClosed;
        }
        if !guard.claim(trigger.decision_type, market_date) {
            return Admission::AlreadyRan;
        }
        Admission::Run { market_date }
    }
}

/// Slot times on multiples of `interval` minutes inside [open, close].
fn sweep_slots(open: NaiveTime, close: NaiveTime, interval: u32) -> Vec<NaiveTime> {
    let interval = interval.max(1);
    let open_minute = open.num_seconds_from_midnight() / 60;
    let close_minute = close.num_seconds_from_midnight() / 60;
    let first = open_minute.div_ceil(interval) * interval;

    (first..=close_minute)
        .step_by(interval as usize)
        .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
        .collect()
}

/// Earliest of `times` on an accepted local date in `tz` that is after `after`.
fn next_local(
    tz: Tz,
    times: &[NaiveTime],
    after: DateTime<Utc>,
    accept: impl Fn(NaiveDate) -> bool,
) -> Option<DateTime<Utc>> {
    let start = after.with_timezone(&tz).date_naive();

    (0..=7)
        .filter_map(|offset| start.checked_add_signed(Duration::days(offset)))
        .filter(|date| accept(*date))
        .find_map(|date| {
            times.iter().find_map(|time| {
                let at = tz
                    .from_local_datetime(&date.and_time(*time))
                    .earliest()?
                    .with_timezone(&Utc);
                (at > after).then_some(at)
            })
        })
}

/// Next planned run of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

/// Commands accepted by the scheduler loop
pub enum SchedulerCommand {
    Start,
    Stop,
    Trigger {
        decision_type: DecisionType,
        respond_to: oneshot::Sender<SessionReport>,
    },
    AnalyzeTicker {
        ticker: String,
        respond_to: oneshot::Sender<SessionReport>,
    },
    GetStatus {
        respond_to: oneshot::Sender<SchedulerStatus>,
    },
    LatestDecision {
        respond_to: oneshot::Sender<Result<Option<DecisionRecord>, String>>,
    },
    ReloadRiskLimits {
        respond_to: oneshot::Sender<Result<RiskLimits, String>>,
    },
    Shutdown,
}

/// Operator-side handle to a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn start(&self) -> Result<()> {
        self.send(SchedulerCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(SchedulerCommand::Stop).await
    }

    /// Fire a session now, bypassing the regime filter and the daily guard,
    /// and wait for its report.
    pub async fn trigger(&self, decision_type: DecisionType) -> Result<SessionReport> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SchedulerCommand::Trigger {
            decision_type,
            respond_to,
        })
        .await?;
        rx.await.context("Session task ended without a report")
    }

    pub async fn analyze_ticker(&self, ticker: impl Into<String>) -> Result<SessionReport> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SchedulerCommand::AnalyzeTicker {
            ticker: ticker.into(),
            respond_to,
        })
        .await?;
        rx.await.context("Session task ended without a report")
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SchedulerCommand::GetStatus { respond_to }).await?;
        rx.await.context("Scheduler dropped the status request")
    }

    pub async fn latest_decision(&self) -> Result<Option<DecisionRecord>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SchedulerCommand::LatestDecision { respond_to }).await?;
        rx.await
            .context("Scheduler dropped the decision request")?
            .map_err(|e| anyhow!(e))
    }

    pub async fn reload_risk_limits(&self) -> Result<RiskLimits> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SchedulerCommand::ReloadRiskLimits { respond_to })
            .await?;
        rx.await
            .context("Scheduler dropped the reload request")?
            .map_err(|e| anyhow!(e))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerCommand::Shutdown).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("Scheduler is not running"))
    }
}

struct ScheduledJob {
    kind: JobKind,
    next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    engine: TradingEngine,
    schedule: Schedule,
    guard: Arc<DailyGuard>,
    jobs: Vec<ScheduledJob>,
    running: bool,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
}

impl Scheduler {
    /// Build an idle scheduler; send `Start` to begin firing jobs.
    pub fn new(engine: TradingEngine, config: &SchedulerConfig) -> Result<Self> {
        let schedule = Schedule::from_config(config)?;
        let jobs = schedule
            .jobs()
            .into_iter()
            .map(|kind| ScheduledJob {
                kind,
                next_run: None,
            })
            .collect();
        let (command_tx, command_rx) = mpsc::channel(100);

        Ok(Self {
            engine,
            schedule,
            guard: Arc::new(DailyGuard::new()),
            jobs,
            running: false,
            command_tx,
            command_rx: Some(command_rx),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Main loop; returns on `Shutdown`.
    pub async fn run(mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| anyhow!("Command receiver already taken"))?;

        info!(jobs = self.jobs.len(), "Scheduler loop started");

        loop {
            let wait = self.time_until_next_job(Utc::now());

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                _ = tokio::time::sleep(wait), if self.running => {
                    self.fire_due(Utc::now());
                }
            }
        }

        info!("Scheduler loop stopped");
        Ok(())
    }

    fn time_until_next_job(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.jobs
            .iter()
            .filter_map(|job| job.next_run)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(std::time::Duration::ZERO))
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT)
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Start => {
                if !self.running {
                    self.plan(Utc::now());
                    self.running = true;
                    info!("Scheduler started");
                }
            }

            SchedulerCommand::Stop => {
                if self.running {
                    self.running = false;
                    for job in &mut self.jobs {
                        job.next_run = None;
                    }
                    info!("Scheduler stopped firing jobs");
                }
            }

            SchedulerCommand::Trigger {
                decision_type,
                respond_to,
            } => {
                info!(decision_type = %decision_type, "Manual session trigger");
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    let report = engine.run_session(decision_type).await;
                    let _ = respond_to.send(report);
                });
            }

            SchedulerCommand::AnalyzeTicker { ticker, respond_to } => {
                info!(ticker = %ticker, "On-demand analysis requested");
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    let report = engine.analyze_ticker_on_demand(&ticker).await;
                    let _ = respond_to.send(report);
                });
            }

            SchedulerCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            SchedulerCommand::LatestDecision { respond_to } => {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    let latest = engine
                        .latest_decision()
                        .await
                        .map_err(|e| format!("{:#}", e));
                    let _ = respond_to.send(latest);
                });
            }

            SchedulerCommand::ReloadRiskLimits { respond_to } => {
                let reloaded = self
                    .engine
                    .context()
                    .reload_risk_limits()
                    .map_err(|e| format!("{:#}", e));
                if let Err(e) = &reloaded {
                    error!("Risk limit reload failed: {}", e);
                }
                let _ = respond_to.send(reloaded);
            }

            SchedulerCommand::Shutdown => {}
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running,
            jobs: self
                .jobs
                .iter()
                .map(|job| JobStatus {
                    name: job.kind.to_string(),
                    next_run: job.next_run,
                })
                .collect(),
        }
    }

    /// Compute every job's first run; the token refresh runs immediately.
    fn plan(&mut self, now: DateTime<Utc>) {
        for job in &mut self.jobs {
            job.next_run = match job.kind {
                JobKind::TokenRefresh => Some(now),
                _ => self.schedule.next_run(&job.kind, now),
            };
            debug!(job = %job.kind, next_run = ?job.next_run, "Job planned");
        }
    }

    fn fire_due(&mut self, now: DateTime<Utc>) {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            match job.next_run {
                Some(at) if at <= now => {
                    due.push((job.kind, at));
                    job.next_run = self.schedule.next_run(&job.kind, now);
                }
                _ => {}
            }
        }

        for (kind, at) in due {
            self.dispatch(kind, at);
        }
    }

    fn dispatch(&self, kind: JobKind, fired_at: DateTime<Utc>) {
        let engine = self.engine.clone();

        match kind {
            JobKind::Session(trigger) => {
                match self.schedule.admit(&trigger, fired_at, &self.guard) {
                    Admission::Run { market_date } => {
                        info!(job = %kind, market_date = %market_date, "Firing scheduled session");
                        tokio::spawn(async move {
                            engine.run_session(trigger.decision_type).await;
                        });
                    }
                    skipped => {
                        debug!(job = %kind, reason = ?skipped, "Scheduled session skipped");
                    }
                }
            }

            JobKind::StopLossSweep => {
                tokio::spawn(async move {
                    match engine.check_and_execute_stop_losses().await {
                        Ok(exits) if !exits.is_empty() => {
                            warn!(exits = exits.len(), "Stop-loss sweep closed positions");
                        }
                        Ok(_) => {}
                        Err(e) => error!("Stop-loss sweep failed: {:#}", e),
                    }
                });
            }

            JobKind::DailySnapshot => {
                let retain_from =
                    self.schedule.market_date(fired_at) - Duration::days(GUARD_RETENTION_DAYS);
                self.guard.prune_before(retain_from);

                tokio::spawn(async move {
                    if let Err(e) = engine.save_daily_snapshot().await {
                        error!("Daily snapshot failed: {:#}", e);
                    }
                });
            }

            JobKind::TokenRefresh => {
                tokio::spawn(async move {
                    if let Err(e) = engine.refresh_access_token().await {
                        error!("{:#}", e);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::context::{AppContext, Stores};
    use chrono_tz::America::New_York;
    use decision_engine::{LlmResponse, ScriptedLlm};
    use execution::PaperBroker;
    use signal_generation::{FixedFeeds, SignalAggregator};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn schedule() -> Schedule {
        Schedule::from_config(&SchedulerConfig::default()).unwrap()
    }

    fn session_triggers(schedule: &Schedule) -> Vec<SessionTrigger> {
        schedule
            .jobs()
            .into_iter()
            .filter_map(|job| match job {
                JobKind::Session(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Fire every session trigger once after `after` and collect the ones admitted.
    fn admitted_after(after: DateTime<Utc>) -> Vec<(SessionTrigger, NaiveDate)> {
        let schedule = schedule();
        let guard = DailyGuard::new();
        session_triggers(&schedule)
            .into_iter()
            .filter_map(|trigger| {
                let fired_at = schedule.next_run(&JobKind::Session(trigger), after)?;
                match schedule.admit(&trigger, fired_at, &guard) {
                    Admission::Run { market_date } => Some((trigger, market_date)),
                    _ => None,
                }
            })
            .collect()
    }

    #[test]
    fn test_dst_regime() {
        assert_eq!(DstRegime::at(New_York, utc(2025, 1, 15, 14, 20)), DstRegime::Winter);
        assert_eq!(DstRegime::at(New_York, utc(2025, 7, 15, 13, 20)), DstRegime::Summer);
        // 2025-03-09 02:00 EST -> 03:00 EDT
        assert_eq!(DstRegime::at(New_York, utc(2025, 3, 9, 6, 59)), DstRegime::Winter);
        assert_eq!(DstRegime::at(New_York, utc(2025, 3, 9, 7, 0)), DstRegime::Summer);
        assert_eq!(DstRegime::at(chrono_tz::Asia::Seoul, utc(2025, 7, 15, 0, 0)), DstRegime::Winter);
    }

    #[test]
    fn test_six_triggers_registered() {
        let triggers = session_triggers(&schedule());
        assert_eq!(triggers.len(), 6);
        for decision_type in DecisionType::SCHEDULED {
            let regimes: Vec<_> = triggers
                .iter()
                .filter(|t| t.decision_type == decision_type)
                .map(|t| t.regime)
                .collect();
            assert_eq!(regimes, vec![DstRegime::Winter, DstRegime::Summer]);
        }
    }

    #[test]
    fn test_winter_day_runs_winter_triggers_only() {
        // Tuesday 2025-01-14, noon in Seoul
        let admitted = admitted_after(utc(2025, 1, 14, 3, 0));

        assert_eq!(admitted.len(), 3);
        for (trigger, market_date) in &admitted {
            assert_eq!(trigger.regime, DstRegime::Winter);
            assert_eq!(*market_date, NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
        }
    }

    #[test]
    fn test_summer_day_runs_summer_triggers_only() {
        // Tuesday 2025-07-15, noon in Seoul
        let admitted = admitted_after(utc(2025, 7, 15, 3, 0));

        assert_eq!(admitted.len(), 3);
        let types: Vec<_> = admitted.iter().map(|(t, _)| t.decision_type).collect();
        assert!(types.contains(&DecisionType::PreMarket));
        assert!(types.contains(&DecisionType::MidSession));
        assert!(types.contains(&DecisionType::PreClose));
        assert!(admitted.iter().all(|(t, _)| t.regime == DstRegime::Summer));
    }

    #[test]
    fn test_pre_market_fire_time_matches_market_open() {
        let schedule = schedule();
        let trigger = session_triggers(&schedule)
            .into_iter()
            .find(|t| t.decision_type == DecisionType::PreMarket && t.regime == DstRegime::Winter)
            .unwrap();

        let fired_at = schedule
            .next_run(&JobKind::Session(trigger), utc(2025, 1, 14, 3, 0))
            .unwrap();
        // 23:20 KST == 09:20 EST
        assert_eq!(fired_at, utc(2025, 1, 14, 14, 20));
    }

    #[test]
    fn test_weekend_uses_market_date() {
        let schedule = schedule();
        let guard = DailyGuard::new();
        let triggers = session_triggers(&schedule);
        let find = |decision_type| {
            *triggers
                .iter()
                .find(|t| t.decision_type == decision_type && t.regime == DstRegime::Winter)
                .unwrap()
        };

        // Saturday 23:20 KST is Saturday morning in New York
        let pre_market = find(DecisionType::PreMarket);
        assert_eq!(
            schedule.admit(&pre_market, utc(2025, 1, 18, 14, 20), &guard),
            Admission::MarketClosed
        );

        // Saturday 01:30 KST is still Friday in New York
        let mid_session = find(DecisionType::MidSession);
        assert_eq!(
            schedule.admit(&mid_session, utc(2025, 1, 17, 16, 30), &guard),
            Admission::Run {
                market_date: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap()
            }
        );
    }

    #[test]
    fn test_daily_guard_blocks_second_run() {
        let schedule = schedule();
        let guard = DailyGuard::new();
        let trigger = session_triggers(&schedule)[0];
        let fired_at = utc(2025, 1, 14, 14, 20);

        assert!(matches!(
            schedule.admit(&trigger, fired_at, &guard),
            Admission::Run { .. }
        ));
        assert_eq!(
            schedule.admit(&trigger, fired_at + Duration::minutes(5), &guard),
            Admission::AlreadyRan
        );

        let date = NaiveDate::from_ymd_opt(2025, 1, 14).unwrap();
        assert!(!guard.claim(trigger.decision_type, date));
        assert!(guard.claim(DecisionType::PreClose, date));

        guard.prune_before(date + Duration::days(1));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_sweep_slots_cover_market_window() {
        let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let slots = sweep_slots(open, close, 30);

        assert_eq!(slots.len(), 14);
        assert_eq!(slots[0], open);
        assert_eq!(slots[13], close);

        let slots = sweep_slots(NaiveTime::from_hms_opt(9, 35, 0).unwrap(), close, 30);
        assert_eq!(slots[0], NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn test_sweep_and_snapshot_skip_weekend() {
        let schedule = schedule();

        // Friday 2025-01-17 16:00 EST
        let after = utc(2025, 1, 17, 21, 0);
        assert_eq!(
            schedule.next_run(&JobKind::StopLossSweep, after),
            Some(utc(2025, 1, 20, 14, 30))
        );
        assert_eq!(
            schedule.next_run(&JobKind::DailySnapshot, after),
            Some(utc(2025, 1, 17, 21, 5))
        );
        assert_eq!(
            schedule.next_run(&JobKind::DailySnapshot, utc(2025, 1, 17, 22, 0)),
            Some(utc(2025, 1, 20, 21, 5))
        );

        // mid-session: next half-hour slot
        assert_eq!(
            schedule.next_run(&JobKind::StopLossSweep, utc(2025, 1, 14, 15, 10)),
            Some(utc(2025, 1, 14, 15, 30))
        );
    }

    #[test]
    fn test_token_refresh_period() {
        let schedule = schedule();
        let after = utc(2025, 1, 14, 0, 0);
        assert_eq!(
            schedule.next_run(&JobKind::TokenRefresh, after),
            Some(after + Duration::hours(22))
        );
    }

    fn scheduler(llm: ScriptedLlm) -> Scheduler {
        let config = AppConfig::default();
        let stores = Stores::in_memory();
        let feeds = Arc::new(FixedFeeds::new());
        let signals = Arc::new(SignalAggregator::new(
            feeds.clone(),
            feeds.clone(),
            feeds,
            stores.signals.clone(),
            config.signals.clone(),
        ));
        let ctx = AppContext::new(
            config.clone(),
            Arc::new(PaperBroker::with_cash(config.risk.initial_capital)),
            signals,
            stores,
            Arc::new(llm),
        );
        Scheduler::new(TradingEngine::new(Arc::new(ctx)), &config.scheduler).unwrap()
    }

    #[tokio::test]
    async fn test_handle_start_stop_and_status() {
        let scheduler = scheduler(ScriptedLlm::new(vec![]));
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.jobs.len(), 9);
        assert!(status.jobs.iter().all(|j| j.next_run.is_none()));

        handle.start().await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(status.running);
        assert!(status.jobs.iter().all(|j| j.next_run.is_some()));
        assert!(status.jobs.iter().any(|j| j.name == "PRE_MARKET/winter 23:20"));

        handle.stop().await.unwrap();
        assert!(!handle.status().await.unwrap().running);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(handle.status().await.is_err());
    }

    #[tokio::test]
    async fn test_manual_trigger_and_latest_decision() {
        let scheduler = scheduler(ScriptedLlm::new(vec![LlmResponse::text(
            "Nothing to close before the bell.",
        )]));
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        assert!(handle.latest_decision().await.unwrap().is_none());

        let report = handle.trigger(DecisionType::PreClose).await.unwrap();
        assert!(report.success);
        assert_eq!(report.decision_type, DecisionType::PreClose);

        let latest = handle.latest_decision().await.unwrap().unwrap();
        assert_eq!(Some(latest.id), report.decision_id);

        // no risk_limits_path configured
        assert!(handle.reload_risk_limits().await.is_err());

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_manual_on_demand() {
        let scheduler = scheduler(ScriptedLlm::new(vec![LlmResponse::text("No edge on TSLA.")]));
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        let report = handle.analyze_ticker("tsla").await.unwrap();
        assert!(report.success);
        assert_eq!(report.decision_type, DecisionType::OnDemand);
        assert_eq!(report.signals_analyzed, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
