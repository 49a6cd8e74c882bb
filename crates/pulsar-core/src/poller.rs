// ── Poll orchestration ──
//
// One gather cycle runs three phases in order: device clock, optional
// diagnostics, current readings. Each phase gets up to `MAX_RETRIES`
// immediate attempts; exhausting them aborts the rest of the cycle.
// Records already emitted stay emitted.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use pulsar_api::{DeviceClient, Dialer, TcpDialer, TcpTransport};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channels::ChannelSet;
use crate::clock::{Clock, SystemClock};
use crate::config::DeviceConfig;
use crate::diagnostics::{self, DiagnosticFlag};
use crate::error::CoreError;
use crate::schedule::StatusSchedule;
use crate::session::{ConnectionState, Session};
use crate::sink::{Accumulator, FieldValue, Fields, MEASUREMENT, Tags};

/// Attempts per phase before the cycle is aborted.
pub const MAX_RETRIES: u32 = 3;

const TAG_ID: &str = "id";
const FIELD_ERROR_KEY: &str = "error_key";
const FIELD_ERROR_DESCRIPTION: &str = "error_description";
const FIELD_NET_STATUS: &str = "net_status";
const FIELD_TIME_DIFF: &str = "time_diff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    SysTime,
    Status,
    Values,
}

/// State carried from one cycle to the next.
#[derive(Debug, Clone)]
pub struct PollContext {
    reported_state: ConnectionState,
    schedule: StatusSchedule,
}

impl PollContext {
    pub fn new(schedule: StatusSchedule) -> Self {
        Self {
            reported_state: ConnectionState::Disconnected,
            schedule,
        }
    }

    /// Connection state as of the last `net_status` record.
    pub fn reported_state(&self) -> ConnectionState {
        self.reported_state
    }

    pub fn schedule(&self) -> &StatusSchedule {
        &self.schedule
    }
}

/// What a successful cycle read from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Device clock, normalized to the configured zone.
    pub timestamp: DateTime<Tz>,
    /// Decoded diagnostics, or `None` when the check was not due.
    pub status: Option<Vec<DiagnosticFlag>>,
    /// Readings keyed by field name.
    pub values: BTreeMap<String, f64>,
}

// ── Retry bookkeeping ────────────────────────────────────────────────

struct Attempts {
    phase: Phase,
    made: u32,
}

impl Attempts {
    fn new(phase: Phase) -> Self {
        Self { phase, made: 0 }
    }

    /// Count a failure. Errors out once the ceiling is reached.
    fn failed(&mut self, err: CoreError) -> Result<(), CoreError> {
        self.made += 1;
        if self.made < MAX_RETRIES {
            debug!(phase = %self.phase, attempt = self.made, error = %err, "retrying");
            return Ok(());
        }
        Err(CoreError::CycleAborted {
            phase: self.phase,
            attempts: self.made,
            source: Box::new(err),
        })
    }
}

// ── Poller ───────────────────────────────────────────────────────────

/// Polls one registrator.
pub struct Poller<D: Dialer, C, K = SystemClock> {
    config: DeviceConfig,
    session: Session<D, C>,
    context: PollContext,
    clock: K,
}

impl<D, C> Poller<D, C, SystemClock>
where
    D: Dialer,
    C: DeviceClient<Transport = D::Transport>,
{
    pub fn new(config: DeviceConfig, dialer: D) -> Result<Self, CoreError> {
        Self::with_clock(config, dialer, SystemClock)
    }
}

impl<C> Poller<TcpDialer, C, SystemClock>
where
    C: DeviceClient<Transport = TcpTransport>,
{
    /// Poll over TCP using the timeouts and frame logging in `config`.
    pub fn tcp(config: DeviceConfig) -> Result<Self, CoreError> {
        let dialer = config.dialer();
        Self::new(config, dialer)
    }
}

impl<D, C, K> Poller<D, C, K>
where
    D: Dialer,
    C: DeviceClient<Transport = D::Transport>,
    K: Clock,
{
    pub fn with_clock(config: DeviceConfig, dialer: D, clock: K) -> Result<Self, CoreError> {
        config.validate()?;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            socket = %config.socket,
            address = %config.address,
            channels = %config.channels,
            status_interval = %config.status_interval,
            timezone = %config.timezone,
            "pulsar poller initialized"
        );
        let session = Session::new(dialer, config.socket.clone(), config.address.clone());
        let context = PollContext::new(StatusSchedule::new(config.status_interval));
        Ok(Self {
            config,
            session,
            context,
            clock,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn context(&self) -> &PollContext {
        &self.context
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Run one cycle, emitting records into `acc`.
    ///
    /// Connectivity transitions and clock drift are reported even when a
    /// later phase aborts the cycle.
    pub async fn gather<A>(&mut self, acc: &mut A) -> Result<CycleReport, CoreError>
    where
        A: Accumulator + Send + ?Sized,
    {
        let mut device_time = None;
        let result = self.run_phases(acc, &mut device_time).await;
        if let Err(err) = &result {
            warn!(address = %self.config.address, error = %err, "pulsar gather failed");
        }

        let now = self.clock.now();
        let basis = device_time.map_or(now, |t| t.with_timezone(&Utc));
        self.report_connectivity(acc, basis);
        if let Some(device_time) = device_time {
            let drift = device_time.with_timezone(&Utc).signed_duration_since(now);
            let fields = Fields::from([(
                FIELD_TIME_DIFF.to_owned(),
                FieldValue::Int(drift.num_seconds()),
            )]);
            acc.add_fields(MEASUREMENT, fields, self.tags(), basis);
        }
        result
    }

    /// Gather every `period` until `cancel` fires, then close the link.
    /// Failed cycles are logged and the loop carries on. A zero period is
    /// rejected before anything is polled.
    pub async fn run<A>(
        &mut self,
        period: Duration,
        acc: &mut A,
        cancel: CancellationToken,
    ) -> Result<(), CoreError>
    where
        A: Accumulator + Send + ?Sized,
    {
        if period.is_zero() {
            return Err(CoreError::config("poll period must be positive"));
        }
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    // Failures are already logged by gather.
                    let _ = self.gather(acc).await;
                }
            }
        }

        debug!(address = %self.config.address, "poller stopping");
        self.session.close().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.session.close().await;
    }

    // ── Phases ───────────────────────────────────────────────────────

    async fn run_phases<A>(
        &mut self,
        acc: &mut A,
        device_time: &mut Option<DateTime<Tz>>,
    ) -> Result<CycleReport, CoreError>
    where
        A: Accumulator + Send + ?Sized,
    {
        let mut attempts = Attempts::new(Phase::SysTime);
        let timestamp = loop {
            match self.sys_time().await {
                Ok(t) => break t,
                Err(err) => attempts.failed(err)?,
            }
        };
        *device_time = Some(timestamp);
        let at = timestamp.with_timezone(&Utc);

        let status = if self.context.schedule.is_due(&self.clock.now()) {
            let mut attempts = Attempts::new(Phase::Status);
            let flags = loop {
                match self.diagnostics().await {
                    Ok(flags) => break flags,
                    Err(err) => attempts.failed(err)?,
                }
            };
            for flag in &flags {
                let fields = Fields::from([
                    (FIELD_ERROR_KEY.to_owned(), FieldValue::from(flag.code)),
                    (FIELD_ERROR_DESCRIPTION.to_owned(), FieldValue::from(flag.description)),
                ]);
                acc.add_fields(MEASUREMENT, fields, self.tags(), at);
            }
            self.context.schedule.mark_fired(self.clock.now());
            Some(flags)
        } else {
            None
        };

        let mut attempts = Attempts::new(Phase::Values);
        let readings = loop {
            match self.values().await {
                Ok(readings) => break readings,
                Err(err) => attempts.failed(err)?,
            }
        };
        let fields = readings
            .iter()
            .map(|(name, value)| (name.clone(), FieldValue::Float(*value)))
            .collect();
        acc.add_fields(MEASUREMENT, fields, self.tags(), at);

        Ok(CycleReport {
            timestamp,
            status,
            values: readings,
        })
    }

    async fn sys_time(&mut self) -> Result<DateTime<Tz>, CoreError> {
        debug!("device systime request");
        let client = self.session.acquire().await?;
        let result = client.sys_time().await;
        let naive = result.map_err(|err| self.session.fail("systime", err))?;
        Ok(localize(naive, self.config.timezone))
    }

    async fn diagnostics(&mut self) -> Result<Vec<DiagnosticFlag>, CoreError> {
        debug!("device status request");
        let client = self.session.acquire().await?;
        let result = client.diagnostics_flags().await;
        let flags = result.map_err(|err| self.session.fail("status", err))?;
        Ok(diagnostics::decode(flags))
    }

    async fn values(&mut self) -> Result<BTreeMap<String, f64>, CoreError> {
        debug!(channels = %self.config.channels, "device values request");
        let client = self.session.acquire().await?;
        let result = client.cur_values(self.config.channels.ids()).await;
        let readings = result.map_err(|err| self.session.fail("values", err))?;

        let ids = self.config.channels.ids();
        if readings.len() != ids.len() {
            let message = format!("expected {} readings, got {}", ids.len(), readings.len());
            return Err(self
                .session
                .fail("values", pulsar_api::Error::MalformedResponse { message }));
        }
        Ok(ids
            .iter()
            .zip(&readings)
            .map(|(id, reading)| {
                (ChannelSet::field_name(&self.config.channel_prefix, *id), reading.value)
            })
            .collect())
    }

    // ── Emission helpers ─────────────────────────────────────────────

    fn tags(&self) -> Tags {
        Tags::from([(TAG_ID.to_owned(), self.config.address.clone())])
    }

    fn report_connectivity<A>(&mut self, acc: &mut A, at: DateTime<Utc>)
    where
        A: Accumulator + ?Sized,
    {
        let current = self.session.state();
        if current == self.context.reported_state {
            return;
        }
        info!(
            address = %self.config.address,
            status = current.net_status(),
            "device connectivity changed"
        );
        let fields = Fields::from([(
            FIELD_NET_STATUS.to_owned(),
            FieldValue::from(current.net_status()),
        )]);
        acc.add_fields(MEASUREMENT, fields, self.tags(), at);
        self.context.reported_state = current;
    }
}

/// Attach `tz` to a device wall-clock reading.
///
/// Ambiguous readings (clocks turned back) take the earlier instant.
/// Readings inside a spring-forward gap take the offset in effect at the
/// same wall time read as UTC.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => {
            let offset = tz.offset_from_utc_datetime(&naive).fix();
            let utc = naive - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
            tz.from_utc_datetime(&utc)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn localize_plain() {
        let t = localize(naive(2024, 6, 1, 15, 0), Tz::Europe__Moscow);
        assert_eq!(t.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn localize_ambiguous_takes_earliest() {
        // 2024-10-27 02:30 happens twice in Berlin.
        let t = localize(naive(2024, 10, 27, 2, 30), Tz::Europe__Berlin);
        assert_eq!(t.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap());
    }

    #[test]
    fn localize_gap_is_deterministic() {
        // 2024-03-31 02:30 does not exist in Berlin.
        let a = localize(naive(2024, 3, 31, 2, 30), Tz::Europe__Berlin);
        let b = localize(naive(2024, 3, 31, 2, 30), Tz::Europe__Berlin);
        assert_eq!(a, b);
        assert_eq!(a.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 3, 31, 0, 30, 0).unwrap());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::SysTime.to_string(), "systime");
        assert_eq!(Phase::Values.to_string(), "values");
    }

    #[test]
    fn attempts_ceiling() {
        let mut attempts = Attempts::new(Phase::Status);
        assert!(attempts.failed(CoreError::config("x")).is_ok());
        assert!(attempts.failed(CoreError::config("x")).is_ok());
        let err = attempts.failed(CoreError::config("x")).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Status));
        assert!(matches!(err, CoreError::CycleAborted { attempts: 3, .. }));
    }
}
