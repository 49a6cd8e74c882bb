//! Poll engine for Pulsar-M pulse registrators, sitting between
//! `pulsar-api` and a metrics host.
//!
//! - **[`Poller`]**: runs one gather cycle per call (device clock,
//!   scheduled diagnostics, current readings) with bounded retries per
//!   phase, and reports connectivity transitions and clock drift.
//!   [`Poller::run`] drives it on a fixed period until cancelled.
//!
//! - **[`Session`]**: the `Disconnected`/`Connected` machine that owns the
//!   transport and the protocol client, reconnecting lazily after any
//!   failed request.
//!
//! - **[`CalendarDuration`]**: the interval grammar (`"1d"`, `"1mo"`,
//!   `"1y2mo3d4h"`, plain seconds) with calendar-aware arithmetic, used by
//!   [`StatusSchedule`] to gate the diagnostics check.
//!
//! - **[`Accumulator`]**: where records go. `Vec<Record>` collects them in
//!   memory.

pub mod channels;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod duration;
pub mod error;
pub mod poller;
pub mod schedule;
pub mod session;
pub mod sink;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channels::{ChannelSet, MAX_CHANNEL_ID};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DeviceConfig, parse_timezone};
pub use diagnostics::DiagnosticFlag;
pub use duration::CalendarDuration;
pub use error::CoreError;
pub use poller::{CycleReport, MAX_RETRIES, Phase, PollContext, Poller};
pub use schedule::StatusSchedule;
pub use session::{ConnectionState, Session};
pub use sink::{Accumulator, FieldValue, Fields, MEASUREMENT, Record, Tags};
