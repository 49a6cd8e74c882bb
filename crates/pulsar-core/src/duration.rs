// ── Calendar-aware durations ──
//
// A `CalendarDuration` keeps months and years apart from the fixed
// elapsed span: their length depends on the instant they are applied
// to, so they are only ever resolved through calendar arithmetic.
//
// Text is parsed in two passes. Plain fixed-span strings ("90s",
// "1h30m", "1.5", "300") go through the fast path; anything else goes
// through the calendar grammar, which adds `n`, `u`, `d`, `w`, `mo`
// and `y` units.

use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};

use chrono::{DateTime, Months, TimeDelta, TimeZone};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MIN: i64 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MIN;
const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;
const NANOS_PER_WEEK: i64 = 7 * NANOS_PER_DAY;

// ── CalendarDuration ────────────────────────────────────────────────

/// A signed duration made of a fixed span plus calendar months and years.
///
/// The three parts combine additively. When applied to an instant the
/// calendar part goes first, then the fixed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CalendarDuration {
    elapsed: TimeDelta,
    months: i32,
    years: i32,
}

impl CalendarDuration {
    pub const ZERO: Self = Self {
        elapsed: TimeDelta::zero(),
        months: 0,
        years: 0,
    };

    pub fn new(elapsed: TimeDelta, months: i32, years: i32) -> Self {
        Self {
            elapsed,
            months,
            years,
        }
    }

    pub fn from_elapsed(elapsed: TimeDelta) -> Self {
        Self::new(elapsed, 0, 0)
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.elapsed
    }

    pub fn months(&self) -> i32 {
        self.months
    }

    pub fn years(&self) -> i32 {
        self.years
    }

    /// `true` when every component is zero.
    pub fn is_zero(&self) -> bool {
        self.elapsed.is_zero() && self.months == 0 && self.years == 0
    }

    /// Parse duration text. See the module docs for the accepted forms.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let text = input.trim_matches(['"', '\'']);
        if let Some(elapsed) = parse_fixed(text) {
            return Ok(Self::from_elapsed(elapsed));
        }
        parse_calendar(text).ok_or_else(|| CoreError::MalformedDuration {
            input: input.to_owned(),
        })
    }

    /// Apply this duration to `instant`: years and months through
    /// calendar arithmetic, then the fixed span.
    ///
    /// Month arithmetic clamps to the last day of the target month
    /// (Jan 31 + 1mo = Feb 28/29). Returns `None` when the result is out
    /// of range.
    pub fn add_to<Tz: TimeZone>(&self, instant: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let months = i64::from(self.years)
            .checked_mul(12)?
            .checked_add(i64::from(self.months))?;
        let shifted = if months >= 0 {
            instant.checked_add_months(Months::new(u32::try_from(months).ok()?))?
        } else {
            instant.checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
        };
        shifted.checked_add_signed(self.elapsed)
    }

    /// Time left from `now` until `reference + self`.
    ///
    /// Positive while the target lies ahead, zero or negative once it
    /// has been reached.
    pub fn until<Tz: TimeZone>(
        &self,
        reference: DateTime<Tz>,
        now: &DateTime<Tz>,
    ) -> Option<TimeDelta> {
        let target = self.add_to(reference)?;
        Some(target.signed_duration_since(now.clone()))
    }

    fn checked_neg(self) -> Option<Self> {
        Some(Self {
            elapsed: TimeDelta::zero().checked_sub(&self.elapsed)?,
            months: self.months.checked_neg()?,
            years: self.years.checked_neg()?,
        })
    }
}

impl FromStr for CalendarDuration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders in the parse grammar. Anything `parse` produced reads back
/// unchanged; a value built with components of opposite sign prints each
/// component with its own sign, which the grammar does not accept.
impl fmt::Display for CalendarDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0s");
        }
        let all_non_positive =
            self.elapsed <= TimeDelta::zero() && self.months <= 0 && self.years <= 0;
        if all_non_positive {
            if let Some(positive) = self.checked_neg() {
                return write!(f, "-{positive}");
            }
        }
        if self.years != 0 {
            write!(f, "{}y", self.years)?;
        }
        if self.months != 0 {
            write!(f, "{}mo", self.months)?;
        }
        if !self.elapsed.is_zero() {
            write_elapsed(f, self.elapsed)?;
        }
        Ok(())
    }
}

fn write_elapsed(f: &mut fmt::Formatter<'_>, elapsed: TimeDelta) -> fmt::Result {
    const UNITS: [(&str, i64); 7] = [
        ("d", NANOS_PER_DAY),
        ("h", NANOS_PER_HOUR),
        ("m", NANOS_PER_MIN),
        ("s", NANOS_PER_SEC),
        ("ms", NANOS_PER_MILLI),
        ("us", NANOS_PER_MICRO),
        ("ns", 1),
    ];

    let Some(mut nanos) = elapsed.num_nanoseconds() else {
        return write!(f, "{}s", elapsed.num_seconds());
    };
    if nanos < 0 {
        f.write_str("-")?;
    }
    for (suffix, scale) in UNITS {
        let count = nanos / scale;
        if count != 0 {
            write!(f, "{}{suffix}", count.unsigned_abs())?;
            nanos %= scale;
        }
    }
    Ok(())
}

// ── Serde ───────────────────────────────────────────────────────────

impl Serialize for CalendarDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalendarDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CalendarDurationVisitor)
    }
}

struct CalendarDurationVisitor;

impl Visitor<'_> for CalendarDurationVisitor {
    type Value = CalendarDuration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string such as \"1d12h\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        CalendarDuration::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        TimeDelta::try_seconds(v)
            .map(CalendarDuration::from_elapsed)
            .ok_or_else(|| E::custom(format!("duration of {v}s is out of range")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let secs = i64::try_from(v)
            .map_err(|_| E::custom(format!("duration of {v}s is out of range")))?;
        self.visit_i64(secs)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        float_seconds(v)
            .map(CalendarDuration::from_elapsed)
            .ok_or_else(|| E::custom(format!("duration of {v}s is out of range")))
    }
}

// ── Fast path: fixed-span formats ───────────────────────────────────

/// Empty text, bare integer or float seconds, or a sequence of
/// `<decimal><unit>` groups over `ns us µs ms s m h`.
fn parse_fixed(text: &str) -> Option<TimeDelta> {
    if text.is_empty() {
        return Some(TimeDelta::zero());
    }
    if let Ok(secs) = text.parse::<i64>() {
        return TimeDelta::try_seconds(secs);
    }
    if let Ok(secs) = text.parse::<f64>() {
        if secs.is_finite() {
            return float_seconds(secs);
        }
    }
    parse_unit_groups(text)
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn float_seconds(secs: f64) -> Option<TimeDelta> {
    let nanos = secs * 1e9;
    if !nanos.is_finite() || nanos.abs() >= 9.2e18 {
        return None;
    }
    Some(TimeDelta::nanoseconds(nanos as i64))
}

fn parse_unit_groups(text: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = split_sign(text);
    if rest == "0" {
        return Some(TimeDelta::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    while !rest.is_empty() {
        let (int_digits, after) = split_digits(rest);
        let (frac_digits, after) = match after.strip_prefix('.') {
            Some(after_dot) => split_digits(after_dot),
            None => ("", after),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return None;
        }

        let unit_len = after
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after.len());
        let (unit, tail) = after.split_at(unit_len);
        let scale = fixed_unit_nanos(unit)?;

        let whole: i64 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().ok()?
        };
        let value = whole
            .checked_mul(scale)?
            .checked_add(fraction_nanos(frac_digits, scale))?;
        total = total.checked_add(value)?;
        rest = tail;
    }

    Some(TimeDelta::nanoseconds(if negative { -total } else { total }))
}

fn fixed_unit_nanos(unit: &str) -> Option<i64> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(NANOS_PER_MIN),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// `0.<digits> * scale`, truncated. Digits beyond nanosecond precision
/// are ignored.
fn fraction_nanos(digits: &str, scale: i64) -> i64 {
    let digits = &digits[..digits.len().min(18)];
    if digits.is_empty() {
        return 0;
    }
    let Ok(numerator) = digits.parse::<u64>() else {
        return 0;
    };
    let Some(denominator) = 10u64.checked_pow(u32::try_from(digits.len()).unwrap_or(u32::MAX))
    else {
        return 0;
    };
    let nanos = u128::from(numerator) * u128::from(scale.unsigned_abs()) / u128::from(denominator);
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

fn split_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else {
        (false, text.strip_prefix('+').unwrap_or(text))
    }
}

fn split_digits(text: &str) -> (&str, &str) {
    let len = text.bytes().take_while(u8::is_ascii_digit).count();
    text.split_at(len)
}

// ── Calendar grammar ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Nanos,
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl Unit {
    /// Consume one unit suffix, looking at most one character ahead.
    fn scan(chars: &mut Peekable<Chars<'_>>) -> Option<Self> {
        let unit = match chars.next()? {
            'n' => {
                let _ = chars.next_if_eq(&'s');
                Self::Nanos
            }
            'u' | 'µ' | 'μ' => {
                let _ = chars.next_if_eq(&'s');
                Self::Micros
            }
            'm' => match chars.peek() {
                Some('s') => {
                    chars.next();
                    Self::Millis
                }
                Some('o') => {
                    chars.next();
                    Self::Months
                }
                _ => Self::Minutes,
            },
            's' => Self::Seconds,
            'h' => Self::Hours,
            'd' => Self::Days,
            'w' => Self::Weeks,
            'y' => Self::Years,
            _ => return None,
        };
        Some(unit)
    }

    fn nanos(self) -> Option<i64> {
        match self {
            Self::Nanos => Some(1),
            Self::Micros => Some(NANOS_PER_MICRO),
            Self::Millis => Some(NANOS_PER_MILLI),
            Self::Seconds => Some(NANOS_PER_SEC),
            Self::Minutes => Some(NANOS_PER_MIN),
            Self::Hours => Some(NANOS_PER_HOUR),
            Self::Days => Some(NANOS_PER_DAY),
            Self::Weeks => Some(NANOS_PER_WEEK),
            Self::Months | Self::Years => None,
        }
    }
}

/// `(<digits><unit>)+`, optionally preceded by one sign that applies to
/// the whole expression.
fn parse_calendar(text: &str) -> Option<CalendarDuration> {
    let (negative, body) = split_sign(text);
    if body.is_empty() {
        return None;
    }

    let mut chars = body.chars().peekable();
    let mut elapsed: i64 = 0;
    let mut months: i32 = 0;
    let mut years: i32 = 0;

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.next_if(char::is_ascii_digit) {
            digits.push(c);
        }
        if digits.is_empty() {
            return None;
        }
        let n: i64 = digits.parse().ok()?;

        let unit = Unit::scan(&mut chars)?;
        match unit {
            Unit::Months => months = months.checked_add(i32::try_from(n).ok()?)?,
            Unit::Years => years = years.checked_add(i32::try_from(n).ok()?)?,
            fixed => elapsed = elapsed.checked_add(n.checked_mul(fixed.nanos()?)?)?,
        }
    }

    let parsed = CalendarDuration::new(TimeDelta::nanoseconds(elapsed), months, years);
    if negative {
        parsed.checked_neg()
    } else {
        Some(parsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn elapsed(d: TimeDelta) -> CalendarDuration {
        CalendarDuration::from_elapsed(d)
    }

    #[test]
    fn parses_all_unit_spellings() {
        let cases = [
            ("10n", elapsed(TimeDelta::nanoseconds(10))),
            ("10ns", elapsed(TimeDelta::nanoseconds(10))),
            ("10u", elapsed(TimeDelta::microseconds(10))),
            ("10µ", elapsed(TimeDelta::microseconds(10))),
            ("10us", elapsed(TimeDelta::microseconds(10))),
            ("10µs", elapsed(TimeDelta::microseconds(10))),
            ("15ms", elapsed(TimeDelta::milliseconds(15))),
            ("100s", elapsed(TimeDelta::seconds(100))),
            ("2m", elapsed(TimeDelta::minutes(2))),
            ("2h", elapsed(TimeDelta::hours(2))),
            ("2d", elapsed(TimeDelta::days(2))),
            ("2w", elapsed(TimeDelta::weeks(2))),
            ("2mo", CalendarDuration::new(TimeDelta::zero(), 2, 0)),
            ("2y", CalendarDuration::new(TimeDelta::zero(), 0, 2)),
        ];
        for (text, want) in cases {
            assert_eq!(CalendarDuration::parse(text).unwrap(), want, "parsing {text:?}");
        }
    }

    #[test]
    fn bare_numbers_are_seconds() {
        assert_eq!(
            CalendarDuration::parse("3").unwrap(),
            elapsed(TimeDelta::seconds(3))
        );
        assert_eq!(
            CalendarDuration::parse("1000").unwrap(),
            elapsed(TimeDelta::seconds(1000))
        );
        assert_eq!(
            CalendarDuration::parse("1.5").unwrap(),
            elapsed(TimeDelta::milliseconds(1500))
        );
    }

    #[test]
    fn disambiguates_m_ms_mo() {
        assert_eq!(
            CalendarDuration::parse("1m1ms").unwrap(),
            elapsed(TimeDelta::minutes(1) + TimeDelta::milliseconds(1))
        );
        assert_eq!(
            CalendarDuration::parse("1mo1m").unwrap(),
            CalendarDuration::new(TimeDelta::minutes(1), 1, 0)
        );
        assert_eq!(
            CalendarDuration::parse("1ms1mo").unwrap(),
            CalendarDuration::new(TimeDelta::milliseconds(1), 1, 0)
        );
        assert_eq!(
            CalendarDuration::parse("1d5m").unwrap(),
            elapsed(TimeDelta::days(1) + TimeDelta::minutes(5))
        );
    }

    #[test]
    fn disambiguates_n_ns_and_u_us() {
        assert_eq!(
            CalendarDuration::parse("1n2ns1d").unwrap(),
            elapsed(TimeDelta::nanoseconds(3) + TimeDelta::days(1))
        );
        assert_eq!(
            CalendarDuration::parse("30ms3000u").unwrap(),
            elapsed(TimeDelta::milliseconds(33))
        );
        assert_eq!(
            CalendarDuration::parse("1u1us1d").unwrap(),
            elapsed(TimeDelta::microseconds(2) + TimeDelta::days(1))
        );
    }

    #[test]
    fn parses_compound_expressions() {
        assert_eq!(
            CalendarDuration::parse("2y3h4s5us6ns").unwrap(),
            CalendarDuration::new(
                TimeDelta::hours(3)
                    + TimeDelta::seconds(4)
                    + TimeDelta::microseconds(5)
                    + TimeDelta::nanoseconds(6),
                0,
                2
            )
        );
        assert_eq!(
            CalendarDuration::parse("1h30m").unwrap(),
            elapsed(TimeDelta::minutes(90))
        );
        assert_eq!(
            CalendarDuration::parse("2y3mo").unwrap(),
            CalendarDuration::new(TimeDelta::zero(), 3, 2)
        );
        assert_eq!(
            CalendarDuration::parse("1d12h").unwrap(),
            elapsed(TimeDelta::hours(36))
        );
    }

    #[test]
    fn repeated_units_accumulate() {
        assert_eq!(
            CalendarDuration::parse("1y1y1mo1mo").unwrap(),
            CalendarDuration::new(TimeDelta::zero(), 2, 2)
        );
    }

    #[test]
    fn leading_minus_negates_whole_expression() {
        assert_eq!(
            CalendarDuration::parse("-5s").unwrap(),
            elapsed(TimeDelta::seconds(-5))
        );
        assert_eq!(
            CalendarDuration::parse("-5m30s").unwrap(),
            elapsed(TimeDelta::minutes(-5) - TimeDelta::seconds(30))
        );
        assert_eq!(
            CalendarDuration::parse("-1y2mo1d").unwrap(),
            CalendarDuration::new(TimeDelta::days(-1), -2, -1)
        );
        assert!(CalendarDuration::parse("1d-2h").is_err());
        assert!(CalendarDuration::parse("-").is_err());
    }

    #[test]
    fn fast_path_accepts_fractional_units() {
        assert_eq!(
            CalendarDuration::parse("1.5h").unwrap(),
            elapsed(TimeDelta::minutes(90))
        );
        assert_eq!(
            CalendarDuration::parse(".5s").unwrap(),
            elapsed(TimeDelta::milliseconds(500))
        );
        assert_eq!(
            CalendarDuration::parse("\"10s\"").unwrap(),
            elapsed(TimeDelta::seconds(10))
        );
    }

    #[test]
    fn empty_input_is_zero() {
        let d = CalendarDuration::parse("").unwrap();
        assert!(d.is_zero());
        assert_eq!(d, CalendarDuration::ZERO);
        assert!(CalendarDuration::parse("0").unwrap().is_zero());
    }

    #[test]
    fn rejects_malformed_input() {
        for text in ["3mm", "3nm", "w", "ms", "1.2w", "10x", "1h30", "mo", "1 h", "99999999999999999999y"] {
            let result = CalendarDuration::parse(text);
            assert!(
                matches!(result, Err(CoreError::MalformedDuration { .. })),
                "{text:?} should be malformed, got {result:?}"
            );
        }
    }

    #[test]
    fn is_zero_checks_every_component() {
        assert!(CalendarDuration::default().is_zero());
        assert!(!elapsed(TimeDelta::seconds(1)).is_zero());
        assert!(!CalendarDuration::new(TimeDelta::zero(), 1, 0).is_zero());
        assert!(!CalendarDuration::new(TimeDelta::zero(), 0, 1).is_zero());
        assert!(!CalendarDuration::parse("2mo").unwrap().is_zero());
    }

    #[test]
    fn until_with_elapsed_interval() {
        let now = Utc::now();
        let d = elapsed(TimeDelta::minutes(1));
        assert!(d.until(now, &now).unwrap() > TimeDelta::zero());
        let past = now - TimeDelta::minutes(2);
        assert!(d.until(past, &now).unwrap() < TimeDelta::zero());
    }

    #[test]
    fn until_with_calendar_interval() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let d = CalendarDuration::parse("1mo").unwrap();
        assert!(d.until(now - TimeDelta::days(10), &now).unwrap() > TimeDelta::zero());
        assert!(d.until(now - TimeDelta::days(40), &now).unwrap() < TimeDelta::zero());
        // Exactly one calendar month earlier: target is now.
        let month_ago = Utc.with_ymd_and_hms(2024, 2, 15, 12, 0, 0).unwrap();
        assert_eq!(d.until(month_ago, &now).unwrap(), TimeDelta::zero());
    }

    #[test]
    fn add_to_applies_calendar_before_elapsed() {
        let start = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        let d = CalendarDuration::parse("1y1mo1h").unwrap();
        assert_eq!(
            d.add_to(start).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 1, 0, 0).unwrap()
        );
        let back = CalendarDuration::parse("-1mo").unwrap();
        assert_eq!(
            back.add_to(start).unwrap(),
            Utc.with_ymd_and_hms(2022, 12, 31, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn display_is_parseable() {
        for text in ["1d12h", "2y3mo", "1h30m", "-5m30s", "15ms", "0s"] {
            let d = CalendarDuration::parse(text).unwrap();
            assert_eq!(d.to_string(), text);
            assert_eq!(CalendarDuration::parse(&d.to_string()).unwrap(), d);
        }
    }

    #[test]
    fn mixed_signs_display_per_component() {
        let d = CalendarDuration::new(TimeDelta::hours(-1), 1, 0);
        assert_eq!(d.to_string(), "1mo-1h");
        assert!(CalendarDuration::parse(&d.to_string()).is_err());
    }

    #[test]
    fn strips_only_surrounding_quotes() {
        assert_eq!(
            CalendarDuration::parse("'1d'").unwrap(),
            elapsed(TimeDelta::days(1))
        );
        assert_eq!(
            CalendarDuration::parse("\"1mo\"").unwrap(),
            CalendarDuration::new(TimeDelta::zero(), 1, 0)
        );
        for text in ["1\"h", "1'd", "1d'2h"] {
            assert!(
                matches!(CalendarDuration::parse(text), Err(CoreError::MalformedDuration { .. })),
                "{text:?} should be malformed"
            );
        }
    }

    #[test]
    fn deserializes_strings_and_numbers() {
        let d: CalendarDuration = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(d, elapsed(TimeDelta::days(1)));
        let d: CalendarDuration = serde_json::from_str("90").unwrap();
        assert_eq!(d, elapsed(TimeDelta::seconds(90)));
        let d: CalendarDuration = serde_json::from_str("0").unwrap();
        assert!(d.is_zero());
        assert!(serde_json::from_str::<CalendarDuration>("\"1x\"").is_err());
    }
}
