//! Clock configurations and the shim configuration grammar.
//!
//! | Grammar                     | Variant                           |
//! |-----------------------------|-----------------------------------|
//! | *(empty)*                   | `RealTime`                        |
//! | `+0`, `-2d`, `+3600`        | `FixedOffset` (relative)          |
//! | `@2026-07-01 00:00:00`      | `FixedOffset` (absolute start)    |
//! | `<base> x2.0`               | `SpeedMultiplier`                 |
//! | `<base> i2.0`               | `LinearIncrement`                 |
//! | `<base> s @<instant>`       | `Switchable` (trigger is separate)|
//! | `s <gap>`                   | `Switchable` shorthand            |
//!
//! `s <gap>` starts the child at real time and jumps to `gap` seconds before
//! the new-year boundary of the reference year when the trigger fires.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::trigger::Trigger;

/// Neutral shim configuration: faked, but identical to real time.
pub const NEUTRAL: &str = "+0";

/// Instant format understood by the shim.
pub const INSTANT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockParseError {
    #[error("invalid offset `{0}` (expected +N or -N with optional m/h/d/y suffix)")]
    InvalidOffset(String),
    #[error("invalid instant `{0}` (expected YYYY-MM-DD HH:MM:SS)")]
    InvalidInstant(String),
    #[error("invalid factor `{0}` (must be a positive number)")]
    InvalidFactor(String),
    #[error("invalid switch gap `{0}`")]
    InvalidGap(String),
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("switch configuration `{0}` requires a trigger")]
    MissingTrigger(String),
    #[error("a trigger cannot be combined with `{0}`")]
    TriggerConflict(String),
}

/// Relative clock offset in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset {
    seconds: i64,
}

impl Offset {
    pub const ZERO: Offset = Offset { seconds: 0 };

    pub fn seconds(seconds: i64) -> Self {
        Self { seconds }
    }

    pub fn as_seconds(&self) -> i64 {
        self.seconds
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds == 0 {
            return f.write_str(NEUTRAL);
        }
        let sign = if self.seconds < 0 { '-' } else { '+' };
        let abs = self.seconds.unsigned_abs();
        let (value, unit) = if abs % 86_400 == 0 {
            (abs / 86_400, "d")
        } else if abs % 3_600 == 0 {
            (abs / 3_600, "h")
        } else if abs % 60 == 0 {
            (abs / 60, "m")
        } else {
            (abs, "")
        };
        write!(f, "{}{}{}", sign, value, unit)
    }
}

impl std::str::FromStr for Offset {
    type Err = ClockParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ClockParseError::InvalidOffset(s.to_string());
        let (negative, rest) = match s.as_bytes().first() {
            Some(b'+') => (false, &s[1..]),
            Some(b'-') => (true, &s[1..]),
            _ => return Err(err()),
        };
        let (digits, scale) = match rest.chars().last() {
            Some('m') => (&rest[..rest.len() - 1], 60),
            Some('h') => (&rest[..rest.len() - 1], 3_600),
            Some('d') => (&rest[..rest.len() - 1], 86_400),
            Some('y') => (&rest[..rest.len() - 1], 365 * 86_400),
            _ => (rest, 1),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let value: i64 = digits.parse().map_err(|_| err())?;
        let seconds = value.checked_mul(scale).ok_or_else(err)?;
        Ok(Self {
            seconds: if negative { -seconds } else { seconds },
        })
    }
}

/// Strictly positive, finite rate factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factor(f64);

impl Factor {
    pub const ONE: Factor = Factor(1.0);

    pub fn new(value: f64) -> Result<Self, ClockParseError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(ClockParseError::InvalidFactor(value.to_string()))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0 < 1e15 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::str::FromStr for Factor {
    type Err = ClockParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .parse()
            .map_err(|_| ClockParseError::InvalidFactor(s.to_string()))?;
        Self::new(value).map_err(|_| ClockParseError::InvalidFactor(s.to_string()))
    }
}

/// Where the faked clock starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockBase {
    Offset(Offset),
    At(NaiveDateTime),
}

impl ClockBase {
    pub const NEUTRAL: ClockBase = ClockBase::Offset(Offset::ZERO);
}

impl Default for ClockBase {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl fmt::Display for ClockBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset(o) => write!(f, "{}", o),
            Self::At(t) => write!(f, "@{}", t.format(INSTANT_FORMAT)),
        }
    }
}

impl std::str::FromStr for ClockBase {
    type Err = ClockParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('@') {
            Some(instant) => parse_instant(instant).map(Self::At),
            None => s.parse().map(Self::Offset),
        }
    }
}

/// A mid-run clock jump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPlan {
    pub trigger: Trigger,
    pub initial: ClockBase,
    pub switch_to: NaiveDateTime,
}

impl SwitchPlan {
    /// Start at real time, jump to `gap` seconds before `year + 1`-01-01 00:00:00.
    pub fn before_new_year(trigger: Trigger, year: i32, gap: u32) -> Result<Self, ClockParseError> {
        let boundary = year
            .checked_add(1)
            .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| ClockParseError::InvalidGap(format!("year {}", year)))?;
        Ok(Self {
            trigger,
            initial: ClockBase::NEUTRAL,
            switch_to: boundary - Duration::seconds(i64::from(gap)),
        })
    }

    /// The clock-state value written when the trigger fires.
    pub fn switch_value(&self) -> String {
        ClockBase::At(self.switch_to).to_string()
    }
}

/// One clock-manipulation strategy for a child process.
#[derive(Debug, Clone, PartialEq)]
pub enum ClockConfig {
    RealTime,
    FixedOffset(ClockBase),
    SpeedMultiplier { base: ClockBase, factor: Factor },
    LinearIncrement { base: ClockBase, factor: Factor },
    Switchable(SwitchPlan),
}

impl ClockConfig {
    /// Parse a configuration string and optional trigger, using the current year
    /// for the `s <gap>` shorthand.
    pub fn parse(text: &str, trigger: Option<Trigger>) -> Result<Self, ClockParseError> {
        Self::parse_with_year(text, trigger, chrono::Local::now().year())
    }

    pub fn parse_with_year(
        text: &str,
        trigger: Option<Trigger>,
        year: i32,
    ) -> Result<Self, ClockParseError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();

        if tokens.is_empty() {
            return match trigger {
                Some(trigger) => Ok(Self::Switchable(SwitchPlan::before_new_year(
                    trigger, year, 1,
                )?)),
                None => Ok(Self::RealTime),
            };
        }

        if tokens[0] == "s" {
            return Self::parse_switch(text, ClockBase::NEUTRAL, &tokens[1..], trigger, year);
        }

        let (base, rest) = split_base(&tokens)?;
        match rest {
            [] => match trigger {
                Some(trigger) => Ok(Self::Switchable(SwitchPlan {
                    initial: base,
                    ..SwitchPlan::before_new_year(trigger, year, 1)?
                })),
                None => Ok(Self::FixedOffset(base)),
            },
            ["s", tail @ ..] => Self::parse_switch(text, base, tail, trigger, year),
            [modifier] if trigger.is_some() => {
                Err(ClockParseError::TriggerConflict((*modifier).to_string()))
            }
            [modifier] => {
                if let Some(f) = modifier.strip_prefix('x') {
                    Ok(Self::SpeedMultiplier {
                        base,
                        factor: f.parse()?,
                    })
                } else if let Some(f) = modifier.strip_prefix('i') {
                    Ok(Self::LinearIncrement {
                        base,
                        factor: f.parse()?,
                    })
                } else {
                    Err(ClockParseError::UnexpectedToken((*modifier).to_string()))
                }
            }
            [_, extra, ..] => Err(ClockParseError::UnexpectedToken((*extra).to_string())),
        }
    }

    fn parse_switch(
        text: &str,
        initial: ClockBase,
        tail: &[&str],
        trigger: Option<Trigger>,
        year: i32,
    ) -> Result<Self, ClockParseError> {
        let trigger = trigger.ok_or_else(|| ClockParseError::MissingTrigger(text.to_string()))?;
        match tail {
            [gap] if !gap.starts_with('@') => {
                let gap: u32 = gap
                    .parse()
                    .map_err(|_| ClockParseError::InvalidGap((*gap).to_string()))?;
                Ok(Self::Switchable(SwitchPlan {
                    initial,
                    ..SwitchPlan::before_new_year(trigger, year, gap)?
                }))
            }
            [_, ..] => match split_base(tail)? {
                (ClockBase::At(switch_to), []) => Ok(Self::Switchable(SwitchPlan {
                    trigger,
                    initial,
                    switch_to,
                })),
                (ClockBase::Offset(o), _) => Err(ClockParseError::InvalidInstant(o.to_string())),
                (_, [extra, ..]) => Err(ClockParseError::UnexpectedToken((*extra).to_string())),
            },
            [] => Err(ClockParseError::InvalidGap(String::new())),
        }
    }

    /// `RealTime` disables injection entirely.
    pub fn is_injected(&self) -> bool {
        !matches!(self, Self::RealTime)
    }

    pub fn switch_plan(&self) -> Option<&SwitchPlan> {
        match self {
            Self::Switchable(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.switch_plan().map(|p| &p.trigger)
    }

    /// Initial shim configuration: the `FAKETIME` value, or the clock-state
    /// file content for switch mode. `None` for real time.
    pub fn shim_value(&self) -> Option<String> {
        match self {
            Self::RealTime => None,
            Self::Switchable(plan) => Some(plan.initial.to_string()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for ClockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RealTime => Ok(()),
            Self::FixedOffset(base) => write!(f, "{}", base),
            Self::SpeedMultiplier { base, factor } => write!(f, "{} x{}", base, factor),
            Self::LinearIncrement { base, factor } => write!(f, "{} i{}", base, factor),
            Self::Switchable(plan) => write!(f, "{} s {}", plan.initial, plan.switch_value()),
        }
    }
}

fn parse_instant(s: &str) -> Result<NaiveDateTime, ClockParseError> {
    NaiveDateTime::parse_from_str(s, INSTANT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| ClockParseError::InvalidInstant(s.to_string()))
}

/// Split the leading base off a token list. An absolute instant written with
/// a space spans two tokens.
fn split_base<'a, 'b>(tokens: &'b [&'a str]) -> Result<(ClockBase, &'b [&'a str]), ClockParseError> {
    match tokens {
        [first, time, rest @ ..] if first.starts_with('@') && !first.contains('T') => {
            let base = format!("{} {}", first, time).parse()?;
            Ok((base, rest))
        }
        [first, rest @ ..] => Ok((first.parse()?, rest)),
        [] => Err(ClockParseError::InvalidOffset(String::new())),
    }
}
