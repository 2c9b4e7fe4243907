//! Schedule-driven time windows ("slices").
//!
//! Every trigger re-surfaces a set of historical windows for digestion.
//! Short cycles run every 4 and 8 hours; at noon a two-day window is always
//! produced and the 3-day, weekly and fortnight retrospectives follow the
//! day of the month. The hour offsets below are editorial policy and must
//! not drift.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::fmt;

/// The named windows a trigger may emit, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    FourHour,
    EightHour,
    TwoDay,
    ThreeDay,
    Weekly,
    Fortnight,
}

impl WindowKind {
    pub const ALL: [WindowKind; 6] = [
        WindowKind::FourHour,
        WindowKind::EightHour,
        WindowKind::TwoDay,
        WindowKind::ThreeDay,
        WindowKind::Weekly,
        WindowKind::Fortnight,
    ];

    /// Label used in slice file names and digest ids.
    pub fn label(self) -> &'static str {
        match self {
            WindowKind::FourHour => "4h_window",
            WindowKind::EightHour => "8h_window",
            WindowKind::TwoDay => "2day_window",
            WindowKind::ThreeDay => "3day_window",
            WindowKind::Weekly => "weekly_window",
            WindowKind::Fortnight => "fortnight_window",
        }
    }

    /// `(far, near)` offsets in hours before the trigger: the window spans
    /// `[trigger - far, trigger - near]`.
    pub fn offsets_hours(self) -> (i64, i64) {
        match self {
            WindowKind::FourHour => (8, 2),
            WindowKind::EightHour => (16, 4),
            WindowKind::TwoDay => (60, 12),
            WindowKind::ThreeDay => (168, 72),
            WindowKind::Weekly => (336, 168),
            WindowKind::Fortnight => (1080, 360),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A concrete time range computed for one trigger. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    fn relative_to(kind: WindowKind, trigger: DateTime<Utc>) -> Self {
        let (far, near) = kind.offsets_hours();
        Window {
            kind,
            start: trigger - Duration::hours(far),
            end: trigger - Duration::hours(near),
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// Both ends are inclusive.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// Compute the windows due at `trigger`.
///
/// Only the hour and the day of month of the trigger decide which windows
/// are emitted; the trigger instant anchors their bounds.
pub fn plan_windows(trigger: DateTime<Utc>) -> Vec<Window> {
    let hour = trigger.hour();
    let day = trigger.day();
    let mut due = Vec::new();

    if hour % 4 == 0 {
        due.push(WindowKind::FourHour);
    }
    if hour % 8 == 0 {
        due.push(WindowKind::EightHour);
    }
    if hour == 12 {
        due.push(WindowKind::TwoDay);
        if day % 3 == 0 {
            due.push(WindowKind::ThreeDay);
        }
        if day % 7 == 0 {
            due.push(WindowKind::Weekly);
        }
        if day % 14 == 0 {
            due.push(WindowKind::Fortnight);
        }
    }

    due.into_iter()
        .map(|kind| Window::relative_to(kind, trigger))
        .collect()
}
