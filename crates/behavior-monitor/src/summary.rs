//! Sleep summary for status displays

use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BehaviorLabel {
    Disabled,
    NoChild,
    Sleep,
    Awake,
}

impl fmt::Display for BehaviorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BehaviorLabel::Disabled => "Disabled",
            BehaviorLabel::NoChild => "No child",
            BehaviorLabel::Sleep => "Sleep",
            BehaviorLabel::Awake => "Awake",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SleepSummary {
    pub label: BehaviorLabel,
    /// Stillness so far while asleep, zero otherwise
    pub sleep_time: Duration,
    pub fall_risk: bool,
}

/// `"{h}h {m}m"` when at least an hour, else `"{m}m"`
pub fn format_sleep_time(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
