//! Simulation clock and tick resolution.
//!
//! A trading day is divided into a fixed number of ticks. `Daily` trades at
//! the open and the close; `Hourly` steps through all 24 hours.

use std::fmt;
use std::str::FromStr;

const DAILY_LABELS: [&str; 2] = ["Open", "Close"];

const HOURLY_LABELS: [&str; 24] = [
    "12-AM", "01-AM", "02-AM", "03-AM", "04-AM", "05-AM", "06-AM", "07-AM", "08-AM", "09-AM",
    "10-AM", "11-AM", "12-PM", "01-PM", "02-PM", "03-PM", "04-PM", "05-PM", "06-PM", "07-PM",
    "08-PM", "09-PM", "10-PM", "11-PM",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Daily,
    Hourly,
}

impl Resolution {
    pub fn ticks_per_day(self) -> usize {
        self.labels().len()
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Resolution::Daily => &DAILY_LABELS,
            Resolution::Hourly => &HOURLY_LABELS,
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Resolution::Daily),
            "hourly" => Ok(Resolution::Hourly),
            other => Err(format!(
                "unrecognized resolution '{}' (expected daily or hourly)",
                other
            )),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Daily => write!(f, "daily"),
            Resolution::Hourly => write!(f, "hourly"),
        }
    }
}

/// A position within the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tick {
    pub resolution: Resolution,
    pub index: usize,
}

impl Tick {
    pub fn open(resolution: Resolution) -> Self {
        Tick {
            resolution,
            index: 0,
        }
    }

    /// The daily closing tick.
    pub fn close() -> Self {
        Tick {
            resolution: Resolution::Daily,
            index: 1,
        }
    }

    pub fn label(self) -> &'static str {
        self.resolution.labels()[self.index]
    }

    pub fn is_last(self) -> bool {
        self.index + 1 == self.resolution.ticks_per_day()
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct Clock {
    resolution: Resolution,
    index: usize,
}

impl Clock {
    pub fn new(resolution: Resolution) -> Self {
        Clock {
            resolution,
            index: 0,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn tick(&self) -> Tick {
        Tick {
            resolution: self.resolution,
            index: self.index,
        }
    }

    pub fn forward_time(&mut self) {
        self.index = (self.index + 1) % self.resolution.ticks_per_day();
    }

    pub fn is_eod(&self) -> bool {
        self.tick().is_last()
    }
}
