use chrono::{DateTime, Utc};

/// Source of "now" for time-gated decisions.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    /// Frozen instant, for tests and replays.
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }
}
