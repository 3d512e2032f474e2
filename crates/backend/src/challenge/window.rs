use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use common::types::WalletType;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// When a CONCOURS wallet may trade: after the launch instant, on a trading
/// day, inside the `[open, close)` session in the exchange's local offset.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    launch: DateTime<Utc>,
    days: Vec<Weekday>,
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    NotOpen {
        launch: DateTime<Utc>,
        days_remaining: i64,
    },
    OutsideWindow(WindowViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowViolation {
    ClosedDay(Weekday),
    BeforeOpen,
    AfterClose,
}

impl WindowViolation {
    pub fn message(&self) -> String {
        match self {
            Self::ClosedDay(day) => format!(
                "CONCOURS wallet trading is closed on {day}; come back on a trading day"
            ),
            Self::BeforeOpen => "CONCOURS wallet trading session has not opened yet".to_string(),
            Self::AfterClose => "CONCOURS wallet trading session is closed for today".to_string(),
        }
    }
}

impl TradingWindow {
    pub fn new(
        launch: DateTime<Utc>,
        days: Vec<Weekday>,
        open: NaiveTime,
        close: NaiveTime,
        offset: FixedOffset,
    ) -> Self {
        Self {
            launch,
            days,
            open,
            close,
            offset,
        }
    }

    pub fn launch(&self) -> DateTime<Utc> {
        self.launch
    }

    pub fn is_launched(&self, now: DateTime<Utc>) -> bool {
        now >= self.launch
    }

    /// Decide whether a trade on `wallet` may proceed at `now`.
    ///
    /// Only CONCOURS wallets are restricted. The launch date is checked before
    /// the session, so any pre-launch request reports `NotOpen`.
    pub fn check(&self, wallet: WalletType, now: DateTime<Utc>) -> GateDecision {
        if wallet != WalletType::Concours {
            return GateDecision::Allowed;
        }

        if !self.is_launched(now) {
            let remaining_ms = (self.launch - now).num_milliseconds();
            return GateDecision::NotOpen {
                launch: self.launch,
                days_remaining: (remaining_ms + MS_PER_DAY - 1) / MS_PER_DAY,
            };
        }

        let local = now.with_timezone(&self.offset);
        let day = local.weekday();
        if !self.days.contains(&day) {
            return GateDecision::OutsideWindow(WindowViolation::ClosedDay(day));
        }

        let time = local.time();
        if time < self.open {
            return GateDecision::OutsideWindow(WindowViolation::BeforeOpen);
        }
        if time >= self.close {
            return GateDecision::OutsideWindow(WindowViolation::AfterClose);
        }

        GateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn brvm_window() -> TradingWindow {
        TradingWindow::new(
            Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap(),
            vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_sandbox_always_allowed() {
        let window = brvm_window();
        // Pre-launch, weekend, and night: none of it matters for SANDBOX.
        for now in [
            at(2025, 12, 1, 10, 0),
            at(2026, 2, 7, 12, 0),
            at(2026, 2, 3, 23, 59),
        ] {
            assert_eq!(
                window.check(WalletType::Sandbox, now),
                GateDecision::Allowed
            );
        }
    }

    #[test]
    fn test_concours_before_launch_is_not_open() {
        let window = brvm_window();
        // Friday inside session hours, three days before launch.
        let decision = window.check(WalletType::Concours, at(2026, 1, 30, 10, 0));
        match decision {
            GateDecision::NotOpen {
                days_remaining,
                launch,
            } => {
                assert_eq!(days_remaining, 3);
                assert_eq!(launch, window.launch());
            }
            other => panic!("expected NotOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        let window = brvm_window();
        let one_second_before = window.launch() - chrono::Duration::seconds(1);
        assert_eq!(
            window.check(WalletType::Concours, one_second_before),
            GateDecision::NotOpen {
                launch: window.launch(),
                days_remaining: 1,
            }
        );
    }

    #[test]
    fn test_concours_weekend_rejected() {
        let window = brvm_window();
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 7, 11, 0)),
            GateDecision::OutsideWindow(WindowViolation::ClosedDay(Weekday::Sat))
        );
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 8, 11, 0)),
            GateDecision::OutsideWindow(WindowViolation::ClosedDay(Weekday::Sun))
        );
    }

    #[test]
    fn test_concours_session_bounds() {
        let window = brvm_window();
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 3, 8, 59)),
            GateDecision::OutsideWindow(WindowViolation::BeforeOpen)
        );
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 3, 9, 0)),
            GateDecision::Allowed
        );
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 3, 15, 29)),
            GateDecision::Allowed
        );
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 3, 15, 30)),
            GateDecision::OutsideWindow(WindowViolation::AfterClose)
        );
    }

    #[test]
    fn test_offset_shifts_session_and_day() {
        let window = TradingWindow::new(
            at(2026, 2, 2, 0, 0),
            vec![Weekday::Mon, Weekday::Tue],
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            FixedOffset::east_opt(3 * 3600).unwrap(),
        );
        // 07:00 UTC on Monday is 10:00 local.
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 9, 7, 0)),
            GateDecision::Allowed
        );
        // 22:00 UTC on Tuesday is already Wednesday 01:00 local.
        assert_eq!(
            window.check(WalletType::Concours, at(2026, 2, 10, 22, 0)),
            GateDecision::OutsideWindow(WindowViolation::ClosedDay(Weekday::Wed))
        );
    }

    #[test]
    fn test_violation_message_names_day() {
        assert!(WindowViolation::ClosedDay(Weekday::Sat)
            .message()
            .contains("Sat"));
    }
}
