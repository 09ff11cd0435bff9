//! Quiet window: keeps broadcasts for one class of groups out of the first
//! minutes of a few designated hours.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use relaycast_core::config::QuietWindowConfig;
use relaycast_core::error::{RelayError, Result};

/// Deferral rule for broadcasts whose group name contains `name_contains`.
#[derive(Debug, Clone)]
pub struct QuietWindow {
    name_contains: String,
    hours: Vec<u32>,
    window_minutes: u32,
    tz: Tz,
}

impl QuietWindow {
    pub fn new(name_contains: &str, hours: Vec<u32>, window_minutes: u32, tz: Tz) -> Self {
        Self {
            name_contains: name_contains.trim().to_lowercase(),
            hours,
            window_minutes,
            tz,
        }
    }

    /// `None` when the window is disabled.
    pub fn from_config(config: &QuietWindowConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        if config.window_minutes == 0 || config.window_minutes > 59 {
            return Err(RelayError::Config(format!(
                "quiet_window.window_minutes must be 1..=59, got {}",
                config.window_minutes
            )));
        }
        if let Some(bad) = config.hours.iter().find(|h| **h > 23) {
            return Err(RelayError::Config(format!("quiet_window.hours: {bad} is not an hour")));
        }
        Ok(Some(Self::new(
            &config.name_contains,
            config.hours.clone(),
            config.window_minutes,
            config.timezone()?,
        )))
    }

    /// Whether a group with this display name is subject to the rule.
    pub fn applies_to(&self, group_name: &str) -> bool {
        !self.name_contains.is_empty() && group_name.to_lowercase().contains(&self.name_contains)
    }

    /// Push `fire` to `HH:MM:00.000` (MM = window length) when it lands in
    /// `[HH:00, HH:MM)` of a designated hour in the reference zone.
    pub fn adjust(&self, group_name: &str, fire: DateTime<Utc>) -> DateTime<Utc> {
        if !self.applies_to(group_name) {
            return fire;
        }
        let local = fire.with_timezone(&self.tz);
        if !self.hours.contains(&local.hour()) || local.minute() >= self.window_minutes {
            return fire;
        }
        let into_hour = Duration::minutes(local.minute() as i64)
            + Duration::seconds(local.second() as i64)
            + Duration::nanoseconds(local.nanosecond() as i64);
        fire - into_hour + Duration::minutes(self.window_minutes as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Sao_Paulo;

    fn window() -> QuietWindow {
        QuietWindow::from_config(&QuietWindowConfig::default())
            .unwrap()
            .unwrap()
    }

    fn local(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Sao_Paulo
            .with_ymd_and_hms(2025, 3, 14, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_designated_hours_move_to_half_past() {
        let quiet = window();
        for hour in [0, 9, 12, 15, 18, 21] {
            let adjusted = quiet.adjust("PXG MARKET #2", local(hour, 5, 0));
            assert_eq!(adjusted, local(hour, 30, 0), "hour {hour}");
            let in_zone = adjusted.with_timezone(&Sao_Paulo);
            assert_eq!(in_zone.nanosecond(), 0);
        }
    }

    #[test]
    fn test_sub_second_fire_lands_exactly_on_the_minute() {
        let quiet = window();
        let fire = local(12, 29, 59) + Duration::milliseconds(999);
        assert_eq!(quiet.adjust("pxg market", fire), local(12, 30, 0));
        assert_eq!(quiet.adjust("pxg market", local(12, 0, 0)), local(12, 30, 0));
    }

    #[test]
    fn test_outside_window_is_untouched() {
        let quiet = window();
        let after = local(12, 35, 0);
        assert_eq!(quiet.adjust("PXG Market", after), after);
        let boundary = local(12, 30, 0);
        assert_eq!(quiet.adjust("PXG Market", boundary), boundary);
        let other_hour = local(10, 5, 0);
        assert_eq!(quiet.adjust("PXG Market", other_hour), other_hour);
    }

    #[test]
    fn test_other_groups_are_never_adjusted() {
        let quiet = window();
        for minute in [0, 5, 29] {
            let fire = local(9, minute, 0);
            assert_eq!(quiet.adjust("Pescaria Amigos", fire), fire);
        }
    }

    #[test]
    fn test_config_validation() {
        let disabled = QuietWindowConfig {
            enabled: false,
            ..QuietWindowConfig::default()
        };
        assert!(QuietWindow::from_config(&disabled).unwrap().is_none());

        let bad_hours = QuietWindowConfig {
            hours: vec![9, 24],
            ..QuietWindowConfig::default()
        };
        assert!(QuietWindow::from_config(&bad_hours).is_err());

        let bad_window = QuietWindowConfig {
            window_minutes: 60,
            ..QuietWindowConfig::default()
        };
        assert!(QuietWindow::from_config(&bad_window).is_err());
    }
}
