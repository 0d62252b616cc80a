// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Device-wide playback settings that drive the sleep timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    pub disable_shake_to_reset_sleep_timer: bool,
    pub auto_sleep_timer: bool,
    /// Start of the daily auto sleep window, "HH:MM"
    pub auto_sleep_timer_start_time: String,
    /// End of the daily auto sleep window, "HH:MM"
    pub auto_sleep_timer_end_time: String,
    /// Sleep timer length in milliseconds, 0 means end of chapter
    pub sleep_timer_length: i64,
    pub disable_sleep_timer_fade_out: bool,
    pub disable_sleep_timer_reset_feedback: bool,
    pub enable_sleep_timer_almost_done_chime: bool,
    pub auto_sleep_timer_auto_rewind: bool,
    /// Rewind distance in milliseconds
    pub auto_sleep_timer_auto_rewind_time: i64,
    /// Set when the user cancelled an auto timer; cleared once the window is left
    pub auto_sleep_timer_suppressed: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            disable_shake_to_reset_sleep_timer: false,
            auto_sleep_timer: false,
            auto_sleep_timer_start_time: "22:00".to_string(),
            auto_sleep_timer_end_time: "06:00".to_string(),
            sleep_timer_length: 900_000,
            disable_sleep_timer_fade_out: false,
            disable_sleep_timer_reset_feedback: false,
            enable_sleep_timer_almost_done_chime: false,
            auto_sleep_timer_auto_rewind: false,
            auto_sleep_timer_auto_rewind_time: 300_000,
            auto_sleep_timer_suppressed: false,
        }
    }
}

impl DeviceSettings {
    pub fn auto_sleep_timer_start(&self) -> Result<NaiveTime, SettingsError> {
        parse_time_of_day(&self.auto_sleep_timer_start_time)
    }

    pub fn auto_sleep_timer_end(&self) -> Result<NaiveTime, SettingsError> {
        parse_time_of_day(&self.auto_sleep_timer_end_time)
    }
}

/// Parse an "HH:MM" time of day
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, SettingsError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| SettingsError::InvalidTimeOfDay {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_night_window() {
        let settings = DeviceSettings::default();
        assert_eq!(
            settings.auto_sleep_timer_start().unwrap(),
            NaiveTime::from_hms_opt(22, 0, 0).unwrap()
        );
        assert_eq!(
            settings.auto_sleep_timer_end().unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap()
        );
        assert_eq!(settings.sleep_timer_length, 900_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("noon").is_err());
        assert!(parse_time_of_day(" 7:05 ").is_ok());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: DeviceSettings =
            serde_json::from_str(r#"{"autoSleepTimer": true, "sleepTimerLength": 0}"#).unwrap();

        assert!(settings.auto_sleep_timer);
        assert_eq!(settings.sleep_timer_length, 0);
        assert_eq!(settings.auto_sleep_timer_start_time, "22:00");
    }
}
