//! Per-node callout settings and the decision whether a node should be dialed now.

use chrono::{DateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::contact::ContactRecord;
use crate::protocol::DEFAULT_PASSWORD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalloutConfig {
    pub node: u16,
    /// `host[:port]` used when dialing this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub password: String,
    pub auto_callout: bool,
    /// Permitted hour window; values <= 0 or equal bounds mean always allowed
    pub min_hour: i32,
    pub max_hour: i32,
    /// 0 disables periodic callouts
    pub call_every_x_minutes: u32,
    /// Queued kilobytes that force a callout; 0 disables
    pub min_k: u32,
}

impl Default for CalloutConfig {
    fn default() -> Self {
        Self {
            node: 0,
            host: None,
            password: DEFAULT_PASSWORD.to_string(),
            auto_callout: true,
            min_hour: -1,
            max_hour: -1,
            call_every_x_minutes: 0,
            min_k: 0,
        }
    }
}

impl CalloutConfig {
    /// The session password, `-` when none is configured.
    pub fn expected_password(&self) -> &str {
        if self.password.is_empty() {
            DEFAULT_PASSWORD
        } else {
            &self.password
        }
    }

    pub fn has_hour_window(&self) -> bool {
        self.min_hour >= 0 && self.max_hour > 0 && self.min_hour != self.max_hour
    }

    /// Whether `hour` lies inside the window; a window with `min_hour > max_hour`
    /// wraps past midnight.
    pub fn hour_allowed(&self, hour: u32) -> bool {
        if !self.has_hour_window() {
            return true;
        }
        let h = hour as i32;
        if self.min_hour < self.max_hour {
            self.min_hour <= h && h < self.max_hour
        } else {
            h >= self.min_hour || h < self.max_hour
        }
    }
}

/// Password expected from (or sent to) a node without a callout record.
pub fn expected_password_for(callout: Option<&CalloutConfig>) -> String {
    callout
        .map(|c| c.expected_password().to_string())
        .unwrap_or_else(|| DEFAULT_PASSWORD.to_string())
}

/// Whole kilobytes, rounded up.
pub fn kilobytes(bytes: u64) -> u64 {
    bytes.div_ceil(1024)
}

pub fn should_call<Tz: TimeZone>(
    contact: &ContactRecord,
    config: &CalloutConfig,
    now: &DateTime<Tz>,
) -> bool {
    if !config.auto_callout {
        return false;
    }
    if !config.hour_allowed(now.hour()) {
        return false;
    }
    if contact.bytes_waiting == 0 && config.call_every_x_minutes == 0 {
        return false;
    }
    if config.call_every_x_minutes > 0 {
        let every = i64::from(config.call_every_x_minutes.max(1)) * 60;
        if now.timestamp() >= contact.last_contact + every {
            return true;
        }
    }
    if config.min_k > 0 && kilobytes(contact.bytes_waiting) >= u64::from(config.min_k) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 15, 0).unwrap()
    }

    fn waiting(bytes: u64) -> ContactRecord {
        ContactRecord { bytes_waiting: bytes, ..ContactRecord::default() }
    }

    fn min_k(k: u32) -> CalloutConfig {
        CalloutConfig { node: 2, min_k: k, ..CalloutConfig::default() }
    }

    #[test]
    fn wrapping_hour_window() {
        let config = CalloutConfig { min_hour: 20, max_hour: 2, ..min_k(1) };
        let contact = waiting(100_000);
        assert!(should_call(&contact, &config, &at_hour(23)));
        assert!(should_call(&contact, &config, &at_hour(1)));
        assert!(!should_call(&contact, &config, &at_hour(10)));
        assert!(!should_call(&contact, &config, &at_hour(2)));
        assert!(should_call(&contact, &config, &at_hour(20)));
    }

    #[test]
    fn plain_hour_window() {
        let config = CalloutConfig { min_hour: 7, max_hour: 23, ..min_k(1) };
        assert!(config.hour_allowed(7));
        assert!(config.hour_allowed(22));
        assert!(!config.hour_allowed(23));
        assert!(!config.hour_allowed(3));
    }

    #[test]
    fn unset_or_equal_window_always_allows() {
        for (lo, hi) in [(-1, -1), (0, 0), (5, 5), (3, 0), (-1, 6)] {
            let config = CalloutConfig { min_hour: lo, max_hour: hi, ..min_k(1) };
            assert!(!config.has_hour_window(), "({}, {})", lo, hi);
            for h in 0..24 {
                assert!(config.hour_allowed(h));
            }
        }
    }

    #[test]
    fn no_auto_callout_never_calls() {
        let config = CalloutConfig { auto_callout: false, call_every_x_minutes: 1, ..min_k(1) };
        for bytes in [0, 1, 100_000, u64::from(u32::MAX)] {
            for h in [0, 12, 23] {
                assert!(!should_call(&waiting(bytes), &config, &at_hour(h)));
            }
        }
    }

    #[test]
    fn min_k_trigger() {
        let contact = waiting(100_000);
        assert!(should_call(&contact, &min_k(50), &at_hour(12)));
        assert!(!should_call(&contact, &min_k(200), &at_hour(12)));
    }

    #[test]
    fn nothing_waiting_and_no_timer() {
        assert!(!should_call(&waiting(0), &min_k(1), &at_hour(12)));
        // bytes waiting but neither trigger configured
        assert!(!should_call(&waiting(5000), &min_k(0), &at_hour(12)));
    }

    #[test]
    fn periodic_timer() {
        let now = at_hour(12);
        let config = CalloutConfig { call_every_x_minutes: 60, ..CalloutConfig::default() };
        let recent = ContactRecord { last_contact: now.timestamp() - 30 * 60, ..ContactRecord::default() };
        let stale = ContactRecord { last_contact: now.timestamp() - 61 * 60, ..ContactRecord::default() };
        assert!(!should_call(&recent, &config, &now));
        assert!(should_call(&stale, &config, &now));
    }

    #[test]
    fn kilobytes_round_up() {
        assert_eq!(kilobytes(0), 0);
        assert_eq!(kilobytes(1), 1);
        assert_eq!(kilobytes(1024), 1);
        assert_eq!(kilobytes(1025), 2);
    }

    #[test]
    fn empty_password_falls_back_to_dash() {
        let config = CalloutConfig { password: String::new(), ..CalloutConfig::default() };
        assert_eq!(config.expected_password(), "-");
        assert_eq!(expected_password_for(None), "-");
        let config = CalloutConfig { password: "pw".into(), ..CalloutConfig::default() };
        assert_eq!(expected_password_for(Some(&config)), "pw");
    }
}
