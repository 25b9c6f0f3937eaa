// Active-hours gate

use crate::config::ScheduleConfig;

/// Whether `hour` falls inside [start, end), wrapping past midnight when start > end.
pub fn is_active(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleGate {
    config: ScheduleConfig,
}

impl ScheduleGate {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    /// Always true when the schedule is disabled
    pub fn allows(&self, hour: u32) -> bool {
        !self.config.schedule_enabled || is_active(hour, self.config.start_hour, self.config.end_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overnight_window() {
        assert!(is_active(23, 22, 6));
        assert!(!is_active(10, 22, 6));
        assert!(is_active(3, 22, 6));
        assert!(is_active(22, 22, 6));
        assert!(!is_active(6, 22, 6));
    }

    #[test]
    fn test_daytime_window() {
        assert!(is_active(9, 9, 17));
        assert!(is_active(16, 9, 17));
        assert!(!is_active(17, 9, 17));
        assert!(!is_active(8, 9, 17));
    }

    #[test]
    fn test_equal_bounds_is_empty_window() {
        for hour in 0..24 {
            assert!(!is_active(hour, 5, 5));
        }
    }

    #[test]
    fn test_disabled_schedule_always_allows() {
        let gate = ScheduleGate::new(ScheduleConfig {
            schedule_enabled: false,
            start_hour: 22,
            end_hour: 6,
        });
        for hour in 0..24 {
            assert!(gate.allows(hour));
        }
    }

    #[test]
    fn test_enabled_schedule_gates() {
        let gate = ScheduleGate::new(ScheduleConfig {
            schedule_enabled: true,
            start_hour: 22,
            end_hour: 6,
        });
        assert!(gate.allows(23));
        assert!(!gate.allows(12));
    }
}
