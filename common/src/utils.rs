use chrono::Duration;

/// 把时长格式化为 `HH:MM:SS`，小时数不封顶，负值按0处理
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::seconds(0)), "00:00:00");
        assert_eq!(format_uptime(Duration::seconds(59)), "00:00:59");
        assert_eq!(format_uptime(Duration::seconds(3661)), "01:01:01");
        assert_eq!(format_uptime(Duration::hours(123)), "123:00:00");
        assert_eq!(format_uptime(Duration::milliseconds(1999)), "00:00:01");
    }

    #[test]
    fn test_negative_uptime_clamps() {
        assert_eq!(format_uptime(Duration::seconds(-5)), "00:00:00");
    }
}
