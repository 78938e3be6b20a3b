//! Formatting for `store list`.

use chrono::{DateTime, Utc};
use comfy_table::{presets, Table};

/// Borderless table with `headers`.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING).set_header(headers);
    table
}

/// Size in binary units, one decimal above a kilobyte.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Age of a download time, coarsened to minutes, hours or days.
pub fn age(time: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*time).num_seconds();
    let (count, unit) = match secs {
        i64::MIN..=59 => return "just now".to_string(),
        60..=3_599 => (secs / 60, "minute"),
        3_600..=86_399 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} ago")
}

/// `name:version` as shown in store listings.
pub fn image_label(name: &str, version: &str) -> String {
    format!("{name}:{version}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(human_size(3 << 40), "3.0 TB");
    }

    #[test]
    fn test_age() {
        let now = Utc::now();
        assert_eq!(age(&(now - Duration::seconds(10))), "just now");
        assert_eq!(age(&(now + Duration::hours(1))), "just now");
        assert_eq!(age(&(now - Duration::seconds(90))), "1 minute ago");
        assert_eq!(age(&(now - Duration::hours(5))), "5 hours ago");
        assert_eq!(age(&(now - Duration::days(400))), "400 days ago");
    }

    #[test]
    fn test_table_has_no_borders() {
        let mut rendered = table(&["NAME", "KEY"]);
        rendered.add_row(["example.com/app:1.0", "sha512-0123456789ab"]);
        let text = rendered.to_string();
        assert!(text.contains("example.com/app:1.0"));
        assert!(!text.contains('|'));
    }
}
