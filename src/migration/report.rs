// ABOUTME: Human-readable formatting for migration progress output
// ABOUTME: Renders byte counts and elapsed times in log lines and the CLI summary

use std::time::Duration;

/// Format bytes into human-readable string
///
/// Converts byte count into appropriate units (B, KB, MB, GB, TB)
/// with one decimal place of precision.
///
/// # Examples
///
/// ```
/// # use bqshift::migration::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_idx])
}

/// Format an elapsed duration
///
/// ```
/// # use std::time::Duration;
/// # use bqshift::migration::format_duration;
/// assert_eq!(format_duration(Duration::from_secs(45)), "45 seconds");
/// assert_eq!(format_duration(Duration::from_secs(120)), "2.0 minutes");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{} seconds", secs)
    } else if secs < 3600 {
        format!("{:.1} minutes", secs as f64 / 60.0)
    } else {
        format!("{:.1} hours", secs as f64 / 3600.0)
    }
}
