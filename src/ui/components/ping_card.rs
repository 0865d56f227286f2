use chrono::Local;

use crate::common::{Coords, Ping};

const UID_PREFIX_CHARS: usize = 8;

pub fn format_coords(coords: Option<&Coords>) -> String {
    match coords {
        Some(coords) => format!("{:.4}, {:.4}", coords.lat, coords.lng),
        None => "No location".to_string(),
    }
}

pub fn short_uid(uid: &str) -> String {
    let prefix: String = uid.chars().take(UID_PREFIX_CHARS).collect();
    format!("{prefix}...")
}

/// One feed entry as a block of text lines.
pub fn render(ping: &Ping) -> String {
    let mut lines = vec![
        ping.created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    ];
    if let Some(message) = &ping.message {
        lines.push(format!("  {message}"));
    }
    lines.push(format!("  Location: {}", format_coords(ping.coords.as_ref())));
    lines.push(format!("  User ID: {}", short_uid(&ping.uid)));
    lines.join("\n")
}
