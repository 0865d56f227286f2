use crate::common::Ping;

use super::components::ping_card;

const HEADER: &str = "Live Ping Feed\nReal-time updates from the community";
const EMPTY: &str = "No Pings Yet\nBe the first to send a ping!";

/// Full-screen rendering of a feed snapshot.
pub fn render_feed(pings: &[Ping]) -> String {
    if pings.is_empty() {
        return format!("{HEADER}\n\n{EMPTY}");
    }
    let cards: Vec<String> = pings.iter().map(ping_card::render).collect();
    format!("{HEADER}\n\n{}", cards.join("\n\n"))
}
