use serde_json::{Value, json};

use crate::common::{Coords, Identity, Ping};
use crate::storage::{Document, NewDocument};

pub const PINGS_COLLECTION: &str = "pings";
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Shapes a new ping record. Absent message and coords are written as explicit
/// `null`; a blank message counts as absent.
pub fn ping_document(identity: &Identity, message: Option<&str>, coords: Option<Coords>) -> NewDocument {
    let message = message
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map_or(Value::Null, Value::from);
    let coords = coords.map_or(Value::Null, |c| json!({"lat": c.lat, "lng": c.lng}));

    NewDocument::new()
        .set("uid", identity.uid())
        .set("message", message)
        .set("coords", coords)
        .set_server_timestamp(CREATED_AT_FIELD)
}

/// Maps a store snapshot into pings, skipping documents that are not pings.
pub fn pings_from_snapshot(documents: Vec<Document>) -> Vec<Ping> {
    documents
        .into_iter()
        .filter_map(|document| {
            let id = document.id.clone();
            match Ping::from_document(document) {
                Ok(ping) => Some(ping),
                Err(err) => {
                    log::warn!("Skipping malformed ping {id}: {err}");
                    None
                }
            }
        })
        .collect()
}
