//! Room command - creates rooms and sends messages from the local CLI,
//! bypassing the HTTP surface entirely (useful for bootstrapping a server
//! with no other client attached yet).

use std::path::Path;

use anyhow::{Context, Result};
use construct::Homeserver;
use construct_config::ConstructConfig;
use construct_types::{RoomId, UserId};
use serde_json::json;

fn open(path: &str) -> Result<Homeserver> {
    let project_dir = Path::new(path);
    let config = ConstructConfig::load_from_dir(project_dir).context("failed to load configuration")?;
    Homeserver::open(&config).context("failed to open homeserver")
}

pub fn create(path: &str, creator: &str) -> Result<()> {
    let hs = open(path)?;
    let creator = UserId::parse(creator).map_err(|_| anyhow::anyhow!("malformed user id '{creator}'"))?;
    let (room_id, _effects) = hs.create_room(&creator)?;
    println!("{}", room_id.as_str());
    Ok(())
}

pub fn send(path: &str, room_id: &str, sender: &str, body: &str) -> Result<()> {
    let hs = open(path)?;
    let room_id = RoomId::parse(room_id).map_err(|_| anyhow::anyhow!("malformed room id '{room_id}'"))?;
    let sender = UserId::parse(sender).map_err(|_| anyhow::anyhow!("malformed user id '{sender}'"))?;
    let (event_id, _effects) = hs.send_message(&room_id, &sender, json!({"msgtype": "m.text", "body": body}))?;
    println!("{}", event_id.as_str());
    Ok(())
}
