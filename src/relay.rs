use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::types::PlayerRecord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipients {
    All,
    AllExcept(String),
}

impl Recipients {
    pub fn includes(&self, client_id: &str) -> bool {
        match self {
            Recipients::All => true,
            Recipients::AllExcept(excluded) => excluded != client_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    NewPlayer {
        player: PlayerRecord,
    },
    PlayerMoved {
        id: String,
        x: f32,
        y: f32,
        z: f32,
    },
    Chat {
        id: String,
        text: String,
    },
    PlayerLeft {
        id: String,
    },
    CabbageCaught {
        animal_id: String,
        cabbage_id: String,
    },
    CabbageReleased {
        animal_id: String,
        cabbage_id: String,
    },
}

impl ServerEvent {
    pub fn recipients(&self) -> Recipients {
        match self {
            ServerEvent::PlayerMoved { id, .. } => Recipients::AllExcept(id.clone()),
            ServerEvent::NewPlayer { .. }
            | ServerEvent::Chat { .. }
            | ServerEvent::PlayerLeft { .. }
            | ServerEvent::CabbageCaught { .. }
            | ServerEvent::CabbageReleased { .. } => Recipients::All,
        }
    }

    pub fn to_message(&self) -> Value {
        match self {
            ServerEvent::NewPlayer { player } => json!({
                "type": "newPlayer",
                "player": player,
            }),
            ServerEvent::PlayerMoved { id, x, y, z } => json!({
                "type": "playerMoved",
                "id": id,
                "x": x,
                "y": y,
                "z": z,
            }),
            ServerEvent::Chat { id, text } => json!({
                "type": "chatMessage",
                "id": id,
                "text": text,
            }),
            ServerEvent::PlayerLeft { id } => json!({
                "type": "disconnectPlayer",
                "id": id,
            }),
            ServerEvent::CabbageCaught {
                animal_id,
                cabbage_id,
            } => json!({
                "type": "cabbageCaught",
                "animalId": animal_id,
                "cabbageId": cabbage_id,
            }),
            ServerEvent::CabbageReleased {
                animal_id,
                cabbage_id,
            } => json!({
                "type": "cabbageReleased",
                "animalId": animal_id,
                "cabbageId": cabbage_id,
            }),
        }
    }
}

pub fn welcome_message(id: &str) -> Value {
    json!({
        "type": "welcome",
        "id": id,
    })
}

pub fn current_players_message(players: &BTreeMap<String, PlayerRecord>) -> Value {
    json!({
        "type": "currentPlayers",
        "players": players,
    })
}
