use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::relay::ServerEvent;
use crate::types::{ModelType, PlayerRecord};

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    JoinGame {
        name: String,
        model_type: ModelType,
    },
    PlayerMove {
        x: f32,
        y: f32,
        z: f32,
    },
    Chat {
        text: String,
    },
    CatchCabbage {
        animal_id: String,
        cabbage_id: String,
    },
    ReleaseCabbage {
        animal_id: String,
        cabbage_id: String,
    },
}

impl ClientMessage {
    pub fn to_message(&self) -> Value {
        match self {
            ClientMessage::JoinGame { name, model_type } => json!({
                "type": "joinGame",
                "name": name,
                "modelType": model_type.as_str(),
            }),
            ClientMessage::PlayerMove { x, y, z } => json!({
                "type": "playerMove",
                "x": x,
                "y": y,
                "z": z,
            }),
            ClientMessage::Chat { text } => json!({
                "type": "chatMessage",
                "text": text,
            }),
            ClientMessage::CatchCabbage {
                animal_id,
                cabbage_id,
            } => json!({
                "type": "catchCabbage",
                "animalId": animal_id,
                "cabbageId": cabbage_id,
            }),
            ClientMessage::ReleaseCabbage {
                animal_id,
                cabbage_id,
            } => json!({
                "type": "releaseCabbage",
                "animalId": animal_id,
                "cabbageId": cabbage_id,
            }),
        }
    }
}

pub fn parse_client_message(raw: &str) -> Option<ClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "joinGame" => {
            let name = object.get("name")?.as_str()?.to_string();
            let model_type = ModelType::parse(object.get("modelType")?.as_str()?)?;
            Some(ClientMessage::JoinGame { name, model_type })
        }
        "playerMove" => {
            let x = parse_finite_f32(object.get("x"))?;
            let y = parse_finite_f32(object.get("y"))?;
            let z = parse_finite_f32(object.get("z"))?;
            Some(ClientMessage::PlayerMove { x, y, z })
        }
        "chatMessage" => {
            let text = object.get("text")?.as_str()?.to_string();
            Some(ClientMessage::Chat { text })
        }
        "catchCabbage" => {
            let animal_id = object.get("animalId")?.as_str()?.to_string();
            let cabbage_id = object.get("cabbageId")?.as_str()?.to_string();
            Some(ClientMessage::CatchCabbage {
                animal_id,
                cabbage_id,
            })
        }
        "releaseCabbage" => {
            let animal_id = object.get("animalId")?.as_str()?.to_string();
            let cabbage_id = object.get("cabbageId")?.as_str()?.to_string();
            Some(ClientMessage::ReleaseCabbage {
                animal_id,
                cabbage_id,
            })
        }
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    Welcome { id: String },
    CurrentPlayers { players: BTreeMap<String, PlayerRecord> },
    Event(ServerEvent),
}

pub fn parse_server_message(raw: &str) -> Option<ServerMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "welcome" => {
            let id = object.get("id")?.as_str()?.to_string();
            Some(ServerMessage::Welcome { id })
        }
        "currentPlayers" => {
            let raw_players = object.get("players")?.as_object()?;
            let mut players = BTreeMap::new();
            for (id, entry) in raw_players {
                let record: PlayerRecord = serde_json::from_value(entry.clone()).ok()?;
                players.insert(id.clone(), record);
            }
            Some(ServerMessage::CurrentPlayers { players })
        }
        "newPlayer" => {
            let player: PlayerRecord =
                serde_json::from_value(object.get("player")?.clone()).ok()?;
            Some(ServerMessage::Event(ServerEvent::NewPlayer { player }))
        }
        "playerMoved" => {
            let id = object.get("id")?.as_str()?.to_string();
            let x = parse_finite_f32(object.get("x"))?;
            let y = parse_finite_f32(object.get("y"))?;
            let z = parse_finite_f32(object.get("z"))?;
            Some(ServerMessage::Event(ServerEvent::PlayerMoved { id, x, y, z }))
        }
        "chatMessage" => {
            let id = object.get("id")?.as_str()?.to_string();
            let text = object.get("text")?.as_str()?.to_string();
            Some(ServerMessage::Event(ServerEvent::Chat { id, text }))
        }
        "disconnectPlayer" => {
            let id = object.get("id")?.as_str()?.to_string();
            Some(ServerMessage::Event(ServerEvent::PlayerLeft { id }))
        }
        "cabbageCaught" => {
            let animal_id = object.get("animalId")?.as_str()?.to_string();
            let cabbage_id = object.get("cabbageId")?.as_str()?.to_string();
            Some(ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id,
                cabbage_id,
            }))
        }
        "cabbageReleased" => {
            let animal_id = object.get("animalId")?.as_str()?.to_string();
            let cabbage_id = object.get("cabbageId")?.as_str()?.to_string();
            Some(ServerMessage::Event(ServerEvent::CabbageReleased {
                animal_id,
                cabbage_id,
            }))
        }
        _ => None,
    }
}

fn parse_finite_f32(value: Option<&Value>) -> Option<f32> {
    let number = value?.as_f64()?;
    if !number.is_finite() {
        return None;
    }
    Some(number as f32)
}
