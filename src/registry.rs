use std::collections::{BTreeMap, HashMap};

use crate::constants::SPAWN_SPREAD;
use crate::rng::Rng;
use crate::server_utils::sanitize_name;
use crate::types::{ModelType, PlayerRecord};

#[derive(Clone, Debug)]
struct PlayerEntry {
    record: PlayerRecord,
    // armed while the player is a caught cabbage; a stale timer whose token
    // no longer matches must not release a later catch
    catch_token: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchGrant {
    pub animal_id: String,
    pub cabbage_id: String,
    pub token: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub animal_id: String,
    pub cabbage_id: String,
}

#[derive(Clone, Debug)]
pub struct Departure {
    pub id: String,
    pub was_joined: bool,
    pub forced_release: Option<Release>,
}

pub struct SessionRegistry {
    players: HashMap<String, PlayerEntry>,
    rng: Rng,
    next_catch_token: u64,
}

impl SessionRegistry {
    pub fn new(seed: u32) -> Self {
        Self {
            players: HashMap::new(),
            rng: Rng::new(seed),
            next_catch_token: 1,
        }
    }

    pub fn connect(&mut self, id: &str) -> PlayerRecord {
        let color = self.rng.color();
        let entry = self
            .players
            .entry(id.to_string())
            .or_insert_with(|| PlayerEntry {
                record: PlayerRecord::placeholder(id, color),
                catch_token: None,
            });
        entry.record.clone()
    }

    pub fn join(&mut self, id: &str, name: &str, model_type: ModelType) -> Option<PlayerRecord> {
        let (spawn_x, spawn_z) = self.rng.spawn_offset(SPAWN_SPREAD);
        let entry = self.players.get_mut(id)?;
        if entry.record.is_joined {
            return None;
        }
        entry.record.name = sanitize_name(name);
        entry.record.model_type = Some(model_type);
        entry.record.x = spawn_x;
        entry.record.y = 0.0;
        entry.record.z = spawn_z;
        entry.record.is_joined = true;
        Some(entry.record.clone())
    }

    pub fn apply_move(&mut self, id: &str, x: f32, y: f32, z: f32) -> bool {
        let Some(entry) = self.players.get_mut(id) else {
            return false;
        };
        if !entry.record.is_joined || entry.record.is_caught {
            return false;
        }
        entry.record.x = x;
        entry.record.y = y;
        entry.record.z = z;
        true
    }

    pub fn begin_catch(&mut self, animal_id: &str, cabbage_id: &str) -> Option<CatchGrant> {
        if animal_id == cabbage_id {
            return None;
        }
        {
            let animal = self.players.get(animal_id)?;
            if !animal.record.is_joined
                || animal.record.is_eating
                || !animal.record.model_type.is_some_and(|kind| kind.is_animal())
            {
                return None;
            }
            let cabbage = self.players.get(cabbage_id)?;
            if !cabbage.record.is_joined
                || cabbage.record.is_caught
                || cabbage.record.model_type != Some(ModelType::Cabbage)
            {
                return None;
            }
        }

        let token = self.next_catch_token;
        self.next_catch_token += 1;

        if let Some(cabbage) = self.players.get_mut(cabbage_id) {
            cabbage.record.is_caught = true;
            cabbage.record.caught_by = Some(animal_id.to_string());
            cabbage.catch_token = Some(token);
        }
        if let Some(animal) = self.players.get_mut(animal_id) {
            animal.record.is_eating = true;
            animal.record.eating_target = Some(cabbage_id.to_string());
        }

        Some(CatchGrant {
            animal_id: animal_id.to_string(),
            cabbage_id: cabbage_id.to_string(),
            token,
        })
    }

    pub fn release_by_request(&mut self, animal_id: &str, cabbage_id: &str) -> Option<Release> {
        let cabbage = self.players.get(cabbage_id)?;
        if !cabbage.record.is_caught || cabbage.record.caught_by.as_deref() != Some(animal_id) {
            return None;
        }
        self.clear_pairing(animal_id, cabbage_id);
        Some(Release {
            animal_id: animal_id.to_string(),
            cabbage_id: cabbage_id.to_string(),
        })
    }

    pub fn release_by_timeout(&mut self, cabbage_id: &str, token: u64) -> Option<Release> {
        let cabbage = self.players.get(cabbage_id)?;
        if !cabbage.record.is_caught || cabbage.catch_token != Some(token) {
            return None;
        }
        let animal_id = cabbage.record.caught_by.clone()?;
        self.clear_pairing(&animal_id, cabbage_id);
        Some(Release {
            animal_id,
            cabbage_id: cabbage_id.to_string(),
        })
    }

    pub fn disconnect(&mut self, id: &str) -> Option<Departure> {
        let entry = self.players.remove(id)?;
        let mut forced_release = None;

        if entry.record.is_caught {
            if let Some(holder_id) = entry.record.caught_by {
                if let Some(holder) = self.players.get_mut(&holder_id) {
                    if holder.record.eating_target.as_deref() == Some(id) {
                        holder.record.is_eating = false;
                        holder.record.eating_target = None;
                    }
                }
                forced_release = Some(Release {
                    animal_id: holder_id,
                    cabbage_id: id.to_string(),
                });
            }
        } else if entry.record.is_eating {
            if let Some(target_id) = entry.record.eating_target {
                if let Some(target) = self.players.get_mut(&target_id) {
                    if target.record.caught_by.as_deref() == Some(id) {
                        target.record.is_caught = false;
                        target.record.caught_by = None;
                        target.catch_token = None;
                    }
                }
                forced_release = Some(Release {
                    animal_id: id.to_string(),
                    cabbage_id: target_id,
                });
            }
        }

        Some(Departure {
            id: id.to_string(),
            was_joined: entry.record.is_joined,
            forced_release,
        })
    }

    fn clear_pairing(&mut self, animal_id: &str, cabbage_id: &str) {
        if let Some(cabbage) = self.players.get_mut(cabbage_id) {
            cabbage.record.is_caught = false;
            cabbage.record.caught_by = None;
            cabbage.catch_token = None;
        }
        if let Some(animal) = self.players.get_mut(animal_id) {
            if animal.record.eating_target.as_deref() == Some(cabbage_id) {
                animal.record.is_eating = false;
                animal.record.eating_target = None;
            }
        }
    }

    pub fn joined_players(&self) -> BTreeMap<String, PlayerRecord> {
        self.players
            .values()
            .filter(|entry| entry.record.is_joined)
            .map(|entry| (entry.record.id.clone(), entry.record.clone()))
            .collect()
    }

    pub fn is_joined(&self, id: &str) -> bool {
        self.players
            .get(id)
            .map(|entry| entry.record.is_joined)
            .unwrap_or(false)
    }

    pub fn record(&self, id: &str) -> Option<&PlayerRecord> {
        self.players.get(id).map(|entry| &entry.record)
    }

    pub fn records(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values().map(|entry| &entry.record)
    }

    pub fn connected_count(&self) -> usize {
        self.players.len()
    }
}
