use std::collections::BTreeMap;
use std::f32::consts::PI;

use crate::constants::{
    CATCH_CONFIRM_GRACE_MS, CATCH_DURATION_MS, CATCH_RADIUS, FOLLOW_OFFSET, GROUND_CLEARANCE,
    MOVE_SPEED, PLAYER_RADIUS, WORLD_BOUND,
};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::relay::ServerEvent;
use crate::types::{ModelType, PlayerRecord, Vec3};

pub trait Terrain {
    fn height_at(&self, x: f32, z: f32) -> f32;
}

pub struct FlatTerrain;

impl Terrain for FlatTerrain {
    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        0.0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MoveInput {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
}

impl MoveInput {
    pub fn idle() -> Self {
        Self::default()
    }

    fn step(&self, speed: f32) -> (f32, f32) {
        let mut dx = 0.0;
        let mut dz = 0.0;
        if self.forward {
            dz -= speed;
        }
        if self.back {
            dz += speed;
        }
        if self.left {
            dx -= speed;
        }
        if self.right {
            dx += speed;
        }
        (dx, dz)
    }
}

#[derive(Clone, Debug)]
pub struct RemotePlayer {
    pub id: String,
    pub name: String,
    pub model_type: Option<ModelType>,
    pub position: Vec3,
    pub rotation_y: f32,
    pub is_caught: bool,
    pub caught_by: Option<String>,
    pub is_eating: bool,
    pub eating_target: Option<String>,
}

impl RemotePlayer {
    fn from_record(record: &PlayerRecord, terrain: &dyn Terrain) -> Self {
        let y = record
            .y
            .max(terrain.height_at(record.x, record.z) + GROUND_CLEARANCE);
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            model_type: record.model_type,
            position: Vec3::new(record.x, y, record.z),
            rotation_y: 0.0,
            is_caught: record.is_caught,
            caught_by: record.caught_by.clone(),
            is_eating: record.is_eating,
            eating_target: record.eating_target.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CatchState {
    Free,
    Caught { by: String, remaining_ms: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum EatState {
    Idle,
    Eating {
        target: String,
        remaining_ms: u64,
        confirmed: bool,
        grace_ms: u64,
    },
}

#[derive(Clone, Debug)]
pub struct LocalAvatar {
    pub name: String,
    pub model_type: ModelType,
    pub position: Vec3,
    pub rotation_y: f32,
    pub catch_state: CatchState,
    pub eat_state: EatState,
}

pub struct SyncClient {
    session_id: Option<String>,
    local: Option<LocalAvatar>,
    remotes: BTreeMap<String, RemotePlayer>,
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            session_id: None,
            local: None,
            remotes: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn local(&self) -> Option<&LocalAvatar> {
        self.local.as_ref()
    }

    pub fn remote(&self, id: &str) -> Option<&RemotePlayer> {
        self.remotes.get(id)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remotes.values()
    }

    pub fn join(&mut self, name: &str, model_type: ModelType) -> ClientMessage {
        self.local = Some(LocalAvatar {
            name: name.to_string(),
            model_type,
            position: Vec3::zero(),
            rotation_y: 0.0,
            catch_state: CatchState::Free,
            eat_state: EatState::Idle,
        });
        ClientMessage::JoinGame {
            name: name.to_string(),
            model_type,
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage, terrain: &dyn Terrain) {
        match message {
            ServerMessage::Welcome { id } => {
                self.session_id = Some(id);
            }
            ServerMessage::CurrentPlayers { players } => {
                for (id, record) in &players {
                    if Some(id.as_str()) == self.session_id.as_deref() {
                        continue;
                    }
                    self.remotes
                        .insert(id.clone(), RemotePlayer::from_record(record, terrain));
                }
            }
            ServerMessage::Event(event) => self.apply_event(event, terrain),
        }
    }

    fn apply_event(&mut self, event: ServerEvent, terrain: &dyn Terrain) {
        match event {
            ServerEvent::NewPlayer { player } => {
                if Some(player.id.as_str()) == self.session_id.as_deref() {
                    // adopt the server-assigned spawn
                    if let Some(local) = self.local.as_mut() {
                        let y = player
                            .y
                            .max(terrain.height_at(player.x, player.z) + GROUND_CLEARANCE);
                        local.position = Vec3::new(player.x, y, player.z);
                    }
                } else {
                    self.remotes.insert(
                        player.id.clone(),
                        RemotePlayer::from_record(&player, terrain),
                    );
                }
            }
            ServerEvent::PlayerMoved { id, x, y, z } => {
                if let Some(remote) = self.remotes.get_mut(&id) {
                    if remote.is_caught {
                        return;
                    }
                    let dx = x - remote.position.x;
                    let dz = z - remote.position.z;
                    if dx.abs() > 0.01 || dz.abs() > 0.01 {
                        remote.rotation_y = turn_toward(remote.rotation_y, dx.atan2(dz), 0.3);
                    }
                    let ground = terrain.height_at(x, z) + GROUND_CLEARANCE;
                    remote.position = Vec3::new(x, y.max(ground), z);
                }
            }
            ServerEvent::Chat { .. } => {
                // presentation only; the chat surface consumes the raw event
            }
            ServerEvent::PlayerLeft { id } => {
                self.remotes.remove(&id);
                if let Some(local) = self.local.as_mut() {
                    if matches!(&local.catch_state, CatchState::Caught { by, .. } if *by == id) {
                        local.catch_state = CatchState::Free;
                    }
                    if matches!(&local.eat_state, EatState::Eating { target, .. } if *target == id)
                    {
                        local.eat_state = EatState::Idle;
                    }
                }
            }
            ServerEvent::CabbageCaught {
                animal_id,
                cabbage_id,
            } => self.apply_catch(&animal_id, &cabbage_id),
            ServerEvent::CabbageReleased {
                animal_id,
                cabbage_id,
            } => self.apply_release(&animal_id, &cabbage_id),
        }
    }

    fn apply_catch(&mut self, animal_id: &str, cabbage_id: &str) {
        let me = self.session_id.clone();
        if let Some(local) = self.local.as_mut() {
            if me.as_deref() == Some(cabbage_id) {
                local.catch_state = CatchState::Caught {
                    by: animal_id.to_string(),
                    remaining_ms: CATCH_DURATION_MS,
                };
            }
            if me.as_deref() == Some(animal_id) {
                match &mut local.eat_state {
                    // the echo for the optimistic transition: confirm in place
                    EatState::Eating {
                        target, confirmed, ..
                    } if target.as_str() == cabbage_id => {
                        *confirmed = true;
                    }
                    _ => {
                        local.eat_state = EatState::Eating {
                            target: cabbage_id.to_string(),
                            remaining_ms: CATCH_DURATION_MS,
                            confirmed: true,
                            grace_ms: 0,
                        };
                    }
                }
            }
        }
        if let Some(cabbage) = self.remotes.get_mut(cabbage_id) {
            cabbage.is_caught = true;
            cabbage.caught_by = Some(animal_id.to_string());
        }
        if let Some(animal) = self.remotes.get_mut(animal_id) {
            animal.is_eating = true;
            animal.eating_target = Some(cabbage_id.to_string());
        }
    }

    fn apply_release(&mut self, animal_id: &str, cabbage_id: &str) {
        let me = self.session_id.clone();
        if let Some(local) = self.local.as_mut() {
            if me.as_deref() == Some(cabbage_id) {
                local.catch_state = CatchState::Free;
            }
            if me.as_deref() == Some(animal_id)
                && matches!(&local.eat_state, EatState::Eating { target, .. } if target.as_str() == cabbage_id)
            {
                local.eat_state = EatState::Idle;
            }
        }
        if let Some(cabbage) = self.remotes.get_mut(cabbage_id) {
            cabbage.is_caught = false;
            cabbage.caught_by = None;
        }
        if let Some(animal) = self.remotes.get_mut(animal_id) {
            if animal.eating_target.as_deref() == Some(cabbage_id) {
                animal.is_eating = false;
                animal.eating_target = None;
            }
        }
    }

    pub fn tick(
        &mut self,
        dt_ms: u64,
        input: MoveInput,
        terrain: &dyn Terrain,
    ) -> Vec<ClientMessage> {
        let mut outbound = Vec::new();
        let Some(my_id) = self.session_id.clone() else {
            return outbound;
        };
        if self.local.is_none() {
            return outbound;
        }

        self.tick_countdowns(dt_ms, &my_id, &mut outbound);
        self.tick_movement(input, terrain, &mut outbound);
        self.tick_catch_detection(&my_id, &mut outbound);
        self.update_followers();
        outbound
    }

    fn tick_countdowns(&mut self, dt_ms: u64, my_id: &str, outbound: &mut Vec<ClientMessage>) {
        let Some(local) = self.local.as_mut() else {
            return;
        };
        if let CatchState::Caught { remaining_ms, .. } = &mut local.catch_state {
            // freed by the countdown or by the release broadcast, whichever first
            *remaining_ms = remaining_ms.saturating_sub(dt_ms);
            if *remaining_ms == 0 {
                local.catch_state = CatchState::Free;
            }
        }
        match &mut local.eat_state {
            EatState::Eating {
                confirmed: false,
                grace_ms,
                ..
            } => {
                // no echo: the server silently rejected the catch
                *grace_ms = grace_ms.saturating_sub(dt_ms);
                if *grace_ms == 0 {
                    local.eat_state = EatState::Idle;
                }
            }
            EatState::Eating {
                confirmed: true,
                remaining_ms,
                target,
                ..
            } => {
                *remaining_ms = remaining_ms.saturating_sub(dt_ms);
                if *remaining_ms == 0 {
                    let cabbage_id = target.clone();
                    local.eat_state = EatState::Idle;
                    outbound.push(ClientMessage::ReleaseCabbage {
                        animal_id: my_id.to_string(),
                        cabbage_id,
                    });
                }
            }
            EatState::Idle => {}
        }
    }

    fn tick_movement(
        &mut self,
        input: MoveInput,
        terrain: &dyn Terrain,
        outbound: &mut Vec<ClientMessage>,
    ) {
        let Some(local) = self.local.as_mut() else {
            return;
        };
        match local.catch_state.clone() {
            CatchState::Caught { by, .. } => {
                // carried by the holder; input is ignored and nothing is sent
                if let Some(holder) = self.remotes.get(&by) {
                    let (position, rotation) =
                        follow_position(holder.position, holder.rotation_y);
                    local.position = position;
                    local.rotation_y = rotation;
                }
            }
            CatchState::Free => {
                let (dx, dz) = input.step(MOVE_SPEED);
                if dx == 0.0 && dz == 0.0 {
                    return;
                }
                let mut next_x = (local.position.x + dx).clamp(-WORLD_BOUND, WORLD_BOUND);
                let mut next_z = (local.position.z + dz).clamp(-WORLD_BOUND, WORLD_BOUND);

                let is_animal = local.model_type.is_animal();
                let eating_target = match &local.eat_state {
                    EatState::Eating { target, .. } => Some(target.clone()),
                    EatState::Idle => None,
                };
                for remote in self.remotes.values() {
                    let next = Vec3::new(next_x, local.position.y, next_z);
                    if next.distance_xz(&remote.position) >= PLAYER_RADIUS * 2.0 {
                        continue;
                    }
                    // an animal walking onto a free cabbage bites instead of shoving,
                    // and a holder never shoves the cabbage it carries
                    let overlap_starts_catch = is_animal
                        && remote.model_type == Some(ModelType::Cabbage)
                        && !remote.is_caught
                        && eating_target.is_none();
                    let overlap_is_carry = eating_target.as_deref() == Some(remote.id.as_str());
                    if overlap_starts_catch || overlap_is_carry {
                        continue;
                    }
                    let (push_x, push_z) = push_apart(&next, &remote.position);
                    next_x += push_x;
                    next_z += push_z;
                }

                local.position.x = next_x;
                local.position.z = next_z;
                local.position.y = terrain.height_at(next_x, next_z) + GROUND_CLEARANCE;
                local.rotation_y = turn_toward(local.rotation_y, dx.atan2(dz), 0.2);
                outbound.push(ClientMessage::PlayerMove {
                    x: local.position.x,
                    y: local.position.y,
                    z: local.position.z,
                });
            }
        }
    }

    fn tick_catch_detection(&mut self, my_id: &str, outbound: &mut Vec<ClientMessage>) {
        let Some(local) = self.local.as_mut() else {
            return;
        };
        if !local.model_type.is_animal()
            || local.eat_state != EatState::Idle
            || !matches!(local.catch_state, CatchState::Free)
        {
            return;
        }
        let mut nearest: Option<(f32, String)> = None;
        for remote in self.remotes.values() {
            if remote.model_type != Some(ModelType::Cabbage) || remote.is_caught {
                continue;
            }
            let gap = local.position.distance_xz(&remote.position);
            if gap >= CATCH_RADIUS {
                continue;
            }
            if nearest.as_ref().map(|(best, _)| gap < *best).unwrap_or(true) {
                nearest = Some((gap, remote.id.clone()));
            }
        }
        if let Some((_, cabbage_id)) = nearest {
            local.eat_state = EatState::Eating {
                target: cabbage_id.clone(),
                remaining_ms: CATCH_DURATION_MS,
                confirmed: false,
                grace_ms: CATCH_CONFIRM_GRACE_MS,
            };
            outbound.push(ClientMessage::CatchCabbage {
                animal_id: my_id.to_string(),
                cabbage_id,
            });
        }
    }

    fn update_followers(&mut self) {
        let mut updates = Vec::new();
        for remote in self.remotes.values() {
            if !remote.is_caught {
                continue;
            }
            let Some(holder_id) = remote.caught_by.as_deref() else {
                continue;
            };
            let holder_transform = if Some(holder_id) == self.session_id.as_deref() {
                self.local
                    .as_ref()
                    .map(|local| (local.position, local.rotation_y))
            } else {
                self.remotes
                    .get(holder_id)
                    .map(|holder| (holder.position, holder.rotation_y))
            };
            if let Some((position, rotation)) = holder_transform {
                let (next_position, next_rotation) = follow_position(position, rotation);
                updates.push((remote.id.clone(), next_position, next_rotation));
            }
        }
        for (id, position, rotation) in updates {
            if let Some(remote) = self.remotes.get_mut(&id) {
                remote.position = position;
                remote.rotation_y = rotation;
            }
        }
    }
}

pub fn follow_position(holder_position: Vec3, holder_rotation: f32) -> (Vec3, f32) {
    let x = holder_position.x + holder_rotation.sin() * FOLLOW_OFFSET;
    let z = holder_position.z + holder_rotation.cos() * FOLLOW_OFFSET;
    let rotation = (holder_position.x - x).atan2(holder_position.z - z);
    (Vec3::new(x, holder_position.y, z), rotation)
}

fn turn_toward(current: f32, target: f32, factor: f32) -> f32 {
    let mut diff = target - current;
    if diff > PI {
        diff -= 2.0 * PI;
    }
    if diff < -PI {
        diff += 2.0 * PI;
    }
    current + diff * factor
}

fn push_apart(position: &Vec3, other: &Vec3) -> (f32, f32) {
    let dx = position.x - other.x;
    let dz = position.z - other.z;
    let distance = (dx * dx + dz * dz).sqrt();
    if distance < PLAYER_RADIUS * 2.0 && distance > 0.0 {
        let push = (PLAYER_RADIUS * 2.0 - distance) * 0.5;
        let angle = dz.atan2(dx);
        (angle.cos() * push, angle.sin() * push)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SIM_TICK_MS;

    fn joined_record(id: &str, kind: ModelType, x: f32, z: f32) -> PlayerRecord {
        let mut record = PlayerRecord::placeholder(id, 0xABCDEF);
        record.name = format!("name-{id}");
        record.model_type = Some(kind);
        record.is_joined = true;
        record.x = x;
        record.z = z;
        record
    }

    fn client_with_id(id: &str, kind: ModelType) -> SyncClient {
        let mut client = SyncClient::new();
        client.handle_message(
            ServerMessage::Welcome { id: id.to_string() },
            &FlatTerrain,
        );
        client.join(&format!("name-{id}"), kind);
        client
    }

    fn add_remote(client: &mut SyncClient, id: &str, kind: ModelType, x: f32, z: f32) {
        client.handle_message(
            ServerMessage::Event(ServerEvent::NewPlayer {
                player: joined_record(id, kind, x, z),
            }),
            &FlatTerrain,
        );
    }

    fn walk_forward() -> MoveInput {
        MoveInput {
            forward: true,
            ..MoveInput::default()
        }
    }

    #[test]
    fn welcome_sets_the_session_id() {
        let mut client = SyncClient::new();
        client.handle_message(
            ServerMessage::Welcome {
                id: "player_1".to_string(),
            },
            &FlatTerrain,
        );
        assert_eq!(client.session_id(), Some("player_1"));
    }

    #[test]
    fn current_players_seeds_the_mirror_without_self() {
        let mut client = client_with_id("me", ModelType::Dog);
        let mut players = std::collections::BTreeMap::new();
        players.insert("me".to_string(), joined_record("me", ModelType::Dog, 0.0, 0.0));
        players.insert(
            "other".to_string(),
            joined_record("other", ModelType::Pig, 2.0, 3.0),
        );
        client.handle_message(ServerMessage::CurrentPlayers { players }, &FlatTerrain);

        assert!(client.remote("me").is_none());
        let other = client.remote("other").expect("other should be mirrored");
        assert_eq!(other.model_type, Some(ModelType::Pig));
        assert_eq!(other.position.x, 2.0);
        assert_eq!(other.position.y, GROUND_CLEARANCE);
    }

    #[test]
    fn own_new_player_echo_adopts_the_assigned_spawn() {
        let mut client = client_with_id("me", ModelType::Pig);
        client.handle_message(
            ServerMessage::Event(ServerEvent::NewPlayer {
                player: joined_record("me", ModelType::Pig, 1.5, -2.0),
            }),
            &FlatTerrain,
        );
        assert!(client.remote("me").is_none());
        let local = client.local().expect("local avatar exists");
        assert_eq!(local.position.x, 1.5);
        assert_eq!(local.position.z, -2.0);
    }

    #[test]
    fn moves_for_a_caught_player_are_dropped() {
        let mut client = client_with_id("me", ModelType::Pig);
        add_remote(&mut client, "a", ModelType::Dog, 10.0, 10.0);
        add_remote(&mut client, "c", ModelType::Cabbage, 0.0, 5.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "c".to_string(),
            }),
            &FlatTerrain,
        );
        let before = client.remote("c").expect("c mirrored").position;
        client.handle_message(
            ServerMessage::Event(ServerEvent::PlayerMoved {
                id: "c".to_string(),
                x: 20.0,
                y: 0.5,
                z: 20.0,
            }),
            &FlatTerrain,
        );
        assert_eq!(client.remote("c").expect("c mirrored").position, before);
    }

    #[test]
    fn proximity_to_a_free_cabbage_starts_an_optimistic_catch() {
        let mut client = client_with_id("me", ModelType::Dog);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        let outbound = client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        assert_eq!(
            outbound,
            vec![ClientMessage::CatchCabbage {
                animal_id: "me".to_string(),
                cabbage_id: "c".to_string(),
            }]
        );
        match &client.local().expect("local exists").eat_state {
            EatState::Eating {
                target, confirmed, ..
            } => {
                assert_eq!(target, "c");
                assert!(!confirmed);
            }
            other => panic!("expected optimistic eating state, got {other:?}"),
        }
    }

    #[test]
    fn an_already_held_cabbage_is_not_caught_again() {
        let mut client = client_with_id("me", ModelType::Dog);
        add_remote(&mut client, "a", ModelType::Cat, 10.0, 10.0);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "c".to_string(),
            }),
            &FlatTerrain,
        );
        let outbound = client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        assert!(outbound.is_empty());
        assert_eq!(client.local().expect("local").eat_state, EatState::Idle);
    }

    #[test]
    fn a_cabbage_never_initiates_a_catch() {
        let mut client = client_with_id("me", ModelType::Cabbage);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        let outbound = client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        assert!(outbound.is_empty());
    }

    #[test]
    fn unconfirmed_catch_rolls_back_after_the_grace_window() {
        let mut client = client_with_id("me", ModelType::Dog);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        let first = client.tick(
            SIM_TICK_MS,
            MoveInput {
                back: true,
                ..MoveInput::default()
            },
            &FlatTerrain,
        );
        assert!(first
            .iter()
            .any(|message| matches!(message, ClientMessage::CatchCabbage { .. })));

        // walk away while the echo never arrives
        let mut ticks = 0;
        while ticks * SIM_TICK_MS < CATCH_CONFIRM_GRACE_MS + 10 * SIM_TICK_MS {
            let outbound = client.tick(
                SIM_TICK_MS,
                MoveInput {
                    back: true,
                    ..MoveInput::default()
                },
                &FlatTerrain,
            );
            assert!(!outbound
                .iter()
                .any(|message| matches!(message, ClientMessage::ReleaseCabbage { .. })));
            ticks += 1;
        }
        assert_eq!(client.local().expect("local").eat_state, EatState::Idle);
    }

    #[test]
    fn confirmed_catch_counts_down_and_emits_release() {
        let mut client = client_with_id("me", ModelType::Dog);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "me".to_string(),
                cabbage_id: "c".to_string(),
            }),
            &FlatTerrain,
        );

        let mut released = Vec::new();
        let mut elapsed = 0;
        while elapsed < CATCH_DURATION_MS + SIM_TICK_MS {
            released.extend(client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain));
            elapsed += SIM_TICK_MS;
        }
        assert_eq!(
            released
                .iter()
                .filter(|message| matches!(message, ClientMessage::ReleaseCabbage { .. }))
                .count(),
            1
        );
        assert_eq!(client.local().expect("local").eat_state, EatState::Idle);
    }

    #[test]
    fn caught_avatar_ignores_input_and_follows_the_holder() {
        let mut client = client_with_id("me", ModelType::Cabbage);
        add_remote(&mut client, "a", ModelType::Dog, 3.0, 4.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "me".to_string(),
            }),
            &FlatTerrain,
        );

        let outbound = client.tick(SIM_TICK_MS, walk_forward(), &FlatTerrain);
        assert!(outbound.is_empty());

        let holder = client.remote("a").expect("holder mirrored");
        let (expected, _) = follow_position(holder.position, holder.rotation_y);
        let local = client.local().expect("local");
        assert!((local.position.x - expected.x).abs() < 1e-5);
        assert!((local.position.z - expected.z).abs() < 1e-5);
        assert!(matches!(local.catch_state, CatchState::Caught { .. }));
    }

    #[test]
    fn release_broadcast_frees_the_caught_avatar_before_the_countdown() {
        let mut client = client_with_id("me", ModelType::Cabbage);
        add_remote(&mut client, "a", ModelType::Dog, 3.0, 4.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "me".to_string(),
            }),
            &FlatTerrain,
        );
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageReleased {
                animal_id: "a".to_string(),
                cabbage_id: "me".to_string(),
            }),
            &FlatTerrain,
        );
        assert_eq!(
            client.local().expect("local").catch_state,
            CatchState::Free
        );
        let outbound = client.tick(SIM_TICK_MS, walk_forward(), &FlatTerrain);
        assert_eq!(outbound.len(), 1);
        assert!(matches!(outbound[0], ClientMessage::PlayerMove { .. }));
    }

    #[test]
    fn local_countdown_frees_the_caught_avatar_without_a_broadcast() {
        let mut client = client_with_id("me", ModelType::Cabbage);
        add_remote(&mut client, "a", ModelType::Dog, 3.0, 4.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "me".to_string(),
            }),
            &FlatTerrain,
        );
        let mut elapsed = 0;
        while elapsed <= CATCH_DURATION_MS {
            client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
            elapsed += SIM_TICK_MS;
        }
        assert_eq!(client.local().expect("local").catch_state, CatchState::Free);
    }

    #[test]
    fn holder_disconnect_frees_the_caught_avatar() {
        let mut client = client_with_id("me", ModelType::Cabbage);
        add_remote(&mut client, "a", ModelType::Dog, 3.0, 4.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "me".to_string(),
            }),
            &FlatTerrain,
        );
        client.handle_message(
            ServerMessage::Event(ServerEvent::PlayerLeft {
                id: "a".to_string(),
            }),
            &FlatTerrain,
        );
        assert_eq!(client.local().expect("local").catch_state, CatchState::Free);
        assert!(client.remote("a").is_none());
    }

    #[test]
    fn a_remote_caught_cabbage_is_rendered_in_front_of_its_holder() {
        let mut client = client_with_id("me", ModelType::Pig);
        add_remote(&mut client, "a", ModelType::Dog, 3.0, 4.0);
        add_remote(&mut client, "c", ModelType::Cabbage, 0.0, 0.0);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "a".to_string(),
                cabbage_id: "c".to_string(),
            }),
            &FlatTerrain,
        );
        client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);

        let holder = client.remote("a").expect("holder mirrored");
        let cabbage = client.remote("c").expect("cabbage mirrored");
        let (expected, _) = follow_position(holder.position, holder.rotation_y);
        assert!((cabbage.position.x - expected.x).abs() < 1e-5);
        assert!((cabbage.position.z - expected.z).abs() < 1e-5);
        assert!(
            (cabbage.position.distance_xz(&holder.position) - FOLLOW_OFFSET).abs() < 1e-5
        );
    }

    #[test]
    fn a_cabbage_held_by_the_local_animal_follows_the_local_transform() {
        let mut client = client_with_id("me", ModelType::Dog);
        add_remote(&mut client, "c", ModelType::Cabbage, 1.0, 0.0);
        client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        client.handle_message(
            ServerMessage::Event(ServerEvent::CabbageCaught {
                animal_id: "me".to_string(),
                cabbage_id: "c".to_string(),
            }),
            &FlatTerrain,
        );
        client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);

        let local_position = client.local().expect("local").position;
        let cabbage = client.remote("c").expect("cabbage mirrored");
        assert!(
            (cabbage.position.distance_xz(&local_position) - FOLLOW_OFFSET).abs() < 1e-5
        );
    }

    #[test]
    fn movement_is_clamped_to_the_world_bound() {
        let mut client = client_with_id("me", ModelType::Pig);
        client.handle_message(
            ServerMessage::Event(ServerEvent::NewPlayer {
                player: joined_record("me", ModelType::Pig, 0.0, -WORLD_BOUND),
            }),
            &FlatTerrain,
        );
        let outbound = client.tick(SIM_TICK_MS, walk_forward(), &FlatTerrain);
        assert_eq!(outbound.len(), 1);
        let local = client.local().expect("local");
        assert_eq!(local.position.z, -WORLD_BOUND);
    }

    #[test]
    fn overlapping_players_are_pushed_apart() {
        let mut client = client_with_id("me", ModelType::Pig);
        add_remote(&mut client, "other", ModelType::Dog, 0.0, -0.5);
        let before = client.local().expect("local").position;
        client.tick(SIM_TICK_MS, walk_forward(), &FlatTerrain);
        let after = client.local().expect("local").position;
        let other = client.remote("other").expect("other mirrored").position;
        assert!(after.distance_xz(&other) > before.distance_xz(&other) - MOVE_SPEED);
        assert!(after.distance_xz(&other) > 0.0);
    }

    #[test]
    fn idle_input_emits_no_movement() {
        let mut client = client_with_id("me", ModelType::Pig);
        let outbound = client.tick(SIM_TICK_MS, MoveInput::idle(), &FlatTerrain);
        assert!(outbound.is_empty());
    }
}
