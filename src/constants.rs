pub const CATCH_DURATION_MS: u64 = 2_000;
pub const CATCH_CONFIRM_GRACE_MS: u64 = 1_000;

pub const CATCH_RADIUS: f32 = 1.5;
pub const PLAYER_RADIUS: f32 = 0.6;
pub const FOLLOW_OFFSET: f32 = 0.4;

pub const SPAWN_SPREAD: f32 = 5.0;
pub const WORLD_BOUND: f32 = 45.0;
pub const MOVE_SPEED: f32 = 0.2;
pub const GROUND_CLEARANCE: f32 = 0.5;

pub const MAX_NAME_LEN: usize = 16;
pub const MAX_CHAT_LEN: usize = 200;

pub const DEFAULT_PORT: u16 = 3000;

pub const SIM_TICK_MS: u64 = 50;
