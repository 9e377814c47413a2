pub mod constants;
pub mod mirror;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod rng;
pub mod server_utils;
pub mod types;
