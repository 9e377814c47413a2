use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Pig,
    Rabbit,
    Cat,
    Dog,
    Cabbage,
}

impl ModelType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pig" => Some(Self::Pig),
            "rabbit" => Some(Self::Rabbit),
            "cat" => Some(Self::Cat),
            "dog" => Some(Self::Dog),
            "cabbage" => Some(Self::Cabbage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pig => "pig",
            Self::Rabbit => "rabbit",
            Self::Cat => "cat",
            Self::Dog => "dog",
            Self::Cabbage => "cabbage",
        }
    }

    pub fn is_animal(&self) -> bool {
        !matches!(self, Self::Cabbage)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn distance_xz(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub color: u32,
    pub name: String,
    #[serde(rename = "modelType")]
    pub model_type: Option<ModelType>,
    #[serde(rename = "isJoined")]
    pub is_joined: bool,
    #[serde(rename = "isCaught")]
    pub is_caught: bool,
    #[serde(rename = "caughtBy")]
    pub caught_by: Option<String>,
    #[serde(rename = "isEating")]
    pub is_eating: bool,
    #[serde(rename = "eatingTarget")]
    pub eating_target: Option<String>,
}

impl PlayerRecord {
    pub fn placeholder(id: &str, color: u32) -> Self {
        Self {
            id: id.to_string(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            color,
            name: String::new(),
            model_type: None,
            is_joined: false,
            is_caught: false,
            caught_by: None,
            is_eating: false,
            eating_target: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}
