//! Arena border geometry.
//!
//! The playable area is the square `[0, world_size] × [0, world_size]`.
//! Four bars of the given thickness sit flush against its sides; the north
//! and south bars span the corners, so each bar is `world_size + 2·thickness`
//! long.

use blackholio_sdk::{CONFIG_ROW_ID, RemoteTables};
use nalgebra::{Vector2, Vector3};

use crate::error::SessionError;
use crate::scene::Cuboid;

/// Name given to every border object in the scene.
pub const BORDER_OBJECT_NAME: &str = "Border";
/// Depth at which border objects are placed.
pub const BORDER_DEPTH: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    North,
    South,
    East,
    West,
}

/// One axis-aligned border bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderSegment {
    pub side: Side,
    pub center: Vector2<f32>,
    pub size: Vector2<f32>,
}

impl BorderSegment {
    pub fn cuboid(&self, material: &str) -> Cuboid {
        Cuboid {
            name: BORDER_OBJECT_NAME.to_string(),
            position: Vector3::new(self.center.x, self.center.y, BORDER_DEPTH),
            scale: Vector3::new(self.size.x, self.size.y, 1.0),
            material: material.to_string(),
        }
    }
}

/// Border bars for a square arena, in north, south, east, west order.
pub fn border_segments(world_size: f32, thickness: f32) -> [BorderSegment; 4] {
    let mid = world_size / 2.0;
    let span = world_size + thickness * 2.0;
    let half_t = thickness / 2.0;
    [
        BorderSegment {
            side: Side::North,
            center: Vector2::new(mid, world_size + half_t),
            size: Vector2::new(span, thickness),
        },
        BorderSegment {
            side: Side::South,
            center: Vector2::new(mid, -half_t),
            size: Vector2::new(span, thickness),
        },
        BorderSegment {
            side: Side::East,
            center: Vector2::new(world_size + half_t, mid),
            size: Vector2::new(thickness, span),
        },
        BorderSegment {
            side: Side::West,
            center: Vector2::new(-half_t, mid),
            size: Vector2::new(thickness, span),
        },
    ]
}

/// Arena parameters read from the synced `config` row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaConfig {
    pub world_size: f32,
}

impl ArenaConfig {
    /// Must only be called after the subscription has been applied.
    pub fn from_cache(db: &RemoteTables) -> Result<Self, SessionError> {
        let row = db
            .config()
            .find(&CONFIG_ROW_ID)
            .ok_or(SessionError::MissingConfigRow { id: CONFIG_ROW_ID })?;
        Ok(Self {
            world_size: row.world_size as f32,
        })
    }
}
