//! World state: the decoded map, the player, and the operations that tie them together.
//!
//! Generalizes the ad hoc wiring in a `phys-test.rs`-style binary (load a map, build a
//! world, step it) into a first-class struct rather than loose globals in a `main()`.

pub mod movement;
pub mod trace;

use cgmath::Vector3;

use crate::common::bsp::Map;
use crate::common::math::Angles;

/// Half-extents of the player's fixed hitbox, matching the Quake/CPM standard player box.
pub fn player_mins() -> Vector3<f32> {
    Vector3::new(-15.0, -15.0, -24.0)
}

pub fn player_maxs() -> Vector3<f32> {
    Vector3::new(15.0, 15.0, 32.0)
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MovementFlags: u8 {
        /// Jump was held on the previous tick; suppresses auto-bunnyhop re-triggering until
        /// released and pressed again.
        const JUMP_HELD       = 0x1;
        /// A jump impulse was applied this tick.
        const JUMP_THIS_FRAME = 0x2;
        /// The player left the ground this tick (no ground trace contact).
        const AIRBORNE        = 0x4;
    }
}

/// The player's full simulation state, mutated in place once per tick by
/// [`movement::tick`].
#[derive(Copy, Clone, Debug)]
pub struct Player {
    pub pos: Vector3<f32>,
    pub velocity: Vector3<f32>,
    pub angles: Angles,
    pub movement_flags: MovementFlags,
    /// Surface normal of the ground the player is standing on, if any.
    pub ground_normal: Option<Vector3<f32>>,
    pub noclip: bool,
}

impl Player {
    pub fn spawn(pos: Vector3<f32>, yaw: f32) -> Player {
        Player {
            pos,
            velocity: Vector3::new(0.0, 0.0, 0.0),
            angles: Angles::new(yaw, 0.0),
            movement_flags: MovementFlags::empty(),
            ground_normal: None,
            noclip: false,
        }
    }
}

/// Everything needed to simulate and query one map: the decoded geometry and the single player
/// walking it. `!Send`/`!Sync` by construction (`Map` holds an `Rc<[u8]>`) — single-threaded use
/// only, matching the rest of the map/physics core.
pub struct World {
    pub map: Map,
    pub player: Player,
}

impl World {
    pub fn new(map: Map, player: Player) -> World {
        World { map, player }
    }
}
