//! The Movement Controller: one tick of CPM-style player physics.
//!
//! Ground trace, friction, and acceleration selection follow Quake 3's `PM_GroundTrace` /
//! `PM_Friction` / `PM_AirMove` pipeline; the collision response (`clip_velocity`, the
//! give-up-after-too-many-planes rule) is grounded directly in the reference engine's
//! `server::world::phys::velocity_after_collision` / `velocity_after_multi_collision`,
//! generalized from a single fixed overbounce to a call-site-supplied one.

use cgmath::{InnerSpace, Vector3, Zero};

use crate::common::math::rotate_wish_vector;
use crate::world::trace::trace;
use crate::world::{player_maxs, player_mins, MovementFlags, Player};
use crate::common::bsp::Map;

/// Downward probe distance used to test for ground contact.
const GROUND_TRACE_DISTANCE: f32 = 0.25;
/// Below this speed, a velocity component is snapped to zero rather than left to decay forever.
const STOP_THRESHOLD: f32 = 0.1;
/// Slack used when deciding whether velocity still opposes a clip plane in [`resolve_planes`].
const PLANE_OPPOSES_EPSILON: f32 = 0.1;
/// Two contact planes are treated as the same plane above this normal dot product.
const DUPLICATE_PLANE_EPSILON: f32 = 0.99;

pub const SV_MAX_SPEED: f32 = 320.0;
pub const SV_GRAVITY: f32 = 800.0;
pub const JUMP_VELOCITY: f32 = 270.0;

pub const CL_STOP_SPEED: f32 = 200.0;
pub const CL_MOVEMENT_FRICTION: f32 = 8.0;
pub const CL_MOVEMENT_ACCELERATE: f32 = 15.0;
pub const CL_MOVEMENT_AIRACCELERATE: f32 = 7.0;
pub const CPM_AIR_STOP_ACCELERATION: f32 = 2.5;
pub const CPM_STRAFE_ACCELERATION: f32 = 70.0;
/// Cap applied to the wishspeed used by air acceleration, both for the speed actually gained and
/// for `accelspeed`'s own scaling — see [`air_accelerate`].
pub const CPM_WISH_SPEED: f32 = 30.0;

pub const MAX_CLIP_PLANES: usize = 5;
const OVERBOUNCE: f32 = 1.001;

/// One tick's worth of intent from the host input loop: `forward`/`right` in `[-1, 1]`, `up`
/// used only in noclip, `jump` the raw (not edge-triggered) button state.
#[derive(Copy, Clone, Debug, Default)]
pub struct TickInput {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    pub jump: bool,
}

/// Advances `player` by one tick of `dt` seconds against `map`'s collision geometry.
pub fn tick(map: &Map, player: &mut Player, input: TickInput, dt: f32) {
    player.movement_flags.remove(MovementFlags::JUMP_THIS_FRAME);

    // 1. Ground trace.
    let ground_plane = if player.noclip { None } else { ground_trace(map, player) };
    let mut grounded = ground_plane.is_some();

    // 2. Rotate input into map space.
    let local = Vector3::new(input.forward, input.right, if player.noclip { input.up } else { 0.0 });
    let wish_vel = rotate_wish_vector(local, player.angles, player.noclip) * SV_MAX_SPEED;

    // 3. Decompose and clamp wishspeed.
    let wishspeed_raw = wish_vel.magnitude();
    let wishdir = if wishspeed_raw > 0.0 {
        wish_vel / wishspeed_raw
    } else {
        Vector3::zero()
    };
    let wishspeed = wishspeed_raw.min(SV_MAX_SPEED);

    // 4. Jump latching: no auto-bunnyhop, jump only fires on a fresh press.
    if grounded && !player.noclip {
        if input.jump && !player.movement_flags.contains(MovementFlags::JUMP_HELD) {
            player.velocity.z = JUMP_VELOCITY;
            player.movement_flags.insert(MovementFlags::JUMP_THIS_FRAME);
            grounded = false;
        }
    }
    if input.jump {
        player.movement_flags.insert(MovementFlags::JUMP_HELD);
    } else {
        player.movement_flags.remove(MovementFlags::JUMP_HELD);
    }

    if player.noclip {
        player.movement_flags.remove(MovementFlags::AIRBORNE);
        player.ground_normal = None;
        player.velocity = wishdir * wishspeed;
        player.pos += player.velocity * dt;
        return;
    }

    if grounded {
        player.movement_flags.remove(MovementFlags::AIRBORNE);
        player.ground_normal = ground_plane;
    } else {
        player.movement_flags.insert(MovementFlags::AIRBORNE);
        player.ground_normal = None;
    }

    // 5. Friction (ground only).
    if grounded {
        apply_friction(player, dt);
    }

    // 6 & 7. Acceleration selection + application.
    if grounded {
        accelerate(&mut player.velocity, wishdir, wishspeed, CL_MOVEMENT_ACCELERATE, dt);
    } else {
        let is_pure_strafe = input.forward == 0.0 && input.right != 0.0;
        let accel = if is_pure_strafe {
            CPM_STRAFE_ACCELERATION
        } else if wishspeed_raw > 0.0 && player.velocity.dot(wishdir) < 0.0 {
            CPM_AIR_STOP_ACCELERATION
        } else {
            CL_MOVEMENT_AIRACCELERATE
        };
        air_accelerate(&mut player.velocity, wishdir, wishspeed_raw, accel, dt);

        // 8. Air control: rescales the horizontal velocity toward wishdir without actually
        // steering it — a real but faithfully-preserved quirk of the reference movement code.
        air_control(&mut player.velocity, wishdir, wishspeed_raw, dt);
    }

    // 9. Integrate with collision response. Gravity is folded into the slide itself rather than
    // applied up front: grounded movement never integrates gravity here (the ground trace already
    // accounts for standing contact), airborne movement does.
    let (pos, velocity) = slide_move(map, player.pos, player.velocity, player.ground_normal, !grounded, dt);
    player.pos = pos;
    player.velocity = velocity;
}

/// Traces the player box down by [`GROUND_TRACE_DISTANCE`]. An unobstructed probe means airborne;
/// otherwise the contact plane's normal is remembered regardless of its steepness — the slide loop
/// is what actually determines whether a surface can be stood on or merely collided with.
fn ground_trace(map: &Map, player: &Player) -> Option<Vector3<f32>> {
    let probe_end = player.pos - Vector3::new(0.0, 0.0, GROUND_TRACE_DISTANCE);
    let result = trace(map, player.pos, probe_end, player_mins(), player_maxs());

    if result.frac >= 1.0 {
        None
    } else {
        result.plane.map(|plane| plane.normal)
    }
}

fn apply_friction(player: &mut Player, dt: f32) {
    let mut horizontal = Vector3::new(player.velocity.x, player.velocity.y, 0.0);
    let speed = horizontal.magnitude();

    if speed < 1.0 {
        horizontal = Vector3::zero();
    } else {
        let control = speed.max(CL_STOP_SPEED);
        let drop = control * CL_MOVEMENT_FRICTION * dt;
        let newspeed = (speed - drop).max(0.0) / speed;
        horizontal *= newspeed;
    }

    player.velocity.x = horizontal.x;
    player.velocity.y = horizontal.y;
}

/// Ground (and generic) acceleration: raises the velocity component along `wishdir` toward
/// `wishspeed`, capped by how much can be gained this tick.
fn accelerate(velocity: &mut Vector3<f32>, wishdir: Vector3<f32>, wishspeed: f32, accel: f32, dt: f32) {
    let current_speed = velocity.dot(wishdir);
    let add_speed = wishspeed - current_speed;
    if add_speed <= 0.0 {
        return;
    }
    let accel_speed = (accel * wishspeed * dt).min(add_speed);
    *velocity += accel_speed * wishdir;
}

/// Air acceleration. `wishspeed` is clamped to [`CPM_WISH_SPEED`] before it drives both the speed
/// gain and `accelspeed`'s own scaling — the clamp happens once, upstream of both uses.
fn air_accelerate(velocity: &mut Vector3<f32>, wishdir: Vector3<f32>, wishspeed: f32, accel: f32, dt: f32) {
    let capped_wishspeed = wishspeed.min(CPM_WISH_SPEED);
    let current_speed = velocity.dot(wishdir);
    let add_speed = capped_wishspeed - current_speed;
    if add_speed <= 0.0 {
        return;
    }
    let accel_speed = (accel * capped_wishspeed * dt).min(add_speed);
    *velocity += accel_speed * wishdir;
}

/// Rescales the horizontal velocity toward `wishdir` in the air. The reference implementation
/// computes a turn-rate factor `k` from the dot product between the current direction and
/// `wishdir` and then never applies it to the velocity; only the renormalize-and-rescale that
/// follows survives. Kept exactly as observed rather than "corrected" to actually steer, per the
/// documented open question on this quirk.
fn air_control(velocity: &mut Vector3<f32>, wishdir: Vector3<f32>, wishspeed: f32, dt: f32) {
    if wishspeed == 0.0 {
        return;
    }

    let zspeed = velocity.z;
    let mut horizontal = Vector3::new(velocity.x, velocity.y, 0.0);
    let speed = horizontal.magnitude();
    if speed == 0.0 {
        return;
    }
    let dir = horizontal / speed;
    let dot = dir.dot(Vector3::new(wishdir.x, wishdir.y, 0.0));

    // `k` is computed to match the reference's arithmetic but deliberately discarded.
    let _k = 32.0 * dot * dot * dt;

    if dot > 0.0 {
        horizontal = dir * speed;
    }

    velocity.x = horizontal.x;
    velocity.y = horizontal.y;
    velocity.z = zspeed;
}

/// `backoff` is scaled by `overbounce` when negative (clipping into the surface) and by its
/// reciprocal otherwise, rather than always multiplying — the asymmetry is what gives `OVERBOUNCE`
/// its "push slightly off the surface" effect without also damping a component already pointing
/// away from it.
fn clip_velocity(v: Vector3<f32>, normal: Vector3<f32>, overbounce: f32) -> Vector3<f32> {
    let dot = v.dot(normal);
    let backoff = if dot < 0.0 { dot * overbounce } else { dot / overbounce };
    let mut out = v - normal * backoff;
    for i in 0..3 {
        if out[i].abs() < STOP_THRESHOLD {
            out[i] = 0.0;
        }
    }
    out
}

/// Finds the first plane in `planes` that `velocity` still runs into (`velocity·p < `
/// [`PLANE_OPPOSES_EPSILON`]) and clips against it. If the clipped result still runs into a
/// second plane, slides along the crease between the two (`cross(p_i, p_j)`) instead; if that
/// crease still runs into a third plane, the move is wedged into a corner and `None` signals the
/// caller to zero velocity and give up.
fn resolve_planes(velocity: Vector3<f32>, planes: &[Vector3<f32>]) -> Option<Vector3<f32>> {
    for (i, &p_i) in planes.iter().enumerate() {
        if velocity.dot(p_i) >= PLANE_OPPOSES_EPSILON {
            continue;
        }

        let mut clipped = clip_velocity(velocity, p_i, OVERBOUNCE);

        for (j, &p_j) in planes.iter().enumerate() {
            if j == i || clipped.dot(p_j) >= PLANE_OPPOSES_EPSILON {
                continue;
            }

            let crease = p_i.cross(p_j);
            let dir = if crease.magnitude2() > 1e-9 { crease.normalize() } else { Vector3::zero() };
            clipped = dir * velocity.dot(dir);

            let blocked_by_third = planes
                .iter()
                .enumerate()
                .any(|(k, &p_k)| k != i && k != j && clipped.dot(p_k) < PLANE_OPPOSES_EPSILON);
            if blocked_by_third {
                return None;
            }
        }

        return Some(clipped);
    }

    Some(velocity)
}

/// Sweeps `(pos, velocity)` forward by `dt`, sliding along up to [`MAX_CLIP_PLANES`] surfaces hit
/// along the way. When `gravity` is set, gravity is integrated here rather than by the caller:
/// `end_velocity` takes the full gravity step, the velocity actually swept this tick is the
/// average of the pre- and post-gravity `z` (the reference engine's anti-tunneling fudge), and the
/// final velocity handed back to the caller is `end_velocity` in full — discarding whatever
/// horizontal change the slide loop itself produced, a real quirk of the algorithm being
/// reproduced rather than an oversight.
fn slide_move(
    map: &Map,
    start_pos: Vector3<f32>,
    start_velocity: Vector3<f32>,
    ground_normal: Option<Vector3<f32>>,
    gravity: bool,
    dt: f32,
) -> (Vector3<f32>, Vector3<f32>) {
    let mut velocity = start_velocity;
    let mut end_velocity = velocity;

    if gravity {
        end_velocity.z -= SV_GRAVITY * dt;
        velocity.z = (velocity.z + end_velocity.z) / 2.0;
    }

    if let Some(normal) = ground_normal {
        velocity = clip_velocity(velocity, normal, OVERBOUNCE);
    }

    let mut planes: Vec<Vector3<f32>> = Vec::with_capacity(MAX_CLIP_PLANES);
    if let Some(normal) = ground_normal {
        planes.push(normal);
    }
    if velocity.magnitude2() > 1e-9 {
        planes.push(velocity.normalize());
    }

    let mut pos = start_pos;
    let mut time_left = dt;

    for _bump in 0..4 {
        if time_left <= 0.0 {
            break;
        }

        let end = pos + velocity * time_left;
        let result = trace(map, pos, end, player_mins(), player_maxs());

        if result.frac > 0.0 {
            pos = result.endpos;
        }
        if result.frac >= 1.0 {
            break;
        }

        time_left -= time_left * result.frac;

        let Some(plane) = result.plane else { break };

        if planes.len() >= MAX_CLIP_PLANES {
            velocity = Vector3::zero();
            break;
        }

        if planes.iter().any(|&p| plane.normal.dot(p) > DUPLICATE_PLANE_EPSILON) {
            velocity += plane.normal;
            continue;
        }

        planes.push(plane.normal);

        match resolve_planes(velocity, &planes) {
            Some(resolved) => velocity = resolved,
            None => {
                velocity = Vector3::zero();
                break;
            }
        }
    }

    if gravity {
        velocity = end_velocity;
    }

    (pos, velocity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bsp::{Brush, Brushside, Child, Leaf, Node, Plane, PlaneIndex, Texture, Visdata, Contents};
    use crate::common::math::Angles;
    use std::rc::Rc;

    fn floor_map() -> Map {
        let planes = vec![Plane {
            normal: Vector3::new(0.0, 0.0, 1.0),
            dist: 0.0,
        }];
        let nodes = vec![Node {
            plane: 0,
            children: [Child::Leaf(0), Child::Leaf(1)],
            mins: [-4096, -4096, -4096],
            maxs: [4096, 4096, 4096],
        }];
        let leaves = vec![
            Leaf {
                cluster: 0,
                area: 0,
                mins: [-4096, -4096, 0],
                maxs: [4096, 4096, 4096],
                leafface: 0,
                n_leaffaces: 0,
                leafbrush: 0,
                n_leafbrushes: 0,
            },
            Leaf {
                cluster: -1,
                area: 0,
                mins: [-4096, -4096, -4096],
                maxs: [4096, 4096, 0],
                leafface: 0,
                n_leaffaces: 0,
                leafbrush: 0,
                n_leafbrushes: 1,
            },
        ];
        let brushsides = vec![Brushside { plane: 0, texture: 0 }];
        let brushes = vec![Brush {
            brushside: 0,
            n_brushsides: 1,
            texture: 0,
        }];
        let textures = vec![Texture {
            name: "floor".into(),
            flags: 0,
            contents: Contents::SOLID,
        }];
        let planes_meta = PlaneIndex::build(&planes);

        Map {
            raw: Rc::from(Vec::new().into_boxed_slice()),
            entities: String::new(),
            textures,
            planes,
            nodes,
            leaves,
            leaffaces: Vec::new(),
            leafbrushes: vec![0],
            models: Vec::new(),
            brushes,
            brushsides,
            vertices: Vec::new(),
            meshverts: Vec::new(),
            effects: Vec::new(),
            faces: Vec::new(),
            lightmaps: Vec::new(),
            lightvols: Vec::new(),
            visdata: Visdata::empty(),
            planes_meta,
        }
    }

    fn standing_player() -> Player {
        Player {
            pos: Vector3::new(0.0, 0.0, 24.0),
            velocity: Vector3::zero(),
            angles: Angles::zero(),
            movement_flags: MovementFlags::empty(),
            ground_normal: None,
            noclip: false,
        }
    }

    /// S4: friction decays horizontal speed toward zero with no input.
    #[test]
    fn friction_decays_ground_speed() {
        let map = floor_map();
        let mut player = standing_player();
        player.velocity = Vector3::new(100.0, 0.0, 0.0);

        tick(&map, &mut player, TickInput::default(), 1.0 / 60.0);

        assert!(player.velocity.x < 100.0);
        assert!(player.velocity.x >= 0.0);
    }

    /// S6: jump only fires on a fresh press, never while held.
    #[test]
    fn jump_does_not_auto_repeat() {
        let map = floor_map();
        let mut player = standing_player();

        let input = TickInput {
            jump: true,
            ..Default::default()
        };

        tick(&map, &mut player, input, 1.0 / 60.0);
        assert!(player.movement_flags.contains(MovementFlags::JUMP_THIS_FRAME));

        tick(&map, &mut player, input, 1.0 / 60.0);
        assert!(!player.movement_flags.contains(MovementFlags::JUMP_THIS_FRAME));
    }

    /// S5: air acceleration increases speed along the wish direction while airborne.
    #[test]
    fn air_acceleration_increases_speed() {
        let map = floor_map();
        let mut player = standing_player();
        player.pos.z = 100.0;
        player.velocity = Vector3::new(0.0, 0.0, 0.0);

        let input = TickInput {
            forward: 1.0,
            ..Default::default()
        };

        let before = player.velocity.magnitude();
        tick(&map, &mut player, input, 1.0 / 60.0);
        let horizontal_after = Vector3::new(player.velocity.x, player.velocity.y, 0.0).magnitude();

        assert!(horizontal_after > before);
    }

    #[test]
    fn clip_velocity_removes_component_into_surface() {
        let v = Vector3::new(0.0, 0.0, -100.0);
        let normal = Vector3::new(0.0, 0.0, 1.0);
        let clipped = clip_velocity(v, normal, 1.0);
        assert!(clipped.z.abs() < 1e-4);
    }

    /// S7: sliding against a vertical wall zeroes the velocity component into the wall while
    /// preserving the component along it.
    #[test]
    fn slide_along_wall_preserves_tangential_velocity() {
        let v = Vector3::new(100.0, 50.0, 0.0);
        let wall_normal = Vector3::new(-1.0, 0.0, 0.0);
        let clipped = clip_velocity(v, wall_normal, OVERBOUNCE);
        assert!(clipped.x <= 1e-3);
        assert!((clipped.y - 50.0).abs() < 1.0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 5 (overbounce monotone), restated at the single-clip level: clipping a
        // velocity that runs into a surface (`v . n < 0`) with `overbounce >= 1` never leaves it
        // running into that surface afterward — the post-clip component along `n` is
        // non-negative (up to float slop), so a repeated clip against the same plane is a no-op
        // rather than an oscillation.
        #[test]
        fn clip_velocity_never_leaves_residual_penetration(
            vx in -500.0f32..500.0,
            vy in -500.0f32..500.0,
            vz in -500.0f32..500.0,
            nx in -1.0f32..1.0,
            ny in -1.0f32..1.0,
            nz in -1.0f32..1.0,
            overbounce in 1.0f32..2.0,
        ) {
            prop_assume!(nx * nx + ny * ny + nz * nz > 1e-6);
            let v = Vector3::new(vx, vy, vz);
            let n = Vector3::new(nx, ny, nz).normalize();
            prop_assume!(v.dot(n) < 0.0);

            let clipped = clip_velocity(v, n, overbounce);
            prop_assert!(clipped.dot(n) >= -1e-2);
        }
    }
}
