//! The host shell: argument parsing and the collaborator seams (`Renderer`, `HostInput`) that a
//! real windowing/graphics layer plugs into.
//!
//! Generalizes the ad hoc `fn main()` wiring in `phys-test.rs`/`bsp-dot.rs`-style binaries
//! (load a map, build a world, drive it) into a reusable tick loop, parameterized over the two
//! trait seams so the core can be exercised headlessly in tests or from a real renderer/input
//! backend without either depending on the other.

use cgmath::Vector3;
use docopt::Docopt;
use log::trace;
use serde::Deserialize;

use crate::common::bsp::{query, Map};
use crate::common::math::normalize_angle;
use crate::world::movement::TickInput;
use crate::world::{Player, World};

pub const USAGE: &str = "
bspwalk: a Quake 3 BSP (v46) map viewer and CPM movement playground.

Usage:
    bspwalk [options] <file.bsp>
    bspwalk --help

Options:
    --help        Show this message.
    -window       Run windowed (otherwise fullscreen on the main display).
    -d N          Display index. [default: 0]
    -t N          Patch tessellation level. [default: 5]
    -w N          Window width. [default: 1280]
    -h N          Window height. [default: 720]
";

/// Parsed command line, matching the flag table verbatim: a positional map path plus display/
/// window/tessellation options the core itself never reads (they're handed to the renderer).
#[derive(Debug, Deserialize)]
pub struct Args {
    pub arg_file_bsp: String,
    pub flag_help: bool,
    pub flag_window: bool,
    pub flag_d: u32,
    pub flag_t: u32,
    pub flag_w: u32,
    pub flag_h: u32,
}

/// Parses `argv` against [`USAGE`]. On a usage error, docopt has already printed the message and
/// this returns `Err(())` so the caller can exit with status 1 without printing anything twice.
pub fn parse_args<I, S>(argv: I) -> Result<Args, ()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Docopt::new(USAGE)
        .and_then(|d| d.argv(argv).deserialize())
        .map_err(|e| {
            eprintln!("{e}");
            ()
        })
}

/// One tick's worth of raw input from the host, before it's been split into the Movement
/// Controller's narrower [`TickInput`] and the camera/quit bookkeeping that lives outside the
/// core. Mirrors the input contract's `{wishdir, wishlook, jump_held, noclip_toggle, quit}` shape.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostTick {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    /// Mouse/stick delta in pixels; scaled by [`LOOK_SCALE`] before being applied to the camera.
    pub wishlook: (f32, f32),
    pub jump_held: bool,
    pub noclip_toggle: bool,
    pub quit: bool,
}

/// Radians of camera rotation per pixel of `wishlook`.
pub const LOOK_SCALE: f32 = 0.002;

/// Polled once per tick by the host loop. A real implementation reads window/input-device events;
/// [`NullRenderer`]'s companion in tests is a scripted queue of canned ticks.
pub trait HostInput {
    fn poll(&mut self) -> HostTick;
}

/// Drawn once per tick after the Movement Controller has settled `pos`/`angles` for this tick —
/// the renderer only ever sees a fully-updated player, never one mid-tick. `visible_leaves` is
/// whatever PVS selection the host already computed via `find_leaf`/`cluster_visible` — the core
/// does not do this selection itself.
pub trait Renderer {
    fn draw(&mut self, map: &Map, player: &Player, visible_leaves: &[u32]);
}

/// A `Renderer` that does nothing but log, for headless runs and for exercising the tick loop
/// without a graphics backend — the role `bsp-dot.rs` plays for the BSP dumper, minus the actual
/// dump.
#[derive(Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw(&mut self, _map: &Map, player: &Player, visible_leaves: &[u32]) {
        trace!(
            "draw: pos={:?} yaw={:.3} visible_leaves={}",
            player.pos,
            player.angles.yaw,
            visible_leaves.len()
        );
    }
}

/// Computes the set of leaves potentially visible from the leaf containing `player.pos`, by
/// walking every leaf in the map and testing its cluster against the player's. `O(n_leaves)` per
/// call; a real renderer would cache this against a dirty cluster rather than recompute it every
/// tick, but the core makes no claim about that cost — the scratch visibility bitmap belongs to
/// the renderer, not the core.
pub fn visible_leaves(map: &Map, player: &Player) -> Vec<u32> {
    let from_leaf = query::find_leaf(map, player.pos);
    let from_cluster = map.leaves.get(from_leaf as usize).map(|l| l.cluster).unwrap_or(-1);

    map.leaves
        .iter()
        .enumerate()
        .filter(|(_, leaf)| query::cluster_visible(map, from_cluster, leaf.cluster))
        .map(|(idx, _)| idx as u32)
        .collect()
}

/// Runs the tick loop until `input.poll()` reports `quit`, driving `world.player` through the
/// Movement Controller once per tick and handing the result to `renderer` afterward. `dt` is
/// fixed; a real host would derive it from the frame timer instead of a constant.
pub fn run_tick_loop<I: HostInput, R: Renderer>(world: &mut World, input: &mut I, renderer: &mut R, dt: f32) {
    loop {
        let tick = input.poll();
        if tick.quit {
            return;
        }

        if tick.noclip_toggle {
            world.player.noclip = !world.player.noclip;
        }

        let yaw = normalize_angle(world.player.angles.yaw + tick.wishlook.0 * LOOK_SCALE);
        let pitch = normalize_angle(world.player.angles.pitch + tick.wishlook.1 * LOOK_SCALE);
        world.player.angles = crate::common::math::Angles::new(yaw, pitch);

        let movement_input = TickInput {
            forward: tick.forward,
            right: tick.right,
            up: tick.up,
            jump: tick.jump_held,
        };
        crate::world::movement::tick(&world.map, &mut world.player, movement_input, dt);

        let leaves = visible_leaves(&world.map, &world.player);
        renderer.draw(&world.map, &world.player, &leaves);
    }
}

/// Builds the initial player state from a freshly loaded map's entity lump, per the Spawn
/// Bootstrap contract: first matching spawn entity's origin/angle, or `(0, 0)` if none is found.
pub fn spawn_player(map: &Map) -> Player {
    let spawn = crate::common::entity::bootstrap_spawn(&map.entities);
    Player::spawn(spawn.origin, spawn.angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedInput {
        ticks: std::collections::VecDeque<HostTick>,
    }

    impl HostInput for ScriptedInput {
        fn poll(&mut self) -> HostTick {
            self.ticks.pop_front().unwrap_or(HostTick {
                quit: true,
                ..Default::default()
            })
        }
    }

    fn empty_map() -> Map {
        use crate::common::bsp::{PlaneIndex, Visdata};
        Map {
            raw: std::rc::Rc::from(Vec::new().into_boxed_slice()),
            entities: String::new(),
            textures: Vec::new(),
            planes: Vec::new(),
            nodes: Vec::new(),
            leaves: Vec::new(),
            leaffaces: Vec::new(),
            leafbrushes: Vec::new(),
            models: Vec::new(),
            brushes: Vec::new(),
            brushsides: Vec::new(),
            vertices: Vec::new(),
            meshverts: Vec::new(),
            effects: Vec::new(),
            faces: Vec::new(),
            lightmaps: Vec::new(),
            lightvols: Vec::new(),
            visdata: Visdata::empty(),
            planes_meta: PlaneIndex::build(&[]),
        }
    }

    #[test]
    fn tick_loop_stops_on_quit() {
        let map = empty_map();
        let player = Player::spawn(Vector3::new(0.0, 0.0, 0.0), 0.0);
        let mut world = World::new(map, player);
        let mut input = ScriptedInput {
            ticks: std::collections::VecDeque::from(vec![
                HostTick { forward: 1.0, ..Default::default() },
                HostTick { quit: true, ..Default::default() },
            ]),
        };
        let mut renderer = NullRenderer::default();

        run_tick_loop(&mut world, &mut input, &mut renderer, 1.0 / 60.0);
        // Reaching this line at all is the assertion: a non-terminating loop would hang the test.
    }

    #[test]
    fn noclip_toggle_flips_player_state() {
        let map = empty_map();
        let player = Player::spawn(Vector3::new(0.0, 0.0, 0.0), 0.0);
        let mut world = World::new(map, player);
        let mut input = ScriptedInput {
            ticks: std::collections::VecDeque::from(vec![
                HostTick { noclip_toggle: true, ..Default::default() },
                HostTick { quit: true, ..Default::default() },
            ]),
        };
        let mut renderer = NullRenderer::default();

        run_tick_loop(&mut world, &mut input, &mut renderer, 1.0 / 60.0);
        assert!(world.player.noclip);
    }

    #[test]
    fn wishlook_rotates_camera_yaw() {
        let map = empty_map();
        let player = Player::spawn(Vector3::new(0.0, 0.0, 0.0), 0.0);
        let mut world = World::new(map, player);
        let mut input = ScriptedInput {
            ticks: std::collections::VecDeque::from(vec![
                HostTick { wishlook: (100.0, 0.0), ..Default::default() },
                HostTick { quit: true, ..Default::default() },
            ]),
        };
        let mut renderer = NullRenderer::default();

        run_tick_loop(&mut world, &mut input, &mut renderer, 1.0 / 60.0);
        assert!((world.player.angles.yaw - 0.2).abs() < 1e-4);
    }
}
