//! Binary entry point: parse arguments, load a map, spawn the player, and run the tick loop
//! against a headless renderer/input pair, generalizing the "load a map and do one thing with it"
//! shape of a minimal diagnostic binary into a full host shell.

use std::process::exit;

use bspwalk::cli::{self, HostInput, HostTick, NullRenderer};
use bspwalk::common::bsp;
use bspwalk::world::World;

/// A `HostInput` that quits on the very first poll. Stands in for a real window/input backend
/// until one is wired up; exercising the tick loop at all (rather than never calling it) is the
/// point, not driving the player anywhere.
struct HeadlessInput;

impl HostInput for HeadlessInput {
    fn poll(&mut self) -> HostTick {
        HostTick {
            quit: true,
            ..Default::default()
        }
    }
}

fn main() {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let args = match cli::parse_args(argv) {
        Ok(a) => a,
        Err(()) => exit(1),
    };

    if args.flag_help {
        println!("{}", cli::USAGE.trim());
        return;
    }

    let map = match bsp::load(&args.arg_file_bsp) {
        Ok(m) => m,
        Err(why) => {
            eprintln!("couldn't load {}: {}", args.arg_file_bsp, why);
            exit(1);
        }
    };

    log::info!(
        "loaded {} ({} bytes, {} leaves, display={} window={} {}x{} tessellation={})",
        args.arg_file_bsp,
        map.raw_len(),
        map.leaves.len(),
        args.flag_d,
        args.flag_window,
        args.flag_w,
        args.flag_h,
        args.flag_t,
    );

    let player = cli::spawn_player(&map);
    let mut world = World::new(map, player);
    let mut input = HeadlessInput;
    let mut renderer = NullRenderer::default();

    cli::run_tick_loop(&mut world, &mut input, &mut renderer, 1.0 / 60.0);
    exit(0);
}
