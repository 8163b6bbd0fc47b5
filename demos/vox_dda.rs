//! Voxel ray-marcher demo
//!
//! Run with:
//!   cargo run --example vox_dda
//!   cargo run --example vox_dda -- --no-accumulation --voxel-size 96
//!
//! Controls:
//!   W/A/S/D, arrows - Move camera
//!   X / Z           - Move up / down
//!   Left Shift      - Boost (10x speed)
//!   Left mouse drag - Look around
//!   R               - Reset camera
//!   Escape          - Exit
//!
//! The shader file is watched; saving it rebuilds the pipeline in place.
//! Set `WGPU_BACKEND` to pick a GPU API and `RUST_LOG` for log verbosity.

use std::path::PathBuf;

use clap::Parser;
use vox_dda::RendererConfig;

/// VOX DDA demo arguments.
#[derive(Parser, Debug)]
#[command(name = "vox_dda", about = "Real-time voxel ray-marcher", version)]
struct Args {
    /// Initial window width in pixels.
    #[arg(long, default_value = "860")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "640")]
    height: u32,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Render each frame from scratch instead of blending with history.
    #[arg(long)]
    no_accumulation: bool,

    /// WGSL shader to load and watch. Defaults to the bundled one.
    #[arg(long)]
    shader: Option<PathBuf>,

    /// Edge length of the generated voxel cube.
    #[arg(
        long,
        default_value = "64",
        value_parser = clap::value_parser!(u32).range(1..=i64::from(vox_dda::voxel::MAX_EDGE))
    )]
    voxel_size: u32,
}

impl From<Args> for RendererConfig {
    fn from(args: Args) -> Self {
        let defaults = RendererConfig::default();
        Self {
            width: args.width,
            height: args.height,
            vsync: !args.no_vsync,
            accumulation: !args.no_accumulation,
            shader_path: args.shader.or(defaults.shader_path),
            voxel_size: args.voxel_size,
            title: defaults.title,
        }
    }
}

fn main() {
    env_logger::init();

    let config = RendererConfig::from(Args::parse());
    log::info!("Starting {} at {}x{}", config.title, config.width, config.height);

    if let Err(err) = vox_dda::run(config) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
