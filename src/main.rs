// =============================================================================
// ATOM3D - Minimal Vulkan triangle
// =============================================================================
//
// One window, one pipeline, one draw call of three vertices.
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Record clear + draw into the slot's command buffer
// 4. Submit to the graphics queue
// 5. Present
//
// Usage: atom3d [CONFIG]   (see --help)
// =============================================================================

use anyhow::Result;
use atom3d::app::App;
use atom3d::config::Config;
use clap::Parser;
use std::path::PathBuf;
use winit::event_loop::EventLoop;

/// Minimal Vulkan triangle renderer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file. Must exist when given; otherwise ./config.toml is used if present
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = Config::load(args.config.as_deref())?;

    log::info!("Starting Atom3D");
    log::info!(
        "Window: {}x{}, present mode: {:?}",
        config.window.width,
        config.window.height,
        config.present_mode()
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Init or render failures stop the loop; report them through the exit code
    if let Some(error) = app.take_error() {
        return Err(error);
    }

    log::info!("Exited cleanly");
    Ok(())
}

/// Info by default; RUST_LOG overrides
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn config_path_is_optional() {
        let args = Args::try_parse_from(["atom3d"]).unwrap();
        assert_eq!(args.config, None);

        let args = Args::try_parse_from(["atom3d", "demo.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("demo.toml")));
    }

    #[test]
    fn flags_are_not_taken_as_config_paths() {
        let err = Args::try_parse_from(["atom3d", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Args::try_parse_from(["atom3d", "--fullscreen"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn extra_positionals_are_rejected() {
        assert!(Args::try_parse_from(["atom3d", "a.toml", "b.toml"]).is_err());
    }

    #[test]
    fn args_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
