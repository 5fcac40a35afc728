// =============================================================================
// vFrame - Vulkan presentation demo
// =============================================================================
//
// FRAME FLOW (per draw_frame call):
// 1. Wait for this frame slot's fence
// 2. Acquire swapchain image
// 3. Wait for whichever frame still owns that image
// 4. Record + submit the clear and strip draw
// 5. Present, rebuilding the swapchain if it went stale
//
// =============================================================================

use anyhow::{Context, Result};
use log::LevelFilter;
use vframe::{app, Application, Config};

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vFrame");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let mut demo = Demo::default();
    app::run(&mut demo, &config).context("Renderer failed")?;

    log::info!("Exited after {} updates", demo.updates);
    Ok(())
}

/// RUST_LOG still wins over the configured level
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let level = config
        .debug
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.init();
}

#[derive(Default)]
struct Demo {
    updates: u64,
    elapsed: f32,
}

impl Application for Demo {
    fn on_start(&mut self) {
        log::info!("Demo started");
    }

    fn on_update(&mut self, delta: f32) {
        self.updates += 1;
        self.elapsed += delta;
        if self.updates % 600 == 0 {
            log::debug!("{} updates, {:.1}s", self.updates, self.elapsed);
        }
    }
}
