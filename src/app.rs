// Owning run loop
//
// Opens the window, brings up the presentation engine and then alternates
// event polling, application update and draw_frame until the window asks to
// close. The close flag is the only cancellation point. While nothing can be
// drawn the loop blocks on window events instead of spinning.

use std::time::{Duration, Instant};

use crate::backend::shader::ShaderSource;
use crate::config::Config;
use crate::context::VulkanContext;
use crate::error::FrameResult;
use crate::frame::FrameOutcome;
use crate::window::{WindowSystem, WinitWindow};

/// Hooks called by [`run`]
pub trait Application {
    fn on_start(&mut self) {}

    /// `delta` is the time since the previous update in seconds
    fn on_update(&mut self, _delta: f32) {}
}

/// Frame rate over the last reporting window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsSample {
    pub fps: f32,
    pub frame_time_ms: f32,
}

/// Counts frames and reports once per interval
pub struct FpsCounter {
    interval: Duration,
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            interval: Duration::from_secs(1),
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a frame finished at `now`
    pub fn tick(&mut self, now: Instant) -> Option<FpsSample> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < self.interval {
            return None;
        }

        let sample = FpsSample {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_time_ms: frame_time * 1000.0,
        };
        self.frame_count = 0;
        self.last_report = now;
        Some(sample)
    }
}

/// How long to block on window events when there was nothing to draw
pub const IDLE_WAIT: Duration = Duration::from_millis(16);

/// The frame-producing side of the run loop
pub trait FrameSink {
    fn notify_resized(&mut self, width: u32, height: u32);
    fn draw_frame(&mut self) -> FrameResult<FrameOutcome>;
}

impl FrameSink for VulkanContext {
    fn notify_resized(&mut self, width: u32, height: u32) {
        VulkanContext::notify_resized(self, width, height);
    }

    fn draw_frame(&mut self) -> FrameResult<FrameOutcome> {
        VulkanContext::draw_frame(self)
    }
}

/// Run `app` in a new window until it is closed
pub fn run<A: Application>(app: &mut A, config: &Config) -> FrameResult<()> {
    let mut window = WinitWindow::open(&config.window)?;
    let shaders = ShaderSource::load(&config.shaders)?;
    let mut context = VulkanContext::init(&window, config, shaders)?;

    log::info!("Rendering on {}", context.device_name());

    app.on_start();
    let presented = drive(&mut window, &mut context, app, config)?;

    log::info!("Window closed after {} frames, shutting down", presented);
    context.teardown();
    Ok(())
}

/// Poll, update and draw until the window asks to close.
///
/// Returns the number of presented frames. A skipped frame (minimized
/// window) blocks on events for up to [`IDLE_WAIT`] instead of spinning.
pub fn drive<W, S, A>(
    window: &mut W,
    sink: &mut S,
    app: &mut A,
    config: &Config,
) -> FrameResult<u64>
where
    W: WindowSystem,
    S: FrameSink,
    A: Application,
{
    let start = Instant::now();
    let mut last_update = start;
    let mut fps = FpsCounter::new(start);
    let mut presented = 0;

    loop {
        if window.should_close() {
            break;
        }

        window.poll_events();
        if let Some((width, height)) = window.take_resize() {
            sink.notify_resized(width, height);
        }

        let now = Instant::now();
        app.on_update(now.duration_since(last_update).as_secs_f32());
        last_update = now;

        match sink.draw_frame()? {
            FrameOutcome::Skipped => window.wait_events(IDLE_WAIT),
            FrameOutcome::Presented { .. } | FrameOutcome::PresentedStale { .. } => {
                presented += 1;
                if config.debug.show_fps {
                    if let Some(sample) = fps.tick(Instant::now()) {
                        log::info!("{:.0} FPS ({:.2}ms)", sample.fps, sample.frame_time_ms);
                        window.set_title(&format!(
                            "{} - {:.0} FPS ({:.2}ms)",
                            config.window.title, sample.fps, sample.frame_time_ms
                        ));
                    }
                }
            }
        }
    }

    Ok(presented)
}
