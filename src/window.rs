// Window system boundary
//
// The presentation core only needs the native handles, the framebuffer size
// and a resize notification. Event pumping is non-blocking and driven by the
// owning run loop; nothing here ever waits for events.

use std::time::Duration;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::raw_window_handle_05::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::WindowConfig;
use crate::error::{FrameError, FrameResult};

/// How many non-blocking pumps we allow before giving up on window creation
const WINDOW_CREATION_PUMPS: usize = 200;

/// What the presentation core and the run loop need from a native window.
pub trait WindowSystem {
    fn raw_display_handle(&self) -> RawDisplayHandle;
    fn raw_window_handle(&self) -> RawWindowHandle;

    /// Current drawable size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    fn should_close(&self) -> bool;

    /// Process pending events without blocking
    fn poll_events(&mut self);

    /// Block for up to `timeout` until events arrive, then process them
    fn wait_events(&mut self, timeout: Duration);

    /// Latest size reported since the previous call, if any
    fn take_resize(&mut self) -> Option<(u32, u32)>;

    fn set_title(&self, title: &str);
}

/// Event state collected while pumping
struct WindowEvents {
    attributes: Option<WindowAttributes>,
    created: Option<Result<Window, winit::error::OsError>>,
    close_requested: bool,
    resized: Option<PhysicalSize<u32>>,
}

impl ApplicationHandler for WindowEvents {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Resumed may fire more than once; only the first creates the window
        if let Some(attributes) = self.attributes.take() {
            self.created = Some(event_loop.create_window(attributes));
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = Some(size);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, closing");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

/// winit-backed window driven by `pump_app_events`.
pub struct WinitWindow {
    // Field order matters: the window must go before its event loop
    window: Window,
    events: WindowEvents,
    event_loop: EventLoop<()>,
}

impl WinitWindow {
    pub fn open(config: &WindowConfig) -> FrameResult<Self> {
        log::info!("Opening window '{}' ({}x{})", config.title, config.width, config.height);

        let mut event_loop = EventLoop::new().map_err(|e| FrameError::Window(e.to_string()))?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let mut events = WindowEvents {
            attributes: Some(attributes),
            created: None,
            close_requested: false,
            resized: None,
        };

        for _ in 0..WINDOW_CREATION_PUMPS {
            if events.created.is_some() {
                break;
            }
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::from_millis(5)), &mut events)
            {
                return Err(FrameError::Window(format!(
                    "event loop exited with code {} before the window was created",
                    code
                )));
            }
        }

        let window = events
            .created
            .take()
            .ok_or_else(|| FrameError::Window("window was never created".to_string()))?
            .map_err(|e| FrameError::Window(e.to_string()))?;

        // Creation-time size is already what framebuffer_size() reports
        events.resized = None;

        Ok(Self {
            window,
            events,
            event_loop,
        })
    }
}

impl WindowSystem for WinitWindow {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.window.raw_display_handle()
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        self.window.raw_window_handle()
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn should_close(&self) -> bool {
        self.events.close_requested
    }

    fn poll_events(&mut self) {
        self.wait_events(Duration::ZERO);
    }

    fn wait_events(&mut self, timeout: Duration) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(Some(timeout), &mut self.events) {
            self.events.close_requested = true;
        }
    }

    fn take_resize(&mut self) -> Option<(u32, u32)> {
        self.events
            .resized
            .take()
            .map(|size| (size.width, size.height))
    }

    fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }
}
