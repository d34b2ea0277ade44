//! Windowing and the update thread.
//!
//! The engine only needs four things from a window: its client size, a way
//! to pump native events, resize notifications and whether it should close.
//! Window operations happen on the main thread, so [`WindowHost`] is not
//! `Send`.

pub mod update_loop;

#[cfg(feature = "vulkan")]
pub mod glfw_window;

use std::collections::VecDeque;

use crate::render::device::Extent;

pub use update_loop::{TickRegistry, UpdateLoop};

/// Window the engine presents into
pub trait WindowHost {
    /// Current drawable size in pixels
    fn client_dimensions(&self) -> Extent;

    /// Process pending native events
    fn poll_events(&mut self);

    /// Latest size change since the previous call, if any
    fn take_resize(&mut self) -> Option<Extent>;

    /// Whether the user or the application asked to close
    fn should_close(&self) -> bool;

    /// Ask the window to close after the current frame
    fn request_close(&mut self);
}

/// Window without a native surface, driven by a script of frames.
///
/// Each `poll_events` call consumes one frame; queued resizes are reported
/// on the frame they were scheduled for and the window asks to close after
/// `frames` polls.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    size: Extent,
    frames_left: Option<u64>,
    scheduled: VecDeque<(u64, Extent)>,
    polled: u64,
    pending_resize: Option<Extent>,
    close_requested: bool,
}

impl HeadlessWindow {
    /// Window of `size` that never closes on its own
    pub fn new(size: Extent) -> Self {
        Self {
            size,
            frames_left: None,
            scheduled: VecDeque::new(),
            polled: 0,
            pending_resize: None,
            close_requested: false,
        }
    }

    /// Close after `frames` polls
    pub fn closing_after(mut self, frames: u64) -> Self {
        self.frames_left = Some(frames);
        self
    }

    /// Report a resize to `size` on poll number `frame` (1-based)
    pub fn resize_at(mut self, frame: u64, size: Extent) -> Self {
        self.scheduled.push_back((frame, size));
        self
    }

    /// Number of polls so far
    pub fn polled(&self) -> u64 {
        self.polled
    }
}

impl WindowHost for HeadlessWindow {
    fn client_dimensions(&self) -> Extent {
        self.size
    }

    fn poll_events(&mut self) {
        self.polled += 1;
        while let Some(&(frame, size)) = self.scheduled.front() {
            if frame > self.polled {
                break;
            }
            self.scheduled.pop_front();
            self.size = size;
            self.pending_resize = Some(size);
        }
        if let Some(left) = self.frames_left.as_mut() {
            *left = left.saturating_sub(1);
        }
    }

    fn take_resize(&mut self) -> Option<Extent> {
        self.pending_resize.take()
    }

    fn should_close(&self) -> bool {
        self.close_requested || self.frames_left == Some(0)
    }

    fn request_close(&mut self) {
        self.close_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_resizes_are_reported_once() {
        let mut window = HeadlessWindow::new(Extent::new(750, 450)).resize_at(2, Extent::new(100, 50));
        window.poll_events();
        assert_eq!(window.take_resize(), None);
        window.poll_events();
        assert_eq!(window.take_resize(), Some(Extent::new(100, 50)));
        assert_eq!(window.take_resize(), None);
        assert_eq!(window.client_dimensions(), Extent::new(100, 50));
    }

    #[test]
    fn closes_after_the_scripted_frame_count() {
        let mut window = HeadlessWindow::new(Extent::new(1, 1)).closing_after(2);
        assert!(!window.should_close());
        window.poll_events();
        assert!(!window.should_close());
        window.poll_events();
        assert!(window.should_close());

        let mut window = HeadlessWindow::new(Extent::new(1, 1));
        window.request_close();
        assert!(window.should_close());
    }
}
