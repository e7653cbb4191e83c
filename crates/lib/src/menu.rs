//! Context menu placement and triggering.
//!
//! The menu opens on secondary-click or a sustained press, and is positioned
//! against a fixed assumed footprint so its bounding box never leaves the
//! viewport. Dismissal (outside click, list scroll, item selection) is an
//! event the owning view reports via [`ContextMenuState::dismiss`].

use crate::model::MessageId;
use std::time::{Duration, Instant};

/// Assumed menu width for clamping.
pub const MENU_WIDTH: f32 = 160.0;

/// Assumed height of one menu item.
pub const MENU_ITEM_HEIGHT: f32 = 40.0;

/// Gap kept between a clamped menu and the viewport edge.
pub const VIEWPORT_MARGIN: f32 = 10.0;

/// Minimum hold time before a press opens the menu; releasing earlier cancels.
pub const LONG_PRESS: Duration = Duration::from_millis(600);

/// Clamp a trigger coordinate so a `menu_w` x `menu_h` box stays inside a
/// `viewport_w` x `viewport_h` viewport. Axes clamp independently; a
/// coordinate at or beyond the far edge lands `VIEWPORT_MARGIN` inside it.
pub fn clamp_position(
    x: f32,
    y: f32,
    menu_w: f32,
    menu_h: f32,
    viewport_w: f32,
    viewport_h: f32,
) -> (f32, f32) {
    let x = if x + menu_w > viewport_w {
        viewport_w - menu_w - VIEWPORT_MARGIN
    } else {
        x
    };
    let y = if y + menu_h > viewport_h {
        viewport_h - menu_h - VIEWPORT_MARGIN
    } else {
        y
    };
    (x.max(0.0), y.max(0.0))
}

/// Footprint of a menu with `items` entries.
pub fn menu_size(items: usize) -> (f32, f32) {
    (MENU_WIDTH, MENU_ITEM_HEIGHT * items as f32)
}

/// Open/closed state of one context menu: the targeted message and the
/// clamped position it was opened at.
#[derive(Debug, Default)]
pub struct ContextMenuState {
    open: Option<(MessageId, (f32, f32))>,
}

impl ContextMenuState {
    /// Open on `target` at the trigger coordinate, clamped for a menu with
    /// `items` entries inside `viewport`.
    pub fn open_at(
        &mut self,
        target: MessageId,
        x: f32,
        y: f32,
        items: usize,
        viewport: (f32, f32),
    ) {
        let (menu_w, menu_h) = menu_size(items);
        let pos = clamp_position(x, y, menu_w, menu_h, viewport.0, viewport.1);
        self.open = Some((target, pos));
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn target(&self) -> Option<&MessageId> {
        self.open.as_ref().map(|(id, _)| id)
    }

    pub fn position(&self) -> Option<(f32, f32)> {
        self.open.as_ref().map(|(_, pos)| *pos)
    }

    /// Close the menu (outside click, list scroll, or item selection).
    pub fn dismiss(&mut self) {
        self.open = None;
    }
}

/// Tracks a sustained primary press on a message. Instants are passed in so
/// callers (and tests) control the clock.
#[derive(Debug, Default)]
pub struct PressTracker {
    press: Option<(MessageId, Instant, (f32, f32))>,
}

impl PressTracker {
    /// Record a press starting on `target` at `pos`. A press on a different
    /// target replaces the current one.
    pub fn press(&mut self, target: MessageId, at: Instant, pos: (f32, f32)) {
        match &self.press {
            Some((current, _, _)) if *current == target => {}
            _ => self.press = Some((target, at, pos)),
        }
    }

    pub fn is_pressing(&self, target: &str) -> bool {
        matches!(&self.press, Some((id, _, _)) if id.as_str() == target)
    }

    /// End the press. Returns the target and trigger position when the hold
    /// lasted at least [`LONG_PRESS`]; a shorter hold cancels.
    pub fn release(&mut self, now: Instant) -> Option<(MessageId, (f32, f32))> {
        let (target, started, pos) = self.press.take()?;
        if now.duration_since(started) >= LONG_PRESS {
            Some((target, pos))
        } else {
            None
        }
    }

    /// Abandon the press without opening anything.
    pub fn cancel(&mut self) {
        self.press = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_unchanged_when_the_menu_fits() {
        assert_eq!(clamp_position(100.0, 100.0, 160.0, 80.0, 800.0, 600.0), (100.0, 100.0));
    }

    #[test]
    fn overflow_clamps_each_axis_independently() {
        let (x, y) = clamp_position(790.0, 100.0, 160.0, 80.0, 800.0, 600.0);
        assert_eq!((x, y), (800.0 - 160.0 - VIEWPORT_MARGIN, 100.0));
        let (x, y) = clamp_position(100.0, 590.0, 160.0, 80.0, 800.0, 600.0);
        assert_eq!((x, y), (100.0, 600.0 - 80.0 - VIEWPORT_MARGIN));
    }

    #[test]
    fn coordinates_beyond_the_far_edge_stay_inside() {
        let (x, y) = clamp_position(2000.0, 2000.0, 160.0, 80.0, 800.0, 600.0);
        assert!(x + 160.0 <= 800.0);
        assert!(y + 80.0 <= 600.0);
        assert!(x >= 0.0 && y >= 0.0);
    }

    #[test]
    fn tiny_viewport_never_goes_negative() {
        let (x, y) = clamp_position(50.0, 50.0, 160.0, 80.0, 100.0, 60.0);
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn open_at_stores_the_clamped_position() {
        let mut menu = ContextMenuState::default();
        menu.open_at("m1".to_string(), 795.0, 10.0, 2, (800.0, 600.0));
        assert!(menu.is_open());
        assert_eq!(menu.target().map(String::as_str), Some("m1"));
        let (x, _) = menu.position().unwrap();
        assert_eq!(x, 800.0 - MENU_WIDTH - VIEWPORT_MARGIN);
        menu.dismiss();
        assert!(!menu.is_open());
    }

    #[test]
    fn short_press_cancels_long_press_opens() {
        let mut tracker = PressTracker::default();
        let start = Instant::now();
        tracker.press("m1".to_string(), start, (10.0, 20.0));
        assert!(tracker.is_pressing("m1"));
        assert_eq!(tracker.release(start + Duration::from_millis(200)), None);

        tracker.press("m1".to_string(), start, (10.0, 20.0));
        let released = tracker.release(start + LONG_PRESS);
        assert_eq!(released, Some(("m1".to_string(), (10.0, 20.0))));
        assert!(!tracker.is_pressing("m1"));
    }

    #[test]
    fn repeated_press_on_the_same_target_keeps_the_original_start() {
        let mut tracker = PressTracker::default();
        let start = Instant::now();
        tracker.press("m1".to_string(), start, (0.0, 0.0));
        tracker.press("m1".to_string(), start + Duration::from_millis(500), (0.0, 0.0));
        assert!(tracker.release(start + LONG_PRESS).is_some());
    }
}
