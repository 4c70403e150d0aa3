//! Text selection tracking over the page overlays.
//!
//! The platform selection API sits behind [`SelectionPort`]; the tracker only
//! sees release events and, once the settle delay has passed, one snapshot of
//! the current selection.

use doc_model::{Bbox, InteractionMode, PendingSelection, Point, Settings};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Pointer,
    Touch,
    Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// Page content, including the text overlay.
    Content,
    /// Buttons, inputs and existing annotation elements.
    Chrome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub kind: ReleaseKind,
    pub target: EventTarget,
}

impl ReleaseEvent {
    pub fn on_content(kind: ReleaseKind) -> Self {
        Self { kind, target: EventTarget::Content }
    }
}

/// One element on the path from the selection anchor up to the root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementRole {
    /// A page container; `origin` is its top-left in client space.
    Page { number: u32, origin: Point },
    Other,
}

/// Current platform selection, all geometry in client (viewport) space.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSnapshot {
    pub text: String,
    pub collapsed: bool,
    /// Nearest ancestor first.
    pub anchor_path: Vec<ElementRole>,
    /// One rectangle per visual line.
    pub client_rects: Vec<Bbox>,
    pub bounds: Bbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollContainer {
    pub origin: Point,
    pub scroll: Point,
}

pub trait SelectionPort {
    fn snapshot(&self) -> Option<SelectionSnapshot>;
    fn scroll_container(&self) -> ScrollContainer;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Idle,
    Pending { due: Instant },
    Active(PendingSelection),
}

#[derive(Debug, Clone)]
pub struct SelectionTracker {
    mode: InteractionMode,
    settle: Duration,
    state: SelectionState,
}

impl SelectionTracker {
    pub fn new(settle: Duration) -> Self {
        Self { mode: InteractionMode::Cursor, settle, state: SelectionState::Idle }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Duration::from_millis(settings.selection_settle_ms))
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    /// Entering note placement suspends tracking and drops any pending
    /// selection.
    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.mode = mode;
        if mode == InteractionMode::NotePlacement {
            self.state = SelectionState::Idle;
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        match &self.state {
            SelectionState::Active(selection) => Some(selection),
            _ => None,
        }
    }

    /// Whether the highlight confirmation control should be shown.
    pub fn confirmation_visible(&self) -> bool {
        self.pending().is_some()
    }

    /// Returns whether the event was accepted. Accepted events (re)start the
    /// settle delay.
    pub fn on_release(&mut self, event: &ReleaseEvent, now: Instant) -> bool {
        if self.mode == InteractionMode::NotePlacement {
            trace!(?event, "ignoring release in note placement mode");
            return false;
        }
        if event.target == EventTarget::Chrome {
            trace!(?event, "ignoring release on chrome");
            return false;
        }

        self.state = SelectionState::Pending { due: now + self.settle };
        true
    }

    /// Inspects the platform selection once the settle delay has elapsed.
    pub fn poll(&mut self, now: Instant, port: &dyn SelectionPort) -> Option<&PendingSelection> {
        if let SelectionState::Pending { due } = self.state {
            if now < due {
                return None;
            }
            self.state = match inspect(port) {
                Some(selection) => {
                    debug!(
                        page = selection.page,
                        lines = selection.line_rects.len(),
                        "selection pending confirmation"
                    );
                    SelectionState::Active(selection)
                }
                None => SelectionState::Idle,
            };
        }

        self.pending()
    }

    /// Hands the pending selection over for highlight creation.
    pub fn take_for_confirmation(&mut self) -> Option<PendingSelection> {
        match std::mem::replace(&mut self.state, SelectionState::Idle) {
            SelectionState::Active(selection) => Some(selection),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Selection lost or focus returned to idle.
    pub fn cancel(&mut self) {
        self.state = SelectionState::Idle;
    }

    /// Page-relative position for a click in note placement mode.
    pub fn place_note_at(&self, click: Point, page_origin: Point) -> Option<Point> {
        if self.mode != InteractionMode::NotePlacement {
            return None;
        }
        Some(Point::new(click.x - page_origin.x, click.y - page_origin.y))
    }
}

fn inspect(port: &dyn SelectionPort) -> Option<PendingSelection> {
    let snapshot = port.snapshot()?;
    let text = snapshot.text.trim();
    if snapshot.collapsed || text.is_empty() {
        return None;
    }

    let (page, origin) = snapshot.anchor_path.iter().find_map(|role| match role {
        ElementRole::Page { number, origin } => Some((*number, *origin)),
        ElementRole::Other => None,
    })?;

    let line_rects: Vec<Bbox> = snapshot
        .client_rects
        .iter()
        .filter(|rect| !rect.is_empty())
        .map(|rect| rect.translated(-origin.x, -origin.y))
        .collect();
    if line_rects.is_empty() {
        return None;
    }

    let container = port.scroll_container();
    let bounds = snapshot.bounds;
    let anchor = Point::new(
        bounds.x + bounds.width / 2.0 - container.origin.x + container.scroll.x,
        bounds.y - container.origin.y + container.scroll.y,
    );

    Some(PendingSelection { page, text: text.to_owned(), line_rects, anchor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakePort {
        snapshot: RefCell<Option<SelectionSnapshot>>,
        container: ScrollContainer,
    }

    impl FakePort {
        fn selecting(snapshot: SelectionSnapshot) -> Self {
            Self { snapshot: RefCell::new(Some(snapshot)), ..Self::default() }
        }
    }

    impl SelectionPort for FakePort {
        fn snapshot(&self) -> Option<SelectionSnapshot> {
            self.snapshot.borrow().clone()
        }

        fn scroll_container(&self) -> ScrollContainer {
            self.container
        }
    }

    fn two_line_selection() -> SelectionSnapshot {
        SelectionSnapshot {
            text: "  quick brown\nfox  ".to_owned(),
            collapsed: false,
            anchor_path: vec![
                ElementRole::Other,
                ElementRole::Page { number: 2, origin: Point::new(40.0, 1100.0) },
                ElementRole::Other,
            ],
            client_rects: vec![
                Bbox::new(140.0, 1150.0, 200.0, 20.0),
                Bbox::new(140.0, 1172.0, 0.0, 20.0),
                Bbox::new(140.0, 1172.0, 60.0, 20.0),
            ],
            bounds: Bbox::new(140.0, 1150.0, 200.0, 42.0),
        }
    }

    fn tracker() -> SelectionTracker {
        SelectionTracker::new(Duration::from_millis(50))
    }

    fn release() -> ReleaseEvent {
        ReleaseEvent::on_content(ReleaseKind::Pointer)
    }

    #[test]
    fn selection_waits_for_settle_delay() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();

        assert!(tracker.on_release(&release(), start));
        assert!(tracker.poll(start + Duration::from_millis(10), &port).is_none());
        assert!(matches!(tracker.state(), SelectionState::Pending { .. }));

        assert!(tracker.poll(start + Duration::from_millis(50), &port).is_some());
        assert!(tracker.confirmation_visible());
    }

    #[test]
    fn line_rects_become_page_relative() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();

        tracker.on_release(&release(), start);
        let selection = tracker.poll(start + Duration::from_millis(60), &port).expect("selection");

        assert_eq!(selection.page, 2);
        assert_eq!(selection.text, "quick brown\nfox");
        assert_eq!(
            selection.line_rects,
            vec![Bbox::new(100.0, 50.0, 200.0, 20.0), Bbox::new(100.0, 72.0, 60.0, 20.0)]
        );
    }

    #[test]
    fn anchor_tracks_scroll_offset() {
        let port = FakePort {
            container: ScrollContainer {
                origin: Point::new(0.0, 60.0),
                scroll: Point::new(0.0, 1000.0),
            },
            ..FakePort::selecting(two_line_selection())
        };
        let mut tracker = tracker();
        let start = Instant::now();

        tracker.on_release(&release(), start);
        let selection = tracker.poll(start + Duration::from_millis(60), &port).expect("selection");

        assert_eq!(selection.anchor, Point::new(240.0, 1150.0 - 60.0 + 1000.0));
    }

    #[test]
    fn collapsed_or_blank_selection_returns_to_idle() {
        let mut collapsed = two_line_selection();
        collapsed.collapsed = true;
        let mut blank = two_line_selection();
        blank.text = " \n ".to_owned();

        for snapshot in [collapsed, blank] {
            let port = FakePort::selecting(snapshot);
            let mut tracker = tracker();
            let start = Instant::now();

            tracker.on_release(&release(), start);
            assert!(tracker.poll(start + Duration::from_millis(60), &port).is_none());
            assert_eq!(tracker.state(), &SelectionState::Idle);
        }
    }

    #[test]
    fn selection_outside_a_page_is_ignored() {
        let mut snapshot = two_line_selection();
        snapshot.anchor_path = vec![ElementRole::Other];
        let port = FakePort::selecting(snapshot);
        let mut tracker = tracker();
        let start = Instant::now();

        tracker.on_release(&release(), start);
        assert!(tracker.poll(start + Duration::from_millis(60), &port).is_none());
    }

    #[test]
    fn chrome_events_do_not_reset_pending_selection() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.on_release(&release(), start);
        tracker.poll(start + Duration::from_millis(60), &port);

        let click = ReleaseEvent { kind: ReleaseKind::Pointer, target: EventTarget::Chrome };
        assert!(!tracker.on_release(&click, start + Duration::from_millis(100)));
        assert!(tracker.pending().is_some());
    }

    #[test]
    fn note_placement_suspends_tracking() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.on_release(&release(), start);
        tracker.poll(start + Duration::from_millis(60), &port);

        tracker.set_mode(InteractionMode::NotePlacement);
        assert!(tracker.pending().is_none());
        assert!(!tracker.on_release(&ReleaseEvent::on_content(ReleaseKind::Key), start));
        assert!(tracker.poll(start + Duration::from_secs(1), &port).is_none());

        let spot = tracker.place_note_at(Point::new(300.0, 1200.0), Point::new(40.0, 1100.0));
        assert_eq!(spot, Some(Point::new(260.0, 100.0)));
    }

    #[test]
    fn note_placement_requires_note_mode() {
        assert_eq!(tracker().place_note_at(Point::new(1.0, 1.0), Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn confirmation_consumes_selection() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.on_release(&release(), start);
        tracker.poll(start + Duration::from_millis(60), &port);

        let selection = tracker.take_for_confirmation().expect("selection to confirm");
        assert_eq!(selection.line_rects.len(), 2);
        assert!(tracker.take_for_confirmation().is_none());
        assert!(!tracker.confirmation_visible());
    }

    #[test]
    fn later_selection_loss_clears_pending() {
        let port = FakePort::selecting(two_line_selection());
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.on_release(&release(), start);
        tracker.poll(start + Duration::from_millis(60), &port);

        port.snapshot.replace(None);
        tracker.on_release(&release(), start + Duration::from_millis(200));
        tracker.poll(start + Duration::from_millis(260), &port);

        assert_eq!(tracker.state(), &SelectionState::Idle);
    }
}
