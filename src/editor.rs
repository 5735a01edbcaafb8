//! Interactive zone/line drawing.
//!
//! The editor is a single tagged state so that "armed a zone while dragging a
//! line" and similar combinations cannot be represented:
//!
//! ```text
//! Idle -> ZoneArmed(id) -> ZoneDragging(id, rect) -> Idle (draft | rejected | cancelled)
//! Idle -> LineArmed(name) -> LineDragging(name, seg) -> Idle (draft | rejected | cancelled)
//! ```
//!
//! Releasing the pointer yields a [`Draft`]; the session maps it to sensor
//! space, sends it, and only then calls [`ZoneLineEditor::commit`]. All
//! coordinates here are display pixels.

use std::collections::BTreeMap;

use crate::command::Command;
use crate::coords::{CoordinateMapper, Point, Size};
use crate::error::ConsoleError;

pub const MIN_ZONE_ID: u8 = 1;
pub const MAX_ZONE_ID: u8 = 5;
pub const MIN_ZONE_SIDE: f64 = 20.0;
pub const MIN_LINE_LENGTH: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x1: a.x,
            y1: a.y,
            x2: b.x,
            y2: b.y,
        }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x1.min(self.x2), self.y1.min(self.y2))
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x1.max(self.x2), self.y1.max(self.y2))
    }

    /// Same rectangle with `(x1, y1)` as the top-left corner.
    pub fn normalized(&self) -> Self {
        Self::from_corners(self.top_left(), self.bottom_right())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub fn length(&self) -> f64 {
        self.start.distance_to(self.end)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum EditorState {
    #[default]
    Idle,
    ZoneArmed(u8),
    ZoneDragging { id: u8, rect: Rect },
    LineArmed(String),
    LineDragging { name: String, segment: Segment },
}

impl EditorState {
    pub fn is_dragging(&self) -> bool {
        matches!(self, Self::ZoneDragging { .. } | Self::LineDragging { .. })
    }
}

/// A validated shape that has not been sent yet.
#[derive(Clone, Debug, PartialEq)]
pub enum Draft {
    Zone { id: u8, rect: Rect },
    Line { name: String, segment: Segment },
}

impl Draft {
    /// Map every vertex to sensor space and build the matching set command.
    pub fn to_command(&self, camera_id: &str, mapper: &CoordinateMapper) -> Command {
        match self {
            Self::Zone { id, rect } => Command::SetZone {
                camera_id: camera_id.to_string(),
                zone: *id,
                top_left: mapper.to_sensor(rect.top_left()),
                bottom_right: mapper.to_sensor(rect.bottom_right()),
            },
            Self::Line { name, segment } => Command::SetLine {
                camera_id: camera_id.to_string(),
                line_name: name.clone(),
                start: mapper.to_sensor(segment.start),
                end: mapper.to_sensor(segment.end),
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ZoneLineEditor {
    state: EditorState,
    bounds: Option<Size>,
    zones: BTreeMap<u8, Rect>,
    lines: BTreeMap<String, Segment>,
}

impl ZoneLineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn zones(&self) -> &BTreeMap<u8, Rect> {
        &self.zones
    }

    pub fn lines(&self) -> &BTreeMap<String, Segment> {
        &self.lines
    }

    pub fn has_zone(&self, id: u8) -> bool {
        self.zones.contains_key(&id)
    }

    pub fn has_line(&self, name: &str) -> bool {
        self.lines.contains_key(name)
    }

    /// Drawing surface size; `None` until the snapshot has loaded.
    pub fn set_bounds(&mut self, bounds: Option<Size>) {
        self.bounds = bounds;
        if bounds.is_none() && self.state.is_dragging() {
            self.state = EditorState::Idle;
        }
    }

    pub fn arm_zone(&mut self, id: u8) -> Result<(), ConsoleError> {
        if !(MIN_ZONE_ID..=MAX_ZONE_ID).contains(&id) {
            return Err(ConsoleError::ZoneIdOutOfRange(id));
        }
        if self.has_zone(id) {
            return Err(ConsoleError::DuplicateZone(id));
        }
        self.state = EditorState::ZoneArmed(id);
        Ok(())
    }

    pub fn arm_line(&mut self, name: &str) -> Result<(), ConsoleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConsoleError::EmptyLineName);
        }
        if self.has_line(name) {
            return Err(ConsoleError::DuplicateLine(name.to_string()));
        }
        self.state = EditorState::LineArmed(name.to_string());
        Ok(())
    }

    pub fn pointer_down(&mut self, p: Point) -> Result<(), ConsoleError> {
        let bounds = self.bounds.ok_or(ConsoleError::ImageNotLoaded)?;
        if !p.is_finite() {
            return Err(ConsoleError::InvalidState("pointer coordinates must be finite"));
        }
        let p = bounds.clamp(p);
        self.state = match std::mem::take(&mut self.state) {
            EditorState::ZoneArmed(id) => EditorState::ZoneDragging {
                id,
                rect: Rect::from_corners(p, p),
            },
            EditorState::LineArmed(name) => EditorState::LineDragging {
                name,
                segment: Segment { start: p, end: p },
            },
            other => {
                self.state = other;
                return Err(ConsoleError::InvalidState("arm a zone or line before drawing"));
            }
        };
        Ok(())
    }

    /// Non-finite positions are ignored; the drag keeps its last point.
    pub fn pointer_move(&mut self, p: Point) {
        let Some(bounds) = self.bounds else {
            return;
        };
        if !p.is_finite() {
            return;
        }
        let p = bounds.clamp(p);
        match &mut self.state {
            EditorState::ZoneDragging { rect, .. } => {
                rect.x2 = p.x;
                rect.y2 = p.y;
            }
            EditorState::LineDragging { segment, .. } => segment.end = p,
            _ => {}
        }
    }

    /// Finish the drag. Undersized shapes are rejected and nothing is added;
    /// either way the editor returns to `Idle`.
    pub fn pointer_up(&mut self) -> Result<Option<Draft>, ConsoleError> {
        match std::mem::take(&mut self.state) {
            EditorState::ZoneDragging { id, rect } => {
                if !(rect.width() >= MIN_ZONE_SIDE && rect.height() >= MIN_ZONE_SIDE) {
                    return Err(ConsoleError::ZoneTooSmall {
                        width: rect.width(),
                        height: rect.height(),
                    });
                }
                Ok(Some(Draft::Zone {
                    id,
                    rect: rect.normalized(),
                }))
            }
            EditorState::LineDragging { name, segment } => {
                let length = segment.length();
                if !(length >= MIN_LINE_LENGTH) {
                    return Err(ConsoleError::LineTooShort { length });
                }
                Ok(Some(Draft::Line { name, segment }))
            }
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// Pointer left the surface: drop the in-progress shape only.
    pub fn pointer_leave(&mut self) -> bool {
        if self.state.is_dragging() {
            log::debug!("drag cancelled: pointer left the drawing surface");
            self.state = EditorState::Idle;
            return true;
        }
        false
    }

    /// Drop whatever is armed or being drawn.
    pub fn discard(&mut self) {
        self.state = EditorState::Idle;
    }

    pub fn commit(&mut self, draft: Draft) -> Result<(), ConsoleError> {
        match draft {
            Draft::Zone { id, rect } => {
                if self.has_zone(id) {
                    return Err(ConsoleError::DuplicateZone(id));
                }
                self.zones.insert(id, rect);
            }
            Draft::Line { name, segment } => {
                if self.has_line(&name) {
                    return Err(ConsoleError::DuplicateLine(name));
                }
                self.lines.insert(name, segment);
            }
        }
        Ok(())
    }

    pub fn remove_zone(&mut self, id: u8) -> Option<Rect> {
        self.zones.remove(&id)
    }

    pub fn remove_line(&mut self, name: &str) -> Option<Segment> {
        self.lines.remove(name)
    }

    /// Clear the edit surface entirely (camera switch).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::ImageGeometry;

    fn editor() -> ZoneLineEditor {
        let mut editor = ZoneLineEditor::new();
        editor.set_bounds(Some(Size::new(800.0, 600.0)));
        editor
    }

    fn drag(editor: &mut ZoneLineEditor, from: (f64, f64), to: (f64, f64)) -> Result<Option<Draft>, ConsoleError> {
        editor.pointer_down(Point::new(from.0, from.1))?;
        editor.pointer_move(Point::new(to.0, to.1));
        editor.pointer_up()
    }

    #[test]
    fn non_finite_pointer_cannot_produce_a_shape() {
        let mut ed = editor();
        ed.arm_zone(1).unwrap();
        assert_eq!(
            ed.pointer_down(Point::new(f64::NAN, f64::NAN)),
            Err(ConsoleError::InvalidState("pointer coordinates must be finite"))
        );
        assert_eq!(ed.state(), &EditorState::ZoneArmed(1));

        ed.pointer_down(Point::new(100.0, 100.0)).unwrap();
        ed.pointer_move(Point::new(f64::NAN, 300.0));
        assert!(matches!(
            ed.pointer_up(),
            Err(ConsoleError::ZoneTooSmall { .. })
        ));

        ed.arm_line("door").unwrap();
        ed.pointer_down(Point::new(10.0, 10.0)).unwrap();
        ed.pointer_move(Point::new(f64::INFINITY, f64::NAN));
        assert!(matches!(
            ed.pointer_up(),
            Err(ConsoleError::LineTooShort { .. })
        ));
        assert!(ed.zones().is_empty());
        assert!(ed.lines().is_empty());
    }

    #[test]
    fn zone_commits_at_minimum_size() {
        let mut ed = editor();
        ed.arm_zone(1).unwrap();
        let draft = drag(&mut ed, (100.0, 100.0), (120.0, 120.0)).unwrap().unwrap();
        ed.commit(draft).unwrap();
        assert!(ed.has_zone(1));
        assert_eq!(ed.state(), &EditorState::Idle);
    }

    #[test]
    fn undersized_zone_is_rejected() {
        let mut ed = editor();
        ed.arm_zone(2).unwrap();
        let err = drag(&mut ed, (10.0, 10.0), (10.0, 10.0)).unwrap_err();
        assert!(matches!(err, ConsoleError::ZoneTooSmall { .. }));
        assert_eq!(ed.state(), &EditorState::Idle);
        assert!(ed.zones().is_empty());

        ed.arm_zone(2).unwrap();
        assert!(drag(&mut ed, (10.0, 10.0), (100.0, 29.0)).is_err());
    }

    #[test]
    fn zone_ids_are_range_checked_and_unique() {
        let mut ed = editor();
        assert_eq!(ed.arm_zone(0), Err(ConsoleError::ZoneIdOutOfRange(0)));
        assert_eq!(ed.arm_zone(6), Err(ConsoleError::ZoneIdOutOfRange(6)));
        ed.arm_zone(3).unwrap();
        let draft = drag(&mut ed, (0.0, 0.0), (50.0, 50.0)).unwrap().unwrap();
        ed.commit(draft).unwrap();
        assert_eq!(ed.arm_zone(3), Err(ConsoleError::DuplicateZone(3)));
    }

    #[test]
    fn line_requires_name_and_length() {
        let mut ed = editor();
        assert_eq!(ed.arm_line("  "), Err(ConsoleError::EmptyLineName));
        ed.arm_line("door").unwrap();
        let err = drag(&mut ed, (0.0, 0.0), (6.0, 7.0)).unwrap_err();
        assert!(matches!(err, ConsoleError::LineTooShort { .. }));

        ed.arm_line("door").unwrap();
        let draft = drag(&mut ed, (0.0, 0.0), (6.0, 8.0)).unwrap().unwrap();
        ed.commit(draft).unwrap();
        assert_eq!(
            ed.arm_line("door"),
            Err(ConsoleError::DuplicateLine("door".to_string()))
        );
    }

    #[test]
    fn arming_one_mode_clears_the_other() {
        let mut ed = editor();
        ed.arm_zone(1).unwrap();
        ed.arm_line("exit").unwrap();
        assert_eq!(ed.state(), &EditorState::LineArmed("exit".to_string()));
        ed.arm_zone(4).unwrap();
        assert_eq!(ed.state(), &EditorState::ZoneArmed(4));
    }

    #[test]
    fn drag_is_clamped_to_image_bounds() {
        let mut ed = editor();
        ed.arm_zone(1).unwrap();
        ed.pointer_down(Point::new(700.0, 500.0)).unwrap();
        ed.pointer_move(Point::new(1200.0, 900.0));
        let EditorState::ZoneDragging { rect, .. } = ed.state().clone() else {
            panic!("not dragging");
        };
        assert_eq!((rect.x2, rect.y2), (800.0, 600.0));
    }

    #[test]
    fn pointer_leave_cancels_only_in_progress_shape() {
        let mut ed = editor();
        ed.arm_zone(1).unwrap();
        let draft = drag(&mut ed, (0.0, 0.0), (40.0, 40.0)).unwrap().unwrap();
        ed.commit(draft).unwrap();
        ed.arm_zone(2).unwrap();
        ed.pointer_down(Point::new(100.0, 100.0)).unwrap();
        assert!(ed.pointer_leave());
        assert_eq!(ed.state(), &EditorState::Idle);
        assert!(ed.has_zone(1));
        assert!(!ed.has_zone(2));
    }

    #[test]
    fn drawing_needs_loaded_image_and_armed_mode() {
        let mut ed = ZoneLineEditor::new();
        ed.arm_zone(1).unwrap();
        assert_eq!(
            ed.pointer_down(Point::new(1.0, 1.0)),
            Err(ConsoleError::ImageNotLoaded)
        );
        let mut ed = editor();
        assert!(matches!(
            ed.pointer_down(Point::new(1.0, 1.0)),
            Err(ConsoleError::InvalidState(_))
        ));
    }

    #[test]
    fn reverse_drag_normalizes_corners() {
        let mut ed = editor();
        ed.arm_zone(5).unwrap();
        let draft = drag(&mut ed, (150.0, 160.0), (100.0, 100.0)).unwrap().unwrap();
        let geometry =
            ImageGeometry::new(Size::new(1920.0, 1080.0), Size::new(800.0, 600.0)).unwrap();
        let cmd = draft.to_command("cam1", &geometry.mapper());
        assert_eq!(
            cmd,
            Command::SetZone {
                camera_id: "cam1".to_string(),
                zone: 5,
                top_left: [240, 180],
                bottom_right: [360, 288],
            }
        );
    }

    #[test]
    fn reset_clears_committed_and_armed_state() {
        let mut ed = editor();
        ed.arm_line("a").unwrap();
        let draft = drag(&mut ed, (0.0, 0.0), (0.0, 30.0)).unwrap().unwrap();
        ed.commit(draft).unwrap();
        ed.arm_zone(1).unwrap();
        ed.reset();
        assert_eq!(ed.state(), &EditorState::Idle);
        assert!(ed.lines().is_empty());
        assert_eq!(
            ed.pointer_down(Point::new(1.0, 1.0)),
            Err(ConsoleError::ImageNotLoaded)
        );
    }
}
