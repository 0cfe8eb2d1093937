//! Drop-target geometry and collision detection.
//!
//! Columns always win over cards: a dragged rectangle that overlaps any
//! column container resolves to the first overlapping column in board
//! order. Only when no column overlaps does the nearest droppable center win.

use crate::types::{TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.left + dx, self.top + dy, self.width, self.height)
    }

    /// Finite coordinates and non-negative dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right()
            && self.right() > other.left
            && self.top < other.bottom()
            && self.bottom() > other.top
    }
}

/// A region a card can be dropped on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DroppableId {
    Column(TaskStatus),
    Card(TaskId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropZone {
    pub id: DroppableId,
    pub rect: Rect,
}

/// Live droppable rectangles, kept in registration order.
///
/// The presentation layer clears and re-registers zones whenever it lays the
/// board out; the drag session only ever reads them.
#[derive(Debug, Default, Clone)]
pub struct DropZoneMap {
    zones: Vec<DropZone>,
}

impl DropZoneMap {
    pub fn clear(&mut self) {
        self.zones.clear();
    }

    /// Registers or replaces a zone. Replacing keeps the original position so
    /// tie-breaking stays stable across relayouts.
    pub fn register(&mut self, id: DroppableId, rect: Rect) {
        match self.zones.iter_mut().find(|zone| zone.id == id) {
            Some(existing) => existing.rect = rect,
            None => self.zones.push(DropZone { id, rect }),
        }
    }

    pub fn register_column(&mut self, status: TaskStatus, rect: Rect) {
        self.register(DroppableId::Column(status), rect);
    }

    pub fn register_card(&mut self, id: TaskId, rect: Rect) {
        self.register(DroppableId::Card(id), rect);
    }

    pub fn remove(&mut self, id: &DroppableId) {
        self.zones.retain(|zone| &zone.id != id);
    }

    pub fn rect_of(&self, id: &DroppableId) -> Option<Rect> {
        self.zones
            .iter()
            .find(|zone| &zone.id == id)
            .map(|zone| zone.rect)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zones(&self) -> &[DropZone] {
        &self.zones
    }

    pub fn resolve(&self, dragged: Rect) -> Option<DroppableId> {
        detect_collision(dragged, &self.zones)
    }
}

/// Picks the single best drop target for `dragged`, or `None` when nothing
/// usable is registered or the dragged rectangle itself is malformed.
pub fn detect_collision(dragged: Rect, zones: &[DropZone]) -> Option<DroppableId> {
    if !dragged.is_well_formed() {
        return None;
    }

    for status in TaskStatus::ALL {
        let column = DroppableId::Column(status);
        let overlaps = zones.iter().any(|zone| {
            zone.id == column && zone.rect.is_well_formed() && dragged.intersects(&zone.rect)
        });
        if overlaps {
            return Some(column);
        }
    }

    closest_center(dragged, zones)
}

fn closest_center(dragged: Rect, zones: &[DropZone]) -> Option<DroppableId> {
    let origin = dragged.center();
    if !origin.is_finite() {
        return None;
    }

    let mut best: Option<(f64, &DropZone)> = None;
    for zone in zones.iter().filter(|zone| zone.rect.is_well_formed()) {
        let distance = origin.distance_to(zone.rect.center());
        if !distance.is_finite() {
            continue;
        }
        // Strict comparison keeps the earliest registration on ties.
        if best.is_none_or(|(best_distance, _)| distance < best_distance) {
            best = Some((distance, zone));
        }
    }

    best.map(|(_, zone)| zone.id.clone())
}
