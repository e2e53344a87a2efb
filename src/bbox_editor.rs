use crate::coords::{
    clamp, clamp_anchored, display_to_vision, vision_to_display, MovingEdges, PageDimensions, Point,
    ViewportMetrics, VisionBBox,
};

pub const DEFAULT_HIT_RADIUS: f64 = 10.0;
pub const DEFAULT_MIN_SIZE: f64 = 20.0;

/// Platform-neutral pointer stream. Coordinates are display pixels.
pub trait PointerSession {
    /// Returns false when the pointer-down does not start an interaction.
    fn begin(&mut self, point: Point, metrics: &ViewportMetrics) -> bool;
    fn move_to(&mut self, point: Point, metrics: &ViewportMetrics) -> Option<VisionBBox>;
    fn end(&mut self, point: Point, metrics: &ViewportMetrics) -> Option<VisionBBox>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeHandle {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
    North,
    South,
    East,
    West,
}

impl ResizeHandle {
    /// Hit-test order: corners win over edge midpoints.
    pub const ALL: [ResizeHandle; 8] = [
        ResizeHandle::NorthWest,
        ResizeHandle::NorthEast,
        ResizeHandle::SouthWest,
        ResizeHandle::SouthEast,
        ResizeHandle::North,
        ResizeHandle::South,
        ResizeHandle::East,
        ResizeHandle::West,
    ];

    fn moves_left(&self) -> bool {
        matches!(self, ResizeHandle::NorthWest | ResizeHandle::SouthWest | ResizeHandle::West)
    }

    fn moves_right(&self) -> bool {
        matches!(self, ResizeHandle::NorthEast | ResizeHandle::SouthEast | ResizeHandle::East)
    }

    fn moves_top(&self) -> bool {
        matches!(self, ResizeHandle::NorthWest | ResizeHandle::NorthEast | ResizeHandle::North)
    }

    fn moves_bottom(&self) -> bool {
        matches!(self, ResizeHandle::SouthWest | ResizeHandle::SouthEast | ResizeHandle::South)
    }

    /// Handle centre for a display-space rectangle.
    fn anchor(&self, x: f64, y: f64, w: f64, h: f64) -> Point {
        let hx = if self.moves_left() {
            x
        } else if self.moves_right() {
            x + w
        } else {
            x + w / 2.0
        };
        let hy = if self.moves_top() {
            y
        } else if self.moves_bottom() {
            y + h
        } else {
            y + h / 2.0
        };
        Point::new(hx, hy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionState {
    Idle,
    Dragging { start: Point, start_box: VisionBBox },
    Resizing { handle: ResizeHandle, start: Point, start_box: VisionBBox },
    Drawing { start: Point },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditorConfig {
    /// Display pixels.
    pub hit_radius: f64,
    /// Vision pixels.
    pub min_width: f64,
    pub min_height: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            hit_radius: DEFAULT_HIT_RADIUS,
            min_width: DEFAULT_MIN_SIZE,
            min_height: DEFAULT_MIN_SIZE,
        }
    }
}

type ChangeEnd = Box<dyn FnMut(VisionBBox) + Send>;

pub struct BoxEditor {
    bbox: Option<VisionBBox>,
    page: PageDimensions,
    config: EditorConfig,
    draw_mode: bool,
    state: InteractionState,
    on_change_end: Option<ChangeEnd>,
}

impl BoxEditor {
    pub fn new(bbox: Option<VisionBBox>, page: PageDimensions, config: EditorConfig) -> Self {
        Self {
            bbox,
            page,
            config,
            draw_mode: false,
            state: InteractionState::Idle,
            on_change_end: None,
        }
    }

    pub fn with_draw_mode(mut self, enabled: bool) -> Self {
        self.draw_mode = enabled;
        self
    }

    /// Called exactly once per completed interaction with the final box.
    pub fn on_change_end(mut self, callback: impl FnMut(VisionBBox) + Send + 'static) -> Self {
        self.on_change_end = Some(Box::new(callback));
        self
    }

    pub fn set_draw_mode(&mut self, enabled: bool) {
        self.draw_mode = enabled;
    }

    /// Replace the box from outside (e.g. a new record was selected). Aborts any interaction.
    pub fn set_bbox(&mut self, bbox: Option<VisionBBox>) {
        self.bbox = bbox;
        self.state = InteractionState::Idle;
    }

    pub fn bbox(&self) -> Option<VisionBBox> {
        self.bbox
    }

    pub fn config(&self) -> EditorConfig {
        self.config
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Handle centres in display space, for rendering.
    pub fn handle_points(&self, metrics: &ViewportMetrics) -> Vec<(ResizeHandle, Point)> {
        let Some(bbox) = self.bbox else {
            return Vec::new();
        };
        let r = vision_to_display(&bbox, metrics);
        ResizeHandle::ALL
            .iter()
            .map(|h| (*h, h.anchor(r.x, r.y, r.w, r.h)))
            .collect()
    }

    /// What a pointer-down at `point` would start.
    pub fn hit_test(&self, point: Point, metrics: &ViewportMetrics) -> Option<InteractionState> {
        let vision = display_to_vision(point, metrics);
        if let Some(bbox) = self.bbox {
            for (handle, anchor) in self.handle_points(metrics) {
                if point.distance_to(anchor) < self.config.hit_radius {
                    return Some(InteractionState::Resizing {
                        handle,
                        start: vision,
                        start_box: bbox,
                    });
                }
            }
            if vision_to_display(&bbox, metrics).contains(point) {
                return Some(InteractionState::Dragging {
                    start: vision,
                    start_box: bbox,
                });
            }
        }
        if self.draw_mode {
            return Some(InteractionState::Drawing { start: vision });
        }
        None
    }

    fn shape_at(&self, current: Point) -> Option<VisionBBox> {
        let (min_w, min_h) = (self.config.min_width, self.config.min_height);
        match self.state {
            InteractionState::Idle => None,
            InteractionState::Dragging { start, start_box } => {
                let moved = start_box.translated(current.x - start.x, current.y - start.y);
                Some(clamp(&self.keep_on_page(moved), self.page, min_w, min_h))
            }
            InteractionState::Resizing {
                handle,
                start,
                start_box,
            } => {
                let dx = current.x - start.x;
                let dy = current.y - start.y;
                let mut b = start_box;
                if handle.moves_left() {
                    b.x = start_box.x + dx;
                    b.w = start_box.w - dx;
                }
                if handle.moves_right() {
                    b.w = start_box.w + dx;
                }
                if handle.moves_top() {
                    b.y = start_box.y + dy;
                    b.h = start_box.h - dy;
                }
                if handle.moves_bottom() {
                    b.h = start_box.h + dy;
                }
                if b.w < min_w {
                    if handle.moves_left() {
                        b.x = start_box.right() - min_w;
                    }
                    b.w = min_w;
                }
                if b.h < min_h {
                    if handle.moves_top() {
                        b.y = start_box.bottom() - min_h;
                    }
                    b.h = min_h;
                }
                let moving = MovingEdges {
                    left: handle.moves_left(),
                    top: handle.moves_top(),
                };
                Some(clamp_anchored(&b, self.page, min_w, min_h, moving))
            }
            InteractionState::Drawing { start } => Some(clamp(
                &VisionBBox::from_corners(start, current),
                self.page,
                min_w,
                min_h,
            )),
        }
    }

    /// Slide a translated box back inside the page without changing its size.
    fn keep_on_page(&self, b: VisionBBox) -> VisionBBox {
        if !self.page.is_valid() {
            return b;
        }
        VisionBBox {
            x: b.x.clamp(0.0, (self.page.width - b.w).max(0.0)),
            y: b.y.clamp(0.0, (self.page.height - b.h).max(0.0)),
            ..b
        }
    }
}

impl PointerSession for BoxEditor {
    fn begin(&mut self, point: Point, metrics: &ViewportMetrics) -> bool {
        if self.state != InteractionState::Idle {
            return false;
        }
        match self.hit_test(point, metrics) {
            Some(state) => {
                tracing::debug!(?state, "box interaction started");
                self.state = state;
                true
            }
            None => false,
        }
    }

    fn move_to(&mut self, point: Point, metrics: &ViewportMetrics) -> Option<VisionBBox> {
        let shaped = self.shape_at(display_to_vision(point, metrics))?;
        self.bbox = Some(shaped);
        Some(shaped)
    }

    fn end(&mut self, point: Point, metrics: &ViewportMetrics) -> Option<VisionBBox> {
        let shaped = self.shape_at(display_to_vision(point, metrics));
        self.state = InteractionState::Idle;
        let final_box = shaped?;
        self.bbox = Some(final_box);
        if let Some(callback) = self.on_change_end.as_mut() {
            callback(final_box);
        }
        Some(final_box)
    }
}
