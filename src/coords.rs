//! Conversions between the three coordinate spaces a page lives in:
//! vision pixels (as reported by the OCR backend), display pixels (the
//! rendered, possibly zoomed image) and fractional [0,1] page coordinates.
//!
//! Everything here is a pure function over explicit inputs. Callers recompute
//! `ViewportMetrics` on layout changes and pass them in.

use serde::{Deserialize, Serialize};

/// Vision and intrinsic image sizes closer than this are treated as the same raster.
const RESAMPLE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Page size in vision pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }

    pub fn parse(s: &str) -> Orientation {
        if s.eq_ignore_ascii_case("landscape") {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

impl PageDimensions {
    /// Stand-in page used when the extraction carries no dimensions; vision == fractional.
    pub const UNIT: PageDimensions = PageDimensions {
        width: 1.0,
        height: 1.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn orientation(&self) -> Orientation {
        if self.width > self.height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Axis-aligned rectangle in vision pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VisionBBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl VisionBBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle spanning two corner points in either order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            w: (a.x - b.x).abs(),
            h: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// Resolution-independent rectangle; every coordinate is a fraction of the page size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FractionalBBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl FractionalBBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn center_x(&self) -> f64 {
        (self.x_min + self.x_max) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.y_min + self.y_max) / 2.0
    }

    pub fn union(&self, other: &FractionalBBox) -> FractionalBBox {
        FractionalBBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Clip into [0,1] and restore `min <= max` ordering.
    pub fn normalized(&self) -> FractionalBBox {
        let (x0, x1) = ordered(self.x_min.clamp(0.0, 1.0), self.x_max.clamp(0.0, 1.0));
        let (y0, y1) = ordered(self.y_min.clamp(0.0, 1.0), self.y_max.clamp(0.0, 1.0));
        FractionalBBox::new(x0, y0, x1, y1)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

impl From<[f64; 4]> for FractionalBBox {
    fn from(v: [f64; 4]) -> Self {
        FractionalBBox::new(v[0], v[1], v[2], v[3])
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Rectangle in display (screen) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl DisplayRect {
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.w && p.y >= self.y && p.y <= self.y + self.h
    }
}

/// Snapshot of where the page image sits on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    /// On-screen box of the rendered image, already including zoom and scroll offset.
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    /// Intrinsic pixel size of the image file.
    pub natural_width: f64,
    pub natural_height: f64,
    /// Page size the OCR backend reported, when it resampled the image.
    pub vision_width: Option<f64>,
    pub vision_height: Option<f64>,
}

impl ViewportMetrics {
    pub fn new(left: f64, top: f64, width: f64, height: f64, natural_width: f64, natural_height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
            natural_width,
            natural_height,
            vision_width: None,
            vision_height: None,
        }
    }

    pub fn with_vision_size(mut self, page: PageDimensions) -> Self {
        self.vision_width = Some(page.width);
        self.vision_height = Some(page.height);
        self
    }

    pub fn is_usable(&self) -> bool {
        [self.width, self.height, self.natural_width, self.natural_height]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }

    /// Factors taking vision pixels into intrinsic-image pixels.
    fn vision_scale(&self) -> (f64, f64) {
        match (self.vision_width, self.vision_height) {
            (Some(vw), Some(vh)) if vw > 0.0 && vh > 0.0 => {
                let dx = (vw - self.natural_width).abs() / self.natural_width;
                let dy = (vh - self.natural_height).abs() / self.natural_height;
                if dx > RESAMPLE_TOLERANCE || dy > RESAMPLE_TOLERANCE {
                    (self.natural_width / vw, self.natural_height / vh)
                } else {
                    (1.0, 1.0)
                }
            }
            _ => (1.0, 1.0),
        }
    }

    /// Combined vision → display factors.
    fn total_scale(&self) -> (f64, f64) {
        let (vx, vy) = self.vision_scale();
        (
            vx * self.width / self.natural_width,
            vy * self.height / self.natural_height,
        )
    }
}

pub fn vision_to_display(bbox: &VisionBBox, metrics: &ViewportMetrics) -> DisplayRect {
    if !metrics.is_usable() {
        return DisplayRect {
            x: bbox.x,
            y: bbox.y,
            w: bbox.w,
            h: bbox.h,
        };
    }
    let (sx, sy) = metrics.total_scale();
    DisplayRect {
        x: metrics.left + bbox.x * sx,
        y: metrics.top + bbox.y * sy,
        w: bbox.w * sx,
        h: bbox.h * sy,
    }
}

pub fn vision_point_to_display(point: Point, metrics: &ViewportMetrics) -> Point {
    if !metrics.is_usable() {
        return point;
    }
    let (sx, sy) = metrics.total_scale();
    Point::new(metrics.left + point.x * sx, metrics.top + point.y * sy)
}

/// Inverse of `vision_point_to_display`.
pub fn display_to_vision(point: Point, metrics: &ViewportMetrics) -> Point {
    if !metrics.is_usable() {
        return point;
    }
    let (sx, sy) = metrics.total_scale();
    Point::new((point.x - metrics.left) / sx, (point.y - metrics.top) / sy)
}

pub fn vision_to_fractional(bbox: &VisionBBox, page: PageDimensions) -> FractionalBBox {
    if !page.is_valid() {
        return FractionalBBox::default();
    }
    FractionalBBox {
        x_min: bbox.x / page.width,
        y_min: bbox.y / page.height,
        x_max: (bbox.x + bbox.w) / page.width,
        y_max: (bbox.y + bbox.h) / page.height,
    }
}

pub fn fractional_to_vision(fbox: &FractionalBBox, page: PageDimensions) -> VisionBBox {
    if !page.is_valid() {
        return VisionBBox::default();
    }
    VisionBBox {
        x: fbox.x_min * page.width,
        y: fbox.y_min * page.height,
        w: (fbox.x_max - fbox.x_min) * page.width,
        h: (fbox.y_max - fbox.y_min) * page.height,
    }
}

/// Which low-side edges are under the pointer. When the box must grow back
/// to its minimum size, a moving edge yields and the fixed edge stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovingEdges {
    pub left: bool,
    pub top: bool,
}

/// Constrain `bbox` to the page while keeping at least `min_w` x `min_h`.
pub fn clamp(bbox: &VisionBBox, page: PageDimensions, min_w: f64, min_h: f64) -> VisionBBox {
    clamp_anchored(bbox, page, min_w, min_h, MovingEdges::default())
}

pub fn clamp_anchored(
    bbox: &VisionBBox,
    page: PageDimensions,
    min_w: f64,
    min_h: f64,
    moving: MovingEdges,
) -> VisionBBox {
    let min_w = min_w.max(0.0);
    let min_h = min_h.max(0.0);
    if !page.is_valid() {
        return VisionBBox {
            x: bbox.x.max(0.0),
            y: bbox.y.max(0.0),
            w: bbox.w.max(min_w),
            h: bbox.h.max(min_h),
        };
    }
    let (x0, x1) = clamp_axis(bbox.x, bbox.x + bbox.w, min_w, page.width, moving.left);
    let (y0, y1) = clamp_axis(bbox.y, bbox.y + bbox.h, min_h, page.height, moving.top);
    VisionBBox {
        x: x0,
        y: y0,
        w: (x1 - x0).max(min_w),
        h: (y1 - y0).max(min_h),
    }
}

/// Clip one axis to `[0, extent]` and re-grow to `min` from the yielding edge.
fn clamp_axis(lo: f64, hi: f64, min: f64, extent: f64, low_edge_moving: bool) -> (f64, f64) {
    let mut lo = lo.max(0.0);
    let mut hi = hi.min(extent);
    if hi - lo < min {
        if low_edge_moving {
            lo = hi - min;
            if lo < 0.0 {
                lo = 0.0;
                hi = min;
            }
        } else {
            hi = lo + min;
            if hi > extent {
                hi = extent;
                lo = (extent - min).max(0.0);
                if hi - lo < min {
                    hi = lo + min;
                }
            }
        }
    }
    (lo, hi)
}
