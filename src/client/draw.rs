//! Drawing payloads on the real-time channel
//!
//! Three payload shapes share the channel and are told apart by prefix:
//! - `drawpoint:<x>,<y>`: one point of the sender's in-progress stroke
//! - `drawend`: the sender finished its stroke
//! - `draw<x1>,<y1>;<x2>,<y2>;...`: a whole stroke in one message
//!
//! Coordinates are written with two decimals. Parsing happens once, into
//! `DrawCommand`; anything that does not fit is `Unrecognized`.

use std::fmt::Write as _;
use std::time::Duration;

use tokio::time::Instant;

const POINT_PREFIX: &str = "drawpoint:";
const END_PAYLOAD: &str = "drawend";
const STROKE_PREFIX: &str = "draw";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Parses `<x>,<y>`. Both coordinates must be finite numbers.
    pub fn parse(text: &str) -> Option<Self> {
        let (x, y) = text.split_once(',')?;
        let x: f64 = x.trim().parse().ok()?;
        let y: f64 = y.trim().parse().ok()?;
        (x.is_finite() && y.is_finite()).then_some(Self { x, y })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Point(Point),
    End,
    BatchStroke(Vec<Point>),
    Unrecognized,
}

impl DrawCommand {
    pub fn parse(payload: &str) -> Self {
        if let Some(rest) = payload.strip_prefix(POINT_PREFIX) {
            return match Point::parse(rest) {
                Some(point) => DrawCommand::Point(point),
                None => DrawCommand::Unrecognized,
            };
        }
        if payload == END_PAYLOAD {
            return DrawCommand::End;
        }
        if let Some(rest) = payload.strip_prefix(STROKE_PREFIX) {
            // Malformed segments are skipped one at a time.
            let points = rest
                .split(';')
                .filter(|segment| !segment.is_empty())
                .filter_map(Point::parse)
                .collect();
            return DrawCommand::BatchStroke(points);
        }
        DrawCommand::Unrecognized
    }

    pub fn encode(&self) -> String {
        match self {
            DrawCommand::Point(point) => format!("{POINT_PREFIX}{:.2},{:.2}", point.x, point.y),
            DrawCommand::End => END_PAYLOAD.to_string(),
            DrawCommand::BatchStroke(points) => {
                let mut payload = String::from(STROKE_PREFIX);
                for point in points {
                    let _ = write!(payload, "{:.2},{:.2};", point.x, point.y);
                }
                payload
            }
            DrawCommand::Unrecognized => String::new(),
        }
    }
}

/// Whether a payload belongs to the drawing protocol at all.
pub fn is_draw_payload(payload: &str) -> bool {
    payload.starts_with(STROKE_PREFIX)
}

/// Admits at most one point per `interval`.
#[derive(Debug)]
pub struct DrawThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl DrawThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}
