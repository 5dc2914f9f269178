//! Stroke reassembly for the real-time channel
//!
//! Each remote sender has at most one stroke in progress. Points extend it,
//! `drawend` closes and discards it, and a batched stroke is reported whole
//! without touching the sender's in-progress state.

use std::collections::HashMap;

use crate::client::draw::{DrawCommand, Point};

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeState {
    pub sender_key: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeKind {
    /// A point was appended to a live stroke.
    InProgress,
    /// The sender ended its live stroke.
    Ended,
    /// A complete stroke arrived in one message.
    Batch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeUpdate {
    pub sender: String,
    pub kind: StrokeKind,
    pub points: Vec<Point>,
}

#[derive(Debug, Default)]
pub struct StreamReassembler {
    strokes: HashMap<String, StrokeState>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one parsed command from `sender`. Returns the resulting
    /// update, or `None` when the command changes nothing.
    pub fn apply(&mut self, sender: &str, command: DrawCommand) -> Option<StrokeUpdate> {
        match command {
            DrawCommand::Point(point) => {
                let stroke = self
                    .strokes
                    .entry(sender.to_string())
                    .or_insert_with(|| StrokeState {
                        sender_key: sender.to_string(),
                        points: Vec::new(),
                    });
                stroke.points.push(point);
                Some(StrokeUpdate {
                    sender: sender.to_string(),
                    kind: StrokeKind::InProgress,
                    points: stroke.points.clone(),
                })
            }
            DrawCommand::End => self.strokes.remove(sender).map(|stroke| StrokeUpdate {
                sender: stroke.sender_key,
                kind: StrokeKind::Ended,
                points: stroke.points,
            }),
            DrawCommand::BatchStroke(points) if !points.is_empty() => Some(StrokeUpdate {
                sender: sender.to_string(),
                kind: StrokeKind::Batch,
                points,
            }),
            DrawCommand::BatchStroke(_) | DrawCommand::Unrecognized => None,
        }
    }

    pub fn stroke(&self, sender: &str) -> Option<&StrokeState> {
        self.strokes.get(sender)
    }

    /// Drops every in-progress stroke.
    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}
