// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use parley_config::TurnStrategy;

use crate::SpeakerDecision;

/// Orders the contributors for a turn.
///
/// `rotate` (the default) starts from a rotating index into the canonical
/// order, advancing by one after each use so no model permanently goes
/// first.  The rotation state is process-local and not persisted.
#[derive(Debug)]
pub struct TurnManager {
    strategy: TurnStrategy,
    fixed_order: Vec<String>,
    rotation_index: usize,
}

impl TurnManager {
    pub fn new(strategy: TurnStrategy, fixed_order: Vec<String>) -> Self {
        Self {
            strategy,
            fixed_order,
            rotation_index: 0,
        }
    }

    pub fn current_first_responder(&self) -> Option<&str> {
        if self.fixed_order.is_empty() {
            return None;
        }
        Some(&self.fixed_order[self.rotation_index % self.fixed_order.len()])
    }

    pub fn peek_next_first_responder(&self) -> Option<&str> {
        if self.fixed_order.is_empty() {
            return None;
        }
        Some(&self.fixed_order[(self.rotation_index + 1) % self.fixed_order.len()])
    }

    /// Order the speaking subset of `decisions` for this turn.  Silent
    /// decisions are excluded.  Under `rotate` the rotation advances once
    /// per call.
    pub fn determine(&mut self, decisions: &[SpeakerDecision]) -> Vec<String> {
        let speakers: Vec<String> = decisions
            .iter()
            .filter(|d| d.will_speak)
            .map(|d| d.model.clone())
            .collect();
        if speakers.is_empty() {
            return Vec::new();
        }

        match self.strategy {
            // Decisions arrive sorted by confidence descending already.
            TurnStrategy::Confidence => speakers,
            TurnStrategy::Fixed => self
                .fixed_order
                .iter()
                .filter(|m| speakers.contains(m))
                .cloned()
                .collect(),
            TurnStrategy::Rotate => {
                let ordered = self.order_from_current(&speakers);
                self.rotate();
                ordered
            }
        }
    }

    /// Rotate the canonical order to start at the current first responder,
    /// then filter to the speaking set.
    fn order_from_current(&self, speakers: &[String]) -> Vec<String> {
        if self.fixed_order.is_empty() {
            return speakers.to_vec();
        }
        let start = self.rotation_index % self.fixed_order.len();
        self.fixed_order[start..]
            .iter()
            .chain(self.fixed_order[..start].iter())
            .filter(|m| speakers.contains(m))
            .cloned()
            .collect()
    }

    pub fn rotate(&mut self) {
        if !self.fixed_order.is_empty() {
            self.rotation_index = (self.rotation_index + 1) % self.fixed_order.len();
        }
    }

    pub fn reset(&mut self) {
        self.rotation_index = 0;
    }

    /// Set a specific model as the next first responder.  Unknown models
    /// are ignored.
    pub fn set_first(&mut self, model: &str) {
        if let Some(index) = self.fixed_order.iter().position(|m| m == model) {
            self.rotation_index = index;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
