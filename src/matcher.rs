use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

use crate::isin::IsinMatch;
use crate::swiss_number::{find_swiss_numbers, is_round};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", content = "size", rename_all = "snake_case")]
pub enum Window {
    Chars(usize),
    Lines(usize),
}

impl FromStr for Window {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (unit, size) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid window '{}', expected chars:N or lines:N", s))?;
        let size: usize = size.trim().parse()
            .map_err(|e| anyhow!("Invalid window size in '{}': {}", s, e))?;
        match unit.trim().to_lowercase().as_str() {
            "chars" => Ok(Window::Chars(size)),
            "lines" => Ok(Window::Lines(size)),
            other => Err(anyhow!("Unknown window unit: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    Largest,
    /// Lower middle element for an even number of candidates.
    Median,
    /// Largest value that is not a multiple of 1000, else largest overall.
    NonRound,
    ClosestTo(Decimal),
    /// Smallest text distance from the ISIN.
    Nearest,
    /// Nearest among non-round values, else nearest overall.
    NearestNonRound,
}

impl FromStr for SelectionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        if let Some(target) = lower.strip_prefix("closest:") {
            let target = Decimal::from_str(&target.replace('\'', ""))
                .map_err(|e| anyhow!("Invalid closest target '{}': {}", target, e))?;
            return Ok(SelectionPolicy::ClosestTo(target));
        }
        match lower.as_str() {
            "largest" | "max" => Ok(SelectionPolicy::Largest),
            "median" => Ok(SelectionPolicy::Median),
            "non_round" | "nonround" => Ok(SelectionPolicy::NonRound),
            "nearest" => Ok(SelectionPolicy::Nearest),
            "nearest_non_round" => Ok(SelectionPolicy::NearestNonRound),
            other => Err(anyhow!("Unknown selection policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatcherConfig {
    pub window: Window,
    pub min_value: Decimal,
    pub max_value: Decimal,
    pub policy: SelectionPolicy,
    /// Stop the window at the previous and next ISIN in the text.
    pub clip_to_neighbours: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            window: Window::Chars(500),
            min_value: Decimal::from(1_000),
            max_value: Decimal::from(20_000_000),
            policy: SelectionPolicy::NearestNonRound,
            clip_to_neighbours: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub value: Decimal,
    pub offset: usize,
    /// Bytes between the number and the ISIN; 0 if they overlap.
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMatch {
    pub value: Decimal,
    pub candidates: Vec<Candidate>,
    pub confidence: f64,
}

impl ValueMatch {
    fn empty() -> Self {
        Self { value: Decimal::ZERO, candidates: Vec::new(), confidence: 0.0 }
    }
}

pub struct ProximityMatcher {
    config: MatcherConfig,
}

impl ProximityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Find the value belonging to `target`. `all` is every ISIN located in the
    /// same text and is only used for neighbour clipping.
    pub fn match_value(&self, text: &str, target: &IsinMatch, all: &[IsinMatch]) -> ValueMatch {
        let (start, end) = self.window_bounds(text, target, all);
        if start >= end {
            return ValueMatch::empty();
        }

        // Whole-text tokens, so a number crossing the window edge is skipped rather than cut.
        let candidates: Vec<Candidate> = find_swiss_numbers(text)
            .into_iter()
            .filter(|t| t.start >= start && t.end <= end)
            .filter(|t| t.value > self.config.min_value && t.value < self.config.max_value)
            .map(|t| {
                let (abs_start, abs_end) = (t.start, t.end);
                let distance = if abs_end <= target.offset {
                    target.offset - abs_end
                } else if abs_start >= target.end() {
                    abs_start - target.end()
                } else {
                    0
                };
                Candidate { value: t.value, offset: abs_start, distance }
            })
            .collect();

        let Some(chosen) = select(&candidates, self.config.policy) else {
            return ValueMatch::empty();
        };

        let value = chosen.value;
        let confidence = if candidates.len() == 1 {
            0.9
        } else if nearest(candidates.iter()).is_some_and(|n| n.offset == chosen.offset) {
            0.75
        } else {
            0.5
        };

        ValueMatch { value, candidates, confidence }
    }

    fn window_bounds(&self, text: &str, target: &IsinMatch, all: &[IsinMatch]) -> (usize, usize) {
        let (mut start, mut end) = match self.config.window {
            Window::Chars(n) => (
                target.offset.saturating_sub(n),
                (target.end() + n).min(text.len()),
            ),
            Window::Lines(n) => line_window(text, target.line, n),
        };

        if self.config.clip_to_neighbours {
            if let Some(prev) = all.iter().filter(|m| m.end() <= target.offset).map(|m| m.end()).max() {
                start = start.max(prev);
            }
            if let Some(next) = all.iter().filter(|m| m.offset >= target.end()).map(|m| m.offset).min() {
                end = end.min(next);
            }
        }

        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        (start, end)
    }
}

fn line_window(text: &str, line: usize, n: usize) -> (usize, usize) {
    let starts: Vec<usize> = std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let first = line.saturating_sub(n);
    let last = (line + n).min(starts.len() - 1);
    let end = starts.get(last + 1).map(|s| s - 1).unwrap_or(text.len());
    (starts[first.min(starts.len() - 1)], end)
}

fn select(candidates: &[Candidate], policy: SelectionPolicy) -> Option<&Candidate> {
    match policy {
        SelectionPolicy::Largest => largest(candidates.iter()),
        SelectionPolicy::Median => {
            let mut sorted: Vec<&Candidate> = candidates.iter().collect();
            sorted.sort_by(|a, b| a.value.cmp(&b.value).then(a.offset.cmp(&b.offset)));
            if sorted.is_empty() {
                None
            } else {
                Some(sorted[(sorted.len() - 1) / 2])
            }
        }
        SelectionPolicy::NonRound => {
            largest(candidates.iter().filter(|c| !is_round(&c.value)))
                .or_else(|| largest(candidates.iter()))
        }
        SelectionPolicy::ClosestTo(target) => candidates
            .iter()
            .min_by(|a, b| {
                (a.value - target).abs().cmp(&(b.value - target).abs())
                    .then(a.offset.cmp(&b.offset))
            }),
        SelectionPolicy::Nearest => nearest(candidates.iter()),
        SelectionPolicy::NearestNonRound => {
            nearest(candidates.iter().filter(|c| !is_round(&c.value)))
                .or_else(|| nearest(candidates.iter()))
        }
    }
}

fn largest<'a>(iter: impl Iterator<Item = &'a Candidate>) -> Option<&'a Candidate> {
    iter.min_by(|a, b| b.value.cmp(&a.value).then(a.offset.cmp(&b.offset)))
}

fn nearest<'a>(iter: impl Iterator<Item = &'a Candidate>) -> Option<&'a Candidate> {
    iter.min_by(|a, b| a.distance.cmp(&b.distance).then(a.offset.cmp(&b.offset)))
}
