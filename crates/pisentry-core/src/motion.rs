//! Motion vector analysis and the per-supervisor trigger signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Sensitivity for frame-level motion detection.
///
/// A frame counts as motion when more than `vectors` motion vectors have a
/// magnitude above `magnitude`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionThresholds {
    pub magnitude: u8,
    pub vectors: usize,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            magnitude: 60,
            vectors: 10,
        }
    }
}

impl MotionThresholds {
    /// Number of vectors whose clipped magnitude exceeds the threshold.
    pub fn count_exceeding(&self, vectors: &[(i16, i16)]) -> usize {
        vectors
            .iter()
            .filter(|&&(x, y)| vector_magnitude(x, y) > self.magnitude)
            .count()
    }

    /// Returns the exceeding-vector count when the frame is motion.
    pub fn detect(&self, vectors: &[(i16, i16)]) -> Option<usize> {
        let count = self.count_exceeding(vectors);
        (count > self.vectors).then_some(count)
    }
}

/// `sqrt(x² + y²)` clipped to `0..=255`.
pub fn vector_magnitude(x: i16, y: i16) -> u8 {
    let (x, y) = (f64::from(x), f64::from(y));
    (x * x + y * y).sqrt().clamp(0.0, 255.0) as u8
}

/// Parse one frame of `x,y` pairs separated by whitespace.
///
/// Malformed pairs are skipped.
pub fn parse_vector_line(line: &str) -> Vec<(i16, i16)> {
    line.split_whitespace()
        .filter_map(|pair| {
            let (x, y) = pair.split_once(',')?;
            Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
        })
        .collect()
}

/// Edge-triggered "motion seen" flag.
///
/// Each `MotionSupervisor` owns one and hands clones to the camera when it
/// starts analysis, so two supervisors never share a signal.
#[derive(Debug, Clone, Default)]
pub struct MotionTrigger {
    fired: Arc<AtomicBool>,
}

impl MotionTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Consume the signal, returning whether it was set.
    pub fn take(&self) -> bool {
        self.fired.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.fired.store(false, Ordering::Release);
    }
}
