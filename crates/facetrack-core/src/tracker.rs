//! Single-box tracker driven by a constant-velocity Kalman filter.
//!
//! State is `[cx, cy, s, r, vx, vy, vs]`: box centre, area, aspect ratio and
//! the velocities of centre and area. The aspect ratio has no velocity term,
//! faces barely change shape between frames.

use crate::kalman::{diagonal, KalmanError, KalmanFilter};
use crate::types::BoundingBox;
use thiserror::Error;

const STATE_DIM: usize = 7;
const MEAS_DIM: usize = 4;

pub const DEFAULT_MEASUREMENT_NOISE: f32 = 0.1;

const INITIAL_UNCERTAINTY: f32 = 10.0;
const INITIAL_VELOCITY_UNCERTAINTY: f32 = 1000.0;
const PROCESS_NOISE: f32 = 1.0;
const VELOCITY_PROCESS_NOISE: f32 = 0.2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("cannot initialise tracker from an empty box")]
    EmptyBox,
    #[error("kalman: {0}")]
    Kalman(#[from] KalmanError),
}

/// Tracker construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Every returned box is clipped to this rectangle.
    pub scene: BoundingBox,
    /// Detector localisation noise, clamped to [0, 1].
    pub measurement_noise: f32,
}

impl TrackerConfig {
    pub fn for_scene(width: u32, height: u32) -> Self {
        Self {
            scene: BoundingBox::scene(width, height),
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

/// Convert a box into the `[cx, cy, s, r]` measurement form.
pub fn to_measurement(bbox: &BoundingBox) -> [f32; MEAS_DIM] {
    let w = bbox.width as f32;
    let h = bbox.height as f32;
    [bbox.x as f32 + w / 2.0, bbox.y as f32 + h / 2.0, w * h, w / h]
}

/// Recover a box from `[cx, cy, s, r]` and clip it to `scene`.
///
/// Degenerate states (non-positive area or aspect ratio) map to an empty box.
pub fn to_bounding_box(position: &[f32; MEAS_DIM], scene: &BoundingBox) -> BoundingBox {
    let [cx, cy, s, r] = *position;
    let w = (s * r).sqrt();
    if !(w > 0.0) || !w.is_finite() {
        return BoundingBox::EMPTY;
    }
    let h = s / w;
    let bbox = BoundingBox::new(
        (cx - w / 2.0).round() as i32,
        (cy - h / 2.0).round() as i32,
        w.round() as i32,
        h.round() as i32,
    );
    bbox.intersect(scene)
}

fn state_box(state: &[f32; STATE_DIM], scene: &BoundingBox) -> BoundingBox {
    let [cx, cy, s, r, ..] = *state;
    to_bounding_box(&[cx, cy, s, r], scene)
}

/// Tracks one region across frames, coasting on predictions when the
/// detector is skipped or finds nothing.
///
/// A tracker starts uninitialised and becomes initialised on [`init`](Self::init)
/// or the first non-empty [`update`](Self::update); it never goes back.
#[derive(Debug, Clone)]
pub struct BoxTracker {
    scene: BoundingBox,
    filter: KalmanFilter<STATE_DIM, MEAS_DIM>,
    initialized: bool,
}

impl BoxTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let noise = config.measurement_noise.clamp(0.0, 1.0);

        let mut filter = KalmanFilter::<STATE_DIM, MEAS_DIM>::new();
        // cx += vx, cy += vy, s += vs
        for i in 0..3 {
            filter.transition[i][i + 4] = 1.0;
        }
        for i in 0..MEAS_DIM {
            filter.measurement[i][i] = 1.0;
        }
        filter.measurement_noise = diagonal(noise);

        filter.covariance = diagonal(INITIAL_UNCERTAINTY);
        filter.covariance[4][4] = INITIAL_VELOCITY_UNCERTAINTY;

        filter.process_noise = diagonal(PROCESS_NOISE);
        filter.process_noise[4][4] = VELOCITY_PROCESS_NOISE;
        filter.process_noise[5][5] = VELOCITY_PROCESS_NOISE;
        filter.process_noise[6][6] = VELOCITY_PROCESS_NOISE * VELOCITY_PROCESS_NOISE;

        Self {
            scene: config.scene,
            filter,
            initialized: false,
        }
    }

    pub fn scene(&self) -> BoundingBox {
        self.scene
    }

    /// Change the clip rectangle for subsequent boxes; the filter state is kept.
    pub fn set_scene(&mut self, scene: BoundingBox) {
        self.scene = scene;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current state vector `[cx, cy, s, r, vx, vy, vs]`.
    pub fn state(&self) -> &[f32; STATE_DIM] {
        &self.filter.state
    }

    /// Hard-reset position and scale to `bbox`.
    ///
    /// Velocities and covariance are left as they are, so calling this
    /// repeatedly only moves the estimate.
    pub fn init(&mut self, bbox: &BoundingBox) -> Result<(), TrackerError> {
        if bbox.is_empty() {
            return Err(TrackerError::EmptyBox);
        }
        let z = to_measurement(bbox);
        self.filter.state[..MEAS_DIM].copy_from_slice(&z);
        self.initialized = true;
        Ok(())
    }

    /// Advance one frame, optionally folding in a detection.
    ///
    /// Pass [`BoundingBox::EMPTY`] when there is no detection: an
    /// uninitialised tracker then returns an empty box, an initialised one
    /// returns its prediction.
    pub fn update(&mut self, bbox: &BoundingBox) -> Result<BoundingBox, TrackerError> {
        if !self.initialized {
            if bbox.is_empty() {
                return Ok(BoundingBox::EMPTY);
            }
            self.init(bbox)?;
            return Ok(state_box(&self.filter.state, &self.scene));
        }

        self.filter.predict();
        if bbox.is_empty() {
            return Ok(state_box(&self.filter.state, &self.scene));
        }

        let corrected = self.filter.correct(&to_measurement(bbox))?;
        Ok(state_box(corrected, &self.scene))
    }
}
