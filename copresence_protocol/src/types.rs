// Core identifier and pose types for the copresence protocol.
//
// `SessionId` and `UserId` are lightweight newtypes over the opaque string
// identifiers the relay hands out. They appear in every message kind and in
// the relay's registry keys, so they live here rather than in the relay
// crate. `Pose` is the position + orientation pair carried by pose updates
// and blended by the client-side reconciliation pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-scoped session identifier. Opaque to the protocol layer; the relay
/// generates one per run (or takes a fixed one from config).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Relay-assigned user identifier, `user_<n>` with a 1-based per-process
/// counter. Unique among live connections; the counter never resets, so an
/// identifier is never reused within one server lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Build the canonical `user_<n>` identifier from the server's counter.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("user_{n}"))
    }

    /// Numeric suffix of a `user_<n>` identifier, used as the compact
    /// `user_index` stamped on pose updates. Identifiers without a parsable
    /// suffix map to 0.
    pub fn index(&self) -> u32 {
        self.0
            .rsplit('_')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Position plus orientation for one tracked entity. Orientation is a
/// 4-component rotation (x, y, z, w).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn new(position: [f32; 3], orientation: [f32; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Move this pose toward `target`. A smoothing factor of 0 snaps to the
    /// target exactly; a factor s in (0, 1) moves `1 - s` of the remaining
    /// distance per call (each pass covers a fixed fraction, so repeated
    /// passes converge geometrically — not a frame-rate-independent filter).
    /// The orientation is component-lerped and renormalized.
    pub fn blend_toward(&mut self, target: &Pose, smoothing: f32) {
        if smoothing <= 0.0 {
            *self = *target;
            return;
        }
        let step = (1.0 - smoothing).clamp(0.0, 1.0);
        for i in 0..3 {
            self.position[i] += (target.position[i] - self.position[i]) * step;
        }
        let mut q = [0.0f32; 4];
        for i in 0..4 {
            q[i] = self.orientation[i] + (target.orientation[i] - self.orientation[i]) * step;
        }
        let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
        if norm > f32::EPSILON {
            for c in &mut q {
                *c /= norm;
            }
        }
        self.orientation = q;
    }

    /// Euclidean distance between the two positions.
    pub fn distance_to(&self, other: &Pose) -> f32 {
        let dx = self.position[0] - other.position[0];
        let dy = self.position[1] - other.position[1];
        let dz = self.position[2] - other.position[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}
