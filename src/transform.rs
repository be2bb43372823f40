//! Bounded-parameter transformations.
//!
//! Optimizers step in an unconstrained internal space; these maps carry a
//! bounded variable between that space and its `[min, max]` interval. The
//! `Variable` bounds plumbing is the only caller; the sweeps never see them.

/// Three real-valued maps between the external (bounded) and internal
/// (unconstrained) parameter spaces.
pub trait ParameterTransformation {
    fn external_to_internal(&self, external: f64, min: f64, max: f64) -> f64;
    fn internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64;
    /// d(external)/d(internal), derived from `internal_to_external`.
    fn derivative_internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64;
}

/// `external = min + (sin(internal) + 1)/2 · (max − min)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SinParameterTransformation;

impl ParameterTransformation for SinParameterTransformation {
    fn external_to_internal(&self, external: f64, min: f64, max: f64) -> f64 {
        (2.0 * (external - min) / (max - min) - 1.0).asin()
    }

    fn internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64 {
        min + 0.5 * (internal.sin() + 1.0) * (max - min)
    }

    fn derivative_internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64 {
        0.5 * internal.cos() * (max - min)
    }
}

/// `external = min + (tanh(internal) + 1)/2 · (max − min)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TanhParameterTransformation;

impl ParameterTransformation for TanhParameterTransformation {
    fn external_to_internal(&self, external: f64, min: f64, max: f64) -> f64 {
        (2.0 * (external - min) / (max - min) - 1.0).atanh()
    }

    fn internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64 {
        min + 0.5 * (internal.tanh() + 1.0) * (max - min)
    }

    fn derivative_internal_to_external(&self, internal: f64, min: f64, max: f64) -> f64 {
        let t = internal.tanh();
        0.5 * (1.0 - t * t) * (max - min)
    }
}
