//! Prediction post-processing for one unit's RUL trajectory.

/// Project a chronological raw trajectory onto a non-increasing, non-negative curve.
///
/// The running minimum is taken over the raw values first; the clamp to zero
/// is applied to the projected result afterwards.
pub fn enforce_monotonic(raw: &[f64]) -> Vec<f64> {
    let mut out = raw.to_vec();
    enforce_monotonic_in_place(&mut out);
    out
}

pub fn enforce_monotonic_in_place(trajectory: &mut [f64]) {
    for i in 1..trajectory.len() {
        if trajectory[i] > trajectory[i - 1] {
            trajectory[i] = trajectory[i - 1];
        }
    }
    for v in trajectory.iter_mut() {
        *v = v.max(0.0);
    }
}

/// True when the trajectory already satisfies the post-processing invariant.
pub fn is_valid_trajectory(trajectory: &[f64]) -> bool {
    trajectory.iter().all(|&v| v >= 0.0) && trajectory.windows(2).all(|w| w[1] <= w[0])
}
