//! Common kinetic rate laws.
//!
//! Every function takes a fixed number of arguments, in the order documented on the
//! function, so it can be passed directly to
//! [`Reaction::new`](crate::model::entities::Reaction::new) or
//! [`Derived::new`](crate::model::entities::Derived::new).
//!
//! ```
//! use modelbase::{model::entities::Reaction, ratefunctions};
//!
//! let v1 = Reaction::new(
//!     ratefunctions::michaelis_menten,
//!     &["s", "vmax", "km"],
//!     [("s", -1.0), ("p", 1.0)],
//! );
//! ```
//!
//! A model rejects entities whose argument list does not match that count.

/// `[x]` -> `x`
pub fn constant([x]: [f64; 1]) -> f64 {
    x
}

/// `[x, k]` -> `k * x`
pub fn proportional([x, k]: [f64; 2]) -> f64 {
    k * x
}

/// `[s, k]` -> `k * s`
pub fn mass_action_1([s, k]: [f64; 2]) -> f64 {
    k * s
}

/// `[s1, s2, k]` -> `k * s1 * s2`
pub fn mass_action_2([s1, s2, k]: [f64; 3]) -> f64 {
    k * s1 * s2
}

/// `[s1, s2, s3, k]` -> `k * s1 * s2 * s3`
pub fn mass_action_3([s1, s2, s3, k]: [f64; 4]) -> f64 {
    k * s1 * s2 * s3
}

/// `[s1, s2, s3, s4, k]` -> `k * s1 * s2 * s3 * s4`
pub fn mass_action_4([s1, s2, s3, s4, k]: [f64; 5]) -> f64 {
    k * s1 * s2 * s3 * s4
}

/// `[s, p, kf, kr]` -> `kf * s - kr * p`
pub fn reversible_mass_action_1_1([s, p, kf, kr]: [f64; 4]) -> f64 {
    kf * s - kr * p
}

/// `[s1, s2, p, kf, kr]` -> `kf * s1 * s2 - kr * p`
pub fn reversible_mass_action_2_1([s1, s2, p, kf, kr]: [f64; 5]) -> f64 {
    kf * s1 * s2 - kr * p
}

/// `[s, vmax, km]` -> `vmax * s / (km + s)`
pub fn michaelis_menten([s, vmax, km]: [f64; 3]) -> f64 {
    vmax * s / (km + s)
}

/// `[s, p, vmax_f, vmax_r, km_s, km_p]`
pub fn reversible_michaelis_menten([s, p, vf, vr, kms, kmp]: [f64; 6]) -> f64 {
    (vf * s / kms - vr * p / kmp) / (1.0 + s / kms + p / kmp)
}

/// `[s, vmax, kd, n]` -> `vmax * s^n / (kd + s^n)`
pub fn hill([s, vmax, kd, n]: [f64; 4]) -> f64 {
    let sn = s.powf(n);
    vmax * sn / (kd + sn)
}

/// `[s, i, vmax, km, ki]`
pub fn competitive_inhibition([s, i, vmax, km, ki]: [f64; 5]) -> f64 {
    vmax * s / (s + km * (1.0 + i / ki))
}

/// `[s, i, vmax, km, ki]`
pub fn uncompetitive_inhibition([s, i, vmax, km, ki]: [f64; 5]) -> f64 {
    vmax * s / (km + s * (1.0 + i / ki))
}

/// `[s, i, vmax, km, ki]`
pub fn noncompetitive_inhibition([s, i, vmax, km, ki]: [f64; 5]) -> f64 {
    vmax * s / ((s + km) * (1.0 + i / ki))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_michaelis_menten_half_saturation() {
        assert_relative_eq!(michaelis_menten([2.0, 10.0, 2.0]), 5.0);
    }

    #[test]
    fn test_reversible_mass_action_equilibrium() {
        assert_relative_eq!(reversible_mass_action_1_1([2.0, 1.0, 1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_inhibition_without_inhibitor() {
        let args = [1.0, 0.0, 4.0, 1.0, 0.5];
        let uninhibited = michaelis_menten([1.0, 4.0, 1.0]);
        assert_relative_eq!(competitive_inhibition(args), uninhibited);
        assert_relative_eq!(uncompetitive_inhibition(args), uninhibited);
        assert_relative_eq!(noncompetitive_inhibition(args), uninhibited);
    }

    #[test]
    fn test_hill_with_unit_coefficient_is_michaelis_menten() {
        assert_relative_eq!(hill([3.0, 2.0, 1.5, 1.0]), michaelis_menten([3.0, 2.0, 1.5]));
    }
}
