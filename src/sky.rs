//! Spherical geometry for the tangential/cross shear decomposition

/// Returns the great-circle separation [deg] and the position angle east of
/// north [deg] of a source at `(ra, dec)` relative to a lens center at
/// `(ra0, dec0)`, all in degrees
pub fn angular_vector(ra: f64, dec: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let (l, b) = (ra.to_radians(), dec.to_radians());
    let (l0, b0) = (ra0.to_radians(), dec0.to_radians());
    let dl = l - l0;
    let x = b.cos() * dl.sin();
    let y = b0.cos() * b.sin() - b0.sin() * b.cos() * dl.cos();
    // Vincenty formula, stable down to zero separation
    let num = (x * x + y * y).sqrt();
    let den = b0.sin() * b.sin() + b0.cos() * b.cos() * dl.cos();
    (num.atan2(den).to_degrees(), x.atan2(y).to_degrees())
}

/// Rotates the spin-2 ellipticity components by `theta` [rad], returning the
/// (tangential, cross) pair
pub fn polar_rotation(e1: f64, e2: f64, theta: f64) -> (f64, f64) {
    let (s, c) = (2. * theta).sin_cos();
    (e1 * c + e2 * s, -e1 * s + e2 * c)
}
