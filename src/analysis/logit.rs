//! Logistic link functions.

/// Logistic sigmoid, `1 / (1 + e^-x)`, evaluated without overflow for
/// large |x|.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-odds of `p`. Returns ±infinity at the boundaries and NaN outside
/// [0, 1].
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Derivative of the sigmoid, `σ(x)(1 − σ(x))`.
pub fn sigmoid_density(x: f64) -> f64 {
    let s = sigmoid(x);
    s * (1.0 - s)
}

/// Second derivative of the sigmoid, `σ'(x)(1 − 2σ(x))`.
pub fn sigmoid_density_slope(x: f64) -> f64 {
    let s = sigmoid(x);
    s * (1.0 - s) * (1.0 - 2.0 * s)
}
