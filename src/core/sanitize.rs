//! Result sanitizer: infinities and NaN become missing

/// Replace +inf, -inf and NaN with missing
pub fn sanitize(values: Vec<Option<f64>>) -> Vec<Option<f64>> {
    values
        .into_iter()
        .map(|v| v.filter(|n| n.is_finite()))
        .collect()
}
