//! Composite Gauss–Legendre quadrature.

/// Eight-point rule on [-1, 1]: (abscissa, weight) for the positive half.
const GL8: [(f64, f64); 4] = [
    (0.183_434_642_495_649_8, 0.362_683_783_378_362_0),
    (0.525_532_409_916_329_0, 0.313_706_645_877_887_3),
    (0.796_666_477_413_626_7, 0.222_381_034_453_374_5),
    (0.960_289_856_497_536_3, 0.101_228_536_290_376_3),
];

/// Integrates `f` over `[a, b]` split into `segments` equal pieces.
pub fn integrate<F: FnMut(f64) -> f64>(mut f: F, a: f64, b: f64, segments: usize) -> f64 {
    let segments = segments.max(1);
    let h = (b - a) / segments as f64;
    let mut total = 0.0;
    for s in 0..segments {
        let lo = a + h * s as f64;
        let mid = lo + 0.5 * h;
        let half = 0.5 * h;
        let mut acc = 0.0;
        for (x, w) in GL8 {
            acc += w * (f(mid - half * x) + f(mid + half * x));
        }
        total += acc * half;
    }
    total
}

/// Abscissae and weights of the composite rule over `[a, b]`.
pub fn nodes(a: f64, b: f64, segments: usize) -> Vec<(f64, f64)> {
    let segments = segments.max(1);
    let h = (b - a) / segments as f64;
    let mut out = Vec::with_capacity(segments * 8);
    for s in 0..segments {
        let mid = a + h * (s as f64 + 0.5);
        let half = 0.5 * h;
        for (x, w) in GL8 {
            out.push((mid - half * x, w * half));
            out.push((mid + half * x, w * half));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomial_exact() {
        let v = integrate(|x| x.powi(7) - 2.0 * x.powi(3) + 1.0, -1.0, 2.0, 1);
        let exact = (2f64.powi(8) - 1.0) / 8.0 - (2f64.powi(4) - 1.0) / 2.0 + 3.0;
        assert!((v - exact).abs() < 1e-12);
    }

    #[test]
    fn test_trig_integral() {
        let v = integrate(f64::sin, 0.0, std::f64::consts::PI, 4);
        assert!((v - 2.0).abs() < 1e-13);
    }

    #[test]
    fn test_nodes_weights_sum_to_length() {
        let total: f64 = nodes(0.5, 3.0, 3).iter().map(|(_, w)| w).sum();
        assert!((total - 2.5).abs() < 1e-13);
    }
}
