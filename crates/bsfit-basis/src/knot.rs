//! Univariate B-spline routines over a raw knot slice.
//!
//! All functions assume a valid knot vector for the given degree: non-decreasing,
//! at least `2 * (degree + 1)` knots, and a domain `[knots[degree], knots[n + 1]]`
//! of positive width where `n + 1` is the number of basis functions.

/// Number of basis functions carried by `knots` at `degree`.
pub fn num_basis_functions(degree: usize, knots: &[f64]) -> usize {
    knots.len().saturating_sub(degree + 1)
}

/// Find the knot span index for parameter `t`.
///
/// Returns the index `i` such that `knots[i] <= t < knots[i+1]`, clamped to
/// `[degree, n]`. The upper domain boundary maps to the last non-empty span so
/// the domain is a closed interval.
pub fn find_span(degree: usize, knots: &[f64], t: f64) -> usize {
    let n = num_basis_functions(degree, knots) - 1;

    if t >= knots[n + 1] {
        return n;
    }
    if t <= knots[degree] {
        return degree;
    }

    // knots[degree] < t < knots[n + 1]: count the knots at or below t
    let below = knots[degree..=n].partition_point(|&k| k <= t);
    degree + below - 1
}

/// Compute the `degree + 1` non-vanishing basis functions at `t`.
///
/// Entry `j` is `N_{span-degree+j, degree}(t)`.
pub fn basis_functions(degree: usize, knots: &[f64], span: usize, t: f64) -> Vec<f64> {
    let mut n = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];

    n[0] = 1.0;

    for j in 1..=degree {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;

        for r in 0..j {
            let temp = n[r] / (right[r + 1] + left[j - r]);
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }

        n[j] = saved;
    }

    n
}

/// Compute the non-vanishing basis functions and their derivatives up to `order`.
///
/// Returns `ders` with `ders[k][j]` the `k`-th derivative of
/// `N_{span-degree+j, degree}` at `t`. Rows for `k > degree` are zero.
pub fn basis_function_derivatives(
    degree: usize,
    knots: &[f64],
    span: usize,
    t: f64,
    order: usize,
) -> Vec<Vec<f64>> {
    let p = degree;
    let mut ders = vec![vec![0.0; p + 1]; order + 1];

    // ndu holds basis values in the upper triangle and knot differences in the lower one
    let mut ndu = vec![vec![0.0; p + 1]; p + 1];
    let mut left = vec![0.0; p + 1];
    let mut right = vec![0.0; p + 1];
    ndu[0][0] = 1.0;

    for j in 1..=p {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;

        for r in 0..j {
            ndu[j][r] = right[r + 1] + left[j - r];
            let temp = ndu[r][j - 1] / ndu[j][r];
            ndu[r][j] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        ndu[j][j] = saved;
    }

    for j in 0..=p {
        ders[0][j] = ndu[j][p];
    }

    let top = order.min(p);
    let mut a = vec![vec![0.0; p + 1]; 2];

    for r in 0..=p {
        let (mut s1, mut s2) = (0usize, 1usize);
        a[0][0] = 1.0;

        for k in 1..=top {
            let mut d = 0.0;
            let rk = r as isize - k as isize;
            let pk = p - k;

            if rk >= 0 {
                let rk = rk as usize;
                a[s2][0] = a[s1][0] / ndu[pk + 1][rk];
                d = a[s2][0] * ndu[rk][pk];
            }

            let j1 = if rk >= -1 { 1 } else { (-rk) as usize };
            let j2 = if r <= pk + 1 { k - 1 } else { p - r };

            for j in j1..=j2 {
                let idx = (rk + j as isize) as usize;
                a[s2][j] = (a[s1][j] - a[s1][j - 1]) / ndu[pk + 1][idx];
                d += a[s2][j] * ndu[idx][pk];
            }

            if r <= pk {
                a[s2][k] = -a[s1][k - 1] / ndu[pk + 1][r];
                d += a[s2][k] * ndu[r][pk];
            }

            ders[k][r] = d;
            std::mem::swap(&mut s1, &mut s2);
        }
    }

    // Multiply through by p! / (p - k)!
    let mut factor = p as f64;
    for k in 1..=top {
        for val in &mut ders[k] {
            *val *= factor;
        }
        factor *= (p - k) as f64;
    }

    ders
}

/// Greville abscissae: the knot average associated with each basis function.
///
/// For degree 0 the midpoint of the basis function's support is used.
pub fn greville_abscissae(degree: usize, knots: &[f64]) -> Vec<f64> {
    let count = num_basis_functions(degree, knots);
    (0..count)
        .map(|i| {
            if degree == 0 {
                0.5 * (knots[i] + knots[i + 1])
            } else {
                knots[i + 1..=i + degree].iter().sum::<f64>() / degree as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_find_span_uniform() {
        // Degree 2, 5 basis functions
        let knots = vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0];
        let degree = 2;

        assert_eq!(find_span(degree, &knots, 0.0), 2);
        assert_eq!(find_span(degree, &knots, 0.5), 2);
        assert_eq!(find_span(degree, &knots, 1.0), 3);
        assert_eq!(find_span(degree, &knots, 1.5), 3);
        assert_eq!(find_span(degree, &knots, 2.5), 4);
        assert_eq!(find_span(degree, &knots, 3.0), 4);
    }

    #[test]
    fn test_find_span_repeated_interior_knot() {
        let knots = vec![0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        assert_eq!(find_span(2, &knots, 0.99), 2);
        assert_eq!(find_span(2, &knots, 1.0), 4);
        assert_eq!(find_span(2, &knots, 1.5), 4);
    }

    #[test]
    fn test_find_span_degree_zero() {
        let knots = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(find_span(0, &knots, 0.0), 0);
        assert_eq!(find_span(0, &knots, 1.0), 1);
        assert_eq!(find_span(0, &knots, 3.0), 2);
    }

    #[test]
    fn test_basis_functions_partition_of_unity() {
        let knots = vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0];
        let degree = 2;

        for &t in &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0] {
            let span = find_span(degree, &knots, t);
            let basis = basis_functions(degree, &knots, span, t);
            let sum: f64 = basis.iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-12,
                "Partition of unity failed at t={}: sum={}",
                t,
                sum
            );
        }
    }

    #[test]
    fn test_basis_functions_non_negative() {
        let knots = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let degree = 3;

        for i in 0..=20 {
            let t = i as f64 / 20.0;
            let span = find_span(degree, &knots, t);
            let basis = basis_functions(degree, &knots, span, t);
            for (j, &val) in basis.iter().enumerate() {
                assert!(val >= -1e-15, "Negative basis at t={}, j={}: {}", t, j, val);
            }
        }
    }

    #[test]
    fn test_derivatives_order_zero_matches_values() {
        let knots = vec![0.0, 0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 1.0];
        let degree = 3;
        for &t in &[0.0, 0.2, 0.5, 0.8, 1.0] {
            let span = find_span(degree, &knots, t);
            let values = basis_functions(degree, &knots, span, t);
            let ders = basis_function_derivatives(degree, &knots, span, t, 0);
            assert_eq!(ders.len(), 1);
            for (a, b) in values.iter().zip(&ders[0]) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_bernstein_derivatives() {
        // Cubic Bezier: N = (1-t)^3, 3t(1-t)^2, 3t^2(1-t), t^3
        let knots = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let t = 0.3;
        let span = find_span(3, &knots, t);
        let ders = basis_function_derivatives(3, &knots, span, t, 4);

        let s = 1.0 - t;
        let first = [-3.0 * s * s, 3.0 * s * s - 6.0 * t * s, 6.0 * t * s - 3.0 * t * t, 3.0 * t * t];
        let second = [6.0 * s, -12.0 + 18.0 * t, 6.0 - 18.0 * t, 6.0 * t];
        let third = [-6.0, 18.0, -18.0, 6.0];

        for j in 0..4 {
            assert_abs_diff_eq!(ders[1][j], first[j], epsilon = 1e-12);
            assert_abs_diff_eq!(ders[2][j], second[j], epsilon = 1e-12);
            assert_abs_diff_eq!(ders[3][j], third[j], epsilon = 1e-12);
            assert_abs_diff_eq!(ders[4][j], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_derivatives_sum_to_zero() {
        // Derivatives of a partition of unity vanish
        let knots = vec![0.0, 0.0, 0.0, 1.0, 2.0, 4.0, 4.0, 4.0];
        for &t in &[0.1, 1.0, 1.7, 3.9] {
            let span = find_span(2, &knots, t);
            let ders = basis_function_derivatives(2, &knots, span, t, 2);
            for row in &ders[1..] {
                assert_abs_diff_eq!(row.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_greville_abscissae() {
        let knots = vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0];
        let g = greville_abscissae(2, &knots);
        assert_eq!(g, vec![0.0, 0.5, 1.5, 2.5, 3.0]);

        let g0 = greville_abscissae(0, &[0.0, 1.0, 3.0]);
        assert_eq!(g0, vec![0.5, 2.0]);
    }
}
