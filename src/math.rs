use itertools::izip;
use num_complex::Complex64;

#[inline]
pub fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

/// `log(sum(exp(values)))` without overflow. Empty input gives `-inf`.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Noise weighted inner product `4/T * sum(conj(a) * b / S)`.
///
/// All three arrays must have the same length.
pub(crate) fn noise_weighted_inner_product(
    a: &[Complex64],
    b: &[Complex64],
    power_spectral_density: &[f64],
    duration: f64,
) -> Complex64 {
    assert!(a.len() == b.len());
    assert!(a.len() == power_spectral_density.len());

    let sum = izip!(a, b, power_spectral_density)
        .map(|(a, b, psd)| a.conj() * *b / *psd)
        .fold(Complex64::new(0., 0.), |acc, x| acc + x);
    sum * (4. / duration)
}

pub type Vec3 = [f64; 3];
pub type Mat3 = [[f64; 3]; 3];

#[inline]
pub(crate) fn dot3(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross3(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Symmetrized outer product `a ⊗ b + b ⊗ a`, scaled by `scale`.
pub(crate) fn sym_outer(a: &Vec3, b: &Vec3, scale: f64) -> Mat3 {
    let mut out = [[0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = scale * (a[i] * b[j] + b[i] * a[j]);
        }
    }
    out
}

/// Frobenius inner product of two 3x3 tensors.
pub(crate) fn contract(a: &Mat3, b: &Mat3) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(row_a, row_b)| dot3(row_a, row_b))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn check_logaddexp() {
        let x = 1.;
        let y = 2.;
        let val = logaddexp(x, y);
        assert_eq!(val, (x.exp() + y.exp()).ln());

        let x = 1.;
        let y = 1.;
        let val = logaddexp(x, y);
        assert_eq!(val, (x.exp() + y.exp()).ln());

        let x = f64::NEG_INFINITY;
        let y = 1.;
        let val = logaddexp(x, y);
        assert_eq!(val, 1.);
    }

    #[test]
    fn check_logsumexp() {
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_relative_eq!(
            logsumexp(&[1000., 1000.]),
            1000. + 2f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn inner_product_of_flat_psd() {
        let a = vec![Complex64::new(1., 1.); 4];
        let psd = vec![2.; 4];
        let out = noise_weighted_inner_product(&a, &a, &psd, 4.);
        // 4/T * 4 * |1+i|^2 / 2 = 4
        assert_relative_eq!(out.re, 4.);
        assert_relative_eq!(out.im, 0.);
    }

    #[test]
    fn cross_is_orthogonal() {
        let a = [1., 2., 3.];
        let b = [-2., 0.5, 1.];
        let c = cross3(&a, &b);
        assert_relative_eq!(dot3(&a, &c), 0., epsilon = 1e-12);
        assert_relative_eq!(dot3(&b, &c), 0., epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn logaddexp_is_symmetric(a in -500f64..500., b in -500f64..500.) {
            prop_assert!((logaddexp(a, b) - logaddexp(b, a)).abs() < 1e-9);
            prop_assert!(logaddexp(a, b) >= a.max(b));
        }
    }
}
