//! Forward kernels and gradient rules.
//!
//! Every function here is pure: arrays in, arrays out. The forward helpers
//! cover the operations whose shape logic goes beyond a single `ndarray`
//! call (matrix product and axis reduction); the `*_backward` functions map
//! the upstream gradient `g` of an output to the contribution owed to each
//! operand, already shaped like that operand.

use ndarray::{ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn, Zip, arr0};

use crate::broadcast::reduce_to_shape;
use crate::error::{AutogradError, Result};
use crate::tensors::Ten64;

/// Lower bound applied to inputs of `log` in both passes.
pub const LOG_FLOOR: f64 = 1e-8;

/// `d(a+b)`: the upstream gradient, reduced to each operand's shape.
pub fn add_backward(g: &Ten64, a_shape: &[usize], b_shape: &[usize]) -> (Ten64, Ten64) {
    (
        reduce_to_shape(g.clone(), a_shape),
        reduce_to_shape(g.clone(), b_shape),
    )
}

/// `d(a*b)`: each side receives the other side's data times `g`, reduced to
/// its own shape so broadcast operands get the summed gradient.
pub fn mul_backward(g: &Ten64, a: &Ten64, b: &Ten64) -> (Ten64, Ten64) {
    (
        reduce_to_shape(b * g, a.shape()),
        reduce_to_shape(a * g, b.shape()),
    )
}

/// `d(a**p) = p * a**(p-1) * g`.
pub fn pow_backward(g: &Ten64, a: &Ten64, p: f64) -> Ten64 {
    a.mapv(|x| p * x.powf(p - 1.0)) * g
}

/// Passes `g` where the input was positive, zero elsewhere.
pub fn relu_backward(g: &Ten64, a: &Ten64) -> Ten64 {
    let mut out = Ten64::zeros(a.raw_dim());
    Zip::from(&mut out)
        .and(a)
        .and(g)
        .for_each(|o, &x, &dy| *o = if x > 0.0 { dy } else { 0.0 });
    out
}

/// `d(e^a) = e^a * g`, reusing the forward output.
pub fn exp_backward(g: &Ten64, out: &Ten64) -> Ten64 {
    g * out
}

/// `d(ln a) = g / max(a, LOG_FLOOR)`.
pub fn log_backward(g: &Ten64, a: &Ten64) -> Ten64 {
    g / &a.mapv(|x| x.max(LOG_FLOOR))
}

/// Sums `x` over `axes` (normalized, ascending).
pub fn sum_forward(x: &Ten64, axes: &[usize], keepdims: bool) -> Ten64 {
    let mut out = axes
        .iter()
        .rev()
        .fold(x.clone(), |acc, &axis| acc.sum_axis(Axis(axis)));
    if keepdims {
        for &axis in axes {
            out.insert_axis_inplace(Axis(axis));
        }
    }
    out
}

/// Spreads `g` evenly back over the input: every summed element receives the
/// upstream value of the slot it was summed into.
pub fn sum_backward(g: &Ten64, input_shape: &[usize], axes: &[usize], keepdims: bool) -> Ten64 {
    let mut expanded = g.view();
    if !keepdims {
        for &axis in axes {
            expanded.insert_axis_inplace(Axis(axis));
        }
    }
    expanded
        .broadcast(IxDyn(input_shape))
        .expect("reduced gradient always broadcasts back to the input shape")
        .to_owned()
}

/// Matrix product with NumPy's 1-d promotion rules.
///
/// # Errors
/// Returns [`AutogradError::ShapeMismatch`] if either operand is not 1-d or
/// 2-d, or if the contracted dimensions differ.
pub fn matmul_forward(a: &Ten64, b: &Ten64) -> Result<Ten64> {
    let mismatch = || AutogradError::shape_mismatch("@", a.shape(), b.shape());
    if !(1..=2).contains(&a.ndim()) || !(1..=2).contains(&b.ndim()) {
        return Err(mismatch());
    }
    let k_a = a.shape()[a.ndim() - 1];
    let k_b = b.shape()[0];
    if k_a != k_b {
        return Err(mismatch());
    }

    let out = match (a.ndim(), b.ndim()) {
        (2, 2) => view2(a).dot(&view2(b)).into_dyn(),
        (1, 2) => view1(a).dot(&view2(b)).into_dyn(),
        (2, 1) => view2(a).dot(&view1(b)).into_dyn(),
        _ => arr0(view1(a).dot(&view1(b))).into_dyn(),
    };
    Ok(out)
}

/// `d(a@b)`: `g @ bᵀ` and `aᵀ @ g`, with outer products standing in for the
/// transposes of 1-d operands.
pub fn matmul_backward(g: &Ten64, a: &Ten64, b: &Ten64) -> (Ten64, Ten64) {
    match (a.ndim(), b.ndim()) {
        (2, 2) => {
            let g = view2(g);
            (
                g.dot(&view2(b).t()).into_dyn(),
                view2(a).t().dot(&g).into_dyn(),
            )
        }
        (1, 2) => {
            let g = view1(g);
            (
                view2(b).dot(&g).into_dyn(),
                outer(view1(a), g).into_dyn(),
            )
        }
        (2, 1) => {
            let g = view1(g);
            (
                outer(g, view1(b)).into_dyn(),
                view2(a).t().dot(&g).into_dyn(),
            )
        }
        _ => {
            let s = g.first().copied().unwrap_or_default();
            (b * s, a * s)
        }
    }
}

fn outer(col: ArrayView1<'_, f64>, row: ArrayView1<'_, f64>) -> ndarray::Array2<f64> {
    // `dot` may pick a column-major result layout
    col.insert_axis(Axis(1))
        .dot(&row.insert_axis(Axis(0)))
        .as_standard_layout()
        .into_owned()
}

// ranks are validated in `matmul_forward` before any of these run
fn view1(x: &Ten64) -> ArrayView1<'_, f64> {
    x.view()
        .into_dimensionality::<Ix1>()
        .expect("operand rank checked by matmul_forward")
}

fn view2(x: &Ten64) -> ArrayView2<'_, f64> {
    x.view()
        .into_dimensionality::<Ix2>()
        .expect("operand rank checked by matmul_forward")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn t(shape: &[usize], data: Vec<f64>) -> Ten64 {
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn matmul_forward_and_backward_produce_correct_values() {
        let a = t(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = t(&[3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);

        let out = matmul_forward(&a, &b).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        let expected = [
            1.0 * 7.0 + 2.0 * 9.0 + 3.0 * 11.0,
            1.0 * 8.0 + 2.0 * 10.0 + 3.0 * 12.0,
            4.0 * 7.0 + 5.0 * 9.0 + 6.0 * 11.0,
            4.0 * 8.0 + 5.0 * 10.0 + 6.0 * 12.0,
        ];
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), expected);

        let g = t(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let (ga, gb) = matmul_backward(&g, &a, &b);
        assert_eq!(ga.shape(), &[2, 3]);
        assert_eq!(gb.shape(), &[3, 2]);
        // g is the identity, so ga = bᵀ and gb = aᵀ
        assert_eq!(ga, b.t().to_owned());
        assert_eq!(gb, a.t().to_owned());
    }

    #[test]
    fn matmul_rejects_inner_dimension_mismatch() {
        let a = Ten64::ones(IxDyn(&[2, 3]));
        let b = Ten64::ones(IxDyn(&[4, 2]));
        let err = matmul_forward(&a, &b).unwrap_err();
        assert!(matches!(err, AutogradError::ShapeMismatch { op: "@", .. }));
    }

    #[test]
    fn matmul_rejects_unsupported_rank() {
        let a = Ten64::ones(IxDyn(&[2, 2, 2]));
        let b = Ten64::ones(IxDyn(&[2, 2]));
        assert!(matmul_forward(&a, &b).is_err());
        assert!(matmul_forward(&Ten64::ones(IxDyn(&[])), &b).is_err());
    }

    #[test]
    fn vector_matmul_cases_have_operand_shaped_gradients() {
        let v = t(&[3], vec![1.0, 2.0, 3.0]);
        let m = t(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let out = matmul_forward(&v, &m).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[22.0, 28.0]);
        let (gv, gm) = matmul_backward(&Ten64::ones(IxDyn(&[2])), &v, &m);
        assert_eq!(gv.as_slice().unwrap(), &[3.0, 7.0, 11.0]);
        assert_eq!(gm.shape(), &[3, 2]);
        assert!(gm.is_standard_layout());
        assert_eq!(gm.iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        let mt = m.t().to_owned();
        let out = matmul_forward(&mt, &v).unwrap();
        assert_eq!(out.shape(), &[2]);
        let (gm, gv) = matmul_backward(&Ten64::ones(IxDyn(&[2])), &mt, &v);
        assert_eq!(gm.shape(), &[2, 3]);
        assert_eq!(gm.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        assert_eq!(gv.iter().copied().collect::<Vec<_>>(), vec![3.0, 7.0, 11.0]);

        let dot = matmul_forward(&v, &v).unwrap();
        assert_eq!(dot.ndim(), 0);
        assert_eq!(dot.sum(), 14.0);
        let (ga, gb) = matmul_backward(&arr0(2.0).into_dyn(), &v, &v);
        assert_eq!(ga.as_slice().unwrap(), &[2.0, 4.0, 6.0]);
        assert_eq!(gb, ga);
    }

    #[test]
    fn relu_backward_masks_non_positive_inputs() {
        let a = t(&[4], vec![-1.0, 0.0, 1.0, 2.0]);
        let g = t(&[4], vec![1.0; 4]);
        assert_eq!(relu_backward(&g, &a).as_slice().unwrap(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn log_backward_uses_clamped_input() {
        let a = t(&[2], vec![0.0, 2.0]);
        let g = t(&[2], vec![1.0, 1.0]);
        let grad = log_backward(&g, &a);
        assert_eq!(grad.as_slice().unwrap(), &[1.0 / LOG_FLOOR, 0.5]);
    }

    #[test]
    fn sum_round_trips_shapes_for_every_axis_choice() {
        let x = Ten64::ones(IxDyn(&[2, 3, 4]));
        let cases: [(Vec<usize>, bool, Vec<usize>); 4] = [
            (vec![0, 1, 2], false, vec![]),
            (vec![1], false, vec![2, 4]),
            (vec![0, 2], true, vec![1, 3, 1]),
            (vec![], false, vec![2, 3, 4]),
        ];
        for (axes, keepdims, shape) in cases {
            let out = sum_forward(&x, &axes, keepdims);
            assert_eq!(out.shape(), shape.as_slice());
            let back = sum_backward(&out, x.shape(), &axes, keepdims);
            assert_eq!(back.shape(), x.shape());
        }
    }

    #[test]
    fn mul_backward_reduces_broadcast_operand() {
        let a = t(&[3, 1], vec![1.0, 2.0, 3.0]);
        let b = t(&[3, 4], (0..12).map(f64::from).collect());
        let g = Ten64::ones(IxDyn(&[3, 4]));
        let (ga, gb) = mul_backward(&g, &a, &b);
        assert_eq!(ga.shape(), &[3, 1]);
        assert_eq!(ga.as_slice().unwrap(), &[6.0, 22.0, 38.0]);
        assert_eq!(gb.shape(), &[3, 4]);
    }
}
