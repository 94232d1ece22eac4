use std::sync::Arc;

use nabla::backend::{
    ArrayBackend, ArrayData, ArrayLiteral, ArraySpec, BackendError, BackendResult, BinaryOp,
    Primitive, ReduceKind, UnaryOp,
};
use nabla::DType;
use num_complex::Complex64;
use smallvec::SmallVec;

type Coords = SmallVec<[usize; 6]>;

/// Straightforward host kernels for every primitive. Arithmetic runs in
/// `f64` (or `Complex64`) and is rounded to the output dtype.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl ArrayBackend for CpuBackend {
    fn backend_name(&self) -> &str {
        "cpu-reference"
    }

    fn execute(
        &self,
        primitive: &Primitive,
        inputs: &[ArrayLiteral],
        output: &ArraySpec,
    ) -> BackendResult<ArrayLiteral> {
        log::trace!(
            "cpu {} -> {} {:?}",
            primitive.name(),
            output.dtype,
            output.shape
        );
        execute_operation(primitive, inputs, output)
    }
}

fn execute_operation(
    primitive: &Primitive,
    inputs: &[ArrayLiteral],
    output: &ArraySpec,
) -> BackendResult<ArrayLiteral> {
    let data = match primitive {
        Primitive::Unary(op) => op_unary(expect_single(inputs)?, output, *op)?,
        Primitive::Binary(op) => op_binary(inputs, output, *op)?,
        Primitive::Select => op_select(inputs, output)?,
        Primitive::AsType => op_astype(expect_single(inputs)?, output),
        Primitive::Broadcast => op_broadcast(expect_single(inputs)?, output)?,
        Primitive::Reshape => expect_single(inputs)?.data.clone(),
        Primitive::Transpose { perm } => op_transpose(expect_single(inputs)?, output, perm)?,
        Primitive::Reduce { kind, axes } => op_reduce(expect_single(inputs)?, output, *kind, axes)?,
        Primitive::ArgMax { axis } => op_argmax(expect_single(inputs)?, output, *axis)?,
        Primitive::Matmul => op_matmul(inputs, output)?,
        Primitive::Slice { starts } => op_slice(expect_single(inputs)?, output, starts)?,
        Primitive::Pad { low } => op_pad(expect_single(inputs)?, output, low)?,
        Primitive::Concatenate { axis } => op_concatenate(inputs, output, *axis)?,
        Primitive::RandomBits { width } => op_random_bits(expect_single(inputs)?, output, *width)?,
    };
    ArrayLiteral::new(output.clone(), data)
}

fn expect_single(inputs: &[ArrayLiteral]) -> BackendResult<&ArrayLiteral> {
    match inputs {
        [input] => Ok(input),
        _ => Err(BackendError::execution(format!(
            "operation expects a single input, got {}",
            inputs.len()
        ))),
    }
}

fn expect_pair(inputs: &[ArrayLiteral]) -> BackendResult<(&ArrayLiteral, &ArrayLiteral)> {
    match inputs {
        [a, b] => Ok((a, b)),
        _ => Err(BackendError::execution(format!(
            "operation expects two inputs, got {}",
            inputs.len()
        ))),
    }
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Coords {
    let mut coords: Coords = SmallVec::from_elem(0, dims.len());
    for (i, dim) in dims.iter().enumerate().rev() {
        if *dim > 0 {
            coords[i] = index % *dim;
            index /= *dim;
        }
    }
    coords
}

fn ravel(coords: &[usize], strides: &[usize]) -> usize {
    coords.iter().zip(strides).map(|(c, s)| c * s).sum()
}

fn op_unary(input: &ArrayLiteral, output: &ArraySpec, op: UnaryOp) -> BackendResult<ArrayData> {
    if input.spec.dtype.is_complex() {
        let values = input.data.to_complex_values();
        let result = values
            .iter()
            .map(|&z| complex_unary(op, z))
            .collect::<BackendResult<Vec<_>>>()?;
        return Ok(ArrayData::from_complex_values(output.dtype, &result));
    }
    let values = input.data.to_f64_values();
    let result: Vec<f64> = values.iter().map(|&x| real_unary(op, x)).collect();
    Ok(ArrayData::from_f64_values(output.dtype, &result))
}

fn real_unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Rsqrt => 1.0 / x.sqrt(),
        UnaryOp::Reciprocal => 1.0 / x,
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        UnaryOp::Erf => libm::erf(x),
        UnaryOp::ErfInv => erfinv(x),
        UnaryOp::Floor => x.floor(),
        UnaryOp::LogicalNot => {
            if x == 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn complex_unary(op: UnaryOp, z: Complex64) -> BackendResult<Complex64> {
    Ok(match op {
        UnaryOp::Neg => -z,
        UnaryOp::Abs => Complex64::new(z.norm(), 0.0),
        UnaryOp::Sign => {
            let norm = z.norm();
            if norm == 0.0 {
                z
            } else {
                z / norm
            }
        }
        UnaryOp::Exp => z.exp(),
        UnaryOp::Log => z.ln(),
        UnaryOp::Sin => z.sin(),
        UnaryOp::Cos => z.cos(),
        UnaryOp::Tanh => z.tanh(),
        UnaryOp::Sqrt => z.sqrt(),
        UnaryOp::Rsqrt => z.sqrt().inv(),
        UnaryOp::Reciprocal => z.inv(),
        other => {
            return Err(BackendError::unimplemented(
                "unary",
                format!("{other:?} is not defined for complex values"),
            ))
        }
    })
}

/// Inverse error function, single precision polynomial fit by M. Giles.
pub(crate) fn erfinv(x: f64) -> f64 {
    if x.is_nan() || x.abs() > 1.0 {
        return f64::NAN;
    }
    if x.abs() == 1.0 {
        return x * f64::INFINITY;
    }
    let mut w = -((1.0 - x) * (1.0 + x)).ln();
    let p = if w < 5.0 {
        w -= 2.5;
        [
            3.43273939e-07,
            -3.5233877e-06,
            -4.39150654e-06,
            0.00021858087,
            -0.00125372503,
            -0.00417768164,
            0.246640727,
            1.50140941,
        ]
        .iter()
        .fold(2.81022636e-08, |p, c| c + p * w)
    } else {
        w = w.sqrt() - 3.0;
        [
            0.000100950558,
            0.00134934322,
            -0.00367342844,
            0.00573950773,
            -0.0076224613,
            0.00943887047,
            1.00167406,
            2.83297682,
        ]
        .iter()
        .fold(-0.000200214257, |p, c| c + p * w)
    };
    p * x
}

fn op_binary(inputs: &[ArrayLiteral], output: &ArraySpec, op: BinaryOp) -> BackendResult<ArrayData> {
    let (a, b) = expect_pair(inputs)?;
    if a.data.len() != b.data.len() {
        return Err(BackendError::execution(format!(
            "binary operands hold {} and {} elements",
            a.data.len(),
            b.data.len()
        )));
    }
    if a.spec.dtype.is_complex() || b.spec.dtype.is_complex() {
        let lhs = a.data.to_complex_values();
        let rhs = b.data.to_complex_values();
        let result = lhs
            .iter()
            .zip(&rhs)
            .map(|(&x, &y)| complex_binary(op, x, y))
            .collect::<BackendResult<Vec<_>>>()?;
        return Ok(ArrayData::from_complex_values(output.dtype, &result));
    }
    let lhs = a.data.to_f64_values();
    let rhs = b.data.to_f64_values();
    let result: Vec<f64> = lhs
        .iter()
        .zip(&rhs)
        .map(|(&x, &y)| real_binary(op, x, y))
        .collect();
    Ok(ArrayData::from_f64_values(output.dtype, &result))
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn real_binary(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => x / y,
        BinaryOp::Maximum => {
            if x.is_nan() || y.is_nan() {
                f64::NAN
            } else {
                x.max(y)
            }
        }
        BinaryOp::Minimum => {
            if x.is_nan() || y.is_nan() {
                f64::NAN
            } else {
                x.min(y)
            }
        }
        BinaryOp::Power => x.powf(y),
        BinaryOp::Equal => truth(x == y),
        BinaryOp::NotEqual => truth(x != y),
        BinaryOp::Less => truth(x < y),
        BinaryOp::LessEqual => truth(x <= y),
        BinaryOp::Greater => truth(x > y),
        BinaryOp::GreaterEqual => truth(x >= y),
        BinaryOp::LogicalAnd => truth(x != 0.0 && y != 0.0),
        BinaryOp::LogicalOr => truth(x != 0.0 || y != 0.0),
    }
}

fn complex_binary(op: BinaryOp, x: Complex64, y: Complex64) -> BackendResult<Complex64> {
    let flag = |v: bool| Complex64::new(truth(v), 0.0);
    Ok(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => x / y,
        BinaryOp::Power => x.powc(y),
        BinaryOp::Equal => flag(x == y),
        BinaryOp::NotEqual => flag(x != y),
        BinaryOp::LogicalAnd => flag(x != Complex64::default() && y != Complex64::default()),
        BinaryOp::LogicalOr => flag(x != Complex64::default() || y != Complex64::default()),
        other => {
            return Err(BackendError::unimplemented(
                "binary",
                format!("{other:?} is not defined for complex values"),
            ))
        }
    })
}

fn op_select(inputs: &[ArrayLiteral], output: &ArraySpec) -> BackendResult<ArrayData> {
    let [condition, on_true, on_false] = inputs else {
        return Err(BackendError::execution(format!(
            "select expects three inputs, got {}",
            inputs.len()
        )));
    };
    let size = output.size();
    let joined = ArrayData::concat(&[&on_true.data, &on_false.data])
        .ok_or_else(|| BackendError::execution("select branches differ in dtype"))?;
    let indices: Vec<usize> = condition
        .data
        .to_f64_values()
        .iter()
        .enumerate()
        .map(|(i, &c)| if c != 0.0 { i } else { size + i })
        .collect();
    Ok(joined.gather(&indices))
}

fn op_astype(input: &ArrayLiteral, output: &ArraySpec) -> ArrayData {
    if input.spec.dtype.is_complex() || output.dtype.is_complex() {
        ArrayData::from_complex_values(output.dtype, &input.data.to_complex_values())
    } else {
        ArrayData::from_f64_values(output.dtype, &input.data.to_f64_values())
    }
}

fn op_broadcast(input: &ArrayLiteral, output: &ArraySpec) -> BackendResult<ArrayData> {
    let in_dims = &input.spec.shape;
    if in_dims.len() != output.ndim() {
        return Err(BackendError::execution(format!(
            "broadcast input rank {} differs from output rank {}",
            in_dims.len(),
            output.ndim()
        )));
    }
    let strides = compute_strides(in_dims);
    let indices: Vec<usize> = (0..output.size())
        .map(|i| {
            let coords = unravel_index(i, &output.shape);
            coords
                .iter()
                .zip(in_dims)
                .zip(&strides)
                .map(|((&c, &d), &s)| if d == 1 { 0 } else { c * s })
                .sum()
        })
        .collect();
    Ok(input.data.gather(&indices))
}

fn op_transpose(input: &ArrayLiteral, output: &ArraySpec, perm: &[usize]) -> BackendResult<ArrayData> {
    if perm.len() != input.spec.ndim() {
        return Err(BackendError::execution("transpose permutation rank mismatch"));
    }
    let strides = compute_strides(&input.spec.shape);
    let indices: Vec<usize> = (0..output.size())
        .map(|i| {
            let coords = unravel_index(i, &output.shape);
            coords
                .iter()
                .zip(perm)
                .map(|(&c, &axis)| c * strides[axis])
                .sum()
        })
        .collect();
    Ok(input.data.gather(&indices))
}

/// Output position of each input element once `axes` are collapsed to size 1.
fn reduced_positions(in_dims: &[usize], axes: &[usize]) -> Vec<usize> {
    let mut kept = in_dims.to_vec();
    for &axis in axes {
        kept[axis] = 1;
    }
    let out_strides = compute_strides(&kept);
    (0..in_dims.iter().product::<usize>())
        .map(|i| {
            let mut coords = unravel_index(i, in_dims);
            for &axis in axes {
                coords[axis] = 0;
            }
            ravel(&coords, &out_strides)
        })
        .collect()
}

fn op_reduce(
    input: &ArrayLiteral,
    output: &ArraySpec,
    kind: ReduceKind,
    axes: &[usize],
) -> BackendResult<ArrayData> {
    if axes.iter().any(|&a| a >= input.spec.ndim()) {
        return Err(BackendError::execution("reduce axis out of range"));
    }
    let positions = reduced_positions(&input.spec.shape, axes);
    let size = output.size();
    if input.spec.dtype.is_complex() {
        if kind != ReduceKind::Sum {
            return Err(BackendError::unimplemented(
                "reduce",
                "only sums are defined for complex values",
            ));
        }
        let mut acc = vec![Complex64::default(); size];
        for (value, &pos) in input.data.to_complex_values().iter().zip(&positions) {
            acc[pos] += *value;
        }
        return Ok(ArrayData::from_complex_values(output.dtype, &acc));
    }
    let init = match kind {
        ReduceKind::Sum => 0.0,
        ReduceKind::Max => f64::NEG_INFINITY,
        ReduceKind::Min => f64::INFINITY,
    };
    let mut acc = vec![init; size];
    for (&value, &pos) in input.data.to_f64_values().iter().zip(&positions) {
        let current = acc[pos];
        acc[pos] = match kind {
            ReduceKind::Sum => current + value,
            ReduceKind::Max if value.is_nan() || current.is_nan() => f64::NAN,
            ReduceKind::Max => current.max(value),
            ReduceKind::Min if value.is_nan() || current.is_nan() => f64::NAN,
            ReduceKind::Min => current.min(value),
        };
    }
    Ok(ArrayData::from_f64_values(output.dtype, &acc))
}

fn op_argmax(input: &ArrayLiteral, output: &ArraySpec, axis: usize) -> BackendResult<ArrayData> {
    let dims = &input.spec.shape;
    if axis >= dims.len() {
        return Err(BackendError::execution("argmax axis out of range"));
    }
    let values = input.data.to_f64_values();
    let strides = compute_strides(dims);
    let axis_len = dims[axis];
    let inner = strides[axis];
    let outer = if axis_len * inner == 0 {
        0
    } else {
        values.len() / (axis_len * inner)
    };
    let mut result = vec![0u32; output.size()];
    for outer_idx in 0..outer {
        for inner_idx in 0..inner {
            let base = outer_idx * axis_len * inner + inner_idx;
            let mut best = 0usize;
            for a in 1..axis_len {
                let value = values[base + a * inner];
                let current = values[base + best * inner];
                if !current.is_nan() && (value > current || value.is_nan()) {
                    best = a;
                }
            }
            result[outer_idx * inner + inner_idx] = best as u32;
        }
    }
    Ok(ArrayData::Uint32(Arc::from(result)))
}

fn op_matmul(inputs: &[ArrayLiteral], output: &ArraySpec) -> BackendResult<ArrayData> {
    let (a, b) = expect_pair(inputs)?;
    let (a_dims, b_dims) = (&a.spec.shape, &b.spec.shape);
    let rank = a_dims.len();
    if rank < 2 || b_dims.len() != rank || a_dims[..rank - 2] != b_dims[..rank - 2] {
        return Err(BackendError::execution(format!(
            "matmul expects matching batch axes, got {a_dims:?} and {b_dims:?}"
        )));
    }
    let (m, k, n) = (a_dims[rank - 2], a_dims[rank - 1], b_dims[rank - 1]);
    if b_dims[rank - 2] != k {
        return Err(BackendError::execution(format!(
            "matmul contraction mismatch: {a_dims:?} and {b_dims:?}"
        )));
    }
    let batch: usize = a_dims[..rank - 2].iter().product();

    if output.dtype.is_complex() {
        let (lhs, rhs) = (a.data.to_complex_values(), b.data.to_complex_values());
        let mut out = vec![Complex64::default(); batch * m * n];
        matmul_into(&lhs, &rhs, &mut out, batch, m, k, n);
        return Ok(ArrayData::from_complex_values(output.dtype, &out));
    }
    let (lhs, rhs) = (a.data.to_f64_values(), b.data.to_f64_values());
    let mut out = vec![0.0; batch * m * n];
    matmul_into(&lhs, &rhs, &mut out, batch, m, k, n);
    Ok(ArrayData::from_f64_values(output.dtype, &out))
}

fn matmul_into<T>(lhs: &[T], rhs: &[T], out: &mut [T], batch: usize, m: usize, k: usize, n: usize)
where
    T: Copy + std::ops::Mul<Output = T> + std::ops::AddAssign,
{
    for bi in 0..batch {
        let (lhs, rhs) = (&lhs[bi * m * k..], &rhs[bi * k * n..]);
        let out = &mut out[bi * m * n..(bi + 1) * m * n];
        for i in 0..m {
            for p in 0..k {
                let scale = lhs[i * k + p];
                for j in 0..n {
                    out[i * n + j] += scale * rhs[p * n + j];
                }
            }
        }
    }
}

fn op_slice(input: &ArrayLiteral, output: &ArraySpec, starts: &[usize]) -> BackendResult<ArrayData> {
    let in_dims = &input.spec.shape;
    if starts.len() != in_dims.len() || output.ndim() != in_dims.len() {
        return Err(BackendError::execution("slice rank mismatch"));
    }
    if starts
        .iter()
        .zip(&output.shape)
        .zip(in_dims)
        .any(|((s, len), d)| s + len > *d)
    {
        return Err(BackendError::execution(format!(
            "slice of {:?} at {starts:?} exceeds input {in_dims:?}",
            output.shape
        )));
    }
    let strides = compute_strides(in_dims);
    let indices: Vec<usize> = (0..output.size())
        .map(|i| {
            let coords = unravel_index(i, &output.shape);
            coords
                .iter()
                .zip(starts)
                .zip(&strides)
                .map(|((c, s), st)| (c + s) * st)
                .sum()
        })
        .collect();
    Ok(input.data.gather(&indices))
}

fn op_pad(input: &ArrayLiteral, output: &ArraySpec, low: &[usize]) -> BackendResult<ArrayData> {
    let in_dims = &input.spec.shape;
    if low.len() != in_dims.len() || output.ndim() != in_dims.len() {
        return Err(BackendError::execution("pad rank mismatch"));
    }
    let strides = compute_strides(in_dims);
    let indices: Vec<Option<usize>> = (0..output.size())
        .map(|i| {
            let coords = unravel_index(i, &output.shape);
            let mut index = 0;
            for (axis, &c) in coords.iter().enumerate() {
                let shifted = c.checked_sub(low[axis])?;
                if shifted >= in_dims[axis] {
                    return None;
                }
                index += shifted * strides[axis];
            }
            Some(index)
        })
        .collect();
    Ok(input.data.gather_or_zero(&indices))
}

fn op_concatenate(inputs: &[ArrayLiteral], output: &ArraySpec, axis: usize) -> BackendResult<ArrayData> {
    if axis >= output.ndim() {
        return Err(BackendError::execution("concatenate axis out of range"));
    }
    let parts: Vec<&ArrayData> = inputs.iter().map(|i| &i.data).collect();
    let joined = ArrayData::concat(&parts)
        .ok_or_else(|| BackendError::execution("concatenate inputs differ in dtype"))?;

    let outer: usize = output.shape[..axis].iter().product();
    let inner: usize = output.shape[axis + 1..].iter().product();
    let mut offsets = Vec::with_capacity(inputs.len());
    let mut offset = 0;
    for input in inputs {
        offsets.push(offset);
        offset += input.data.len();
    }
    let mut indices = Vec::with_capacity(output.size());
    for o in 0..outer {
        for (input, &base) in inputs.iter().zip(&offsets) {
            let chunk = input.spec.shape[axis] * inner;
            indices.extend(base + o * chunk..base + (o + 1) * chunk);
        }
    }
    Ok(joined.gather(&indices))
}

const THREEFRY_ROTATIONS: [u32; 8] = [13, 15, 26, 6, 17, 29, 16, 24];

/// Threefry-2x32 with 20 rounds.
pub(crate) fn threefry2x32(key: [u32; 2], counter: [u32; 2]) -> [u32; 2] {
    let ks = [key[0], key[1], 0x1BD1_1BDA ^ key[0] ^ key[1]];
    let mut x0 = counter[0].wrapping_add(ks[0]);
    let mut x1 = counter[1].wrapping_add(ks[1]);
    for round in 0..20 {
        x0 = x0.wrapping_add(x1);
        x1 = x1.rotate_left(THREEFRY_ROTATIONS[round % 8]);
        x1 ^= x0;
        if round % 4 == 3 {
            let injection = round / 4 + 1;
            x0 = x0.wrapping_add(ks[injection % 3]);
            x1 = x1
                .wrapping_add(ks[(injection + 1) % 3])
                .wrapping_add(injection as u32);
        }
    }
    [x0, x1]
}

fn op_random_bits(key: &ArrayLiteral, output: &ArraySpec, width: usize) -> BackendResult<ArrayData> {
    let key = match &key.data {
        ArrayData::Uint32(words) if words.len() == 2 => [words[0], words[1]],
        _ => return Err(BackendError::execution("random key must be two uint32 words")),
    };
    let count = output.size();
    let words_needed = (count * width).div_ceil(4);
    let mut words = Vec::with_capacity(words_needed + 1);
    for pair in 0..words_needed.div_ceil(2) {
        words.extend(threefry2x32(key, [pair as u32, 0]));
    }
    Ok(match (width, output.dtype) {
        (4, DType::Uint32) => {
            words.truncate(count);
            ArrayData::Uint32(Arc::from(words))
        }
        (2, DType::Uint16) => ArrayData::Uint16(
            (0..count)
                .map(|i| (words[i / 2] >> (16 * (i % 2))) as u16)
                .collect(),
        ),
        (1, DType::Uint8) => ArrayData::Uint8(
            (0..count)
                .map(|i| (words[i / 4] >> (8 * (i % 4))) as u8)
                .collect(),
        ),
        (width, dtype) => {
            return Err(BackendError::execution(format!(
                "cannot produce {dtype} values from {width}-byte random words"
            )))
        }
    })
}
