use crate::fp16::{f16_to_f32, f32_to_f16};
use crate::{BufferView, ComputeError, Kernel};
use bytemuck::{Pod, Zeroable};

/// Uniform block shared by every binary kernel (binding 3).
///
/// Operand `x` is read at `(i / x_inner) % x_len`, which covers equal shapes,
/// scalars, trailing broadcasts and per-channel broadcasts.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BinaryConfig {
    pub len: u32,
    pub a_len: u32,
    pub a_inner: u32,
    pub b_len: u32,
    pub b_inner: u32,
    pub is_half: u32,
    pub _pad: [u32; 2],
}

impl BinaryConfig {
    /// Builds the config for `out = a op b` with numpy-aligned shapes.
    pub fn for_shapes(out: &[usize], a: &[usize], b: &[usize], half: bool) -> Result<Self, ComputeError> {
        let (a_len, a_inner) = operand_span(out, a)?;
        let (b_len, b_inner) = operand_span(out, b)?;
        Ok(Self {
            len: out.iter().product::<usize>() as u32,
            a_len,
            a_inner,
            b_len,
            b_inner,
            is_half: u32::from(half),
            _pad: [0; 2],
        })
    }

    #[must_use]
    pub fn a_index(&self, i: usize) -> usize {
        (i / self.a_inner as usize) % self.a_len as usize
    }

    #[must_use]
    pub fn b_index(&self, i: usize) -> usize {
        (i / self.b_inner as usize) % self.b_len as usize
    }
}

fn operand_span(out: &[usize], dims: &[usize]) -> Result<(u32, u32), ComputeError> {
    if dims.len() > out.len() {
        return Err(ComputeError::Param(format!("operand {dims:?} has higher rank than output {out:?}")));
    }
    let mut aligned = vec![1; out.len() - dims.len()];
    aligned.extend_from_slice(dims);

    let Some(first) = aligned.iter().position(|&d| d != 1) else {
        return Ok((1, 1));
    };
    let last = aligned.iter().rposition(|&d| d != 1).unwrap_or(first);
    if aligned[first..=last] != out[first..=last] {
        return Err(ComputeError::NotSupported(format!(
            "broadcast of {dims:?} into {out:?} is not a contiguous span"
        )));
    }
    let len: usize = aligned[first..=last].iter().product();
    let inner: usize = out[last + 1..].iter().product();
    Ok((len as u32, inner as u32))
}

/// Scalar definition of every binary kernel.
#[must_use]
pub fn apply(kernel: Kernel, x: f32, y: f32) -> f32 {
    match kernel {
        Kernel::Add => x + y,
        Kernel::Sub => x - y,
        Kernel::Mul => x * y,
        Kernel::Div => x / y,
        Kernel::Max => x.max(y),
        Kernel::Min => x.min(y),
    }
}

/// Integer definition of every binary kernel. Arithmetic wraps; `None` when
/// the division is undefined.
#[must_use]
pub fn apply_i32(kernel: Kernel, x: i32, y: i32) -> Option<i32> {
    match kernel {
        Kernel::Add => Some(x.wrapping_add(y)),
        Kernel::Sub => Some(x.wrapping_sub(y)),
        Kernel::Mul => Some(x.wrapping_mul(y)),
        Kernel::Div => x.checked_div(y),
        Kernel::Max => Some(x.max(y)),
        Kernel::Min => Some(x.min(y)),
    }
}

fn decode(view: &BufferView, half: bool) -> Vec<f32> {
    if half {
        bytemuck::pod_collect_to_vec::<u8, u16>(&view.data)
            .into_iter()
            .map(f16_to_f32)
            .collect()
    } else {
        bytemuck::pod_collect_to_vec::<u8, f32>(&view.data)
    }
}

pub fn handle_binary(kernel: Kernel, binds: &[BufferView]) -> Result<Vec<Vec<u8>>, ComputeError> {
    if binds.len() < 4 {
        // IN1, IN2, OUT, CONFIG per layout.rs
        return Err(ComputeError::ShapeMismatch(
            "binary kernels expect 4 buffers (input_a, input_b, output, config)",
        ));
    }
    let (a_view, b_view, out_view, cfg_view) = (&binds[0], &binds[1], &binds[2], &binds[3]);

    if cfg_view.data.len() != std::mem::size_of::<BinaryConfig>() {
        return Err(ComputeError::ShapeMismatch("binary config buffer has the wrong size"));
    }
    let cfg: BinaryConfig = bytemuck::pod_read_unaligned(&cfg_view.data);

    let elem = if cfg.is_half != 0 { 2 } else { 4 };
    if [a_view, b_view, out_view].iter().any(|v| v.element_size_in_bytes != elem) {
        return Err(ComputeError::ShapeMismatch(
            "binary kernel element size disagrees with the config precision",
        ));
    }
    if cfg.a_inner == 0 || cfg.b_inner == 0 || cfg.a_len == 0 || cfg.b_len == 0 {
        return Err(ComputeError::ShapeMismatch("binary config has an empty operand span"));
    }
    if a_view.element_count() != cfg.a_len as usize
        || b_view.element_count() != cfg.b_len as usize
        || out_view.element_count() != cfg.len as usize
    {
        return Err(ComputeError::ShapeMismatch(
            "binary operand sizes do not match the config spans",
        ));
    }

    let half = cfg.is_half != 0;
    let a = decode(a_view, half);
    let b = decode(b_view, half);
    let values = (0..cfg.len as usize).map(|i| apply(kernel, a[cfg.a_index(i)], b[cfg.b_index(i)]));

    let out_bytes = if half {
        let bits: Vec<u16> = values.map(f32_to_f16).collect();
        bytemuck::cast_slice::<u16, u8>(&bits).to_vec()
    } else {
        let floats: Vec<f32> = values.collect();
        bytemuck::cast_slice::<f32, u8>(&floats).to_vec()
    };
    Ok(vec![out_bytes])
}
