//! Shape helpers. Blob dims are non-negative; reshape targets may carry the
//! `0` (copy input dim) and `-1` (infer) placeholders.

use crate::{ComputeError, Result};

pub type DimsVector = Vec<usize>;

/// Rank every model-declared blob descriptor is normalized to.
pub const CANONICAL_RANK: usize = 4;

#[must_use]
pub fn count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Element count of `dims[start..end]`, clamped to the rank.
#[must_use]
pub fn count_range(dims: &[usize], start: usize, end: usize) -> usize {
    let end = end.min(dims.len());
    if start >= end {
        return 1;
    }
    dims[start..end].iter().product()
}

/// Pads `dims` with trailing 1s up to `rank`; longer shapes fold their tail
/// into the last kept dimension so the element count is preserved.
#[must_use]
pub fn to_rank(dims: &[usize], rank: usize) -> DimsVector {
    if rank == 0 {
        return Vec::new();
    }
    let mut out: DimsVector = dims.iter().copied().take(rank).collect();
    if dims.len() > rank {
        out[rank - 1] = count_range(dims, rank - 1, dims.len());
    }
    out.resize(rank, 1);
    out
}

/// Output dims of reshaping `input` with `shape` applied from `axis` over
/// `num_axes` target entries.
pub fn reshape(input: &[usize], shape: &[i64], axis: usize, num_axes: usize) -> Result<DimsVector> {
    if axis > input.len() || num_axes > shape.len() {
        return Err(ComputeError::Param(format!(
            "reshape axis {axis} / num_axes {num_axes} out of range for input rank {} and shape rank {}",
            input.len(),
            shape.len()
        )));
    }
    let mut output: DimsVector = input[..axis].to_vec();
    let mut infer_at = None;
    for (i, &target) in shape[..num_axes].iter().enumerate() {
        let dim = match target {
            0 => *input.get(axis + i).ok_or_else(|| {
                ComputeError::Param(format!("reshape copies dim {} beyond input rank", axis + i))
            })?,
            -1 => {
                if infer_at.replace(output.len()).is_some() {
                    return Err(ComputeError::param("reshape shape has more than one -1"));
                }
                1
            }
            d if d > 0 => d as usize,
            d => return Err(ComputeError::Param(format!("reshape shape has invalid dim {d}"))),
        };
        output.push(dim);
    }

    let total = count(input);
    if let Some(index) = infer_at {
        let known = count(&output);
        if known == 0 || total % known != 0 {
            return Err(ComputeError::Param(format!(
                "cannot infer reshape dim: {total} elements into {output:?}"
            )));
        }
        output[index] = total / known;
    }
    if count(&output) != total {
        return Err(ComputeError::Param(format!(
            "reshape changes element count: {input:?} -> {output:?}"
        )));
    }
    Ok(output)
}

/// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
pub fn broadcast(a: &[usize], b: &[usize]) -> Result<DimsVector> {
    let rank = a.len().max(b.len());
    let mut out = vec![1; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(ComputeError::Param(format!("shapes {a:?} and {b:?} cannot broadcast")));
            }
        };
    }
    Ok(out)
}
