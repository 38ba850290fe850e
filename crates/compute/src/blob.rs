//! Blob: the runtime tensor handle shared by every component.
//!
//! A [`Blob`] pairs a [`BlobDesc`] (shape, type, layout, device, name) with a
//! [`BlobHandle`] (backing memory plus a byte offset). Backing memory is
//! reference counted, so cloning a blob aliases the same bytes; constant blobs
//! cached by an accelerator live exactly as long as the last blob bound to them.

use crate::dims::{self, DimsVector};
use crate::fp16::{f16_to_f32, f32_to_f16};
use crate::types::{DataFlag, DataFormat, DataType, DeviceType};
use crate::{ComputeError, Result};
use bytemuck::Pod;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Host-addressable memory behind a blob.
pub type HostBuffer = Arc<RwLock<Vec<u8>>>;

#[must_use]
pub fn host_buffer(size: usize) -> HostBuffer {
    Arc::new(RwLock::new(vec![0u8; size]))
}

#[derive(Clone)]
pub struct BlobHandle {
    pub base: HostBuffer,
    pub bytes_offset: usize,
}

impl BlobHandle {
    #[must_use]
    pub fn new(base: HostBuffer) -> Self {
        Self { base, bytes_offset: 0 }
    }

    #[must_use]
    pub fn with_offset(base: HostBuffer, bytes_offset: usize) -> Self {
        Self { base, bytes_offset }
    }

    /// Identity of the backing allocation.
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.base) as *const () as usize
    }

    #[must_use]
    pub fn same_memory(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.base, &other.base) && self.bytes_offset == other.bytes_offset
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.base.read().len().saturating_sub(self.bytes_offset)
    }
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle")
            .field("base", &format_args!("{:#x}", self.id()))
            .field("bytes_offset", &self.bytes_offset)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobDesc {
    pub device_type: DeviceType,
    pub data_type: DataType,
    pub data_format: DataFormat,
    pub dims: DimsVector,
    pub name: String,
}

impl BlobDesc {
    pub fn new(
        device_type: DeviceType,
        data_type: DataType,
        data_format: DataFormat,
        dims: DimsVector,
        name: impl Into<String>,
    ) -> Self {
        Self { device_type, data_type, data_format, dims, name: name.into() }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        dims::count(&self.dims)
    }

    pub fn byte_size(&self) -> Result<usize> {
        Ok(self.count() * self.data_type.checked_byte_size()?)
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    desc: BlobDesc,
    handle: BlobHandle,
    flag: DataFlag,
}

impl Blob {
    #[must_use]
    pub fn new(desc: BlobDesc, handle: BlobHandle) -> Self {
        Self { desc, handle, flag: DataFlag::default() }
    }

    /// Allocates zeroed host memory sized by the descriptor.
    pub fn alloc(desc: BlobDesc) -> Result<Self> {
        let size = desc.byte_size()?;
        Ok(Self::new(desc, BlobHandle::new(host_buffer(size))))
    }

    #[must_use]
    pub fn desc(&self) -> &BlobDesc {
        &self.desc
    }

    pub fn desc_mut(&mut self) -> &mut BlobDesc {
        &mut self.desc
    }

    pub fn set_desc(&mut self, desc: BlobDesc) {
        self.desc = desc;
    }

    #[must_use]
    pub fn handle(&self) -> &BlobHandle {
        &self.handle
    }

    pub fn set_handle(&mut self, handle: BlobHandle) {
        self.handle = handle;
    }

    #[must_use]
    pub fn flag(&self) -> DataFlag {
        self.flag
    }

    pub fn set_flag(&mut self, flag: DataFlag) {
        self.flag = flag;
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    fn checked_range(&self, len: usize) -> Result<std::ops::Range<usize>> {
        let start = self.handle.bytes_offset;
        let end = start + len;
        let capacity = self.handle.base.read().len();
        if end > capacity {
            return Err(ComputeError::InvalidInput(format!(
                "blob {} needs bytes {start}..{end} but its memory holds {capacity}",
                self.desc.name
            )));
        }
        Ok(start..end)
    }

    /// Runs `f` over the blob's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = self.checked_range(self.desc.byte_size()?)?;
        let guard = self.handle.base.read();
        Ok(f(&guard[range]))
    }

    /// Runs `f` over the blob's bytes mutably.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let range = self.checked_range(self.desc.byte_size()?)?;
        let mut guard = self.handle.base.write();
        Ok(f(&mut guard[range]))
    }

    /// Copies the contents out as `T`, which must match the element size.
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        self.with_bytes(bytemuck::pod_collect_to_vec::<u8, T>)
    }

    /// Overwrites the contents from `values`, which must cover the blob.
    pub fn write<T: Pod>(&self, values: &[T]) -> Result<()> {
        self.check_element::<T>()?;
        if values.len() != self.desc.count() {
            return Err(ComputeError::InvalidInput(format!(
                "blob {} holds {} elements, got {}",
                self.desc.name,
                self.desc.count(),
                values.len()
            )));
        }
        self.with_bytes_mut(|bytes| bytes.copy_from_slice(bytemuck::cast_slice(values)))
    }

    fn check_element<T>(&self) -> Result<()> {
        let size = self.desc.data_type.checked_byte_size()?;
        if size != std::mem::size_of::<T>() {
            return Err(ComputeError::Param(format!(
                "blob {} has {:?} elements of {size} bytes, not {}",
                self.desc.name,
                self.desc.data_type,
                std::mem::size_of::<T>()
            )));
        }
        Ok(())
    }

    /// Reads any numeric blob widened to `f32`.
    pub fn read_f32(&self) -> Result<Vec<f32>> {
        let data_type = self.desc.data_type;
        self.with_bytes(|bytes| decode_f32(data_type, bytes))?
    }

    /// Writes `f32` values narrowed to the blob's data type.
    pub fn write_f32(&self, values: &[f32]) -> Result<()> {
        if values.len() != self.desc.count() {
            return Err(ComputeError::InvalidInput(format!(
                "blob {} holds {} elements, got {}",
                self.desc.name,
                self.desc.count(),
                values.len()
            )));
        }
        let encoded = encode_f32(self.desc.data_type, values)?;
        self.with_bytes_mut(|bytes| bytes.copy_from_slice(&encoded))
    }
}

pub(crate) fn decode_f32(data_type: DataType, bytes: &[u8]) -> Result<Vec<f32>> {
    Ok(match data_type {
        DataType::Float => bytemuck::pod_collect_to_vec::<u8, f32>(bytes),
        DataType::Half => bytemuck::pod_collect_to_vec::<u8, u16>(bytes)
            .into_iter()
            .map(f16_to_f32)
            .collect(),
        DataType::Int32 => bytemuck::pod_collect_to_vec::<u8, i32>(bytes)
            .into_iter()
            .map(|v| v as f32)
            .collect(),
        DataType::Int8 => bytes.iter().map(|&v| f32::from(v as i8)).collect(),
        DataType::Auto => return Err(ComputeError::param("cannot decode data type auto")),
    })
}

pub(crate) fn encode_f32(data_type: DataType, values: &[f32]) -> Result<Vec<u8>> {
    Ok(match data_type {
        DataType::Float => bytemuck::cast_slice::<f32, u8>(values).to_vec(),
        DataType::Half => {
            let half: Vec<u16> = values.iter().copied().map(f32_to_f16).collect();
            bytemuck::cast_slice::<u16, u8>(&half).to_vec()
        }
        DataType::Int32 => {
            let ints: Vec<i32> = values.iter().map(|&v| v as i32).collect();
            bytemuck::cast_slice::<i32, u8>(&ints).to_vec()
        }
        DataType::Int8 => values.iter().map(|&v| (v.clamp(-128.0, 127.0) as i8) as u8).collect(),
        DataType::Auto => return Err(ComputeError::param("cannot encode data type auto")),
    })
}

pub type BlobMap = HashMap<String, Blob>;

/// Raw constant data (weights, shape tensors) as stored in the model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBuffer {
    data_type: DataType,
    dims: DimsVector,
    bytes: Arc<[u8]>,
}

impl RawBuffer {
    pub fn new(data_type: DataType, dims: DimsVector, bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes = bytes.into();
        let expected = dims::count(&dims) * data_type.checked_byte_size()?;
        if bytes.len() != expected {
            return Err(ComputeError::Param(format!(
                "raw buffer of {dims:?} {data_type:?} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { data_type, dims, bytes })
    }

    #[must_use]
    pub fn from_f32(dims: DimsVector, values: &[f32]) -> Self {
        debug_assert_eq!(dims::count(&dims), values.len());
        Self { data_type: DataType::Float, dims, bytes: bytemuck::cast_slice::<_, u8>(values).into() }
    }

    #[must_use]
    pub fn from_i32(dims: DimsVector, values: &[i32]) -> Self {
        debug_assert_eq!(dims::count(&dims), values.len());
        Self { data_type: DataType::Int32, dims, bytes: bytemuck::cast_slice::<_, u8>(values).into() }
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_f32(&self) -> Result<Vec<f32>> {
        decode_f32(self.data_type, &self.bytes)
    }

    pub fn to_i32(&self) -> Result<Vec<i32>> {
        if self.data_type != DataType::Int32 {
            return Err(ComputeError::Param(format!("raw buffer holds {:?}, not int32", self.data_type)));
        }
        Ok(bytemuck::pod_collect_to_vec::<u8, i32>(&self.bytes))
    }
}

/// Constant inputs of a graph keyed by blob name.
pub type ConstantResource = HashMap<String, Arc<RawBuffer>>;
/// Names of constants whose values depend on the input shapes.
pub type ConstantResourceFlag = HashSet<String>;
/// Device-resident converted constants keyed by source blob name.
pub type ConstantBlobMap = HashMap<String, Blob>;

#[cfg(test)]
mod tests {
    use super::*;

    fn float_desc(dims: DimsVector) -> BlobDesc {
        BlobDesc::new(DeviceType::Cpu, DataType::Float, DataFormat::Nchw, dims, "x")
    }

    #[test]
    fn blob_reads_back_what_was_written() {
        let blob = Blob::alloc(float_desc(vec![1, 2, 2, 1])).unwrap();
        blob.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(blob.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(blob.to_vec::<u16>().is_err());
    }

    #[test]
    fn offset_handles_alias_a_shared_arena() {
        let arena = host_buffer(32);
        let a = Blob::new(float_desc(vec![4]), BlobHandle::with_offset(arena.clone(), 0));
        let b = Blob::new(float_desc(vec![4]), BlobHandle::with_offset(arena.clone(), 16));
        a.write(&[1.0f32; 4]).unwrap();
        b.write(&[2.0f32; 4]).unwrap();
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0; 4]);
        assert!(!a.handle().same_memory(b.handle()));
        assert_eq!(a.handle().id(), b.handle().id());

        let overflow = Blob::new(float_desc(vec![8]), BlobHandle::with_offset(arena, 16));
        assert!(overflow.to_vec::<f32>().is_err());
    }

    #[test]
    fn half_blobs_widen_and_narrow() {
        let mut desc = float_desc(vec![3]);
        desc.data_type = DataType::Half;
        let blob = Blob::alloc(desc).unwrap();
        blob.write_f32(&[0.5, -1.0, 3.0]).unwrap();
        assert_eq!(blob.read_f32().unwrap(), vec![0.5, -1.0, 3.0]);
    }

    #[test]
    fn raw_buffer_validates_length() {
        assert!(RawBuffer::new(DataType::Float, vec![2], vec![0u8; 7]).is_err());
        let raw = RawBuffer::from_i32(vec![2], &[3, -1]);
        assert_eq!(raw.to_i32().unwrap(), vec![3, -1]);
        assert_eq!(raw.to_f32().unwrap(), vec![3.0, -1.0]);
    }
}
