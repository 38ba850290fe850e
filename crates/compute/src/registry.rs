//! Explicit accelerator registry: (layer type, device type) -> constructor.

use crate::device::cpu::{CpuBinaryAcc, CpuCumsumAcc, CpuReshapeAcc};
use crate::device::shader::ShaderBinaryAcc;
use crate::{ComputeError, DataFormat, DeviceType, LayerAcc, LayerType, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

pub type AccCreator = Box<dyn Fn() -> Box<dyn LayerAcc> + Send + Sync>;

const BINARY_LAYERS: [LayerType; 6] =
    [LayerType::Add, LayerType::Sub, LayerType::Mul, LayerType::Div, LayerType::Max, LayerType::Min];

#[derive(Default)]
pub struct AccRegistry {
    creators: HashMap<(LayerType, DeviceType), AccCreator>,
    layouts: HashMap<(LayerType, DeviceType), Vec<DataFormat>>,
}

impl AccRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every accelerator this build provides.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for layer_type in BINARY_LAYERS {
            let Some(kernel) = layer_type.kernel() else { continue };
            registry.register(layer_type, DeviceType::Cpu, move || Box::new(CpuBinaryAcc::new(kernel)));
            registry.register(layer_type, DeviceType::Shader, move || {
                Box::new(ShaderBinaryAcc::new(kernel, DeviceType::Shader))
            });
            #[cfg(feature = "gpu")]
            registry.register(layer_type, DeviceType::Gpu, move || Box::new(ShaderBinaryAcc::new(kernel, DeviceType::Gpu)));
        }
        registry.register(LayerType::Reshape, DeviceType::Cpu, || Box::new(CpuReshapeAcc::new()));
        registry.register(LayerType::Cumsum, DeviceType::Cpu, || Box::new(CpuCumsumAcc::new()));
        registry.register_layout(LayerType::Add, DeviceType::Shader, DataFormat::Nhc4w4);
        registry
    }

    /// Process-wide registry, built on first use.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<AccRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_builtin)
    }

    pub fn register(
        &mut self,
        layer_type: LayerType,
        device_type: DeviceType,
        creator: impl Fn() -> Box<dyn LayerAcc> + Send + Sync + 'static,
    ) {
        self.creators.insert((layer_type, device_type), Box::new(creator));
    }

    /// Declares a layout the device implements natively for the layer.
    pub fn register_layout(&mut self, layer_type: LayerType, device_type: DeviceType, format: DataFormat) {
        let layouts = self.layouts.entry((layer_type, device_type)).or_default();
        if !layouts.contains(&format) {
            layouts.push(format);
        }
    }

    pub fn create(&self, layer_type: LayerType, device_type: DeviceType) -> Result<Box<dyn LayerAcc>> {
        self.creators
            .get(&(layer_type, device_type))
            .map(|create| create())
            .ok_or_else(|| ComputeError::NotSupported(format!("no {layer_type:?} accelerator on {device_type}")))
    }

    #[must_use]
    pub fn layouts(&self, layer_type: LayerType, device_type: DeviceType) -> &[DataFormat] {
        self.layouts.get(&(layer_type, device_type)).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn supports(&self, layer_type: LayerType, device_type: DeviceType) -> bool {
        self.creators.contains_key(&(layer_type, device_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_host_and_shader_devices() {
        let registry = AccRegistry::global();
        for layer_type in BINARY_LAYERS {
            assert!(registry.supports(layer_type, DeviceType::Cpu));
            assert!(registry.supports(layer_type, DeviceType::Shader));
        }
        assert_eq!(registry.create(LayerType::Cumsum, DeviceType::Cpu).unwrap().device_type(), DeviceType::Cpu);
        let err = registry.create(LayerType::Cumsum, DeviceType::Shader).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::NotSupported);
        assert_eq!(registry.layouts(LayerType::Add, DeviceType::Shader), &[DataFormat::Nhc4w4]);
        assert!(registry.layouts(LayerType::Sub, DeviceType::Shader).is_empty());
    }
}
