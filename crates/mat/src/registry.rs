//! Converters keyed by device.

use crate::{ArmMatConverter, CpuMatConverter, MatConverterAcc};
use compute::{ComputeError, DeviceType, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

#[derive(Default)]
pub struct MatConverterRegistry {
    converters: HashMap<DeviceType, Arc<dyn MatConverterAcc>>,
}

impl MatConverterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the host-side converters.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DeviceType::Cpu, Arc::new(CpuMatConverter::new()));
        registry.register(DeviceType::Arm, Arc::new(ArmMatConverter::new()));
        registry
    }

    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<MatConverterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_builtin)
    }

    pub fn register(&mut self, device_type: DeviceType, converter: Arc<dyn MatConverterAcc>) {
        self.converters.insert(device_type, converter);
    }

    pub fn get(&self, device_type: DeviceType) -> Result<Arc<dyn MatConverterAcc>> {
        self.converters
            .get(&device_type)
            .cloned()
            .ok_or_else(|| ComputeError::DeviceNotSupported(format!("no mat converter for device {device_type}")))
    }
}
