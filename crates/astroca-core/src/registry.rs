//! Kernel registry

use crate::error::StageError;
use crate::kernel::{Kernel, PassthroughKernel};
use crate::stage::{OutputKind, StageKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One kernel per stage, populated once at process start
pub struct KernelRegistry {
    kernels: HashMap<StageKind, Arc<dyn Kernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: HashMap::with_capacity(StageKind::ALL.len()),
        }
    }

    /// Register a kernel under the stage it implements, returning any kernel it replaces
    pub fn register(&mut self, kernel: Arc<dyn Kernel>) -> Option<Arc<dyn Kernel>> {
        let stage = kernel.stage();
        info!("Registering kernel: {} ({})", kernel.name(), stage);
        self.kernels.insert(stage, kernel)
    }

    /// Fill every stage without a kernel with a [`PassthroughKernel`]
    ///
    /// Stages producing a table are left alone; they have no passthrough.
    pub fn with_passthrough_fallback(mut self) -> Self {
        for stage in StageKind::ALL {
            if stage.descriptor().output != OutputKind::Table && !self.contains(stage) {
                debug!("No kernel for {}, using passthrough", stage);
                self.kernels
                    .insert(stage, Arc::new(PassthroughKernel::new(stage)));
            }
        }
        self
    }

    pub fn get(&self, stage: StageKind) -> Result<Arc<dyn Kernel>, StageError> {
        self.kernels
            .get(&stage)
            .cloned()
            .ok_or(StageError::NoKernel(stage))
    }

    #[must_use]
    pub fn contains(&self, stage: StageKind) -> bool {
        self.kernels.contains_key(&stage)
    }

    /// Registered stages in canonical order
    #[must_use]
    pub fn stages(&self) -> Vec<StageKind> {
        let mut stages: Vec<_> = self.kernels.keys().copied().collect();
        stages.sort();
        stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
