//! Shared kernel registry helper
//!
//! Every command builds its registry here so the set of built-in kernels is
//! declared once.

use astroca_boundaries::BoundaryComputationKernel;
use astroca_core::KernelRegistry;
use astroca_features::FeatureExtractionKernel;
use std::sync::Arc;
use tracing::debug;

/// Register the built-in kernels
///
/// - boundary_computation
/// - feature_extraction
///
/// The other stages need externally supplied kernels. With `dry_run` they are
/// filled with passthrough kernels so the file plumbing can be checked.
pub fn build_registry(dry_run: bool) -> Arc<KernelRegistry> {
    let mut registry = KernelRegistry::new();
    registry.register(Arc::new(BoundaryComputationKernel::new()));
    registry.register(Arc::new(FeatureExtractionKernel::new()));

    if dry_run {
        debug!("Dry run: stages without a kernel pass their input through");
        registry = registry.with_passthrough_fallback();
    }
    Arc::new(registry)
}
