use tidewater_vpu::VpuConfig;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Upper bound of reductions running at the same time, across instances.
  pub max_workers: usize,
  pub vpu: VpuConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_workers: 8,
      vpu: VpuConfig::default(),
    }
  }
}
