use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tidewater_runtime::InstanceProgram;
use tidewater_vpu::RemapTable;

use crate::error::EngineError;

/// A deployed process: the program reducing its instances and the remap
/// table their persisted soups are read with.
pub struct RegisteredProgram {
  pub program: InstanceProgram,
  pub remap: RemapTable,
}

/// Deployed processes by process id.
#[derive(Default)]
pub struct ProcessRegistry {
  programs: RwLock<HashMap<String, Arc<RegisteredProgram>>>,
}

impl ProcessRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a program, replacing any previous one with the same id.
  /// Returns `true` if a program was replaced.
  pub fn insert(&self, program: InstanceProgram, remap: RemapTable) -> bool {
    let process_id = program.definition().process_id.clone();
    let mut programs = self.programs.write().unwrap_or_else(|p| p.into_inner());
    programs
      .insert(process_id, Arc::new(RegisteredProgram { program, remap }))
      .is_some()
  }

  pub fn get(&self, process_id: &str) -> Result<Arc<RegisteredProgram>, EngineError> {
    let programs = self.programs.read().unwrap_or_else(|p| p.into_inner());
    programs
      .get(process_id)
      .cloned()
      .ok_or_else(|| EngineError::UnknownProcess(process_id.to_string()))
  }

  /// Ids and remap tables of every registered process, sorted by id.
  pub fn list(&self) -> Vec<(String, RemapTable)> {
    let programs = self.programs.read().unwrap_or_else(|p| p.into_inner());
    let mut list: Vec<_> = programs
      .iter()
      .map(|(id, registered)| (id.clone(), registered.remap.clone()))
      .collect();
    list.sort_by(|a, b| a.0.cmp(&b.0));
    list
  }
}
