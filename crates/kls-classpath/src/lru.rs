use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use kls_compiler::Compiler;

/// Bounded most-recently-used cache of per-module compiler instances.
///
/// Evicted instances are closed immediately; the caller re-creates them on
/// the next access. Access order is tracked on reads as well as inserts.
pub(crate) struct ModuleCompilerLru {
    capacity: usize,
    map: HashMap<String, Arc<dyn Compiler>>,
    order: VecDeque<String>,
}

impl ModuleCompilerLru {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn get(&mut self, module_id: &str) -> Option<Arc<dyn Compiler>> {
        let compiler = self.map.get(module_id)?.clone();
        self.touch(module_id);
        Some(compiler)
    }

    pub(crate) fn insert(&mut self, module_id: String, compiler: Arc<dyn Compiler>) {
        if self.map.insert(module_id.clone(), compiler).is_none() {
            self.order.push_back(module_id.clone());
        }
        self.touch(&module_id);

        while self.map.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.map.remove(&oldest) {
                tracing::debug!(
                    target = "kls.classpath",
                    module = %oldest,
                    "evicting least-recently-used module compiler"
                );
                evicted.close();
            }
        }
    }

    /// Closes and removes every cached instance.
    pub(crate) fn evict_all(&mut self) {
        for (_, compiler) in self.map.drain() {
            compiler.close();
        }
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    fn touch(&mut self, module_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == module_id) {
            self.order.remove(pos);
        }
        self.order.push_back(module_id.to_string());
    }
}
