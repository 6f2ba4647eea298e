//! In-flight compilations keyed by correlation id.

use std::collections::BTreeMap;

use super::compilation::{Compilation, CompilationId};

/// Tracks compilations between submission and completion.
///
/// Removing a compilation hands ownership to the caller, who must complete
/// it. A compilation that is no longer registered can never be completed
/// again, which is what keeps callbacks to exactly one invocation.
#[derive(Debug, Default)]
pub struct CompilationRegistry {
    compilations: BTreeMap<CompilationId, Compilation>,
}

impl CompilationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, compilation: Compilation) {
        let id = compilation.id();
        if self.compilations.insert(id, compilation).is_some() {
            tracing::warn!("Compilation {} registered twice", id);
        }
    }

    pub fn get_mut(&mut self, id: CompilationId) -> Option<&mut Compilation> {
        self.compilations.get_mut(&id)
    }

    pub fn contains(&self, id: CompilationId) -> bool {
        self.compilations.contains_key(&id)
    }

    pub fn remove(&mut self, id: CompilationId) -> Option<Compilation> {
        self.compilations.remove(&id)
    }

    /// Remove every compilation, in id order.
    pub fn drain(&mut self) -> Vec<Compilation> {
        std::mem::take(&mut self.compilations).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.compilations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compilations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compilation(id: u64) -> Compilation {
        Compilation::new(CompilationId(id), Vec::new(), Box::new(|_| {}))
    }

    #[test]
    fn test_register_remove_drain() {
        let mut registry = CompilationRegistry::new();
        registry.register(compilation(2));
        registry.register(compilation(1));
        registry.register(compilation(3));
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(CompilationId(2)).is_some());
        assert!(registry.remove(CompilationId(2)).is_none());

        let drained: Vec<_> = registry.drain().iter().map(|c| c.id().0).collect();
        assert_eq!(drained, vec![1, 3]);
        assert!(registry.is_empty());
    }
}
