use super::{Entity, KernelError};
use ahash::AHashMap;

/// Locally owned entities, kept in registration order.
pub struct Registry<M> {
    slots: Vec<Box<dyn Entity<M>>>,
    index: AHashMap<String, usize>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Registry<M> {
    pub fn new() -> Self {
        Registry {
            slots: Vec::new(),
            index: AHashMap::new(),
        }
    }

    pub fn register(&mut self, entity: Box<dyn Entity<M>>) -> Result<(), KernelError> {
        let name = entity.name().to_string();
        if self.index.contains_key(&name) {
            return Err(KernelError::DuplicateEntity(name));
        }
        self.index.insert(name, self.slots.len());
        self.slots.push(entity);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name())
    }

    /// Typed read access, for harnesses collecting results after a run.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Entity<M>> {
        self.slots.iter().map(|slot| slot.as_ref())
    }

    /// Borrow one entity mutably alongside a read-only view of the name
    /// index, so a dispatch context can check names while the entity runs.
    pub(crate) fn split(
        &mut self,
        name: &str,
    ) -> Result<(&mut dyn Entity<M>, RegistryView<'_>), KernelError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| KernelError::UnknownEntity(name.to_string()))?;
        Ok((self.slots[idx].as_mut(), RegistryView { index: &self.index }))
    }

    /// Run `f` over every entity in registration order.
    pub(crate) fn for_each_split<F>(&mut self, mut f: F) -> Result<(), KernelError>
    where
        F: FnMut(&mut dyn Entity<M>, RegistryView<'_>) -> Result<(), KernelError>,
    {
        let index = &self.index;
        for slot in self.slots.iter_mut() {
            f(slot.as_mut(), RegistryView { index })?;
        }
        Ok(())
    }

    pub(crate) fn view(&self) -> RegistryView<'_> {
        RegistryView { index: &self.index }
    }
}

/// Read-only name lookup into a registry.
#[derive(Clone, Copy)]
pub struct RegistryView<'a> {
    index: &'a AHashMap<String, usize>,
}

impl RegistryView<'_> {
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}
