//! Descriptor / resource registry.
//!
//! Every program declares a [`ResourceLayout`]: how many constant buffers,
//! shader resources and samplers it reads. The registry keeps one
//! [`DescriptorTable`] per program with a slot per declared binding, laid
//! out as constant buffers, then shader resources, then samplers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::device::{BufferHandle, ProgramHandle, TextureHandle};

/// Resource counts a program declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLayout {
    /// Byte size of each constant buffer
    pub constant_buffers: Vec<u32>,
    /// Number of sampled images
    pub shader_resources: u32,
    /// Number of samplers
    pub samplers: u32,
}

impl ResourceLayout {
    /// Layout with one texture and one sampler, the common mesh case
    pub fn textured() -> Self {
        Self {
            constant_buffers: Vec::new(),
            shader_resources: 1,
            samplers: 1,
        }
    }

    /// Add a constant buffer of `size` bytes
    pub fn with_constant_buffer(mut self, size: u32) -> Self {
        self.constant_buffers.push(size);
        self
    }

    /// Total number of table slots
    pub fn slot_count(&self) -> usize {
        self.constant_buffers.len() + self.shader_resources as usize + self.samplers as usize
    }

    /// Kind of binding expected at `slot`
    pub fn kind_at(&self, slot: usize) -> Option<BindingKind> {
        let cbs = self.constant_buffers.len();
        let srvs = cbs + self.shader_resources as usize;
        if slot < cbs {
            Some(BindingKind::ConstantBuffer)
        } else if slot < srvs {
            Some(BindingKind::ShaderResource)
        } else if slot < self.slot_count() {
            Some(BindingKind::Sampler)
        } else {
            None
        }
    }

    fn slot_of(&self, kind: BindingKind, index: u32) -> Result<usize, DescriptorError> {
        let (base, count) = match kind {
            BindingKind::ConstantBuffer => (0, self.constant_buffers.len() as u32),
            BindingKind::ShaderResource => (self.constant_buffers.len(), self.shader_resources),
            BindingKind::Sampler => (
                self.constant_buffers.len() + self.shader_resources as usize,
                self.samplers,
            ),
        };
        if index >= count {
            return Err(DescriptorError::SlotOutOfRange { kind, index, count });
        }
        Ok(base + index as usize)
    }
}

/// Binding category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Constant (uniform) buffer
    ConstantBuffer,
    /// Sampled image
    ShaderResource,
    /// Sampler state
    Sampler,
}

/// Sampler filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SamplerFilter {
    /// Bilinear filtering
    #[default]
    Linear,
    /// Point sampling
    Nearest,
}

/// A resource bound into a table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Constant buffer
    ConstantBuffer(BufferHandle),
    /// Sampled texture
    ShaderResource(TextureHandle),
    /// Sampler state
    Sampler(SamplerFilter),
}

impl Binding {
    /// Category of this binding
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::ConstantBuffer(_) => BindingKind::ConstantBuffer,
            Self::ShaderResource(_) => BindingKind::ShaderResource,
            Self::Sampler(_) => BindingKind::Sampler,
        }
    }
}

/// Resource table for one program
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorTable {
    slots: Vec<Option<Binding>>,
}

impl DescriptorTable {
    /// Empty table sized for `layout`
    pub fn for_layout(layout: &ResourceLayout) -> Self {
        Self {
            slots: vec![None; layout.slot_count()],
        }
    }

    /// All slots in binding order
    pub fn slots(&self) -> &[Option<Binding>] {
        &self.slots
    }

    /// Binding at `slot`
    pub fn get(&self, slot: usize) -> Option<Binding> {
        self.slots.get(slot).copied().flatten()
    }

    /// True once every slot has a binding
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

/// Descriptor registry errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Program was never registered
    #[error("program {0:?} has no resource table")]
    UnknownProgram(ProgramHandle),

    /// Program registered twice
    #[error("program {0:?} already has a resource table")]
    AlreadyRegistered(ProgramHandle),

    /// Binding index beyond what the layout declares
    #[error("{kind:?} index {index} out of range, layout declares {count}")]
    SlotOutOfRange {
        /// Binding category
        kind: BindingKind,
        /// Requested index within the category
        index: u32,
        /// Declared count for the category
        count: u32,
    },
}

/// Descriptor result alias
pub type DescriptorResult<T> = Result<T, DescriptorError>;

#[derive(Debug)]
struct ProgramTable {
    layout: ResourceLayout,
    table: DescriptorTable,
}

/// Owns the resource tables of every live program
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    programs: HashMap<ProgramHandle, ProgramTable>,
}

impl DescriptorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table for `program`
    pub fn register(&mut self, program: ProgramHandle, layout: ResourceLayout) -> DescriptorResult<()> {
        if self.programs.contains_key(&program) {
            return Err(DescriptorError::AlreadyRegistered(program));
        }
        log::debug!("Registered resource table for {:?} with {} slots", program, layout.slot_count());
        let table = DescriptorTable::for_layout(&layout);
        self.programs.insert(program, ProgramTable { layout, table });
        Ok(())
    }

    /// Write `binding` into the `index`-th slot of its category
    pub fn bind(&mut self, program: ProgramHandle, index: u32, binding: Binding) -> DescriptorResult<()> {
        let entry = self
            .programs
            .get_mut(&program)
            .ok_or(DescriptorError::UnknownProgram(program))?;
        let slot = entry.layout.slot_of(binding.kind(), index)?;
        entry.table.slots[slot] = Some(binding);
        Ok(())
    }

    /// Current table of `program`
    pub fn table(&self, program: ProgramHandle) -> DescriptorResult<&DescriptorTable> {
        self.programs
            .get(&program)
            .map(|entry| &entry.table)
            .ok_or(DescriptorError::UnknownProgram(program))
    }

    /// Layout `program` was registered with
    pub fn layout(&self, program: ProgramHandle) -> DescriptorResult<&ResourceLayout> {
        self.programs
            .get(&program)
            .map(|entry| &entry.layout)
            .ok_or(DescriptorError::UnknownProgram(program))
    }

    /// Drop the table of `program`
    pub fn release(&mut self, program: ProgramHandle) -> bool {
        self.programs.remove(&program).is_some()
    }

    /// Number of registered programs
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// True when no program is registered
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ResourceLayout {
        ResourceLayout::textured().with_constant_buffer(64)
    }

    #[test]
    fn slots_are_ordered_by_category() {
        let layout = layout();
        assert_eq!(layout.slot_count(), 3);
        assert_eq!(layout.kind_at(0), Some(BindingKind::ConstantBuffer));
        assert_eq!(layout.kind_at(1), Some(BindingKind::ShaderResource));
        assert_eq!(layout.kind_at(2), Some(BindingKind::Sampler));
        assert_eq!(layout.kind_at(3), None);
    }

    #[test]
    fn bind_fills_the_matching_slot() {
        let mut registry = DescriptorRegistry::new();
        let program = ProgramHandle(7);
        registry.register(program, layout()).unwrap();

        registry.bind(program, 0, Binding::ShaderResource(TextureHandle(3))).unwrap();
        registry.bind(program, 0, Binding::Sampler(SamplerFilter::Linear)).unwrap();
        let table = registry.table(program).unwrap();
        assert_eq!(table.get(1), Some(Binding::ShaderResource(TextureHandle(3))));
        assert!(!table.is_complete());

        registry.bind(program, 0, Binding::ConstantBuffer(BufferHandle(9))).unwrap();
        assert!(registry.table(program).unwrap().is_complete());
    }

    #[test]
    fn out_of_range_and_unknown_program_are_errors() {
        let mut registry = DescriptorRegistry::new();
        let program = ProgramHandle(1);
        registry.register(program, ResourceLayout::textured()).unwrap();

        assert_eq!(
            registry.bind(program, 1, Binding::ShaderResource(TextureHandle(0))),
            Err(DescriptorError::SlotOutOfRange {
                kind: BindingKind::ShaderResource,
                index: 1,
                count: 1
            })
        );
        assert_eq!(
            registry.bind(ProgramHandle(2), 0, Binding::Sampler(SamplerFilter::Nearest)),
            Err(DescriptorError::UnknownProgram(ProgramHandle(2)))
        );
        assert_eq!(
            registry.register(program, ResourceLayout::default()),
            Err(DescriptorError::AlreadyRegistered(program))
        );
        assert!(registry.release(program));
        assert!(registry.is_empty());
    }
}
