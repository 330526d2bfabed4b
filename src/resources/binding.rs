//! Attribute-binding cache
//!
//! Each mesh part keeps the vertex bindings it has been drawn with, one per
//! program. An entry remembers the program generation it was built for, so a
//! recompiled program replaces its binding instead of adding another one.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;

use super::mesh::VertexSource;
use super::program::Program;
use super::ProgramId;

/// Wire the program's active attributes to the part's vertex layout.
///
/// Program attributes the layout does not provide are left out, as are
/// layout attributes the program does not read.
pub fn describe_binding(source: &VertexSource, program: &Program) -> VertexBindingDescriptor {
    let attributes = program
        .interface
        .attributes
        .iter()
        .filter_map(|active| {
            let stored = source.layout.find(active.location)?;
            let format = VertexFormat::from_components(stored.components)?;
            Some(BoundAttribute {
                location: active.location,
                format,
                offset: stored.offset,
            })
        })
        .collect();

    VertexBindingDescriptor {
        label: Some(format!("{}_binding", program.name)),
        vertex_buffer: source.vertex_buffer,
        vertex_offset: source.vertex_offset,
        stride: source.layout.stride,
        index_buffer: source.index_buffer,
        attributes,
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedBinding {
    generation: u32,
    handle: VertexBindingHandle,
}

/// Per-part vertex bindings keyed by program
#[derive(Debug, Default)]
pub struct BindingCache {
    entries: HashMap<ProgramId, CachedBinding>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the binding of `source` for `program`, creating it on a miss.
    pub fn resolve<D: RenderDevice>(
        &mut self,
        device: &mut D,
        source: &VertexSource,
        id: ProgramId,
        program: &Program,
    ) -> BackendResult<VertexBindingHandle> {
        if let Some(cached) = self.entries.get(&id) {
            if cached.generation == program.generation {
                return Ok(cached.handle);
            }
        }

        let handle = device.create_vertex_binding(&describe_binding(source, program))?;
        if let Some(stale) = self.entries.insert(
            id,
            CachedBinding {
                generation: program.generation,
                handle,
            },
        ) {
            log::trace!("Replacing stale binding for program {}", program.name);
            device.destroy_vertex_binding(stale.handle);
        }
        Ok(handle)
    }

    /// Drop the binding built for `id`, if any.
    pub fn evict<D: RenderDevice>(&mut self, device: &mut D, id: ProgramId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                device.destroy_vertex_binding(entry.handle);
                true
            }
            None => false,
        }
    }

    pub fn clear<D: RenderDevice>(&mut self, device: &mut D) {
        for (_, entry) in self.entries.drain() {
            device.destroy_vertex_binding(entry.handle);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::resources::VertexLayout;

    fn source(device: &mut DummyDevice) -> VertexSource {
        let vertex_buffer = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 32 * 3,
                usage: BufferUsage::VERTEX,
            })
            .unwrap();
        VertexSource {
            vertex_buffer,
            index_buffer: None,
            vertex_offset: 64,
            layout: VertexLayout::position_uv_normal(),
        }
    }

    fn program(attributes: &[(u32, u8)]) -> Program {
        let mut program = Program::detached("TEST");
        program.interface.attributes = attributes
            .iter()
            .map(|&(location, components)| ProgramAttribute {
                location,
                components,
            })
            .collect();
        program
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut device = DummyDevice::new();
        let source = source(&mut device);
        let program = program(&[(0, 3), (2, 3)]);
        let mut cache = BindingCache::new();

        let first = cache.resolve(&mut device, &source, ProgramId(0), &program).unwrap();
        let second = cache.resolve(&mut device, &source, ProgramId(0), &program).unwrap();

        assert_eq!(first, second);
        assert_eq!(device.live_vertex_bindings(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_only_program_attributes_are_bound() {
        let mut device = DummyDevice::new();
        let source = source(&mut device);
        let program = program(&[(0, 3), (2, 3)]);
        let mut cache = BindingCache::new();

        let handle = cache.resolve(&mut device, &source, ProgramId(0), &program).unwrap();
        let desc = device.vertex_binding(handle).unwrap();

        let locations: Vec<u32> = desc.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 2]);
        assert_eq!(desc.attributes[1].offset, 20);
        assert_eq!(desc.attributes[1].format, VertexFormat::Float32x3);
        assert_eq!(desc.vertex_offset, 64);
        assert_eq!(desc.stride, 32);
    }

    #[test]
    fn test_missing_attribute_left_unbound() {
        let mut device = DummyDevice::new();
        let source = source(&mut device);
        let program = program(&[(0, 3), (7, 4)]);
        let desc = describe_binding(&source, &program);

        assert_eq!(desc.attributes.len(), 1);
        assert_eq!(desc.attributes[0].location, 0);
    }

    #[test]
    fn test_generation_change_replaces_binding() {
        let mut device = DummyDevice::new();
        let source = source(&mut device);
        let mut program = program(&[(0, 3)]);
        let mut cache = BindingCache::new();

        let first = cache.resolve(&mut device, &source, ProgramId(3), &program).unwrap();
        program.generation += 1;
        let second = cache.resolve(&mut device, &source, ProgramId(3), &program).unwrap();

        assert_ne!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.live_vertex_bindings(), 1);
    }

    #[test]
    fn test_evict() {
        let mut device = DummyDevice::new();
        let source = source(&mut device);
        let program = program(&[(0, 3)]);
        let mut cache = BindingCache::new();

        cache.resolve(&mut device, &source, ProgramId(1), &program).unwrap();
        cache.resolve(&mut device, &source, ProgramId(2), &program).unwrap();
        assert!(cache.evict(&mut device, ProgramId(1)));
        assert!(!cache.evict(&mut device, ProgramId(1)));

        assert_eq!(cache.len(), 1);
        assert_eq!(device.live_vertex_bindings(), 1);
    }
}
