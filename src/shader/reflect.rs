//! Interface reflection over validated naga modules.

use std::collections::BTreeMap;

use crate::backend::{ProgramAttribute, ProgramInterface, TextureDimension, TextureUnit, UniformSlot};

use super::TEXTURE_SET;

/// Interface of a single stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageInterface {
    /// Location-bound entry point inputs
    pub inputs: BTreeMap<u32, u8>,
    /// Location-bound entry point outputs
    pub outputs: BTreeMap<u32, u8>,
    pub uniform_slots: Vec<UniformSlot>,
    pub texture_units: Vec<TextureUnit>,
}

/// Number of scalar components of a shader value type.
///
/// Matrices count every element (a `mat4` is 16). Types that cannot be a
/// vertex attribute yield 0.
pub fn component_count(inner: &naga::TypeInner) -> u8 {
    match *inner {
        naga::TypeInner::Scalar(_) => 1,
        naga::TypeInner::Vector { size, .. } => size as u8,
        naga::TypeInner::Matrix { columns, rows, .. } => columns as u8 * rows as u8,
        _ => 0,
    }
}

fn location(binding: Option<&naga::Binding>) -> Option<u32> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => Some(*location),
        _ => None,
    }
}

/// Reflect the interface of the entry point for `stage`.
pub fn reflect_interface(module: &naga::Module, stage: naga::ShaderStage) -> StageInterface {
    let mut interface = StageInterface::default();

    if let Some(entry) = module.entry_points.iter().find(|ep| ep.stage == stage) {
        for arg in &entry.function.arguments {
            if let Some(loc) = location(arg.binding.as_ref()) {
                interface
                    .inputs
                    .insert(loc, component_count(&module.types[arg.ty].inner));
            }
        }

        if let Some(result) = &entry.function.result {
            if let Some(loc) = location(result.binding.as_ref()) {
                interface
                    .outputs
                    .insert(loc, component_count(&module.types[result.ty].inner));
            } else if let naga::TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
                for member in members {
                    if let Some(loc) = location(member.binding.as_ref()) {
                        interface
                            .outputs
                            .insert(loc, component_count(&module.types[member.ty].inner));
                    }
                }
            }
        }
    }

    let gctx = module.to_ctx();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let inner = &module.types[var.ty].inner;

        if var.space == naga::AddressSpace::Uniform {
            interface.uniform_slots.push(UniformSlot {
                slot: binding.group,
                min_size: inner.size(gctx) as u64,
            });
        } else if binding.group == TEXTURE_SET {
            if let naga::TypeInner::Image { dim, .. } = inner {
                let dimension = match dim {
                    naga::ImageDimension::Cube => TextureDimension::Cube,
                    _ => TextureDimension::D2,
                };
                interface.texture_units.push(TextureUnit {
                    unit: binding.binding / 2,
                    dimension,
                });
            }
        }
    }

    interface
}

/// Check that the fragment inputs are produced by the vertex stage and merge
/// both stages into a program interface.
pub(super) fn link(
    vertex: &StageInterface,
    fragment: &StageInterface,
) -> Result<ProgramInterface, String> {
    for (loc, components) in &fragment.inputs {
        match vertex.outputs.get(loc) {
            None => {
                return Err(format!(
                    "fragment input at location {loc} is not written by the vertex stage"
                ))
            }
            Some(written) if written != components => {
                return Err(format!(
                    "location {loc} is written with {written} components but read with {components}"
                ))
            }
            Some(_) => {}
        }
    }

    let mut uniform_slots: BTreeMap<u32, u64> = BTreeMap::new();
    for slot in vertex.uniform_slots.iter().chain(&fragment.uniform_slots) {
        let size = uniform_slots.entry(slot.slot).or_default();
        *size = (*size).max(slot.min_size);
    }

    let mut texture_units: BTreeMap<u32, TextureDimension> = BTreeMap::new();
    for unit in vertex.texture_units.iter().chain(&fragment.texture_units) {
        if let Some(existing) = texture_units.insert(unit.unit, unit.dimension) {
            if existing != unit.dimension {
                return Err(format!(
                    "texture unit {} is declared as both {:?} and {:?}",
                    unit.unit, existing, unit.dimension
                ));
            }
        }
    }

    Ok(ProgramInterface {
        attributes: vertex
            .inputs
            .iter()
            .map(|(&location, &components)| ProgramAttribute {
                location,
                components,
            })
            .collect(),
        color_outputs: fragment.outputs.len() as u32,
        uniform_slots: uniform_slots
            .into_iter()
            .map(|(slot, min_size)| UniformSlot { slot, min_size })
            .collect(),
        texture_units: texture_units
            .into_iter()
            .map(|(unit, dimension)| TextureUnit { unit, dimension })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_counts() {
        let scalar = naga::Scalar::F32;
        assert_eq!(component_count(&naga::TypeInner::Scalar(scalar)), 1);
        assert_eq!(
            component_count(&naga::TypeInner::Vector {
                size: naga::VectorSize::Tri,
                scalar
            }),
            3
        );
        assert_eq!(
            component_count(&naga::TypeInner::Matrix {
                columns: naga::VectorSize::Quad,
                rows: naga::VectorSize::Quad,
                scalar
            }),
            16
        );
        assert_eq!(
            component_count(&naga::TypeInner::Matrix {
                columns: naga::VectorSize::Bi,
                rows: naga::VectorSize::Tri,
                scalar
            }),
            6
        );
    }

    #[test]
    fn test_link_merges_slots() {
        let vertex = StageInterface {
            inputs: BTreeMap::from([(0, 3), (2, 3)]),
            outputs: BTreeMap::from([(0, 2)]),
            uniform_slots: vec![UniformSlot { slot: 1, min_size: 128 }],
            texture_units: vec![],
        };
        let fragment = StageInterface {
            inputs: BTreeMap::from([(0, 2)]),
            outputs: BTreeMap::from([(0, 4), (1, 4), (2, 4)]),
            uniform_slots: vec![
                UniformSlot { slot: 1, min_size: 64 },
                UniformSlot { slot: 2, min_size: 16 },
            ],
            texture_units: vec![TextureUnit {
                unit: 0,
                dimension: TextureDimension::D2,
            }],
        };

        let linked = link(&vertex, &fragment).unwrap();
        assert_eq!(linked.attributes.len(), 2);
        assert_eq!(linked.color_outputs, 3);
        assert_eq!(
            linked.uniform_slots,
            vec![
                UniformSlot { slot: 1, min_size: 128 },
                UniformSlot { slot: 2, min_size: 16 },
            ]
        );
    }

    #[test]
    fn test_link_component_mismatch() {
        let vertex = StageInterface {
            outputs: BTreeMap::from([(0, 3)]),
            ..Default::default()
        };
        let fragment = StageInterface {
            inputs: BTreeMap::from([(0, 2)]),
            ..Default::default()
        };
        assert!(link(&vertex, &fragment).is_err());
    }
}
