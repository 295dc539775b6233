//! Combined parameter layout of a pipeline.
//!
//! Every stage numbers its blocks, textures and samplers from zero. The
//! pipeline binds them through one combined numbering: stages are merged in
//! declaration order (vertex, fragment, geometry, hull, domain), an entry
//! whose name was already seen reuses that entry's combined slot, any other
//! entry gets the next free one.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::program::{GpuProgram, GpuProgramType};
use crate::errors::{GpuError, Result};
use crate::params::{GpuParamDataDesc, GpuParamDesc, GpuParamObjectDesc};

/// Slot namespace inside a parameter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlotKind {
    Block,
    Texture,
    Sampler,
}

#[derive(Debug, Default)]
struct StageSlots {
    blocks: FxHashMap<u32, u32>,
    textures: FxHashMap<u32, u32>,
    samplers: FxHashMap<u32, u32>,
}

#[derive(Debug)]
struct StageParams {
    stage: GpuProgramType,
    desc: Arc<GpuParamDesc>,
    slots: StageSlots,
}

/// Parameter layout shared by every parameter set bound to one pipeline.
#[derive(Debug)]
pub struct ParamInfo {
    combined: Arc<GpuParamDesc>,
    stages: SmallVec<[StageParams; 5]>,
}

impl ParamInfo {
    /// Merges the descriptors of `programs`, which must already be in stage order.
    pub fn new(programs: &[&Arc<GpuProgram>]) -> Result<Self> {
        let mut combined = GpuParamDesc::new();
        let mut stages = SmallVec::new();

        for program in programs {
            let desc = program.param_desc();
            let mut slots = StageSlots::default();

            for block in sorted_by_slot(desc.param_blocks().values(), |b| b.slot) {
                let slot = match combined.param_blocks().get(&block.name) {
                    Some(existing) if existing.block_size != block.block_size => {
                        return Err(conflict(program, &block.name, "block size differs"));
                    }
                    Some(existing) => existing.slot,
                    None => {
                        let slot = combined.num_block_slots() as u32;
                        let mut merged = block.clone();
                        merged.slot = slot;
                        combined.add_block(merged);
                        slot
                    }
                };
                slots.blocks.insert(block.slot, slot);
            }

            for texture in sorted_by_slot(desc.textures().values(), |t| t.slot) {
                let slot = merge_object(
                    program,
                    texture,
                    combined.textures(),
                    combined.num_texture_slots(),
                )?;
                if !combined.textures().contains_key(&texture.name) {
                    combined.add_texture(GpuParamObjectDesc {
                        slot,
                        ..texture.clone()
                    });
                }
                slots.textures.insert(texture.slot, slot);
            }

            for sampler in sorted_by_slot(desc.samplers().values(), |s| s.slot) {
                let slot = merge_object(
                    program,
                    sampler,
                    combined.samplers(),
                    combined.num_sampler_slots(),
                )?;
                if !combined.samplers().contains_key(&sampler.name) {
                    combined.add_sampler(GpuParamObjectDesc {
                        slot,
                        ..sampler.clone()
                    });
                }
                slots.samplers.insert(sampler.slot, slot);
            }

            for param in desc.params().values() {
                let block_slot = *slots.blocks.get(&param.block_slot).ok_or_else(|| {
                    conflict(program, &param.name, "references an undeclared parameter block")
                })?;
                let merged = GpuParamDataDesc {
                    block_slot,
                    ..param.clone()
                };
                match combined.param(&param.name) {
                    Some(existing) if *existing != merged => {
                        return Err(conflict(
                            program,
                            &param.name,
                            "declared with a different layout",
                        ));
                    }
                    Some(_) => {}
                    None => combined.add_param(merged),
                }
            }

            stages.push(StageParams {
                stage: program.program_type(),
                desc: Arc::clone(desc),
                slots,
            });
        }

        log::debug!(
            "Merged parameter layout: {} blocks, {} params, {} textures, {} samplers over {} stages",
            combined.param_blocks().len(),
            combined.params().len(),
            combined.textures().len(),
            combined.samplers().len(),
            stages.len()
        );

        Ok(Self {
            combined: Arc::new(combined),
            stages,
        })
    }

    /// The merged descriptor table, in combined slot numbering.
    #[must_use]
    pub fn combined(&self) -> &Arc<GpuParamDesc> {
        &self.combined
    }

    /// The descriptor table of one stage, in its own slot numbering.
    #[must_use]
    pub fn stage_desc(&self, stage: GpuProgramType) -> Option<&Arc<GpuParamDesc>> {
        self.stage(stage).map(|s| &s.desc)
    }

    /// Maps a stage-local slot to its combined slot.
    #[must_use]
    pub fn combined_slot(
        &self,
        stage: GpuProgramType,
        kind: ParamSlotKind,
        local_slot: u32,
    ) -> Option<u32> {
        let slots = &self.stage(stage)?.slots;
        let map = match kind {
            ParamSlotKind::Block => &slots.blocks,
            ParamSlotKind::Texture => &slots.textures,
            ParamSlotKind::Sampler => &slots.samplers,
        };
        map.get(&local_slot).copied()
    }

    #[must_use]
    pub fn num_slots(&self, kind: ParamSlotKind) -> usize {
        match kind {
            ParamSlotKind::Block => self.combined.num_block_slots(),
            ParamSlotKind::Texture => self.combined.num_texture_slots(),
            ParamSlotKind::Sampler => self.combined.num_sampler_slots(),
        }
    }

    /// Stages in merge order.
    pub fn stages(&self) -> impl Iterator<Item = GpuProgramType> + '_ {
        self.stages.iter().map(|s| s.stage)
    }

    fn stage(&self, stage: GpuProgramType) -> Option<&StageParams> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

fn sorted_by_slot<'a, T>(
    items: impl Iterator<Item = &'a T>,
    slot: impl Fn(&T) -> u32,
) -> Vec<&'a T> {
    let mut items: Vec<&T> = items.collect();
    items.sort_by_key(|item| slot(*item));
    items
}

fn merge_object(
    program: &GpuProgram,
    object: &GpuParamObjectDesc,
    existing: &FxHashMap<String, GpuParamObjectDesc>,
    next_slot: usize,
) -> Result<u32> {
    match existing.get(&object.name) {
        Some(seen) if seen.object_type != object.object_type => {
            Err(conflict(program, &object.name, "object type differs"))
        }
        Some(seen) => Ok(seen.slot),
        None => Ok(next_slot as u32),
    }
}

fn conflict(program: &GpuProgram, name: &str, reason: &str) -> GpuError {
    GpuError::InvalidPipelineConfiguration(format!(
        "parameter '{name}' of {} program '{}' {reason}",
        program.program_type().name(),
        program.name()
    ))
}
