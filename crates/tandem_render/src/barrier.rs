//! Barrier planning and the per-resource state ledger
//!
//! Every use of a tracked resource goes through [`StateLedger`]. Planning a
//! transition compares the requested usages against the recorded state and
//! emits a barrier only when one is needed:
//!
//! - the image layout changes,
//! - the previous use wrote (read-after-write, write-after-write), or
//! - the new use writes after earlier reads (write-after-read).
//!
//! Read-after-read in the same layout widens the recorded state and emits
//! nothing. When several consumers are requested in one window the
//! destination stage and access masks are their union.

use crate::error::RenderError;
use crate::state::{Access, ImageLayout, PipelineStages, ResourceId, ResourceState, Usage};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub src_stages: PipelineStages,
    pub src_access: Access,
    pub dst_stages: PipelineStages,
    pub dst_access: Access,
    /// `None` for buffer barriers
    pub old_layout: Option<ImageLayout>,
    pub new_layout: Option<ImageLayout>,
}

impl Barrier {
    pub fn is_image(&self) -> bool {
        self.resource.is_image()
    }
}

/// Barriers recorded together as one pipeline barrier command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarrierBatch {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub buffers: Vec<Barrier>,
    pub images: Vec<Barrier>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Barrier> {
        self.buffers.iter().chain(self.images.iter())
    }

    pub fn find(&self, resource: ResourceId) -> Option<&Barrier> {
        self.iter().find(|b| b.resource == resource)
    }

    fn push(&mut self, barrier: Barrier) {
        self.src_stages |= barrier.src_stages;
        self.dst_stages |= barrier.dst_stages;
        if barrier.is_image() {
            self.images.push(barrier);
        } else {
            self.buffers.push(barrier);
        }
    }
}

#[derive(Debug, Default)]
pub struct StateLedger {
    states: HashMap<ResourceId, ResourceState>,
}

impl StateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: ResourceId) -> ResourceState {
        self.states
            .get(&id)
            .copied()
            .unwrap_or_else(|| ResourceState::initial(id))
    }

    /// Drop the contents of an image. Prior stages are kept so the next
    /// transition still waits for them.
    pub fn discard(&mut self, id: ResourceId) {
        let state = self.state(id);
        self.states.insert(
            id,
            ResourceState {
                stages: state.stages,
                access: Access::empty(),
                layout: id.initial_layout(),
            },
        );
    }

    /// A swapchain image just handed out by acquire. Its semaphore wait
    /// happens at `wait_stage`, which becomes the only thing to wait on.
    pub fn acquired(&mut self, id: ResourceId, wait_stage: PipelineStages) {
        self.states.insert(
            id,
            ResourceState {
                stages: wait_stage,
                access: Access::empty(),
                layout: id.initial_layout(),
            },
        );
    }

    pub fn forget(&mut self, id: ResourceId) {
        self.states.remove(&id);
    }

    /// Reset every image (swapchain recreation); buffer state survives
    pub fn forget_images(&mut self) {
        self.states.retain(|id, _| !id.is_image());
    }

    /// Move `id` to the union of `usages`, returning the barrier this takes
    pub fn transition(
        &mut self,
        id: ResourceId,
        usages: &[Usage],
    ) -> Result<Option<Barrier>, RenderError> {
        let (stages, access, layout) = combine(id, usages)?;
        let current = self.state(id);

        let layout_change = id.is_image() && current.layout != layout;
        let hazard = current.access.has_write() || (access.has_write() && !current.access.is_empty());

        if !layout_change && !hazard {
            // Nothing outstanding to wait for (read after read, or first use)
            self.states.insert(
                id,
                ResourceState {
                    stages: current.stages | stages,
                    access: current.access | access,
                    layout,
                },
            );
            return Ok(None);
        }

        let src_stages = if current.stages.is_empty() {
            PipelineStages::TOP_OF_PIPE
        } else {
            current.stages
        };
        let barrier = Barrier {
            resource: id,
            src_stages,
            src_access: current.access.writes(),
            dst_stages: stages,
            dst_access: access,
            old_layout: current.layout,
            new_layout: layout,
        };
        self.states.insert(id, ResourceState { stages, access, layout });
        Ok(Some(barrier))
    }

    /// Plan a batch of transitions recorded as one barrier command
    pub fn plan(&mut self, requests: &[(ResourceId, &[Usage])]) -> Result<BarrierBatch, RenderError> {
        let mut batch = BarrierBatch::default();
        for &(id, usages) in requests {
            if let Some(barrier) = self.transition(id, usages)? {
                batch.push(barrier);
            }
        }
        Ok(batch)
    }

    /// Check that `id` has been transitioned for `usage`
    pub fn check(&self, id: ResourceId, usage: Usage) -> Result<(), RenderError> {
        let state = self.state(id);
        let layout_ok = !id.is_image() || state.layout == usage.layout();
        if layout_ok
            && state.stages.contains(usage.stages())
            && state.access.contains(usage.access())
        {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!(
                "{id:?} used as {usage:?} while in {state:?}"
            )))
        }
    }

    /// Debug-build assertion that `id` may be used as `usage`
    pub fn assert_usable(&self, id: ResourceId, usage: Usage) {
        if cfg!(debug_assertions) {
            if let Err(err) = self.check(id, usage) {
                panic!("{err}");
            }
        }
    }
}

fn combine(
    id: ResourceId,
    usages: &[Usage],
) -> Result<(PipelineStages, Access, Option<ImageLayout>), RenderError> {
    let first = usages
        .first()
        .ok_or_else(|| RenderError::InvalidState(format!("empty usage list for {id:?}")))?;

    let layout = first.layout();
    if layout.is_some() != id.is_image() {
        return Err(RenderError::InvalidState(format!(
            "{first:?} does not apply to {id:?}"
        )));
    }

    let mut stages = PipelineStages::empty();
    let mut access = Access::empty();
    for usage in usages {
        if usage.layout() != layout {
            return Err(RenderError::InvalidState(format!(
                "{id:?} requested in conflicting layouts {layout:?} and {:?}",
                usage.layout()
            )));
        }
        stages |= usage.stages();
        access |= usage.access();
    }
    Ok((stages, access, layout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIM: ResourceId = ResourceId::SimulationBuffer;

    #[test]
    fn first_write_on_fresh_buffer_needs_no_barrier() {
        let mut ledger = StateLedger::new();
        assert_eq!(ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap(), None);
        ledger.assert_usable(SIM, Usage::SimulationWrite);
    }

    #[test]
    fn compute_write_to_two_readers_uses_union() {
        let mut ledger = StateLedger::new();
        ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap();

        let b = ledger
            .transition(SIM, &[Usage::VertexRead, Usage::RayTraceRead])
            .unwrap()
            .unwrap();
        assert_eq!(b.src_stages, PipelineStages::COMPUTE_SHADER);
        assert_eq!(b.src_access, Access::SHADER_WRITE);
        assert_eq!(
            b.dst_stages,
            PipelineStages::VERTEX_SHADER | PipelineStages::RAY_TRACING_SHADER
        );
        assert_eq!(
            b.dst_access,
            Access::SHADER_READ | Access::ACCELERATION_STRUCTURE_READ
        );
        assert_eq!(b.old_layout, None);
        ledger.assert_usable(SIM, Usage::VertexRead);
        ledger.assert_usable(SIM, Usage::RayTraceRead);
    }

    #[test]
    fn next_frame_write_waits_for_readers() {
        let mut ledger = StateLedger::new();
        ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap();
        ledger.transition(SIM, &[Usage::VertexRead, Usage::RayTraceRead]).unwrap();

        let b = ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap().unwrap();
        assert_eq!(
            b.src_stages,
            PipelineStages::VERTEX_SHADER | PipelineStages::RAY_TRACING_SHADER
        );
        // Execution dependency only: reads have nothing to make available
        assert_eq!(b.src_access, Access::empty());
        assert_eq!(b.dst_stages, PipelineStages::COMPUTE_SHADER);
    }

    #[test]
    fn read_after_read_in_same_layout_is_free() {
        let mut ledger = StateLedger::new();
        ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap();
        ledger.transition(SIM, &[Usage::VertexRead]).unwrap();

        assert_eq!(ledger.transition(SIM, &[Usage::RayTraceRead]).unwrap(), None);
        let state = ledger.state(SIM);
        assert!(state.stages.contains(PipelineStages::RAY_TRACING_SHADER));
        assert!(state.stages.contains(PipelineStages::VERTEX_SHADER));
    }

    #[test]
    fn image_chain_through_a_frame() {
        let mut ledger = StateLedger::new();
        let swap = ResourceId::Swapchain(1);
        let canvas = ResourceId::Canvas(0);

        ledger.acquired(swap, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
        let b = ledger.transition(swap, &[Usage::ColorAttachmentWrite]).unwrap().unwrap();
        assert_eq!(b.old_layout, Some(ImageLayout::Undefined));
        assert_eq!(b.new_layout, Some(ImageLayout::ColorAttachment));
        assert_eq!(b.src_stages, PipelineStages::COLOR_ATTACHMENT_OUTPUT);

        let batch = ledger
            .plan(&[
                (swap, &[Usage::TransferSrc]),
                (canvas, &[Usage::TransferDst]),
            ])
            .unwrap();
        assert_eq!(batch.images.len(), 2);
        assert!(batch.buffers.is_empty());
        let c = batch.find(canvas).unwrap();
        assert_eq!(c.old_layout, Some(ImageLayout::Undefined));
        assert_eq!(c.src_stages, PipelineStages::TOP_OF_PIPE);
        assert_eq!(
            batch.src_stages,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT | PipelineStages::TOP_OF_PIPE
        );

        let b = ledger.transition(canvas, &[Usage::RayTraceStorage]).unwrap().unwrap();
        assert_eq!(b.old_layout, Some(ImageLayout::TransferDst));
        assert_eq!(b.new_layout, Some(ImageLayout::General));
        assert_eq!(b.src_access, Access::TRANSFER_WRITE);

        // Transfer read -> transfer write changes layout, so a barrier is due
        let b = ledger.transition(swap, &[Usage::TransferDst]).unwrap().unwrap();
        assert_eq!(b.src_access, Access::empty());
        assert_eq!(b.src_stages, PipelineStages::TRANSFER);
    }

    #[test]
    fn discard_keeps_stages_and_drops_layout() {
        let mut ledger = StateLedger::new();
        let depth = ResourceId::Depth(1);
        ledger.transition(depth, &[Usage::DepthAttachmentWrite]).unwrap();
        ledger.transition(depth, &[Usage::RayTraceSampled]).unwrap();

        ledger.discard(depth);
        let b = ledger.transition(depth, &[Usage::DepthAttachmentWrite]).unwrap().unwrap();
        assert_eq!(b.old_layout, Some(ImageLayout::Undefined));
        assert_eq!(b.src_stages, PipelineStages::RAY_TRACING_SHADER);
        assert_eq!(b.src_access, Access::empty());
    }

    #[test]
    fn check_rejects_wrong_layout() {
        let mut ledger = StateLedger::new();
        let canvas = ResourceId::Canvas(0);
        ledger.transition(canvas, &[Usage::TransferDst]).unwrap();

        assert!(ledger.check(canvas, Usage::TransferDst).is_ok());
        assert!(ledger.check(canvas, Usage::RayTraceStorage).is_err());
    }

    #[test]
    fn conflicting_layouts_are_rejected() {
        let mut ledger = StateLedger::new();
        let err = ledger
            .transition(ResourceId::Depth(0), &[Usage::RayTraceSampled, Usage::TransferSrc])
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
        assert!(ledger.transition(SIM, &[Usage::Present]).is_err());
    }

    #[test]
    fn forget_images_keeps_buffers() {
        let mut ledger = StateLedger::new();
        ledger.transition(SIM, &[Usage::SimulationWrite]).unwrap();
        ledger.transition(ResourceId::Canvas(0), &[Usage::TransferDst]).unwrap();

        ledger.forget_images();
        assert_eq!(ledger.state(ResourceId::Canvas(0)).layout, Some(ImageLayout::Undefined));
        assert!(ledger.state(SIM).access.has_write());
    }
}
