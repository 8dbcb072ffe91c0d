use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::gpu::backend::{Backend, Capabilities, DefaultBackend, Features, NullBackend};
use crate::gpu::command_pool::{CommandPool, CommandPoolInfo};
use crate::gpu::driver::types::{
    Buffer, BufferInfo, Handle, Image, ImageInfo, ImageView, ImageViewInfo, NativeId,
    ResourceDesc, ResourceRegistry, ResourceTable,
};
use crate::gpu::error::{GPUError, Result, ResultCode};
use crate::gpu::framebuffer::{Framebuffer, FramebufferCache, FramebufferInfo};
use crate::gpu::pipeline::{
    ComputePipeline, ComputePipelineInfo, GraphicsPipeline, GraphicsPipelineInfo,
    PipelineLayout, PipelineLayoutInfo,
};
use crate::gpu::queue::Queue;
use crate::gpu::render_pass::{RenderPass, RenderPassInfo};
use crate::ir::ReplayContext;
use crate::sync::{Backoff, Event, EventStatus, Fence, Semaphore, SyncStatus, WaitResult};
use crate::utils::Registry;

/// Device configuration, consumed by [`Device::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub debug_name: String,
    pub queue_count: u32,
    /// First sleep between completion polls.
    pub poll_interval_min: Duration,
    /// Ceiling the poll interval doubles up to.
    pub poll_interval_max: Duration,
    /// How long `submit` waits for each wait semaphore.
    pub semaphore_wait_timeout: Duration,
    /// How long a replayed `WaitEvents` polls before the device is declared
    /// lost.
    pub event_wait_timeout: Duration,
    /// Whether an event in the error state fails `WaitEvents`. When false the
    /// wait ends as if the event were set.
    pub event_error_is_fatal: bool,
    /// Log every replayed opcode at trace level.
    pub trace_replay: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            debug_name: "dashi-emu".to_string(),
            queue_count: 1,
            poll_interval_min: Duration::from_micros(50),
            poll_interval_max: Duration::from_millis(2),
            semaphore_wait_timeout: Duration::from_secs(5),
            event_wait_timeout: Duration::from_secs(5),
            event_error_is_fatal: true,
            trace_replay: false,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {name}={raw:?}: not an integer");
            None
        }
    }
}

impl DeviceInfo {
    /// Applies `DASHI_EMU_TRACE`, `DASHI_EMU_POLL_MIN_US`,
    /// `DASHI_EMU_POLL_MAX_US` and `DASHI_EMU_EVENT_TIMEOUT_MS`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DASHI_EMU_TRACE") {
            self.trace_replay = v == "1";
        }
        if let Some(us) = env_u64("DASHI_EMU_POLL_MIN_US") {
            self.poll_interval_min = Duration::from_micros(us);
        }
        if let Some(us) = env_u64("DASHI_EMU_POLL_MAX_US") {
            self.poll_interval_max = Duration::from_micros(us);
        }
        if let Some(ms) = env_u64("DASHI_EMU_EVENT_TIMEOUT_MS") {
            self.event_wait_timeout = Duration::from_millis(ms);
        }
        self
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff::new(self.poll_interval_min, self.poll_interval_max)
    }
}

//===----------------------------------------------------------------------===//
// Shared device state
//===----------------------------------------------------------------------===//

/// Everything recording and replay need to look up, shared between the
/// device, its queues and every command buffer. Holds no backend state.
pub struct DeviceShared {
    pub info: DeviceInfo,
    pub caps: Capabilities,
    pub resources: Arc<dyn ResourceRegistry>,
    pub render_passes: Registry<RenderPass>,
    pub framebuffers: Registry<Framebuffer>,
    pub pipeline_layouts: Registry<PipelineLayout>,
    pub graphics_pipelines: Registry<GraphicsPipeline>,
    pub compute_pipelines: Registry<ComputePipeline>,
    pub events: Registry<Event>,
    pub framebuffer_cache: FramebufferCache,
    lost: AtomicBool,
}

impl DeviceShared {
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn mark_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("device '{}' lost", self.info.debug_name);
        }
    }

    pub(crate) fn check_lost(&self) -> Result<()> {
        if self.is_lost() {
            return Err(GPUError::DeviceLost(format!(
                "device '{}' was lost by an earlier submission",
                self.info.debug_name
            )));
        }
        Ok(())
    }

    pub fn render_pass(&self, handle: Handle<RenderPass>) -> Result<Arc<RenderPass>> {
        self.render_passes
            .get(handle)
            .ok_or(GPUError::InvalidHandle("render pass"))
    }

    pub fn framebuffer(&self, handle: Handle<Framebuffer>) -> Result<Arc<Framebuffer>> {
        self.framebuffers
            .get(handle)
            .ok_or(GPUError::InvalidHandle("framebuffer"))
    }

    pub fn pipeline_layout(&self, handle: Handle<PipelineLayout>) -> Result<Arc<PipelineLayout>> {
        self.pipeline_layouts
            .get(handle)
            .ok_or(GPUError::InvalidHandle("pipeline layout"))
    }

    pub fn graphics_pipeline(
        &self,
        handle: Handle<GraphicsPipeline>,
    ) -> Result<Arc<GraphicsPipeline>> {
        self.graphics_pipelines
            .get(handle)
            .ok_or(GPUError::InvalidHandle("graphics pipeline"))
    }

    pub fn compute_pipeline(&self, handle: Handle<ComputePipeline>) -> Result<Arc<ComputePipeline>> {
        self.compute_pipelines
            .get(handle)
            .ok_or(GPUError::InvalidHandle("compute pipeline"))
    }

    pub fn event(&self, handle: Handle<Event>) -> Result<Arc<Event>> {
        self.events.get(handle).ok_or(GPUError::InvalidHandle("event"))
    }

    pub fn buffer(&self, handle: Handle<Buffer>) -> Result<ResourceDesc> {
        self.resources
            .buffer(handle)
            .ok_or(GPUError::InvalidHandle("buffer"))
    }

    pub fn image(&self, handle: Handle<Image>) -> Result<ResourceDesc> {
        self.resources
            .image(handle)
            .ok_or(GPUError::InvalidHandle("image"))
    }
}

//===----------------------------------------------------------------------===//
// Device
//===----------------------------------------------------------------------===//

/// Owns one backend context and hands out everything that records into or
/// replays against it.
///
/// Object creation goes through `&self`; registries are internally locked
/// so any thread may create objects while another submits.
pub struct Device<B: Backend = DefaultBackend> {
    shared: Arc<DeviceShared>,
    context: Arc<Mutex<ReplayContext<B>>>,
    queues: Vec<Queue<B>>,
    table: Option<Arc<ResourceTable>>,
}

fn inserted<T>(handle: Option<Handle<T>>, what: &str) -> Result<Handle<T>> {
    let handle = handle.ok_or(GPUError::SlotError)?;
    log::debug!("created {what} {handle:?}");
    Ok(handle)
}

impl<B: Backend> Device<B> {
    /// Creates a device that manages its own resource table.
    pub fn new(backend: B, info: &DeviceInfo) -> Result<Self> {
        let table = Arc::new(ResourceTable::new());
        let mut device = Self::with_resources(backend, table.clone(), info)?;
        device.table = Some(table);
        Ok(device)
    }

    /// Creates a device over an external resource collaborator. The
    /// `register_*`/`destroy_*` forwards are unavailable; the collaborator
    /// reports view destruction through [`Device::invalidate_image_view`].
    pub fn with_resources(
        backend: B,
        resources: Arc<dyn ResourceRegistry>,
        info: &DeviceInfo,
    ) -> Result<Self> {
        if info.queue_count == 0 {
            return Err(GPUError::Validation("a device needs at least one queue".into()));
        }
        let caps = backend.capabilities().clone();
        log::debug!(
            "creating device '{}' on backend '{}' ({:?})",
            info.debug_name,
            backend.name(),
            caps.features
        );

        let shared = Arc::new(DeviceShared {
            info: info.clone(),
            caps,
            resources,
            render_passes: Registry::new(),
            framebuffers: Registry::new(),
            pipeline_layouts: Registry::new(),
            graphics_pipelines: Registry::new(),
            compute_pipelines: Registry::new(),
            events: Registry::new(),
            framebuffer_cache: FramebufferCache::new(),
            lost: AtomicBool::new(false),
        });
        let context = Arc::new(Mutex::new(ReplayContext::new(backend)));
        let queues = (0..info.queue_count)
            .map(|i| Queue::new(i, shared.clone(), context.clone()))
            .collect();

        Ok(Self {
            shared,
            context,
            queues,
            table: None,
        })
    }

    pub fn debug_name(&self) -> &str {
        &self.shared.info.debug_name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.shared.caps
    }

    pub fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    pub fn queue(&self, index: u32) -> Result<&Queue<B>> {
        self.queues
            .get(index as usize)
            .ok_or(GPUError::InvalidHandle("queue"))
    }

    /// Runs `f` with exclusive access to the backend and its state cache.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut ReplayContext<B>) -> R) -> R {
        f(&mut self.context.lock())
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.context.lock().backend)
    }

    //===------------------------------------------------------------------===//
    // Recording objects
    //===------------------------------------------------------------------===//

    pub fn create_command_pool(&self, info: &CommandPoolInfo) -> CommandPool {
        CommandPool::new(self.shared.clone(), info)
    }

    pub fn create_render_pass(&self, info: &RenderPassInfo) -> Result<Handle<RenderPass>> {
        let pass = RenderPass::new(info, &self.shared.caps)?;
        inserted(self.shared.render_passes.insert(pass), "render pass")
    }

    pub fn destroy_render_pass(&self, handle: Handle<RenderPass>) {
        if self.shared.render_passes.remove(handle).is_none() {
            log::warn!("destroying unknown render pass {handle:?}");
        }
    }

    pub fn create_framebuffer(&self, info: &FramebufferInfo) -> Result<Handle<Framebuffer>> {
        let pass = self.shared.render_pass(info.render_pass)?;
        let fb = Framebuffer::new(info, &pass, self.shared.resources.as_ref())?;
        inserted(self.shared.framebuffers.insert(fb), "framebuffer")
    }

    /// Backend objects built for the framebuffer stay cached; they belong to
    /// its views and go away with them.
    pub fn destroy_framebuffer(&self, handle: Handle<Framebuffer>) {
        if self.shared.framebuffers.remove(handle).is_none() {
            log::warn!("destroying unknown framebuffer {handle:?}");
        }
    }

    pub fn create_pipeline_layout(
        &self,
        info: &PipelineLayoutInfo,
    ) -> Result<Handle<PipelineLayout>> {
        let layout = PipelineLayout::new(info, &self.shared.caps)?;
        inserted(self.shared.pipeline_layouts.insert(layout), "pipeline layout")
    }

    pub fn destroy_pipeline_layout(&self, handle: Handle<PipelineLayout>) {
        self.shared.pipeline_layouts.remove(handle);
    }

    pub fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<Handle<GraphicsPipeline>> {
        self.shared.pipeline_layout(info.layout)?;
        let pass = self.shared.render_pass(info.render_pass)?;
        let pipeline = GraphicsPipeline::new(info, &pass, &self.shared.caps)?;
        inserted(
            self.shared.graphics_pipelines.insert(pipeline),
            "graphics pipeline",
        )
    }

    pub fn destroy_graphics_pipeline(&self, handle: Handle<GraphicsPipeline>) {
        self.shared.graphics_pipelines.remove(handle);
    }

    pub fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<Handle<ComputePipeline>> {
        let pipeline = ComputePipeline::new(info, &self.shared.caps)?;
        self.shared.pipeline_layout(info.layout)?;
        inserted(
            self.shared.compute_pipelines.insert(pipeline),
            "compute pipeline",
        )
    }

    pub fn destroy_compute_pipeline(&self, handle: Handle<ComputePipeline>) {
        self.shared.compute_pipelines.remove(handle);
    }

    //===------------------------------------------------------------------===//
    // Resources
    //===------------------------------------------------------------------===//

    fn table(&self) -> Result<&ResourceTable> {
        self.table.as_deref().ok_or(GPUError::InvalidState(
            "device was created over an external resource registry",
        ))
    }

    pub fn register_buffer(&self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        self.table()?.register_buffer(info)
    }

    pub fn register_image(&self, info: &ImageInfo) -> Result<Handle<Image>> {
        self.table()?.register_image(info)
    }

    pub fn register_image_view(&self, info: &ImageViewInfo) -> Result<Handle<ImageView>> {
        self.table()?.register_image_view(info)
    }

    /// Recorded commands that still name the buffer fail replay validation.
    pub fn destroy_buffer(&self, handle: Handle<Buffer>) -> Result<()> {
        self.table()?
            .destroy_buffer(handle)
            .map(|_| ())
            .ok_or(GPUError::InvalidHandle("buffer"))
    }

    pub fn destroy_image(&self, handle: Handle<Image>) -> Result<()> {
        self.table()?
            .destroy_image(handle)
            .map(|_| ())
            .ok_or(GPUError::InvalidHandle("image"))
    }

    pub fn destroy_image_view(&self, handle: Handle<ImageView>) -> Result<()> {
        let desc = self
            .table()?
            .destroy_image_view(handle)
            .ok_or(GPUError::InvalidHandle("image view"))?;
        self.invalidate_image_view(desc.native)
    }

    /// Drops every cached framebuffer mapping built over `view` and releases
    /// its backend objects.
    pub fn invalidate_image_view(&self, view: NativeId) -> Result<()> {
        let mut ctx = self.context.lock();
        let stale = self.shared.framebuffer_cache.invalidate_view(view);
        if !stale.is_empty() {
            log::debug!("view {view:?} invalidated {} framebuffer mappings", stale.len());
        }
        for mapping in stale {
            mapping.destroy(&mut ctx.backend)?;
        }
        // Names of the destroyed objects may be reused by the backend.
        ctx.state.invalidate();
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Synchronization
    //===------------------------------------------------------------------===//

    pub fn create_fence(&self, signalled: bool) -> Fence {
        Fence::named(&format!("{}.fence", self.shared.info.debug_name), signalled)
    }

    pub fn create_semaphore(&self) -> Semaphore {
        Semaphore::named(&format!("{}.semaphore", self.shared.info.debug_name))
    }

    pub fn create_event(&self, debug_name: &str) -> Result<Handle<Event>> {
        inserted(self.shared.events.insert(Event::new(debug_name)), "event")
    }

    pub fn destroy_event(&self, handle: Handle<Event>) {
        if self.shared.events.remove(handle).is_none() {
            log::warn!("destroying unknown event {handle:?}");
        }
    }

    pub fn get_event_status(&self, handle: Handle<Event>) -> Result<EventStatus> {
        Ok(self.shared.event(handle)?.status())
    }

    pub fn set_event(&self, handle: Handle<Event>) -> Result<()> {
        self.shared.event(handle)?.set();
        Ok(())
    }

    pub fn reset_event(&self, handle: Handle<Event>) -> Result<()> {
        self.shared.event(handle)?.reset();
        Ok(())
    }

    /// `Success` when signalled, `NotReady` otherwise.
    pub fn get_fence_status(&self, fence: &Fence) -> Result<ResultCode> {
        let status = match fence.status() {
            SyncStatus::Unsignalled => fence.query(&mut self.context.lock().backend)?,
            status => status,
        };
        match status {
            SyncStatus::Signalled => Ok(ResultCode::Success),
            SyncStatus::Unsignalled => Ok(ResultCode::NotReady),
            SyncStatus::Error => Err(GPUError::DeviceLost(format!(
                "fence '{}' reported an error",
                fence.debug_name()
            ))),
        }
    }

    /// Polls until all (or any) of `fences` signal. The context lock is only
    /// held while probing, never while sleeping. A zero timeout probes once.
    pub fn wait_for_fences(
        &self,
        fences: &[&Fence],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> Result<WaitResult> {
        if fences.is_empty() {
            return Ok(WaitResult::Success);
        }
        let result = self.shared.info.backoff().poll(timeout, || {
            let mut signalled = 0;
            for fence in fences {
                let status = match fence.status() {
                    SyncStatus::Unsignalled => fence.query(&mut self.context.lock().backend)?,
                    status => status,
                };
                match status {
                    SyncStatus::Error => return Ok(Some(WaitResult::Error)),
                    SyncStatus::Signalled => signalled += 1,
                    SyncStatus::Unsignalled => {}
                }
            }
            let done = if wait_all {
                signalled == fences.len()
            } else {
                signalled > 0
            };
            Ok(done.then_some(WaitResult::Success))
        })?;
        Ok(result.unwrap_or(WaitResult::TimedOut))
    }

    pub fn reset_fences(&self, fences: &[&Fence]) -> Result<()> {
        for fence in fences {
            if let Some(stale) = fence.reset() {
                self.context.lock().backend.delete_fence(stale)?;
            }
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        for queue in &self.queues {
            queue.wait_idle()?;
        }
        Ok(())
    }

    pub fn supports(&self, features: Features) -> bool {
        self.shared.caps.supports(features)
    }
}

impl Device<NullBackend> {
    /// A device over the recording backend with default capabilities.
    pub fn headless(info: &DeviceInfo) -> Result<Self> {
        Self::new(NullBackend::new(), info)
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        let mut ctx = self.context.lock();
        for mapping in self.shared.framebuffer_cache.drain() {
            if let Err(err) = mapping.destroy(&mut ctx.backend) {
                log::warn!("failed to release framebuffer mapping: {err}");
            }
        }
        log::debug!("destroyed device '{}'", self.shared.info.debug_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::render_pass::{AttachmentDescription, SubpassDescription};

    #[test]
    fn zero_queues_is_rejected() {
        let info = DeviceInfo {
            queue_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            Device::headless(&info),
            Err(GPUError::Validation(_))
        ));
    }

    #[test]
    fn destroyed_objects_stop_resolving() {
        let device = Device::headless(&DeviceInfo::default()).unwrap();
        let attachments = [AttachmentDescription::default()];
        let subpasses = [SubpassDescription {
            color_attachments: vec![0],
            ..Default::default()
        }];
        let pass = device
            .create_render_pass(&RenderPassInfo {
                debug_name: "main",
                attachments: &attachments,
                subpasses: &subpasses,
                ..Default::default()
            })
            .unwrap();
        assert!(device.shared().render_pass(pass).is_ok());
        device.destroy_render_pass(pass);
        assert_eq!(
            device.shared().render_pass(pass).unwrap_err(),
            GPUError::InvalidHandle("render pass")
        );
    }

    #[test]
    fn external_registry_has_no_forwards() {
        let table: Arc<dyn ResourceRegistry> = Arc::new(ResourceTable::new());
        let device =
            Device::with_resources(NullBackend::new(), table, &DeviceInfo::default()).unwrap();
        assert!(matches!(
            device.register_buffer(&BufferInfo::default()),
            Err(GPUError::InvalidState(_))
        ));
    }

    #[test]
    fn host_event_toggles() {
        let device = Device::headless(&DeviceInfo::default()).unwrap();
        let event = device.create_event("e").unwrap();
        assert_eq!(device.get_event_status(event).unwrap(), EventStatus::Reset);
        device.set_event(event).unwrap();
        assert_eq!(device.get_event_status(event).unwrap().code(), ResultCode::EventSet);
        device.destroy_event(event);
        assert!(device.get_event_status(event).is_err());
    }
}
