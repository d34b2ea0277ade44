//! [`GpuDevice`] on top of Vulkan.
//!
//! Each frame slot owns a command buffer, a `VkFence` and a descriptor pool.
//! The engine's monotonic fence value is tracked alongside each `VkFence`:
//! submissions complete in queue order, so the completed value is the
//! highest value whose fence has signaled.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::extensions::khr::Surface;
use ash::{vk, Device};

use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::resources::{DescriptorArena, HostBuffer, Program, ResolvedBinding, SamplerCache, Texture};
use super::swapchain::{RenderPass, SurfaceSetup, SurfaceTargets};
use super::vk_error;
use crate::assets::ImageData;
use crate::core::config::EngineConfig;
use crate::render::commands::{GpuCommand, TargetState};
use crate::render::descriptor::Binding;
use crate::render::device::{
    BufferHandle, BufferUsage, DeviceError, DeviceResult, DeviceStatus, Extent, FenceValue, GpuDevice, ProgramDesc,
    ProgramHandle, Submission, TextureHandle,
};
use crate::render::shader::ShaderStage;
use crate::window::glfw_window::GlfwWindow;
use crate::window::WindowHost;

/// Per-slot recording and completion objects
#[derive(Debug)]
struct FrameSync {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    signal: FenceValue,
    arena: DescriptorArena,
}

impl FrameSync {
    fn destroy(&self, device: &Device) {
        self.arena.destroy(device);
        unsafe { device.destroy_fence(self.fence, None) };
    }
}

struct Inner {
    status: DeviceStatus,
    completed: FenceValue,
    highest_submitted: FenceValue,
    extent: Extent,
    next_handle: u64,
    pending_acquire: Option<(u32, vk::Semaphore)>,
    next_acquire: usize,
    out_of_date: bool,

    programs: HashMap<u64, Program>,
    buffers: HashMap<u64, HostBuffer>,
    textures: HashMap<u64, Texture>,
    samplers: SamplerCache,

    frames: Vec<FrameSync>,
    acquire_semaphores: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    command_pool: vk::CommandPool,
    targets: Option<SurfaceTargets>,
    render_pass: Option<RenderPass>,
    setup: Option<SurfaceSetup>,

    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical: PhysicalDeviceInfo,
    logical: LogicalDevice,
    // Declared last so it is destroyed last
    _instance: VulkanInstance,
}

impl Inner {
    fn device(&self) -> &Device {
        &self.logical.device
    }

    fn check_ready(&self) -> DeviceResult<()> {
        match &self.status {
            DeviceStatus::Ready => Ok(()),
            DeviceStatus::Lost(reason) => Err(DeviceError::Lost(reason.clone())),
        }
    }

    /// Record device loss reported by `result`
    fn track<T>(&mut self, result: DeviceResult<T>) -> DeviceResult<T> {
        if let Err(DeviceError::Lost(reason)) = &result {
            if self.status == DeviceStatus::Ready {
                log::error!("Vulkan device lost: {}", reason);
                self.status = DeviceStatus::Lost(reason.clone());
            }
        }
        result
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn initialize(&mut self, desired_images: u32, vsync: bool) -> DeviceResult<()> {
        let setup = SurfaceSetup::query(
            self.surface,
            &self.surface_loader,
            &self.physical,
            desired_images,
            vsync,
        )?;
        self.render_pass = Some(RenderPass::new(self.device().clone(), setup.format.format)?);
        self.setup = Some(setup);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.physical.graphics_family);
        self.command_pool = unsafe { self.device().create_command_pool(&pool_info, None) }
            .map_err(|e| vk_error("create_command_pool", e))?;

        self.build_targets(self.extent)?;
        let count = self.targets.as_ref().map_or(0, SurfaceTargets::count);
        self.create_frames(count)?;
        self.create_semaphores(count)
    }

    fn create_frames(&mut self, count: usize) -> DeviceResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let command_buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .map_err(|e| vk_error("allocate_command_buffers", e))?;

        for command_buffer in command_buffers {
            let fence = unsafe { self.device().create_fence(&vk::FenceCreateInfo::default(), None) }
                .map_err(|e| vk_error("create_fence", e))?;
            let arena = match DescriptorArena::new(self.device()) {
                Ok(arena) => arena,
                Err(error) => {
                    unsafe { self.device().destroy_fence(fence, None) };
                    return Err(error);
                }
            };
            self.frames.push(FrameSync {
                command_buffer,
                fence,
                signal: 0,
                arena,
            });
        }
        Ok(())
    }

    fn create_semaphores(&mut self, count: usize) -> DeviceResult<()> {
        for _ in 0..count {
            let semaphore = self.create_semaphore()?;
            self.acquire_semaphores.push(semaphore);
            let semaphore = self.create_semaphore()?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    fn create_semaphore(&self) -> DeviceResult<vk::Semaphore> {
        unsafe { self.device().create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| vk_error("create_semaphore", e))
    }

    fn destroy_semaphores(&mut self) {
        let device = self.logical.device.clone();
        for semaphore in self.acquire_semaphores.drain(..).chain(self.render_finished.drain(..)) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn build_targets(&mut self, extent: Extent) -> DeviceResult<usize> {
        let (Some(setup), Some(render_pass)) = (&self.setup, &self.render_pass) else {
            return Err(DeviceError::InitializationFailed("surface not configured".to_string()));
        };
        let targets = SurfaceTargets::new(
            &self.logical.device,
            &self.logical.swapchain_loader,
            &self.surface_loader,
            &self.physical,
            setup,
            render_pass,
            extent,
        )?;
        let actual = targets.extent();
        self.extent = Extent::new(actual.width, actual.height);
        let count = targets.count();
        self.targets = Some(targets);
        self.out_of_date = false;
        Ok(count)
    }

    fn wait_idle(&mut self) -> DeviceResult<()> {
        let result = unsafe { self.device().device_wait_idle() }.map_err(|e| vk_error("device_wait_idle", e));
        self.track(result)?;
        self.completed = self.highest_submitted;
        Ok(())
    }

    /// Fold signaled fences into the completed value
    fn poll_fences(&mut self) {
        let mut completed = self.completed;
        let mut lost = None;
        for frame in &self.frames {
            if frame.signal <= completed {
                continue;
            }
            match unsafe { self.logical.device.get_fence_status(frame.fence) } {
                Ok(true) => completed = completed.max(frame.signal),
                Ok(false) => {}
                Err(e) => lost = Some(vk_error("get_fence_status", e)),
            }
        }
        self.completed = completed;
        if let Some(error) = lost {
            let _ = self.track::<()>(Err(error));
        }
    }

    fn wait_for(&mut self, value: FenceValue) -> DeviceResult<()> {
        if value <= self.completed {
            return Ok(());
        }
        if value > self.highest_submitted {
            return Err(DeviceError::api(
                "wait_for_value",
                format!("fence value {value} was never submitted"),
            ));
        }
        let fences: Vec<vk::Fence> = self
            .frames
            .iter()
            .filter(|frame| frame.signal > self.completed && frame.signal <= value)
            .map(|frame| frame.fence)
            .collect();
        if !fences.is_empty() {
            let result = unsafe { self.device().wait_for_fences(&fences, true, u64::MAX) }
                .map_err(|e| vk_error("wait_for_fences", e));
            self.track(result)?;
        }
        self.completed = self.completed.max(value);
        Ok(())
    }

    fn acquire(&mut self) -> DeviceResult<u32> {
        for _ in 0..2 {
            if self.out_of_date {
                log::debug!("Rebuilding out-of-date surface targets");
                self.rebuild(self.extent)?;
            }
            let swapchain = self
                .targets
                .as_ref()
                .map(SurfaceTargets::swapchain)
                .ok_or_else(|| DeviceError::api("acquire_target", "surface targets are released"))?;

            let semaphore = self.acquire_semaphores[self.next_acquire % self.acquire_semaphores.len()];
            let acquired = unsafe {
                self.logical
                    .swapchain_loader
                    .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
            };
            match acquired {
                Ok((target, suboptimal)) => {
                    if suboptimal {
                        log::debug!("Swapchain is suboptimal");
                    }
                    self.next_acquire += 1;
                    self.pending_acquire = Some((target, semaphore));
                    return Ok(target);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.out_of_date = true,
                Err(e) => return self.track(Err(vk_error("acquire_next_image", e))),
            }
        }
        Err(DeviceError::api("acquire_next_image", "surface stays out of date"))
    }

    fn rebuild(&mut self, extent: Extent) -> DeviceResult<usize> {
        self.wait_idle()?;
        self.targets = None;
        self.pending_acquire = None;
        let count = self.build_targets(extent)?;
        if count != self.render_finished.len() {
            self.destroy_semaphores();
            self.create_semaphores(count)?;
        }
        Ok(count)
    }

    fn submit(&mut self, submission: &Submission) -> DeviceResult<()> {
        let (acquired_target, wait_semaphore) = self
            .pending_acquire
            .take()
            .ok_or_else(|| DeviceError::api("queue_submit", "no target was acquired"))?;
        if acquired_target != submission.target {
            return Err(DeviceError::api(
                "queue_submit",
                format!("target {} submitted, {} acquired", submission.target, acquired_target),
            ));
        }
        let signal_semaphore = *self
            .render_finished
            .get(submission.target as usize)
            .ok_or(DeviceError::UnknownHandle {
                kind: "target",
                id: u64::from(submission.target),
            })?;
        let frame_index = submission.slot;
        let (command_buffer, fence, previous) = {
            let frame = self.frames.get(frame_index).ok_or(DeviceError::UnknownHandle {
                kind: "slot",
                id: frame_index as u64,
            })?;
            (frame.command_buffer, frame.fence, frame.signal)
        };
        self.wait_for(previous)?;

        self.record(frame_index, command_buffer, submission)?;

        let device = self.logical.device.clone();
        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal_semaphore];
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let result = unsafe {
            device
                .reset_fences(&[fence])
                .map_err(|e| vk_error("reset_fences", e))
                .and_then(|()| {
                    device
                        .queue_submit(self.logical.graphics_queue, &[submit_info], fence)
                        .map_err(|e| vk_error("queue_submit", e))
                })
        };
        self.track(result)?;

        self.frames[frame_index].signal = submission.signal;
        self.highest_submitted = self.highest_submitted.max(submission.signal);
        Ok(())
    }

    /// Translate a closed command list into `command_buffer`
    fn record(&mut self, frame_index: usize, command_buffer: vk::CommandBuffer, submission: &Submission) -> DeviceResult<()> {
        let Inner {
            logical,
            frames,
            programs,
            buffers,
            textures,
            samplers,
            targets,
            render_pass,
            ..
        } = self;
        let device = &logical.device;
        let targets = targets
            .as_ref()
            .ok_or_else(|| DeviceError::api("queue_submit", "surface targets are released"))?;
        let render_pass = render_pass
            .as_ref()
            .ok_or_else(|| DeviceError::api("queue_submit", "no render pass"))?;
        let arena = &frames[frame_index].arena;

        arena.reset(device)?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(|e| vk_error("begin_command_buffer", e))?;

        let (clear_color, clear_depth) = initial_clears(&submission.commands);
        let extent = targets.extent();
        let mut in_pass = false;
        let mut drawn = false;
        let mut layout = None;

        for command in &submission.commands {
            match command {
                GpuCommand::TransitionTarget {
                    target,
                    to: TargetState::Writable,
                    ..
                } => {
                    let framebuffer = targets.framebuffer(*target).ok_or(DeviceError::UnknownHandle {
                        kind: "target",
                        id: u64::from(*target),
                    })?;
                    let clear_values = [
                        vk::ClearValue {
                            color: vk::ClearColorValue { float32: clear_color },
                        },
                        vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: clear_depth,
                                stencil: 0,
                            },
                        },
                    ];
                    let begin = vk::RenderPassBeginInfo::builder()
                        .render_pass(render_pass.handle())
                        .framebuffer(framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent,
                        })
                        .clear_values(&clear_values);
                    unsafe { device.cmd_begin_render_pass(command_buffer, &begin, vk::SubpassContents::INLINE) };
                    in_pass = true;
                }
                GpuCommand::TransitionTarget {
                    to: TargetState::Presentable,
                    ..
                } => {
                    if in_pass {
                        unsafe { device.cmd_end_render_pass(command_buffer) };
                        in_pass = false;
                    }
                }
                GpuCommand::SetViewport(v) => {
                    let viewport = vk::Viewport {
                        x: v.x,
                        y: v.y,
                        width: v.width,
                        height: v.height,
                        min_depth: v.min_depth,
                        max_depth: v.max_depth,
                    };
                    unsafe { device.cmd_set_viewport(command_buffer, 0, &[viewport]) };
                }
                GpuCommand::SetScissor(s) => {
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D { x: s.x, y: s.y },
                        extent: vk::Extent2D {
                            width: s.width,
                            height: s.height,
                        },
                    };
                    unsafe { device.cmd_set_scissor(command_buffer, 0, &[scissor]) };
                }
                // Clears recorded before the first draw are covered by the load op
                GpuCommand::ClearColor(color) if drawn && in_pass => {
                    let attachment = vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            color: vk::ClearColorValue { float32: *color },
                        },
                    };
                    clear_attachment(device, command_buffer, attachment, extent);
                }
                GpuCommand::ClearDepth(depth) if drawn && in_pass => {
                    let attachment = vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::DEPTH,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: *depth,
                                stencil: 0,
                            },
                        },
                    };
                    clear_attachment(device, command_buffer, attachment, extent);
                }
                GpuCommand::ClearColor(_) | GpuCommand::ClearDepth(_) => {}
                GpuCommand::BindProgram(handle) => {
                    let program = lookup_program(programs, *handle)?;
                    unsafe {
                        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, program.pipeline());
                    }
                    layout = Some(program.layout());
                }
                GpuCommand::BindDescriptors { program, table } => {
                    let program = lookup_program(programs, *program)?;
                    let set = arena.write_set(device, program, table, |binding| match binding {
                        Binding::ConstantBuffer(handle) => {
                            let buffer = buffers.get(&handle.0).ok_or(DeviceError::UnknownHandle {
                                kind: "buffer",
                                id: handle.0,
                            })?;
                            Ok(ResolvedBinding::Buffer(buffer.handle(), buffer.size()))
                        }
                        Binding::ShaderResource(handle) => {
                            let texture = textures.get(&handle.0).ok_or(DeviceError::UnknownHandle {
                                kind: "texture",
                                id: handle.0,
                            })?;
                            Ok(ResolvedBinding::Image(texture.view()))
                        }
                        Binding::Sampler(filter) => Ok(ResolvedBinding::Sampler(samplers.get(device, filter)?)),
                    })?;
                    unsafe {
                        device.cmd_bind_descriptor_sets(
                            command_buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            program.layout(),
                            0,
                            &[set],
                            &[],
                        );
                    }
                }
                GpuCommand::PushTransform(matrix) => {
                    let layout =
                        layout.ok_or_else(|| DeviceError::api("cmd_push_constants", "no program bound"))?;
                    unsafe {
                        device.cmd_push_constants(
                            command_buffer,
                            layout,
                            vk::ShaderStageFlags::VERTEX,
                            0,
                            bytemuck::cast_slice(matrix),
                        );
                    }
                }
                GpuCommand::BindVertexBuffer(handle) => {
                    let buffer = lookup_buffer(buffers, *handle)?;
                    unsafe { device.cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]) };
                }
                GpuCommand::BindIndexBuffer(handle) => {
                    let buffer = lookup_buffer(buffers, *handle)?;
                    unsafe { device.cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32) };
                }
                GpuCommand::DrawIndexed {
                    index_count,
                    first_index,
                    vertex_offset,
                } => {
                    unsafe {
                        device.cmd_draw_indexed(command_buffer, *index_count, 1, *first_index, *vertex_offset, 0);
                    }
                    drawn = true;
                }
            }
        }

        if in_pass {
            unsafe { device.cmd_end_render_pass(command_buffer) };
        }
        unsafe { device.end_command_buffer(command_buffer) }.map_err(|e| vk_error("end_command_buffer", e))
    }

    fn present(&mut self, target: u32) -> DeviceResult<()> {
        let swapchain = self
            .targets
            .as_ref()
            .map(SurfaceTargets::swapchain)
            .ok_or_else(|| DeviceError::api("queue_present", "surface targets are released"))?;
        let wait = [*self.render_finished.get(target as usize).ok_or(DeviceError::UnknownHandle {
            kind: "target",
            id: u64::from(target),
        })?];
        let swapchains = [swapchain];
        let indices = [target];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            self.logical
                .swapchain_loader
                .queue_present(self.logical.present_queue, &present_info)
        };
        match result {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
                Ok(())
            }
            Err(e) => self.track(Err(vk_error("queue_present", e))),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let device = self.logical.device.clone();
        unsafe {
            let _ = device.device_wait_idle();
        }
        for (_, program) in self.programs.drain() {
            program.destroy(&device);
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy(&device);
        }
        for (_, texture) in self.textures.drain() {
            texture.destroy(&device);
        }
        self.samplers.destroy(&device);
        for frame in self.frames.drain(..) {
            frame.destroy(&device);
        }
        self.destroy_semaphores();
        if self.command_pool != vk::CommandPool::null() {
            unsafe { device.destroy_command_pool(self.command_pool, None) };
        }
        self.targets = None;
        self.render_pass = None;
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        log::debug!("Vulkan device destroyed");
    }
}

fn lookup_program(programs: &HashMap<u64, Program>, handle: ProgramHandle) -> DeviceResult<&Program> {
    programs.get(&handle.0).ok_or(DeviceError::UnknownHandle {
        kind: "program",
        id: handle.0,
    })
}

fn lookup_buffer(buffers: &HashMap<u64, HostBuffer>, handle: BufferHandle) -> DeviceResult<vk::Buffer> {
    buffers
        .get(&handle.0)
        .map(HostBuffer::handle)
        .ok_or(DeviceError::UnknownHandle {
            kind: "buffer",
            id: handle.0,
        })
}

fn clear_attachment(device: &Device, command_buffer: vk::CommandBuffer, attachment: vk::ClearAttachment, extent: vk::Extent2D) {
    let rect = vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
        base_array_layer: 0,
        layer_count: 1,
    };
    unsafe { device.cmd_clear_attachments(command_buffer, &[attachment], &[rect]) };
}

/// Clear values recorded before the first draw, used as load-op clears
fn initial_clears(commands: &[GpuCommand]) -> ([f32; 4], f32) {
    let mut color = [0.0, 0.0, 0.0, 1.0];
    let mut depth = 1.0;
    for command in commands {
        match command {
            GpuCommand::ClearColor(c) => color = *c,
            GpuCommand::ClearDepth(d) => depth = *d,
            GpuCommand::DrawIndexed { .. } => break,
            _ => {}
        }
    }
    (color, depth)
}

/// Vulkan device presenting to a GLFW window
pub struct VulkanDevice {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("VulkanDevice")
            .field("gpu", &inner.physical.name)
            .field("status", &inner.status)
            .field("extent", &inner.extent)
            .field("targets", &inner.render_finished.len())
            .finish_non_exhaustive()
    }
}

impl VulkanDevice {
    /// Create a device rendering into `window`
    pub fn new(window: &GlfwWindow, config: &EngineConfig) -> DeviceResult<Self> {
        let extensions = window
            .required_instance_extensions()
            .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;
        let instance = VulkanInstance::new(
            &config.application.name,
            &extensions,
            config.renderer.validation_enabled(),
        )?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_surface(instance.instance.handle())
            .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;

        let selected = PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader)
            .and_then(|physical| LogicalDevice::new(&instance.instance, &physical).map(|logical| (physical, logical)));
        let (physical, logical) = match selected {
            Ok(selected) => selected,
            Err(error) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(error);
            }
        };

        let mut inner = Inner {
            status: DeviceStatus::Ready,
            completed: 0,
            highest_submitted: 0,
            extent: window.client_dimensions(),
            next_handle: 0,
            pending_acquire: None,
            next_acquire: 0,
            out_of_date: false,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: SamplerCache::default(),
            frames: Vec::new(),
            acquire_semaphores: Vec::new(),
            render_finished: Vec::new(),
            command_pool: vk::CommandPool::null(),
            targets: None,
            render_pass: None,
            setup: None,
            surface,
            surface_loader,
            physical,
            logical,
            _instance: instance,
        };
        let desired = u32::try_from(config.renderer.frames_in_flight).unwrap_or(u32::MAX);
        inner.initialize(desired, config.renderer.vsync)?;

        log::info!(
            "Vulkan device ready on {} with {} targets",
            inner.physical.name,
            inner.render_finished.len()
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GpuDevice for VulkanDevice {
    fn status(&self) -> DeviceStatus {
        self.lock().status.clone()
    }

    fn surface_extent(&self) -> Extent {
        self.lock().extent
    }

    fn target_count(&self) -> usize {
        self.lock().frames.len()
    }

    fn acquire_target(&self) -> DeviceResult<u32> {
        let mut inner = self.lock();
        inner.check_ready()?;
        inner.acquire()
    }

    fn submit(&self, submission: Submission) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check_ready()?;
        inner.submit(&submission)
    }

    fn completed_value(&self) -> FenceValue {
        let mut inner = self.lock();
        inner.poll_fences();
        inner.completed
    }

    fn wait_for_value(&self, value: FenceValue) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check_ready()?;
        inner.wait_for(value)
    }

    fn present(&self, target: u32) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.check_ready()?;
        inner.present(target)
    }

    fn release_targets(&self) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.wait_idle()?;
        inner.targets = None;
        inner.pending_acquire = None;
        log::debug!("Released surface targets");
        Ok(())
    }

    fn recreate_targets(&self, extent: Extent) -> DeviceResult<usize> {
        let mut inner = self.lock();
        inner.check_ready()?;
        inner.rebuild(extent)
    }

    fn create_program(&self, desc: &ProgramDesc<'_>) -> DeviceResult<ProgramHandle> {
        for required in [ShaderStage::Vertex, ShaderStage::Pixel] {
            if !desc
                .stages
                .iter()
                .any(|(stage, words)| *stage == required && !words.is_empty())
            {
                return Err(DeviceError::api(
                    "create_program",
                    format!("'{}' has no {:?} bytecode", desc.name, required),
                ));
            }
        }

        let mut inner = self.lock();
        inner.check_ready()?;
        let render_pass = inner
            .render_pass
            .as_ref()
            .ok_or_else(|| DeviceError::api("create_program", "no render pass"))?;
        let result = Program::new(inner.device(), render_pass, desc);
        let program = inner.track(result)?;
        let id = inner.allocate_handle();
        inner.programs.insert(id, program);
        Ok(ProgramHandle(id))
    }

    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> DeviceResult<BufferHandle> {
        let mut inner = self.lock();
        inner.check_ready()?;
        let flags = super::resources::buffer_usage_flags(usage);
        let result = HostBuffer::new(inner.device(), &inner.physical, bytes.len() as vk::DeviceSize, flags)
            .and_then(|buffer| match buffer.write(inner.device(), bytes) {
                Ok(()) => Ok(buffer),
                Err(error) => {
                    buffer.destroy(inner.device());
                    Err(error)
                }
            });
        let buffer = inner.track(result)?;
        let id = inner.allocate_handle();
        inner.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, bytes: &[u8]) -> DeviceResult<()> {
        let mut inner = self.lock();
        let target = inner.buffers.get(&buffer.0).ok_or(DeviceError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let result = target.write(inner.device(), bytes);
        inner.track(result)
    }

    fn create_texture(&self, image: &ImageData) -> DeviceResult<TextureHandle> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.data.len() != expected || expected == 0 {
            return Err(DeviceError::api(
                "create_texture",
                format!("{} bytes for a {}x{} image", image.data.len(), image.width, image.height),
            ));
        }
        let mut inner = self.lock();
        inner.check_ready()?;
        let result = Texture::upload(
            inner.device(),
            &inner.physical,
            inner.command_pool,
            inner.logical.graphics_queue,
            image,
        );
        let texture = inner.track(result)?;
        let id = inner.allocate_handle();
        inner.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_program(&self, program: ProgramHandle) {
        let mut inner = self.lock();
        if let Some(program) = inner.programs.remove(&program.0) {
            let _ = inner.wait_idle();
            program.destroy(inner.device());
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut inner = self.lock();
        if let Some(buffer) = inner.buffers.remove(&buffer.0) {
            let _ = inner.wait_idle();
            buffer.destroy(inner.device());
        }
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut inner = self.lock();
        if let Some(texture) = inner.textures.remove(&texture.0) {
            let _ = inner.wait_idle();
            texture.destroy(inner.device());
        }
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        self.lock().wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::commands::CommandRecorder;

    #[test]
    fn load_op_clears_come_from_before_the_first_draw() {
        let mut commands = Vec::new();
        let mut recorder = CommandRecorder::new(&mut commands);
        recorder.clear([0.1, 0.2, 0.3, 1.0], 0.5);
        recorder.draw_indexed(6);
        recorder.clear([1.0; 4], 0.0);

        assert_eq!(initial_clears(&commands), ([0.1, 0.2, 0.3, 1.0], 0.5));
        assert_eq!(initial_clears(&[]), ([0.0, 0.0, 0.0, 1.0], 1.0));
    }
}
