//! Buffers, textures, samplers and program pipelines.

use std::collections::HashMap;
use std::ffi::CStr;

use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::swapchain::{create_view, RenderPass};
use super::{find_memory_type, vk_error};
use crate::assets::ImageData;
use crate::render::descriptor::{Binding, DescriptorTable, ResourceLayout, SamplerFilter};
use crate::render::device::{BufferUsage, DeviceError, DeviceResult, ProgramDesc};
use crate::render::shader::ShaderStage;
use crate::render::vertex::{Vertex, ATTRIBUTE_OFFSETS};

/// Bytes of push constant data per draw: one column-major 4x4 matrix
pub const PUSH_CONSTANT_SIZE: u32 = 64;

const ENTRY_POINT: &CStr = c"main";

fn allocate_memory(
    device: &Device,
    physical: &PhysicalDeviceInfo,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> DeviceResult<vk::DeviceMemory> {
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(find_memory_type(
            &physical.memory,
            requirements.memory_type_bits,
            properties,
        )?);
    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|e| vk_error("allocate_memory", e))
}

/// Buffer usage flags for an engine buffer kind
pub fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

/// Host-visible, host-coherent buffer
#[derive(Debug)]
pub struct HostBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl HostBuffer {
    /// Allocate `size` bytes for `usage`
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> DeviceResult<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }.map_err(|e| vk_error("create_buffer", e))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate_memory(
            device,
            physical,
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(error);
            }
        };

        let buffer = Self { buffer, memory, size };
        unsafe { device.bind_buffer_memory(buffer.buffer, buffer.memory, 0) }.map_err(|e| {
            buffer.destroy(device);
            vk_error("bind_buffer_memory", e)
        })?;
        Ok(buffer)
    }

    /// Copy `bytes` to the start of the buffer
    pub fn write(&self, device: &Device, bytes: &[u8]) -> DeviceResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(DeviceError::api(
                "write_buffer",
                format!("{} bytes into a {} byte buffer", bytes.len(), self.size),
            ));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(|e| vk_error("map_memory", e))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Free the buffer and its memory
    pub fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Sampled RGBA8 image
#[derive(Debug)]
pub struct Texture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl Texture {
    /// Texel format of every texture
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    /// Upload `data` through a staging buffer and wait for the copy
    pub fn upload(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        pool: vk::CommandPool,
        queue: vk::Queue,
        data: &ImageData,
    ) -> DeviceResult<Self> {
        let staging = HostBuffer::new(
            device,
            physical,
            data.data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let result = staging
            .write(device, &data.data)
            .and_then(|()| Self::create_image(device, physical, data.width, data.height))
            .and_then(|texture| {
                match copy_to_image(device, pool, queue, staging.handle(), texture.image, data.width, data.height) {
                    Ok(()) => Ok(texture),
                    Err(error) => {
                        texture.destroy(device);
                        Err(error)
                    }
                }
            });
        staging.destroy(device);
        result
    }

    fn create_image(device: &Device, physical: &PhysicalDeviceInfo, width: u32, height: u32) -> DeviceResult<Self> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(Self::FORMAT)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&create_info, None) }.map_err(|e| vk_error("create_image", e))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate_memory(device, physical, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.destroy_image(image, None) };
                return Err(error);
            }
        };
        let mut texture = Self {
            image,
            memory,
            view: vk::ImageView::null(),
        };
        let bound = unsafe { device.bind_image_memory(image, memory, 0) }.map_err(|e| vk_error("bind_image_memory", e));
        match bound.and_then(|()| create_view(device, image, Self::FORMAT, vk::ImageAspectFlags::COLOR)) {
            Ok(view) => {
                texture.view = view;
                Ok(texture)
            }
            Err(error) => {
                texture.destroy(device);
                Err(error)
            }
        }
    }

    /// View bound as a sampled image
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Free the image, its view and memory
    pub fn destroy(&self, device: &Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn copy_to_image(
    device: &Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> DeviceResult<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(pool)
        .command_buffer_count(1);
    let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| vk_error("allocate_command_buffers", e))?
        .first()
        .copied()
        .ok_or_else(|| DeviceError::api("allocate_command_buffers", "no command buffer returned"))?;

    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| vk_error("begin_command_buffer", e))?;

            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D { width, height, depth: 1 })
                .build();
            device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_shader = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );

            device
                .end_command_buffer(command_buffer)
                .map_err(|e| vk_error("end_command_buffer", e))?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(|e| vk_error("queue_submit", e))?;
            device.queue_wait_idle(queue).map_err(|e| vk_error("queue_wait_idle", e))
        }
    })();

    unsafe { device.free_command_buffers(pool, &[command_buffer]) };
    result
}

/// One sampler per filter mode, created on first use
#[derive(Debug, Default)]
pub struct SamplerCache {
    samplers: HashMap<SamplerFilter, vk::Sampler>,
}

impl SamplerCache {
    /// Sampler for `filter`
    pub fn get(&mut self, device: &Device, filter: SamplerFilter) -> DeviceResult<vk::Sampler> {
        if let Some(&sampler) = self.samplers.get(&filter) {
            return Ok(sampler);
        }
        let (vk_filter, mipmap) = match filter {
            SamplerFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
            SamplerFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        };
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk_filter)
            .min_filter(vk_filter)
            .mipmap_mode(mipmap)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS);
        let sampler =
            unsafe { device.create_sampler(&create_info, None) }.map_err(|e| vk_error("create_sampler", e))?;
        self.samplers.insert(filter, sampler);
        Ok(sampler)
    }

    /// Destroy every cached sampler
    pub fn destroy(&mut self, device: &Device) {
        for (_, sampler) in self.samplers.drain() {
            unsafe { device.destroy_sampler(sampler, None) };
        }
    }
}

/// Pipeline stage for a program stage. Only vertex and pixel stages are
/// built into graphics pipelines.
pub fn graphics_stage(stage: ShaderStage) -> Option<vk::ShaderStageFlags> {
    match stage {
        ShaderStage::Vertex => Some(vk::ShaderStageFlags::VERTEX),
        ShaderStage::Pixel => Some(vk::ShaderStageFlags::FRAGMENT),
        _ => None,
    }
}

/// Descriptor type for each table slot, constant buffers first, then
/// sampled images, then samplers
pub fn descriptor_types(layout: &ResourceLayout) -> Vec<vk::DescriptorType> {
    std::iter::repeat(vk::DescriptorType::UNIFORM_BUFFER)
        .take(layout.constant_buffers.len())
        .chain(std::iter::repeat(vk::DescriptorType::SAMPLED_IMAGE).take(layout.shader_resources as usize))
        .chain(std::iter::repeat(vk::DescriptorType::SAMPLER).take(layout.samplers as usize))
        .collect()
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 4] {
    let formats = [
        vk::Format::R32G32B32_SFLOAT,
        vk::Format::R32G32B32_SFLOAT,
        vk::Format::R32G32B32_SFLOAT,
        vk::Format::R32G32_SFLOAT,
    ];
    let mut attributes = [vk::VertexInputAttributeDescription::default(); 4];
    for (location, attribute) in attributes.iter_mut().enumerate() {
        *attribute = vk::VertexInputAttributeDescription {
            location: location as u32,
            binding: 0,
            format: formats[location],
            offset: ATTRIBUTE_OFFSETS[location],
        };
    }
    attributes
}

/// Graphics pipeline built for one program
#[derive(Debug)]
pub struct Program {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    types: Vec<vk::DescriptorType>,
}

impl Program {
    /// Build modules, layouts and the pipeline described by `desc`
    pub fn new(device: &Device, render_pass: &RenderPass, desc: &ProgramDesc<'_>) -> DeviceResult<Self> {
        let types = descriptor_types(desc.layout);
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = types
            .iter()
            .enumerate()
            .map(|(binding, &descriptor_type)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding as u32)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
                    .build()
            })
            .collect();
        let set_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_info, None) }
            .map_err(|e| vk_error("create_descriptor_set_layout", e))?;

        let mut program = Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layout,
            types,
        };
        if let Err(error) = program.build(device, render_pass, desc) {
            program.destroy(device);
            return Err(error);
        }
        log::debug!("Built pipeline for program '{}'", desc.name);
        Ok(program)
    }

    fn build(&mut self, device: &Device, render_pass: &RenderPass, desc: &ProgramDesc<'_>) -> DeviceResult<()> {
        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        let set_layouts = [self.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constants);
        self.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| vk_error("create_pipeline_layout", e))?;

        let mut modules = Vec::new();
        let result = (|| {
            let mut stages = Vec::new();
            for (stage, words) in desc.stages {
                let Some(flags) = graphics_stage(*stage) else {
                    log::warn!("Program '{}': {:?} stage is not used by graphics pipelines", desc.name, stage);
                    continue;
                };
                let module_info = vk::ShaderModuleCreateInfo::builder().code(words);
                let module = unsafe { device.create_shader_module(&module_info, None) }
                    .map_err(|e| vk_error("create_shader_module", e))?;
                modules.push(module);
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(flags)
                        .module(module)
                        .name(ENTRY_POINT)
                        .build(),
                );
            }
            self.create_pipeline(device, render_pass, &stages)
        })();

        for module in modules {
            unsafe { device.destroy_shader_module(module, None) };
        }
        result
    }

    fn create_pipeline(
        &mut self,
        device: &Device,
        render_pass: &RenderPass,
        stages: &[vk::PipelineShaderStageCreateInfo],
    ) -> DeviceResult<()> {
        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: Vertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE);
        let multisampling =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass.handle())
            .subpass(0)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) }
            .map_err(|(_, e)| vk_error("create_graphics_pipelines", e))?;
        self.pipeline = pipelines
            .first()
            .copied()
            .ok_or_else(|| DeviceError::api("create_graphics_pipelines", "no pipeline returned"))?;
        Ok(())
    }

    /// Pipeline handle
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layout
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// Descriptor type of each binding
    pub fn descriptor_types(&self) -> &[vk::DescriptorType] {
        &self.types
    }

    /// Destroy the pipeline and its layouts
    pub fn destroy(&self, device: &Device) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Descriptor pool for one frame slot, reset before the slot records again
#[derive(Debug)]
pub struct DescriptorArena {
    pool: vk::DescriptorPool,
}

impl DescriptorArena {
    /// Sets allocatable per frame
    pub const MAX_SETS: u32 = 256;

    /// Create the pool
    pub fn new(device: &Device) -> DeviceResult<Self> {
        let sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::SAMPLER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: Self::MAX_SETS * 4,
        });
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(Self::MAX_SETS)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| vk_error("create_descriptor_pool", e))?;
        Ok(Self { pool })
    }

    /// Free every set allocated from the pool
    pub fn reset(&self, device: &Device) -> DeviceResult<()> {
        unsafe { device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty()) }
            .map_err(|e| vk_error("reset_descriptor_pool", e))
    }

    /// Allocate a set for `program` and fill it from `table`.
    ///
    /// `resolve` maps each binding to native handles. Empty slots are left
    /// unwritten.
    pub fn write_set(
        &self,
        device: &Device,
        program: &Program,
        table: &DescriptorTable,
        mut resolve: impl FnMut(Binding) -> DeviceResult<ResolvedBinding>,
    ) -> DeviceResult<vk::DescriptorSet> {
        let set_layouts = [program.set_layout()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| vk_error("allocate_descriptor_sets", e))?
            .first()
            .copied()
            .ok_or_else(|| DeviceError::api("allocate_descriptor_sets", "no set returned"))?;

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut targets = Vec::new();
        for (slot, binding) in table.slots().iter().enumerate() {
            let Some(binding) = binding else { continue };
            let Some(&descriptor_type) = program.descriptor_types().get(slot) else {
                continue;
            };
            match resolve(*binding)? {
                ResolvedBinding::Buffer(buffer, range) => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer,
                        offset: 0,
                        range,
                    });
                    targets.push((slot, descriptor_type, true, buffer_infos.len() - 1));
                }
                ResolvedBinding::Image(view) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    targets.push((slot, descriptor_type, false, image_infos.len() - 1));
                }
                ResolvedBinding::Sampler(sampler) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    targets.push((slot, descriptor_type, false, image_infos.len() - 1));
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = targets
            .iter()
            .map(|&(slot, descriptor_type, is_buffer, index)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(slot as u32)
                    .descriptor_type(descriptor_type);
                if is_buffer {
                    write.buffer_info(std::slice::from_ref(&buffer_infos[index])).build()
                } else {
                    write.image_info(std::slice::from_ref(&image_infos[index])).build()
                }
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        Ok(set)
    }

    /// Destroy the pool
    pub fn destroy(&self, device: &Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Native handles behind a table binding
#[derive(Debug, Clone, Copy)]
pub enum ResolvedBinding {
    /// Uniform buffer and its size
    Buffer(vk::Buffer, vk::DeviceSize),
    /// Sampled image view
    Image(vk::ImageView),
    /// Sampler
    Sampler(vk::Sampler),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_types_follow_table_order() {
        let layout = ResourceLayout::textured().with_constant_buffer(64);
        assert_eq!(
            descriptor_types(&layout),
            vec![
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::DescriptorType::SAMPLER,
            ]
        );
        assert!(descriptor_types(&ResourceLayout::default()).is_empty());
    }

    #[test]
    fn attributes_match_vertex_layout() {
        let attributes = vertex_attributes();
        assert_eq!(attributes[3].offset, 36);
        assert_eq!(attributes[3].format, vk::Format::R32G32_SFLOAT);
        assert!(attributes.iter().enumerate().all(|(i, a)| a.location == i as u32));
    }

    #[test]
    fn only_vertex_and_pixel_build_pipelines() {
        assert_eq!(graphics_stage(ShaderStage::Pixel), Some(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(graphics_stage(ShaderStage::Compute), None);
        assert_eq!(PUSH_CONSTANT_SIZE as usize, std::mem::size_of::<[f32; 16]>());
    }
}
