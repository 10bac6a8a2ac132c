use vulkanite::vk::{rs::*, *};

use crate::{
    error::{GpuError, Result},
    registry::ShaderHandle,
};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

pub const UNIFORM_BUFFER_BINDING: u32 = 0;
pub const IMAGE_SAMPLER_BINDING: u32 = 1;

pub struct ShaderResource {
    pub module: ShaderModule,
}

impl ShaderResource {
    pub fn new(device: &Device, bytes: &[u8]) -> Result<Self> {
        let code = spirv_words(bytes)?;

        let shader_module_create_info = ShaderModuleCreateInfo::default().code(&code);
        let module = device.create_shader_module(&shader_module_create_info)?;

        Ok(Self { module })
    }

    pub unsafe fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_shader_module(Some(self.module));
        }
    }
}

/// Reinterprets a SPIR-V binary as words after checking its size and magic number.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(GpuError::InvalidShader("empty binary"));
    }
    if bytes.len() % 4 != 0 {
        return Err(GpuError::InvalidShader("length is not a multiple of 4"));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(GpuError::InvalidShader("missing SPIR-V magic number"));
    }

    Ok(words)
}

/// One vertex attribute. Its shader location is its position in the attribute list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub binding: u32,
    pub offset: u32,
    pub stride: u32,
    pub format: Format,
}

#[derive(Debug, Default)]
pub struct VertexInputLayout {
    pub bindings: Vec<VertexInputBindingDescription>,
    pub attributes: Vec<VertexInputAttributeDescription>,
}

pub fn vertex_input_layout(vertex_attributes: &[VertexAttribute]) -> Result<VertexInputLayout> {
    let mut layout = VertexInputLayout::default();

    for (location, attribute) in vertex_attributes.iter().enumerate() {
        match layout
            .bindings
            .iter()
            .find(|binding| binding.binding == attribute.binding)
        {
            Some(binding) if binding.stride != attribute.stride => {
                return Err(GpuError::InvalidPipeline(format!(
                    "binding {} declared with strides {} and {}",
                    attribute.binding, binding.stride, attribute.stride
                )));
            }
            Some(_) => {}
            None => layout.bindings.push(VertexInputBindingDescription {
                binding: attribute.binding,
                stride: attribute.stride,
                input_rate: VertexInputRate::Vertex,
            }),
        }

        layout.attributes.push(VertexInputAttributeDescription {
            location: location as u32,
            binding: attribute.binding,
            format: attribute.format,
            offset: attribute.offset,
        });
    }

    Ok(layout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// `src * a + dst * (1 - a)` for color, source alpha kept as is.
    Alpha,
    Opaque,
}

/// Fixed-function settings baked into a graphics pipeline.
///
/// Topology and cull mode are also dynamic state, these are the values used until a
/// command overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFunctionState {
    pub topology: PrimitiveTopology,
    pub cull_mode: CullModeFlags,
    pub front_face: FrontFace,
    pub sample_count: u32,
    pub blend: BlendMode,
    /// `None` renders into the swap-chain format.
    pub color_format: Option<Format>,
    pub push_constant_size: u32,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullModeFlags::None,
            front_face: FrontFace::CounterClockwise,
            sample_count: 1,
            blend: BlendMode::Alpha,
            color_format: None,
            push_constant_size: MAX_PUSH_CONSTANT_SIZE,
        }
    }
}

impl FixedFunctionState {
    pub fn validate(&self) -> Result<()> {
        if self.push_constant_size > MAX_PUSH_CONSTANT_SIZE {
            return Err(GpuError::InvalidPipeline(format!(
                "push-constant size {} exceeds {MAX_PUSH_CONSTANT_SIZE}",
                self.push_constant_size
            )));
        }
        if self.push_constant_size % 4 != 0 {
            return Err(GpuError::InvalidPipeline(format!(
                "push-constant size {} is not a multiple of 4",
                self.push_constant_size
            )));
        }
        if self.color_format == Some(Format::Undefined) {
            return Err(GpuError::InvalidPipeline(
                "color format must be defined".to_string(),
            ));
        }
        self.sample_count_flags()?;

        Ok(())
    }

    pub fn sample_count_flags(&self) -> Result<SampleCountFlags> {
        let flags = match self.sample_count {
            1 => SampleCountFlags::Count1,
            2 => SampleCountFlags::Count2,
            4 => SampleCountFlags::Count4,
            8 => SampleCountFlags::Count8,
            16 => SampleCountFlags::Count16,
            32 => SampleCountFlags::Count32,
            64 => SampleCountFlags::Count64,
            other => {
                return Err(GpuError::InvalidPipeline(format!(
                    "unsupported sample count {other}"
                )));
            }
        };

        Ok(flags)
    }

    pub fn color_blend_attachment(&self) -> PipelineColorBlendAttachmentState {
        let color_write_mask =
            ColorComponentFlags::R | ColorComponentFlags::G | ColorComponentFlags::B | ColorComponentFlags::A;

        match self.blend {
            BlendMode::Alpha => PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(BlendFactor::SrcAlpha)
                .dst_color_blend_factor(BlendFactor::OneMinusSrcAlpha)
                .color_blend_op(BlendOp::Add)
                .src_alpha_blend_factor(BlendFactor::One)
                .dst_alpha_blend_factor(BlendFactor::Zero)
                .alpha_blend_op(BlendOp::Add)
                .color_write_mask(color_write_mask),
            BlendMode::Opaque => PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(color_write_mask),
        }
    }
}

pub struct GraphicsPipelineDesc<'a> {
    pub vertex_attributes: &'a [VertexAttribute],
    pub vertex_shader: ShaderHandle,
    pub fragment_shader: ShaderHandle,
    pub fixed_function: FixedFunctionState,
}

pub struct PipelineResource {
    pub pipeline: Pipeline,
    pub layout: PipelineLayout,
    pub push_descriptor_set_layout: DescriptorSetLayout,
    pub push_constant_size: u32,
}

impl PipelineResource {
    pub unsafe fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_pipeline(Some(self.pipeline));
            device.destroy_pipeline_layout(Some(self.layout));
            device.destroy_descriptor_set_layout(Some(self.push_descriptor_set_layout));
        }
    }
}

/// Builds a dynamic-rendering graphics pipeline. Shaders are borrowed, not consumed.
pub fn create_graphics_pipeline(
    device: &Device,
    vertex_module: ShaderModule,
    fragment_module: ShaderModule,
    vertex_attributes: &[VertexAttribute],
    fixed_function: &FixedFunctionState,
    color_format: Format,
) -> Result<PipelineResource> {
    fixed_function.validate()?;
    let vertex_input = vertex_input_layout(vertex_attributes)?;

    let push_descriptor_set_layout = create_push_descriptor_set_layout(device)?;

    let layout = match create_pipeline_layout(
        device,
        push_descriptor_set_layout,
        fixed_function.push_constant_size,
    ) {
        Ok(layout) => layout,
        Err(error) => {
            unsafe { device.destroy_descriptor_set_layout(Some(push_descriptor_set_layout)) };
            return Err(error);
        }
    };

    let pipeline = build_pipeline(
        device,
        vertex_module,
        fragment_module,
        &vertex_input,
        fixed_function,
        color_format,
        layout,
    );

    match pipeline {
        Ok(pipeline) => {
            log::debug!(
                "Graphics pipeline created: {} attributes, {color_format:?}",
                vertex_input.attributes.len()
            );

            Ok(PipelineResource {
                pipeline,
                layout,
                push_descriptor_set_layout,
                push_constant_size: fixed_function.push_constant_size,
            })
        }
        Err(error) => {
            unsafe {
                device.destroy_pipeline_layout(Some(layout));
                device.destroy_descriptor_set_layout(Some(push_descriptor_set_layout));
            }

            Err(error)
        }
    }
}

fn create_push_descriptor_set_layout(device: &Device) -> Result<DescriptorSetLayout> {
    let bindings = [
        DescriptorSetLayoutBinding {
            binding: UNIFORM_BUFFER_BINDING,
            descriptor_type: DescriptorType::UniformBuffer,
            descriptor_count: 1,
            stage_flags: ShaderStageFlags::Vertex | ShaderStageFlags::Fragment,
            ..Default::default()
        },
        DescriptorSetLayoutBinding {
            binding: IMAGE_SAMPLER_BINDING,
            descriptor_type: DescriptorType::CombinedImageSampler,
            descriptor_count: 1,
            stage_flags: ShaderStageFlags::Fragment,
            ..Default::default()
        },
    ];

    let descriptor_set_layout_info = DescriptorSetLayoutCreateInfo::default()
        .flags(DescriptorSetLayoutCreateFlags::PushDescriptorKHR)
        .bindings(&bindings);

    Ok(device.create_descriptor_set_layout(&descriptor_set_layout_info)?)
}

fn create_pipeline_layout(
    device: &Device,
    push_descriptor_set_layout: DescriptorSetLayout,
    push_constant_size: u32,
) -> Result<PipelineLayout> {
    let descriptor_set_layouts = [push_descriptor_set_layout];
    let push_constant_ranges = [PushConstantRange {
        stage_flags: ShaderStageFlags::AllGraphics,
        offset: 0,
        size: push_constant_size,
    }];
    let push_constant_ranges: &[PushConstantRange] = if push_constant_size == 0 {
        &[]
    } else {
        &push_constant_ranges
    };

    let pipeline_layout_info = PipelineLayoutCreateInfo::default()
        .set_layouts(descriptor_set_layouts.as_slice())
        .push_constant_ranges(push_constant_ranges);

    Ok(device.create_pipeline_layout(&pipeline_layout_info)?)
}

fn build_pipeline(
    device: &Device,
    vertex_module: ShaderModule,
    fragment_module: ShaderModule,
    vertex_input: &VertexInputLayout,
    fixed_function: &FixedFunctionState,
    color_format: Format,
    layout: PipelineLayout,
) -> Result<Pipeline> {
    let stages = [
        PipelineShaderStageCreateInfo::default()
            .stage(ShaderStageFlags::Vertex)
            .module(&vertex_module)
            .name(c"main"),
        PipelineShaderStageCreateInfo::default()
            .stage(ShaderStageFlags::Fragment)
            .module(&fragment_module)
            .name(c"main"),
    ];

    let vertex_input_state = PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_input.bindings)
        .vertex_attribute_descriptions(&vertex_input.attributes);

    let input_assembly_state =
        PipelineInputAssemblyStateCreateInfo::default().topology(fixed_function.topology);

    // Counts come from the `*_with_count` dynamic state.
    let viewport_state = PipelineViewportStateCreateInfo::default();

    let rasterization_state = PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(PolygonMode::Fill)
        .cull_mode(fixed_function.cull_mode)
        .front_face(fixed_function.front_face)
        .line_width(1.0);

    let multisample_state = PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(fixed_function.sample_count_flags()?);

    let color_blend_attachments = [fixed_function.color_blend_attachment()];
    let color_blend_state =
        PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

    let dynamic_states = [
        DynamicState::ViewportWithCount,
        DynamicState::ScissorWithCount,
        DynamicState::CullMode,
        DynamicState::PrimitiveTopology,
    ];
    let dynamic_state = PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats = [color_format];
    let mut pipeline_rendering_info =
        PipelineRenderingCreateInfo::default().color_attachment_formats(&color_attachment_formats);

    let graphics_pipeline_create_info = GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(&layout)
        .push_next(&mut pipeline_rendering_info);

    let (_status, pipelines): (_, Vec<Pipeline>) =
        device.create_graphics_pipelines(None, &[graphics_pipeline_create_info])?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::InvalidPipeline("driver returned no pipeline".to_string()))
}
