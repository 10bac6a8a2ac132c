use std::{path::Path, time::Instant};

use glam::{Mat4, Vec3};
use gpu_context::{
    BufferDesc, BufferHandle, ContextConfig, FixedFunctionState, GpuContext, GpuError,
    GraphicsPipelineDesc, InstanceFactory, PipelineHandle, VertexAttribute, vk,
};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

const CONFIG_PATH: &str = "runner.toml";
const VERTEX_SHADER_PATH: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/intermediate/shaders/triangle.vert.spv"
);
const FRAGMENT_SHADER_PATH: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/intermediate/shaders/triangle.frag.spv"
);

const TRIANGLE_VERTICES: [[f32; 3]; 3] = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0]];
const TRIANGLE_INDICES: [u32; 3] = [0, 1, 2];

struct Triangle<'f> {
    context: GpuContext<'f>,
    pipeline: PipelineHandle,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
}

impl<'f> Triangle<'f> {
    fn new(factory: &'f InstanceFactory, window: &dyn Window) -> gpu_context::Result<Self> {
        let mut context = GpuContext::new(factory, window, surface_extent(window.surface_size()))?;

        let vertex_buffer = context.create_buffer(&BufferDesc {
            data: bytemuck::cast_slice(&TRIANGLE_VERTICES),
            usage: vk::BufferUsageFlags::VertexBuffer,
        })?;
        let index_buffer = context.create_buffer(&BufferDesc {
            data: bytemuck::cast_slice(&TRIANGLE_INDICES),
            usage: vk::BufferUsageFlags::IndexBuffer,
        })?;

        let vertex_shader = context.create_shader(&std::fs::read(VERTEX_SHADER_PATH)?)?;
        let fragment_shader = context.create_shader(&std::fs::read(FRAGMENT_SHADER_PATH)?)?;

        let vertex_attributes = [VertexAttribute {
            binding: 0,
            offset: 0,
            stride: std::mem::size_of::<[f32; 3]>() as u32,
            format: vk::Format::R32G32B32Sfloat,
        }];
        let pipeline = context.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_attributes: &vertex_attributes,
            vertex_shader,
            fragment_shader,
            fixed_function: FixedFunctionState::default(),
        })?;

        context.destroy_shader(vertex_shader)?;
        context.destroy_shader(fragment_shader)?;

        Ok(Self {
            context,
            pipeline,
            vertex_buffer,
            index_buffer,
        })
    }

    fn render(&mut self, elapsed: f32) -> gpu_context::Result<()> {
        let extent = self.context.swapchain_extent();
        let aspect_ratio = extent.width as f32 / extent.height as f32;

        let mvp = Mat4::perspective_lh(75f32.to_radians(), aspect_ratio, 0.01, 1000.0)
            * Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0))
            * Mat4::from_rotation_y(elapsed);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let context = &mut self.context;
        context.begin_frame()?;
        context.begin_rendering(viewport)?;

        context.set_graphics_pipeline(self.pipeline)?;
        context.set_push_constants(bytemuck::bytes_of(&mvp), 0)?;
        context.set_vertex_buffers(&[self.vertex_buffer])?;
        context.set_index_buffer(self.index_buffer, vk::IndexType::Uint32)?;
        context.draw_indexed(0, TRIANGLE_INDICES.len() as u32)?;

        context.end_rendering()?;
        context.end_frame()
    }
}

struct Application<'f> {
    factory: &'f InstanceFactory,
    // Dropped before the window it presents to.
    triangle: Option<Triangle<'f>>,
    window: Option<Box<dyn Window>>,
    started_at: Instant,
}

impl<'f> Application<'f> {
    fn new(factory: &'f InstanceFactory) -> Self {
        Self {
            factory,
            triangle: None,
            window: None,
            started_at: Instant::now(),
        }
    }

    fn redraw(&mut self, event_loop: &dyn ActiveEventLoop) {
        let (Some(triangle), Some(window)) = (&mut self.triangle, &self.window) else {
            return;
        };

        let elapsed = self.started_at.elapsed().as_secs_f32();
        let result = triangle.render(elapsed).and_then(|()| {
            if triangle.context.swapchain_is_stale() {
                triangle
                    .context
                    .validate_swapchain(surface_extent(window.surface_size()))?;
            }

            Ok(())
        });

        match result {
            Ok(()) | Err(GpuError::ZeroExtent) => {}
            Err(GpuError::SwapchainOutOfDate) => {
                let extent = surface_extent(window.surface_size());
                match triangle.context.validate_swapchain(extent) {
                    Ok(_) | Err(GpuError::ZeroExtent) => {}
                    Err(error) => {
                        log::error!("Failed to rebuild the swap chain: {error}");
                        event_loop.exit();
                    }
                }
            }
            Err(error) => {
                log::error!("Frame failed: {error}");
                event_loop.exit();
            }
        }

        window.request_redraw();
    }
}

impl ApplicationHandler for Application<'_> {
    fn can_create_surfaces(&mut self, event_loop: &dyn ActiveEventLoop) {
        let window_attributes = WindowAttributes::default()
            .with_title("gpu_context triangle")
            .with_surface_size(PhysicalSize::new(800, 600));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(error) => {
                log::error!("Failed to create window: {error}");
                event_loop.exit();
                return;
            }
        };

        match Triangle::new(self.factory, window.as_ref()) {
            Ok(triangle) => self.triangle = Some(triangle),
            Err(error) => {
                log::error!("Failed to initialize rendering: {error}");
                event_loop.exit();
                return;
            }
        }

        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &dyn ActiveEventLoop, _: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            WindowEvent::SurfaceResized(size) => {
                if let Some(triangle) = &mut self.triangle {
                    match triangle.context.validate_swapchain(surface_extent(size)) {
                        Ok(_) | Err(GpuError::ZeroExtent) => {}
                        Err(error) => {
                            log::error!("Failed to rebuild the swap chain: {error}");
                            event_loop.exit();
                        }
                    }
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }
}

fn surface_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn load_config() -> ContextConfig {
    if !Path::new(CONFIG_PATH).exists() {
        return ContextConfig::default();
    }

    match ContextConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(error) => {
            log::warn!("Ignoring {CONFIG_PATH}: {error}");
            ContextConfig::default()
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let factory = InstanceFactory::new(load_config());

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(error) => {
            log::error!("Failed to create event loop: {error}");
            return;
        }
    };

    if let Err(error) = event_loop.run_app(Application::new(&factory)) {
        log::error!("Event loop terminated with an error: {error}");
    }
}
