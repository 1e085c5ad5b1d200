// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::ffi::{CStr, CString};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nomad_core::init_tracing;
use nomad_vk::ash::vk;
use nomad_vk::{
    resolve_present_family, AcquireError, ContextRequest, ExecutionContext, Feature, FeatureMask,
    ImageChain, Instance, InstanceRequest, NegotiationError, Surface,
};
use tracing::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use crate::config::{load_cfg, SwapchainCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "nomad.toml")]
    config: PathBuf,
    /// Force the validation layer on, even in release builds
    #[arg(long)]
    validation: bool,
    /// Print the device feature table (name and bit) and exit
    #[arg(long)]
    list_features: bool,
}

/// Config resolved up front, so bad names fail before any driver work.
struct Settings {
    features: FeatureMask,
    queues: vk::QueueFlags,
    extensions: Vec<CString>,
    swapchain: SwapchainCfg,
    validation: bool,
}

/// Driver objects, declared in drop order.
struct Gpu {
    chain: ImageChain,
    fence: vk::Fence,
    ctx: ExecutionContext,
    _surface: Surface,
    _instance: Instance,
    /// The current chain has had one image acquired.
    probed: bool,
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().device_wait_idle().ok();
            self.ctx.device().destroy_fence(self.fence, None);
        }
    }
}

fn extent_of(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn init_gpu(window: &Window, settings: &Settings) -> Result<Gpu> {
    let display = window.display_handle()?.as_raw();
    let raw_window = window.window_handle()?.as_raw();

    let instance = unsafe {
        Instance::new(
            display,
            &InstanceRequest {
                validation: settings.validation,
                ..Default::default()
            },
        )
    }
    .context("create instance")?;
    let surface =
        unsafe { Surface::new(&instance, display, raw_window) }.context("create surface")?;

    let extensions: Vec<&CStr> = settings.extensions.iter().map(|e| e.as_c_str()).collect();
    let ctx = unsafe {
        ExecutionContext::new(
            instance.raw(),
            &ContextRequest {
                features: settings.features,
                queues: settings.queues,
                extensions: &extensions,
            },
        )
    }
    .context("create execution context")?;

    let present = resolve_present_family(ctx.assignment(), |family| {
        surface.supports_present(ctx.physical_device(), family)
    })
    .context("find a present queue family")?;
    info!("presenting from family {present}");

    let request = settings.swapchain.request(extent_of(window.inner_size()));
    // SAFETY: `Gpu` declares `chain` before `ctx` and `surface`, so it drops first.
    let chain =
        unsafe { ImageChain::new(&ctx, &surface, request) }.context("create image chain")?;

    let fence_info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        ..Default::default()
    };
    let fence = unsafe { ctx.device().create_fence(&fence_info, None) }.context("create fence")?;

    Ok(Gpu {
        chain,
        fence,
        ctx,
        _surface: surface,
        _instance: instance,
        probed: false,
    })
}

impl Gpu {
    /// Acquire one image from the current chain and wait for it.
    ///
    /// A suboptimal acquire still signals the fence; it is waited on and
    /// reset before the error is returned so the next chain gets it unsignaled.
    fn probe(&mut self, timeout: u64) -> Result<(), AcquireError> {
        let outcome = self
            .chain
            .acquire_next(timeout, vk::Semaphore::null(), self.fence);
        let acquired = match &outcome {
            Ok(index) => Some(*index),
            Err(e) => e.acquired_image(),
        };
        if acquired.is_some() {
            let device = self.ctx.device();
            unsafe {
                device
                    .wait_for_fences(&[self.fence], true, u64::MAX)
                    .and_then(|_| device.reset_fences(&[self.fence]))
                    .map_err(AcquireError::Device)?;
            }
        }
        let index = outcome?;
        info!(
            "acquired image {index} of {} ({:?})",
            self.chain.image_count(),
            self.chain.images()[index as usize]
        );
        self.probed = true;
        Ok(())
    }

    /// `Ok(false)` when the surface has no area and the chain stays stale.
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<bool, NegotiationError> {
        match self.chain.rebuild(extent) {
            Ok(()) => {
                self.probed = false;
                Ok(true)
            }
            Err(NegotiationError::ZeroExtent) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

struct App {
    settings: Settings,
    // Declared before `window`: the surface must go first.
    gpu: Option<Gpu>,
    window: Option<Window>,
    paused: bool,
}

impl App {
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.gpu = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("nomad")
            .with_inner_size(PhysicalSize::new(
                self.settings.swapchain.width,
                self.settings.swapchain.height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => {
                error!("create_window failed: {e}");
                event_loop.exit();
                return;
            }
        };

        match init_gpu(&window, &self.settings) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                error!("vk init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.paused = new_size.width == 0 || new_size.height == 0;
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width, new_size.height, self.paused
                );
                if let Some(gpu) = &mut self.gpu {
                    gpu.chain.mark_stale();
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let (Some(gpu), Some(window)) = (&mut self.gpu, &self.window) else {
                    return;
                };

                if gpu.chain.state() != nomad_vk::ChainState::Ready {
                    match gpu.rebuild(extent_of(window.inner_size())) {
                        Ok(true) => {}
                        Ok(false) => {
                            self.paused = true;
                            return;
                        }
                        Err(e) => {
                            error!("rebuild failed: {e}");
                            self.shutdown(event_loop);
                            return;
                        }
                    }
                }

                if gpu.probed {
                    return;
                }
                match gpu.probe(self.settings.swapchain.acquire_timeout_ns()) {
                    Ok(()) => {}
                    Err(e) if e.needs_rebuild() => {
                        warn!("{e}; rebuilding");
                        window.request_redraw();
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!("{e}; retrying");
                        window.request_redraw();
                    }
                    Err(e) => {
                        error!("acquire failed: {e}");
                        self.shutdown(event_loop);
                    }
                }
            }

            _ => {}
        }
    }
}

fn print_features() {
    for &f in Feature::ALL {
        println!("{:>2}  {}", f.bit(), f.name());
    }
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    if args.list_features {
        print_features();
        return Ok(());
    }

    let cfg = load_cfg(&args.config);
    let settings = Settings {
        features: cfg.device.feature_mask()?,
        queues: cfg.device.queue_flags(),
        extensions: cfg.device.extension_names()?,
        swapchain: cfg.swapchain,
        validation: args.validation || cfg!(debug_assertions),
    };
    info!(
        "desired features {:?}, queues {:?}",
        settings.features, settings.queues
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        settings,
        gpu: None,
        window: None,
        paused: false,
    };
    event_loop.run_app(&mut app)?;
    Ok(())
}
