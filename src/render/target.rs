use log::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{
    DepthAttachment, FramebufferDesc, FramebufferId, FramebufferStatus, GraphicsDevice,
    TextureDesc, TextureFormat, TextureId, Viewport,
};

/// Depth storage of a [`RenderTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthSpec {
    None,
    /// Sampleable depth texture.
    Texture,
    /// Attach-only depth storage.
    Renderbuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub color: Option<TextureFormat>,
    pub depth: DepthSpec,
}

/// Framebuffer plus the attachments it owns, all of one size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    label: &'static str,
    framebuffer: FramebufferId,
    color: Option<TextureId>,
    depth: Option<DepthAttachment>,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// Allocates the attachments and checks the framebuffer is complete.
    /// On failure everything created here is released again.
    pub fn create(gpu: &mut dyn GraphicsDevice, desc: &RenderTargetDesc) -> PipelineResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(PipelineError::InvalidSize {
                width: desc.width,
                height: desc.height,
            });
        }
        let color = desc.color.map(|format| {
            gpu.create_texture(&TextureDesc::new(desc.label, desc.width, desc.height, format))
        });
        let depth = match desc.depth {
            DepthSpec::None => None,
            DepthSpec::Texture => Some(DepthAttachment::Texture(gpu.create_texture(
                &TextureDesc::new(
                    desc.label,
                    desc.width,
                    desc.height,
                    TextureFormat::Depth32Float,
                ),
            ))),
            DepthSpec::Renderbuffer => Some(DepthAttachment::Renderbuffer(
                gpu.create_renderbuffer(desc.width, desc.height),
            )),
        };
        let framebuffer = gpu.create_framebuffer(&FramebufferDesc {
            label: desc.label,
            color,
            depth,
        });
        let target = Self {
            label: desc.label,
            framebuffer,
            color,
            depth,
            width: desc.width,
            height: desc.height,
        };

        let status = gpu.framebuffer_status(framebuffer);
        if status != FramebufferStatus::Complete {
            target.release(gpu);
            return Err(PipelineError::IncompleteFramebuffer {
                label: desc.label,
                status,
            });
        }
        debug!(
            "created render target {} ({}x{})",
            desc.label, desc.width, desc.height
        );
        Ok(target)
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_framebuffer(self.framebuffer);
        if let Some(color) = self.color {
            gpu.delete_texture(color);
        }
        match self.depth {
            Some(DepthAttachment::Texture(depth)) => gpu.delete_texture(depth),
            Some(DepthAttachment::Renderbuffer(depth)) => gpu.delete_renderbuffer(depth),
            None => {}
        }
    }

    /// Binds the framebuffer and sets the viewport to cover it.
    pub fn bind(&self, gpu: &mut dyn GraphicsDevice) {
        gpu.bind_framebuffer(Some(self.framebuffer));
        gpu.set_viewport(Viewport::full(self.width, self.height));
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn color_texture(&self) -> Option<TextureId> {
        self.color
    }

    pub fn depth_texture(&self) -> Option<TextureId> {
        match self.depth {
            Some(DepthAttachment::Texture(texture)) => Some(texture),
            _ => None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Depth-only target the shadow pass renders into. Never resized.
#[derive(Debug)]
pub struct ShadowMap {
    target: RenderTarget,
}

impl ShadowMap {
    pub const SIZE: u32 = 2048;

    pub fn create(gpu: &mut dyn GraphicsDevice) -> PipelineResult<Self> {
        let target = RenderTarget::create(
            gpu,
            &RenderTargetDesc {
                label: "shadow-map",
                width: Self::SIZE,
                height: Self::SIZE,
                color: None,
                depth: DepthSpec::Texture,
            },
        )?;
        Ok(Self { target })
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn depth_texture(&self) -> Option<TextureId> {
        self.target.depth_texture()
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        self.target.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capabilities, HeadlessDevice};

    #[test]
    fn shadow_map_is_depth_only() {
        let mut gpu = HeadlessDevice::new(800, 600);
        let map = ShadowMap::create(&mut gpu).unwrap();
        assert_eq!(map.target().size(), (2048, 2048));
        assert_eq!(map.target().color_texture(), None);
        let depth = map.depth_texture().unwrap();
        assert_eq!(
            gpu.texture_desc(depth).map(|d| d.format),
            Some(TextureFormat::Depth32Float)
        );
    }

    #[test]
    fn incomplete_target_is_fatal_and_released() {
        let mut gpu = HeadlessDevice::with_capabilities(
            64,
            64,
            Capabilities {
                float_render_targets: true,
                max_texture_size: 1024,
            },
        );
        let err = ShadowMap::create(&mut gpu).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteFramebuffer {
                label: "shadow-map",
                status: FramebufferStatus::IncompleteAttachment
            }
        ));
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut gpu = HeadlessDevice::new(8, 8);
        let err = RenderTarget::create(
            &mut gpu,
            &RenderTargetDesc {
                label: "empty",
                width: 0,
                height: 4,
                color: Some(TextureFormat::Rgba8Unorm),
                depth: DepthSpec::None,
            },
        )
        .unwrap_err();
        assert_eq!(err, PipelineError::InvalidSize { width: 0, height: 4 });
    }
}
