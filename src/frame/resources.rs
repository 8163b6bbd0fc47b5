//! Persistent resource bookkeeping, the accumulation pair and deferred destruction.
//!
//! GPU work runs up to [`FRAMES_IN_FLIGHT`](crate::FRAMES_IN_FLIGHT) frames
//! behind the CPU, so a resource that is no longer needed can't be destroyed
//! immediately. [`DeferredDestructor`] holds it until the submission that
//! last referenced it is reported complete.
//!
//! ```text
//! queue(res, after = #7)           collect(completed = #7)
//!   pending: [#5 a] [#6 b] [#7 c]  ───────────────────────►  pending: []
//!                                   destroys a, b, c in queue order
//! ```

use std::collections::VecDeque;

use crate::backend::{
    BackendResult, BindGroupHandle, BufferHandle, ComputePipelineHandle, GraphicsBackend,
    SubmissionIndex, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
    TextureViewHandle,
};

/// What a persistent resource is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRole {
    /// Uploaded once at startup, read-only afterwards
    StaticInput,
    /// Rewritten by copies recorded inside frames
    PerFrameWritable,
    /// Refreshed from the swapchain on every acquire, never owned
    SwapchainBacked,
    /// Ping-pong history images, recreated on resize
    AccumulationTarget,
}

/// Backing storage of a persistent resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuResource {
    Buffer(BufferHandle),
    Image {
        texture: TextureHandle,
        view: TextureViewHandle,
    },
    /// Logical swapchain image, its view changes every frame
    Swapchain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentResource {
    pub name: &'static str,
    pub role: ResourceRole,
    pub resource: GpuResource,
}

/// Persistent resources in creation order
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Vec<PersistentResource>,
}

impl ResourceRegistry {
    pub fn register(&mut self, name: &'static str, role: ResourceRole, resource: GpuResource) {
        log::trace!("Registering {} ({:?}): {:?}", name, role, resource);
        self.entries.push(PersistentResource {
            name,
            role,
            resource,
        });
    }

    pub fn get(&self, name: &str) -> Option<&PersistentResource> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Remove every entry with `role`, returning them in creation order
    pub fn remove_role(&mut self, role: ResourceRole) -> Vec<PersistentResource> {
        let (removed, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.role == role);
        self.entries = kept;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersistentResource> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy everything, newest first
    pub fn destroy_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        while let Some(entry) = self.entries.pop() {
            log::trace!("Destroying {} ({:?})", entry.name, entry.role);
            match entry.resource {
                GpuResource::Buffer(buffer) => backend.destroy_buffer(buffer),
                GpuResource::Image { texture, view } => {
                    backend.destroy_texture_view(view);
                    backend.destroy_texture(texture);
                }
                GpuResource::Swapchain => {}
            }
        }
    }
}

/// One accumulation image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationImage {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
}

impl AccumulationImage {
    fn as_resource(&self) -> GpuResource {
        GpuResource::Image {
            texture: self.texture,
            view: self.view,
        }
    }
}

/// Two same-size images whose "previous" and "current" roles alternate.
///
/// Frame `i` writes `images[i % 2]` and reads `images[(i + 1) % 2]`, which
/// frame `i - 1` wrote. Swapping is relabeling only; nothing is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationPair {
    images: [AccumulationImage; 2],
    width: u32,
    height: u32,
}

impl AccumulationPair {
    pub const FORMAT: TextureFormat = TextureFormat::Rgba16Float;
    pub const NAMES: [&'static str; 2] = ["accumulation_a", "accumulation_b"];

    pub fn new(images: [AccumulationImage; 2], width: u32, height: u32) -> Self {
        Self {
            images,
            width,
            height,
        }
    }

    /// Allocate both images and register them
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        registry: &mut ResourceRegistry,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let mut images = Vec::with_capacity(2);
        for name in Self::NAMES {
            let texture = backend.create_texture(&TextureDescriptor {
                label: Some(name.to_string()),
                width,
                height,
                format: Self::FORMAT,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING,
            })?;
            let view = backend.create_texture_view(texture)?;
            let image = AccumulationImage { texture, view };
            registry.register(name, ResourceRole::AccumulationTarget, image.as_resource());
            images.push(image);
        }
        Ok(Self::new([images[0], images[1]], width, height))
    }

    /// `(previous, current)` for the frame with counter `frame_index`
    pub fn roles(&self, frame_index: u64) -> (AccumulationImage, AccumulationImage) {
        let current = (frame_index % 2) as usize;
        (self.images[1 - current], self.images[current])
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn images(&self) -> [AccumulationImage; 2] {
        self.images
    }
}

/// A resource waiting for the device to stop using it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredResource {
    Buffer(BufferHandle),
    Image {
        texture: TextureHandle,
        view: TextureViewHandle,
    },
    BindGroup(BindGroupHandle),
    ComputePipeline(ComputePipelineHandle),
}

impl DeferredResource {
    /// Destroy the resource immediately.
    ///
    /// The caller must ensure the device is no longer using it.
    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        match self {
            DeferredResource::Buffer(buffer) => backend.destroy_buffer(buffer),
            DeferredResource::Image { texture, view } => {
                backend.destroy_texture_view(view);
                backend.destroy_texture(texture);
            }
            DeferredResource::BindGroup(bind_group) => backend.destroy_bind_group(bind_group),
            DeferredResource::ComputePipeline(pipeline) => {
                backend.destroy_compute_pipeline(pipeline)
            }
        }
    }
}

impl From<AccumulationImage> for DeferredResource {
    fn from(image: AccumulationImage) -> Self {
        DeferredResource::Image {
            texture: image.texture,
            view: image.view,
        }
    }
}

/// Resources queued for destruction, keyed by the last submission using them
#[derive(Debug, Default)]
pub struct DeferredDestructor {
    pending: VecDeque<(SubmissionIndex, DeferredResource)>,
}

impl DeferredDestructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy `resource` once submission `after` has completed
    pub fn queue(&mut self, after: SubmissionIndex, resource: DeferredResource) {
        self.pending.push_back((after, resource));
    }

    /// Destroy every resource whose submission is complete.
    ///
    /// Returns the number of resources destroyed.
    pub fn collect<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        completed: SubmissionIndex,
    ) -> usize {
        let mut destroyed = 0;
        // Serials are queued in non-decreasing order
        while let Some((after, _)) = self.pending.front() {
            if *after > completed {
                break;
            }
            if let Some((_, resource)) = self.pending.pop_front() {
                resource.destroy(backend);
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            log::trace!("Collected {} deferred resources (completed #{})", destroyed, completed.0);
        }
        destroyed
    }

    /// Destroy everything regardless of completion; only valid after a wait for idle
    pub fn flush<B: GraphicsBackend>(&mut self, backend: &mut B) -> usize {
        let count = self.pending.len();
        for (_, resource) in self.pending.drain(..) {
            resource.destroy(backend);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferDescriptor, DummyBackend};

    fn image(id: u64) -> AccumulationImage {
        AccumulationImage {
            texture: TextureHandle(id),
            view: TextureViewHandle(id + 100),
        }
    }

    #[test]
    fn test_accumulation_roles_alternate() {
        let pair = AccumulationPair::new([image(1), image(2)], 4, 4);

        let (previous, current) = pair.roles(0);
        assert_eq!((previous, current), (image(2), image(1)));

        let (previous, current) = pair.roles(1);
        assert_eq!((previous, current), (image(1), image(2)));
    }

    #[test]
    fn test_previous_is_last_frames_current() {
        let pair = AccumulationPair::new([image(1), image(2)], 4, 4);
        for frame in 1..10u64 {
            let (_, last_current) = pair.roles(frame - 1);
            let (previous, current) = pair.roles(frame);
            assert_eq!(previous, last_current);
            assert_ne!(previous, current);
        }
    }

    #[test]
    fn test_collect_waits_for_completion() {
        let mut backend = DummyBackend::default();
        let mut destructor = DeferredDestructor::new();
        let a = backend
            .create_buffer(&BufferDescriptor::staging("a", 4))
            .unwrap();
        let b = backend
            .create_buffer(&BufferDescriptor::staging("b", 4))
            .unwrap();
        destructor.queue(SubmissionIndex(1), DeferredResource::Buffer(a));
        destructor.queue(SubmissionIndex(2), DeferredResource::Buffer(b));

        assert_eq!(destructor.collect(&mut backend, SubmissionIndex(0)), 0);
        assert_eq!(destructor.collect(&mut backend, SubmissionIndex(1)), 1);
        assert!(!backend.is_buffer_alive(a));
        assert!(backend.is_buffer_alive(b));

        assert_eq!(destructor.flush(&mut backend), 1);
        assert!(destructor.is_empty());
        assert_eq!(backend.invalid_destroys(), 0);
    }

    #[test]
    fn test_registry_destroys_newest_first() {
        let mut backend = DummyBackend::default();
        let mut registry = ResourceRegistry::default();
        let first = backend
            .create_buffer(&BufferDescriptor::staging("first", 4))
            .unwrap();
        let second = backend
            .create_buffer(&BufferDescriptor::staging("second", 4))
            .unwrap();
        registry.register("first", ResourceRole::StaticInput, GpuResource::Buffer(first));
        registry.register("swapchain", ResourceRole::SwapchainBacked, GpuResource::Swapchain);
        registry.register("second", ResourceRole::PerFrameWritable, GpuResource::Buffer(second));
        backend.take_calls();

        registry.destroy_all(&mut backend);
        assert!(registry.is_empty());
        assert_eq!(
            backend.take_calls(),
            vec![
                crate::backend::dummy::Call::DestroyBuffer(second),
                crate::backend::dummy::Call::DestroyBuffer(first),
            ]
        );
    }

    #[test]
    fn test_remove_role_keeps_others() {
        let mut registry = ResourceRegistry::default();
        registry.register("voxels", ResourceRole::StaticInput, GpuResource::Buffer(BufferHandle(1)));
        registry.register("a", ResourceRole::AccumulationTarget, image(2).as_resource());
        registry.register("b", ResourceRole::AccumulationTarget, image(3).as_resource());

        let removed = registry.remove_role(ResourceRole::AccumulationTarget);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].name, "a");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("voxels").is_some());
    }
}
