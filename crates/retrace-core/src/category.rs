//! Handle categories.
//!
//! A [`HandleCategory`] scopes capture identifier uniqueness: a buffer and an
//! image may share the same numeric [`CaptureId`](crate::CaptureId), so every
//! identity lookup is keyed by `(category, id)`. The category also names the
//! parent through which a handle's dispatch is resolved during replay.

use std::fmt;

macro_rules! handle_categories {
    ($( $(#[$doc:meta])* $variant:ident = $tag:literal => $name:literal, )+) => {
        /// The class of object a handle refers to.
        ///
        /// Each category has a stable `u16` wire tag; tags are never reused.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HandleCategory {
            $( $(#[$doc])* $variant, )+
        }

        impl HandleCategory {
            /// Every category, in wire-tag order.
            pub const ALL: &'static [HandleCategory] = &[ $( HandleCategory::$variant, )+ ];

            /// Stable wire tag for this category.
            pub fn tag(self) -> u16 {
                match self {
                    $( HandleCategory::$variant => $tag, )+
                }
            }

            /// Category for a wire tag, or `None` if the tag is unknown.
            pub fn from_tag(tag: u16) -> Option<Self> {
                match tag {
                    $( $tag => Some(HandleCategory::$variant), )+
                    _ => None,
                }
            }

            /// Human-readable name, used in diagnostics.
            pub fn name(self) -> &'static str {
                match self {
                    $( HandleCategory::$variant => $name, )+
                }
            }
        }
    };
}

handle_categories! {
    /// API instance (root of the dispatch chain).
    Instance = 1 => "instance",
    /// Physical adapter enumerated from an instance.
    PhysicalDevice = 2 => "physical-device",
    /// Logical device.
    Device = 3 => "device",
    /// Device queue.
    Queue = 4 => "queue",
    /// Command pool.
    CommandPool = 5 => "command-pool",
    /// Command buffer.
    CommandBuffer = 6 => "command-buffer",
    /// Device memory allocation.
    DeviceMemory = 7 => "device-memory",
    /// Buffer.
    Buffer = 8 => "buffer",
    /// Buffer view.
    BufferView = 9 => "buffer-view",
    /// Image.
    Image = 10 => "image",
    /// Image view.
    ImageView = 11 => "image-view",
    /// Sampler.
    Sampler = 12 => "sampler",
    /// Shader module.
    ShaderModule = 13 => "shader-module",
    /// Pipeline layout.
    PipelineLayout = 14 => "pipeline-layout",
    /// Pipeline.
    Pipeline = 15 => "pipeline",
    /// Descriptor set layout.
    DescriptorSetLayout = 16 => "descriptor-set-layout",
    /// Descriptor pool.
    DescriptorPool = 17 => "descriptor-pool",
    /// Descriptor set.
    DescriptorSet = 18 => "descriptor-set",
    /// Fence.
    Fence = 19 => "fence",
    /// Semaphore.
    Semaphore = 20 => "semaphore",
    /// Event.
    Event = 21 => "event",
    /// Query pool.
    QueryPool = 22 => "query-pool",
    /// Render pass.
    RenderPass = 23 => "render-pass",
    /// Framebuffer.
    Framebuffer = 24 => "framebuffer",
    /// Presentation surface.
    Surface = 25 => "surface",
    /// Swapchain.
    Swapchain = 26 => "swapchain",
    /// Descriptor heap (D3D-style APIs).
    Heap = 27 => "heap",
    /// Committed or placed resource (D3D-style APIs).
    Resource = 28 => "resource",
    /// Command list (D3D-style APIs).
    CommandList = 29 => "command-list",
    /// Command allocator (D3D-style APIs).
    CommandAllocator = 30 => "command-allocator",
    /// Command queue (D3D-style APIs).
    CommandQueue = 31 => "command-queue",
    /// Acceleration structure.
    AccelerationStructure = 32 => "acceleration-structure",
}

impl HandleCategory {
    /// The category through which this category's dispatch is resolved.
    ///
    /// Device-level objects resolve through their device, devices through
    /// their physical device, physical devices and surfaces through the
    /// instance. The instance has no parent.
    pub fn dispatch_parent(self) -> Option<HandleCategory> {
        use HandleCategory::*;
        match self {
            Instance => None,
            PhysicalDevice | Surface => Some(Instance),
            Device => Some(PhysicalDevice),
            _ => Some(Device),
        }
    }

    /// Whether handles of this category carry their own dispatch (instance,
    /// physical device, device, queue, command buffer).
    pub fn is_dispatchable(self) -> bool {
        use HandleCategory::*;
        matches!(
            self,
            Instance | PhysicalDevice | Device | Queue | CommandBuffer | CommandList | CommandQueue
        )
    }
}

impl fmt::Display for HandleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tags_round_trip() {
        for &cat in HandleCategory::ALL {
            assert_eq!(HandleCategory::from_tag(cat.tag()), Some(cat));
        }
    }

    #[test]
    fn tags_are_unique_and_nonzero() {
        let tags: HashSet<u16> = HandleCategory::ALL.iter().map(|c| c.tag()).collect();
        assert_eq!(tags.len(), HandleCategory::ALL.len());
        assert!(!tags.contains(&0));
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(HandleCategory::from_tag(0), None);
        assert_eq!(HandleCategory::from_tag(0xFFFF), None);
    }

    #[test]
    fn command_buffer_dispatches_through_device() {
        assert_eq!(
            HandleCategory::CommandBuffer.dispatch_parent(),
            Some(HandleCategory::Device)
        );
        assert_eq!(
            HandleCategory::Device.dispatch_parent(),
            Some(HandleCategory::PhysicalDevice)
        );
        assert_eq!(HandleCategory::Instance.dispatch_parent(), None);
    }

    #[test]
    fn every_parent_chain_terminates_at_instance() {
        for &cat in HandleCategory::ALL {
            let mut cur = cat;
            let mut steps = 0;
            while let Some(parent) = cur.dispatch_parent() {
                cur = parent;
                steps += 1;
                assert!(steps < 8, "parent chain of {cat} does not terminate");
            }
            assert_eq!(cur, HandleCategory::Instance);
        }
    }
}
