//! Vertex input descriptions
//!
//! Vertex types used with [`super::buffer::VertexBuffer`] describe their own
//! memory layout so pipelines can be built without hand-written attribute
//! tables at every call site.

use ash::vk;

/// A vertex type that knows how it is laid out in a vertex buffer
pub trait VertexLayout: bytemuck::Pod {
    /// Attribute formats and byte offsets, in shader location order
    const ATTRIBUTES: &'static [(vk::Format, u32)];

    /// Binding description for binding `binding`, advancing per vertex
    fn binding_description(binding: u32) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attribute descriptions for binding `binding`, locations numbered from 0
    fn attribute_descriptions(binding: u32) -> Vec<vk::VertexInputAttributeDescription> {
        Self::ATTRIBUTES
            .iter()
            .zip(0u32..)
            .map(|(&(format, offset), location)| vk::VertexInputAttributeDescription {
                location,
                binding,
                format,
                offset,
            })
            .collect()
    }
}

/// Binding and attribute tables for one or more vertex streams
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    /// Buffer bindings
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Attributes across all bindings
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    /// No vertex buffers (vertices generated in the shader)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single interleaved stream of `V` at binding 0
    pub fn of<V: VertexLayout>() -> Self {
        Self {
            bindings: vec![V::binding_description(0)],
            attributes: V::attribute_descriptions(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct TexturedVertex {
        position: [f32; 3],
        uv: [f32; 2],
    }

    impl VertexLayout for TexturedVertex {
        const ATTRIBUTES: &'static [(vk::Format, u32)] =
            &[(vk::Format::R32G32B32_SFLOAT, 0), (vk::Format::R32G32_SFLOAT, 12)];
    }

    #[test]
    fn test_binding_stride() {
        let binding = TexturedVertex::binding_description(0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_locations() {
        let input = VertexInput::of::<TexturedVertex>();
        assert_eq!(input.bindings.len(), 1);
        assert_eq!(input.attributes.len(), 2);
        assert_eq!(input.attributes[1].location, 1);
        assert_eq!(input.attributes[1].offset, 12);
        assert_eq!(input.attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert!(VertexInput::empty().bindings.is_empty());
    }
}
