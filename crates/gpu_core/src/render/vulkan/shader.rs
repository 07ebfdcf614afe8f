//! SPIR-V shader modules
//!
//! Shaders are consumed precompiled. A shader program is a set of files that
//! share a stem and differ by stage suffix, e.g. `shaders/mesh.vert.spv` and
//! `shaders/mesh.frag.spv`.

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::context::DeviceContext;
use super::error::{ErrorKind, VkResultExt, VulkanError, VulkanResult};

/// Entry point every stage is compiled with
pub const ENTRY_POINT: &CStr = c"main";

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Tessellation control shader
    TessControl,
    /// Tessellation evaluation shader
    TessEval,
    /// Fragment shader
    Fragment,
    /// Compute shader
    Compute,
}

impl ShaderStage {
    /// All stages, in pipeline order
    pub const ALL: [Self; 5] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEval,
        Self::Fragment,
        Self::Compute,
    ];

    /// File name suffix of a compiled module for this stage
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => ".vert.spv",
            Self::TessControl => ".tesc.spv",
            Self::TessEval => ".tese.spv",
            Self::Fragment => ".frag.spv",
            Self::Compute => ".comp.spv",
        }
    }

    /// Vulkan stage flag
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Path of the module for `stem` in `dir`
    pub fn path_for(self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{stem}{}", self.suffix()))
    }

    /// Stage whose suffix `file_name` carries, if any
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| file_name.ends_with(stage.suffix()))
    }
}

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, checking the magic number and alignment
pub fn decode_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(VulkanError::precondition("SPIR-V module is empty"));
    }
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::precondition(format!("Invalid SPIR-V module: {e}")))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(VulkanError::precondition("SPIR-V magic number missing"));
    }
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule<'ctx> {
    ctx: &'ctx DeviceContext,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl<'ctx> ShaderModule<'ctx> {
    /// Create a module for `stage` from SPIR-V bytes
    pub fn from_bytes(ctx: &'ctx DeviceContext, stage: ShaderStage, bytes: &[u8]) -> VulkanResult<Self> {
        let code = decode_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { ctx.device().create_shader_module(&create_info, None) }.vk_check()?;
        log::debug!("Created {stage:?} shader module ({} words)", code.len());
        Ok(Self { ctx, module, stage })
    }

    /// Load a module from a SPIR-V file
    pub fn from_file(ctx: &'ctx DeviceContext, stage: ShaderStage, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| {
            VulkanError::new(ErrorKind::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        log::debug!("Loaded shader {}", path.display());
        Self::from_bytes(ctx, stage, &bytes)
    }

    /// Raw module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage this module was built for
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_shader_module(self.module, None) };
    }
}

/// Every compiled stage found for one shader stem
pub struct ShaderSet<'ctx> {
    modules: Vec<ShaderModule<'ctx>>,
}

impl<'ctx> ShaderSet<'ctx> {
    /// Load `<dir>/<stem>.<stage>.spv` for every stage present on disk
    pub fn load(ctx: &'ctx DeviceContext, dir: impl AsRef<Path>, stem: &str) -> VulkanResult<Self> {
        let dir = dir.as_ref();
        let stages = existing_stages(dir, stem);
        if stages.is_empty() {
            return Err(VulkanError::new(ErrorKind::Io {
                path: dir.join(stem),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no compiled shader stages for stem"),
            }));
        }

        let modules = stages
            .into_iter()
            .map(|stage| ShaderModule::from_file(ctx, stage, stage.path_for(dir, stem)))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::info!("Shader '{stem}': {:?}", modules.iter().map(ShaderModule::stage).collect::<Vec<_>>());
        Ok(Self { modules })
    }

    /// Module for `stage`, if it was found
    pub fn get(&self, stage: ShaderStage) -> Option<&ShaderModule<'ctx>> {
        self.modules.iter().find(|module| module.stage() == stage)
    }

    /// Whether the set contains a compute stage
    pub fn is_compute(&self) -> bool {
        self.get(ShaderStage::Compute).is_some()
    }

    /// Stage descriptions of the graphics stages, in pipeline order
    pub fn graphics_stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo> {
        self.modules
            .iter()
            .filter(|module| module.stage() != ShaderStage::Compute)
            .map(ShaderModule::stage_info)
            .collect()
    }

    /// Whether the set includes tessellation stages
    pub fn has_tessellation(&self) -> bool {
        self.get(ShaderStage::TessControl).is_some() || self.get(ShaderStage::TessEval).is_some()
    }
}

/// Stages with a module file for `stem` in `dir`, in pipeline order
pub fn existing_stages(dir: &Path, stem: &str) -> Vec<ShaderStage> {
    ShaderStage::ALL
        .into_iter()
        .filter(|stage| stage.path_for(dir, stem).is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_suffixes() {
        assert_eq!(ShaderStage::Vertex.suffix(), ".vert.spv");
        assert_eq!(ShaderStage::TessControl.suffix(), ".tesc.spv");
        assert_eq!(ShaderStage::TessEval.suffix(), ".tese.spv");
        assert_eq!(ShaderStage::Fragment.suffix(), ".frag.spv");
        assert_eq!(ShaderStage::Compute.suffix(), ".comp.spv");

        assert_eq!(ShaderStage::from_file_name("mesh.frag.spv"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_file_name("mesh.frag"), None);
        assert_eq!(
            ShaderStage::Vertex.path_for(Path::new("shaders"), "mesh"),
            Path::new("shaders").join("mesh.vert.spv")
        );
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(ShaderStage::TessEval.flags(), vk::ShaderStageFlags::TESSELLATION_EVALUATION);
        assert_eq!(ShaderStage::Compute.flags(), vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_existing_stages() {
        let dir = std::env::temp_dir().join(format!("gpu_core_shader_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("quad.frag.spv"), [0u8; 4]).unwrap();
        std::fs::write(dir.join("quad.vert.spv"), [0u8; 4]).unwrap();
        std::fs::write(dir.join("other.comp.spv"), [0u8; 4]).unwrap();

        assert_eq!(existing_stages(&dir, "quad"), vec![ShaderStage::Vertex, ShaderStage::Fragment]);
        assert_eq!(existing_stages(&dir, "other"), vec![ShaderStage::Compute]);
        assert!(existing_stages(&dir, "missing").is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_decode_spirv() {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(decode_spirv(&bytes).unwrap(), words);

        words[0] = 0xdead_beef;
        let bad_magic: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert!(decode_spirv(&bad_magic).is_err());

        assert!(matches!(decode_spirv(&[]).unwrap_err().kind(), ErrorKind::Precondition(_)));
        assert!(decode_spirv(&bytes[..7]).is_err());
    }
}
