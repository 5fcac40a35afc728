// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. The blobs are opaque to the
// engine: they are read from disk, checked for the SPIR-V magic and handed to
// the driver together with an entry-point name.

use ash::vk;
use std::ffi::CString;
use std::io::Cursor;
use std::path::Path;

use crate::config::ShaderConfig;
use crate::error::{FrameError, FrameResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Raw vertex and fragment bytecode plus the entry point both stages use.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
    pub entry_point: CString,
}

impl ShaderSource {
    pub fn from_bytes(vertex: Vec<u8>, fragment: Vec<u8>, entry_point: &str) -> FrameResult<Self> {
        let entry_point = CString::new(entry_point).map_err(|_| {
            FrameError::ModuleCreation(format!("entry point {:?} contains NUL", entry_point))
        })?;

        Ok(Self {
            vertex,
            fragment,
            entry_point,
        })
    }

    /// Read both stages from the paths in the config
    pub fn load(config: &ShaderConfig) -> FrameResult<Self> {
        let vertex = read_blob(&config.vertex)?;
        let fragment = read_blob(&config.fragment)?;
        log::info!(
            "Loaded shaders: {} ({} bytes), {} ({} bytes)",
            config.vertex,
            vertex.len(),
            config.fragment,
            fragment.len()
        );
        Self::from_bytes(vertex, fragment, &config.entry_point)
    }
}

fn read_blob(path: impl AsRef<Path>) -> FrameResult<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        FrameError::ModuleCreation(format!(
            "failed to read {:?}: {} (compile the GLSL sources with glslc first)",
            path, e
        ))
    })
}

/// Turn a byte blob into aligned SPIR-V words
pub fn decode_spirv(code: &[u8]) -> FrameResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(code))
        .map_err(|e| FrameError::ModuleCreation(format!("invalid SPIR-V: {}", e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(FrameError::ModuleCreation(format!(
            "bad SPIR-V magic {:#010x}",
            other
        ))),
        None => Err(FrameError::ModuleCreation("empty SPIR-V blob".to_string())),
    }
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> FrameResult<vk::ShaderModule> {
    let words = decode_spirv(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(|e| FrameError::ModuleCreation(format!("vkCreateShaderModule: {}", e)))
}

/// Vertex + fragment modules, alive for as long as pipelines may be rebuilt.
pub struct ShaderModules {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub entry_point: CString,
}

impl ShaderModules {
    pub fn new(device: &ash::Device, source: &ShaderSource) -> FrameResult<Self> {
        let vertex = create_shader_module(device, &source.vertex)?;
        let fragment = match create_shader_module(device, &source.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        Ok(Self {
            vertex,
            fragment,
            entry_point: source.entry_point.clone(),
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_shader_module(self.vertex, None);
            device.destroy_shader_module(self.fragment, None);
        }
    }
}
