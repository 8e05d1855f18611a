// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Shaders are compiled ahead of time (see
// build.rs) and read from disk by path at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a `.spv` file into 32-bit words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file: {:?}", path))?;
    parse_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

/// Decode raw bytes into aligned SPIR-V words, checking the magic number
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    // read_spv copies into u32 storage, so the input needs no alignment
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .context("SPIR-V length must be a multiple of 4 bytes")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => anyhow::bail!("bad SPIR-V magic number {:#010x}", other),
        None => anyhow::bail!("empty SPIR-V module"),
    }
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe {
        device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Read a `.spv` file and create its module in one step
pub fn load_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let code = read_spirv(path)?;
    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    create_shader_module(device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn accepts_module_with_magic_header() {
        // magic, version 1.0, generator, bound, schema
        let module = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
        let words = parse_spirv(&words_to_bytes(&module)).unwrap();
        assert_eq!(words, module);
    }

    #[test]
    fn accepts_unaligned_input_slice() {
        let module = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
        let mut bytes = vec![0u8];
        bytes.extend(words_to_bytes(&module));
        let words = parse_spirv(&bytes[1..]).unwrap();
        assert_eq!(words, module);
    }

    #[test]
    fn rejects_truncated_word() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_non_spirv_data() {
        let err = parse_spirv(b"#version 450\n\0\0\0").unwrap_err();
        assert!(format!("{err:#}").contains("magic"));
    }

    #[test]
    fn rejects_empty_file() {
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn missing_file_error_names_the_path() {
        let path = Path::new("shaders/definitely-missing.spv");
        let err = read_spirv(path).unwrap_err();
        assert!(format!("{err:#}").contains("definitely-missing.spv"));
    }

    #[test]
    fn reads_module_from_disk() {
        let path = std::env::temp_dir().join(format!("atom3d-shader-{}.spv", std::process::id()));
        std::fs::write(&path, words_to_bytes(&[SPIRV_MAGIC, 0x0001_0300, 0, 1, 0])).unwrap();

        let words = read_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(words.unwrap().len(), 5);
    }
}
