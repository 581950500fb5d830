use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Address of the guest's dynamic-top bookkeeping cell.
pub const DYNAMICTOP_PTR: u32 = 821_968;
/// Value written into the dynamic-top cell before instantiation.
pub const DYNAMIC_BASE: u32 = 6_065_008;
/// Offset where the guest deposits the recovered key.
pub const LICENSE_KEY_OFFSET: u32 = 0x5C_8C0C;
/// Length of the recovered key in bytes.
pub const LICENSE_KEY_LENGTH: u32 = 16;

/// The optional `layout` section of a descriptor.
///
/// Every field falls back to the layout of the known guest build, so a
/// descriptor only needs to list what a newer build moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLayout {
    /// Address of the dynamic-top cell.
    #[serde(default = "default_dynamictop_ptr")]
    pub dynamictop_ptr: u32,
    /// Initial value of the dynamic-top cell.
    #[serde(default = "default_dynamic_base")]
    pub dynamic_base: u32,
    /// Offset of the recovered key.
    #[serde(default = "default_license_key_offset")]
    pub license_key_offset: u32,
    /// Length of the recovered key.
    #[serde(default = "default_license_key_length")]
    pub license_key_length: u32,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            dynamictop_ptr: DYNAMICTOP_PTR,
            dynamic_base: DYNAMIC_BASE,
            license_key_offset: LICENSE_KEY_OFFSET,
            license_key_length: LICENSE_KEY_LENGTH,
        }
    }
}

fn default_dynamictop_ptr() -> u32 {
    DYNAMICTOP_PTR
}

fn default_dynamic_base() -> u32 {
    DYNAMIC_BASE
}

fn default_license_key_offset() -> u32 {
    LICENSE_KEY_OFFSET
}

fn default_license_key_length() -> u32 {
    LICENSE_KEY_LENGTH
}

/// On-disk description of a guest module (`.mld`, `.json` or `.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Path to the guest binary (`.wasm` or `.wat`).
    #[serde(default)]
    pub wasm_path: PathBuf,
    /// Free-form device metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Memory layout overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<MemoryLayout>,
}

/// Serialization syntax of a descriptor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSyntax {
    /// JSON (default for `.mld`, `.json` and unknown extensions).
    Json,
    /// TOML (`.toml`).
    Toml,
}

impl DescriptorSyntax {
    /// Pick the syntax from a file extension.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DescriptorSyntax::Toml,
            _ => DescriptorSyntax::Json,
        }
    }
}

impl ModuleDescriptor {
    /// Create a descriptor for a guest binary.
    pub fn new(wasm_path: impl Into<PathBuf>) -> Self {
        Self {
            wasm_path: wasm_path.into(),
            metadata: BTreeMap::new(),
            layout: None,
        }
    }

    /// Set the device metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the memory layout overrides.
    pub fn with_layout(mut self, layout: MemoryLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Parse a descriptor from bytes in the given syntax.
    pub fn parse(data: &[u8], syntax: DescriptorSyntax) -> Result<Self> {
        let descriptor: Self = match syntax {
            DescriptorSyntax::Json => serde_json::from_slice(data)
                .map_err(|e| Error::InvalidDescriptor(e.to_string()))?,
            DescriptorSyntax::Toml => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| Error::InvalidDescriptor(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(text).map_err(|e| Error::TomlError(e.to_string()))?
            }
        };

        if descriptor.wasm_path.as_os_str().is_empty() {
            return Err(Error::MissingField("wasm_path".to_string()));
        }

        Ok(descriptor)
    }

    /// Read a descriptor file.
    ///
    /// A relative `wasm_path` is resolved against the descriptor's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::DescriptorNotFound(path.to_path_buf()));
        }

        let data = fs::read(path)?;
        let mut descriptor = Self::parse(&data, DescriptorSyntax::for_path(path))?;

        if descriptor.wasm_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            descriptor.wasm_path = base.join(&descriptor.wasm_path);
        }

        Ok(descriptor)
    }

    /// Serialize the descriptor in the given syntax.
    pub fn render(&self, syntax: DescriptorSyntax) -> Result<String> {
        match syntax {
            DescriptorSyntax::Json => Ok(serde_json::to_string_pretty(self)?),
            DescriptorSyntax::Toml => {
                toml::to_string_pretty(self).map_err(|e| Error::TomlError(e.to_string()))
            }
        }
    }

    /// Write the descriptor, choosing the syntax from the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = self.render(DescriptorSyntax::for_path(path))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Effective memory layout.
    pub fn layout(&self) -> MemoryLayout {
        self.layout.unwrap_or_default()
    }
}
