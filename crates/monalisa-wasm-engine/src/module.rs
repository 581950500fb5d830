use crate::{Error, Result, SessionConfig};
use monalisa_format::{MemoryLayout, ModuleDescriptor};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wasmtime::{Engine, Module, Store};

struct GuestModuleInner {
    engine: Engine,
    module: Module,
    wasm_path: PathBuf,
    metadata: BTreeMap<String, serde_json::Value>,
    layout: Option<MemoryLayout>,
}

/// A compiled guest module.
///
/// Compilation happens once; clones share the compiled code, and every
/// session gets its own [`Store`] from [`GuestModule::create_store`].
#[derive(Clone)]
pub struct GuestModule(Arc<GuestModuleInner>);

impl GuestModule {
    /// Load a module from a descriptor file.
    pub fn load<P: AsRef<Path>>(descriptor_path: P) -> Result<Self> {
        let descriptor_path = descriptor_path.as_ref();
        tracing::debug!("Loading module descriptor: {}", descriptor_path.display());
        let descriptor = ModuleDescriptor::load(descriptor_path)?;
        Self::from_descriptor(descriptor)
    }

    /// Compile the module a descriptor points at.
    pub fn from_descriptor(descriptor: ModuleDescriptor) -> Result<Self> {
        let wasm_bytes = read_wasm(&descriptor.wasm_path)?;
        Self::compile(
            &wasm_bytes,
            descriptor.wasm_path,
            descriptor.metadata,
            descriptor.layout,
        )
    }

    /// Compile a `.wasm` binary or `.wat` text file.
    pub fn from_wasm_path<P: AsRef<Path>>(
        wasm_path: P,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self> {
        let wasm_path = wasm_path.as_ref();
        let wasm_bytes = read_wasm(wasm_path)?;
        Self::compile(&wasm_bytes, wasm_path.to_path_buf(), metadata, None)
    }

    /// Compile an in-memory module (binary or text form).
    pub fn from_bytes(
        wasm_bytes: &[u8],
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self> {
        Self::compile(wasm_bytes, PathBuf::new(), metadata, None)
    }

    fn compile(
        wasm_bytes: &[u8],
        wasm_path: PathBuf,
        metadata: BTreeMap<String, serde_json::Value>,
        layout: Option<MemoryLayout>,
    ) -> Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm_bytes)
            .map_err(|e| Error::Module(format!("Failed to load WASM module: {:#}", e)))?;

        tracing::info!(
            "Compiled guest module ({} bytes, {} imports)",
            wasm_bytes.len(),
            module.imports().len()
        );

        Ok(Self(Arc::new(GuestModuleInner {
            engine,
            module,
            wasm_path,
            metadata,
            layout,
        })))
    }

    /// Descriptor describing this module.
    pub fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            wasm_path: self.0.wasm_path.clone(),
            metadata: self.0.metadata.clone(),
            layout: self.0.layout,
        }
    }

    /// Persist the module's descriptor.
    pub fn save<P: AsRef<Path>>(&self, descriptor_path: P) -> Result<()> {
        if self.0.wasm_path.as_os_str().is_empty() {
            return Err(Error::Module(
                "Failed to save device: module was not loaded from a file".to_string(),
            ));
        }
        self.descriptor()
            .save(descriptor_path)
            .map_err(|e| Error::Module(format!("Failed to save device: {}", e)))
    }

    /// Fresh execution context for one session.
    pub fn create_store<T>(&self, data: T) -> Store<T> {
        Store::new(&self.0.engine, data)
    }

    /// Session configuration matching this module's memory layout.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_layout(self.layout())
    }

    /// Shared engine.
    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    /// Compiled module.
    pub fn module(&self) -> &Module {
        &self.0.module
    }

    /// Path of the guest binary (empty for in-memory modules).
    pub fn wasm_path(&self) -> &Path {
        &self.0.wasm_path
    }

    /// Device metadata.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.0.metadata
    }

    /// Effective memory layout.
    pub fn layout(&self) -> MemoryLayout {
        self.0.layout.unwrap_or_default()
    }
}

impl fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestModule(wasm_path='{}')", self.0.wasm_path.display())
    }
}

fn read_wasm(wasm_path: &Path) -> Result<Vec<u8>> {
    if !wasm_path.is_file() {
        return Err(Error::Module(format!(
            "WASM file not found: {}",
            wasm_path.display()
        )));
    }
    std::fs::read(wasm_path).map_err(|e| {
        Error::Module(format!(
            "Failed to read WASM file {}: {}",
            wasm_path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCategory;
    use tempfile::TempDir;

    #[test]
    fn missing_binary_is_a_module_error() {
        let temp = TempDir::new().unwrap();
        let err = GuestModule::from_wasm_path(temp.path().join("absent.wasm"), BTreeMap::new())
            .expect_err("file does not exist");
        assert_eq!(err.category(), ErrorCategory::Module);
        assert!(err.to_string().contains("WASM file not found"));
    }

    #[test]
    fn garbage_bytes_fail_to_compile() {
        let err = GuestModule::from_bytes(b"\0asm\x02garbage", BTreeMap::new())
            .expect_err("invalid module");
        assert_eq!(err.category(), ErrorCategory::Module);
        assert!(err.to_string().starts_with("Failed to load WASM module"));
    }

    #[test]
    fn in_memory_module_cannot_be_saved() {
        let module = GuestModule::from_bytes(b"(module)", BTreeMap::new()).unwrap();
        let temp = TempDir::new().unwrap();
        let err = module.save(temp.path().join("device.mld")).expect_err("no path");
        assert_eq!(err.category(), ErrorCategory::Module);
    }

    #[test]
    fn stores_are_independent() {
        let module = GuestModule::from_bytes(b"(module)", BTreeMap::new()).unwrap();
        let first = module.create_store(1u32);
        let second = module.create_store(2u32);
        assert_eq!(*first.data(), 1);
        assert_eq!(*second.data(), 2);
    }
}
