use monalisa_format::{default_environment, MemoryLayout};

/// Guest linear memory size in 64 KiB pages. The memory never grows.
pub const MEMORY_PAGES: u32 = 256;

/// Last argument of the guest's license setter.
pub const LICENSE_SENTINEL: &str = "0";

/// Configuration for one guest session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Linear memory size in pages (minimum and maximum).
    pub memory_pages: u32,
    /// Fixed addresses inside guest memory.
    pub layout: MemoryLayout,
    /// Sentinel string passed as the license setter's last argument.
    pub license_sentinel: String,
    /// Environment strings exposed through `environ_get`.
    pub environment: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory_pages: MEMORY_PAGES,
            layout: MemoryLayout::default(),
            license_sentinel: LICENSE_SENTINEL.to_string(),
            environment: default_environment(),
        }
    }
}

impl SessionConfig {
    /// Set the memory layout.
    pub fn with_layout(mut self, layout: MemoryLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the emulated environment.
    pub fn with_environment(mut self, environment: Vec<String>) -> Self {
        self.environment = environment;
        self
    }

    /// Set the memory size in pages.
    pub fn with_memory_pages(mut self, pages: u32) -> Self {
        self.memory_pages = pages;
        self
    }
}
