use crate::memory::MemoryView;
use crate::{Error, Result};
use anyhow::anyhow;
use wasmtime::{Caller, Extern, Func, Instance, Memory, Module, Store};

/// Host imports in the order the guest declares them. The guest's import
/// names are minified, so linking is positional.
pub const HOST_IMPORTS: [&str; 19] = [
    "__sys_fcntl64",
    "fd_write",
    "fd_close",
    "__sys_ioctl",
    "__sys_open",
    "__sys_rmdir",
    "__sys_unlink",
    "clock",
    "time",
    "emscripten_run_script",
    "fd_seek",
    "emscripten_memcpy_big",
    "emscripten_resize_heap",
    "environ_get",
    "environ_sizes_get",
    "fd_read",
    "emscripten_run_script_string",
    "emscripten_run_script_int",
    "memory",
];

/// State shared between host callbacks and the guest.
///
/// This is the store data of every session: the only things callbacks can
/// reach are the session's own memory and its emulated environment.
pub struct HostState {
    /// Guest linear memory, attached before instantiation.
    pub memory: Option<Memory>,
    /// Emulated environment strings (`KEY=value`).
    pub environment: Vec<String>,
}

impl HostState {
    /// Create a new `HostState` with no memory attached.
    pub fn new(environment: Vec<String>) -> Self {
        Self {
            memory: None,
            environment,
        }
    }

    /// Number of environment strings and total bytes needed to hold them
    /// with their NUL terminators.
    pub fn environment_sizes(&self) -> (usize, usize) {
        let buf_size = self.environment.iter().map(|entry| entry.len() + 1).sum();
        (self.environment.len(), buf_size)
    }
}

/// Builder for the import table one guest instance links against.
pub struct HostImports;

impl HostImports {
    /// Build every import, positionally, for a store whose memory is attached.
    pub fn build(store: &mut Store<HostState>) -> Result<Vec<Extern>> {
        let memory = store
            .data()
            .memory
            .ok_or_else(|| Error::Session("guest memory not allocated".to_string()))?;

        let mut imports: Vec<Extern> = Vec::with_capacity(HOST_IMPORTS.len());

        // __sys_fcntl64
        imports.push(Func::wrap(&mut *store, |_: i32, _: i32, _: i32| -> i32 { 0 }).into());
        // fd_write
        imports.push(Func::wrap(&mut *store, |_: i32, _: i32, _: i32, _: i32| -> i32 { 0 }).into());
        // fd_close
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // __sys_ioctl
        imports.push(Func::wrap(&mut *store, |_: i32, _: i32, _: i32| -> i32 { 0 }).into());
        // __sys_open
        imports.push(Func::wrap(&mut *store, |_: i32, _: i32, _: i32| -> i32 { 0 }).into());
        // __sys_rmdir
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // __sys_unlink
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // clock
        imports.push(Func::wrap(&mut *store, || -> i32 { 0 }).into());
        // time
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // emscripten_run_script
        imports.push(Func::wrap(&mut *store, |_: i32| {}).into());
        // fd_seek
        imports.push(
            Func::wrap(&mut *store, |_: i32, _: i32, _: i32, _: i32, _: i32| -> i32 { 0 }).into(),
        );
        // emscripten_memcpy_big
        imports.push(
            Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, HostState>, dest: i32, src: i32, num: i32| {
                    Self::memcpy_big(&mut caller, dest, src, num)
                },
            )
            .into(),
        );
        // emscripten_resize_heap: memory size is fixed
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // environ_get
        imports.push(
            Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, HostState>, environ_ptr: i32, environ_buf: i32| {
                    Self::environ_get(&mut caller, environ_ptr, environ_buf)
                },
            )
            .into(),
        );
        // environ_sizes_get
        imports.push(
            Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, HostState>, count_ptr: i32, buf_size_ptr: i32| {
                    Self::environ_sizes_get(&mut caller, count_ptr, buf_size_ptr)
                },
            )
            .into(),
        );
        // fd_read
        imports.push(Func::wrap(&mut *store, |_: i32, _: i32, _: i32, _: i32| -> i32 { 0 }).into());
        // emscripten_run_script_string
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 0 }).into());
        // emscripten_run_script_int
        imports.push(Func::wrap(&mut *store, |_: i32| -> i32 { 1 }).into());
        // memory
        imports.push(memory.into());

        Ok(imports)
    }

    /// Build the import table and instantiate `module` in `store`.
    pub fn instantiate(store: &mut Store<HostState>, module: &Module) -> Result<Instance> {
        let expected = module.imports().len();
        if expected != HOST_IMPORTS.len() {
            return Err(Error::Session(format!(
                "guest module declares {} imports, host provides {}",
                expected,
                HOST_IMPORTS.len()
            )));
        }

        for (import, host_name) in module.imports().zip(HOST_IMPORTS) {
            tracing::trace!("{}.{} <- {}", import.module(), import.name(), host_name);
        }

        let imports = Self::build(store)?;
        Instance::new(&mut *store, module, &imports)
            .map_err(|e| Error::session("Failed to instantiate guest module", e))
    }

    fn memory_view<'a>(caller: &'a mut Caller<'_, HostState>) -> wasmtime::Result<MemoryView<'a>> {
        let memory = caller
            .data()
            .memory
            .ok_or_else(|| anyhow!("guest memory not attached"))?;
        Ok(MemoryView::new(memory.data_mut(caller)))
    }

    /// Copy within guest memory, clamped to its bounds. Returns `dest`.
    fn memcpy_big(
        caller: &mut Caller<'_, HostState>,
        dest: i32,
        src: i32,
        num: i32,
    ) -> wasmtime::Result<i32> {
        let mut view = Self::memory_view(caller)?;
        view.copy_within_clamped(dest as u32 as usize, src as u32 as usize, num as u32 as usize);
        Ok(dest)
    }

    /// Write the pointer array and the NUL-terminated environment strings.
    fn environ_get(
        caller: &mut Caller<'_, HostState>,
        environ_ptr: i32,
        environ_buf: i32,
    ) -> wasmtime::Result<i32> {
        let environment = caller.data().environment.clone();
        let mut view = Self::memory_view(caller)?;

        let environ_ptr = environ_ptr as u32 as usize;
        let mut offset = environ_buf as u32 as usize;
        for (index, entry) in environment.iter().enumerate() {
            view.write_i32(environ_ptr + index * 4, offset as i32)?;
            view.write_cstr(offset, entry, entry.len() + 1)?;
            offset += entry.len() + 1;
        }
        Ok(0)
    }

    /// Write the environment count and buffer size.
    fn environ_sizes_get(
        caller: &mut Caller<'_, HostState>,
        count_ptr: i32,
        buf_size_ptr: i32,
    ) -> wasmtime::Result<i32> {
        let (count, buf_size) = caller.data().environment_sizes();
        let mut view = Self::memory_view(caller)?;
        view.write_i32(count_ptr as u32 as usize, count as i32)?;
        view.write_i32(buf_size_ptr as u32 as usize, buf_size as i32)?;
        Ok(0)
    }
}
