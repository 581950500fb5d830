use crate::host::{HostImports, HostState};
use crate::memory::MemoryView;
use crate::{Error, GuestModule, Result, SessionConfig};
use monalisa_format::{derive_key_id, Key, KeyType, License, MemoryLayout};
use wasmtime::{
    Func, Instance, Memory, MemoryType, Store, TypedFunc, Val, WasmParams, WasmResults,
};

/// Export names of the minified guest build.
pub mod exports {
    /// `___wasm_call_ctors`
    pub const CALL_CTORS: &str = "s";
    /// `_monalisa_context_alloc`
    pub const CONTEXT_ALLOC: &str = "D";
    /// `monalisa_set_license`
    pub const SET_LICENSE: &str = "F";
    /// `_monalisa_set_canvas_id`
    pub const SET_CANVAS_ID: &str = "t";
    /// `_monalisa_version_get`
    pub const VERSION_GET: &str = "A";
    /// `monalisa_get_line_number`
    pub const GET_LINE_NUMBER: &str = "v";
    /// `stackAlloc`
    pub const STACK_ALLOC: &str = "N";
    /// `stackSave`
    pub const STACK_SAVE: &str = "L";
    /// `stackRestore`
    pub const STACK_RESTORE: &str = "M";
}

/// Lifecycle state of a [`GuestSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created or cleaned up; guest not instantiated.
    Uninitialized,
    /// Guest instantiated and its context allocated.
    Initialized,
    /// Initialization failed. Terminal.
    Closed,
}

/// One argument of a guest call.
#[derive(Debug, Clone, Copy)]
pub enum GuestArg<'a> {
    /// Passed through unchanged.
    Int(i32),
    /// Copied to the guest stack as NUL-terminated UTF-8.
    Str(&'a str),
    /// Copied to the guest stack verbatim.
    Bytes(&'a [u8]),
}

/// How to interpret a guest return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Raw integer.
    Int,
    /// Non-zero is true.
    Bool,
    /// Address of a NUL-terminated UTF-8 string.
    String,
}

/// Decoded guest return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestValue {
    /// Integer result.
    Int(i32),
    /// Boolean result.
    Bool(bool),
    /// String result.
    String(String),
}

impl GuestValue {
    /// Integer view of the value (strings are 0).
    pub fn as_int(&self) -> i32 {
        match self {
            GuestValue::Int(value) => *value,
            GuestValue::Bool(value) => i32::from(*value),
            GuestValue::String(_) => 0,
        }
    }

    /// String view of the value (non-strings are empty).
    pub fn into_string(self) -> String {
        match self {
            GuestValue::String(value) => value,
            _ => String::new(),
        }
    }
}

/// Guest entry points, resolved once at instantiation.
struct GuestExports {
    call_ctors: TypedFunc<(), ()>,
    context_alloc: TypedFunc<(), i32>,
    set_license: TypedFunc<(i32, i32, i32, i32), i32>,
    set_canvas_id: TypedFunc<(i32, i32), i32>,
    version_get: TypedFunc<(), i32>,
    get_line_number: TypedFunc<(), i32>,
    stack_alloc: TypedFunc<i32, i32>,
    stack_save: TypedFunc<(), i32>,
    stack_restore: TypedFunc<i32, ()>,
}

impl GuestExports {
    fn resolve(instance: &Instance, store: &mut Store<HostState>) -> Result<Self> {
        Ok(Self {
            call_ctors: typed_export(instance, store, exports::CALL_CTORS)?,
            context_alloc: typed_export(instance, store, exports::CONTEXT_ALLOC)?,
            set_license: typed_export(instance, store, exports::SET_LICENSE)?,
            set_canvas_id: typed_export(instance, store, exports::SET_CANVAS_ID)?,
            version_get: typed_export(instance, store, exports::VERSION_GET)?,
            get_line_number: typed_export(instance, store, exports::GET_LINE_NUMBER)?,
            stack_alloc: typed_export(instance, store, exports::STACK_ALLOC)?,
            stack_save: typed_export(instance, store, exports::STACK_SAVE)?,
            stack_restore: typed_export(instance, store, exports::STACK_RESTORE)?,
        })
    }
}

fn typed_export<P: WasmParams, R: WasmResults>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<P, R>> {
    let func = instance
        .get_func(&mut *store, name)
        .ok_or_else(|| Error::Session(format!("Missing guest export '{}'", name)))?;
    func.typed::<P, R>(&*store)
        .map_err(|e| Error::session(&format!("Invalid guest export '{}'", name), e))
}

/// A guest instance that finished initialization.
struct LiveInstance {
    instance: Instance,
    memory: Memory,
    exports: GuestExports,
    context: i32,
}

impl LiveInstance {
    /// Call a guest function using the guest's stack-based calling convention.
    ///
    /// String and byte arguments are copied into scratch space taken from the
    /// guest stack; the stack pointer is restored after the call, releasing
    /// every scratch allocation at once.
    fn ccall(
        &self,
        store: &mut Store<HostState>,
        func: &Func,
        args: &[GuestArg<'_>],
        kind: ReturnKind,
    ) -> wasmtime::Result<GuestValue> {
        let needs_stack = args.iter().any(|arg| !matches!(arg, GuestArg::Int(_)));
        let stack = if needs_stack {
            Some(self.exports.stack_save.call(&mut *store, ())?)
        } else {
            None
        };

        let outcome = self.marshal_and_call(store, func, args);
        let restored = match stack {
            Some(stack) => self.exports.stack_restore.call(&mut *store, stack),
            None => Ok(()),
        };
        let raw = outcome?;
        restored?;

        Ok(match kind {
            ReturnKind::Int => GuestValue::Int(raw),
            ReturnKind::Bool => GuestValue::Bool(raw != 0),
            ReturnKind::String => {
                let view = MemoryView::new(self.memory.data_mut(&mut *store));
                GuestValue::String(view.read_cstr(raw as u32 as usize))
            }
        })
    }

    fn marshal_and_call(
        &self,
        store: &mut Store<HostState>,
        func: &Func,
        args: &[GuestArg<'_>],
    ) -> wasmtime::Result<i32> {
        let mut params = Vec::with_capacity(args.len());
        for arg in args {
            let value = match *arg {
                GuestArg::Int(value) => value,
                GuestArg::Str(text) => {
                    // worst-case UTF-8 expansion plus terminator
                    let max_len = (text.chars().count() << 2) + 1;
                    let ptr = self.exports.stack_alloc.call(&mut *store, max_len as i32)?;
                    let mut view = MemoryView::new(self.memory.data_mut(&mut *store));
                    view.write_cstr(ptr as u32 as usize, text, max_len)?;
                    ptr
                }
                GuestArg::Bytes(bytes) => {
                    let ptr = self.exports.stack_alloc.call(&mut *store, bytes.len() as i32)?;
                    let mut view = MemoryView::new(self.memory.data_mut(&mut *store));
                    view.write_bytes(ptr as u32 as usize, bytes)?;
                    ptr
                }
            };
            params.push(Val::I32(value));
        }

        let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];
        func.call(&mut *store, &params, &mut results)?;
        Ok(results.first().and_then(Val::i32).unwrap_or(0))
    }
}

/// Read the key the guest deposits after a successful license submission.
pub fn read_license_key(view: &MemoryView<'_>, layout: &MemoryLayout) -> Result<Vec<u8>> {
    view.read_bytes(
        layout.license_key_offset as usize,
        layout.license_key_length as usize,
    )
    .map(<[u8]>::to_vec)
    .map_err(|e| Error::License(format!("License key offset beyond memory bounds: {}", e)))
}

/// A session with one guest instance.
///
/// The session exclusively owns its [`Store`], so nothing is shared with other
/// sessions. Calls on one session must be serialized by the caller.
pub struct GuestSession {
    id: String,
    module: GuestModule,
    config: SessionConfig,
    store: Store<HostState>,
    live: Option<LiveInstance>,
    state: SessionState,
    keys: Vec<Key>,
}

impl GuestSession {
    /// Create an uninitialized session.
    pub fn new(id: impl Into<String>, module: &GuestModule, config: SessionConfig) -> Self {
        let store = module.create_store(HostState::new(config.environment.clone()));
        Self {
            id: id.into(),
            module: module.clone(),
            config,
            store,
            live: None,
            state: SessionState::Uninitialized,
            keys: Vec::new(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Opaque guest context returned by the context allocator.
    pub fn context(&self) -> Option<i32> {
        self.live.as_ref().map(|live| live.context)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Instantiate the guest and allocate its context.
    ///
    /// A no-op when already initialized. A failure closes the session for
    /// good: it has to be discarded, not retried.
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Initialized => return Ok(()),
            SessionState::Closed => {
                return Err(Error::Session(format!("Session {} is closed", self.id)));
            }
            SessionState::Uninitialized => {}
        }

        match self.instantiate() {
            Ok(live) => {
                tracing::debug!("Session {} initialized (context {:#x})", self.id, live.context);
                self.live = Some(live);
                self.state = SessionState::Initialized;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Session {} failed to initialize: {}", self.id, e);
                self.release();
                self.state = SessionState::Closed;
                Err(Error::Session(format!("Failed to initialize session: {}", e)))
            }
        }
    }

    fn instantiate(&mut self) -> Result<LiveInstance> {
        let pages = self.config.memory_pages;
        let memory = Memory::new(&mut self.store, MemoryType::new(pages, Some(pages)))
            .map_err(|e| Error::session("Failed to allocate guest memory", e))?;

        let layout = self.config.layout;
        MemoryView::new(memory.data_mut(&mut self.store))
            .write_i32(layout.dynamictop_ptr as usize, layout.dynamic_base as i32)
            .map_err(|e| Error::Session(format!("Failed to seed dynamic top: {}", e)))?;
        self.store.data_mut().memory = Some(memory);

        let instance = HostImports::instantiate(&mut self.store, self.module.module())?;
        let exports = GuestExports::resolve(&instance, &mut self.store)?;

        exports
            .call_ctors
            .call(&mut self.store, ())
            .map_err(|e| Error::session("Guest constructors failed", e))?;
        let context = exports
            .context_alloc
            .call(&mut self.store, ())
            .map_err(|e| Error::session("Guest context allocation failed", e))?;

        Ok(LiveInstance {
            instance,
            memory,
            exports,
            context,
        })
    }

    fn live(&self) -> Result<&LiveInstance> {
        self.live
            .as_ref()
            .ok_or_else(|| Error::Session(format!("Session {} is not initialized", self.id)))
    }

    /// Call a guest export through the calling convention.
    fn call(
        &mut self,
        select: fn(&GuestExports) -> &Func,
        args: &[GuestArg<'_>],
        kind: ReturnKind,
    ) -> Result<GuestValue> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| Error::Session(format!("Session {} is not initialized", self.id)))?;
        live.ccall(&mut self.store, select(&live.exports), args, kind)
            .map_err(|e| Error::session("Guest call failed", e))
    }

    /// Submit a license and record the key it yields.
    ///
    /// On any failure no key is recorded.
    pub fn parse_license(&mut self, license: &License) -> Result<()> {
        match self.submit_license(license) {
            Ok(key) => {
                tracing::debug!("Session {} extracted key {}", self.id, key.kid);
                self.keys.push(key);
                Ok(())
            }
            Err(e @ (Error::License(_) | Error::LicenseRejected { .. })) => Err(e),
            Err(e) => Err(Error::License(format!("Failed to parse license: {}", e))),
        }
    }

    fn submit_license(&mut self, license: &License) -> Result<Key> {
        let context = self.live()?.context;
        let b64 = license.b64();
        let sentinel = self.config.license_sentinel.clone();

        let code = self
            .call(
                |exports| exports.set_license.func(),
                &[
                    GuestArg::Int(context),
                    GuestArg::Str(b64),
                    GuestArg::Int(b64.len() as i32),
                    GuestArg::Str(&sentinel),
                ],
                ReturnKind::Int,
            )?
            .as_int();

        if code != 0 {
            tracing::warn!("Session {}: guest rejected license with code {}", self.id, code);
            return Err(Error::LicenseRejected { code });
        }

        let memory = self.live()?.memory;
        let view = MemoryView::new(memory.data_mut(&mut self.store));
        let key = read_license_key(&view, &self.config.layout)?;

        // only content keys are produced by the known guest builds
        Ok(Key::new(derive_key_id(license.raw()), key, KeyType::Content))
    }

    /// Keys recorded so far, optionally filtered by type.
    pub fn get_keys(&self, key_type: Option<KeyType>) -> Vec<Key> {
        match key_type {
            Some(key_type) => self
                .keys
                .iter()
                .filter(|key| key.key_type == key_type)
                .cloned()
                .collect(),
            None => self.keys.clone(),
        }
    }

    /// Guest version string.
    pub fn version(&mut self) -> Result<String> {
        Ok(self
            .call(|exports| exports.version_get.func(), &[], ReturnKind::String)?
            .into_string())
    }

    /// Guest line-number diagnostic.
    pub fn line_number(&mut self) -> Result<i32> {
        Ok(self
            .call(|exports| exports.get_line_number.func(), &[], ReturnKind::Int)?
            .as_int())
    }

    /// Pass a canvas identifier to the guest context. Returns the guest's code.
    pub fn set_canvas_id(&mut self, canvas_id: &str) -> Result<i32> {
        let context = self.live()?.context;
        Ok(self
            .call(
                |exports| exports.set_canvas_id.func(),
                &[GuestArg::Int(context), GuestArg::Str(canvas_id)],
                ReturnKind::Int,
            )?
            .as_int())
    }

    /// Call an arbitrary resolved entry point with marshaled arguments.
    pub fn call_export(
        &mut self,
        name: &str,
        args: &[GuestArg<'_>],
        kind: ReturnKind,
    ) -> Result<GuestValue> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| Error::Session(format!("Session {} is not initialized", self.id)))?;
        let func = live
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| Error::Session(format!("Missing guest export '{}'", name)))?;
        live.ccall(&mut self.store, &func, args, kind)
            .map_err(|e| Error::session(&format!("Guest call '{}' failed", name), e))
    }

    /// Drop the guest instance, its memory and every recorded key.
    ///
    /// The session goes back to [`SessionState::Uninitialized`] and can be
    /// initialized again. A session closed by a failed initialization stays
    /// closed.
    pub fn cleanup(&mut self) {
        if self.state == SessionState::Initialized {
            tracing::debug!("Session {} cleaned up", self.id);
        }
        self.keys.clear();
        self.release();
        if self.state != SessionState::Closed {
            self.state = SessionState::Uninitialized;
        }
    }

    fn release(&mut self) {
        self.live = None;
        // a fresh store frees the old instance and its linear memory
        self.store = self
            .module
            .create_store(HostState::new(self.config.environment.clone()));
    }
}
