use monalisa_format::{Key, KeyType, License};
use monalisa_wasm_engine::{Error, GuestModule, GuestSession, Result, SessionConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Shared handle to one registered session.
pub type SessionHandle = Arc<Mutex<GuestSession>>;

/// Registry of guest sessions sharing one compiled module.
///
/// Every session gets its own store and memory; only the compiled module is
/// shared. The registry lock is never held across a guest call, so sessions
/// can be driven from different threads at once.
pub struct Cdm {
    module: GuestModule,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Cdm {
    /// Load the guest described by `descriptor_path` and build a registry for it.
    pub fn new<P: AsRef<Path>>(descriptor_path: P) -> Result<Self> {
        let module = GuestModule::load(descriptor_path)?;
        Ok(Self::from_module(module))
    }

    /// Build a registry over an already compiled module.
    pub fn from_module(module: GuestModule) -> Self {
        let config = module.session_config();
        Self {
            module,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the configuration new sessions are opened with.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// The shared compiled module.
    pub fn module(&self) -> &GuestModule {
        &self.module
    }

    /// Open and initialize a new session, returning its identifier.
    ///
    /// A session that fails to initialize is never registered.
    pub fn open(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let mut session = GuestSession::new(session_id.clone(), &self.module, self.config.clone());
        session.initialize()?;

        self.registry()
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        tracing::info!("Opened session {}", session_id);
        Ok(session_id)
    }

    /// Close a session and release its guest state. Unknown ids are ignored.
    pub fn close(&self, session_id: &str) {
        let removed = self.registry().remove(session_id);
        if let Some(handle) = removed {
            lock_session(&handle).cleanup();
            tracing::info!("Closed session {}", session_id);
        }
    }

    /// Look up a registered session.
    pub fn get_session(&self, session_id: &str) -> Result<SessionHandle> {
        self.registry()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Session(format!("Session not found: {}", session_id)))
    }

    /// Build the license value for `ticket`. The session only has to exist;
    /// no guest call is made.
    pub fn get_license_challenge(&self, session_id: &str, ticket: &str) -> Result<License> {
        self.get_session(session_id)?;
        Ok(License::from_text(ticket))
    }

    /// Submit a license to a session's guest and record the key it yields.
    pub fn parse_license(&self, session_id: &str, license: impl Into<License>) -> Result<()> {
        let handle = self.get_session(session_id)?;
        let license = license.into();
        let mut session = lock_session(&handle);
        session.parse_license(&license)
    }

    /// Keys recorded by a session, optionally filtered by type.
    pub fn get_keys(&self, session_id: &str, key_type: Option<KeyType>) -> Result<Vec<Key>> {
        let handle = self.get_session(session_id)?;
        let session = lock_session(&handle);
        Ok(session.get_keys(key_type))
    }

    /// Identifiers of all open sessions, in no particular order.
    pub fn session_ids(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Cdm {
    fn drop(&mut self) {
        let sessions = self
            .sessions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (session_id, handle) in sessions.drain() {
            lock_session(&handle).cleanup();
            tracing::debug!("Released session {} on shutdown", session_id);
        }
    }
}

fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, GuestSession> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open a session, submit `license`, collect the keys of `key_type` and close
/// the session again, whether or not the license was accepted.
pub fn extract_keys(
    cdm: &Cdm,
    license: impl Into<License>,
    key_type: Option<KeyType>,
) -> Result<Vec<Key>> {
    let session_id = cdm.open()?;
    let result = cdm
        .parse_license(&session_id, license)
        .and_then(|()| cdm.get_keys(&session_id, key_type));
    cdm.close(&session_id);
    result
}
