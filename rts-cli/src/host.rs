use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use script::{
    GlobalMutator, GlobalVar, HostError, RequestEdit, RequestMutator, RequestSnapshot, Runtime,
    Value, VarsMutator,
};
use tracing::debug;

/// In-process stand-in for the HTTP client: applies every edit to its own
/// copy of the request and keeps the variable stores, so later evaluations
/// see what earlier ones wrote.
pub struct RecordingHost {
    request: Mutex<Option<RequestSnapshot>>,
    vars: Mutex<BTreeMap<String, Value>>,
    globals: Mutex<BTreeMap<String, GlobalVar>>,
    writes: Mutex<Vec<Write>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Var { name: String, value: Value },
    Global { name: String, value: Value, secret: bool },
    DeleteGlobal(String),
}

impl RecordingHost {
    pub fn new(
        request: Option<RequestSnapshot>,
        vars: BTreeMap<String, Value>,
        globals: BTreeMap<String, GlobalVar>,
    ) -> Arc<Self> {
        Arc::new(Self {
            request: Mutex::new(request),
            vars: Mutex::new(vars),
            globals: Mutex::new(globals),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Fills in the host-owned parts of `runtime` from the current state.
    pub fn bind(self: &Arc<Self>, mut runtime: Runtime) -> Runtime {
        if let Some(snapshot) = self.request.lock().clone() {
            runtime = runtime.with_request(snapshot, Some(self.clone()));
        }
        runtime.vars = self.vars.lock().clone();
        runtime.globals = self.globals.lock().clone();
        runtime.vars_mut = Some(self.clone());
        runtime.global_mut = Some(self.clone());
        runtime
    }

    pub fn request(&self) -> Option<RequestSnapshot> {
        self.request.lock().clone()
    }

    /// Writes recorded since the last call.
    pub fn take_writes(&self) -> Vec<Write> {
        std::mem::take(&mut *self.writes.lock())
    }
}

impl RequestMutator for RecordingHost {
    fn apply(&self, edit: &RequestEdit) -> Result<(), HostError> {
        let mut request = self.request.lock();
        let snapshot = request
            .as_mut()
            .ok_or_else(|| HostError::new("no request is being sent"))?;
        snapshot
            .apply(edit)
            .map_err(|err| HostError::new(err.kind.to_string()))?;
        debug!("request edit applied edit={edit:?}");
        Ok(())
    }
}

impl VarsMutator for RecordingHost {
    fn set_var(&self, name: &str, value: &Value) -> Result<(), HostError> {
        self.vars.lock().insert(name.to_string(), value.clone());
        self.writes.lock().push(Write::Var {
            name: name.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

impl GlobalMutator for RecordingHost {
    fn set_global(&self, name: &str, value: &Value, secret: bool) -> Result<(), HostError> {
        let global = if secret {
            GlobalVar::secret(value.clone())
        } else {
            GlobalVar::new(value.clone())
        };
        self.globals.lock().insert(name.to_string(), global);
        self.writes.lock().push(Write::Global {
            name: name.to_string(),
            value: value.clone(),
            secret,
        });
        Ok(())
    }

    fn delete_global(&self, name: &str) -> Result<(), HostError> {
        self.globals
            .lock()
            .retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        self.writes.lock().push(Write::DeleteGlobal(name.to_string()));
        Ok(())
    }
}
