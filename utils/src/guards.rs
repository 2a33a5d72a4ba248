use std::ffi::OsString;

/// Sets (or removes) an environment variable for the lifetime of the guard, restoring the
/// previous value on drop.
///
/// Environment mutation is process-wide; tests holding one of these should run serially.
pub struct EnvVarGuard {
    name: String,
    previous: Option<OsString>,
}

impl EnvVarGuard {
    pub fn set(name: impl Into<String>, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let name = name.into();
        let previous = std::env::var_os(&name);
        // SAFETY: callers serialize environment access (see type docs).
        unsafe { std::env::set_var(&name, value) };
        Self { name, previous }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        let name = name.into();
        let previous = std::env::var_os(&name);
        // SAFETY: callers serialize environment access (see type docs).
        unsafe { std::env::remove_var(&name) };
        Self { name, previous }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // SAFETY: callers serialize environment access (see type docs).
        unsafe {
            match self.previous.take() {
                Some(v) => std::env::set_var(&self.name, v),
                None => std::env::remove_var(&self.name),
            }
        }
    }
}
