//! Interpreter module loading and caching.
//!
//! Compiling an interpreter wasm (RustPython, QuickJS) is the expensive
//! part of sandbox startup. The worker pays it once per language and
//! reuses the compiled module for every subsequent run; isolation comes
//! from the per-run store, not from recompilation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use wasmtime::{Engine, Module};

use crate::error::{Result, SandboxError};
use crate::module::Language;

/// A shared wasmtime engine configured for epoch interruption.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<Engine>,
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine")
            .field("engine", &"<wasmtime::Engine>")
            .finish()
    }
}

impl SharedEngine {
    /// Create a new engine. `enable_fuel` turns on instruction metering.
    pub fn new(enable_fuel: bool) -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        config.consume_fuel(enable_fuel);

        let engine = Engine::new(&config)
            .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("{}", e)))?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Get a reference to the underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::ops::Deref for SharedEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// A thread-safe cache of compiled interpreter modules, keyed by language.
#[derive(Debug, Default)]
pub struct InterpreterCache {
    cache: RwLock<HashMap<Language, Arc<Module>>>,
}

impl InterpreterCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached module for a language, compiling it on first use.
    pub fn get_or_compile(
        &self,
        engine: &Engine,
        language: Language,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Module>> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(module) = cache.get(&language) {
                return Ok(Arc::clone(module));
            }
        }

        let path = path.as_ref();
        let wasm_bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterNotFound(path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

        // Compile outside any lock; compilation can take seconds.
        let module = Module::new(engine, &wasm_bytes).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!(
                "failed to compile {} interpreter: {}",
                language,
                e
            ))
        })?;
        let module = Arc::new(module);

        {
            let mut cache = self.cache.write().unwrap();
            // Another thread may have compiled while we were.
            if let Some(existing) = cache.get(&language) {
                return Ok(Arc::clone(existing));
            }
            cache.insert(language, Arc::clone(&module));
        }

        Ok(module)
    }

    /// Check if a language's interpreter is cached.
    pub fn contains(&self, language: Language) -> bool {
        self.cache.read().unwrap().contains_key(&language)
    }

    /// Get the number of cached interpreters.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
