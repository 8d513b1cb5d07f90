//! Registration, discovery and memoized loading of extensions.

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{
    DependencyExtension, DependencyManifest, Extension, ExtensionError, HookContext,
    TestsExtension,
};
use crate::plan::Plan;
use crate::recipe::{ConfigurationError, Recipe};
use crate::scan::SourceMap;

/// Creates an extension, loading anything it needs first through the
/// [`Loader`].
pub type Factory = Box<dyn Fn(&mut Loader<'_>) -> Result<Box<dyn Extension>, ExtensionError>>;

/// Factories keyed by extension name, in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: IndexMap<String, Factory>,
}

impl ExtensionRegistry {
    /// Registry without any factories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the extensions every project gets.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TestsExtension::NAME, |_| Ok(Box::new(TestsExtension)));
        registry
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&mut Loader<'_>) -> Result<Box<dyn Extension>, ExtensionError> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Whether a factory exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Register one dependency extension per `*.yml` manifest in `dir`.
    ///
    /// Manifests are visited in file name order and named after their file
    /// stem. A manifest that does not parse is skipped with a warning. A
    /// missing directory registers nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Read`] when the directory or a manifest
    /// cannot be read.
    pub fn discover(&mut self, dir: &Utf8Path) -> Result<Vec<String>, ExtensionError> {
        let read_error = |at: &Utf8Path| {
            let path = at.to_owned();
            move |source| ExtensionError::Read { path, source }
        };
        if !dir.is_dir() {
            debug!(%dir, "no extension directory");
            return Ok(Vec::new());
        }
        let mut manifests: Vec<Utf8PathBuf> = dir
            .read_dir_utf8()
            .map_err(read_error(dir))?
            .filter_map(Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| path.extension() == Some("yml") && path.is_file())
            .collect();
        manifests.sort();

        let mut discovered = Vec::new();
        for path in manifests {
            let Some(name) = path.file_stem().map(str::to_owned) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(read_error(&path))?;
            match DependencyManifest::parse(&name, &text) {
                Ok(mut manifest) => {
                    manifest.source = Some(path.clone());
                    self.register(name.clone(), move |loader| {
                        for base in &manifest.requires {
                            loader.require(base)?;
                        }
                        Ok(Box::new(DependencyExtension::new(manifest.clone())?))
                    });
                    discovered.push(name);
                }
                Err(err) => warn!(manifest = %path, "skipping extension: {err}"),
            }
        }
        debug!(count = discovered.len(), %dir, "discovered extension manifests");
        Ok(discovered)
    }

    /// Load every registered extension.
    ///
    /// Extensions that fail to load are logged and left out, along with
    /// anything that requires them.
    #[must_use]
    pub fn load_all(&self) -> ExtensionSet {
        let mut loader = Loader::new(self);
        for name in self.factories.keys() {
            if loader.failed.contains(name) {
                continue;
            }
            if let Err(err) = loader.require(name) {
                warn!(extension = %name, "failed to load extension: {err}");
            }
        }
        ExtensionSet {
            extensions: loader.loaded.into_values().collect(),
        }
    }
}

/// Memoizing loader handed to factories.
pub struct Loader<'r> {
    registry: &'r ExtensionRegistry,
    loaded: IndexMap<String, Box<dyn Extension>>,
    loading: Vec<String>,
    failed: BTreeSet<String>,
}

impl<'r> Loader<'r> {
    fn new(registry: &'r ExtensionRegistry) -> Self {
        Self {
            registry,
            loaded: IndexMap::new(),
            loading: Vec::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Load `name` unless it is already loaded.
    ///
    /// An extension loaded through this call runs its hooks before the
    /// extension whose factory requested it.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Unknown`] for unregistered names,
    /// [`ConfigurationError::ExtensionCycle`] when `name` is already being
    /// loaded further up the chain, [`ExtensionError::Unavailable`] when it
    /// failed before, or whatever its factory returned.
    pub fn require(&mut self, name: &str) -> Result<(), ExtensionError> {
        if self.loaded.contains_key(name) {
            return Ok(());
        }
        if self.loading.iter().any(|pending| pending == name) {
            let mut chain = self.loading.clone();
            chain.push(name.to_owned());
            return Err(ConfigurationError::ExtensionCycle { chain }.into());
        }
        if self.failed.contains(name) {
            return Err(ExtensionError::Unavailable {
                name: name.to_owned(),
            });
        }
        let registry = self.registry;
        let factory = registry
            .factories
            .get(name)
            .ok_or_else(|| ExtensionError::Unknown {
                name: name.to_owned(),
            })?;

        self.loading.push(name.to_owned());
        let result = factory(self);
        self.loading.pop();
        match result {
            Ok(extension) => {
                debug!(extension = %name, "loaded extension");
                self.loaded.insert(name.to_owned(), extension);
                Ok(())
            }
            Err(err) => {
                self.failed.insert(name.to_owned());
                Err(err)
            }
        }
    }

    /// Whether `name` finished loading.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }
}

/// Loaded extensions in hook order.
#[derive(Default)]
pub struct ExtensionSet {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionSet {
    /// Names in hook order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|extension| extension.name())
    }

    /// Number of loaded extensions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether nothing was loaded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    fn each<F>(&mut self, hook: &str, mut f: F)
    where
        F: FnMut(&mut dyn Extension) -> anyhow::Result<()>,
    {
        for extension in &mut self.extensions {
            if let Err(err) = f(extension.as_mut()) {
                warn!(extension = extension.name(), hook, "extension hook failed: {err:#}");
            }
        }
    }

    /// Run every `hook_recipe`.
    pub fn run_recipe(&mut self, ctx: &mut HookContext<'_>, recipe: &mut Recipe) {
        self.each("hook_recipe", |extension| extension.hook_recipe(ctx, recipe));
    }

    /// Run every `hook_srcs`.
    pub fn run_srcs(
        &mut self,
        ctx: &mut HookContext<'_>,
        files: &mut SourceMap,
        recipe: &mut Recipe,
    ) {
        self.each("hook_srcs", |extension| extension.hook_srcs(ctx, files, recipe));
    }

    /// Run every `hook_plan`.
    pub fn run_plan(
        &mut self,
        ctx: &mut HookContext<'_>,
        files: &SourceMap,
        plan: &mut Plan,
        recipe: &mut Recipe,
    ) {
        self.each("hook_plan", |extension| {
            extension.hook_plan(ctx, files, plan, recipe)
        });
    }

    /// Run every `hook_final`.
    pub fn run_final(
        &mut self,
        ctx: &mut HookContext<'_>,
        files: &SourceMap,
        plan: &Plan,
        recipe: &mut Recipe,
    ) {
        self.each("hook_final", |extension| {
            extension.hook_final(ctx, files, plan, recipe)
        });
    }
}
