//! Lazily resolved guest exports.
//!
//! A context never resolves its exports up front. Each [`Export`] is looked up
//! on first use and cached in the context's [`SymbolTable`] for the rest of
//! its lifetime.

use std::collections::HashMap;

use wasmtime::{AsContextMut, Func, Instance, TypedFunc, WasmParams, WasmResults};

use wasm_re2_common::RuntimeError;

/// The guest exports used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Export {
    Malloc,
    Free,
    OptNew,
    OptDelete,
    OptSetLogErrors,
    OptSetLongestMatch,
    OptSetPosixSyntax,
    OptSetCaseSensitive,
    OptSetLatin1Encoding,
    New,
    Delete,
    ErrorCode,
    ErrorArg,
    NumCapturingGroups,
    Match,
    NamedGroupsIterNew,
    NamedGroupsIterNext,
    NamedGroupsIterDelete,
    GlobalReplace,
    /// Reactor initializer; optional.
    Initialize,
    /// Thread-emulation entry on the parent side; optional.
    StartThread,
}

impl Export {
    /// Exports every usable guest must provide.
    pub const REQUIRED: [Self; 19] = [
        Self::Malloc,
        Self::Free,
        Self::OptNew,
        Self::OptDelete,
        Self::OptSetLogErrors,
        Self::OptSetLongestMatch,
        Self::OptSetPosixSyntax,
        Self::OptSetCaseSensitive,
        Self::OptSetLatin1Encoding,
        Self::New,
        Self::Delete,
        Self::ErrorCode,
        Self::ErrorArg,
        Self::NumCapturingGroups,
        Self::Match,
        Self::NamedGroupsIterNew,
        Self::NamedGroupsIterNext,
        Self::NamedGroupsIterDelete,
        Self::GlobalReplace,
    ];

    /// Exported symbol name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Free => "free",
            Self::OptNew => "cre2_opt_new",
            Self::OptDelete => "cre2_opt_delete",
            Self::OptSetLogErrors => "cre2_opt_set_log_errors",
            Self::OptSetLongestMatch => "cre2_opt_set_longest_match",
            Self::OptSetPosixSyntax => "cre2_opt_set_posix_syntax",
            Self::OptSetCaseSensitive => "cre2_opt_set_case_sensitive",
            Self::OptSetLatin1Encoding => "cre2_opt_set_latin1_encoding",
            Self::New => "cre2_new",
            Self::Delete => "cre2_delete",
            Self::ErrorCode => "cre2_error_code",
            Self::ErrorArg => "cre2_error_arg",
            Self::NumCapturingGroups => "cre2_num_capturing_groups",
            Self::Match => "cre2_match",
            Self::NamedGroupsIterNew => "cre2_named_groups_iter_new",
            Self::NamedGroupsIterNext => "cre2_named_groups_iter_next",
            Self::NamedGroupsIterDelete => "cre2_named_groups_iter_delete",
            Self::GlobalReplace => "cre2_global_replace_re",
            Self::Initialize => "_initialize",
            Self::StartThread => "wasi_start_thread",
        }
    }

    /// Names of all required exports.
    pub fn required_names() -> impl Iterator<Item = &'static str> {
        Self::REQUIRED.into_iter().map(Self::name)
    }
}

impl std::fmt::Display for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-context cache of resolved guest functions.
pub struct SymbolTable {
    instance: Instance,
    resolved: HashMap<Export, Func>,
}

impl SymbolTable {
    /// Create an empty table over `instance`.
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            resolved: HashMap::new(),
        }
    }

    /// Look up `export`, resolving it on first use.
    ///
    /// Returns `None` if the guest does not export it as a function.
    pub fn lookup(&mut self, mut store: impl AsContextMut, export: Export) -> Option<Func> {
        if let Some(func) = self.resolved.get(&export) {
            return Some(*func);
        }

        let func = self.instance.get_func(&mut store, export.name())?;
        self.resolved.insert(export, func);
        Some(func)
    }

    /// Resolve `export`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingExport`] if the guest does not export it.
    pub fn resolve(&mut self, store: impl AsContextMut, export: Export) -> Result<Func, RuntimeError> {
        self.lookup(store, export)
            .ok_or_else(|| RuntimeError::missing_export(export.name()))
    }

    /// Resolve `export` with a statically checked signature.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingExport`] if the export is absent, or
    /// [`RuntimeError::SignatureMismatch`] if its type differs from `P -> R`.
    pub fn typed<P, R>(
        &mut self,
        mut store: impl AsContextMut,
        export: Export,
    ) -> Result<TypedFunc<P, R>, RuntimeError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self.resolve(&mut store, export)?;
        func.typed::<P, R>(&store)
            .map_err(|e| RuntimeError::SignatureMismatch {
                name: export.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns `true` if `export` has been resolved already.
    pub fn is_resolved(&self, export: Export) -> bool {
        self.resolved.contains_key(&export)
    }

    /// Number of exports resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("resolved", &self.resolved.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, Module, Store};

    const WAT: &str = r#"
        (module
            (func (export "malloc") (param i32) (result i32) (local.get 0))
            (func (export "free") (param i32)))
    "#;

    fn table() -> (Store<()>, SymbolTable) {
        let engine = Engine::default();
        let module = Module::new(&engine, WAT).unwrap();
        let mut store = Store::new(&engine, ());
        let instance = Instance::new(&mut store, &module, &[]).unwrap();
        (store, SymbolTable::new(instance))
    }

    #[test]
    fn test_export_names_are_unique() {
        let mut names: Vec<_> = Export::required_names().collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Export::REQUIRED.len());
    }

    #[test]
    fn test_resolution_is_lazy() {
        let (mut store, mut table) = table();
        assert_eq!(table.resolved_count(), 0);

        table.resolve(&mut store, Export::Malloc).unwrap();
        assert!(table.is_resolved(Export::Malloc));
        assert!(!table.is_resolved(Export::Free));
        assert_eq!(table.resolved_count(), 1);

        // Cached lookups do not add entries
        table.resolve(&mut store, Export::Malloc).unwrap();
        assert_eq!(table.resolved_count(), 1);
    }

    #[test]
    fn test_typed_call() {
        let (mut store, mut table) = table();

        let malloc = table.typed::<i32, i32>(&mut store, Export::Malloc).unwrap();
        assert_eq!(malloc.call(&mut store, 42).unwrap(), 42);
    }

    #[test]
    fn test_missing_export() {
        let (mut store, mut table) = table();

        let err = table.resolve(&mut store, Export::New).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingExport { ref name } if name == "cre2_new"));
        assert!(table.lookup(&mut store, Export::Initialize).is_none());
        assert_eq!(table.resolved_count(), 0);
    }

    #[test]
    fn test_signature_mismatch() {
        let (mut store, mut table) = table();

        let Err(err) = table.typed::<(i32, i32), i32>(&mut store, Export::Free) else {
            panic!("expected a signature mismatch");
        };
        assert!(matches!(err, RuntimeError::SignatureMismatch { .. }));
        assert!(err.is_fatal());
    }
}
