//! The per-compilation [`CompilerContext`]: source table, error reporter,
//! optimization settings, and the hash-consing tables for [`crate::ty::Type`]
//! and [`crate::attribute::Attribute`].

use crate::attribute::Attribute;
use crate::error::{report_error_with_context, Location};
use crate::ty::Type;
use crate::FastHashMap;
use std::sync::{Arc, Mutex};

/// Tri-state value for an optimization flag: explicit on/off, or "let the
/// optimization level decide".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Disabled,
    Enabled,
    Default,
}

/// Recognized optimization flags (§6 "Optimization flags").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptFlag {
    /// Permit non-IEEE-exact reassociation of floating point arithmetic.
    UnsafeFpMath,
}

/// Callback invoked for every diagnostic with a source [`Location`].
///
/// The default implementation logs at `error` level through the `log`
/// facade (§10.2) rather than writing to stderr directly, so host
/// applications can redirect it with any `log` backend.
pub type ErrorReporter = Box<dyn Fn(&str, Option<Location>) + Send + Sync>;

fn default_error_reporter(message: &str, _location: Option<Location>) {
    log::error!("{message}");
}

struct SourceEntry {
    name: String,
    text: String,
}

/// Owns the per-compilation uniquing tables, the source-text table, and the
/// error reporter callback. Outlives every program/function/region/
/// instruction/type/attribute created against it (§3.1).
///
/// Cheap to clone: `CompilerContext` is a handle around `Arc<Inner>`, so
/// ownership can be transferred across threads (§5 requires the refcount
/// itself to be thread-safe even though the pointed-to tables are
/// single-writer).
#[derive(Clone)]
pub struct CompilerContext {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for CompilerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerContext").finish_non_exhaustive()
    }
}

struct Inner {
    sources: Vec<SourceEntry>,
    reporter: ErrorReporter,
    opt_level: i32,
    opt_flags: FastHashMap<OptFlag, FlagState>,
    types: crate::arena::UniqueArena<Type>,
    attrs: crate::arena::UniqueArena<Attribute>,
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerContext {
    pub fn new() -> Self {
        CompilerContext {
            inner: Arc::new(Mutex::new(Inner {
                sources: Vec::new(),
                reporter: Box::new(|msg, loc| default_error_reporter(msg, loc)),
                opt_level: 0,
                opt_flags: FastHashMap::default(),
                types: crate::arena::UniqueArena::new(),
                attrs: crate::arena::UniqueArena::new(),
            })),
        }
    }

    /// Registers a new source text, returning its stable, 1-based
    /// `source_id`.
    pub fn add_source(&self, name: impl Into<String>, text: impl Into<String>) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        inner.sources.push(SourceEntry {
            name: name.into(),
            text: text.into(),
        });
        inner.sources.len() as i32
    }

    pub fn source_name(&self, source_id: i32) -> String {
        let inner = self.inner.lock().unwrap();
        inner
            .sources
            .get((source_id - 1).max(-1) as usize)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "Source name unavailable".to_string())
    }

    pub fn source_text(&self, source_id: i32) -> String {
        let inner = self.inner.lock().unwrap();
        if source_id >= 1 {
            inner
                .sources
                .get((source_id - 1) as usize)
                .map(|s| s.text.clone())
                .unwrap_or_default()
        } else {
            String::new()
        }
    }

    pub fn set_error_reporter(&self, reporter: ErrorReporter) {
        self.inner.lock().unwrap().reporter = reporter;
    }

    /// Formats `loc` with a source snippet (when the `source_id` is known)
    /// and forwards it to the error-reporter callback.
    pub fn report_error(&self, loc: Location, what: &str) {
        let name = self.source_name(loc.begin.source_id);
        let text = self.source_text(loc.begin.source_id);
        let message = if !text.is_empty() {
            report_error_with_context(&text, &name, loc, what)
        } else {
            format!("{name}:{loc}: {what}")
        };
        let inner = self.inner.lock().unwrap();
        (inner.reporter)(&message, Some(loc));
    }

    pub fn set_optimization_level(&self, level: i32) {
        self.inner.lock().unwrap().opt_level = level.clamp(0, 2);
    }

    pub fn optimization_level(&self) -> i32 {
        self.inner.lock().unwrap().opt_level
    }

    pub fn set_optimization_flag(&self, flag: OptFlag, state: FlagState) {
        self.inner.lock().unwrap().opt_flags.insert(flag, state);
    }

    /// Resolves a flag to an effective boolean, falling back to the
    /// optimization level when the flag is `Default` or unset: level 2
    /// enables every flag, levels 0-1 disable it.
    pub fn optimization_flag_enabled(&self, flag: OptFlag) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.opt_flags.get(&flag).copied().unwrap_or(FlagState::Default) {
            FlagState::Enabled => true,
            FlagState::Disabled => false,
            FlagState::Default => inner.opt_level >= 2,
        }
    }

    /// Returns the canonical handle for `ty`, hash-consing it into this
    /// context's type table.
    pub fn get_type(&self, ty: Type) -> crate::arena::Handle<Type> {
        self.inner.lock().unwrap().types.get(ty)
    }

    pub fn resolve_type(&self, handle: crate::arena::Handle<Type>) -> Type {
        self.inner.lock().unwrap().types[handle].clone()
    }

    /// Returns the canonical handle for `attr`, hash-consing it into this
    /// context's attribute table.
    pub fn get_attr(&self, attr: Attribute) -> crate::arena::Handle<Attribute> {
        self.inner.lock().unwrap().attrs.get(attr)
    }

    pub fn resolve_attr(&self, handle: crate::arena::Handle<Attribute>) -> Attribute {
        self.inner.lock().unwrap().attrs[handle].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_are_1_based_and_stable() {
        let ctx = CompilerContext::new();
        let a = ctx.add_source("a.ttl", "fn a() {}");
        let b = ctx.add_source("b.ttl", "fn b() {}");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(ctx.source_name(a), "a.ttl");
        assert_eq!(ctx.source_text(b), "fn b() {}");
    }

    #[test]
    fn unknown_source_id_reports_placeholder_name() {
        let ctx = CompilerContext::new();
        assert_eq!(ctx.source_name(99), "Source name unavailable");
        assert_eq!(ctx.source_text(99), "");
    }

    #[test]
    fn optimization_flag_defaults_to_level() {
        let ctx = CompilerContext::new();
        assert!(!ctx.optimization_flag_enabled(OptFlag::UnsafeFpMath));
        ctx.set_optimization_level(2);
        assert!(ctx.optimization_flag_enabled(OptFlag::UnsafeFpMath));
        ctx.set_optimization_flag(OptFlag::UnsafeFpMath, FlagState::Disabled);
        assert!(!ctx.optimization_flag_enabled(OptFlag::UnsafeFpMath));
    }
}
