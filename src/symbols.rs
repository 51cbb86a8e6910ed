//! Process-wide package/symbol registry.
//!
//! A package maps uppercased symbol names to symbols; interning the same
//! `(name, package)` pair twice returns the same [`Symbol`] handle, which is
//! how symbol *identity* (not just name equality) survives an encode/decode
//! round trip. The keyword package is canonical and created on first use.
//!
//! A scoped [`SymbolTable`] is the primary type, constructed explicitly by
//! callers who want isolation (tests, multiple independent codecs);
//! [`SymbolTable::global`] is the lazily-built process-wide default most
//! callers reach for instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

pub const KEYWORD_PACKAGE: &str = "KEYWORD";

#[derive(Debug)]
pub struct SymbolData {
    pub name: String,
    pub package: String,
}

/// A symbol handle. Cloning is cheap (`Arc` bump) and two handles interned
/// from the same `(name, package)` pair are `Arc`-identical, which is what
/// lets the encoder's reference tracking and the decoder's interning agree
/// on identity.
pub type Symbol = Arc<SymbolData>;

#[derive(Default)]
struct PackageTable {
    symbols: HashMap<String, Symbol>,
}

/// A scoped package/symbol registry. One critical section (a single
/// `Mutex`) guards all packages rather than one per package; interning is
/// not a hot loop, so the coarser lock is simpler and cheap enough.
pub struct SymbolTable {
    packages: Mutex<HashMap<String, PackageTable>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide default table, built lazily under a single critical
    /// section the first time any caller needs it.
    pub fn global() -> &'static Arc<SymbolTable> {
        static GLOBAL: OnceLock<Arc<SymbolTable>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(SymbolTable::new()))
    }

    /// Interns `name` into `package` (uppercased unless `keepcase`),
    /// creating the package on first use. Returns the existing symbol if
    /// one by that name is already interned there.
    pub fn intern(&self, name: &str, package: &str, keepcase: bool) -> Symbol {
        let pkg_name = normalize_package_name(package);
        let sym_name = if keepcase {
            name.to_string()
        } else {
            name.to_uppercase()
        };

        let mut packages = self.packages.lock().unwrap();
        let table = packages.entry(pkg_name.clone()).or_default();
        table
            .symbols
            .entry(sym_name.clone())
            .or_insert_with(|| {
                Arc::new(SymbolData {
                    name: sym_name,
                    package: pkg_name,
                })
            })
            .clone()
    }

    pub fn keyword(&self, name: &str, keepcase: bool) -> Symbol {
        self.intern(name, KEYWORD_PACKAGE, keepcase)
    }

    pub fn is_keyword(&self, symbol: &Symbol) -> bool {
        symbol.package.eq_ignore_ascii_case(KEYWORD_PACKAGE)
    }

    /// True iff `name` has a package already interned (case-insensitively).
    pub fn has_package(&self, name: &str) -> bool {
        let pkg_name = normalize_package_name(name);
        self.packages.lock().unwrap().contains_key(&pkg_name)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_package_name(name: &str) -> String {
    name.to_uppercase()
}
