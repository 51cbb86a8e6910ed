//! User-type <-> symbol <-> encode/decode hook mapping.
//!
//! Registration is keyed by `TypeId` on the encode side (there is no
//! runtime "type of this value" dispatch available) and by the tmap's type
//! symbol `(name, package)` on the decode side, made type-safe at the call
//! site through the generic [`register`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;

use crate::symbols::Symbol;
use crate::value::Value;

pub type EncodeHook = Arc<dyn Fn(&dyn Any) -> Result<Vec<(String, Value)>> + Send + Sync>;
pub type DecodeHook = Arc<dyn Fn(&[(Value, Value)]) -> Result<Box<dyn Any>> + Send + Sync>;

#[derive(Default)]
pub struct TypeRegistry {
    encoders: HashMap<TypeId, (Symbol, EncodeHook)>,
    decoders: HashMap<(String, String), DecodeHook>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Mutex<TypeRegistry> {
        static GLOBAL: OnceLock<Mutex<TypeRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(TypeRegistry::new()))
    }

    pub fn register_raw(
        &mut self,
        type_id: TypeId,
        symbol: Symbol,
        encode_hook: EncodeHook,
        decode_hook: DecodeHook,
    ) {
        let key = (symbol.name.clone(), symbol.package.clone());
        self.encoders.insert(type_id, (symbol, encode_hook));
        self.decoders.insert(key, decode_hook);
    }

    pub fn deregister_raw(&mut self, type_id: TypeId) {
        if let Some((symbol, _)) = self.encoders.remove(&type_id) {
            self.decoders.remove(&(symbol.name, symbol.package));
        }
    }

    pub fn encoder_for(&self, type_id: TypeId) -> Option<&(Symbol, EncodeHook)> {
        self.encoders.get(&type_id)
    }

    pub fn decoder_for(&self, name: &str, package: &str) -> Option<&DecodeHook> {
        self.decoders.get(&(name.to_string(), package.to_string()))
    }
}

/// Registers a native type `T` under `symbol`: `encode_hook` projects a
/// `&T` to an ordered key/value mapping, `decode_hook` reconstructs a `T`
/// from a tmap's decoded entries.
pub fn register<T: Any + 'static>(
    registry: &Mutex<TypeRegistry>,
    symbol: Symbol,
    encode_hook: impl Fn(&T) -> Result<Vec<(String, Value)>> + Send + Sync + 'static,
    decode_hook: impl Fn(&[(Value, Value)]) -> Result<T> + Send + Sync + 'static,
) {
    let encode: EncodeHook = Arc::new(move |any: &dyn Any| {
        let typed = any
            .downcast_ref::<T>()
            .expect("encode hook invoked with mismatched type");
        encode_hook(typed)
    });
    let decode: DecodeHook = Arc::new(move |entries: &[(Value, Value)]| {
        decode_hook(entries).map(|v| Box::new(v) as Box<dyn Any>)
    });
    registry
        .lock()
        .unwrap()
        .register_raw(TypeId::of::<T>(), symbol, encode, decode);
}

pub fn deregister<T: Any + 'static>(registry: &Mutex<TypeRegistry>) {
    registry.lock().unwrap().deregister_raw(TypeId::of::<T>());
}
