#![forbid(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod header;
pub mod index_table;
pub mod reader;
pub mod registry;
pub mod symbols;
pub mod value;

#[cfg(test)]
mod tests;

use std::any::Any;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Result;

pub use decode::{DecodeOptions, Decoder, PointerHook, RemoteRefHook};
pub use encode::{EncodeOptions, Encoder};
pub use error::{ConspackError, ConspackErrorKind};
pub use index_table::{IndexItem, IndexTable};
pub use reader::ConspackRead;
pub use registry::TypeRegistry;
pub use symbols::{Symbol, SymbolTable};
pub use value::{FloatValue, TaggedMap, Value};

/// Encodes `value` into a fresh byte buffer.
pub fn encode_to_vec(value: &Value, opts: EncodeOptions) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(opts);
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Decodes a single value from the front of `bytes`. Trailing bytes, if
/// any, are left unread.
pub fn decode_from_slice(bytes: &[u8], opts: DecodeOptions) -> Result<Value> {
    let mut decoder = Decoder::new(opts);
    decoder.decode(&mut std::io::Cursor::new(bytes))
}

/// Encodes `value` and writes it to `path`, truncating any existing file.
pub fn encode_file(path: impl AsRef<Path>, value: &Value, opts: EncodeOptions) -> Result<()> {
    let bytes = encode_to_vec(value, opts)?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(())
}

/// Reads and decodes a single value from the file at `path`.
pub fn decode_file(path: impl AsRef<Path>, opts: DecodeOptions) -> Result<Value> {
    let mut input = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(opts);
    decoder.decode(&mut input)
}

/// Registers a native type `T` in the process-wide type registry under
/// `symbol`. `encode_hook` projects a `&T` to an ordered key/value mapping;
/// `decode_hook` reconstructs a `T` from a tmap's decoded entries.
pub fn register<T: Any + 'static>(
    symbol: Symbol,
    encode_hook: impl Fn(&T) -> Result<Vec<(String, Value)>> + Send + Sync + 'static,
    decode_hook: impl Fn(&[(Value, Value)]) -> Result<T> + Send + Sync + 'static,
) {
    registry::register(TypeRegistry::global(), symbol, encode_hook, decode_hook)
}

/// Removes `T`'s registration from the process-wide type registry, if any.
pub fn deregister<T: Any + 'static>() {
    registry::deregister::<T>(TypeRegistry::global())
}
