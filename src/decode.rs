//! Recursive-descent decoder driven entirely by header bytes.
//!
//! Forward references and cycles are resolved without an explicit
//! placeholder/patch-up table: every tagged value is materialized as a
//! `Value::Shared(Rc<RefCell<Value>>)` shell the moment its tag number is
//! first seen (whether that first sighting is the `Tag` header itself or an
//! earlier `Ref` to it), and every subsequent occurrence clones the same
//! `Rc`. Filling the shell's `RefCell` after the body decodes patches every
//! outstanding reference in one move, including a reference to a value from
//! inside its own body (a cycle) — interior mutability does the job that
//! would otherwise need an explicit placeholder-coordinate patch-up list.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::error::{conspack_err, ConspackErrorKind};
use crate::header::{self, ContainerKind, HeaderGroup, NumericType, SizeClass};
use crate::index_table::IndexTable;
use crate::reader::ConspackRead;
use crate::registry::TypeRegistry;
use crate::symbols::{Symbol, SymbolTable};
use crate::value::{FloatValue, TaggedMap, Value};

pub type RemoteRefHook = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
pub type PointerHook = Arc<dyn Fn(u64) -> Result<Value> + Send + Sync>;

pub struct DecodeOptions {
    pub index: Option<Arc<IndexTable>>,
    pub symbols: Arc<SymbolTable>,
    pub registry: Option<Arc<Mutex<TypeRegistry>>>,
    pub rref_decoder: Option<RemoteRefHook>,
    pub pointer_decoder: Option<PointerHook>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            index: None,
            symbols: SymbolTable::global().clone(),
            registry: None,
            rref_decoder: None,
            pointer_decoder: None,
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, index: Arc<IndexTable>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn symbols(mut self, symbols: Arc<SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn registry(mut self, registry: Arc<Mutex<TypeRegistry>>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn rref_decoder(mut self, hook: RemoteRefHook) -> Self {
        self.rref_decoder = Some(hook);
        self
    }

    pub fn pointer_decoder(mut self, hook: PointerHook) -> Self {
        self.pointer_decoder = Some(hook);
        self
    }
}

pub struct Decoder {
    opts: DecodeOptions,
    tags: HashMap<u64, Rc<RefCell<Value>>>,
}

impl Decoder {
    pub fn new(opts: DecodeOptions) -> Self {
        Self {
            opts,
            tags: HashMap::new(),
        }
    }

    pub fn decode(&mut self, r: &mut impl ConspackRead) -> Result<Value> {
        self.read_value(r)
    }

    fn shell_for(&mut self, tag: u64) -> Rc<RefCell<Value>> {
        self.tags
            .entry(tag)
            .or_insert_with(|| Rc::new(RefCell::new(Value::Nil)))
            .clone()
    }

    fn read_value(&mut self, r: &mut impl ConspackRead) -> Result<Value> {
        let h = r.read_u8()?;
        self.read_value_for_header(h, r)
    }

    fn read_value_for_header(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        match header::classify(h)? {
            HeaderGroup::Bool => Ok(if (h & 0x01) != 0 {
                Value::Bool(true)
            } else {
                Value::Nil
            }),
            HeaderGroup::Number => {
                let nt = NumericType::from_header(h)?;
                self.read_number_body(nt, r)
            }
            HeaderGroup::Index => self.read_index(h, r),
            HeaderGroup::Container => self.read_container(h, r),
            HeaderGroup::Cons => self.read_cons(r),
            HeaderGroup::String => self.read_string(h, r),
            HeaderGroup::Character => self.read_character(h, r),
            HeaderGroup::RemoteRef => self.read_remote_ref(r),
            HeaderGroup::Pointer => self.read_pointer(h, r),
            HeaderGroup::Package => self.read_package(r),
            HeaderGroup::Symbol => self.read_symbol(h, r),
            HeaderGroup::Tag => self.read_tag(h, r),
            HeaderGroup::Ref => self.read_ref(h, r),
        }
    }

    fn read_reftag_value(h: u8, r: &mut impl ConspackRead) -> Result<u64> {
        if (h & header::REFTAG_INLINE) != 0 {
            Ok((h & header::REFTAG_INLINE_VALUE) as u64)
        } else {
            let class = SizeClass::from_bits(h)?;
            class.read_len(r)
        }
    }

    fn read_tag(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let tag = Self::read_reftag_value(h, r)?;
        let shell = self.shell_for(tag);
        let body = self.read_value(r)?;
        *shell.borrow_mut() = body;
        Ok(Value::Shared(shell))
    }

    fn read_ref(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let tag = Self::read_reftag_value(h, r)?;
        Ok(Value::Shared(self.shell_for(tag)))
    }

    fn read_number_body(&mut self, nt: NumericType, r: &mut impl ConspackRead) -> Result<Value> {
        match nt {
            NumericType::SingleFloat => Ok(Value::Float(FloatValue::Single(r.read_be_f32()?))),
            NumericType::DoubleFloat => Ok(Value::Float(FloatValue::Double(r.read_be_f64()?))),
            NumericType::Int8 => Ok(Value::Int(r.read_be_i8()? as i128)),
            NumericType::Uint8 => Ok(Value::Int(r.read_u8()? as i128)),
            NumericType::Int16 => Ok(Value::Int(r.read_be_i16()? as i128)),
            NumericType::Uint16 => Ok(Value::Int(r.read_be_u16()? as i128)),
            NumericType::Int32 => Ok(Value::Int(r.read_be_i32()? as i128)),
            NumericType::Uint32 => Ok(Value::Int(r.read_be_u32()? as i128)),
            NumericType::Int64 => Ok(Value::Int(r.read_be_i64()? as i128)),
            NumericType::Uint64 => Ok(Value::Int(r.read_be_u64()? as i128)),
            // The wire carries 16 big-endian bytes for both widths,
            // interpreted as signed two's-complement for Int128 and
            // unsigned for Uint128; `Value::Int` is an `i128` and so cannot
            // hold the top half of Uint128's range, which reinterprets as
            // the matching negative i128 (the same representational limit
            // that makes Uint128 unreachable from the encoder).
            NumericType::Int128 => Ok(Value::Int(r.read_be_u128_bytes()? as i128)),
            NumericType::Uint128 => Ok(Value::Int(r.read_be_u128_bytes()? as i128)),
            NumericType::Complex | NumericType::Rational => {
                unreachable!("rejected by NumericType::from_header")
            }
        }
    }

    fn read_string(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let class = SizeClass::from_bits(h)?;
        let len = class.read_len(r)?;
        let bytes = r.read_exact_vec(len as usize)?;
        let s = String::from_utf8(bytes)
            .map_err(|e| conspack_err!(ConspackErrorKind::BadValue, "string is not valid UTF-8: {e}"))?;
        Ok(Value::Str(s))
    }

    fn read_character(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        // The header's 2-bit field holds byte_count - 1, so 1..4 UTF-8 bytes
        // fit in a field that can only spell 0..3 without bleeding into the
        // neighboring container bit.
        let len = ((h & 0x03) + 1) as usize;
        let bytes = r.read_exact_vec(len)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| conspack_err!(ConspackErrorKind::BadValue, "character is not valid UTF-8: {e}"))?;
        let mut chars = s.chars();
        let c = chars
            .next()
            .ok_or_else(|| conspack_err!(ConspackErrorKind::BadValue, "character payload is empty"))?;
        if chars.next().is_some() {
            return Err(conspack_err!(
                ConspackErrorKind::BadValue,
                "character payload decodes to more than one scalar"
            ));
        }
        Ok(Value::Char(c))
    }

    fn read_cons(&mut self, r: &mut impl ConspackRead) -> Result<Value> {
        let car = self.read_value(r)?;
        let cdr = self.read_value(r)?;
        if cdr.is_falsey() {
            Ok(Value::List(vec![car]))
        } else {
            Ok(Value::DottedList(vec![car], Box::new(cdr)))
        }
    }

    fn read_container(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let kind = ContainerKind::from_header(h)?;
        let fixed = (h & header::CONTAINER_FIXED) != 0;
        let class = SizeClass::from_bits(h)?;
        let len = class.read_len(r)?;
        let fixed_header = if fixed { Some(r.read_u8()?) } else { None };
        match kind {
            ContainerKind::Vector => Ok(Value::Vector(self.read_elements(len, fixed_header, r)?)),
            ContainerKind::List => {
                let items = self.read_elements(len, fixed_header, r)?;
                Ok(Self::list_from_raw_elements(items))
            }
            ContainerKind::Map => Ok(Value::Map(self.read_map_entries(len, r)?)),
            ContainerKind::Tmap => self.read_tmap(len, r),
        }
    }

    fn read_elements(
        &mut self,
        len: u64,
        fixed_header: Option<u8>,
        r: &mut impl ConspackRead,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let v = match fixed_header {
                Some(fh) => {
                    let nt = NumericType::from_header(fh)?;
                    self.read_number_body(nt, r)?
                }
                None => self.read_value(r)?,
            };
            items.push(v);
        }
        Ok(items)
    }

    /// A list container's wire elements are the proper elements followed by
    /// the terminator (nil for a proper list, the improper tail for a
    /// dotted one).
    fn list_from_raw_elements(mut items: Vec<Value>) -> Value {
        let tail = items.pop().unwrap_or(Value::Nil);
        if tail.is_falsey() {
            Value::List(items)
        } else {
            Value::DottedList(items, Box::new(tail))
        }
    }

    fn read_map_entries(&mut self, len: u64, r: &mut impl ConspackRead) -> Result<Vec<(Value, Value)>> {
        let mut entries = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let k = self.read_value(r)?;
            let v = self.read_value(r)?;
            entries.push((k, v));
        }
        Ok(entries)
    }

    fn read_tmap(&mut self, len: u64, r: &mut impl ConspackRead) -> Result<Value> {
        let type_value = self.read_value(r)?;
        let type_symbol = match type_value {
            Value::Symbol(sym) => sym,
            other => {
                return Err(conspack_err!(
                    ConspackErrorKind::BadValue,
                    "tmap type marker must be a symbol, got {other:?}"
                ))
            }
        };
        let entries = self.read_map_entries(len, r)?;

        let hook = {
            let guard = self.registry_ref().lock().unwrap();
            guard
                .decoder_for(&type_symbol.name, &type_symbol.package)
                .cloned()
                .ok_or_else(|| {
                    conspack_err!(
                        ConspackErrorKind::NoDecoder,
                        "no decoder registered for {}::{}",
                        type_symbol.package,
                        type_symbol.name
                    )
                })?
        };

        let native = hook(&entries)?;
        Ok(Value::TaggedObject(TaggedMap {
            type_symbol,
            entries,
            native: Some(native.into()),
        }))
    }

    fn registry_ref(&self) -> &Mutex<TypeRegistry> {
        match &self.opts.registry {
            Some(r) => r.as_ref(),
            None => TypeRegistry::global(),
        }
    }

    fn read_package(&mut self, r: &mut impl ConspackRead) -> Result<Value> {
        let name = self.read_value(r)?;
        match name {
            Value::Str(s) => Ok(Value::Package(s)),
            Value::Char(c) => Ok(Value::Package(c.to_string())),
            other => Err(conspack_err!(
                ConspackErrorKind::BadValue,
                "package name did not decode to a string: {other:?}"
            )),
        }
    }

    fn read_symbol(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let is_keyword = (h & header::SYMBOL_KEYWORD) != 0;
        let name = self.read_name_string(r)?;
        let package = if is_keyword {
            crate::symbols::KEYWORD_PACKAGE.to_string()
        } else {
            match self.read_value(r)? {
                Value::Package(p) => p,
                other => {
                    return Err(conspack_err!(
                        ConspackErrorKind::BadValue,
                        "symbol's package did not decode to a package value: {other:?}"
                    ))
                }
            }
        };
        Ok(Value::Symbol(self.opts.symbols.intern(&name, &package, false)))
    }

    fn read_name_string(&mut self, r: &mut impl ConspackRead) -> Result<String> {
        match self.read_value(r)? {
            Value::Str(s) => Ok(s),
            Value::Char(c) => Ok(c.to_string()),
            other => Err(conspack_err!(
                ConspackErrorKind::BadValue,
                "expected a name string, got {other:?}"
            )),
        }
    }

    fn read_pointer(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let class = SizeClass::from_bits(h)?;
        let val = class.read_len(r)?;
        match &self.opts.pointer_decoder {
            Some(hook) => hook(val),
            None => Ok(Value::Pointer(val)),
        }
    }

    fn read_remote_ref(&mut self, r: &mut impl ConspackRead) -> Result<Value> {
        let inner = self.read_value(r)?;
        match &self.opts.rref_decoder {
            Some(hook) => hook(inner),
            None => Ok(Value::RemoteRef(Box::new(inner))),
        }
    }

    fn read_index(&mut self, h: u8, r: &mut impl ConspackRead) -> Result<Value> {
        let idx = Self::read_reftag_value(h, r)?;
        if let Some(table) = &self.opts.index {
            if let Some(v) = table.value_at(idx) {
                return Ok(v);
            }
        }
        Ok(Value::Index(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeOptions, Encoder};
    use std::io::Cursor;

    fn round_trip(val: &Value) -> Value {
        let mut enc = Encoder::new(EncodeOptions::new());
        enc.encode(val).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(DecodeOptions::new());
        dec.decode(&mut Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn nil_round_trips() {
        assert_eq!(round_trip(&Value::Nil), Value::Nil);
    }

    #[test]
    fn integers_round_trip_across_widths() {
        for n in [0i128, -1, 127, -128, 300, -40_000, 70_000, i64::MAX as i128] {
            assert_eq!(round_trip(&Value::Int(n)), Value::Int(n));
        }
    }

    #[test]
    fn single_char_string_round_trips_through_character() {
        assert_eq!(round_trip(&Value::string("A")), Value::string("A"));
    }

    #[test]
    fn dotted_list_round_trips_with_improper_tail() {
        let val = Value::DottedList(
            vec![Value::Int(1), Value::Int(2)],
            Box::new(Value::Int(3)),
        );
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn proper_list_round_trips() {
        let val = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn shared_symbol_decodes_to_identical_handles() {
        let symbols = SymbolTable::new();
        let sym = Value::Symbol(symbols.intern("FOO", "CL-USER", true));
        let shared = Value::shared(sym);
        let root = Value::List(vec![shared.clone(), shared]);

        let mut enc = Encoder::new(EncodeOptions::new());
        enc.encode(&root).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(DecodeOptions::new());
        let decoded = dec.decode(&mut Cursor::new(bytes)).unwrap();
        let Value::List(items) = decoded else {
            panic!("expected a list");
        };
        let (Value::Shared(a), Value::Shared(b)) = (&items[0], &items[1]) else {
            panic!("expected shared slots");
        };
        assert!(Rc::ptr_eq(a, b));
    }

    #[test]
    fn cyclic_list_decodes_to_self_referential_shared_cell() {
        let cell = Rc::new(RefCell::new(Value::Nil));
        let shared = Value::Shared(cell.clone());
        *cell.borrow_mut() = Value::List(vec![shared.clone()]);

        let mut enc = Encoder::new(EncodeOptions::new());
        enc.encode(&shared).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(DecodeOptions::new());
        let decoded = dec.decode(&mut Cursor::new(bytes)).unwrap();
        let Value::Shared(outer) = &decoded else {
            panic!("expected a shared cell at the root");
        };
        let inner = outer.borrow();
        let Value::List(items) = &*inner else {
            panic!("expected a one-element list inside the cell");
        };
        let Value::Shared(inner_cell) = &items[0] else {
            panic!("expected the list's single element to be the same shared cell");
        };
        assert!(Rc::ptr_eq(outer, inner_cell));
    }

    #[test]
    fn missing_decoder_hook_fails_with_no_decoder() {
        let symbols = SymbolTable::new();
        let registry = Mutex::new(TypeRegistry::new());
        let ts = symbols.intern("UNREGISTERED-THING", "CL-USER", true);
        let root = Value::TaggedObject(TaggedMap::new(
            ts,
            vec![(Value::keyword(&symbols, "x"), Value::Int(1))],
        ));
        let mut enc = Encoder::new(EncodeOptions::new().symbols(Arc::new(symbols)));
        enc.encode(&root).unwrap();
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(DecodeOptions::new().registry(Arc::new(registry)));
        let err = dec.decode(&mut Cursor::new(bytes)).unwrap_err();
        let downcast = err.downcast_ref::<crate::error::ConspackError>().unwrap();
        assert_eq!(downcast.kind, ConspackErrorKind::NoDecoder);
    }
}
