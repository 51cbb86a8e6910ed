//! Two-pass encoder: a reference-tracking "notice" walk followed by a
//! single depth-first write walk.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::error::{conspack_err, ConspackErrorKind};
use crate::header::{self, IntWidth, NumericType, SizeClass};
use crate::index_table::IndexTable;
use crate::registry::TypeRegistry;
use crate::symbols::{Symbol, SymbolTable};
use crate::value::{FloatValue, NativeObject, Value};

/// Encoder behavior flags and collaborators.
pub struct EncodeOptions {
    pub single_char_strings: bool,
    pub lists_are_vectors: bool,
    pub all_floats_single: bool,
    pub no_sub_underscores: bool,
    pub norefs: bool,
    pub index: Option<Arc<IndexTable>>,
    pub symbols: Arc<SymbolTable>,
    pub registry: Option<Arc<Mutex<TypeRegistry>>>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            single_char_strings: false,
            lists_are_vectors: false,
            all_floats_single: false,
            no_sub_underscores: false,
            norefs: false,
            index: None,
            symbols: SymbolTable::global().clone(),
            registry: None,
        }
    }
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single_char_strings(mut self, v: bool) -> Self {
        self.single_char_strings = v;
        self
    }

    pub fn lists_are_vectors(mut self, v: bool) -> Self {
        self.lists_are_vectors = v;
        self
    }

    pub fn all_floats_single(mut self, v: bool) -> Self {
        self.all_floats_single = v;
        self
    }

    pub fn no_sub_underscores(mut self, v: bool) -> Self {
        self.no_sub_underscores = v;
        self
    }

    pub fn norefs(mut self, v: bool) -> Self {
        self.norefs = v;
        self
    }

    pub fn index(mut self, index: IndexTable) -> Self {
        self.index = Some(Arc::new(index));
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
}

/// Rewrites a map-key string into the keyword-naming convention: underscores
/// become hyphens unless the name is already underscore-prefixed or the
/// caller disabled the rewrite.
fn rewrite_key(name: &str, no_sub_underscores: bool) -> String {
    if no_sub_underscores || name.starts_with('_') {
        name.to_string()
    } else {
        name.replace('_', "-")
    }
}

/// If every element of `items` shares one fixed-width numeric header, the
/// container can be written once with that header and raw payload bodies.
/// Widens to the narrowest width that fits every element, picking a signed
/// type iff any element is negative.
fn common_fixed_header(items: &[Value], all_floats_single: bool) -> Option<u8> {
    if items.is_empty() {
        return None;
    }
    if items.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut widest = IntWidth::W8;
        let mut any_negative = false;
        for v in items {
            let Value::Int(n) = v else { unreachable!() };
            if *n < 0 {
                any_negative = true;
            }
            let (_, w, _) = header::guess_int(*n).ok()?;
            if w > widest {
                widest = w;
            }
        }
        let nt = match (widest, any_negative) {
            (IntWidth::W8, true) => NumericType::Int8,
            (IntWidth::W8, false) => NumericType::Uint8,
            (IntWidth::W16, true) => NumericType::Int16,
            (IntWidth::W16, false) => NumericType::Uint16,
            (IntWidth::W32, true) => NumericType::Int32,
            (IntWidth::W32, false) => NumericType::Uint32,
            (IntWidth::W64, true) => NumericType::Int64,
            (IntWidth::W64, false) => NumericType::Uint64,
            (IntWidth::W128, true) => NumericType::Int128,
            (IntWidth::W128, false) => NumericType::Uint128,
        };
        return Some(header::NUMBER | nt as u8);
    }
    if items.iter().all(|v| matches!(v, Value::Float(_))) {
        let single = all_floats_single
            || items
                .iter()
                .all(|v| matches!(v, Value::Float(FloatValue::Single(_))));
        let nt = if single {
            NumericType::SingleFloat
        } else {
            NumericType::DoubleFloat
        };
        return Some(header::NUMBER | nt as u8);
    }
    None
}

pub struct Encoder {
    opts: EncodeOptions,
    buf: Vec<u8>,
    /// Rc pointer address -> dense tag number, for `Value::Shared` nodes
    /// seen more than once during the notice pass.
    tags: HashMap<usize, u64>,
    seen: HashSet<usize>,
    written: HashSet<usize>,
    next_tag: u64,
}

impl Encoder {
    pub fn new(opts: EncodeOptions) -> Self {
        Self {
            opts,
            buf: Vec::new(),
            tags: HashMap::new(),
            seen: HashSet::new(),
            written: HashSet::new(),
            next_tag: 0,
        }
    }

    pub fn encode(&mut self, root: &Value) -> Result<()> {
        if !self.opts.norefs {
            self.notice(root);
        }
        self.write_value(root)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Walks the graph once, assigning a dense tag number to every
    /// `Value::Shared` node that is visited a second time. Plain owned
    /// subtrees can never alias, so only `Shared` nodes ever need tracking
    /// only has work to do where a caller opts into sharing explicitly.
    fn notice(&mut self, val: &Value) {
        if let Value::Shared(rc) = val {
            let ptr = Rc::as_ptr(rc) as usize;
            if self.seen.contains(&ptr) {
                self.ensure_tag(ptr);
            } else {
                self.seen.insert(ptr);
                let inner = rc.borrow();
                self.notice(&inner);
            }
            return;
        }

        match val {
            Value::Vector(items) | Value::List(items) => {
                for item in items {
                    self.notice(item);
                }
            }
            Value::DottedList(items, tail) => {
                for item in items {
                    self.notice(item);
                }
                self.notice(tail);
            }
            Value::Map(entries) => {
                for (k, v) in entries {
                    self.notice(k);
                    self.notice(v);
                }
            }
            Value::Cons(a, b) => {
                self.notice(a);
                self.notice(b);
            }
            Value::RemoteRef(inner) => self.notice(inner),
            Value::TaggedObject(tm) => {
                for (k, v) in &tm.entries {
                    self.notice(k);
                    self.notice(v);
                }
            }
            _ => {}
        }
    }

    fn ensure_tag(&mut self, ptr: usize) -> u64 {
        if let Some(tag) = self.tags.get(&ptr) {
            return *tag;
        }
        let tag = self.next_tag;
        self.next_tag += 1;
        self.tags.insert(ptr, tag);
        tag
    }

    fn write_value(&mut self, val: &Value) -> Result<()> {
        if let Value::Shared(rc) = val {
            let ptr = Rc::as_ptr(rc) as usize;
            if self.written.contains(&ptr) {
                let tag = *self.tags.get(&ptr).ok_or_else(|| {
                    conspack_err!(
                        ConspackErrorKind::BadValue,
                        "a shared value was visited more than once but `norefs` skipped reference \
                         tracking; disable `norefs` to encode a cyclic or repeated-identity graph"
                    )
                })?;
                self.write_ref(tag);
                return Ok(());
            }
            if let Some(&tag) = self.tags.get(&ptr) {
                self.write_tag(tag);
                self.written.insert(ptr);
                let inner = rc.borrow();
                return self.write_body(&inner);
            }
            self.written.insert(ptr);
            let inner = rc.borrow();
            return self.write_body(&inner);
        }
        self.write_body(val)
    }

    fn write_body(&mut self, val: &Value) -> Result<()> {
        match val {
            Value::Nil => self.write_nil(),
            Value::Bool(true) => {
                self.write_byte(header::BOOL | 0x01);
                Ok(())
            }
            Value::Bool(false) => self.write_nil(),
            Value::Int(n) => self.write_int(*n),
            Value::Float(fv) => self.write_float_value(fv),
            Value::Str(s) => self.write_string(s),
            Value::Char(c) => self.write_char(*c),
            Value::Vector(items) => self.write_vector(items),
            Value::List(items) => self.write_proper_list(items),
            Value::DottedList(items, tail) => self.write_dotted_list(items, tail),
            Value::Map(entries) => {
                self.write_map_values(entries, Some(header::CONTAINER_MAP), None)
            }
            Value::Cons(a, b) => self.write_cons_cells(a, b),
            Value::Symbol(sym) => self.write_symbol(&sym.clone()),
            Value::Package(name) => self.write_package(&name.clone()),
            Value::Pointer(p) => self.write_pointer(*p),
            Value::RemoteRef(inner) => self.write_remote_ref(inner),
            Value::Index(i) => self.write_index(*i),
            Value::TaggedObject(tm) => {
                let symbol = tm.type_symbol.clone();
                let entries = tm.entries.clone();
                self.write_map_values(&entries, Some(header::CONTAINER_TMAP), Some(&symbol))
            }
            Value::Native(obj) => self.write_native(obj),
            Value::Shared(_) => unreachable!("dispatched in write_value"),
            Value::Pending(_) => Err(conspack_err!(
                ConspackErrorKind::BadValue,
                "cannot encode an unresolved forward-reference placeholder"
            )),
        }
    }

    fn registry_ref(&self) -> &Mutex<TypeRegistry> {
        match &self.opts.registry {
            Some(r) => r.as_ref(),
            None => TypeRegistry::global(),
        }
    }

    /// Projects a native object through its registered encode hook and
    /// writes the result as a tmap, the same way a hand-built
    /// `Value::TaggedObject` would be written.
    fn write_native(&mut self, obj: &NativeObject) -> Result<()> {
        let type_id = (*obj.0).type_id();
        let (symbol, hook) = {
            let guard = self.registry_ref().lock().unwrap();
            let (symbol, hook) = guard.encoder_for(type_id).ok_or_else(|| {
                conspack_err!(
                    ConspackErrorKind::NoEncoder,
                    "no encoder registered for this native type"
                )
            })?;
            (symbol.clone(), hook.clone())
        };
        let fields = hook(obj.0.as_ref())?;
        let entries: Vec<(Value, Value)> = fields
            .into_iter()
            .map(|(k, v)| (Value::Str(k), v))
            .collect();
        self.write_map_values(&entries, Some(header::CONTAINER_TMAP), Some(&symbol))
    }

    fn write_nil(&mut self) -> Result<()> {
        self.write_byte(header::BOOL);
        Ok(())
    }

    fn write_int(&mut self, n: i128) -> Result<()> {
        let (nt, _, _) = header::guess_int(n)?;
        self.write_byte(header::NUMBER | nt as u8);
        self.write_int_raw_bytes(n, nt.byte_count());
        Ok(())
    }

    fn write_int_raw_bytes(&mut self, n: i128, width_bytes: usize) {
        let bits = n as u128;
        let all = bits.to_be_bytes();
        let start = 16 - width_bytes;
        self.write_bytes(&all[start..]);
    }

    fn write_float_value(&mut self, fv: &FloatValue) -> Result<()> {
        match fv {
            FloatValue::Single(f) => {
                self.write_byte(header::NUMBER | header::SINGLE_FLOAT);
                self.write_bytes(&f.to_be_bytes());
            }
            FloatValue::Double(d) => {
                if self.opts.all_floats_single {
                    self.write_byte(header::NUMBER | header::SINGLE_FLOAT);
                    self.write_bytes(&(*d as f32).to_be_bytes());
                } else {
                    self.write_byte(header::NUMBER | header::DOUBLE_FLOAT);
                    self.write_bytes(&d.to_be_bytes());
                }
            }
        }
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if !self.opts.single_char_strings && s.chars().count() == 1 {
            let c = s.chars().next().expect("count()==1 implies one char");
            return self.write_char(c);
        }
        let bytes = s.as_bytes();
        let class = SizeClass::from_len(bytes.len() as u64);
        self.write_byte(header::STRING | class.bits());
        self.write_bytes(&class.encode_len(bytes.len() as u64));
        self.write_bytes(bytes);
        Ok(())
    }

    fn write_char(&mut self, c: char) -> Result<()> {
        let mut buf = [0u8; 4];
        let s = c.encode_utf8(&mut buf);
        // The header's 2-bit field holds byte_count - 1 (see decode.rs).
        let len_field = s.len() as u8 - 1;
        self.write_byte(header::CHARACTER | len_field);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    fn write_vector(&mut self, items: &[Value]) -> Result<()> {
        if let Some(fixed_header) = common_fixed_header(items, self.opts.all_floats_single) {
            return self.write_fixed_vector(items, fixed_header);
        }
        let total = items.len() as u64;
        let class = SizeClass::from_len(total);
        self.write_byte(header::CONTAINER | header::CONTAINER_VECTOR | class.bits());
        self.write_bytes(&class.encode_len(total));
        for item in items {
            self.write_value(item)?;
        }
        Ok(())
    }

    fn write_fixed_vector(&mut self, items: &[Value], fixed_header: u8) -> Result<()> {
        let total = items.len() as u64;
        let class = SizeClass::from_len(total);
        self.write_byte(
            header::CONTAINER | header::CONTAINER_VECTOR | header::CONTAINER_FIXED | class.bits(),
        );
        self.write_bytes(&class.encode_len(total));
        self.write_byte(fixed_header);
        for item in items {
            self.write_fixed_body(item, fixed_header)?;
        }
        Ok(())
    }

    fn write_fixed_body(&mut self, val: &Value, fixed_header: u8) -> Result<()> {
        let nt = NumericType::from_header(fixed_header)?;
        match val {
            Value::Int(n) => {
                self.write_int_raw_bytes(*n, nt.byte_count());
                Ok(())
            }
            Value::Float(FloatValue::Single(f)) => {
                self.write_bytes(&f.to_be_bytes());
                Ok(())
            }
            Value::Float(FloatValue::Double(d)) => {
                if nt == NumericType::SingleFloat {
                    self.write_bytes(&(*d as f32).to_be_bytes());
                } else {
                    self.write_bytes(&d.to_be_bytes());
                }
                Ok(())
            }
            _ => Err(conspack_err!(
                ConspackErrorKind::BadValue,
                "fixed vector element does not match its container's numeric type"
            )),
        }
    }

    fn write_proper_list(&mut self, items: &[Value]) -> Result<()> {
        if self.opts.lists_are_vectors {
            return self.write_vector(items);
        }
        if items.is_empty() {
            return self.write_nil();
        }
        if items.len() == 1 {
            return self.write_cons_cells(&items[0], &Value::Nil);
        }
        let total = items.len() as u64 + 1;
        let class = SizeClass::from_len(total);
        self.write_byte(header::CONTAINER | header::CONTAINER_LIST | class.bits());
        self.write_bytes(&class.encode_len(total));
        for item in items {
            self.write_value(item)?;
        }
        self.write_value(&Value::Nil)
    }

    fn write_dotted_list(&mut self, items: &[Value], tail: &Value) -> Result<()> {
        if items.is_empty() {
            return self.write_value(tail);
        }
        if items.len() == 1 {
            return self.write_cons_cells(&items[0], tail);
        }
        let total = items.len() as u64 + 1;
        let class = SizeClass::from_len(total);
        self.write_byte(header::CONTAINER | header::CONTAINER_LIST | class.bits());
        self.write_bytes(&class.encode_len(total));
        for item in items {
            self.write_value(item)?;
        }
        self.write_value(tail)
    }

    fn write_cons_cells(&mut self, car: &Value, cdr: &Value) -> Result<()> {
        self.write_byte(header::CONS);
        self.write_value(car)?;
        self.write_value(cdr)
    }

    fn write_map_values(
        &mut self,
        entries: &[(Value, Value)],
        header_kind: Option<u8>,
        type_symbol: Option<&Symbol>,
    ) -> Result<()> {
        let total = entries.len() as u64;
        if let Some(kind) = header_kind {
            let class = SizeClass::from_len(total);
            self.write_byte(header::CONTAINER | kind | class.bits());
            self.write_bytes(&class.encode_len(total));
        }
        if let Some(sym) = type_symbol {
            self.write_value(&Value::Symbol(sym.clone()))?;
        }
        for (k, v) in entries {
            self.write_map_key(k, type_symbol)?;
            self.write_value(v)?;
        }
        Ok(())
    }

    fn write_map_key(&mut self, key: &Value, type_symbol: Option<&Symbol>) -> Result<()> {
        match key {
            Value::Str(s) => {
                let new_key = rewrite_key(s, self.opts.no_sub_underscores);
                let symbol = match type_symbol {
                    Some(ts) => self.opts.symbols.intern(&new_key, &ts.package, false),
                    None => self.opts.symbols.keyword(&new_key, false),
                };
                self.write_value(&Value::Symbol(symbol))
            }
            other => self.write_value(other),
        }
    }

    fn write_package(&mut self, name: &str) -> Result<()> {
        self.write_byte(header::PACKAGE);
        self.write_value(&Value::Str(name.to_string()))
    }

    fn write_symbol(&mut self, sym: &Symbol) -> Result<()> {
        if let Some(index) = self.opts.index.clone() {
            if let Some(idx) = index.position_of(&Value::Symbol(sym.clone())) {
                return self.write_index(idx);
            }
        }
        if self.opts.symbols.is_keyword(sym) {
            self.write_byte(header::SYMBOL | header::SYMBOL_KEYWORD);
            return self.write_value(&Value::Str(sym.name.clone()));
        }
        self.write_byte(header::SYMBOL);
        self.write_value(&Value::Str(sym.name.clone()))?;
        self.write_package(&sym.package)
    }

    fn write_pointer(&mut self, val: u64) -> Result<()> {
        let class = SizeClass::from_len(val);
        self.write_byte(header::POINTER | class.bits());
        self.write_bytes(&class.encode_len(val));
        Ok(())
    }

    fn write_remote_ref(&mut self, inner: &Value) -> Result<()> {
        self.write_byte(header::REMOTE_REF);
        self.write_value(inner)
    }

    fn write_index(&mut self, val: u64) -> Result<()> {
        if val < 16 {
            self.write_byte(header::INDEX | header::REFTAG_INLINE | val as u8);
            return Ok(());
        }
        let class = SizeClass::from_len(val);
        self.write_byte(header::INDEX | class.bits());
        self.write_bytes(&class.encode_len(val));
        Ok(())
    }

    fn write_tag(&mut self, tag: u64) {
        if tag < 16 {
            self.write_byte(header::TAG | header::REFTAG_INLINE | tag as u8);
        } else {
            let class = SizeClass::from_len(tag);
            self.write_byte(header::TAG | class.bits());
            self.write_bytes(&class.encode_len(tag));
        }
    }

    fn write_ref(&mut self, tag: u64) {
        if tag < 16 {
            self.write_byte(header::REF | header::REFTAG_INLINE | tag as u8);
        } else {
            let class = SizeClass::from_len(tag);
            self.write_byte(header::REF | class.bits());
            self.write_bytes(&class.encode_len(tag));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn encode(val: &Value, opts: EncodeOptions) -> Vec<u8> {
        let mut enc = Encoder::new(opts);
        enc.encode(val).unwrap();
        enc.into_bytes()
    }

    #[test]
    fn nil_is_one_byte() {
        assert_eq!(encode(&Value::Nil, EncodeOptions::new()), vec![0x00]);
    }

    #[test]
    fn true_is_bool_header_with_truth_bit() {
        assert_eq!(encode(&Value::Bool(true), EncodeOptions::new()), vec![0x01]);
    }

    #[test]
    fn int8_and_int16_narrowing() {
        assert_eq!(encode(&Value::Int(42), EncodeOptions::new()), vec![0x10, 0x2A]);
        assert_eq!(
            encode(&Value::Int(300), EncodeOptions::new()),
            vec![0x11, 0x01, 0x2C]
        );
    }

    #[test]
    fn single_char_string_is_character_by_default() {
        assert_eq!(
            encode(&Value::string("A"), EncodeOptions::new()),
            vec![0x84, 0x41]
        );
    }

    #[test]
    fn single_char_strings_flag_forces_string_header() {
        let opts = EncodeOptions::new().single_char_strings(true);
        assert_eq!(encode(&Value::string("A"), opts), vec![0x40, 0x01, 0x41]);
    }

    #[test]
    fn shared_symbol_emits_tag_then_ref() {
        let symbols = SymbolTable::new();
        let sym = Value::Symbol(symbols.intern("FOO", "CL-USER", true));
        let shared = Value::shared(sym);
        let root = Value::List(vec![shared.clone(), shared]);
        let bytes = encode(&root, EncodeOptions::new());
        // tag header (inline, tag 0) appears once before the symbol body,
        // and a ref header (inline, tag 0) appears for the second slot.
        assert!(bytes.contains(&0xF0)); // TAG | REFTAG_INLINE | 0
        assert!(bytes.contains(&0x70)); // REF | REFTAG_INLINE | 0
    }

    #[test]
    fn cyclic_shared_value_encodes_without_looping() {
        let cell = Rc::new(RefCell::new(Value::Nil));
        let shared = Value::Shared(cell.clone());
        *cell.borrow_mut() = Value::List(vec![shared.clone()]);
        let bytes = encode(&shared, EncodeOptions::new());
        assert!(!bytes.is_empty());
    }

    #[test]
    fn map_key_underscore_rewrite() {
        let symbols = Arc::new(SymbolTable::new());
        let opts = EncodeOptions::new().symbols(symbols.clone());
        let root = Value::Map(vec![(Value::string("foo_bar"), Value::Int(1))]);
        let _ = encode(&root, opts);
        let sym = symbols.intern("FOO-BAR", "KEYWORD", true);
        assert_eq!(sym.name, "FOO-BAR");
    }

    #[test]
    fn fixed_vector_packs_raw_bytes() {
        let items: Vec<Value> = (0..4u8).map(|n| Value::Int(n as i128)).collect();
        let bytes = encode(&Value::Vector(items), EncodeOptions::new());
        // CONTAINER|VECTOR|FIXED header, 1-byte length, 1 type byte, 4 payload bytes
        assert_eq!(bytes[0], header::CONTAINER | header::CONTAINER_VECTOR | header::CONTAINER_FIXED);
        assert_eq!(bytes[1], 4);
        assert_eq!(bytes[2], header::NUMBER | header::UINT8);
        assert_eq!(&bytes[3..], &[0, 1, 2, 3]);
    }
}
