//! Cross-module round-trip and end-to-end scenario tests driven entirely
//! through the public API (`encode_to_vec`/`decode_from_slice`/etc.),
//! complementing the unit tests inside each module.

use std::sync::Arc;

use rstest::rstest;

use crate::header;
use crate::index_table::{IndexItem, IndexTable};
use crate::symbols::SymbolTable;
use crate::value::{TaggedMap, Value};
use crate::{
    decode_file, decode_from_slice, deregister, encode_file, encode_to_vec, register,
    DecodeOptions, EncodeOptions,
};

#[rstest]
#[case(Value::Nil, vec![0x00])]
#[case(Value::Int(42), vec![0x10, 0x2A])]
#[case(Value::Int(300), vec![0x11, 0x01, 0x2C])]
#[case(Value::string("A"), vec![0x84, 0x41])]
fn byte_exact_scenarios(#[case] value: Value, #[case] expected: Vec<u8>) {
    let bytes = encode_to_vec(&value, EncodeOptions::new()).unwrap();
    assert_eq!(bytes, expected);
    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    assert_eq!(decoded, value);
}

/// `true` is only required to carry the bool header with its truth bit set
/// and round-trip; whether an implementation emits that as one byte or as
/// a leading nil-header byte plus a truth byte is not specified.
#[test]
fn true_round_trips_through_the_bool_header() {
    let bytes = encode_to_vec(&Value::Bool(true), EncodeOptions::new()).unwrap();
    assert!(bytes.iter().any(|&b| (b & header::BOOL_MASK) == header::BOOL && (b & 0x01) != 0));
    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    assert_eq!(decoded, Value::Bool(true));
}

#[test]
fn single_char_strings_flag_disables_character_packing() {
    let opts = EncodeOptions::new().single_char_strings(true);
    let bytes = encode_to_vec(&Value::string("A"), opts).unwrap();
    assert_eq!(bytes, vec![0x40, 0x01, 0x41]);
}

#[test]
fn shared_symbol_emits_one_tag_and_one_ref() {
    let symbols = SymbolTable::new();
    let sym = Value::Symbol(symbols.intern("FOO", "CL-USER", true));
    let shared = Value::shared(sym);
    let root = Value::List(vec![shared.clone(), shared]);

    let bytes = encode_to_vec(&root, EncodeOptions::new().symbols(Arc::new(symbols))).unwrap();
    assert_eq!(bytes.iter().filter(|&&b| b == 0xF0).count(), 1);
    assert_eq!(bytes.iter().filter(|&&b| b == 0x70).count(), 1);

    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    let Value::List(items) = decoded else {
        panic!("expected a list");
    };
    let (Value::Shared(a), Value::Shared(b)) = (&items[0], &items[1]) else {
        panic!("expected shared slots");
    };
    assert!(std::rc::Rc::ptr_eq(a, b));
}

#[test]
fn cyclic_list_round_trips_to_a_self_referential_value() {
    let cell = std::rc::Rc::new(std::cell::RefCell::new(Value::Nil));
    let shared = Value::Shared(cell.clone());
    *cell.borrow_mut() = Value::List(vec![shared.clone()]);

    let bytes = encode_to_vec(&shared, EncodeOptions::new()).unwrap();
    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    let Value::Shared(outer) = &decoded else {
        panic!("expected the root to decode to a shared cell");
    };
    let Value::List(items) = &*outer.borrow() else {
        panic!("expected a one-element list");
    };
    let Value::Shared(inner) = &items[0] else {
        panic!("expected the single element to be shared");
    };
    assert!(std::rc::Rc::ptr_eq(outer, inner));
}

#[test]
fn dotted_list_of_three_keeps_its_improper_tail() {
    let val = Value::DottedList(vec![Value::Int(1), Value::Int(2)], Box::new(Value::Int(3)));
    let bytes = encode_to_vec(&val, EncodeOptions::new()).unwrap();
    assert_eq!(
        bytes[0],
        header::CONTAINER | header::CONTAINER_LIST | header::SizeClass::Size8.bits()
    );
    assert_eq!(bytes[1], 3);
    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    assert_eq!(decoded, val);
}

struct Point {
    x: i64,
    y: i64,
}

/// Drives a native `Point` through a registered encode hook (`Value::native`
/// forces the hook to run, rather than hand-building the resulting tmap) and
/// back through the matching decode hook.
#[test]
fn typed_map_round_trips_through_registered_hooks() {
    let symbols = SymbolTable::new();
    let point_symbol = symbols.intern("POINT", "CL-USER", true);

    register::<Point>(
        point_symbol,
        |p| {
            Ok(vec![
                ("x".to_string(), Value::Int(p.x as i128)),
                ("y".to_string(), Value::Int(p.y as i128)),
            ])
        },
        |entries| {
            let mut x = 0i64;
            let mut y = 0i64;
            for (k, v) in entries {
                if let (Value::Symbol(sym), Value::Int(n)) = (k, v) {
                    match sym.name.as_str() {
                        "X" => x = *n as i64,
                        "Y" => y = *n as i64,
                        _ => {}
                    }
                }
            }
            Ok(Point { x, y })
        },
    );

    let root = Value::native(Point { x: 7, y: -3 });
    let opts = EncodeOptions::new().symbols(Arc::new(symbols));
    let bytes = encode_to_vec(&root, opts).unwrap();

    let decoded = decode_from_slice(&bytes, DecodeOptions::new()).unwrap();
    let Value::TaggedObject(tm) = decoded else {
        panic!("expected a tagged object");
    };
    assert_eq!(tm.type_symbol.name, "POINT");
    assert_eq!(tm.type_symbol.package, "CL-USER");
    let point = tm.downcast::<Point>().expect("hook should have run");
    assert_eq!(point.x, 7);
    assert_eq!(point.y, -3);

    deregister::<Point>();
}

#[test]
fn encoding_an_unregistered_native_type_reports_no_encoder() {
    struct Unregistered;
    let err = encode_to_vec(&Value::native(Unregistered), EncodeOptions::new()).unwrap_err();
    let downcast = err
        .downcast_ref::<crate::error::ConspackError>()
        .expect("should be a ConspackError");
    assert_eq!(downcast.kind, crate::error::ConspackErrorKind::NoEncoder);
}

#[test]
fn encoding_a_repeated_shared_value_under_norefs_reports_bad_value_instead_of_panicking() {
    let shared = Value::shared(Value::Int(1));
    let root = Value::List(vec![shared.clone(), shared]);
    let err = encode_to_vec(&root, EncodeOptions::new().norefs(true)).unwrap_err();
    let downcast = err
        .downcast_ref::<crate::error::ConspackError>()
        .expect("should be a ConspackError");
    assert_eq!(downcast.kind, crate::error::ConspackErrorKind::BadValue);
}

#[test]
fn tag_numbers_are_dense_from_zero() {
    let symbols = SymbolTable::new();
    let a = Value::shared(Value::Symbol(symbols.intern("A", "CL-USER", true)));
    let b = Value::shared(Value::Symbol(symbols.intern("B", "CL-USER", true)));
    let root = Value::List(vec![a.clone(), a, b.clone(), b]);
    let bytes = encode_to_vec(&root, EncodeOptions::new().symbols(Arc::new(symbols))).unwrap();
    // Two distinct tagged objects: tag 0 and tag 1 must both appear.
    assert!(bytes.contains(&0xF0));
    assert!(bytes.contains(&0xF1));
}

#[test]
fn map_key_normalization_matches_default_and_override_flags() {
    let symbols = Arc::new(SymbolTable::new());
    let root = Value::Map(vec![
        (Value::string("foo_bar"), Value::Int(1)),
        (Value::string("_private"), Value::Int(2)),
    ]);
    let opts = EncodeOptions::new().symbols(symbols.clone());
    let _ = encode_to_vec(&root, opts).unwrap();
    assert!(symbols.intern("FOO-BAR", "KEYWORD", true).name == "FOO-BAR");
    assert!(symbols.intern("_PRIVATE", "KEYWORD", true).name == "_PRIVATE");

    let no_rewrite_symbols = Arc::new(SymbolTable::new());
    let opts = EncodeOptions::new()
        .symbols(no_rewrite_symbols.clone())
        .no_sub_underscores(true);
    let _ = encode_to_vec(&root, opts).unwrap();
    assert!(no_rewrite_symbols
        .intern("FOO_BAR", "KEYWORD", true)
        .name
        == "FOO_BAR");
}

#[test]
fn index_table_replaces_known_symbols_with_their_position() {
    let symbols = Arc::new(SymbolTable::new());
    let table = IndexTable::new(&symbols, ["foo", "bar"].map(IndexItem::from));
    let opts = EncodeOptions::new().symbols(symbols.clone()).index(table);
    let bytes = encode_to_vec(&Value::keyword(&symbols, "bar"), opts).unwrap();
    // INDEX header, inline value 1.
    assert_eq!(bytes, vec![header::INDEX | header::REFTAG_INLINE | 0x01]);

    let decode_table = Arc::new(IndexTable::new(&symbols, ["foo", "bar"].map(IndexItem::from)));
    let decoded =
        decode_from_slice(&bytes, DecodeOptions::new().index(decode_table)).unwrap();
    assert_eq!(decoded, Value::keyword(&symbols, "bar"));
}

#[test]
fn file_round_trip_writes_and_reads_back_the_same_value() {
    let mut path = std::env::temp_dir();
    path.push(format!("conspack-test-{}.bin", std::process::id()));
    let value = Value::List(vec![Value::Int(1), Value::string("hi"), Value::Bool(true)]);

    encode_file(&path, &value, EncodeOptions::new()).unwrap();
    let decoded = decode_file(&path, DecodeOptions::new()).unwrap();
    assert_eq!(decoded, value);

    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_type_hook_reports_no_decoder() {
    let symbols = SymbolTable::new();
    let ts = symbols.intern("UNREGISTERED-ANONYMOUS-THING", "CL-USER", true);
    let root = Value::TaggedObject(TaggedMap::new(
        ts,
        vec![(Value::keyword(&symbols, "x"), Value::Int(1))],
    ));
    let bytes = encode_to_vec(&root, EncodeOptions::new().symbols(Arc::new(symbols))).unwrap();

    let err = decode_from_slice(
        &bytes,
        DecodeOptions::new().registry(Arc::new(std::sync::Mutex::new(
            crate::registry::TypeRegistry::new(),
        ))),
    )
    .unwrap_err();
    let downcast = err
        .downcast_ref::<crate::error::ConspackError>()
        .expect("should be a ConspackError");
    assert_eq!(downcast.kind, crate::error::ConspackErrorKind::NoDecoder);
}
