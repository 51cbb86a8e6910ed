use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use conspack::{decode_file, DecodeOptions, Value};

/// Inspect conspack-encoded files
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename to parse
    #[arg(short, long)]
    input: PathBuf,
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode the file and print the resulting value tree
    Dump,
    /// Decode the file and print a one-line summary of its shape
    Describe,
}

fn dump(args: &Args) -> Result<()> {
    let value = decode_file(&args.input, DecodeOptions::new())?;
    println!("{value:#?}");
    Ok(())
}

fn describe(args: &Args) -> Result<()> {
    let value = decode_file(&args.input, DecodeOptions::new())?;
    println!("{}", shape(&value));
    Ok(())
}

fn shape(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => format!("bool({b})"),
        Value::Int(n) => format!("int({n})"),
        Value::Float(_) => "float".to_string(),
        Value::Str(s) => format!("string[{}]", s.len()),
        Value::Char(_) => "character".to_string(),
        Value::Vector(items) => format!("vector[{}]", items.len()),
        Value::List(items) => format!("list[{}]", items.len()),
        Value::DottedList(items, _) => format!("dotted-list[{}]", items.len()),
        Value::Map(entries) => format!("map[{}]", entries.len()),
        Value::Cons(_, _) => "cons".to_string(),
        Value::Symbol(sym) => format!("symbol({}::{})", sym.package, sym.name),
        Value::Package(name) => format!("package({name})"),
        Value::Pointer(p) => format!("pointer({p})"),
        Value::RemoteRef(_) => "remote-ref".to_string(),
        Value::Index(i) => format!("index({i})"),
        Value::TaggedObject(tm) => {
            format!("tmap({}::{})[{}]", tm.type_symbol.package, tm.type_symbol.name, tm.entries.len())
        }
        Value::Shared(cell) => format!("shared -> {}", shape(&cell.borrow())),
        Value::Pending(tag) => format!("pending({tag})"),
        Value::Native(_) => "native".to_string(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.operation {
        Operation::Dump => dump(&args),
        Operation::Describe => describe(&args),
    }
}
