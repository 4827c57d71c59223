use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// FNV-1a, computed once at interning time and cached on the `Str`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// An interned string object: `(length, bytes, hash)`. Two `Str`s with equal content
/// are never allocated twice for the lifetime of the owning `Interner` — pointer
/// (`Rc`) identity and content equality coincide.
pub struct Str {
    bytes: Box<str>,
    hash: u64,
}

impl Str {
    pub fn as_str(&self) -> &str {
        &self.bytes
    }

    /// Byte length, matching the source's `String_Object::length` (a C `char` is a
    /// byte, so multi-byte UTF-8 content counts as more than one "character" there).
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes)
    }
}

/// Content-based, not pointer-based — but since the `Interner` never hands out two
/// `Str`s for the same content, the two notions never actually diverge at run time.
impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Str {}

impl Hash for Str {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// Owns the process-lifetime (really: interpreter-lifetime) backing storage for every
/// string the program touches. One `Interner` per `Vm`/`Compiler` pair — see §5 of
/// SPEC_FULL.md on why this isn't a global.
#[derive(Default)]
pub struct Interner {
    table: HashMap<Box<str>, Rc<Str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> Rc<Str> {
        if let Some(existing) = self.table.get(text) {
            return Rc::clone(existing);
        }
        let hash = fnv1a(text.as_bytes());
        let str_obj = Rc::new(Str {
            bytes: text.into(),
            hash,
        });
        self.table.insert(text.into(), Rc::clone(&str_obj));
        str_obj
    }
}

/// The tagged-union runtime value. `String` borrows its backing bytes from the
/// interner; every other variant is plain data.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    String(Rc<Str>),
}

impl Value {
    /// The fixed-length (9-byte) type tag pushed by `OP_GET_TYPE`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::None => "NONE_TYPE",
            Value::Bool(_) => "BOOL_TYPE",
            Value::Number(_) => "NMBR_TYPE",
            Value::String(_) => "OSTR_TYPE",
        }
    }

    /// `OP_EQUAL` semantics: different types are never equal; strings compare by
    /// interned identity, not byte content (identity already implies content
    /// equality, since the interner only ever hands out one `Rc` per distinct text).
    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_by_content() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn distinct_content_is_not_shared() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("world");
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn equality_is_type_sensitive() {
        assert!(!Value::Number(0.0).values_equal(&Value::Bool(false)));
        assert!(Value::None.values_equal(&Value::None));
    }

    #[test]
    fn number_display_has_no_trailing_zeros() {
        assert_eq!(Value::Number(7.0).to_string(), "7");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
    }
}
