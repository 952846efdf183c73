use super::{Object, Value};
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

/// Hashable projection of a key. Numbers that compare equal share a key
/// (`1`, `1.0` and `True`); objects without value semantics hash by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Complex(u64, u64),
    Str(String),
    Tuple(Vec<HashKey>),
    Ident(usize),
}

impl HashKey {
    pub fn of(value: &Value) -> RtResult<HashKey> {
        Ok(match value.obj() {
            Object::None => HashKey::None,
            Object::Bool(b) => HashKey::Int(*b as i64),
            Object::Int(i) => HashKey::Int(*i),
            Object::Float(f) => float_key(*f),
            Object::Complex(re, im) if *im == 0.0 => float_key(*re),
            Object::Complex(re, im) => HashKey::Complex(re.to_bits(), im.to_bits()),
            Object::Str(s) => HashKey::Str(s.clone()),
            Object::Tuple(items) => HashKey::Tuple(items.iter().map(HashKey::of).collect::<RtResult<_>>()?),
            Object::List(_) | Object::Dict(_) | Object::Slice(_) => {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("unhashable type: '{}'", value.type_name()),
                ));
            }
            _ => HashKey::Ident(value.id()),
        })
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f.abs() < 9.0e18 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

/// Insertion-ordered mapping.
#[derive(Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: FastHashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: fast_hash_map_new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> RtResult<Option<Value>> {
        let hk = HashKey::of(key)?;
        Ok(self.index.get(&hk).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value) -> RtResult<bool> {
        Ok(self.index.contains_key(&HashKey::of(key)?))
    }

    /// Inserts or replaces. An existing entry keeps its original key object.
    pub fn insert(&mut self, key: Value, value: Value) -> RtResult<()> {
        let hk = HashKey::of(&key)?;
        match self.index.get(&hk) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> RtResult<Option<Value>> {
        let hk = HashKey::of(key)?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn entry_at(&self, pos: usize) -> Option<&(Value, Value)> {
        self.entries.get(pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
