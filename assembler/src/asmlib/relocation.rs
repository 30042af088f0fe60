//! Relocations: named transforms applied to a resolved symbol value
//! before it is encoded into an immediate field.

/// `handle(resolved_value, instruction_address)`; the result is what
/// actually gets encoded.
pub type RelocationHandler = fn(value: i64, address: u64) -> Result<i64, String>;

pub struct Relocation {
    name: String,
    handler: RelocationHandler,
}

impl Relocation {
    pub fn new(name: &str, handler: RelocationHandler) -> Relocation {
        Relocation {
            name: name.to_string(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handle(&self, value: i64, address: u64) -> Result<i64, String> {
        (self.handler)(value, address)
    }
}

impl std::fmt::Debug for Relocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relocation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
