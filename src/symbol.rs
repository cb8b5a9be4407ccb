//! Symbols shared between the assembler, the assembled program, and the
//! stack-trace type model.
//!
//! A symbol is either undefined (referenced but never given a value), singly
//! defined, or multiply defined. Multiple definition is a hard error at the
//! end of assembly, but the table never decides that on its own; the
//! assembler calls [`SymbolEntry::set_multiply_defined`] when it sees a
//! second definition, because relocation legitimately rewrites values in
//! place.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Longest permitted symbol name.
pub const MAX_SYMBOL_LEN: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DefState {
    Undefined,
    Single,
    Multiple,
}

/// The value bound to a symbol.
///
/// `Location` values denote memory addresses and move during `.BURN`
/// relocation; `Numeric` values come from `.EQUATE` and are immovable;
/// `External` values are imported from another program's table (the
/// operating system's `charIn`/`charOut`) and are likewise immovable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolValue {
    Empty,
    Numeric(u16),
    Location(u16),
    External(u16),
}

impl SymbolValue {
    pub fn word(self) -> u16 {
        match self {
            SymbolValue::Empty => 0,
            SymbolValue::Numeric(v) | SymbolValue::Location(v) | SymbolValue::External(v) => v,
        }
    }

    pub fn can_relocate(self) -> bool {
        match self {
            SymbolValue::Location(_) => true,
            _ => false,
        }
    }

    pub fn is_location(self) -> bool {
        self.can_relocate()
    }
}

#[derive(Clone, Debug)]
pub struct SymbolEntry {
    name: String,
    value: SymbolValue,
    state: DefState,
}

impl SymbolEntry {
    fn new(name: &str) -> SymbolEntry {
        SymbolEntry {
            name: name.to_string(),
            value: SymbolValue::Empty,
            state: DefState::Undefined,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u16 {
        self.value.word()
    }

    pub fn raw_value(&self) -> SymbolValue {
        self.value
    }

    /// Binds a value, moving an undefined symbol to singly defined. An empty
    /// value moves it back. A multiply defined symbol stays multiply defined.
    pub fn set_value(&mut self, value: SymbolValue) {
        self.value = value;
        if self.state != DefState::Multiple {
            self.state = match value {
                SymbolValue::Empty => DefState::Undefined,
                _ => DefState::Single,
            };
        }
    }

    pub fn set_multiply_defined(&mut self) {
        self.state = DefState::Multiple;
    }

    pub fn def_state(&self) -> DefState {
        self.state
    }

    pub fn is_defined(&self) -> bool {
        self.state == DefState::Single
    }

    pub fn is_undefined(&self) -> bool {
        self.state == DefState::Undefined
    }

    pub fn is_multiply_defined(&self) -> bool {
        self.state == DefState::Multiple
    }
}

impl fmt::Display for SymbolEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({} => {:04X})", self.name, self.value())
    }
}

/// Shared handle to a symbol. Instructions, trace types, and the table all
/// hold the same entry.
pub type SymbolRef = Rc<RefCell<SymbolEntry>>;

/// Symbol table for one program. Keeps insertion order for listings.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolRef>,
    order: Vec<SymbolRef>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        Default::default()
    }

    /// Returns the existing entry for `name`, or creates an undefined shell.
    pub fn insert(&mut self, name: &str) -> SymbolRef {
        if let Some(existing) = self.entries.get(name) {
            return Rc::clone(existing);
        }
        let entry = Rc::new(RefCell::new(SymbolEntry::new(name)));
        self.entries.insert(name.to_string(), Rc::clone(&entry));
        self.order.push(Rc::clone(&entry));
        entry
    }

    pub fn get(&self, name: &str) -> Option<SymbolRef> {
        self.entries.get(name).map(Rc::clone)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Binds a value, creating the symbol first if needed.
    pub fn set_value(&mut self, name: &str, value: SymbolValue) -> SymbolRef {
        let entry = self.insert(name);
        entry.borrow_mut().set_value(value);
        entry
    }

    pub fn num_undefined(&self) -> usize {
        self.order
            .iter()
            .filter(|s| s.borrow().is_undefined())
            .count()
    }

    /// Shifts every location-valued symbol by `delta`. Numeric and external
    /// values do not move.
    pub fn apply_offset(&mut self, delta: u16) {
        for entry in &self.order {
            let mut entry = entry.borrow_mut();
            if let SymbolValue::Location(addr) = entry.raw_value() {
                entry.set_value(SymbolValue::Location(addr.wrapping_add(delta)));
            }
        }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolRef> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.insert("main");
        let b = table.insert("main");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn definition_states() {
        let mut table = SymbolTable::new();
        let sym = table.insert("num");
        assert!(sym.borrow().is_undefined());
        assert_eq!(table.num_undefined(), 1);

        sym.borrow_mut().set_value(SymbolValue::Location(0x10));
        assert!(sym.borrow().is_defined());
        assert_eq!(table.num_undefined(), 0);

        sym.borrow_mut().set_multiply_defined();
        assert!(sym.borrow().is_multiply_defined());
        // A later rebind does not hide the multiple definition.
        sym.borrow_mut().set_value(SymbolValue::Location(0x20));
        assert!(sym.borrow().is_multiply_defined());
    }

    #[test]
    fn offset_moves_only_locations() {
        let mut table = SymbolTable::new();
        table.set_value("code", SymbolValue::Location(0x0010));
        table.set_value("konst", SymbolValue::Numeric(0x0010));
        table.set_value("port", SymbolValue::External(0x0010));
        table.apply_offset(0x1000);
        assert_eq!(table.get("code").unwrap().borrow().value(), 0x1010);
        assert_eq!(table.get("konst").unwrap().borrow().value(), 0x0010);
        assert_eq!(table.get("port").unwrap().borrow().value(), 0x0010);
    }

    #[test]
    fn shared_entries_observe_updates() {
        let mut table = SymbolTable::new();
        let held = table.insert("end");
        table.set_value("end", SymbolValue::Location(42));
        assert_eq!(held.borrow().value(), 42);
    }
}
