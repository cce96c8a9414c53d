//! Slot storage for script locals
//!
//! A [`Slots`] container holds a script's local variables in a flat sequence of
//! 128-slot blocks. Each block carries a bitset of which slots have been
//! explicitly assigned, so an unset slot can fall back to a name lookup through
//! the scope chain. A logical index `i` always lives at block `i / 128`, offset
//! `i % 128`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::Val;

/// Number of slots per block
pub const BLOCK_SIZE: usize = 128;

/// Shared, mutable reference to a slot container owned by one invocation chain
pub type SlotsRef = Rc<RefCell<Slots>>;

/* ===================== Automatic Variables ===================== */

/// Variables every slot layout reserves, always at the same leading indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomaticVariable {
    /// `$_`, the current pipeline item
    Underbar,
    /// `$args`, arguments beyond the declared parameters
    Args,
    /// `$input`, the buffered pipeline input
    Input,
    /// `$this`
    This,
    /// `$BoundParameters`, explicitly bound parameters in binding order
    BoundParameters,
    /// `$CommandPath`, the script file being run
    CommandPath,
}

impl AutomaticVariable {
    pub const ALL: [AutomaticVariable; 6] = [
        AutomaticVariable::Underbar,
        AutomaticVariable::Args,
        AutomaticVariable::Input,
        AutomaticVariable::This,
        AutomaticVariable::BoundParameters,
        AutomaticVariable::CommandPath,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AutomaticVariable::Underbar => "_",
            AutomaticVariable::Args => "args",
            AutomaticVariable::Input => "input",
            AutomaticVariable::This => "this",
            AutomaticVariable::BoundParameters => "BoundParameters",
            AutomaticVariable::CommandPath => "CommandPath",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/* ===================== Layout ===================== */

/// Name to slot index mapping. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotLayout {
    names: IndexMap<String, usize>,
}

impl SlotLayout {
    /// Layout holding only the automatic variables (unoptimized tier)
    pub fn automatic() -> Self {
        Self::with_locals(std::iter::empty::<&str>())
    }

    /// Automatic variables followed by the given names; duplicates keep their
    /// first index.
    pub fn with_locals<I, S>(locals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut layout = SlotLayout::default();
        for auto in AutomaticVariable::ALL {
            layout.push(auto.name());
        }
        for name in locals {
            layout.push(name.as_ref());
        }
        layout
    }

    fn push(&mut self, name: &str) {
        let next = self.names.len();
        self.names.entry(name.to_ascii_lowercase()).or_insert(next);
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lowercased names in slot order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &IndexMap<String, usize> {
        &self.names
    }
}

/* ===================== Slots ===================== */

#[derive(Debug, Clone)]
struct SlotBlock {
    values: Vec<Val>,
    assigned: u128,
}

impl SlotBlock {
    fn new(len: usize) -> Self {
        Self {
            values: vec![Val::Null; len],
            assigned: 0,
        }
    }
}

/// Fixed-capacity, index-addressed variable storage
#[derive(Debug, Clone)]
pub struct Slots {
    layout: Arc<SlotLayout>,
    blocks: Vec<SlotBlock>,
    capacity: usize,
}

impl Slots {
    /// Storage sized to a layout
    pub fn new(layout: Arc<SlotLayout>) -> Self {
        let capacity = layout.len();
        Self::build(layout, capacity)
    }

    /// Anonymous storage of the given capacity; name lookups always miss
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Arc::new(SlotLayout::default()), capacity)
    }

    fn build(layout: Arc<SlotLayout>, capacity: usize) -> Self {
        let mut blocks = Vec::with_capacity(capacity.div_ceil(BLOCK_SIZE));
        let mut remaining = capacity;
        while remaining > 0 {
            let len = remaining.min(BLOCK_SIZE);
            blocks.push(SlotBlock::new(len));
            remaining -= len;
        }
        Self {
            layout,
            blocks,
            capacity,
        }
    }

    pub fn into_ref(self) -> SlotsRef {
        Rc::new(RefCell::new(self))
    }

    /// Physical (block, offset) of a logical index
    pub fn locate(index: usize) -> (usize, usize) {
        (index / BLOCK_SIZE, index % BLOCK_SIZE)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn layout(&self) -> &Arc<SlotLayout> {
        &self.layout
    }

    /// Value at `index`, or None when it was never assigned (or is out of range)
    pub fn get(&self, index: usize) -> Option<&Val> {
        if !self.is_set(index) {
            return None;
        }
        let (block, offset) = Self::locate(index);
        self.blocks[block].values.get(offset)
    }

    /// Store a value; returns false when `index` is outside the capacity
    pub fn set(&mut self, index: usize, value: Val) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (block, offset) = Self::locate(index);
        let block = &mut self.blocks[block];
        block.values[offset] = value;
        block.assigned |= 1u128 << offset;
        true
    }

    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (block, offset) = Self::locate(index);
        self.blocks[block].assigned & (1u128 << offset) != 0
    }

    /// Forget an assignment; the slot reads as unset afterwards
    pub fn clear(&mut self, index: usize) {
        if index >= self.capacity {
            return;
        }
        let (block, offset) = Self::locate(index);
        let block = &mut self.blocks[block];
        block.values[offset] = Val::Null;
        block.assigned &= !(1u128 << offset);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layout.index_of(name).is_some()
    }

    pub fn get_named(&self, name: &str) -> Option<&Val> {
        self.layout.index_of(name).and_then(|i| self.get(i))
    }

    /// Store by name; returns false when the layout has no such name
    pub fn set_named(&mut self, name: &str, value: Val) -> bool {
        match self.layout.index_of(name) {
            Some(i) => self.set(i, value),
            None => false,
        }
    }

    pub fn set_automatic(&mut self, var: AutomaticVariable, value: Val) {
        self.set(var.index(), value);
    }
}
