use crate::runtime::runtime_error::StackFault;

/// Stack pointer value of an empty stack.
pub const EMPTY: u16 = 0xffff;

/// Fixed-capacity word stack. The stack pointer addresses the last pushed word.
#[derive(Debug, Clone)]
pub struct ConvStack {
    words: Vec<u16>,
    sp: u16,
}

impl Default for ConvStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvStack {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            sp: EMPTY,
        }
    }

    pub fn with_capacity(capacity: u16) -> Self {
        let mut stack = Self::new();
        stack.init(capacity);
        stack
    }

    /// Clear and resize; all words become zero.
    pub fn init(&mut self, capacity: u16) {
        self.words.clear();
        self.words.resize(capacity as usize, 0);
        self.sp = EMPTY;
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn push(&mut self, value: u16) -> Result<(), StackFault> {
        let next = self.sp.wrapping_add(1);
        if next as usize >= self.words.len() {
            return Err(StackFault::Overflow {
                capacity: self.words.len(),
            });
        }
        self.sp = next;
        self.words[next as usize] = value;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u16, StackFault> {
        let value = *self
            .words
            .get(self.sp as usize)
            .ok_or(StackFault::Underflow)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(value)
    }

    pub fn top(&self) -> Result<u16, StackFault> {
        self.words
            .get(self.sp as usize)
            .copied()
            .ok_or(StackFault::Underflow)
    }

    pub fn get(&self, pos: u16) -> Result<u16, StackFault> {
        self.words
            .get(pos as usize)
            .copied()
            .ok_or(StackFault::OutOfRange {
                pos,
                capacity: self.words.len(),
            })
    }

    pub fn set(&mut self, pos: u16, value: u16) -> Result<(), StackFault> {
        let capacity = self.words.len();
        let slot = self
            .words
            .get_mut(pos as usize)
            .ok_or(StackFault::OutOfRange { pos, capacity })?;
        *slot = value;
        Ok(())
    }

    pub fn stack_pointer(&self) -> u16 {
        self.sp
    }

    /// Accepts any slot, one past the end, or the empty sentinel.
    pub fn set_stack_pointer(&mut self, value: u16) -> Result<(), StackFault> {
        if value != EMPTY && value as usize > self.words.len() {
            return Err(StackFault::InvalidPointer {
                value,
                capacity: self.words.len(),
            });
        }
        self.sp = value;
        Ok(())
    }
}
