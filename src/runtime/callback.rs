use crate::runtime::stack::ConvStack;

/// Host side of a running conversation.
pub trait CodeCallback {
    /// Print string `text_id` of the conversation's string block.
    fn say(&mut self, text_id: u16);

    /// Offer the given string ids as answers; returns the 1-based choice.
    fn menu(&mut self, choice_ids: &[u16]) -> u16;

    /// Run an imported function other than the menu ones.
    ///
    /// The word at the stack pointer is the argument count; arguments are
    /// addresses stored below it, first argument at `sp - 1`.
    fn call_external(&mut self, name: &str, stack: &mut ConvStack) -> u16;

    /// Initial value of an imported global.
    fn get_global(&mut self, name: &str) -> u16 {
        tracing::debug!(global = name, "no host value for imported global");
        0
    }

    /// Called when the conversation stores to an imported global.
    fn set_global(&mut self, name: &str, value: u16) {
        tracing::debug!(global = name, value, "imported global written");
    }
}

/// Reads argument `index` (0-based) of an imported-function call: the word the
/// argument's address points at.
pub fn call_argument(stack: &ConvStack, index: u16) -> Option<u16> {
    let sp = stack.stack_pointer();
    let slot = sp.checked_sub(index.checked_add(1)?)?;
    let addr = stack.get(slot).ok()?;
    stack.get(addr).ok()
}

/// Number of arguments of an imported-function call.
pub fn call_argument_count(stack: &ConvStack) -> u16 {
    stack.top().unwrap_or(0)
}
