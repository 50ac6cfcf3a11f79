/// Port and signal types for module interconnection

/// A clocked hardware block.
///
/// `tick` advances one clock edge; `reset` returns the block to its power-on state.
pub trait Module {
  fn tick(&mut self);
  fn reset(&mut self);
  fn name(&self) -> &str;
}

/// A wire/signal that carries data between modules.
/// Every signal carries a valid flag; consumers ignore `value` while `valid` is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wire<T: Clone> {
  pub value: T,
  pub valid: bool,
}

impl<T: Clone> Wire<T> {
  pub fn new(value: T) -> Self {
    Self { value, valid: false }
  }

  pub fn set(&mut self, value: T) {
    self.value = value;
    self.valid = true;
  }

  pub fn clear(&mut self) {
    self.valid = false;
  }
}

impl<T: Clone + Default> Default for Wire<T> {
  fn default() -> Self {
    Self {
      value: T::default(),
      valid: false,
    }
  }
}
