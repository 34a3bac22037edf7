//! Train/eval mode switch
//!
//! Every layer is a candle [`Module`] with a training flag. Parameters live
//! in the `VarBuilder` backend the layer was built from (a `VarMap` when
//! training), so the trait only carries the mode. Composite layers forward
//! the switch to the layers they own.

use candle_core::Module;

pub trait Layer: Module {
    /// Switch between training (dropout active) and eval mode
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    fn train(&mut self) {
        self.set_training(true);
    }

    fn eval(&mut self) {
        self.set_training(false);
    }
}
