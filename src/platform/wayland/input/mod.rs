mod keyboard;
pub mod pointer;

pub use keyboard::Keyboard;
pub use pointer::Pointer;
