mod rect;
mod repeat;
mod vector;

pub use rect::{Point, Rect};
pub use repeat::RepeatFilter;
pub use vector::Vector2D;
