pub mod destination;
pub mod item;

pub use destination::{Destination, Source};
pub use item::Item;
