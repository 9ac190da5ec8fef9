//! Plates, stackers and the carousel that holds them.

pub mod carousel;
pub mod plate;
pub mod stacker;

pub use carousel::{Carousel, PlateLayout, SharedCarousel};
pub use plate::{Plate, PlateKind, PlateLocation, PlateType, SlotAddress};
pub use stacker::{build_stacker, HotelStacker, SequentialStacker, Stacker, StackerKind};
