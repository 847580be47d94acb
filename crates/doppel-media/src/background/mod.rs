//! Optional background plate reconstruction.

mod inpaint;
mod plate;
mod reconstructor;

pub use inpaint::{inpaint, nearest_fill, InpaintError};
pub use plate::BackgroundPlate;
pub use reconstructor::BackgroundReconstructor;
