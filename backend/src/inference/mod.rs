pub mod model;
pub mod preprocess;
pub mod result;
#[cfg(feature = "torch")]
pub mod torch;
