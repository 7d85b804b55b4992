pub mod centroid;
pub mod speaker;

pub use centroid::DigitCentroid;
pub use speaker::{PinDigest, Speaker};
