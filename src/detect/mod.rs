//! Detection boundary: model backends, focal-region locators and the
//! acceptance filter applied to their output.

mod backend;
pub mod backends;
pub mod filter;
mod result;

pub use backend::{DetectorBackend, FocalRegionDetector, NoFocalRegion};
pub use backends::{FixedFocalRegions, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractFaceBackend};
pub use filter::DetectionFilter;
pub use result::{Detection, DetectionRequest, PERSON_CLASS_ID};
