//! Signal processing front end: noise filtering and the MFCC transform.
//!
//! Both stages run on the pipeline thread (or the training binary), never in
//! the audio callback, so they are free to allocate.

pub mod filter;
pub mod mfcc;

pub use filter::NoiseFilter;
pub use mfcc::Mfcc;
