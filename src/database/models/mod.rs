pub mod prediction;
pub mod quote;

pub use prediction::{InactivePrediction, NewPrediction, Prediction, RankedPrediction};
pub use quote::{DepthLevel, NewQuote, Quote, MAX_DEPTH_LEVELS};
