mod model_variant;

pub use model_variant::ModelVariant;
