pub mod bedrock;
mod types;

pub use types::{FragmentStream, InferenceClient, TextFragment};
