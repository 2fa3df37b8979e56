mod adapter;
mod backend;
pub mod backends;
mod preprocess;
mod result;

pub use adapter::{classification_from_scores, InferenceAdapter, ModelInfo};
pub use backend::{ClassifierBackend, ModelShape};
pub use backends::StubBackend;
pub use preprocess::{preprocess, ChannelOrder, InputSpec, InputTensor, TensorLayout};
pub use result::{ClassProbability, Classification, Detection};
