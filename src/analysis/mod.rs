mod classifier;
mod typing;

pub use classifier::{assess, ClassifierConfig, ContentAssessment};
pub use typing::TypingAnalyzer;
