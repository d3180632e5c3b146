//! Concrete [`LanguageModel`](crate::provider::LanguageModel) implementations.

pub mod openai_compatible;
