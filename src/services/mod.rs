pub mod analysis;
pub mod estimates;
pub mod field_extractors;
pub mod incentives;
pub mod openai;
pub mod processor;
pub mod production_sim;
pub mod roof_potential;
pub mod synthetic;
pub mod text_extraction;
