pub mod use_cases;

pub use use_cases::event_description::{EventDescriptionUseCase, PipelineSettings};
