//! Semantic layer: entity resolution, routing, and the resolver flow.

pub mod flow;
pub mod hints;
pub mod resolver;
pub mod router;

pub use flow::{SemanticFlow, SemanticRun, SpecialistReport};
pub use resolver::{CandidateEntity, CandidateSource, EntityOverride, SemanticContext, SemanticEntityResolver};
pub use router::{QueryRouter, Route};
