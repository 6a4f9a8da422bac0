//! Collect, normalize, dedupe, segment, rank and generate, one stage at a time.

pub mod collect;
pub mod dedup;
pub(crate) mod executor;
pub mod generate;
pub mod invariants;
pub mod normalize;
pub mod orchestrator;
pub mod rank;
pub mod run;
pub mod segment;

pub use collect::{CollectSettings, CollectStage, CollectionOutcome, SourceCollectStage};
pub use executor::RankingArtifact;
pub use generate::{BulletinGenerateStage, GenerateSettings, GenerateStage, GenerationOutcome};
pub use normalize::Article;
pub use orchestrator::{PipelineBuilder, PipelineOrchestrator};
pub use run::{FailureKind, PipelineRun, PipelineStage, RunCommand, RunContext, RunStatus};
