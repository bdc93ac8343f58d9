//! Knowledge base chat pipeline.

mod citation;
mod context;
mod coordinator;
mod envelope;
mod no_match;
mod pipeline;
mod prompt;


pub use citation::{download_url, format_citations, DOWNLOAD_ROUTE};
pub use context::build_context;
pub use coordinator::GenerationCoordinator;
pub use envelope::{error_payload, short_circuit_records, RecordReceiver, RecordSender, ResponseRecord};
pub use no_match::{Decision, NoMatchPolicy};
pub use pipeline::{ChatParams, KnowledgeBaseChat};
pub use prompt::{build_chat_request, render_template};
