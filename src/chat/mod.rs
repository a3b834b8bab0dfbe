//! Retrieval-grounded chat over a creator's video library.
//!
//! A question is answered in four steps: resolve the session, retrieve and
//! rank relevant chunks, assemble a budgeted prompt, then stream the
//! completion while persisting the exchange with citations and cost.

pub mod context;
pub mod pricing;
pub mod service;
pub mod session;

pub use context::{BuiltContext, ContextBuilder};
pub use service::{
    ChatEvent, ChatModel, ChatOutcome, ChatRequest, ChatService, CompletionDelta, OpenAIChatModel,
    PromptMessages,
};
pub use session::SessionManager;
