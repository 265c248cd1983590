//! `adw-agent`: driver for the external coding-agent CLI.
//!
//! ```text
//! InvocationRequest
//!     │
//!     ▼
//! ClaudeCli        ← spawns `claude --print --output-format stream-json …`
//!     │               prompt on stdin, env cleared to an allow-list
//!     ▼
//! run_streaming    ← appends every stdout line to raw_output.jsonl,
//!     │               drains stderr, kills on timeout
//!     ▼
//! parse_lines      ← last JSON object wins; Success | Malformed
//!     │
//!     ▼
//! AgentInvocation  ← result.json + summary.json written next to the transcript
//! ```

pub mod error;
pub mod invoker;
pub(crate) mod process;
pub mod transcript;
pub mod types;

pub use error::AgentError;
pub use invoker::{AgentInvocation, AgentInvoker, ClaudeCli, InvocationRequest};
pub use transcript::{parse_lines, ParsedOutput, TranscriptParse};
pub use types::{Message, ResultMessage};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
