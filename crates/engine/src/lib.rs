//! The conversational session engine.
//!
//! A gateway event flows through:
//!
//! 1. **Context assembly** — original prompt, recent turns, current turn
//! 2. **Style negotiation** — bounded wait for Simple / Detailed
//! 3. **Provider routing** — budget-gated tiers (see `threadsage-providers`)
//! 4. **Formatting** — math notation to Unicode, fence-aware chunking
//! 5. **Persistence and delivery** — transactional writes, then chunked sends
//!
//! [`MaintenanceSweeper`] holds the bulk operations a scheduler triggers.

pub mod context;
pub mod format;
pub mod maintenance;
pub mod session;
pub mod style;

pub use context::{ContextAssembler, IMAGE_FALLBACK_PROMPT, SUPPORTED_LANGUAGES, TurnInput};
pub use format::{Chunk, chunk, normalize};
pub use maintenance::MaintenanceSweeper;
pub use session::{SessionEngine, TurnReport, UserStats};
pub use style::{Negotiation, NegotiationOutcome, StyleNegotiator};
