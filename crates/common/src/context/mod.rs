//! Context Pipeline Core Components
//!
//! The context pipeline is the layer between retrieval and generation:
//! - Source intent detection
//! - Citation-annotated context composition
//! - Conversation history compression
//! - Persona-aware style calibration

mod composer;
mod history;
mod intent;
mod style;

pub use composer::{compose_cited_context, Citation, ComposeOptions, ComposedContext};
pub use history::{compress_history, ConversationTurn, HistoryOptions, Role};
pub use intent::{detect_source_intent, Source, SourceIntent};
pub use style::{calibrate_style, Persona};
