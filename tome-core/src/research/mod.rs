//! Research orchestration: the phase-ordered session state machine.
//!
//! A session moves through five phases:
//! 1. **Initial research**: exploratory searches on the subject
//! 2. **Planning**: outline of chapters, each with fixed-arity subtopics
//! 3. **Chapter research**: per-chapter searches, one chapter at a time
//! 4. **Chapter writing**: per-chapter content from that chapter's research
//! 5. **Complete**
//!
//! Steps 3 and 4 repeat for every planned chapter in outline order.
//! The [`runner::SessionRunner`] drives the loop; [`store`] merges results,
//! [`sequencer`] picks the next task, and [`progress`] projects percent/label.

pub mod engine;
pub mod events;
pub mod phase;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod tasks;

pub use engine::ResearchEngine;
pub use events::ResearchEvent;
pub use phase::{Phase, PhaseResult};
pub use progress::{Progress, progress};
pub use registry::{SessionHandle, SessionRegistry};
pub use runner::{RunStatus, SessionRunner, SessionSnapshot};
pub use sequencer::{NextStep, PhaseTask};
pub use session::{
    Chapter, ChapterContent, ChapterStatus, InitialFindings, PlannedChapter, ResearchFindings,
    ResearchSession, Source, StartRequest, SubsectionContent,
};
pub use store::SessionStore;
pub use tasks::{PhaseExecutor, ResearchTasks};
