//! `reportline-scheduler`: recurring report exports with SQLite persistence.
//!
//! # Overview
//!
//! Export definitions live in the `export_definitions` table. The
//! [`engine::TickLoop`] calls [`engine::ExecutionEngine::tick`] on a fixed
//! period; every active definition whose `next_run` has arrived is generated
//! through a [`generator::ReportGenerator`], delivered through a
//! [`reportline_delivery::DeliveryDispatcher`], and re-anchored on the trigger
//! time. Every attempt is logged in `export_runs`.
//!
//! # Frequencies
//!
//! | Variant     | Next trigger after anchor                        |
//! |-------------|--------------------------------------------------|
//! | `DAILY`     | +1 calendar day                                  |
//! | `WEEKLY`    | +7 calendar days                                 |
//! | `MONTHLY`   | +1 month, day clamped to the month's last day    |
//! | `QUARTERLY` | +3 months, day clamped to the month's last day   |

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod generator;
pub mod recurrence;
pub mod store;
pub mod templates;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{init_db, open_shared, SharedConnection};
pub use engine::{EngineSettings, ExecutionEngine, RunHandle, TickLoop, TickLoopHandle};
pub use error::{FieldError, Result, SchedulerError};
pub use generator::{GenerationRequest, GeneratorError, ReportGenerator};
pub use recurrence::next_trigger;
pub use store::ScheduleStore;
pub use templates::{TemplateResolver, TemplateStore};
pub use types::{
    ArtifactSummary, DefinitionInput, ExportDefinition, ReportTemplate, RunCompletion, RunOutcome,
    RunRecord, RunState, RunStatus, TemplateInput,
};
