pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use checkpoint::Checkpoint;
pub use config::AppConfig;
pub use error::{MetamorphosisError, Result};
pub use event::{EventBus, NullSink, WorkflowEvent};
pub use state::{Field, StateUpdate, TextField, WorkflowState};
pub use types::*;
