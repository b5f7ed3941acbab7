pub mod serve;
pub mod validate;
pub mod worker;

pub use serve::{ServeArgs, handle_serve};
pub use validate::{ValidateArgs, handle_validate};
pub use worker::{WorkerArgs, WorkerRunArgs, handle_worker, handle_worker_run};
