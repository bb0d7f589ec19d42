//! Communication and distribution algorithms.

pub mod communicator;
pub mod completion;
pub mod distribute;
pub mod parallel_read;
pub mod window;
pub mod wire;
pub mod workers;

pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
pub use completion::HaloExchanger;
pub use distribute::{GlobalMesh, WorkerSummary, decompose, decompose_to_disk};
pub use parallel_read::{read_partitioned, setup_worker};
pub use window::{ExposedWindow, SealedWindow, SlotRecord};
pub use workers::run_workers;
