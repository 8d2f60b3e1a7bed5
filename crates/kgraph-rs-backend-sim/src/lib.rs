pub mod device;
pub mod replay;

pub use device::SimDevice;
pub use replay::{replay_graph, replay_launch_plan, Hazard, ReplayReport};
