// orion_shared: wire and domain models shared by the host library and the simulator

pub mod nanodlp;
pub mod status;

pub use nanodlp::{FileRef, Plate, RawStatus};
pub use status::{CanonicalStatus, FileData, KinematicStatus, PhysicalState, PrintData, PrintStatus};
