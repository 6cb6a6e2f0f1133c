pub mod directions;
pub mod location;
pub mod navigation;
pub mod storage;
pub mod sync;
