pub mod capture;
pub mod detection;
pub mod process;
pub mod shared;
