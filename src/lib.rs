pub mod data_loader;
pub mod geometry;
pub mod io;
pub mod matching;
pub mod optimization;
pub mod point_cloud;
pub mod reconstruction;
pub mod reprojection;
pub mod tracking;
pub mod types;
