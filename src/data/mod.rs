pub mod dataset;
pub mod models;
pub mod nrrd;
pub mod volume;
