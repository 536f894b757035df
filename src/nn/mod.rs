pub mod discriminator;
pub mod generator;
pub mod gpu;
pub mod layers;
pub mod loss;
pub mod model;
pub mod persistence;
pub mod sampling;
pub mod scalar_log;
pub mod training;
