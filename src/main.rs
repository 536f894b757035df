mod config;
mod data;
mod nn;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::default_config();
    tracing::info!(
        "Training {}^3 volumes from {} into {}",
        config.model.generator.volume_edge,
        config::DATA_DIR,
        config.output_dir
    );

    nn::training::train(&config)
}
