use anyhow::{Context, Result};
use clap::Parser;
use ddrdaq::args::Args;
use ddrdaq::capture::CaptureSession;
use ddrdaq::dataset::Metadata;
use ddrdaq::ddr::{BufferLayout, Ddr};
use ddrdaq::decode::{Decoder, Dialect};
use ddrdaq::endpoints::DdrEndpoints;
use ddrdaq::sim::SimTransport;
use ddrdaq::waveform;
use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let layout = BufferLayout::default();
    let mut ddr = Ddr::new(
        SimTransport::new(args.producer_version),
        DdrEndpoints::instrument_default(),
        layout.clone(),
    )?;

    let (pattern, realized) =
        waveform::sine(&layout, args.amplitude, args.frequency, args.offset, true)?;
    tracing::info!(
        requested = args.frequency,
        realized,
        "synthesized playback sine"
    );
    let channels = vec![pattern; layout.num_channels];
    ddr.write_setup(true)?;
    ddr.write_channels(&channels, false)?;
    drop(channels);
    ddr.repeat_setup()?;

    let name = args
        .output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("capture")
        .to_string();
    let decoder = Decoder::new(Dialect::Full, args.producer_version);
    let mut session = CaptureSession::new(&mut ddr, decoder, &name, args.blocks_per_chunk)?;
    let appended = session.run(args.chunks)?;
    tracing::info!(samples = appended.end - appended.start, "capture complete");

    let dataset = session.into_dataset();
    let data_path = args.output.with_extension("dat");
    let mut file = fs::File::create(&data_path)
        .with_context(|| format!("failed to create {}", data_path.display()))?;
    dataset.write_raw(&mut file)?;

    let mut meta = Metadata::new(
        dataset.name(),
        args.producer_version,
        dataset.channels(),
        1.0 / layout.adc_period,
    );
    meta.set_description("simulated DDR capture");
    let meta_path = args.output.with_extension("json");
    fs::write(&meta_path, meta.to_json())
        .with_context(|| format!("failed to write {}", meta_path.display()))?;
    tracing::info!(
        data = %data_path.display(),
        metadata = %meta_path.display(),
        "dataset written"
    );
    Ok(())
}
