use anyhow::{Context, Result};
use clap::Parser;
use lib_rsu::geometry::parse_network;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// Converts a SUMO network into the geometry JSON served by the relay.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Reads a SUMO .net.xml file and writes the dashboard geometry as JSON: non-internal lane polylines, traffic lights, one RSU per traffic light and the bounding box. The output can be saved to a file or printed to standard output."
)]
struct Args {
    /// Path to the input .net.xml file.
    #[arg(short, long)]
    input: PathBuf,

    /// Junction ids to treat as traffic lights (comma separated). Defaults to every signalized junction.
    #[arg(short, long, value_delimiter = ',')]
    traffic_lights: Option<Vec<String>>,

    /// Optional path to the output JSON file. If not provided, the output will be printed to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output minified JSON (without pretty-printing).
    #[arg(short, long)]
    minify: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let xml = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let network = parse_network(&xml, args.traffic_lights.as_deref())?;

    let json_output = if args.minify {
        serde_json::to_string(&network)?
    } else {
        serde_json::to_string_pretty(&network)?
    };

    if let Some(output_path) = args.output {
        fs::write(&output_path, json_output)?;
        eprintln!(
            "Wrote {} lanes, {} traffic lights to {}",
            network.lanes.len(),
            network.tls.len(),
            output_path.display()
        );
    } else {
        io::stdout().write_all(json_output.as_bytes())?;
    }

    Ok(())
}
