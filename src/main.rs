use geoquery::telemetry;
use geoquery::{MemorySpatialStore, ServiceBuilder};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const USAGE: &str = "usage: geoquery <fixture.json> [lat lng radius_meters]";

fn parse_f64(value: Option<&String>, name: &str, default: f64) -> Result<f64, String> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| format!("{} must be a number, got '{}'", name, v)),
        None => Ok(default),
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let fixture = args.first().ok_or(USAGE)?;
    let lat = parse_f64(args.get(1), "lat", 0.0)?;
    let lng = parse_f64(args.get(2), "lng", 0.0)?;
    let radius = parse_f64(args.get(3), "radius", 5000.0)?;

    let store = MemorySpatialStore::from_json_file(fixture)?;
    let service = ServiceBuilder::new().store(Arc::new(store)).build()?;

    let report = service.reload_index()?;
    info!(
        indexed = report.indexed,
        skipped = report.skipped,
        "index ready"
    );

    let nearby = service.nearby_search(lat, lng, radius, 1, 10)?;
    println!("{}", serde_json::to_string_pretty(&nearby)?);
    Ok(())
}

fn main() -> ExitCode {
    let _guards = telemetry::init_logging().unwrap_or_default();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "query failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
