//! Example: Promote one raw partition to Silver with Assay.
//!
//! Usage:
//!   cargo run --example promote -- <descriptor.json> <partition_dir> <silver_root> <load_date>
//!
//! Example:
//!   cargo run --example promote -- customers.json bronze/customers/dt=2025-01-04 silver 2025-01-04

use std::env;
use std::fs;
use std::path::Path;

use assay::{AssayError, DatasetDescriptor, Processor, PromotionConfig};

fn main() -> assay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 5 {
        eprintln!(
            "Usage: cargo run --example promote -- \
             <descriptor.json> <partition_dir> <silver_root> <load_date>"
        );
        std::process::exit(1);
    }

    let descriptor_path = Path::new(&args[1]);
    let text =
        fs::read_to_string(descriptor_path).map_err(|e| AssayError::io(descriptor_path, e))?;
    let descriptor: DatasetDescriptor = serde_json::from_str(&text)?;

    let processor = Processor::new(descriptor, PromotionConfig::new(&args[3]));
    let report = processor.run(Path::new(&args[2]), &args[4])?;

    let separator = "=".repeat(80);
    println!("{}", separator);
    println!("Assay Promotion: {}", report.dataset);
    println!("{}", separator);
    println!();

    println!("## Output");
    println!("  Directory: {}", report.output_dir.display());
    if let Some(model) = report.model {
        println!("  Model: {}", model);
    }
    println!("  Tables: {}", report.metrics.tables.join(", "));
    println!();

    println!("## Metrics");
    println!("  Rows read: {}", report.metrics.rows_read);
    println!("  Rows written: {}", report.metrics.rows_written);
    println!("  Changed keys: {}", report.metrics.changed_keys);
    println!("  Derived events: {}", report.metrics.derived_events);
    println!("  Duplicates removed: {}", report.metrics.duplicates_removed);
    println!("  Invalid rows: {}", report.metrics.invalid_rows);
    println!("  Duration: {} ms", report.metrics.duration_ms);
    println!();

    println!("## Schema");
    for field in &report.schema {
        println!("  {:<30} {}", field.name, field.column_type);
    }
    println!();

    println!("## Files");
    for file in report.files.iter().chain(&report.error_files) {
        println!("  {}", file.display());
    }

    Ok(())
}
