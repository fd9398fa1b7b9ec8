//! OpenAPI properties of a packaged model's samples.

use colored::Colorize;
use flowpack_training::SampleSchemas;
use flowpack_training::inference::Property;
use std::path::Path;

pub fn execute(model_dir: &Path, table: bool) -> anyhow::Result<()> {
    let properties = SampleSchemas::load(model_dir)?.properties();

    if !table {
        println!("{}", serde_json::to_string_pretty(&properties)?);
        return Ok(());
    }

    print_section("Input", &properties.input);
    print_section("Output", &properties.output);
    Ok(())
}

fn print_section(title: &str, properties: &[Property]) {
    println!("{}", format!("{title} ({})", properties.len()).bold().cyan());
    if properties.is_empty() {
        println!("  {}", "no sample".dimmed());
    }
    for property in properties {
        println!(
            "  {:<24} {:<10} {}",
            property.name,
            property.kind.unwrap_or("-"),
            property.example
        );
    }
    println!();
}
