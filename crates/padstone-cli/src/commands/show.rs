use super::{format_value, json_pretty, EXIT_SUCCESS};
use padstone_state::StateFile;
use std::path::Path;

pub fn run(state_path: &Path, json: bool) -> Result<u8, String> {
    let doc = StateFile::new(state_path)
        .read()
        .map_err(|e| format!("state error: {e}"))?;
    if json {
        println!("{}", json_pretty(&doc)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("lineage:    {}", doc.lineage);
    println!("serial:     {}", doc.serial);
    println!("resources:  {}", doc.resource_count());
    for module in &doc.modules {
        if module.is_empty() {
            continue;
        }
        println!();
        println!("{}:", module.path);
        for (key, resource) in &module.resources {
            println!("  {key}  {}", resource.id);
        }
        for (name, value) in &module.outputs {
            println!("  output {name} = {}", format_value(value));
        }
    }
    Ok(EXIT_SUCCESS)
}
