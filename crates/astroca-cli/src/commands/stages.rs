//! Stage listing command

use super::registry_helper::build_registry;
use anyhow::Result;
use astroca_core::stage::{OutputKind, ParamDefault};
use astroca_core::{StageDescriptor, StageKind};
use clap::Args;
use serde_json::{json, Value};

#[derive(Args)]
pub struct StagesCommand {
    /// Print the catalog as JSON
    #[arg(long)]
    json: bool,
}

impl StagesCommand {
    pub fn execute(self) -> Result<()> {
        let registry = build_registry(false);

        if self.json {
            let stages: Vec<Value> = StageKind::ALL
                .iter()
                .map(|stage| describe(stage.descriptor(), registry.contains(*stage)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&stages)?);
            return Ok(());
        }

        println!("Available stages:");
        for stage in StageKind::ALL {
            let d = stage.descriptor();
            println!("\n{} ({})", stage, d.name);
            println!("  Description: {}", d.description);
            println!("  Category: {}", d.category);
            if !d.auxiliary.is_empty() {
                let roles: Vec<_> = d.auxiliary.iter().map(|r| r.as_str()).collect();
                println!("  Auxiliary inputs: {}", roles.join(", "));
            }
            println!("  Boundaries required: {}", d.needs_boundaries);
            println!("  Output: {} ({})", d.default_output, output_label(d.output));
            println!("  Built-in kernel: {}", registry.contains(stage));
            if d.params.is_empty() {
                println!("  Parameters: none");
            } else {
                println!("  Parameters:");
                for p in d.params {
                    println!("    {}: {} = {}  {}", p.key, p.ty, p.default, p.help);
                }
            }
        }
        Ok(())
    }
}

fn output_label(output: OutputKind) -> &'static str {
    match output {
        OutputKind::Frames => "frames",
        OutputKind::FramesWithBoundaries => "frames + boundary index",
        OutputKind::Table => "table",
    }
}

fn describe(d: &StageDescriptor, builtin: bool) -> Value {
    let params: Vec<Value> = d
        .params
        .iter()
        .map(|p| {
            let default = match p.default {
                ParamDefault::Required | ParamDefault::FrameCount => Value::Null,
                ParamDefault::Int(v) => json!(v),
                ParamDefault::Float(v) => json!(v),
                ParamDefault::Str(v) => json!(v),
            };
            json!({
                "key": p.key,
                "type": p.ty.to_string(),
                "required": p.default == ParamDefault::Required,
                "default": default,
                "help": p.help,
            })
        })
        .collect();

    json!({
        "id": d.kind.as_str(),
        "name": d.name,
        "description": d.description,
        "category": d.category,
        "auxiliary": d.auxiliary.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "needs_boundaries": d.needs_boundaries,
        "output": output_label(d.output),
        "default_output": d.default_output,
        "builtin_kernel": builtin,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_feature_extraction() {
        let value = describe(StageKind::FeatureExtraction.descriptor(), true);
        assert_eq!(value["id"], "feature_extraction");
        assert_eq!(value["output"], "table");
        assert_eq!(value["auxiliary"], json!(["image_amplitude"]));

        let params = value["params"].as_array().unwrap();
        let ids = params.iter().find(|p| p["key"] == "ids_events").unwrap();
        assert_eq!(ids["required"], true);
        let vx = params.iter().find(|p| p["key"] == "voxel_size_x").unwrap();
        assert_eq!(vx["default"], json!(0.1025));
    }
}
