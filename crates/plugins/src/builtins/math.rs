//! Basic arithmetic tools.

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::tool::{ArgSpec, ArgType, Plugin, ToolDef, ToolHandler};

fn number_arg(args: &[serde_json::Value], index: usize, name: &str) -> Result<f64> {
    let value = args
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing argument \"{name}\""))?;
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("argument \"{name}\" is not a finite number")),
        // Models sometimes quote numbers; accept numeric strings.
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("argument \"{name}\" is not a number: {s:?}")),
        other => bail!("argument \"{name}\" is not a number: {other}"),
    }
}

/// Integers stay integers in the JSON result (`2 + 3` → `5`, not `5.0`).
fn number_value(value: f64) -> serde_json::Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serde_json::json!(value as i64)
    } else {
        serde_json::json!(value)
    }
}

fn binary_op(op: fn(f64, f64) -> Result<f64>) -> ToolHandler {
    Arc::new(move |args, _ctx| {
        Box::pin(async move {
            let a = number_arg(&args, 0, "a")?;
            let b = number_arg(&args, 1, "b")?;
            Ok(number_value(op(a, b)?))
        })
    })
}

fn pair() -> Vec<ArgSpec> {
    vec![
        ArgSpec::required("a", ArgType::Number),
        ArgSpec::required("b", ArgType::Number),
    ]
}

pub fn plugin() -> Plugin {
    Plugin::new("math", "Provides basic math operations")
        .with_tool(
            "add",
            ToolDef::new("Adds two numbers", pair(), binary_op(|a, b| Ok(a + b))),
        )
        .with_tool(
            "subtract",
            ToolDef::new(
                "Subtracts the second number from the first",
                pair(),
                binary_op(|a, b| Ok(a - b)),
            ),
        )
        .with_tool(
            "multiply",
            ToolDef::new("Multiplies two numbers", pair(), binary_op(|a, b| Ok(a * b))),
        )
        .with_tool(
            "divide",
            ToolDef::new(
                "Divides the first number by the second",
                pair(),
                binary_op(|a, b| {
                    if b == 0.0 {
                        bail!("division by zero");
                    }
                    Ok(a / b)
                }),
            ),
        )
}

// ── Tests ────────────────────────────────────────────────────────────────────
