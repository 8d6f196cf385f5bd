//! Command execution.

use crate::config::Config;
use crate::Commands;
use acp_client::{Client, SetOutcome};
use acp_protocol::{derive_header_key, registry, Property, PropertyDescriptor, Validator};
use colored::Colorize;
use serde_json::{json, Value};

/// Executes commands that need no device connection.
///
/// Returns `None` for commands that talk to the device.
pub fn execute_local(
    cmd: &Commands,
    config: &Config,
    json: bool,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Props => {
            let descriptors = registry::supported_descriptors()?;
            if json {
                let items: Vec<Value> = descriptors.iter().map(descriptor_json).collect();
                Ok(Some(format_json(&Value::Array(items))))
            } else {
                Ok(Some(format_descriptors(descriptors)))
            }
        }

        Commands::Key { password } => {
            let password = password.as_deref().unwrap_or(&config.auth.password);
            Ok(Some(hex::encode(derive_header_key(password.as_bytes()))))
        }

        Commands::Get { .. } | Commands::Set { .. } => Ok(None),
    }
}

/// Executes a device command and returns the formatted output.
pub async fn execute(
    client: &mut Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Get { names } => {
            let batch = client.get_properties(&names).await?;

            for failure in &batch.failures {
                eprintln!("{}: {}", "Warning".yellow(), failure);
            }
            if let Some(code) = batch.error_code {
                return Err(format!("device returned error code {}", code).into());
            }

            if json {
                let items: Vec<Value> = batch.properties.iter().map(property_json).collect();
                return Ok(format_json(&Value::Array(items)));
            }

            if batch.properties.is_empty() {
                return Ok("No properties returned".yellow().to_string());
            }
            Ok(format_properties(&batch.properties))
        }

        Commands::Set { name, value } => {
            let property = Property::parse(&name, &value)?;
            let outcome = client.set_properties(&[property]).await?;

            match outcome {
                SetOutcome::Applied => Ok(format!("{} {} = {}", "Set".green(), name.cyan(), value)),
                SetOutcome::MessageError(code) => {
                    Err(format!("device returned error code {}", code).into())
                }
                SetOutcome::PropertyError { name, code } => {
                    Err(format!("error setting property {}: {}", name, code).into())
                }
            }
        }

        Commands::Props | Commands::Key { .. } => unreachable!(), // handled by execute_local
    }
}

fn format_properties(properties: &[Property]) -> String {
    properties
        .iter()
        .map(|property| {
            let name = property.name().map(|n| n.to_string()).unwrap_or_default();
            let value = property.format();
            if value.contains('\n') {
                format!("{}:\n{}", name.cyan(), value)
            } else {
                format!("{}: {}", name.cyan(), value)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_descriptors(descriptors: &[PropertyDescriptor]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<6} {:<5} {}\n",
        "NAME".bold(),
        "TYPE".bold(),
        "DESCRIPTION".bold()
    ));
    for descriptor in descriptors {
        let mut line = format!(
            "{:<6} {:<5} {}",
            descriptor.name.to_string().cyan(),
            descriptor.ty,
            descriptor.description
        );
        if let Some(validator) = &descriptor.validator {
            line.push_str(&format!(" {}", format_validator(validator).dimmed()));
        }
        output.push_str(&line);
        output.push('\n');
    }
    output.trim_end().to_string()
}

fn format_validator(validator: &Validator) -> String {
    match validator {
        Validator::Range { min, max } => format!("[{}..={}]", min, max),
        Validator::OneOf { values } => format!(
            "[one of {}]",
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Validator::MaxLength { max } => format!("[max {} bytes]", max),
    }
}

fn property_json(property: &Property) -> Value {
    json!({
        "name": property.name().map(|n| n.to_string()),
        "type": property.value().map(|v| v.property_type().tag()),
        "value": property.format(),
    })
}

fn descriptor_json(descriptor: &PropertyDescriptor) -> Value {
    json!({
        "name": descriptor.name.to_string(),
        "type": descriptor.ty.tag(),
        "description": descriptor.description,
        "validator": descriptor.validator,
    })
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acp_protocol::PropertyValue;

    #[test]
    fn test_key_command() {
        let mut config = Config::default();
        config.auth.password = "testing".to_string();

        let output = execute_local(&Commands::Key { password: None }, &config, false)
            .unwrap()
            .unwrap();
        assert_eq!(
            output,
            "7a5c8b71ad6f324f0cac857d868ab5173e09c835f431657f3c9cb56d969aa507"
        );

        let output = execute_local(
            &Commands::Key {
                password: Some(String::new()),
            },
            &config,
            false,
        )
        .unwrap()
        .unwrap();
        assert_ne!(output, "7a5c8b71ad6f324f0cac857d868ab5173e09c835f431657f3c9cb56d969aa507");
    }

    #[test]
    fn test_device_commands_are_not_local() {
        let config = Config::default();
        let cmd = Commands::Get {
            names: vec!["dbug".to_string()],
        };
        assert!(execute_local(&cmd, &config, false).unwrap().is_none());
    }

    #[test]
    fn test_props_json() {
        let output = execute_local(&Commands::Props, &Config::default(), true)
            .unwrap()
            .unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        let items = parsed.as_array().unwrap();
        assert!(items.iter().any(|item| item["name"] == "dbug" && item["type"] == "hex"));
        assert!(items
            .iter()
            .any(|item| item["validator"]["kind"] == "range" && item["name"] == "raCh"));
    }

    #[test]
    fn test_property_json() {
        let property = Property::new("dbug", PropertyValue::Hex(0x3000)).unwrap();
        let value = property_json(&property);
        assert_eq!(value["name"], "dbug");
        assert_eq!(value["type"], "hex");
        assert_eq!(value["value"], "0x3000");
    }

    #[test]
    fn test_format_validator() {
        assert_eq!(
            format_validator(&Validator::OneOf {
                values: vec![10, 25]
            }),
            "[one of 10, 25]"
        );
        assert_eq!(
            format_validator(&Validator::Range { min: 0, max: 165 }),
            "[0..=165]"
        );
    }
}
