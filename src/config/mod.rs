/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Loading of the forwarding rules file: a YAML list of targets.

use std::path::Path;

use anyhow::{anyhow, Context};
use yaml_rust::{Yaml, YamlLoader};

use crate::distribute::TargetConfig;

pub fn load_targets(path: &Path) -> anyhow::Result<Vec<TargetConfig>> {
    let content = std::fs::read_to_string(path)
        .context(format!("cannot open config file {}", path.display()))?;
    let docs = YamlLoader::load_from_str(&content)
        .context(format!("invalid yaml in config file {}", path.display()))?;
    match docs.first() {
        Some(doc) => as_target_list(doc),
        None => Ok(Vec::new()),
    }
}

fn as_target_list(value: &Yaml) -> anyhow::Result<Vec<TargetConfig>> {
    if let Yaml::Array(seq) = value {
        let mut targets = Vec::with_capacity(seq.len());
        for (i, v) in seq.iter().enumerate() {
            let target = as_target(v).context(format!("invalid target #{i}"))?;
            targets.push(target);
        }
        Ok(targets)
    } else {
        Err(anyhow!("the targets config should be a list"))
    }
}

fn as_target(value: &Yaml) -> anyhow::Result<TargetConfig> {
    let Yaml::Hash(map) = value else {
        return Err(anyhow!("yaml value type for a target should be 'map'"));
    };

    let mut target = TargetConfig::default();
    for (k, v) in map.iter() {
        let k = as_str(k).context("invalid key type")?;
        match k {
            "id" => target.id = as_str(v).context("invalid value for key id")?.to_string(),
            "imeipattern" => {
                target.imei_pattern = as_str(v)
                    .context("invalid value for key imeipattern")?
                    .to_string();
            }
            "backend" => {
                target.backend = as_str(v)
                    .context("invalid value for key backend")?
                    .to_string();
            }
            "skiptls" => target.skip_tls = as_bool(v).context("invalid value for key skiptls")?,
            "header" => {
                let Yaml::Hash(headers) = v else {
                    return Err(anyhow!("yaml value type for key header should be 'map'"));
                };
                for (name, value) in headers.iter() {
                    let name = as_str(name).context("invalid header name")?;
                    let value = as_str(value)
                        .context(format!("invalid value for header {name}"))?;
                    target.headers.insert(name.to_string(), value.to_string());
                }
            }
            _ => return Err(anyhow!("invalid key {k}")),
        }
    }

    if target.imei_pattern.is_empty() {
        return Err(anyhow!("no imeipattern set"));
    }
    if target.backend.is_empty() {
        return Err(anyhow!("no backend set"));
    }
    Ok(target)
}

fn as_str(value: &Yaml) -> anyhow::Result<&str> {
    match value {
        Yaml::String(s) => Ok(s),
        _ => Err(anyhow!("yaml value type should be 'string'")),
    }
}

fn as_bool(value: &Yaml) -> anyhow::Result<bool> {
    match value {
        Yaml::Boolean(b) => Ok(*b),
        _ => Err(anyhow!("yaml value type should be 'boolean'")),
    }
}
