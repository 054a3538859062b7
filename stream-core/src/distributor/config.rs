use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::rules::{RouteKey, RuleSet};
use crate::{
    error::{Error, Result},
    frame::PortId,
};

#[derive(Clone, Debug, Deserialize)]
pub struct DistributorConfig {
    pub default_port: PortId,
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub class_names_file: Option<PathBuf>,
    #[serde(default)]
    pub is_affine: bool,
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuleConfig {
    /// Seconds between fires.
    #[serde(default)]
    pub time_interval: Option<f64>,
    #[serde(default)]
    pub frame_interval: Option<u64>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouteConfig {
    pub port_id: PortId,
    /// Empty means the whole frame.
    #[serde(default, alias = "class_names")]
    pub classes: Vec<String>,
}

impl RouteConfig {
    fn keys(&self) -> Vec<(RouteKey, PortId)> {
        if self.classes.is_empty() {
            return vec![(RouteKey::FullFrame, self.port_id)];
        }
        self.classes
            .iter()
            .map(|label| (RouteKey::class(label.as_str()), self.port_id))
            .collect()
    }
}

impl DistributorConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::config(format!("distributor: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("distributor: {}", e)))
    }

    /// Inline labels win over the label file. The file holds one label per line.
    pub fn load_class_names(&self) -> Result<Vec<String>> {
        if !self.class_names.is_empty() {
            return Ok(self.class_names.clone());
        }
        let Some(path) = &self.class_names_file else {
            return Ok(Vec::new());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("class_names_file {}: {}", path.display(), e))
        })?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn build_rules(&self) -> Result<RuleSet> {
        if self.rules.is_empty() {
            return Err(Error::config("distributor needs at least one rule"));
        }
        let mut rules = RuleSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let routes = rule.routes.iter().flat_map(RouteConfig::keys);
            match (rule.time_interval, rule.frame_interval) {
                (Some(_), Some(_)) => {
                    return Err(Error::config(format!(
                        "rule {} sets both time_interval and frame_interval",
                        i
                    )));
                }
                (Some(seconds), None) => {
                    if !seconds.is_finite() || seconds <= 0.0 {
                        return Err(Error::config(format!(
                            "rule {} time_interval must be positive, got {}",
                            i, seconds
                        )));
                    }
                    let interval = Duration::try_from_secs_f64(seconds).map_err(|e| {
                        Error::config(format!("rule {} time_interval {}: {}", i, seconds, e))
                    })?;
                    rules.add_time_rule(interval, routes);
                }
                (None, Some(0)) => {
                    return Err(Error::config(format!("rule {} frame_interval must be at least 1", i)));
                }
                (None, Some(frames)) => rules.add_frame_rule(frames, routes),
                (None, None) => rules.add_frame_rule(1, routes),
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
